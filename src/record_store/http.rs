// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! HTTP plumbing shared by both protocol generations: client construction,
//! response envelope parsing, error classification and per-call metrics.

use reqwest::{Client, RequestBuilder};
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use super::error::RecordStoreError;
use super::types::{PlatformRow, RowPage, Worksheet};
use crate::config::RecordStoreConfig;
use crate::metrics;

/// Longest body excerpt carried into error messages.
const BODY_EXCERPT_CHARS: usize = 256;

/// `{success, error_code, error_msg, data}`, used by both generations.
#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    error_code: i64,
    #[serde(default)]
    error_msg: String,
    #[serde(default)]
    data: Value,
}

pub(crate) struct HttpTransport {
    client: Client,
    base_url: String,
    protocol: &'static str,
}

impl HttpTransport {
    pub(crate) fn new(config: &RecordStoreConfig) -> Result<Self, RecordStoreError> {
        config
            .validate()
            .map_err(|e| RecordStoreError::Configuration(e.to_string()))?;

        let client = Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|e| RecordStoreError::Configuration(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: config.api_base.trim_end_matches('/').to_string(),
            protocol: config.protocol.as_str(),
        })
    }

    pub(crate) fn client(&self) -> &Client {
        &self.client
    }

    pub(crate) fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Send the request and return the envelope's `data`.
    pub(crate) async fn send(&self, operation: &'static str, request: RequestBuilder) -> Result<Value, RecordStoreError> {
        let _timer = crate::time_operation!(self.protocol, operation);
        let result = Self::execute(request).await;

        match &result {
            Ok(_) => {
                metrics::record_store_call(self.protocol, operation, "success");
            }
            Err(e) => {
                debug!(protocol = self.protocol, operation, error = %e, "Record store call failed");
                metrics::record_store_call(self.protocol, operation, "error");
                metrics::record_store_error(self.protocol, operation, e.kind());
            }
        }
        result
    }

    async fn execute(request: RequestBuilder) -> Result<Value, RecordStoreError> {
        let response = request.send().await?;
        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            // Prefer the platform's own message when the error body is an envelope
            let message = serde_json::from_str::<Envelope>(&body)
                .ok()
                .map(|e| e.error_msg)
                .filter(|m| !m.is_empty())
                .unwrap_or_else(|| excerpt(&body));
            return Err(RecordStoreError::status(status.as_u16(), message));
        }

        parse_envelope(&body)
    }
}

pub(crate) fn parse_envelope(body: &str) -> Result<Value, RecordStoreError> {
    let envelope: Envelope = serde_json::from_str(body)
        .map_err(|e| RecordStoreError::Decode(format!("{e}: {}", excerpt(body))))?;

    if !envelope.success {
        return Err(RecordStoreError::provider(envelope.error_code, envelope.error_msg));
    }
    Ok(envelope.data)
}

/// Parse `{rows: [...], total: n}`.
pub(crate) fn parse_row_page(worksheet: Worksheet, data: Value) -> Result<RowPage, RecordStoreError> {
    let Value::Object(mut data) = data else {
        return Err(RecordStoreError::Decode("row page is not an object".into()));
    };

    let total = data.get("total").and_then(Value::as_u64).unwrap_or(0);
    let rows = match data.remove("rows") {
        Some(Value::Array(rows)) => rows,
        Some(Value::Null) | None => Vec::new(),
        Some(_) => return Err(RecordStoreError::Decode("rows is not an array".into())),
    };

    let rows = rows
        .into_iter()
        .map(|raw| parse_row(worksheet, raw))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(RowPage { rows, total })
}

pub(crate) fn parse_row(worksheet: Worksheet, raw: Value) -> Result<PlatformRow, RecordStoreError> {
    match raw {
        Value::Object(map) => PlatformRow::from_raw(worksheet, map)
            .ok_or_else(|| RecordStoreError::Decode("row without id".into())),
        _ => Err(RecordStoreError::Decode("row is not an object".into())),
    }
}

fn excerpt(body: &str) -> String {
    body.chars().take(BODY_EXCERPT_CHARS).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_envelope_success_returns_data() {
        let data = parse_envelope(r#"{"success":true,"error_code":1,"data":"row-1"}"#).unwrap();
        assert_eq!(data, json!("row-1"));
    }

    #[test]
    fn test_envelope_failure_is_provider_error() {
        let err = parse_envelope(r#"{"success":false,"error_code":10002,"error_msg":"bad value"}"#).unwrap_err();
        assert_eq!(err, RecordStoreError::provider(10002, "bad value"));
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_envelope_garbage_is_decode_error() {
        let err = parse_envelope("<html>bad gateway</html>").unwrap_err();
        assert!(matches!(err, RecordStoreError::Decode(_)));
    }

    #[test]
    fn test_parse_row_page() {
        let data = json!({
            "rows": [{"rowid": "a", "name": "x"}, {"rowid": "b"}],
            "total": 7
        });
        let page = parse_row_page(Worksheet::Department, data).unwrap();
        assert_eq!(page.total, 7);
        assert_eq!(page.rows.len(), 2);
        assert_eq!(page.rows[1].row_id, "b");
    }

    #[test]
    fn test_parse_row_page_null_rows() {
        let page = parse_row_page(Worksheet::Staff, json!({"rows": null, "total": 0})).unwrap();
        assert!(page.rows.is_empty());
    }

    #[test]
    fn test_parse_row_without_id_fails() {
        let err = parse_row_page(Worksheet::Staff, json!({"rows": [{"name": "x"}], "total": 1})).unwrap_err();
        assert!(matches!(err, RecordStoreError::Decode(_)));
    }
}
