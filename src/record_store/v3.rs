// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Header-signed V3 client (`/v3/app/worksheets/*`).
//!
//! Credentials travel in the `HAP-Appkey` and `HAP-Sign` headers. The
//! endpoints are resource-style and field values keep their JSON shape.

use async_trait::async_trait;
use reqwest::{Method, RequestBuilder};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, info, instrument};

use super::error::RecordStoreError;
use super::filter::Filter;
use super::http::{parse_row, parse_row_page, HttpTransport};
use super::traits::RecordStore;
use super::types::{FieldValues, Page, PlatformRow, RowId, RowPage, SchemaField, Worksheet};
use super::v3_translator::V3Translator;
use crate::config::RecordStoreConfig;

const HEADER_APP_KEY: &str = "HAP-Appkey";
const HEADER_SIGN: &str = "HAP-Sign";

/// Provider code for a row that does not exist.
const ROW_NOT_FOUND: i64 = 10007;

#[derive(Debug, Deserialize)]
struct WorksheetInfo {
    #[serde(default)]
    fields: Vec<SchemaField>,
}

pub struct V3RecordStore {
    http: HttpTransport,
    app_key: String,
    sign: String,
}

impl V3RecordStore {
    pub fn new(config: &RecordStoreConfig) -> Result<Self, RecordStoreError> {
        Ok(Self {
            http: HttpTransport::new(config)?,
            app_key: config.app_key.clone(),
            sign: config.sign.clone(),
        })
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.http
            .client()
            .request(method, self.http.url(path))
            .header(HEADER_APP_KEY, &self.app_key)
            .header(HEADER_SIGN, &self.sign)
    }

    fn rows_path(worksheet: Worksheet) -> String {
        format!("/v3/app/worksheets/{}/rows", worksheet.alias())
    }

    fn row_path(worksheet: Worksheet, row_id: &str) -> String {
        format!("/v3/app/worksheets/{}/rows/{}", worksheet.alias(), row_id)
    }

    /// `[{id, value}]`, values passed through unchanged.
    fn fields_body(fields: &FieldValues) -> Vec<Value> {
        fields
            .iter()
            .map(|(id, value)| json!({"id": id, "value": value}))
            .collect()
    }
}

#[async_trait]
impl RecordStore for V3RecordStore {
    fn protocol(&self) -> &'static str {
        "v3"
    }

    #[instrument(skip(self, fields), fields(field_count = fields.len()))]
    async fn create_row(&self, worksheet: Worksheet, fields: &FieldValues) -> Result<RowId, RecordStoreError> {
        let request = self
            .request(Method::POST, &Self::rows_path(worksheet))
            .json(&json!({"fields": Self::fields_body(fields), "triggerWorkflow": true}));

        let data = self.http.send("create", request).await?;
        let row_id = data
            .get("id")
            .and_then(Value::as_str)
            .filter(|id| !id.is_empty())
            .map(str::to_string)
            .ok_or_else(|| RecordStoreError::Decode("create did not return a row id".into()))?;

        info!(%worksheet, row_id = %row_id, "Row created");
        Ok(row_id)
    }

    #[instrument(skip(self))]
    async fn get_row(&self, worksheet: Worksheet, row_id: &str) -> Result<Option<PlatformRow>, RecordStoreError> {
        let request = self.request(Method::GET, &Self::row_path(worksheet, row_id));

        match self.http.send("get", request).await {
            Ok(Value::Null) => Ok(None),
            Ok(data) => parse_row(worksheet, data).map(Some),
            Err(RecordStoreError::Provider { code: ROW_NOT_FOUND, .. })
            | Err(RecordStoreError::Status { status: 404, .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    #[instrument(skip(self, filter))]
    async fn filter_rows(&self, worksheet: Worksheet, filter: &Filter, page: Page) -> Result<RowPage, RecordStoreError> {
        let path = format!("{}/list", Self::rows_path(worksheet));
        let request = self.request(Method::POST, &path).json(&json!({
            "pageSize": page.size,
            "pageIndex": page.index,
            "filter": V3Translator::translate(filter),
        }));

        let data = self.http.send("filter", request).await?;
        let rows = parse_row_page(worksheet, data)?;
        debug!(%worksheet, returned = rows.rows.len(), total = rows.total, "Filtered rows");
        Ok(rows)
    }

    #[instrument(skip(self, fields), fields(field_count = fields.len()))]
    async fn update_row(&self, worksheet: Worksheet, row_id: &str, fields: &FieldValues) -> Result<(), RecordStoreError> {
        let request = self
            .request(Method::PATCH, &Self::row_path(worksheet, row_id))
            .json(&json!({"fields": Self::fields_body(fields), "triggerWorkflow": true}));

        self.http.send("update", request).await?;
        info!(%worksheet, row_id, "Row updated");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn delete_row(&self, worksheet: Worksheet, row_id: &str) -> Result<(), RecordStoreError> {
        let request = self.request(Method::DELETE, &Self::row_path(worksheet, row_id));

        self.http.send("delete", request).await?;
        info!(%worksheet, row_id, "Row deleted");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn worksheet_schema(&self, worksheet: Worksheet) -> Result<Vec<SchemaField>, RecordStoreError> {
        let path = format!("/v3/app/worksheets/{}", worksheet.alias());
        let data = self.http.send("schema", self.request(Method::GET, &path)).await?;

        let info: WorksheetInfo = serde_json::from_value(data)
            .map_err(|e| RecordStoreError::Decode(format!("worksheet info: {e}")))?;
        Ok(info.fields)
    }
}
