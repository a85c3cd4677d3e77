// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Body-signed V2 client (`/v2/open/worksheet/*`).
//!
//! Every request is a POST whose JSON body carries `appKey`, `sign` and
//! `worksheetId`. Field values travel as strings; structured values
//! (dropdown keys, relations, attachments) are sent as their JSON text.

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use tracing::{debug, info, instrument};

use super::error::RecordStoreError;
use super::filter::Filter;
use super::http::{parse_row, parse_row_page, HttpTransport};
use super::traits::RecordStore;
use super::types::{FieldValues, Page, PlatformRow, RowId, RowPage, SchemaField, SchemaOption, Worksheet};
use super::v2_translator::V2Translator;
use crate::config::RecordStoreConfig;

/// Provider code for a row that does not exist.
const ROW_NOT_FOUND: i64 = 10007;

pub struct V2RecordStore {
    http: HttpTransport,
    app_key: String,
    sign: String,
}

impl V2RecordStore {
    pub fn new(config: &RecordStoreConfig) -> Result<Self, RecordStoreError> {
        Ok(Self {
            http: HttpTransport::new(config)?,
            app_key: config.app_key.clone(),
            sign: config.sign.clone(),
        })
    }

    /// Signed body skeleton for a worksheet.
    fn body(&self, worksheet: Worksheet) -> Map<String, Value> {
        let mut body = Map::new();
        body.insert("appKey".into(), json!(self.app_key));
        body.insert("sign".into(), json!(self.sign));
        body.insert("worksheetId".into(), json!(worksheet.alias()));
        body
    }

    async fn post(&self, operation: &'static str, path: &str, body: Map<String, Value>) -> Result<Value, RecordStoreError> {
        let request = self.http.client().post(self.http.url(path)).json(&body);
        self.http.send(operation, request).await
    }

    /// `[{controlId, value}]` with every value flattened to a string.
    fn controls(fields: &FieldValues) -> Vec<Value> {
        fields
            .iter()
            .map(|(id, value)| json!({"controlId": id, "value": Self::wire_value(value)}))
            .collect()
    }

    fn wire_value(value: &Value) -> String {
        match value {
            Value::Null => String::new(),
            Value::String(s) => s.clone(),
            other => other.to_string(),
        }
    }

    fn schema_field(raw: &Value) -> Option<SchemaField> {
        let id = raw.get("controlId")?.as_str()?.to_string();
        let field_type = match raw.get("type") {
            Some(Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
            None => String::new(),
        };
        let options = raw
            .get("options")
            .and_then(Value::as_array)
            .map(|opts| {
                opts.iter()
                    .filter_map(|o| {
                        Some(SchemaOption {
                            key: o.get("key")?.as_str()?.to_string(),
                            value: o.get("value").and_then(Value::as_str).unwrap_or_default().to_string(),
                        })
                    })
                    .collect()
            })
            .unwrap_or_default();

        Some(SchemaField {
            id,
            name: raw.get("controlName").and_then(Value::as_str).unwrap_or_default().to_string(),
            field_type,
            alias: raw
                .get("alias")
                .and_then(Value::as_str)
                .filter(|a| !a.is_empty())
                .map(str::to_string),
            required: raw.get("required").and_then(Value::as_bool).unwrap_or(false),
            options,
        })
    }
}

#[async_trait]
impl RecordStore for V2RecordStore {
    fn protocol(&self) -> &'static str {
        "v2"
    }

    #[instrument(skip(self, fields), fields(field_count = fields.len()))]
    async fn create_row(&self, worksheet: Worksheet, fields: &FieldValues) -> Result<RowId, RecordStoreError> {
        let mut body = self.body(worksheet);
        body.insert("controls".into(), json!(Self::controls(fields)));
        body.insert("triggerWorkflow".into(), json!(true));

        let data = self.post("create", "/v2/open/worksheet/addRow", body).await?;
        let row_id = data
            .as_str()
            .filter(|id| !id.is_empty())
            .map(str::to_string)
            .ok_or_else(|| RecordStoreError::Decode("addRow did not return a row id".into()))?;

        info!(%worksheet, row_id = %row_id, "Row created");
        Ok(row_id)
    }

    #[instrument(skip(self))]
    async fn get_row(&self, worksheet: Worksheet, row_id: &str) -> Result<Option<PlatformRow>, RecordStoreError> {
        let mut body = self.body(worksheet);
        body.insert("rowId".into(), json!(row_id));

        match self.post("get", "/v2/open/worksheet/getRowByIdPost", body).await {
            Ok(Value::Null) => Ok(None),
            Ok(data) => parse_row(worksheet, data).map(Some),
            Err(RecordStoreError::Provider { code: ROW_NOT_FOUND, .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    #[instrument(skip(self, filter))]
    async fn filter_rows(&self, worksheet: Worksheet, filter: &Filter, page: Page) -> Result<RowPage, RecordStoreError> {
        let mut body = self.body(worksheet);
        body.insert("pageSize".into(), json!(page.size));
        body.insert("pageIndex".into(), json!(page.index));
        body.insert("filters".into(), json!(V2Translator::translate(filter)));

        let data = self.post("filter", "/v2/open/worksheet/getFilterRows", body).await?;
        let rows = parse_row_page(worksheet, data)?;
        debug!(%worksheet, returned = rows.rows.len(), total = rows.total, "Filtered rows");
        Ok(rows)
    }

    #[instrument(skip(self, fields), fields(field_count = fields.len()))]
    async fn update_row(&self, worksheet: Worksheet, row_id: &str, fields: &FieldValues) -> Result<(), RecordStoreError> {
        let mut body = self.body(worksheet);
        body.insert("rowId".into(), json!(row_id));
        body.insert("controls".into(), json!(Self::controls(fields)));
        body.insert("triggerWorkflow".into(), json!(true));

        self.post("update", "/v2/open/worksheet/editRow", body).await?;
        info!(%worksheet, row_id, "Row updated");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn delete_row(&self, worksheet: Worksheet, row_id: &str) -> Result<(), RecordStoreError> {
        let mut body = self.body(worksheet);
        body.insert("rowId".into(), json!(row_id));

        self.post("delete", "/v2/open/worksheet/deleteRow", body).await?;
        info!(%worksheet, row_id, "Row deleted");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn worksheet_schema(&self, worksheet: Worksheet) -> Result<Vec<SchemaField>, RecordStoreError> {
        let body = self.body(worksheet);
        let data = self.post("schema", "/v2/open/worksheet/getWorksheetInfo", body).await?;

        let controls = data
            .get("controls")
            .and_then(Value::as_array)
            .ok_or_else(|| RecordStoreError::Decode("worksheet info without controls".into()))?;

        Ok(controls.iter().filter_map(Self::schema_field).collect())
    }
}
