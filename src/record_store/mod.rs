// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Record Store Client
//!
//! Typed access to the external low-code platform. Two protocol generations
//! sit behind the one [`RecordStore`] trait:
//!
//! ```text
//! ┌──────────────┐     ┌──────────────┐     ┌──────────────────────────────┐
//! │  Filter AST  │────►│ V2Translator │────►│ POST /v2/open/worksheet/*    │
//! │              │     └──────────────┘     │ appKey + sign in body        │
//! │              │     ┌──────────────┐     ├──────────────────────────────┤
//! │              │────►│ V3Translator │────►│ /v3/app/worksheets/{id}/rows │
//! └──────────────┘     └──────────────┘     │ HAP-Appkey / HAP-Sign header │
//!                                           └──────────────────────────────┘
//! ```
//!
//! The generation is picked once by [`connect`].

mod error;
mod filter;
mod http;
mod memory;
mod traits;
mod types;
mod v2;
mod v2_translator;
mod v3;
mod v3_translator;

use std::sync::Arc;

pub use error::RecordStoreError;
pub use filter::{FieldFilter, FieldOperator, Filter, FilterBuilder, FilterNode, FilterValue};
pub use memory::{InMemoryRecordStore, RecordedCall, StoreOperation};
pub use traits::RecordStore;
pub use types::{FieldValues, Page, PlatformRow, RowId, RowPage, SchemaField, SchemaOption, Worksheet};
pub use v2::V2RecordStore;
pub use v2_translator::V2Translator;
pub use v3::V3RecordStore;
pub use v3_translator::V3Translator;

use crate::config::{ProtocolVersion, RecordStoreConfig};

/// Build the client for the configured protocol generation.
pub fn connect(config: &RecordStoreConfig) -> Result<Arc<dyn RecordStore>, RecordStoreError> {
    let store: Arc<dyn RecordStore> = match config.protocol {
        ProtocolVersion::V2 => Arc::new(V2RecordStore::new(config)?),
        ProtocolVersion::V3 => Arc::new(V3RecordStore::new(config)?),
    };
    tracing::info!(protocol = store.protocol(), api_base = %config.api_base, "Record store client ready");
    Ok(store)
}
