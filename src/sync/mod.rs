// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Directory → record store synchronization.
//!
//! - [`mapping`]: static field mappings and value encoding
//! - [`upsert`]: lookup-before-write upsert, delete semantics, retry wrapper
//! - [`references`]: department links for staff rows
//! - [`cursor`]: the incremental watermark
//! - [`scheduler`]: full/incremental passes and the periodic job
//! - [`events`]: webhook events into background upserts

pub mod cursor;
pub mod events;
pub mod mapping;
pub mod references;
pub mod scheduler;
pub mod upsert;

pub use cursor::SyncCursor;
pub use events::EventDispatcher;
pub use references::ReferenceResolver;
pub use scheduler::{KindReport, PassReport, ScheduledRun, SyncScheduler};
pub use upsert::{SyncError, UpsertEngine, UpsertOutcome};
