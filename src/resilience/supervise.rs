// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Failure barrier for fire-and-forget tasks.
//!
//! Webhook handlers and manual actions hand their background work to
//! [`spawn_supervised`]. Errors and panics inside the body end here: they
//! are logged and counted, and the caller never sees them.

use std::fmt::Display;
use std::future::Future;
use tokio::task::JoinHandle;
use tracing::{debug, error};

use crate::metrics;

/// Spawn `body` on the runtime behind a failure barrier.
///
/// The returned handle resolves once the body has finished (or failed); it
/// never carries the body's error. Dropping it detaches the task.
pub fn spawn_supervised<F, E>(task: &'static str, body: F) -> JoinHandle<()>
where
    F: Future<Output = Result<(), E>> + Send + 'static,
    E: Display + Send + 'static,
{
    let inner = tokio::spawn(body);
    tokio::spawn(async move {
        match inner.await {
            Ok(Ok(())) => debug!(task, "Background task finished"),
            Ok(Err(e)) => {
                metrics::record_task_failure(task, "error");
                error!(task, error = %e, "Background task failed");
            }
            Err(join) if join.is_panic() => {
                metrics::record_task_failure(task, "panic");
                error!(task, "Background task panicked");
            }
            Err(join) => {
                metrics::record_task_failure(task, "cancelled");
                error!(task, error = %join, "Background task cancelled");
            }
        }
    })
}
