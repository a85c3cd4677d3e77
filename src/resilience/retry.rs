// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Retry logic with quadratic backoff.
//!
//! Background writes to the record store go through [`retry`], which repeats
//! an operation up to `max_attempts` times and stops early when the error says
//! a repeat cannot help.
//!
//! # Example
//!
//! ```
//! use directory_sync::RetryPolicy;
//! use std::time::Duration;
//!
//! let policy = RetryPolicy::default();
//! assert_eq!(policy.max_attempts, 3);
//! assert_eq!(policy.delay_before(1), Duration::ZERO);
//! assert_eq!(policy.delay_before(2), Duration::from_secs(1));
//! assert_eq!(policy.delay_before(3), Duration::from_secs(4));
//! ```

use serde::Deserialize;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{info, warn};

/// Errors that know whether a repeat of the same call could succeed.
pub trait Retryable {
    fn is_retryable(&self) -> bool;
}

impl Retryable for crate::record_store::RecordStoreError {
    fn is_retryable(&self) -> bool {
        crate::record_store::RecordStoreError::is_retryable(self)
    }
}

/// Attempt budget and backoff base.
#[derive(Debug, Clone, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts, including the first
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
}

fn default_max_attempts() -> u32 { 3 }
fn default_base_delay_ms() -> u64 { 1000 }

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
        }
    }
}

impl RetryPolicy {
    #[must_use]
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay_ms: base_delay.as_millis() as u64,
        }
    }

    #[must_use]
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    /// Delay before 1-based attempt `attempt`: `(attempt - 1)^2 * base_delay`.
    #[must_use]
    pub fn delay_before(&self, attempt: u32) -> Duration {
        let n = attempt.saturating_sub(1);
        self.base_delay().saturating_mul(n.saturating_mul(n))
    }

    /// Fast retry for tests (minimal delays)
    #[cfg(test)]
    pub fn test() -> Self {
        Self::new(3, Duration::from_millis(1))
    }
}

/// Run `operation` until it succeeds, fails with a non-retryable error, or
/// the attempt budget runs out. Returns the last error in the failure cases.
pub async fn retry<F, Fut, T, E>(
    operation_name: &str,
    policy: &RetryPolicy,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display + Retryable,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;

    loop {
        match operation().await {
            Ok(val) => {
                if attempt > 1 {
                    info!(operation = operation_name, attempt, "Operation succeeded after retry");
                }
                return Ok(val);
            }
            Err(err) => {
                if !err.is_retryable() {
                    warn!(operation = operation_name, attempt, error = %err, "Operation failed permanently, not retrying");
                    return Err(err);
                }
                if attempt >= max_attempts {
                    return Err(err);
                }

                attempt += 1;
                let delay = policy.delay_before(attempt);
                warn!(
                    operation = operation_name,
                    attempt = attempt - 1,
                    max_attempts,
                    error = %err,
                    ?delay,
                    "Operation failed, retrying"
                );
                sleep(delay).await;
            }
        }
    }
}
