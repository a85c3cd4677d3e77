// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Retry with backoff, and the failure barrier for background tasks.

pub mod retry;
pub mod supervise;
