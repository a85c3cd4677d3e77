// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Key-value state shared across instances: the per-tenant sync cursor and
//! the scheduler lock.

pub mod memory;
pub mod redis;
pub mod traits;

pub use memory::InMemoryStore;
pub use redis::RedisStore;
pub use traits::{cursor_key, lock_key, CursorStore, LockStore, LockToken, StorageError};
