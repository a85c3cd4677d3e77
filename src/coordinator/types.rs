// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Public types for the directory sync coordinator.

use thiserror::Error;

use crate::config::ConfigError;
use crate::directory::DirectoryError;
use crate::record_store::RecordStoreError;
use crate::storage::StorageError;

/// Coordinator lifecycle state.
///
/// Use [`super::DirectorySync::state()`] to check the current state or
/// [`super::DirectorySync::state_receiver()`] to watch for changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    /// Built, scheduler not started
    Created,
    /// Scheduler loop running
    Running,
    /// Waiting for the scheduler loop to finish its current tick
    ShuttingDown,
    /// Scheduler loop gone; events and binding calls still work
    Stopped,
}

impl std::fmt::Display for EngineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Created => write!(f, "Created"),
            Self::Running => write!(f, "Running"),
            Self::ShuttingDown => write!(f, "ShuttingDown"),
            Self::Stopped => write!(f, "Stopped"),
        }
    }
}

/// Failure to assemble the coordinator from configuration.
#[derive(Error, Debug)]
pub enum StartupError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    RecordStore(#[from] RecordStoreError),
    #[error(transparent)]
    Directory(#[from] DirectoryError),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_state_display() {
        assert_eq!(format!("{}", EngineState::Created), "Created");
        assert_eq!(format!("{}", EngineState::Running), "Running");
        assert_eq!(format!("{}", EngineState::Stopped), "Stopped");
    }

    #[test]
    fn test_startup_error_is_transparent() {
        let err = StartupError::from(ConfigError::Missing("tenant_id"));
        assert_eq!(err.to_string(), "missing required setting: tenant_id");
    }
}
