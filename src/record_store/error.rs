// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

use thiserror::Error;

/// Provider codes that cannot succeed on retry: missing parameter,
/// invalid parameter (payload validation), no permission, row not found.
const PERMANENT_PROVIDER_CODES: [i64; 4] = [10001, 10002, 10005, 10007];

/// Failure of a single record store call.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RecordStoreError {
    /// Credentials or endpoint missing. Never retried.
    #[error("record store misconfigured: {0}")]
    Configuration(String),

    /// Timeout, refused connection, broken stream.
    #[error("transport error (timeout={timeout}): {message}")]
    Transport { timeout: bool, message: String },

    /// The platform answered with an error code inside its envelope.
    #[error("provider error {code}: {message}")]
    Provider { code: i64, message: String },

    /// The server answered with a non-success HTTP status.
    #[error("HTTP {status}: {message}")]
    Status { status: u16, message: String },

    /// The response body did not have the expected shape.
    #[error("failed to decode response: {0}")]
    Decode(String),
}

impl RecordStoreError {
    pub fn provider(code: i64, message: impl Into<String>) -> Self {
        Self::Provider { code, message: message.into() }
    }

    pub fn status(status: u16, message: impl Into<String>) -> Self {
        Self::Status { status, message: message.into() }
    }

    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport { timeout: false, message: message.into() }
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::Transport { timeout: true, message: message.into() }
    }

    /// Whether repeating the identical call could succeed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Configuration(_) | Self::Decode(_) => false,
            Self::Transport { .. } => true,
            Self::Provider { code, .. } => !PERMANENT_PROVIDER_CODES.contains(code),
            Self::Status { status, .. } => !matches!(*status, 400..=499) || *status == 408 || *status == 429,
        }
    }

    /// Short label for metrics.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Configuration(_) => "configuration",
            Self::Transport { timeout: true, .. } => "timeout",
            Self::Transport { .. } => "transport",
            Self::Provider { .. } => "provider",
            Self::Status { .. } => "status",
            Self::Decode(_) => "decode",
        }
    }
}

impl From<reqwest::Error> for RecordStoreError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::timeout(err.to_string())
        } else if err.is_decode() {
            Self::Decode(err.to_string())
        } else {
            Self::transport(err.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_is_retryable() {
        assert!(RecordStoreError::timeout("read timed out").is_retryable());
        assert!(RecordStoreError::transport("connection refused").is_retryable());
    }

    #[test]
    fn test_permanent_provider_codes() {
        assert!(!RecordStoreError::provider(10002, "invalid value").is_retryable());
        assert!(!RecordStoreError::provider(10007, "row gone").is_retryable());
        assert!(RecordStoreError::provider(99999, "internal").is_retryable());
        assert!(RecordStoreError::provider(0, "failed").is_retryable());
    }

    #[test]
    fn test_http_status_codes() {
        assert!(!RecordStoreError::status(400, "bad request").is_retryable());
        assert!(!RecordStoreError::status(401, "unauthorized").is_retryable());
        assert!(RecordStoreError::status(429, "slow down").is_retryable());
        assert!(RecordStoreError::status(408, "timeout").is_retryable());
        assert!(RecordStoreError::status(503, "unavailable").is_retryable());
        assert_eq!(RecordStoreError::status(503, "unavailable").kind(), "status");
    }

    #[test]
    fn test_provider_code_in_http_range_is_not_a_status() {
        assert!(RecordStoreError::provider(404, "platform code").is_retryable());
        assert!(RecordStoreError::provider(450, "platform code").is_retryable());
        assert_ne!(RecordStoreError::provider(403, "x"), RecordStoreError::status(403, "x"));
    }

    #[test]
    fn test_configuration_and_decode_not_retryable() {
        assert!(!RecordStoreError::Configuration("no app key".into()).is_retryable());
        assert!(!RecordStoreError::Decode("eof".into()).is_retryable());
    }

    #[test]
    fn test_display() {
        let err = RecordStoreError::timeout("30s elapsed");
        assert_eq!(err.to_string(), "transport error (timeout=true): 30s elapsed");
        let err = RecordStoreError::provider(10002, "bad");
        assert_eq!(err.to_string(), "provider error 10002: bad");
        assert_eq!(err.kind(), "provider");
    }
}
