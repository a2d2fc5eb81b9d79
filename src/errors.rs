// src/errors.rs

//! Crate-wide error type and result alias.

use std::time::Duration;

use thiserror::Error;

use crate::session::SessionId;

#[derive(Error, Debug)]
pub enum OrchestratorError {
    #[error("Unknown category: {0}")]
    UnknownCategory(String),

    #[error("Command index {index} out of range for category '{category}' ({len} commands)")]
    IndexOutOfRange {
        category: String,
        index: usize,
        len: usize,
    },

    #[error("Capacity exceeded: {max} sessions already running")]
    CapacityExceeded { max: usize },

    #[error("Session not found: {0}")]
    NotFound(SessionId),

    #[error("Rate limited; retry after {}ms", retry_after.as_millis())]
    RateLimited { retry_after: Duration },

    #[error("Invalid command line: {0}")]
    InvalidCommand(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl OrchestratorError {
    /// Transient conditions a caller may retry later. Nothing is queued on
    /// the caller's behalf.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            OrchestratorError::CapacityExceeded { .. } | OrchestratorError::RateLimited { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, OrchestratorError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_load_conditions_are_retryable() {
        assert!(OrchestratorError::CapacityExceeded { max: 10 }.is_retryable());
        assert!(OrchestratorError::RateLimited {
            retry_after: Duration::from_secs(1)
        }
        .is_retryable());
        assert!(!OrchestratorError::UnknownCategory("nope".to_string()).is_retryable());
        assert!(!OrchestratorError::NotFound(SessionId::new()).is_retryable());
    }
}
