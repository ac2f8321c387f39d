use thiserror::Error;

use crate::types::ConnectionState;

#[derive(Debug, Clone, Error)]
pub enum PulseError {
    #[error("connection error: {0}")]
    Connection(String),

    #[error("'{command}' was not acknowledged within {timeout_ms}ms")]
    Timeout { command: String, timeout_ms: u64 },

    #[error("check '{check}' failed: {reason}")]
    CheckFailure { check: String, reason: String },

    #[error("repair of '{issue}' failed: {reason}")]
    RepairFailure { issue: String, reason: String },

    #[error("no repair strategy for '{0}'")]
    UnknownIssue(String),

    #[error("remote rejected '{command}': {reason}")]
    CommandRejected { command: String, reason: String },

    #[error("invalid connection transition {from:?} -> {to:?}")]
    InvalidTransition {
        from: ConnectionState,
        to: ConnectionState,
    },

    #[error("risk scorer error: {0}")]
    Scorer(String),

    #[error("codec error: {0}")]
    Codec(String),
}

impl From<serde_json::Error> for PulseError {
    fn from(err: serde_json::Error) -> Self {
        PulseError::Codec(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, PulseError>;
