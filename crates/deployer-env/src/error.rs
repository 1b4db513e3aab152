//! Errors surfaced by an environment gateway.

use thiserror::Error;

/// Result type alias for gateway calls.
pub type EnvResult<T> = Result<T, EnvError>;

#[derive(Debug, Error)]
pub enum EnvError {
    #[error("{op} failed: {message}")]
    Rpc { op: &'static str, message: String },

    #[error("unit {0} is not in an error state")]
    AlreadyResolved(String),

    #[error("{kind} not found: {name}")]
    NotFound { kind: &'static str, name: String },

    #[error("machine {0} hosts the controller and cannot be terminated")]
    ProtectedMachine(String),

    #[error("watch stream closed")]
    WatchClosed,

    #[error("malformed status: {0}")]
    MalformedStatus(String),
}

impl EnvError {
    pub fn rpc(op: &'static str, message: impl Into<String>) -> Self {
        Self::Rpc {
            op,
            message: message.into(),
        }
    }

    pub fn not_found(kind: &'static str, name: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            name: name.into(),
        }
    }
}
