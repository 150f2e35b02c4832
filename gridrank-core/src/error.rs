use crate::model::ScanStatus;
use gridrank_scanner::ScanError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Scan {0} is already running")]
    AlreadyRunning(String),

    #[error("Invalid transition for scan {scan_id}: {from:?} -> {to:?}")]
    InvalidTransition {
        scan_id: String,
        from: ScanStatus,
        to: ScanStatus,
    },

    #[error("Transport failure: {0}")]
    Transport(#[from] ScanError),

    #[error("Persistence failure: {0}")]
    Persistence(#[from] rusqlite::Error),

    #[error("Serialization failure: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl CoreError {
    pub fn scan_not_found(id: impl Into<String>) -> Self {
        CoreError::NotFound {
            entity: "scan",
            id: id.into(),
        }
    }

    /// Stable machine-readable name for envelopes and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            CoreError::NotFound { .. } => "NOT_FOUND",
            CoreError::Validation(_) => "VALIDATION_FAILURE",
            CoreError::AlreadyRunning(_) | CoreError::InvalidTransition { .. } => "CONFLICT",
            CoreError::Transport(_) => "TRANSPORT_FAILURE",
            CoreError::Persistence(_) | CoreError::Io(_) => "PERSISTENCE_FAILURE",
            CoreError::Serialization(_) | CoreError::Internal(_) => "INTERNAL_CRASH",
        }
    }

    /// HTTP-style status code a request layer should answer with.
    pub fn status_code(&self) -> u16 {
        match self {
            CoreError::NotFound { .. } => 404,
            CoreError::Validation(_) => 400,
            CoreError::AlreadyRunning(_) | CoreError::InvalidTransition { .. } => 409,
            CoreError::Transport(_) => 502,
            _ => 500,
        }
    }
}

pub type Result<T> = std::result::Result<T, CoreError>;
