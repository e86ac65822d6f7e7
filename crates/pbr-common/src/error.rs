//! Error types for path selection

use crate::PathId;
use thiserror::Error;

/// Path selection error type
#[derive(Error, Debug)]
pub enum PathError {
    /// Periodic evaluation already scheduled
    #[error("policy controller already started")]
    AlreadyStarted,

    /// Path is not tracked by the metrics monitor
    #[error("unknown path: {0}")]
    UnknownPath(PathId),

    /// Invalid policy rule
    #[error("invalid policy: {0}")]
    InvalidPolicy(String),

    /// Configuration error
    #[error("config error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Config (de)serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type for path selection
pub type PathResult<T> = Result<T, PathError>;
