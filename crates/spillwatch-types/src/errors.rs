use thiserror::Error;

pub type Result<T, E = SpillwatchError> = std::result::Result<T, E>;

/// Unified error type covering every failure the relay can surface.
#[derive(Debug, Error)]
pub enum SpillwatchError {
    #[error("unauthorized")]
    Unauthorized,
    #[error("invalid image data: {0}")]
    InvalidImage(String),
    #[error("stream unavailable: {0}")]
    StreamUnavailable(String),
    #[error("persistence error: {0}")]
    Persistence(String),
    #[error("duplicate detection timestamp: {0}")]
    DuplicateTimestamp(String),
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("operational error: {0}")]
    Ops(String),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl SpillwatchError {
    /// Short machine-readable code, stable across message changes.
    pub fn code(&self) -> &'static str {
        match self {
            SpillwatchError::Unauthorized => "UNAUTHORIZED",
            SpillwatchError::InvalidImage(_) => "INVALID_IMAGE",
            SpillwatchError::StreamUnavailable(_) => "STREAM_UNAVAILABLE",
            SpillwatchError::Persistence(_) => "PERSISTENCE_ERROR",
            SpillwatchError::DuplicateTimestamp(_) => "DUPLICATE_TIMESTAMP",
            SpillwatchError::Configuration(_) => "CONFIGURATION_ERROR",
            SpillwatchError::Ops(_) => "OPS_ERROR",
            SpillwatchError::Other(_) => "INTERNAL_ERROR",
        }
    }
}
