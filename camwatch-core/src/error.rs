use thiserror::Error;

#[derive(Error, Debug)]
pub enum CameraError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("not running")]
    NotRunning,

    #[error("already running")]
    AlreadyRunning,

    #[error("operation cancelled: {0}")]
    Cancelled(String),

    #[error("shutting down")]
    ShuttingDown,

    #[error("resource unavailable: {0}")]
    ResourceUnavailable(String),

    #[error("command failed: {0}")]
    CommandFailed(String),

    #[error("timed out: {0}")]
    TimedOut(String),

    #[error("parse error: {0}")]
    Parse(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("panicked: {0}")]
    Panicked(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

impl CameraError {
    /// True for failures that should be retried on a later cycle rather than
    /// treated as terminal for the device.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            CameraError::TimedOut(_)
                | CameraError::Cancelled(_)
                | CameraError::CommandFailed(_)
                | CameraError::Io(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, CameraError>;
