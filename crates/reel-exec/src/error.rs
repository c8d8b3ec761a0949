use reel_core::{HandlerError, PoolError};
use thiserror::Error;

/// Reported when the upload service answers with anything but success.
pub const UPLOAD_FAILED: &str = "Uploader service failed.";

/// Reported when the upload service times out or refuses the connection.
pub const UPLOAD_NO_RESPONSE: &str = "Upload service did not respond to the upload request.";

#[derive(Debug, Error)]
pub enum ExecError {
    /// Rejected before any work started; the message is shown to the job owner.
    #[error("invalid job: {0}")]
    InvalidJob(String),

    #[error("failed downloading demo archive: {0}")]
    Download(String),

    #[error("failed extracting demo archive: {0}")]
    Extract(String),

    #[error("recorder failed: {0}")]
    Engine(String),

    /// Upload failure; the message is shown to the job owner.
    #[error("{0}")]
    Upload(&'static str),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Pool(#[from] PoolError),
}

impl From<ExecError> for HandlerError {
    fn from(e: ExecError) -> Self {
        match e {
            ExecError::Upload(reason) => HandlerError::rejected(reason),
            ExecError::InvalidJob(reason) => HandlerError::Rejected(reason),
            other => HandlerError::failed(other),
        }
    }
}
