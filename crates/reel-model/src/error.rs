use thiserror::Error;

#[derive(Debug, Error)]
pub enum ModelError {
    #[error("invalid job id: {0}")]
    InvalidJobId(String),

    #[error("malformed frame: {0}")]
    MalformedFrame(String),

    #[error("unknown frame tag: {0}")]
    UnknownFrame(String),

    #[error("invalid model: {0}")]
    Invalid(String),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type ModelResult<T> = Result<T, ModelError>;
