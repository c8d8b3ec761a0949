use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use reel_core::CoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("missing job_id query parameter")]
    MissingJobId,

    #[error("invalid job id: {0}")]
    InvalidJobId(String),

    #[error("missing authorization header")]
    MissingToken,

    #[error("upload token rejected")]
    Unauthorized,

    #[error("upload was not validated in time")]
    ValidationTimeout,

    #[error("delivery failed: {0}")]
    Delivery(String),

    #[error(transparent)]
    Core(#[from] CoreError),
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::MissingJobId | Self::InvalidJobId(_) => StatusCode::BAD_REQUEST,
            Self::MissingToken | Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::ValidationTimeout => StatusCode::SERVICE_UNAVAILABLE,
            Self::Delivery(_) => StatusCode::BAD_GATEWAY,
            Self::Core(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        // internal details stay in the logs
        let body = match &self {
            Self::Delivery(_) | Self::Core(_) => status
                .canonical_reason()
                .unwrap_or("error")
                .to_string(),
            other => other.to_string(),
        };
        (status, body).into_response()
    }
}
