use reel_model::ModelError;
use thiserror::Error;

/// WebSocket close code the endpoint uses for a rejected API token.
pub const POLICY_VIOLATION: u16 = 1008;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum GatewayError {
    #[error("connect failed: {0}")]
    Connect(String),

    #[error("connection closed (code {code:?}): {reason}")]
    Closed { code: Option<u16>, reason: String },

    #[error("endpoint rejected credentials: {0}")]
    Unauthorized(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("frame codec error: {0}")]
    Codec(String),
}

impl GatewayError {
    /// Map a close frame; the policy-violation code means bad credentials.
    pub fn from_close(code: Option<u16>, reason: impl Into<String>) -> Self {
        let reason = reason.into();
        match code {
            Some(POLICY_VIOLATION) => GatewayError::Unauthorized(reason),
            code => GatewayError::Closed { code, reason },
        }
    }

    /// `true` if reconnecting cannot help.
    pub fn is_terminal(&self) -> bool {
        matches!(self, GatewayError::Unauthorized(_))
    }
}

impl From<ModelError> for GatewayError {
    fn from(e: ModelError) -> Self {
        GatewayError::Codec(e.to_string())
    }
}
