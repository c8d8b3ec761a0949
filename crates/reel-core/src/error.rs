use thiserror::Error;

use crate::{broker::TransportError, handler::HandlerError, pool::PoolError};

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("no handler registered for command: {0}")]
    UnregisteredCommand(String),

    #[error("command '{0}' already has a handler")]
    DuplicateHandler(&'static str),

    #[error("publish failed: {0}")]
    Publish(String),

    #[error("handler error: {0}")]
    Handler(#[from] HandlerError),

    #[error("codec error: {0}")]
    Codec(#[from] serde_json::Error),

    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("pool error: {0}")]
    Pool(#[from] PoolError),
}
