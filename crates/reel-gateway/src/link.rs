use std::pin::Pin;

use async_trait::async_trait;
use futures::{Sink, Stream};
use reel_model::ClientFrame;

use crate::GatewayError;

/// Outbound half of a connection.
pub type FrameSink = Pin<Box<dyn Sink<ClientFrame, Error = GatewayError> + Send>>;

/// Inbound text frames.
///
/// A close frame arrives as `Err` (see [`GatewayError::from_close`]); `None`
/// means the connection dropped without one.
pub type FrameStream = Pin<Box<dyn Stream<Item = Result<String, GatewayError>> + Send>>;

/// One established connection to the assignment endpoint.
pub struct Link {
    pub sink: FrameSink,
    pub stream: FrameStream,
}

/// Opens connections to the assignment endpoint.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    async fn connect(&self) -> Result<Link, GatewayError>;
}
