mod error;
pub use error::GatewayError;

mod config;
pub use config::GatewayConfig;

mod link;
pub use link::{Connector, FrameSink, FrameStream, Link};

mod pending;

mod client;
pub use client::{FALLBACK_REASON, GatewayClient, SlotLimit};

#[cfg(feature = "websocket")]
mod ws;
#[cfg(feature = "websocket")]
pub use ws::WsConnector;
