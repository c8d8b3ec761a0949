use async_trait::async_trait;
use futures::{SinkExt, StreamExt, future};
use reel_model::ClientFrame;
use tokio_tungstenite::{
    connect_async,
    tungstenite::{
        Error as WsError, Message,
        client::IntoClientRequest,
        http::{HeaderValue, header::AUTHORIZATION},
    },
};
use tracing::debug;

use crate::{GatewayConfig, GatewayError, Connector, Link};

/// WebSocket connection to the assignment endpoint.
///
/// The API token goes in the `Authorization` header of the handshake.
#[derive(Debug, Clone)]
pub struct WsConnector {
    endpoint: String,
    api_token: String,
}

impl WsConnector {
    pub fn new(endpoint: impl Into<String>, api_token: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            api_token: api_token.into(),
        }
    }

    pub fn from_config(config: &GatewayConfig) -> Self {
        Self::new(config.endpoint.clone(), config.api_token.clone())
    }
}

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self) -> Result<Link, GatewayError> {
        let mut request = self
            .endpoint
            .as_str()
            .into_client_request()
            .map_err(|e| GatewayError::Connect(e.to_string()))?;
        let token = HeaderValue::from_str(&self.api_token)
            .map_err(|e| GatewayError::Connect(format!("invalid api token header: {e}")))?;
        request.headers_mut().insert(AUTHORIZATION, token);

        let (socket, response) = connect_async(request).await.map_err(|e| match e {
            // rejected handshakes are retried like any other connect failure
            WsError::Http(resp) => GatewayError::Connect(format!("handshake returned {}", resp.status())),
            other => GatewayError::Connect(other.to_string()),
        })?;
        debug!(status = %response.status(), "websocket handshake complete");

        let (sink, stream) = socket.split();
        let sink = sink
            .sink_map_err(|e| GatewayError::Closed {
                code: None,
                reason: e.to_string(),
            })
            .with(|frame: ClientFrame| future::ready(Ok::<_, GatewayError>(Message::Text(frame.encode()))));

        let stream = stream.filter_map(|msg| {
            future::ready(match msg {
                Ok(Message::Text(text)) => Some(Ok(text)),
                Ok(Message::Close(frame)) => Some(Err(match frame {
                    Some(f) => GatewayError::from_close(Some(u16::from(f.code)), f.reason.to_string()),
                    None => GatewayError::from_close(None, "closed without status"),
                })),
                Ok(_) => None,
                Err(e) => Some(Err(GatewayError::Closed {
                    code: None,
                    reason: e.to_string(),
                })),
            })
        });

        Ok(Link {
            sink: Box::pin(sink),
            stream: Box::pin(stream),
        })
    }
}
