use reel_model::BackoffStrategy;
use serde::{Deserialize, Serialize};

/// Gateway client settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct GatewayConfig {
    /// Job-assignment endpoint, e.g. `wss://gateway.example/recorder`.
    pub endpoint: String,
    /// Sent as the `Authorization` header on connect.
    pub api_token: String,
    /// Delay between connection attempts.
    pub reconnect: BackoffStrategy,
    /// Finished-job results kept while disconnected before slots block.
    pub result_buffer: usize,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            endpoint: "ws://127.0.0.1:8080/recorder".to_string(),
            api_token: String::new(),
            reconnect: BackoffStrategy::fixed(1_000),
            result_buffer: 64,
        }
    }
}
