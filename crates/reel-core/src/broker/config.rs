use reel_model::BackoffStrategy;
use serde::{Deserialize, Serialize};

/// Broker runtime settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct BrokerConfig {
    /// Process identifier; prefixes the per-process event queues.
    pub identifier: String,
    /// Unacknowledged deliveries allowed per consume loop.
    pub prefetch: usize,
    /// Delay between resubscribe attempts after a lost subscription.
    pub reconnect: BackoffStrategy,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            identifier: "worker".to_string(),
            prefetch: 1,
            reconnect: BackoffStrategy::default(),
        }
    }
}

impl BrokerConfig {
    pub fn new(identifier: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            ..Self::default()
        }
    }

    pub fn with_prefetch(mut self, prefetch: usize) -> Self {
        self.prefetch = prefetch;
        self
    }

    pub fn with_reconnect(mut self, reconnect: BackoffStrategy) -> Self {
        self.reconnect = reconnect;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_config_falls_back_to_defaults() {
        let cfg: BrokerConfig = serde_json::from_str(r#"{"identifier":"api"}"#).unwrap();
        assert_eq!(cfg.identifier, "api");
        assert_eq!(cfg.prefetch, 1);
        assert_eq!(cfg.reconnect, BackoffStrategy::default());
    }
}
