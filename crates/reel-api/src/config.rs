use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ApiConfig {
    /// How long to wait for the job owner to validate an upload.
    pub validation_timeout_secs: u64,
    /// Largest accepted video.
    pub body_limit: usize,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            validation_timeout_secs: 32,
            body_limit: 30 * 1024 * 1024,
        }
    }
}

impl ApiConfig {
    pub fn validation_timeout(&self) -> Duration {
        Duration::from_secs(self.validation_timeout_secs)
    }
}
