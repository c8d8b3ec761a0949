use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Delay schedule between retries (reconnects, recovery attempts).
///
/// The n-th retry (zero based) waits `first_ms * factor^n`, capped at `max_ms`.
/// `factor = 1.0` gives a fixed backoff.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackoffStrategy {
    pub first_ms: u64,
    pub max_ms: u64,
    pub factor: f64,
}

impl BackoffStrategy {
    /// Constant delay between attempts.
    pub const fn fixed(delay_ms: u64) -> Self {
        Self {
            first_ms: delay_ms,
            max_ms: delay_ms,
            factor: 1.0,
        }
    }

    /// Delay before retry number `attempt` (zero based).
    pub fn delay(&self, attempt: u32) -> Duration {
        let exp = self.factor.max(1.0).powi(attempt.min(64) as i32);
        let ms = (self.first_ms as f64 * exp).min(self.max_ms.max(self.first_ms) as f64);
        Duration::from_millis(ms as u64)
    }
}

impl Default for BackoffStrategy {
    fn default() -> Self {
        Self::fixed(1_000)
    }
}
