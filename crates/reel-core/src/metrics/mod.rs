//! Metrics collection abstraction for the worker.
//!
//! Backends (prometheus, ...) implement [`MetricsBackend`] and are handed to the
//! broker, the resource pool and the gateway client as a [`MetricsHandle`].
mod backend;
pub use backend::{JobOutcome, MetricsBackend, MetricsHandle};

mod noop;
pub use noop::NoOpMetrics;

use std::sync::Arc;

/// Create a no-op metrics handle.
#[inline]
pub fn noop_metrics() -> MetricsHandle {
    Arc::new(NoOpMetrics)
}
