//! Prometheus implementation of [`reel_core::MetricsBackend`].
//!
//! ## Metrics
//! - `reel_jobs_started_total{source}`
//! - `reel_jobs_completed_total{source, outcome}`
//! - `reel_job_duration_seconds{source}` (histogram)
//! - `reel_resource_failures_total`
//! - `reel_gateway_reconnects_total`
//! - `reel_redeliveries_total{message}`
//!
//! No HTTP endpoint is provided; serve [`PrometheusMetrics::encode_text`]
//! from the application's own server.
mod backend;
pub use backend::PrometheusMetrics;

pub use prometheus::{Encoder, Registry, TextEncoder};
