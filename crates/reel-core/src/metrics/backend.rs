use std::sync::Arc;

/// Job outcome for metrics classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobOutcome {
    Success,
    Failure,
}

impl JobOutcome {
    /// Return label value for metrics.
    #[inline]
    pub fn as_label(&self) -> &'static str {
        match self {
            JobOutcome::Success => "success",
            JobOutcome::Failure => "failure",
        }
    }
}

/// Backend metrics collection interface.
pub trait MetricsBackend: Send + Sync + 'static {
    /// Record a job accepted for execution.
    ///
    /// # Arguments
    /// - `source`: where the job came from (`gateway`, `broker`)
    fn record_job_started(&self, source: &str);
    /// Record job completion with outcome and duration.
    ///
    /// # Arguments
    /// - `source`: where the job came from
    /// - `outcome`: how the job ended
    /// - `duration_ms`: execution time in milliseconds
    fn record_job_completed(&self, source: &str, outcome: JobOutcome, duration_ms: u64);
    /// Record a pooled resource retired after a failure.
    fn record_resource_failure(&self);
    /// Record a gateway reconnection attempt.
    fn record_gateway_reconnect(&self);
    /// Record a consumed message returned to the broker for redelivery.
    fn record_redelivery(&self, message: &str);
}

/// Shared handle to metrics backend.
pub type MetricsHandle = Arc<dyn MetricsBackend>;
