use std::path::Path;

use async_trait::async_trait;
use reel_model::JobId;

use crate::ExecError;

/// Delivers a finished video to the upload service.
///
/// Failures the job owner should see are reported as [`ExecError::Upload`].
#[async_trait]
pub trait Uploader: Send + Sync + 'static {
    async fn upload(&self, url: &str, job_id: JobId, file: &Path) -> Result<(), ExecError>;
}
