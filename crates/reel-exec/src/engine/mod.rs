//! Recording engines.
//!
//! An [`Engine`] renders one job on a pooled resource and returns the path
//! of the produced video.
#[cfg(feature = "subprocess")]
pub mod subprocess;

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use reel_model::RequestRecording;

use crate::ExecError;

#[async_trait]
pub trait Engine: Send + Sync + 'static {
    /// Pooled resource a recording runs on.
    type Resource: Send + 'static;

    /// Render `job` from the extracted `demo`.
    ///
    /// An error means the resource can no longer be trusted; the caller retires it.
    async fn record(
        &self,
        resource: &mut Self::Resource,
        demo: &Path,
        job: &RequestRecording,
    ) -> Result<PathBuf, ExecError>;
}
