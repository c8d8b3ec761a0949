//! `RequestRecording` handler: download, extract, record, upload.
use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use async_trait::async_trait;
use reel_core::{Context, Handler, HandlerError, ResourcePool};
use reel_model::{
    JobFailed, JobRecording, JobSuccess, JobUploading, Message, ModelError, RequestRecording,
};
use tracing::{debug, info, instrument, warn};

use crate::{
    DemoCache, Engine, ExecError, Fetch, PipelineConfig, UPLOAD_NO_RESPONSE, Uploader,
    extract_demo,
};

/// Reason reported for failures that are not meant for the job owner.
pub const RECORDER_FAILED: &str = "Recorder failed.";

pub struct RecordingHandler<E: Engine> {
    pool: ResourcePool<E::Resource>,
    engine: Arc<E>,
    cache: DemoCache,
    fetcher: Arc<dyn Fetch>,
    uploader: Arc<dyn Uploader>,
    config: PipelineConfig,
}

impl<E: Engine> RecordingHandler<E> {
    pub fn new(
        pool: ResourcePool<E::Resource>,
        engine: E,
        fetcher: impl Fetch,
        uploader: impl Uploader,
        config: PipelineConfig,
    ) -> Self {
        Self {
            pool,
            engine: Arc::new(engine),
            cache: DemoCache::new(config.demo_dir.clone(), config.keep_demo_count),
            fetcher: Arc::new(fetcher),
            uploader: Arc::new(uploader),
            config,
        }
    }

    pub fn pool(&self) -> &ResourcePool<E::Resource> {
        &self.pool
    }

    async fn run(
        &self,
        job: &RequestRecording,
        ctx: &Context,
        scratch: &mut Vec<PathBuf>,
    ) -> Result<(), ExecError> {
        job.validate().map_err(|e| match e {
            ModelError::Invalid(reason) => ExecError::InvalidJob(reason),
            other => ExecError::InvalidJob(other.to_string()),
        })?;

        let temp_dir = self.config.temp_dir.as_path();
        scratch.push(self.cache.temp_archive_path(job, temp_dir)?);
        let archive = self
            .cache
            .obtain(job, self.fetcher.as_ref(), temp_dir, self.config.download_timeout())
            .await?;

        let demo = temp_dir.join(format!("{}.dem", job.job_id));
        scratch.push(demo.clone());
        if let Err(e) = extract_demo(&archive, &demo).await {
            warn!(archive = %archive.display(), "dropping unreadable demo archive");
            remove_quietly(&archive).await;
            return Err(e);
        }

        let video = {
            let mut resource = self.pool.checkout().await?;
            debug!(resource = %resource.id(), "recording");
            announce(ctx, &JobRecording { job_id: job.job_id, infront: 0 }).await;

            match self.engine.record(&mut resource, &demo, job).await {
                Ok(video) => video,
                Err(e) => {
                    resource.retire(e.to_string());
                    return Err(e);
                }
            }
        };
        scratch.push(video.clone());

        announce(ctx, &JobUploading { job_id: job.job_id }).await;
        let url = self.config.upload_url(&job.upload_url);
        tokio::time::timeout(
            self.config.upload_timeout(),
            self.uploader.upload(url, job.job_id, &video),
        )
        .await
        .map_err(|_| ExecError::Upload(UPLOAD_NO_RESPONSE))??;
        Ok(())
    }
}

#[async_trait]
impl<E: Engine> Handler<RequestRecording> for RecordingHandler<E> {
    #[instrument(skip_all, fields(job_id = %job.job_id))]
    async fn handle(&self, job: RequestRecording, ctx: &Context) -> Result<(), HandlerError> {
        let mut scratch = Vec::new();
        let result = self.run(&job, ctx, &mut scratch).await;

        for path in &scratch {
            remove_quietly(path).await;
        }
        match self.cache.evict().await {
            Ok(0) => {}
            Ok(n) => debug!(evicted = n, "demo cache trimmed"),
            Err(e) => warn!(error = %e, "demo cache eviction failed"),
        }

        match result {
            Ok(()) => {
                info!("recording delivered");
                announce(ctx, &JobSuccess { job_id: job.job_id }).await;
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "recording failed");
                let err = HandlerError::from(e);
                let reason = err.public_reason(RECORDER_FAILED).to_string();
                announce(ctx, &JobFailed { job_id: job.job_id, reason }).await;
                Err(err)
            }
        }
    }

    fn name(&self) -> &'static str {
        "recording"
    }
}

/// Publish a lifecycle event, logging failures.
async fn announce<M: Message>(ctx: &Context, event: &M) {
    if let Err(e) = ctx.publish(event).await {
        warn!(event = M::NAME, error = %e, "failed to publish job event");
    }
}

async fn remove_quietly(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(file = %path.display(), error = %e, "failed to remove file"),
    }
}
