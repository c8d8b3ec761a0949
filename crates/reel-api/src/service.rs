use std::sync::Arc;

use axum::body::Bytes;
use reel_core::Bus;
use reel_model::{JobId, UploadValidated, UploaderFailure, UploaderSuccess, ValidateUpload};
use tracing::{info, instrument, warn};

use crate::{ApiConfig, ApiError, Delivery, Video};

/// Reported when the job owner never answered the validation request.
pub const UNABLE_TO_UPLOAD: &str = "Unable to upload.";

/// Reported when the upload token was refused or delivery failed.
pub const UPLOAD_FAILED: &str = "Upload failed.";

/// Validates uploads with the job owner and hands accepted videos to a [`Delivery`].
///
/// Publishes through the bus context, so a broker attached to the bus carries
/// `ValidateUpload` and the outcome events to other processes.
#[derive(Clone)]
pub struct UploadService {
    bus: Bus,
    delivery: Arc<dyn Delivery>,
    config: ApiConfig,
}

impl UploadService {
    pub fn new(bus: Bus, delivery: impl Delivery, config: ApiConfig) -> Self {
        Self {
            bus,
            delivery: Arc::new(delivery),
            config,
        }
    }

    pub fn config(&self) -> &ApiConfig {
        &self.config
    }

    #[instrument(skip(self, token, data), fields(bytes = data.len()))]
    pub async fn upload(&self, job_id: JobId, token: String, data: Bytes) -> Result<(), ApiError> {
        let ctx = self.bus.context();

        // registered before publishing so a fast answer is not missed
        let validated = self
            .bus
            .waiter::<UploadValidated, _>(move |e| e.job_id == job_id);
        ctx.publish(&ValidateUpload { job_id, token }).await?;

        let Some(validated) = validated.wait(self.config.validation_timeout()).await else {
            warn!("upload validation timed out");
            self.fail(job_id, UNABLE_TO_UPLOAD).await;
            return Err(ApiError::ValidationTimeout);
        };
        if !validated.authorized {
            warn!("upload token rejected");
            self.fail(job_id, UPLOAD_FAILED).await;
            return Err(ApiError::Unauthorized);
        }

        let video = Video {
            job_id,
            channel_id: validated.channel_id,
            user_id: validated.user_id,
            title: validated.video_title,
            data,
        };
        if let Err(e) = self.delivery.deliver(video).await {
            warn!(error = %e, "video delivery failed");
            self.fail(job_id, UPLOAD_FAILED).await;
            return Err(e);
        }

        ctx.publish(&UploaderSuccess { job_id }).await?;
        info!("upload delivered");
        Ok(())
    }

    async fn fail(&self, job_id: JobId, reason: &str) {
        let event = UploaderFailure {
            job_id,
            reason: reason.to_string(),
        };
        if let Err(e) = self.bus.context().publish(&event).await {
            warn!(error = %e, "failed to publish uploader failure");
        }
    }
}
