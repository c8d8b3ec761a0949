use std::path::PathBuf;

use async_trait::async_trait;
use axum::body::Bytes;
use reel_model::JobId;
use serde::Serialize;
use tracing::debug;

use crate::ApiError;

/// A validated video and where it should go.
#[derive(Debug, Clone)]
pub struct Video {
    pub job_id: JobId,
    pub channel_id: u64,
    pub user_id: u64,
    pub title: String,
    pub data: Bytes,
}

/// Hands validated videos to their destination.
#[async_trait]
pub trait Delivery: Send + Sync + 'static {
    async fn deliver(&self, video: Video) -> Result<(), ApiError>;
}

/// Writes `{job_id}.mp4` plus a `{job_id}.json` description into a directory.
#[derive(Debug, Clone)]
pub struct DirectoryDelivery {
    dir: PathBuf,
}

#[derive(Serialize)]
struct Description<'a> {
    job_id: JobId,
    channel_id: u64,
    user_id: u64,
    title: &'a str,
}

impl DirectoryDelivery {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

#[async_trait]
impl Delivery for DirectoryDelivery {
    async fn deliver(&self, video: Video) -> Result<(), ApiError> {
        let fail = |e: std::io::Error| ApiError::Delivery(e.to_string());
        tokio::fs::create_dir_all(&self.dir).await.map_err(fail)?;

        // titles are shown between backticks downstream
        let title = video.title.replace('`', "");
        let description = serde_json::to_vec_pretty(&Description {
            job_id: video.job_id,
            channel_id: video.channel_id,
            user_id: video.user_id,
            title: &title,
        })
        .map_err(|e| ApiError::Delivery(e.to_string()))?;

        let stem = video.job_id.to_string();
        tokio::fs::write(self.dir.join(format!("{stem}.mp4")), &video.data)
            .await
            .map_err(fail)?;
        tokio::fs::write(self.dir.join(format!("{stem}.json")), description)
            .await
            .map_err(fail)?;

        debug!(job_id = %video.job_id, bytes = video.data.len(), "video delivered");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn writes_video_and_description() {
        let dir = tempfile::tempdir().unwrap();
        let job_id = JobId::new();

        DirectoryDelivery::new(dir.path())
            .deliver(Video {
                job_id,
                channel_id: 10,
                user_id: 20,
                title: "`ace` on inferno".into(),
                data: Bytes::from_static(b"video"),
            })
            .await
            .unwrap();

        assert_eq!(std::fs::read(dir.path().join(format!("{job_id}.mp4"))).unwrap(), b"video");
        let meta: serde_json::Value = serde_json::from_slice(
            &std::fs::read(dir.path().join(format!("{job_id}.json"))).unwrap(),
        )
        .unwrap();
        assert_eq!(meta["title"], "ace on inferno");
        assert_eq!(meta["user_id"], 20);
    }
}
