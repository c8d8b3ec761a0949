//! reqwest-backed download and upload collaborators.
use std::{path::Path, time::Duration};

use async_trait::async_trait;
use futures::StreamExt;
use reel_model::JobId;
use reqwest::{Body, Client, StatusCode, header::AUTHORIZATION};
use tokio::io::AsyncWriteExt;
use tokio_util::io::ReaderStream;
use tracing::{debug, warn};

use crate::{ExecError, Fetch, UPLOAD_FAILED, UPLOAD_NO_RESPONSE, Uploader};

/// Streams demo archives to disk.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    pub fn new(timeout: Duration) -> Result<Self, ExecError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ExecError::InvalidConfig(format!("http client: {e}")))?;
        Ok(Self { client })
    }

    pub fn with_client(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Fetch for HttpFetcher {
    async fn fetch(&self, url: &str, dest: &Path) -> Result<(), ExecError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| ExecError::Download(e.to_string()))?;

        let mut file = tokio::fs::File::create(dest).await?;
        let mut body = response.bytes_stream();
        let mut written = 0u64;
        while let Some(chunk) = body.next().await {
            let chunk = chunk.map_err(|e| ExecError::Download(e.to_string()))?;
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        file.flush().await?;

        debug!(url, bytes = written, "demo archive downloaded");
        Ok(())
    }
}

/// Posts finished videos to the upload service.
#[derive(Debug, Clone)]
pub struct HttpUploader {
    client: Client,
    api_token: String,
}

impl HttpUploader {
    pub fn new(api_token: impl Into<String>, timeout: Duration) -> Result<Self, ExecError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ExecError::InvalidConfig(format!("http client: {e}")))?;
        Ok(Self::with_client(client, api_token))
    }

    pub fn with_client(client: Client, api_token: impl Into<String>) -> Self {
        Self {
            client,
            api_token: api_token.into(),
        }
    }
}

#[async_trait]
impl Uploader for HttpUploader {
    async fn upload(&self, url: &str, job_id: JobId, file: &Path) -> Result<(), ExecError> {
        let video = tokio::fs::File::open(file).await?;
        let length = video.metadata().await?.len();

        let response = self
            .client
            .post(url)
            .query(&[("job_id", job_id.to_string())])
            .header(AUTHORIZATION, &self.api_token)
            .header(reqwest::header::CONTENT_LENGTH, length)
            .body(Body::wrap_stream(ReaderStream::new(video)))
            .send()
            .await
            .map_err(|e| {
                warn!(%job_id, error = %e, "upload request failed");
                ExecError::Upload(UPLOAD_NO_RESPONSE)
            })?;

        match response.status() {
            StatusCode::OK => {
                debug!(%job_id, bytes = length, "video uploaded");
                Ok(())
            }
            status => {
                warn!(%job_id, %status, "upload rejected");
                Err(ExecError::Upload(UPLOAD_FAILED))
            }
        }
    }
}
