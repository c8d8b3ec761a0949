//! Downloaded demo archives, persisted between jobs.
//!
//! Archives are keyed by `"{origin_lower}_{archive_basename}"`. After each
//! job [`DemoCache::evict`] keeps only the most recently accessed ones.
use std::{
    fs::{File, FileTimes},
    path::{Path, PathBuf},
    time::{Duration, SystemTime},
};

use async_trait::async_trait;
use reel_model::RequestRecording;
use tracing::{debug, info, warn};
use url::Url;

use crate::ExecError;

/// Downloads a URL to a local file.
#[async_trait]
pub trait Fetch: Send + Sync + 'static {
    async fn fetch(&self, url: &str, dest: &Path) -> Result<(), ExecError>;
}

#[derive(Debug, Clone)]
pub struct DemoCache {
    dir: PathBuf,
    keep: usize,
}

impl DemoCache {
    pub fn new(dir: impl Into<PathBuf>, keep: usize) -> Self {
        Self {
            dir: dir.into(),
            keep,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Cache location of the job's archive.
    pub fn archive_path(&self, job: &RequestRecording) -> Result<PathBuf, ExecError> {
        let name = archive_basename(&job.demo_url).ok_or_else(|| {
            ExecError::InvalidJob(format!("demo url has no file name: {}", job.demo_url))
        })?;
        Ok(self
            .dir
            .join(format!("{}_{}", job.demo_origin.to_lowercase(), name)))
    }

    /// Where the archive is downloaded to before it is moved into the cache.
    pub fn temp_archive_path(
        &self,
        job: &RequestRecording,
        temp_dir: &Path,
    ) -> Result<PathBuf, ExecError> {
        let archive = self.archive_path(job)?;
        let suffix = archive
            .extension()
            .map(|ext| format!(".{}", ext.to_string_lossy()))
            .unwrap_or_default();
        Ok(temp_dir.join(format!("{}.dem{}", job.job_id, suffix)))
    }

    /// Return the cached archive, downloading it first on a miss.
    pub async fn obtain(
        &self,
        job: &RequestRecording,
        fetcher: &dyn Fetch,
        temp_dir: &Path,
        timeout: Duration,
    ) -> Result<PathBuf, ExecError> {
        let archive = self.archive_path(job)?;
        if tokio::fs::try_exists(&archive).await? {
            debug!(archive = %archive.display(), "demo archive cached");
            touch(&archive).await;
            return Ok(archive);
        }

        let temp = self.temp_archive_path(job, temp_dir)?;
        info!(url = %job.demo_url, "downloading demo archive");
        tokio::time::timeout(timeout, fetcher.fetch(&job.demo_url, &temp))
            .await
            .map_err(|_| ExecError::Download(format!("timed out after {timeout:?}")))??;

        // another job may have cached the same archive meanwhile
        if !tokio::fs::try_exists(&archive).await? {
            tokio::fs::rename(&temp, &archive).await?;
        }
        Ok(archive)
    }

    /// Delete all but the `keep` most recently accessed archives.
    ///
    /// Returns the number of files deleted.
    pub async fn evict(&self) -> Result<usize, ExecError> {
        let mut files = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let meta = entry.metadata().await?;
            if !meta.is_file() {
                continue;
            }
            let accessed = meta
                .accessed()
                .or_else(|_| meta.modified())
                .unwrap_or(SystemTime::UNIX_EPOCH);
            files.push((accessed, entry.path()));
        }

        if files.len() <= self.keep {
            return Ok(0);
        }
        files.sort_by(|a, b| b.0.cmp(&a.0));

        let mut removed = 0;
        for (_, path) in files.into_iter().skip(self.keep) {
            match tokio::fs::remove_file(&path).await {
                Ok(()) => {
                    debug!(file = %path.display(), "evicted demo archive");
                    removed += 1;
                }
                Err(e) => warn!(file = %path.display(), error = %e, "failed to evict demo archive"),
            }
        }
        Ok(removed)
    }
}

/// Last path segment of a URL, ignoring query and fragment.
fn archive_basename(url: &str) -> Option<String> {
    let url = Url::parse(url).ok()?;
    let name = url.path_segments()?.next_back()?;
    (!name.is_empty()).then(|| name.to_string())
}

async fn touch(path: &Path) {
    let path = path.to_path_buf();
    let res = tokio::task::spawn_blocking(move || {
        File::open(&path)?.set_times(FileTimes::new().set_accessed(SystemTime::now()))
    })
    .await;
    if let Ok(Err(e)) = res {
        debug!(error = %e, "could not update archive access time");
    }
}
