use std::{path::PathBuf, time::Duration};

use serde::{Deserialize, Serialize};

use crate::ExecError;

/// Recording pipeline settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PipelineConfig {
    /// Per-job scratch files: downloads in progress, extracted demos, videos.
    pub temp_dir: PathBuf,
    /// Downloaded demo archives kept between jobs.
    pub demo_dir: PathBuf,
    /// Archives kept in `demo_dir` after each job, most recently accessed first.
    pub keep_demo_count: usize,
    pub download_timeout_secs: u64,
    /// Outer bound on one upload.
    pub upload_timeout_secs: u64,
    /// Overrides the upload url carried by each job.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub upload_url: Option<String>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            temp_dir: PathBuf::from("temp"),
            demo_dir: PathBuf::from("demos"),
            keep_demo_count: 8,
            download_timeout_secs: 32,
            upload_timeout_secs: 32,
            upload_url: None,
        }
    }
}

impl PipelineConfig {
    pub fn download_timeout(&self) -> Duration {
        Duration::from_secs(self.download_timeout_secs)
    }

    pub fn upload_timeout(&self) -> Duration {
        Duration::from_secs(self.upload_timeout_secs)
    }

    /// Where the video of `job_url`'s job is posted.
    pub fn upload_url<'a>(&'a self, job_url: &'a str) -> &'a str {
        self.upload_url.as_deref().unwrap_or(job_url)
    }

    pub fn validate(&self) -> Result<(), ExecError> {
        if self.temp_dir == self.demo_dir {
            return Err(ExecError::InvalidConfig(
                "temp_dir and demo_dir must differ".into(),
            ));
        }
        if self.download_timeout_secs == 0 || self.upload_timeout_secs == 0 {
            return Err(ExecError::InvalidConfig("timeouts must be positive".into()));
        }
        Ok(())
    }

    /// Wipe `temp_dir` and make sure both directories exist.
    pub async fn prepare_dirs(&self) -> Result<(), ExecError> {
        match tokio::fs::remove_dir_all(&self.temp_dir).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        tokio::fs::create_dir_all(&self.temp_dir).await?;
        tokio::fs::create_dir_all(&self.demo_dir).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_dirs_are_rejected() {
        let cfg = PipelineConfig {
            temp_dir: "x".into(),
            demo_dir: "x".into(),
            ..PipelineConfig::default()
        };
        assert!(matches!(cfg.validate(), Err(ExecError::InvalidConfig(_))));
        assert!(PipelineConfig::default().validate().is_ok());
    }

    #[tokio::test]
    async fn prepare_wipes_temp_and_keeps_demos() {
        let root = tempfile::tempdir().unwrap();
        let cfg = PipelineConfig {
            temp_dir: root.path().join("temp"),
            demo_dir: root.path().join("demos"),
            ..PipelineConfig::default()
        };
        std::fs::create_dir_all(&cfg.temp_dir).unwrap();
        std::fs::create_dir_all(&cfg.demo_dir).unwrap();
        std::fs::write(cfg.temp_dir.join("stale.dem"), b"x").unwrap();
        std::fs::write(cfg.demo_dir.join("valve_a.dem.gz"), b"x").unwrap();

        cfg.prepare_dirs().await.unwrap();

        assert!(cfg.temp_dir.is_dir());
        assert!(!cfg.temp_dir.join("stale.dem").exists());
        assert!(cfg.demo_dir.join("valve_a.dem.gz").exists());
    }
}
