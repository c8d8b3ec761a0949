//! Engine that renders by running an external recorder command.
//!
//! The job is passed to the child as `REEL_*` environment variables and the
//! child is expected to write the video to `REEL_OUTPUT_PATH`.
use std::{
    fmt,
    path::{Path, PathBuf},
    process::Stdio,
    sync::atomic::{AtomicU16, Ordering},
    time::Duration,
};

use async_trait::async_trait;
use reel_core::{PoolError, Recovery, ResourcePool};
use reel_model::RequestRecording;
use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tracing::{debug, info, instrument, trace, warn};

use crate::{ExecError, engine::Engine};

/// First port handed out to recorder boxes.
pub const FIRST_PORT: u16 = 41920;

/// Sandbox a recorder runs in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecorderBox {
    pub name: String,
    /// Control port of the game instance inside the box.
    pub port: u16,
}

impl fmt::Display for RecorderBox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.name, self.port)
    }
}

/// External command with arguments.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandSpec {
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    fn validate(&self) -> Result<(), ExecError> {
        if self.program.trim().is_empty() {
            return Err(ExecError::InvalidConfig("command program is empty".into()));
        }
        Ok(())
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args);
        cmd
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubprocessEngineConfig {
    pub recorder: CommandSpec,
    /// Directory the recorder writes `{job_id}.mp4` into.
    pub output_dir: PathBuf,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_timeout_secs() -> u64 {
    600
}

impl SubprocessEngineConfig {
    pub fn new(recorder: CommandSpec, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            recorder,
            output_dir: output_dir.into(),
            timeout_secs: default_timeout_secs(),
        }
    }

    pub fn validate(&self) -> Result<(), ExecError> {
        self.recorder.validate()?;
        if self.timeout_secs == 0 {
            return Err(ExecError::InvalidConfig("recorder timeout must be positive".into()));
        }
        Ok(())
    }
}

pub struct SubprocessEngine {
    config: SubprocessEngineConfig,
}

impl SubprocessEngine {
    pub fn new(config: SubprocessEngineConfig) -> Result<Self, ExecError> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn output_path(&self, job: &RequestRecording) -> PathBuf {
        self.config.output_dir.join(format!("{}.mp4", job.job_id))
    }
}

#[async_trait]
impl Engine for SubprocessEngine {
    type Resource = RecorderBox;

    #[instrument(level = "debug", skip_all, fields(job_id = %job.job_id, recorder = %resource))]
    async fn record(
        &self,
        resource: &mut RecorderBox,
        demo: &Path,
        job: &RequestRecording,
    ) -> Result<PathBuf, ExecError> {
        let output = self.output_path(job);
        let timeout = Duration::from_secs(self.config.timeout_secs);

        let mut cmd = self.config.recorder.command();
        cmd.envs(job_env(job, resource, demo, &output))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        trace!(program = %self.config.recorder.program, "spawning recorder");
        let child = cmd
            .spawn()
            .map_err(|e| ExecError::Engine(format!("spawn failed: {e}")))?;

        // dropping the future on timeout kills the child
        let out = tokio::time::timeout(timeout, child.wait_with_output())
            .await
            .map_err(|_| ExecError::Engine(format!("recorder timed out after {timeout:?}")))?
            .map_err(|e| ExecError::Engine(format!("wait failed: {e}")))?;

        if !out.status.success() {
            let stderr = String::from_utf8_lossy(&out.stderr);
            let last = stderr.lines().rev().find(|l| !l.trim().is_empty()).unwrap_or("");
            return Err(match out.status.code() {
                Some(code) => ExecError::Engine(format!("recorder exited with code {code}: {last}")),
                None => ExecError::Engine("recorder terminated by signal".into()),
            });
        }
        if !tokio::fs::try_exists(&output).await? {
            return Err(ExecError::Engine(format!(
                "recorder produced no output at {}",
                output.display()
            )));
        }

        debug!(output = %output.display(), "recording finished");
        Ok(output)
    }
}

/// Environment handed to the recorder for one job.
fn job_env(
    job: &RequestRecording,
    recorder: &RecorderBox,
    demo: &Path,
    output: &Path,
) -> Vec<(&'static str, String)> {
    let skips = job
        .skips
        .iter()
        .map(|s| format!("{}-{}", s.start_tick, s.end_tick))
        .collect::<Vec<_>>()
        .join(",");

    let mut env = vec![
        ("REEL_JOB_ID", job.job_id.to_string()),
        ("REEL_BOX", recorder.name.clone()),
        ("REEL_PORT", recorder.port.to_string()),
        ("REEL_DEMO_PATH", demo.display().to_string()),
        ("REEL_OUTPUT_PATH", output.display().to_string()),
        ("REEL_PLAYER_XUID", job.player_xuid.to_string()),
        ("REEL_START_TICK", job.start_tick.to_string()),
        ("REEL_END_TICK", job.end_tick.to_string()),
        ("REEL_SKIPS", skips),
        ("REEL_TICKRATE", job.tickrate.to_string()),
        ("REEL_FPS", job.fps.to_string()),
        ("REEL_VIDEO_BITRATE", job.video_bitrate.to_string()),
        ("REEL_AUDIO_BITRATE", job.audio_bitrate.to_string()),
        ("REEL_HQ", flag(job.hq)),
        ("REEL_COLOR_FILTER", flag(job.color_filter)),
        ("REEL_FRAGMOVIE", flag(job.fragmovie)),
        ("REEL_RIGHTHAND", flag(job.righthand)),
        ("REEL_USE_DEMO_CROSSHAIR", flag(job.use_demo_crosshair)),
    ];
    if let Some(code) = &job.crosshair_code {
        env.push(("REEL_CROSSHAIR_CODE", code.clone()));
    }
    env
}

fn flag(value: bool) -> String {
    String::from(if value { "1" } else { "0" })
}

/// Re-provisions a retired recorder box and puts it back into the pool.
///
/// The replacement keeps the box name and gets a fresh port.
pub struct BoxRecovery {
    provision: Option<CommandSpec>,
    next_port: AtomicU16,
}

impl Default for BoxRecovery {
    fn default() -> Self {
        Self::new(FIRST_PORT)
    }
}

impl BoxRecovery {
    pub fn new(first_port: u16) -> Self {
        Self {
            provision: None,
            next_port: AtomicU16::new(first_port),
        }
    }

    /// Command run before a box is reused, with `REEL_BOX` and `REEL_PORT` set.
    pub fn with_provision(mut self, command: CommandSpec) -> Self {
        self.provision = Some(command);
        self
    }

    /// A box named `name` on the next free port.
    pub fn allocate(&self, name: impl Into<String>) -> RecorderBox {
        RecorderBox {
            name: name.into(),
            port: self.next_port.fetch_add(1, Ordering::Relaxed),
        }
    }

    async fn provision(&self, recorder: &RecorderBox) -> Result<(), PoolError> {
        let Some(spec) = &self.provision else {
            return Ok(());
        };
        let status = spec
            .command()
            .env("REEL_BOX", &recorder.name)
            .env("REEL_PORT", recorder.port.to_string())
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .status()
            .await
            .map_err(|e| PoolError::RecoveryFailed(format!("provision spawn failed: {e}")))?;
        if !status.success() {
            return Err(PoolError::RecoveryFailed(format!(
                "provisioning {} failed: {status}",
                recorder.name
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl Recovery<RecorderBox> for BoxRecovery {
    async fn on_removal(
        &self,
        pool: ResourcePool<RecorderBox>,
        resource: RecorderBox,
        reason: String,
    ) -> Result<(), PoolError> {
        warn!(recorder = %resource, %reason, "recreating recorder box");
        let replacement = self.allocate(resource.name);
        self.provision(&replacement).await?;
        let id = pool.add(replacement.clone());
        info!(recorder = %replacement, resource = %id, "recorder box ready");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reel_model::Skip;

    fn job() -> RequestRecording {
        serde_json::from_value(serde_json::json!({
            "job_id": "67e55044-10b1-426f-9247-bb680e5fe0c8",
            "demo_url": "https://d.example/m.dem",
            "demo_origin": "valve",
            "upload_url": "https://u.example/upload",
            "player_xuid": 76561198000000001u64,
            "start_tick": 100,
            "end_tick": 900
        }))
        .unwrap()
    }

    fn engine(script: &str, out: &Path) -> SubprocessEngine {
        let mut cfg = SubprocessEngineConfig::new(
            CommandSpec::new("sh").arg("-c").arg(script),
            out,
        );
        cfg.timeout_secs = 5;
        SubprocessEngine::new(cfg).unwrap()
    }

    #[test]
    fn env_carries_job_and_box() {
        let mut j = job();
        j.skips = vec![
            Skip { start_tick: 200, end_tick: 300 },
            Skip { start_tick: 500, end_tick: 600 },
        ];
        let env = job_env(
            &j,
            &RecorderBox { name: "box-1".into(), port: 41921 },
            Path::new("/t/a.dem"),
            Path::new("/t/a.mp4"),
        );
        let get = |k: &str| env.iter().find(|(n, _)| *n == k).map(|(_, v)| v.as_str());

        assert_eq!(get("REEL_JOB_ID"), Some("67e55044-10b1-426f-9247-bb680e5fe0c8"));
        assert_eq!(get("REEL_PORT"), Some("41921"));
        assert_eq!(get("REEL_SKIPS"), Some("200-300,500-600"));
        assert_eq!(get("REEL_RIGHTHAND"), Some("1"));
        assert_eq!(get("REEL_CROSSHAIR_CODE"), None);
    }

    #[test]
    fn empty_program_is_rejected() {
        let cfg = SubprocessEngineConfig::new(CommandSpec::new("  "), "/tmp");
        assert!(matches!(SubprocessEngine::new(cfg), Err(ExecError::InvalidConfig(_))));
    }

    #[test]
    fn allocate_hands_out_increasing_ports() {
        let recovery = BoxRecovery::default();
        assert_eq!(recovery.allocate("a").port, FIRST_PORT);
        assert_eq!(recovery.allocate("b").port, FIRST_PORT + 1);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn records_to_output_path() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine(r#"printf "$REEL_PLAYER_XUID" > "$REEL_OUTPUT_PATH""#, dir.path());
        let mut rb = RecorderBox { name: "box-0".into(), port: FIRST_PORT };

        let out = engine.record(&mut rb, Path::new("/dev/null"), &job()).await.unwrap();
        assert_eq!(out, dir.path().join("67e55044-10b1-426f-9247-bb680e5fe0c8.mp4"));
        assert_eq!(std::fs::read_to_string(out).unwrap(), "76561198000000001");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn non_zero_exit_is_engine_error() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine("echo 'game crashed' >&2; exit 3", dir.path());
        let mut rb = RecorderBox { name: "box-0".into(), port: FIRST_PORT };

        let err = engine.record(&mut rb, Path::new("/dev/null"), &job()).await.unwrap_err();
        assert!(
            matches!(&err, ExecError::Engine(msg) if msg.contains("code 3") && msg.contains("game crashed")),
            "{err}"
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn missing_output_is_engine_error() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine("true", dir.path());
        let mut rb = RecorderBox { name: "box-0".into(), port: FIRST_PORT };

        let err = engine.record(&mut rb, Path::new("/dev/null"), &job()).await.unwrap_err();
        assert!(matches!(err, ExecError::Engine(_)));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn recovery_provisions_and_readds_box() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("provisioned");
        let recovery = BoxRecovery::new(50000).with_provision(
            CommandSpec::new("sh")
                .arg("-c")
                .arg(format!(r#"printf "$REEL_BOX:$REEL_PORT" > "{}""#, marker.display())),
        );
        let pool = ResourcePool::new();

        recovery
            .on_removal(pool.clone(), RecorderBox { name: "box-7".into(), port: 1 }, "crash".into())
            .await
            .unwrap();

        assert_eq!(std::fs::read_to_string(&marker).unwrap(), "box-7:50000");
        let rb = pool.checkout().await.unwrap();
        assert_eq!(*rb, RecorderBox { name: "box-7".into(), port: 50000 });
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn failed_provision_is_reported() {
        let recovery = BoxRecovery::default().with_provision(CommandSpec::new("false"));
        let pool = ResourcePool::new();

        let err = recovery
            .on_removal(pool.clone(), RecorderBox { name: "b".into(), port: 1 }, "x".into())
            .await
            .unwrap_err();
        assert!(matches!(err, PoolError::RecoveryFailed(_)));
        assert_eq!(pool.capacity(), 0);
    }
}
