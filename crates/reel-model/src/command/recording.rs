use serde::{Deserialize, Serialize};

use crate::{JobId, ModelError, ModelResult, message::job_message};

/// Tick range skipped (fast-forwarded) while recording.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Skip {
    pub start_tick: i64,
    pub end_tick: i64,
}

/// Render a clip of one player from a demo.
///
/// This is the job payload handed out by the gateway and consumed by the
/// recording pipeline.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RequestRecording {
    pub job_id: JobId,
    /// Where the demo archive can be downloaded from.
    pub demo_url: String,
    /// Platform the demo came from; part of the cache key.
    pub demo_origin: String,
    /// Where the finished video is posted.
    pub upload_url: String,
    pub player_xuid: u64,
    pub start_tick: i64,
    pub end_tick: i64,
    #[serde(default)]
    pub skips: Vec<Skip>,
    #[serde(default = "default_tickrate")]
    pub tickrate: u32,
    #[serde(default = "default_fps")]
    pub fps: u32,
    /// Video bitrate in kbit/s.
    #[serde(default = "default_video_bitrate")]
    pub video_bitrate: u32,
    /// Audio bitrate in kbit/s.
    #[serde(default = "default_audio_bitrate")]
    pub audio_bitrate: u32,
    #[serde(default)]
    pub hq: bool,
    #[serde(default)]
    pub color_filter: bool,
    #[serde(default)]
    pub fragmovie: bool,
    #[serde(default = "default_true")]
    pub righthand: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub crosshair_code: Option<String>,
    #[serde(default)]
    pub use_demo_crosshair: bool,
}

fn default_tickrate() -> u32 {
    64
}

fn default_fps() -> u32 {
    60
}

fn default_video_bitrate() -> u32 {
    4_000
}

fn default_audio_bitrate() -> u32 {
    192
}

fn default_true() -> bool {
    true
}

impl RequestRecording {
    /// Check the tick range before any expensive work is started.
    pub fn validate(&self) -> ModelResult<()> {
        if self.end_tick < self.start_tick {
            return Err(ModelError::Invalid(
                "End tick must be after start tick".into(),
            ));
        }
        if self.tickrate == 0 {
            return Err(ModelError::Invalid("tickrate must be positive".into()));
        }
        Ok(())
    }

    /// Number of ticks covered, ignoring skips.
    pub fn tick_span(&self) -> i64 {
        self.end_tick - self.start_tick
    }
}

job_message!(RequestRecording, "request_recording", Command);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Message;

    fn minimal_json() -> &'static str {
        r#"{
            "job_id": "67e55044-10b1-426f-9247-bb680e5fe0c8",
            "demo_url": "https://demos.example/match_1.dem.gz",
            "demo_origin": "Valve",
            "upload_url": "https://uploader.example/upload",
            "player_xuid": 76561198000000000,
            "start_tick": 1000,
            "end_tick": 4000
        }"#
    }

    #[test]
    fn missing_optional_fields_take_defaults() {
        let cmd: RequestRecording = serde_json::from_str(minimal_json()).unwrap();
        assert_eq!(cmd.tickrate, 64);
        assert_eq!(cmd.fps, 60);
        assert!(cmd.righthand);
        assert!(!cmd.hq);
        assert!(cmd.skips.is_empty());
        assert!(cmd.crosshair_code.is_none());
        assert_eq!(cmd.tick_span(), 3000);
    }

    #[test]
    fn job_id_is_exposed_for_correlation() {
        let cmd: RequestRecording = serde_json::from_str(minimal_json()).unwrap();
        assert_eq!(cmd.job_id(), Some(cmd.job_id));
        assert_eq!(RequestRecording::NAME, "request_recording");
    }

    #[test]
    fn validate_rejects_reversed_range() {
        let mut cmd: RequestRecording = serde_json::from_str(minimal_json()).unwrap();
        cmd.end_tick = 10;
        let err = cmd.validate().unwrap_err();
        assert!(err.to_string().contains("End tick must be after start tick"));
    }
}
