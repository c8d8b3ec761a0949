//! Job lifecycle events published by the recording side.
use serde::{Deserialize, Serialize};

use crate::{JobId, message::job_message};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobWaiting {
    pub job_id: JobId,
}

/// A resource was checked out and rendering started.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobRecording {
    pub job_id: JobId,
    /// Jobs queued in front of this one when it was accepted.
    #[serde(default)]
    pub infront: usize,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobUploading {
    pub job_id: JobId,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobSuccess {
    pub job_id: JobId,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobFailed {
    pub job_id: JobId,
    pub reason: String,
}

/// Dead-letter event for a `RequestRecording` nobody consumed in time.
///
/// Decoded from the original command payload; unknown fields are ignored.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordingExpired {
    pub job_id: JobId,
}

job_message!(JobWaiting, "job_waiting", Event);
job_message!(JobRecording, "job_recording", Event);
job_message!(JobUploading, "job_uploading", Event);
job_message!(JobSuccess, "job_success", Event);
job_message!(JobFailed, "job_failed", Event);
job_message!(RecordingExpired, "recording_expired", Event);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::RequestRecording;

    #[test]
    fn expired_decodes_from_original_command_payload() {
        let raw = r#"{
            "job_id": "67e55044-10b1-426f-9247-bb680e5fe0c8",
            "demo_url": "https://demos.example/a.dem",
            "demo_origin": "faceit",
            "upload_url": "https://uploader.example/upload",
            "player_xuid": 1,
            "start_tick": 1,
            "end_tick": 2
        }"#;
        let cmd: RequestRecording = serde_json::from_str(raw).unwrap();
        let expired: RecordingExpired = serde_json::from_str(raw).unwrap();
        assert_eq!(expired.job_id, cmd.job_id);
    }
}
