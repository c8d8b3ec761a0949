use serde::{Deserialize, Serialize};

use crate::{JobId, message::job_message};

/// Answer to `ValidateUpload`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadValidated {
    pub job_id: JobId,
    pub authorized: bool,
    #[serde(default)]
    pub channel_id: u64,
    #[serde(default)]
    pub user_id: u64,
    #[serde(default)]
    pub video_title: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploaderSuccess {
    pub job_id: JobId,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploaderFailure {
    pub job_id: JobId,
    pub reason: String,
}

job_message!(UploadValidated, "upload_validated", Event);
job_message!(UploaderSuccess, "uploader_success", Event);
job_message!(UploaderFailure, "uploader_failure", Event);
