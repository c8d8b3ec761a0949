use serde::{Deserialize, Serialize};

use crate::{JobId, message::job_message};

/// Ask the job owner whether `token` may upload the video for `job_id`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidateUpload {
    pub job_id: JobId,
    pub token: String,
}

job_message!(ValidateUpload, "validate_upload", Command);
