mod job;
pub use job::{JobFailed, JobRecording, JobSuccess, JobUploading, JobWaiting, RecordingExpired};

mod upload;
pub use upload::{UploadValidated, UploaderFailure, UploaderSuccess};
