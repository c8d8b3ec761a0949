mod error;
pub use error::{ModelError, ModelResult};

mod id;
pub use id::JobId;

mod message;
pub use message::{Command, Event, Message, MessageKind};

mod command;
pub use command::{RequestRecording, Skip, ValidateUpload};

mod event;
pub use event::{
    JobFailed, JobRecording, JobSuccess, JobUploading, JobWaiting, RecordingExpired,
    UploadValidated, UploaderFailure, UploaderSuccess,
};

mod frame;
pub use frame::{ClientFrame, decode_assignment};

mod strategy;
pub use strategy::BackoffStrategy;
