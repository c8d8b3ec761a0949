mod recording;
pub use recording::{RequestRecording, Skip};

mod upload;
pub use upload::ValidateUpload;
