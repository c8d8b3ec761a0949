//! Recording pipeline: demo cache, recording engines, upload and the
//! `RequestRecording` command handler tying them together.
mod error;
pub use error::{ExecError, UPLOAD_FAILED, UPLOAD_NO_RESPONSE};

mod config;
pub use config::PipelineConfig;

mod cache;
pub use cache::{DemoCache, Fetch};

mod extract;
pub use extract::extract_demo;

pub mod engine;
pub use engine::Engine;

mod upload;
pub use upload::Uploader;

#[cfg(feature = "http")]
mod http;
#[cfg(feature = "http")]
pub use http::{HttpFetcher, HttpUploader};

mod handler;
pub use handler::{RECORDER_FAILED, RecordingHandler};
