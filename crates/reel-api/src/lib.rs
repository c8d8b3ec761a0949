//! Upload service: accepts finished videos from recording workers, checks the
//! upload token with the job owner over the bus and hands the video on.
mod error;
pub use error::ApiError;

mod config;
pub use config::ApiConfig;

mod delivery;
pub use delivery::{Delivery, DirectoryDelivery, Video};

mod service;
pub use service::{UNABLE_TO_UPLOAD, UPLOAD_FAILED, UploadService};

mod http;
pub use http::{UploadApi, serve};
