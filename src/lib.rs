pub mod config;
pub mod errors;
pub mod models;
pub mod security;
pub mod session;
pub mod uploader;

pub use errors::{AppError, AppResult};
pub use models::{ManualAssignment, Phase, PipelineProgress, UploadItem};
pub use uploader::{RunOutcome, UploadPipeline};
