// Main uploader module - orchestrates batch upload and classification
//
// This module is responsible for driving wardrobe photos through the item service

pub mod api_client;
pub mod pipeline;
pub mod progress_tracker;
pub mod state;

pub use api_client::{HttpWardrobeClient, WardrobeApi};
pub use pipeline::{RunOutcome, UploadBatch, UploadPipeline};
pub use progress_tracker::{EventKind, PipelineEvent, PipelineSnapshot};
pub use state::PipelineState;
