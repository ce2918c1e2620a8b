//! Async side of vehicle-damage analysis: image ingestion, the inference
//! transport and the orchestrator that ties them to progress reporting.

pub mod error;
pub mod inference;
pub mod ingestion;
pub mod orchestrator;

pub use error::AnalysisError;
pub use inference::{AnalysisConfig, InferenceClient, ProviderKind};
pub use ingestion::{ImageOrigin, ImageRecord};
pub use orchestrator::{AnalysisOrchestrator, JsonlProgressSink, ProgressSink, Tee};
