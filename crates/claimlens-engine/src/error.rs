use claimlens_contracts::errors::{classify, ErrorClassification};
use thiserror::Error;

/// Failures raised by ingestion and analysis.
///
/// The `Display` text of each variant is what the classifier inspects, so
/// wording changes here change user-facing categories.
#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("Only image files are allowed (got '{0}')")]
    InvalidMediaType(String),

    #[error("Failed to fetch image from {url}: {reason}")]
    FetchFailed { url: String, reason: String },

    #[error("API key not provided")]
    MissingCredential,

    #[error("{message} (status {status})")]
    UpstreamError { status: u16, message: String },

    #[error("network request failed: {0}")]
    Transport(#[source] reqwest::Error),

    #[error("analysis response was not valid JSON: {0}")]
    InvalidResponse(String),

    #[error("unsupported provider '{0}'")]
    UnsupportedProvider(String),

    #[error("{0}")]
    Unclassified(String),
}

impl AnalysisError {
    pub fn classification(&self) -> ErrorClassification {
        classify(&self.to_string())
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            AnalysisError::UpstreamError { status, .. } => Some(*status),
            _ => None,
        }
    }
}
