mod classifier;

pub use classifier::{classify, ErrorCategory, ErrorClassification, UNKNOWN_DETAIL_MAX_CHARS};
