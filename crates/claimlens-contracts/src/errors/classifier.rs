use std::fmt;

use serde::Serialize;

/// Longest raw failure text echoed back for unrecognised errors.
pub const UNKNOWN_DETAIL_MAX_CHARS: usize = 100;

const NETWORK_MARKERS: &[&str] = &[
    "network",
    "failed to fetch",
    "econnrefused",
    "connection refused",
    "error sending request",
];
const UPSTREAM_MARKERS: &[&str] = &["analyze", "analysis"];
const UPLOAD_MARKERS: &[&str] = &["upload", "image", "file"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ErrorCategory {
    Credential,
    Quota,
    RateLimit,
    Network,
    Upstream,
    Parsing,
    Upload,
    Unknown,
}

impl ErrorCategory {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCategory::Credential => "credential",
            ErrorCategory::Quota => "quota",
            ErrorCategory::RateLimit => "rateLimit",
            ErrorCategory::Network => "network",
            ErrorCategory::Upstream => "upstream",
            ErrorCategory::Parsing => "parsing",
            ErrorCategory::Upload => "upload",
            ErrorCategory::Unknown => "unknown",
        }
    }

    pub fn suggested_action(self) -> &'static str {
        match self {
            ErrorCategory::Credential => {
                "Please check your settings and ensure your API key is correct."
            }
            ErrorCategory::Quota => "Please check your provider account billing or contact support.",
            ErrorCategory::RateLimit => "Please retry after a short delay.",
            ErrorCategory::Network => "Please check your internet connection and try again.",
            ErrorCategory::Upstream => {
                "Please try again with a different image or contact support."
            }
            ErrorCategory::Parsing => "Please try the analysis again.",
            ErrorCategory::Upload => "Please try a different image format or a smaller file.",
            ErrorCategory::Unknown => "If this issue persists, please contact support.",
        }
    }

    fn summary(self) -> &'static str {
        match self {
            ErrorCategory::Credential => "API Key Issue",
            ErrorCategory::Quota => "API Quota Exceeded",
            ErrorCategory::RateLimit => "Too Many Requests",
            ErrorCategory::Network => "Network Error",
            ErrorCategory::Upstream => "Analysis Failed",
            ErrorCategory::Parsing => "Unreadable Response",
            ErrorCategory::Upload => "Upload Failed",
            ErrorCategory::Unknown => "Unexpected Error",
        }
    }

    fn fixed_detail(self) -> Option<&'static str> {
        match self {
            ErrorCategory::Credential => Some("The API key appears to be invalid or missing."),
            ErrorCategory::Quota => Some("Your API quota has been exceeded."),
            ErrorCategory::RateLimit => {
                Some("Too many requests were sent in a short period.")
            }
            ErrorCategory::Network => Some("Unable to connect to the analysis service."),
            ErrorCategory::Upstream => Some("Failed to analyze the provided image."),
            ErrorCategory::Parsing => Some("The analysis reply could not be understood."),
            ErrorCategory::Upload => Some("There was an issue with the image upload."),
            ErrorCategory::Unknown => None,
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// User-facing description of a failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorClassification {
    pub category: ErrorCategory,
    pub summary: String,
    pub detail: String,
    pub suggested_action: String,
}

impl ErrorClassification {
    fn new(category: ErrorCategory, raw: &str) -> Self {
        let detail = category
            .fixed_detail()
            .map(str::to_string)
            .unwrap_or_else(|| truncate_detail(raw));
        Self {
            category,
            summary: category.summary().to_string(),
            detail,
            suggested_action: category.suggested_action().to_string(),
        }
    }

    /// `summary: detail`, the text stored on a failed result.
    pub fn headline(&self) -> String {
        format!("{}: {}", self.summary, self.detail)
    }
}

/// Maps failure text onto a category. First matching rule wins.
pub fn classify(message: &str) -> ErrorClassification {
    let lowered = message.to_lowercase();
    let category = if lowered.contains("invalid_api_key") || lowered.trim() == "api key not provided"
    {
        ErrorCategory::Credential
    } else if lowered.contains("insufficient_quota") {
        ErrorCategory::Quota
    } else if lowered.contains("rate_limit") {
        ErrorCategory::RateLimit
    } else if contains_any(&lowered, NETWORK_MARKERS) {
        ErrorCategory::Network
    } else if contains_any(&lowered, UPSTREAM_MARKERS) {
        ErrorCategory::Upstream
    } else if contains_any(&lowered, UPLOAD_MARKERS) {
        ErrorCategory::Upload
    } else {
        ErrorCategory::Unknown
    };
    ErrorClassification::new(category, message)
}

fn contains_any(haystack: &str, needles: &[&str]) -> bool {
    needles.iter().any(|needle| haystack.contains(needle))
}

fn truncate_detail(raw: &str) -> String {
    if raw.chars().count() <= UNKNOWN_DETAIL_MAX_CHARS {
        return raw.to_string();
    }
    raw.chars().take(UNKNOWN_DETAIL_MAX_CHARS).collect::<String>() + "..."
}
