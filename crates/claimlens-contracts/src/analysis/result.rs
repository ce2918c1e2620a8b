use std::fmt;

use serde::{Deserialize, Serialize};

/// Placeholder for any field the model could not determine with confidence.
pub const UNKNOWN_SENTINEL: &str = "TBD";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VehicleMetadata {
    pub make: String,
    pub model: String,
    pub color: String,
}

impl VehicleMetadata {
    fn filled(value: &str) -> Self {
        Self {
            make: value.to_string(),
            model: value.to_string(),
            color: value.to_string(),
        }
    }
}

/// One snapshot of an analysis attempt.
///
/// Snapshots with `is_loading == true` are progress markers and carry empty
/// strings. Once `is_loading` is false every scalar field is either a value
/// taken from the inference reply or [`UNKNOWN_SENTINEL`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisResult {
    #[serde(rename = "carMetadata")]
    pub vehicle: VehicleMetadata,
    pub damage_description: String,
    pub repair_estimate: String,
    pub is_loading: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl AnalysisResult {
    /// Snapshot emitted before the request leaves: loading, nothing known yet.
    pub fn pending() -> Self {
        Self {
            vehicle: VehicleMetadata::filled(""),
            damage_description: String::new(),
            repair_estimate: String::new(),
            is_loading: true,
            error: None,
        }
    }

    /// Terminal snapshot with every field set to the sentinel.
    pub fn fallback() -> Self {
        Self {
            vehicle: VehicleMetadata::filled(UNKNOWN_SENTINEL),
            damage_description: UNKNOWN_SENTINEL.to_string(),
            repair_estimate: UNKNOWN_SENTINEL.to_string(),
            is_loading: false,
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            ..Self::fallback()
        }
    }

    pub fn is_terminal(&self) -> bool {
        !self.is_loading
    }

    /// The five scalar fields in display order.
    pub fn scalar_fields(&self) -> [(&'static str, &str); 5] {
        [
            ("make", self.vehicle.make.as_str()),
            ("model", self.vehicle.model.as_str()),
            ("color", self.vehicle.color.as_str()),
            ("damageDescription", self.damage_description.as_str()),
            ("repairEstimate", self.repair_estimate.as_str()),
        ]
    }

    /// Count of scalar fields that hold a concrete value.
    pub fn determined_count(&self) -> usize {
        self.scalar_fields()
            .iter()
            .filter(|(_, value)| !value.is_empty() && *value != UNKNOWN_SENTINEL)
            .count()
    }
}

/// Where an orchestrated analysis currently stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnalysisPhase {
    Idle,
    Requesting,
    Parsing,
    Completed,
    Failed,
}

impl AnalysisPhase {
    pub fn as_str(self) -> &'static str {
        match self {
            AnalysisPhase::Idle => "idle",
            AnalysisPhase::Requesting => "requesting",
            AnalysisPhase::Parsing => "parsing",
            AnalysisPhase::Completed => "completed",
            AnalysisPhase::Failed => "failed",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, AnalysisPhase::Completed | AnalysisPhase::Failed)
    }

    /// Whether moving from `self` to `next` is a legal step.
    pub fn can_advance_to(self, next: AnalysisPhase) -> bool {
        matches!(
            (self, next),
            (AnalysisPhase::Idle, AnalysisPhase::Requesting)
                | (AnalysisPhase::Requesting, AnalysisPhase::Parsing)
                | (AnalysisPhase::Requesting, AnalysisPhase::Failed)
                | (AnalysisPhase::Parsing, AnalysisPhase::Completed)
                | (AnalysisPhase::Parsing, AnalysisPhase::Failed)
        )
    }
}

impl fmt::Display for AnalysisPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
