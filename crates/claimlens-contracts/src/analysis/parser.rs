use serde::{Deserialize, Deserializer};
use serde_json::Value;

use super::result::{AnalysisResult, VehicleMetadata, UNKNOWN_SENTINEL};

/// Fields the model is asked to return, exactly as it returned them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StructuredFields {
    #[serde(default, rename = "carMetadata", alias = "vehicle")]
    pub vehicle: Option<StructuredVehicle>,
    #[serde(default, deserialize_with = "lenient_text")]
    pub damage_description: Option<String>,
    #[serde(default, deserialize_with = "lenient_text")]
    pub repair_estimate: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct StructuredVehicle {
    #[serde(default, deserialize_with = "lenient_text")]
    pub make: Option<String>,
    #[serde(default, deserialize_with = "lenient_text")]
    pub model: Option<String>,
    #[serde(default, deserialize_with = "lenient_text")]
    pub color: Option<String>,
}

/// Finds the first balanced `{...}` block in `raw_text` and decodes it.
///
/// Returns `None` when there is no block or it does not decode; a reply the
/// model wrapped in prose or a code fence is fine.
pub fn extract_structured(raw_text: &str) -> Option<StructuredFields> {
    let candidate = first_balanced_object(raw_text)?;
    match serde_json::from_str::<StructuredFields>(candidate) {
        Ok(fields) => Some(fields),
        Err(err) => {
            log::debug!("STRUCTURED_DECODE_FAILED error={err}");
            None
        }
    }
}

/// Builds a result, substituting the sentinel field by field.
pub fn to_analysis_result(fields: Option<&StructuredFields>, is_loading: bool) -> AnalysisResult {
    let vehicle = fields.and_then(|fields| fields.vehicle.as_ref());
    AnalysisResult {
        vehicle: VehicleMetadata {
            make: resolve(vehicle.and_then(|v| v.make.as_deref())),
            model: resolve(vehicle.and_then(|v| v.model.as_deref())),
            color: resolve(vehicle.and_then(|v| v.color.as_deref())),
        },
        damage_description: resolve(fields.and_then(|f| f.damage_description.as_deref())),
        repair_estimate: resolve(fields.and_then(|f| f.repair_estimate.as_deref())),
        is_loading,
        error: None,
    }
}

/// True for blank text and the markers models use when unsure:
/// `TBD`, `Unknown`, or anything mentioning "determined".
pub fn is_placeholder(value: &str) -> bool {
    let lowered = value.trim().to_ascii_lowercase();
    lowered.is_empty()
        || lowered == "tbd"
        || lowered == "unknown"
        || lowered.contains("determined")
}

fn resolve(value: Option<&str>) -> String {
    match value {
        Some(text) if !is_placeholder(text) => text.to_string(),
        _ => UNKNOWN_SENTINEL.to_string(),
    }
}

/// Tries each `{` in turn; an opening brace that never closes is skipped.
fn first_balanced_object(text: &str) -> Option<&str> {
    let mut from = 0;
    while let Some(found) = text[from..].find('{') {
        let start = from + found;
        if let Some(end) = balanced_end(&text[start..]) {
            return Some(&text[start..=start + end]);
        }
        from = start + 1;
    }
    None
}

/// Byte offset of the `}` closing the object that opens at `text[0]`.
fn balanced_end(text: &str) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, ch) in text.char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == '"' {
                in_string = false;
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(offset);
                }
            }
            _ => {}
        }
    }
    None
}

// Models occasionally answer `"repairEstimate": 1200`; keep the number as text.
fn lenient_text<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::String(text)) => Some(text),
        Some(Value::Number(number)) => Some(number.to_string()),
        Some(Value::Bool(flag)) => Some(flag.to_string()),
        _ => None,
    })
}
