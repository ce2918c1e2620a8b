use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::{SecondsFormat, Utc};
use serde_json::{Map, Value};

use crate::analysis::{AnalysisPhase, AnalysisResult};

pub type EventPayload = Map<String, Value>;

pub const PROGRESS_EVENT: &str = "analysis_progress";

/// Append-only writer for `events.jsonl`.
///
/// - default fields are `type`, `run_id`, `ts`
/// - caller payload is merged last and can override defaults
/// - one compact JSON object per line
#[derive(Debug, Clone)]
pub struct EventWriter {
    inner: Arc<EventWriterInner>,
}

#[derive(Debug)]
struct EventWriterInner {
    path: PathBuf,
    run_id: String,
    lock: Mutex<()>,
}

impl EventWriter {
    pub fn new(path: impl Into<PathBuf>, run_id: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(EventWriterInner {
                path: path.into(),
                run_id: run_id.into(),
                lock: Mutex::new(()),
            }),
        }
    }

    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    pub fn emit(&self, event_type: &str, payload: EventPayload) -> anyhow::Result<Value> {
        let mut event = Map::new();
        event.insert("type".to_string(), Value::String(event_type.to_string()));
        event.insert(
            "run_id".to_string(),
            Value::String(self.inner.run_id.clone()),
        );
        event.insert("ts".to_string(), Value::String(now_utc_iso()));
        for (key, value) in payload {
            event.insert(key, value);
        }

        if let Some(parent) = self.inner.path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let line = serde_json::to_string(&event)?;
        let _guard = self
            .inner
            .lock
            .lock()
            .map_err(|_| anyhow::anyhow!("event writer lock poisoned"))?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.inner.path)?;
        file.write_all(line.as_bytes())?;
        file.write_all(b"\n")?;

        Ok(Value::Object(event))
    }

    /// Records one progress snapshot as an `analysis_progress` event.
    pub fn emit_progress(
        &self,
        phase: AnalysisPhase,
        snapshot: &AnalysisResult,
    ) -> anyhow::Result<Value> {
        let mut payload = EventPayload::new();
        payload.insert(
            "phase".to_string(),
            Value::String(phase.as_str().to_string()),
        );
        payload.insert("result".to_string(), serde_json::to_value(snapshot)?);
        self.emit(PROGRESS_EVENT, payload)
    }
}

fn now_utc_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, false)
}

#[cfg(test)]
mod tests {
    use std::fs;

    use chrono::DateTime;

    use super::*;

    #[test]
    fn emit_writes_compact_jsonl_line() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("events.jsonl");
        let writer = EventWriter::new(&path, "analysis-1");

        let mut payload = EventPayload::new();
        payload.insert("image".to_string(), Value::String("dent.jpg".to_string()));
        let emitted = writer.emit("analysis_started", payload)?;

        let content = fs::read_to_string(&path)?;
        let line = content.lines().next().unwrap_or("");
        let parsed: Value = serde_json::from_str(line)?;

        assert_eq!(parsed, emitted);
        assert_eq!(parsed["type"], Value::String("analysis_started".to_string()));
        assert_eq!(parsed["run_id"], Value::String("analysis-1".to_string()));
        assert_eq!(parsed["image"], Value::String("dent.jpg".to_string()));

        let ts = parsed["ts"].as_str().unwrap_or("");
        DateTime::parse_from_rfc3339(ts)?;
        Ok(())
    }

    #[test]
    fn payload_can_override_default_keys() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let writer = EventWriter::new(temp.path().join("events.jsonl"), "analysis-1");

        let mut payload = EventPayload::new();
        payload.insert("run_id".to_string(), Value::String("override".to_string()));
        let emitted = writer.emit("analysis_started", payload)?;

        assert_eq!(emitted["run_id"], Value::String("override".to_string()));
        Ok(())
    }

    #[test]
    fn progress_events_append_in_order() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("nested").join("events.jsonl");
        let writer = EventWriter::new(&path, "analysis-2");

        writer.emit_progress(AnalysisPhase::Requesting, &AnalysisResult::pending())?;
        writer.emit_progress(AnalysisPhase::Completed, &AnalysisResult::fallback())?;

        let content = fs::read_to_string(&path)?;
        let rows: Vec<Value> = content
            .lines()
            .map(serde_json::from_str::<Value>)
            .collect::<Result<_, _>>()?;
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0]["type"], Value::String(PROGRESS_EVENT.to_string()));
        assert_eq!(rows[0]["phase"], Value::String("requesting".to_string()));
        assert_eq!(rows[0]["result"]["isLoading"], Value::Bool(true));
        assert_eq!(rows[1]["phase"], Value::String("completed".to_string()));
        assert_eq!(rows[1]["result"]["repairEstimate"], Value::String("TBD".to_string()));
        Ok(())
    }
}
