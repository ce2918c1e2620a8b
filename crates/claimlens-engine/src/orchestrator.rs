//! Runs one analysis: request, parse, report.
//!
//! Every call to [`AnalysisOrchestrator::analyze`] reports at least twice
//! through the optional sink: a loading snapshot before the request goes out
//! and exactly one terminal snapshot (`is_loading == false`) at the end,
//! whether the attempt succeeded or failed. Failures are also returned to the
//! caller unchanged. Nothing is retried.

use claimlens_contracts::analysis::{
    extract_structured, to_analysis_result, AnalysisPhase, AnalysisResult,
};
use claimlens_contracts::events::EventWriter;

use crate::error::AnalysisError;
use crate::inference::InferenceClient;
use crate::ingestion::ImageRecord;

/// Receives progress snapshots in order: start, then terminal.
pub trait ProgressSink: Send {
    fn emit(&mut self, snapshot: AnalysisResult);
}

impl<F> ProgressSink for F
where
    F: FnMut(AnalysisResult) + Send,
{
    fn emit(&mut self, snapshot: AnalysisResult) {
        self(snapshot)
    }
}

/// Fans every snapshot out to two sinks.
pub struct Tee<A, B>(pub A, pub B);

impl<A, B> ProgressSink for Tee<A, B>
where
    A: ProgressSink,
    B: ProgressSink,
{
    fn emit(&mut self, snapshot: AnalysisResult) {
        self.0.emit(snapshot.clone());
        self.1.emit(snapshot);
    }
}

/// Appends each snapshot to `events.jsonl` as an `analysis_progress` event.
///
/// Writes are synchronous `std::fs` appends behind a `std::sync::Mutex`, so
/// `emit` blocks the calling task for the duration of one small write.
#[derive(Debug, Clone)]
pub struct JsonlProgressSink {
    writer: EventWriter,
}

impl JsonlProgressSink {
    pub fn new(writer: EventWriter) -> Self {
        Self { writer }
    }
}

impl ProgressSink for JsonlProgressSink {
    fn emit(&mut self, snapshot: AnalysisResult) {
        let phase = if snapshot.is_loading {
            AnalysisPhase::Requesting
        } else if snapshot.error.is_some() {
            AnalysisPhase::Failed
        } else {
            AnalysisPhase::Completed
        };
        if let Err(err) = self.writer.emit_progress(phase, &snapshot) {
            log::warn!(
                "PROGRESS_EVENT_WRITE_FAILED path={} error={err:#}",
                self.writer.path().display()
            );
        }
    }
}

pub struct AnalysisOrchestrator {
    client: InferenceClient,
}

impl AnalysisOrchestrator {
    pub fn new(client: InferenceClient) -> Self {
        Self { client }
    }

    pub fn client(&self) -> &InferenceClient {
        &self.client
    }

    pub async fn analyze(
        &self,
        preview_uri: &str,
        api_key: &str,
        on_progress: Option<&mut dyn ProgressSink>,
    ) -> Result<AnalysisResult, AnalysisError> {
        let mut run = AnalysisRun::new(on_progress);
        run.start();

        match self.execute(&mut run, preview_uri, api_key).await {
            Ok(result) => {
                log::info!(
                    "ANALYSIS_COMPLETED provider={} determined_fields={}",
                    self.client.config().provider,
                    result.determined_count()
                );
                run.finish(AnalysisPhase::Completed, result.clone());
                Ok(result)
            }
            Err(err) => {
                let classification = err.classification();
                log::warn!(
                    "ANALYSIS_FAILED provider={} category={} error={}",
                    self.client.config().provider,
                    classification.category,
                    err
                );
                run.finish(
                    AnalysisPhase::Failed,
                    AnalysisResult::failed(classification.headline()),
                );
                Err(err)
            }
        }
    }

    pub async fn analyze_image(
        &self,
        image: &ImageRecord,
        api_key: &str,
        on_progress: Option<&mut dyn ProgressSink>,
    ) -> Result<AnalysisResult, AnalysisError> {
        log::debug!(
            "ANALYSIS_IMAGE name={} bytes={}",
            image.display_name(),
            image.byte_size()
        );
        self.analyze(image.preview_uri(), api_key, on_progress).await
    }

    async fn execute(
        &self,
        run: &mut AnalysisRun<'_>,
        preview_uri: &str,
        api_key: &str,
    ) -> Result<AnalysisResult, AnalysisError> {
        let body = self.client.request_analysis(api_key, preview_uri).await?;
        run.advance(AnalysisPhase::Parsing);

        let text = self.client.completion_text(&body);
        let fields = extract_structured(&text);
        if fields.is_none() {
            log::warn!(
                "ANALYSIS_UNSTRUCTURED_REPLY chars={} falling_back=all_fields",
                text.chars().count()
            );
        }
        Ok(to_analysis_result(fields.as_ref(), false))
    }
}

/// Phase tracking and sink delivery for a single invocation.
struct AnalysisRun<'a> {
    sink: Option<&'a mut dyn ProgressSink>,
    phase: AnalysisPhase,
}

impl<'a> AnalysisRun<'a> {
    fn new(sink: Option<&'a mut dyn ProgressSink>) -> Self {
        Self {
            sink,
            phase: AnalysisPhase::Idle,
        }
    }

    fn advance(&mut self, next: AnalysisPhase) -> bool {
        if !self.phase.can_advance_to(next) {
            log::debug!("ANALYSIS_PHASE_IGNORED from={} to={}", self.phase, next);
            return false;
        }
        log::debug!("ANALYSIS_PHASE from={} to={}", self.phase, next);
        self.phase = next;
        true
    }

    fn start(&mut self) {
        if self.advance(AnalysisPhase::Requesting) {
            self.deliver(AnalysisResult::pending());
        }
    }

    /// Delivers the terminal snapshot once; later calls are dropped.
    fn finish(&mut self, outcome: AnalysisPhase, snapshot: AnalysisResult) {
        if self.phase.is_terminal() {
            return;
        }
        if self.advance(outcome) {
            self.deliver(snapshot);
        }
    }

    fn deliver(&mut self, snapshot: AnalysisResult) {
        if let Some(sink) = self.sink.as_mut() {
            sink.emit(snapshot);
        }
    }
}
