//! Decision Trace: the append-only record of one request's source attempts.
//!
//! A [`TraceRecorder`] is owned by exactly one request. Finalizing consumes
//! it and yields an immutable [`DecisionTrace`], which is handed to a
//! [`TraceSink`] exactly once.

use chrono::{DateTime, Utc};
use pipeline::{Fingerprint, SourceKind};
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, SyncSender, TrySendError};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// Orchestrator states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineState {
    Start,
    Fingerprinting,
    /// Index into the attempted sources; 0 is the cache probe
    SourceAttempt(usize),
    Merging,
    TraceFinalized,
    Done,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptOutcome {
    Hit,
    Miss,
    Error,
    SkippedByQuota,
    /// An earlier source already answered, or the source is disabled
    NotAttempted,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceAttempt {
    pub source: SourceKind,
    pub outcome: AttemptOutcome,
    pub latency_ms: f64,
    pub reason: String,
    pub record_count: usize,
    /// Set on hits whose records are lower-confidence
    #[serde(default)]
    pub low_confidence: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Results,
    NoResults,
    Failed,
}

/// Finalized, immutable trace for one request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionTrace {
    pub correlation_id: String,
    pub fingerprint: Option<Fingerprint>,
    pub started_at: DateTime<Utc>,
    pub states: Vec<PipelineState>,
    pub attempts: Vec<SourceAttempt>,
    pub status: RunStatus,
    pub served_from: Option<SourceKind>,
    pub result_count: usize,
    pub total_latency_ms: f64,
}

impl DecisionTrace {
    pub fn attempt(&self, source: SourceKind) -> Option<&SourceAttempt> {
        self.attempts.iter().find(|a| a.source == source)
    }

    /// `(source, outcome)` pairs in attempt order
    pub fn outcomes(&self) -> Vec<(SourceKind, AttemptOutcome)> {
        self.attempts.iter().map(|a| (a.source, a.outcome)).collect()
    }
}

fn millis(duration: Duration) -> f64 {
    (duration.as_secs_f64() * 1000.0 * 100.0).round() / 100.0
}

pub struct TraceRecorder {
    correlation_id: String,
    fingerprint: Option<Fingerprint>,
    started_at: DateTime<Utc>,
    started: Instant,
    states: Vec<PipelineState>,
    attempts: Vec<SourceAttempt>,
}

impl TraceRecorder {
    pub fn start(correlation_id: impl Into<String>) -> Self {
        Self {
            correlation_id: correlation_id.into(),
            fingerprint: None,
            started_at: Utc::now(),
            started: Instant::now(),
            states: vec![PipelineState::Start],
            attempts: Vec::new(),
        }
    }

    pub fn correlation_id(&self) -> &str {
        &self.correlation_id
    }

    pub fn state(&self) -> PipelineState {
        self.states.last().copied().unwrap_or(PipelineState::Start)
    }

    pub fn enter(&mut self, state: PipelineState) {
        self.states.push(state);
    }

    pub fn set_fingerprint(&mut self, fingerprint: Fingerprint) {
        self.fingerprint = Some(fingerprint);
    }

    pub fn record(
        &mut self,
        source: SourceKind,
        outcome: AttemptOutcome,
        latency: Duration,
        reason: impl Into<String>,
        record_count: usize,
    ) {
        self.attempts.push(SourceAttempt {
            source,
            outcome,
            latency_ms: millis(latency),
            reason: reason.into(),
            record_count,
            low_confidence: false,
        });
    }

    /// Flag the most recent attempt as lower-confidence
    pub fn mark_low_confidence(&mut self) {
        if let Some(last) = self.attempts.last_mut() {
            last.low_confidence = true;
        }
    }

    /// Close the trace. A failed run ends in `Failed`; any other run ends in
    /// `TraceFinalized` then `Done`, since nothing is appended after this.
    pub fn finalize(mut self, status: RunStatus, served_from: Option<SourceKind>, result_count: usize) -> DecisionTrace {
        match status {
            RunStatus::Failed => self.states.push(PipelineState::Failed),
            RunStatus::Results | RunStatus::NoResults => {
                self.states.push(PipelineState::TraceFinalized);
                self.states.push(PipelineState::Done);
            }
        }

        DecisionTrace {
            correlation_id: self.correlation_id,
            fingerprint: self.fingerprint,
            started_at: self.started_at,
            states: self.states,
            attempts: self.attempts,
            status,
            served_from,
            result_count,
            total_latency_ms: millis(self.started.elapsed()),
        }
    }
}

/// Observability boundary: receives one finalized trace per request
pub trait TraceSink: Send + Sync {
    fn emit(&self, trace: &DecisionTrace);
}

/// Logs each trace as one structured `info` event on target `bookrecs::trace`
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl TraceSink for TracingSink {
    fn emit(&self, trace: &DecisionTrace) {
        let payload = serde_json::to_string(trace).unwrap_or_else(|e| format!("<unserializable: {e}>"));
        info!(
            target: "bookrecs::trace",
            correlation_id = %trace.correlation_id,
            fingerprint = trace.fingerprint.as_ref().map(|f| f.as_str()).unwrap_or(""),
            status = ?trace.status,
            result_count = trace.result_count,
            total_latency_ms = trace.total_latency_ms,
            trace = %payload,
            "Decision trace finalized"
        );
    }
}

/// Lines queued for the writer thread before new traces are dropped
const JSONL_QUEUE_CAPACITY: usize = 1024;

enum WriterCommand {
    Line(String),
    Flush(mpsc::Sender<()>),
}

/// Appends one JSON line per trace to a developer log file.
///
/// `emit` only serializes and enqueues; a dedicated thread owns the file.
/// When the queue is full the trace is dropped with a warning rather than
/// blocking the request.
pub struct JsonLinesSink {
    path: PathBuf,
    sender: Option<SyncSender<WriterCommand>>,
    writer: Option<JoinHandle<()>>,
}

impl JsonLinesSink {
    pub fn open(path: &Path) -> std::io::Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let (sender, receiver) = mpsc::sync_channel(JSONL_QUEUE_CAPACITY);
        let log_path = path.to_path_buf();
        let writer = thread::Builder::new()
            .name("trace-writer".to_string())
            .spawn(move || write_lines(file, &log_path, &receiver))?;

        Ok(Self {
            path: path.to_path_buf(),
            sender: Some(sender),
            writer: Some(writer),
        })
    }

    /// Block until every line queued so far has been written
    pub fn flush(&self) {
        let Some(sender) = &self.sender else { return };
        let (ack, done) = mpsc::channel();
        if sender.send(WriterCommand::Flush(ack)).is_ok() {
            let _ = done.recv();
        }
    }
}

fn write_lines(file: File, path: &Path, receiver: &mpsc::Receiver<WriterCommand>) {
    let mut out = BufWriter::new(file);
    while let Ok(command) = receiver.recv() {
        let result = match command {
            WriterCommand::Line(line) => writeln!(out, "{line}"),
            WriterCommand::Flush(ack) => {
                let result = out.flush();
                let _ = ack.send(());
                result
            }
        };
        if let Err(e) = result {
            warn!("Could not write trace to {}: {}", path.display(), e);
        }
    }
    if let Err(e) = out.flush() {
        warn!("Could not flush trace log {}: {}", path.display(), e);
    }
}

impl TraceSink for JsonLinesSink {
    fn emit(&self, trace: &DecisionTrace) {
        let line = match serde_json::to_string(trace) {
            Ok(line) => line,
            Err(e) => {
                warn!("Could not serialize trace {}: {}", trace.correlation_id, e);
                return;
            }
        };
        let Some(sender) = &self.sender else { return };
        match sender.try_send(WriterCommand::Line(line)) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                warn!("Trace log {} is backed up, dropping trace {}", self.path.display(), trace.correlation_id)
            }
            Err(TrySendError::Disconnected(_)) => {
                warn!("Trace writer for {} has stopped", self.path.display())
            }
        }
    }
}

impl Drop for JsonLinesSink {
    fn drop(&mut self) {
        // Closing the channel lets the writer drain and exit
        self.sender.take();
        if let Some(writer) = self.writer.take() {
            let _ = writer.join();
        }
    }
}

/// Collects traces in memory
#[derive(Debug, Default)]
pub struct MemorySink {
    traces: Mutex<Vec<DecisionTrace>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn traces(&self) -> Vec<DecisionTrace> {
        self.traces.lock().unwrap_or_else(|poisoned| poisoned.into_inner()).clone()
    }

    pub fn len(&self) -> usize {
        self.traces.lock().unwrap_or_else(|poisoned| poisoned.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn last(&self) -> Option<DecisionTrace> {
        self.traces.lock().unwrap_or_else(|poisoned| poisoned.into_inner()).last().cloned()
    }
}

impl TraceSink for MemorySink {
    fn emit(&self, trace: &DecisionTrace) {
        self.traces
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(trace.clone());
    }
}

/// Forwards every trace to each inner sink
#[derive(Default, Clone)]
pub struct FanoutSink {
    sinks: Vec<Arc<dyn TraceSink>>,
}

impl FanoutSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_sink(mut self, sink: Arc<dyn TraceSink>) -> Self {
        self.sinks.push(sink);
        self
    }
}

impl TraceSink for FanoutSink {
    fn emit(&self, trace: &DecisionTrace) {
        for sink in &self.sinks {
            sink.emit(trace);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use data_loader::QueryFilters;
    use pipeline::fingerprint;

    fn sample_trace(status: RunStatus) -> DecisionTrace {
        let mut recorder = TraceRecorder::start("cid-1");
        recorder.enter(PipelineState::Fingerprinting);
        recorder.set_fingerprint(fingerprint(&QueryFilters::unconstrained()));
        recorder.enter(PipelineState::SourceAttempt(0));
        recorder.record(SourceKind::Cache, AttemptOutcome::Miss, Duration::from_micros(1500), "no entry", 0);
        recorder.enter(PipelineState::SourceAttempt(1));
        recorder.record(SourceKind::Store, AttemptOutcome::Hit, Duration::from_millis(3), "2 qualifying rows", 2);
        recorder.enter(PipelineState::Merging);
        recorder.finalize(status, Some(SourceKind::Store), 2)
    }

    #[test]
    fn test_recorder_builds_ordered_trace() {
        let trace = sample_trace(RunStatus::Results);

        assert_eq!(trace.correlation_id, "cid-1");
        assert!(trace.fingerprint.is_some());
        assert_eq!(
            trace.outcomes(),
            vec![
                (SourceKind::Cache, AttemptOutcome::Miss),
                (SourceKind::Store, AttemptOutcome::Hit),
            ]
        );
        assert_eq!(trace.attempt(SourceKind::Cache).unwrap().latency_ms, 1.5);
        assert_eq!(trace.states.first(), Some(&PipelineState::Start));
        assert_eq!(
            &trace.states[trace.states.len() - 2..],
            &[PipelineState::TraceFinalized, PipelineState::Done]
        );
        assert!(trace.total_latency_ms >= 0.0);
    }

    #[test]
    fn test_failed_run_ends_in_failed_state() {
        let trace = sample_trace(RunStatus::Failed);
        assert_eq!(trace.states.last(), Some(&PipelineState::Failed));
    }

    #[test]
    fn test_low_confidence_marks_last_attempt() {
        let mut recorder = TraceRecorder::start("cid-2");
        recorder.record(SourceKind::Retrieval, AttemptOutcome::Hit, Duration::ZERO, "3 candidates", 3);
        recorder.mark_low_confidence();
        let trace = recorder.finalize(RunStatus::Results, Some(SourceKind::Retrieval), 3);
        assert!(trace.attempts[0].low_confidence);
    }

    #[test]
    fn test_trace_serializes_with_snake_case_labels() {
        let json = serde_json::to_value(sample_trace(RunStatus::Results)).unwrap();
        assert_eq!(json["attempts"][0]["source"], "cache");
        assert_eq!(json["attempts"][0]["outcome"], "miss");
        assert_eq!(json["states"][2]["source_attempt"], 0);
        assert_eq!(json["status"], "results");
    }

    #[test]
    fn test_jsonl_sink_appends_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logs").join("traces.jsonl");

        let sink = JsonLinesSink::open(&path).unwrap();
        sink.emit(&sample_trace(RunStatus::Results));
        sink.emit(&sample_trace(RunStatus::NoResults));
        sink.flush();

        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<_> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        let parsed: DecisionTrace = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(parsed.status, RunStatus::NoResults);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn test_jsonl_queued_lines_are_written_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("traces.jsonl");
        let sink = JsonLinesSink::open(&path).unwrap();

        for _ in 0..50 {
            sink.emit(&sample_trace(RunStatus::Results));
        }

        // Dropping drains the queue before the writer exits
        drop(sink);
        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content.lines().count(), 50);
    }

    #[test]
    fn test_fanout_reaches_every_sink() {
        let a = Arc::new(MemorySink::new());
        let b = Arc::new(MemorySink::new());
        let fanout = FanoutSink::new().with_sink(a.clone()).with_sink(b.clone());

        fanout.emit(&sample_trace(RunStatus::Results));
        assert_eq!(a.len(), 1);
        assert_eq!(b.len(), 1);
        assert_eq!(a.last().unwrap().correlation_id, "cid-1");
    }
}
