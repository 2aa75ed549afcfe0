use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{mpsc, Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::trace;

use crate::executor::{AnalysisResponse, InsightStatus};

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

static TASK_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Generates an identifier for one analysis run.
pub fn new_task_id() -> String {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or_default();
    let seq = TASK_COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("task-{millis}-{seq}")
}

pub(crate) fn bytes_to_mb(bytes: u64) -> f64 {
    bytes as f64 / BYTES_PER_MB
}

/// A single notification describing scan state.
#[derive(Debug, Clone, Serialize)]
pub struct ProgressEvent {
    pub task_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub insight_id: Option<String>,
    /// RFC 3339 timestamp with millisecond precision
    pub timestamp: String,
    #[serde(flatten)]
    pub kind: EventKind,
}

/// Payload of a [`ProgressEvent`], serialized with a `type` tag.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventKind {
    FileVerification {
        file_path: PathBuf,
        exists: bool,
        file_size_mb: f64,
    },
    InsightStart {
        insight_name: String,
        total_files: usize,
    },
    FileOpen {
        file_path: PathBuf,
        file_index: usize,
        total_files: usize,
        file_size_mb: f64,
    },
    FileChunk {
        file_path: PathBuf,
        file_index: usize,
        total_files: usize,
        chunk_index: u64,
        bytes_read: u64,
    },
    InsightProgress {
        file_path: PathBuf,
        file_index: usize,
        total_files: usize,
        lines_processed: u64,
    },
    InsightComplete {
        status: InsightStatus,
        total_count: usize,
        execution_time_ms: u128,
    },
    AnalysisComplete {
        completed: usize,
        failed: usize,
        cancelled: usize,
    },
    Cancelled {
        reason: String,
    },
    Error {
        error_kind: String,
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        file_path: Option<PathBuf>,
    },
    Result {
        response: Box<AnalysisResponse>,
    },
}

impl EventKind {
    /// The wire name of this event type.
    pub fn name(&self) -> &'static str {
        match self {
            EventKind::FileVerification { .. } => "file_verification",
            EventKind::InsightStart { .. } => "insight_start",
            EventKind::FileOpen { .. } => "file_open",
            EventKind::FileChunk { .. } => "file_chunk",
            EventKind::InsightProgress { .. } => "insight_progress",
            EventKind::InsightComplete { .. } => "insight_complete",
            EventKind::AnalysisComplete { .. } => "analysis_complete",
            EventKind::Cancelled { .. } => "cancelled",
            EventKind::Error { .. } => "error",
            EventKind::Result { .. } => "result",
        }
    }
}

/// Destination for progress events.
///
/// Sinks are shared by every concurrently running insight, so calls arrive
/// interleaved from several threads. Ordering is only guaranteed per
/// (insight, file) pair; consumers key events by `task_id`/`insight_id`.
pub trait ProgressSink: Send + Sync {
    fn emit(&self, event: ProgressEvent);
}

impl<F> ProgressSink for F
where
    F: Fn(ProgressEvent) + Send + Sync,
{
    fn emit(&self, event: ProgressEvent) {
        self(event)
    }
}

impl ProgressSink for mpsc::Sender<ProgressEvent> {
    fn emit(&self, event: ProgressEvent) {
        // A dropped receiver means nobody is listening anymore.
        let _ = self.send(event);
    }
}

/// Discards every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl ProgressSink for NullSink {
    fn emit(&self, _event: ProgressEvent) {}
}

/// Buffers events in memory, in arrival order.
#[derive(Debug, Default)]
pub struct CollectingSink {
    events: Mutex<Vec<ProgressEvent>>,
}

impl CollectingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of everything emitted so far.
    pub fn events(&self) -> Vec<ProgressEvent> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }

    /// Names of the emitted event types, in order.
    pub fn kinds(&self) -> Vec<&'static str> {
        self.events
            .lock()
            .map(|events| events.iter().map(|e| e.kind.name()).collect())
            .unwrap_or_default()
    }
}

impl ProgressSink for CollectingSink {
    fn emit(&self, event: ProgressEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}

/// Stamps events with task and insight identifiers before handing them to a sink.
#[derive(Clone)]
pub struct ProgressReporter {
    sink: Arc<dyn ProgressSink>,
    task_id: Arc<str>,
    insight_id: Option<Arc<str>>,
}

impl std::fmt::Debug for ProgressReporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgressReporter")
            .field("task_id", &self.task_id)
            .field("insight_id", &self.insight_id)
            .finish()
    }
}

impl ProgressReporter {
    pub fn new(sink: Arc<dyn ProgressSink>, task_id: impl Into<Arc<str>>) -> Self {
        Self {
            sink,
            task_id: task_id.into(),
            insight_id: None,
        }
    }

    /// A reporter that drops everything, for callers that do not care about progress.
    pub fn silent() -> Self {
        Self::new(Arc::new(NullSink), "silent")
    }

    /// Derives a reporter whose events carry `insight_id`.
    pub fn for_insight(&self, insight_id: &str) -> Self {
        Self {
            sink: Arc::clone(&self.sink),
            task_id: Arc::clone(&self.task_id),
            insight_id: Some(Arc::from(insight_id)),
        }
    }

    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    pub fn insight_id(&self) -> Option<&str> {
        self.insight_id.as_deref()
    }

    pub fn emit(&self, kind: EventKind) {
        trace!("Emitting {} event", kind.name());
        self.sink.emit(ProgressEvent {
            task_id: self.task_id.to_string(),
            insight_id: self.insight_id.as_deref().map(str::to_string),
            timestamp: humantime::format_rfc3339_millis(SystemTime::now()).to_string(),
            kind,
        });
    }

    pub(crate) fn error(&self, err: &crate::errors::ScanError, file_path: Option<&Path>) {
        self.emit(EventKind::Error {
            error_kind: err.kind().to_string(),
            message: err.to_string(),
            file_path: file_path.map(Path::to_path_buf),
        });
    }
}

/// Position of a file within the scan list of one insight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FilePosition {
    /// Zero-based index
    pub index: usize,
    pub total: usize,
}

impl FilePosition {
    pub fn new(index: usize, total: usize) -> Self {
        Self { index, total }
    }

    pub fn single() -> Self {
        Self::new(0, 1)
    }
}

/// Shared, cooperatively polled request to stop scanning.
///
/// Clones observe the same flag. Cancelling is idempotent and cannot be undone;
/// a new analysis run needs a fresh token.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_cancellation_token_shared_between_clones() {
        let token = CancellationToken::new();
        let other = token.clone();
        assert!(!other.is_cancelled());

        let handle = thread::spawn(move || other.cancel());
        handle.join().unwrap();

        assert!(token.is_cancelled());
        token.cancel();
        assert!(token.is_cancelled());
    }

    #[test]
    fn test_reporter_stamps_identifiers() {
        let sink = Arc::new(CollectingSink::new());
        let reporter = ProgressReporter::new(sink.clone(), "task-1");
        reporter.emit(EventKind::Cancelled {
            reason: "user".to_string(),
        });
        reporter.for_insight("errors").emit(EventKind::InsightStart {
            insight_name: "Errors".to_string(),
            total_files: 3,
        });

        let events = sink.events();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].task_id, "task-1");
        assert_eq!(events[0].insight_id, None);
        assert_eq!(events[1].insight_id.as_deref(), Some("errors"));
        assert_eq!(sink.kinds(), vec!["cancelled", "insight_start"]);
    }

    #[test]
    fn test_event_serializes_with_type_tag() {
        let sink = Arc::new(CollectingSink::new());
        let reporter = ProgressReporter::new(sink.clone(), "task-2").for_insight("warn");
        reporter.emit(EventKind::InsightProgress {
            file_path: PathBuf::from("/var/log/app.log"),
            file_index: 0,
            total_files: 2,
            lines_processed: 10_000,
        });

        let json = serde_json::to_value(&sink.events()[0]).unwrap();
        assert_eq!(json["type"], "insight_progress");
        assert_eq!(json["task_id"], "task-2");
        assert_eq!(json["insight_id"], "warn");
        assert_eq!(json["lines_processed"], 10_000);
        assert!(json["timestamp"].as_str().unwrap().ends_with('Z'));
    }

    #[test]
    fn test_closure_and_channel_sinks() {
        let (tx, rx) = mpsc::channel();
        let reporter = ProgressReporter::new(Arc::new(tx), "task-3");
        reporter.emit(EventKind::Cancelled {
            reason: "stop".to_string(),
        });
        assert_eq!(rx.recv().unwrap().kind.name(), "cancelled");

        let count = Arc::new(AtomicU64::new(0));
        let seen = Arc::clone(&count);
        let reporter = ProgressReporter::new(
            Arc::new(move |_event: ProgressEvent| {
                seen.fetch_add(1, Ordering::Relaxed);
            }),
            "task-4",
        );
        reporter.emit(EventKind::Cancelled {
            reason: "stop".to_string(),
        });
        assert_eq!(count.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_task_ids_are_unique() {
        assert_ne!(new_task_id(), new_task_id());
    }
}
