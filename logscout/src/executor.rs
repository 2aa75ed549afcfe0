/// Runs many insights over one file set.
///
/// Every insight is an independent unit of work on the rayon pool. Within a
/// filter insight, files fan out on a dedicated pool bounded by
/// `max_file_concurrency` and are collected back by index, so a
/// [`FilterResult`] always lists files in input order.
///
/// Nothing that goes wrong inside one insight (a bad regex, an unreadable file,
/// a panicking custom computation) escapes it: the failure is attached to that
/// insight's [`InsightRun`] and its siblings carry on.
///
/// Event flow for one run:
///
/// ```text
/// [file_verification]*            (analyze only)
/// per insight, interleaved:
///     insight_start
///     (file_open (file_chunk | insight_progress)* | error)*
///     insight_complete
/// analysis_complete | cancelled
/// result
/// ```
use dashmap::DashMap;
use rayon::prelude::*;
use serde::Serialize;
use std::any::Any;
use std::collections::HashSet;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::errors::{ScanError, ScanResult};
use crate::filters::{FileFilter, FileTarget, ScanSet};
use crate::progress::{
    new_task_id, CancellationToken, EventKind, FilePosition, ProgressReporter, ProgressSink,
};
use crate::results::{serialize_secs, FilterResult};
use crate::search::{LineFilter, RipgrepProbe};
use crate::spec::{FilterSpec, FilterSpecConfig};

/// Lifecycle of one insight within a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InsightStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl InsightStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

/// What a custom computation gets to work with
pub struct CustomContext<'a> {
    pub files: &'a [FileTarget],
    pub line_filter: &'a LineFilter,
    pub reporter: &'a ProgressReporter,
    pub cancel: &'a CancellationToken,
}

/// An arbitrary computation over the resolved file list
pub type CustomComputation =
    Arc<dyn Fn(&CustomContext<'_>) -> ScanResult<serde_json::Value> + Send + Sync>;

/// How an insight produces its output
#[derive(Clone)]
pub enum InsightDefinition {
    Filter(FilterSpecConfig),
    Custom(CustomComputation),
}

impl std::fmt::Debug for InsightDefinition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Filter(config) => f.debug_tuple("Filter").field(config).finish(),
            Self::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

/// A named computation to run over the file set
#[derive(Debug, Clone)]
pub struct Insight {
    pub id: String,
    pub name: String,
    pub description: String,
    pub definition: InsightDefinition,
}

impl Insight {
    pub fn filter(id: impl Into<String>, name: impl Into<String>, spec: FilterSpecConfig) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: String::new(),
            definition: InsightDefinition::Filter(spec),
        }
    }

    pub fn custom<F>(id: impl Into<String>, name: impl Into<String>, compute: F) -> Self
    where
        F: Fn(&CustomContext<'_>) -> ScanResult<serde_json::Value> + Send + Sync + 'static,
    {
        Self {
            id: id.into(),
            name: name.into(),
            description: String::new(),
            definition: InsightDefinition::Custom(Arc::new(compute)),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }
}

/// Output of a finished (or partially finished) insight
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum InsightOutput {
    Filter(FilterResult),
    Custom(serde_json::Value),
}

impl InsightOutput {
    fn total_count(&self) -> usize {
        match self {
            Self::Filter(result) => result.get_total_line_count(),
            Self::Custom(value) => value.as_array().map_or(0, Vec::len),
        }
    }
}

/// Structured failure attached to an insight
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InsightError {
    pub kind: String,
    pub message: String,
}

impl From<&ScanError> for InsightError {
    fn from(err: &ScanError) -> Self {
        Self {
            kind: err.kind().to_string(),
            message: err.to_string(),
        }
    }
}

/// Result of one insight within an analysis
#[derive(Debug, Clone, Serialize)]
pub struct InsightRun {
    pub insight_id: String,
    pub name: String,
    pub description: String,
    pub status: InsightStatus,
    /// Wall-clock time from start to terminal state, I/O included
    #[serde(serialize_with = "serialize_secs")]
    pub execution_time: Duration,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<InsightOutput>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<InsightError>,
}

impl InsightRun {
    /// The filter output, if this was a filter insight that produced one
    pub fn filter_result(&self) -> Option<&FilterResult> {
        match &self.output {
            Some(InsightOutput::Filter(result)) => Some(result),
            _ => None,
        }
    }
}

/// The aggregated payload of an analysis
#[derive(Debug, Clone, Serialize)]
pub struct AnalysisResponse {
    pub task_id: String,
    /// `completed`, or `cancelled` if any insight was cut short
    pub status: InsightStatus,
    pub insights: Vec<InsightRun>,
    pub files: Vec<FileTarget>,
    pub invalid_paths: Vec<PathBuf>,
    #[serde(serialize_with = "serialize_secs")]
    pub execution_time: Duration,
}

impl AnalysisResponse {
    pub fn insight(&self, insight_id: &str) -> Option<&InsightRun> {
        self.insights.iter().find(|run| run.insight_id == insight_id)
    }

    pub fn count(&self, status: InsightStatus) -> usize {
        self.insights.iter().filter(|run| run.status == status).count()
    }
}

/// Work resolved before an insight starts scanning
enum Prepared<'a> {
    Filter {
        spec: FilterSpec,
        targets: Vec<&'a FileTarget>,
    },
    Custom(&'a CustomComputation),
}

/// Executes insights concurrently and aggregates their results
pub struct InsightExecutor {
    config: EngineConfig,
    line_filter: LineFilter,
    file_pool: rayon::ThreadPool,
    states: Arc<DashMap<String, InsightStatus>>,
}

impl std::fmt::Debug for InsightExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InsightExecutor")
            .field("config", &self.config)
            .field("line_filter", &self.line_filter)
            .finish()
    }
}

impl InsightExecutor {
    pub fn new(config: EngineConfig) -> ScanResult<Self> {
        config
            .validate()
            .map_err(|e| ScanError::config_error(e.to_string()))?;
        let file_pool = rayon::ThreadPoolBuilder::new()
            .num_threads(config.max_file_concurrency.get())
            .thread_name(|i| format!("logscout-file-{i}"))
            .build()
            .map_err(|e| ScanError::config_error(format!("failed to build file pool: {e}")))?;
        let line_filter = LineFilter::new(Arc::new(RipgrepProbe::new(config.ripgrep_path.clone())))
            .with_progress_interval(config.progress_interval_lines);

        Ok(Self {
            config,
            line_filter,
            file_pool,
            states: Arc::new(DashMap::new()),
        })
    }

    /// Replaces the line filter, e.g. to share a probe between executors
    pub fn with_line_filter(mut self, line_filter: LineFilter) -> Self {
        self.line_filter = line_filter;
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn line_filter(&self) -> &LineFilter {
        &self.line_filter
    }

    /// Current state of an insight in the most recent analysis.
    ///
    /// The board is reset when an analysis starts, so insights from earlier
    /// runs are no longer listed.
    pub fn status(&self, insight_id: &str) -> Option<InsightStatus> {
        self.states.get(insight_id).map(|state| *state)
    }

    /// Expands `paths` and runs `insights` over the result.
    ///
    /// Fails only when the inputs cannot be expanded at all; see
    /// [`FileFilter::expand`]. Emits a `file_verification` event for every
    /// resolved file and every invalid path before any insight starts.
    pub fn analyze<P: AsRef<Path>>(
        &self,
        paths: &[P],
        file_patterns: &[String],
        insights: &[Insight],
        sink: Arc<dyn ProgressSink>,
        cancel: &CancellationToken,
    ) -> ScanResult<AnalysisResponse> {
        let filter = FileFilter::new(file_patterns, &self.config.exclude_patterns)?;
        let set = filter.expand(paths)?;
        let reporter = ProgressReporter::new(sink, new_task_id());

        for target in &set.targets {
            reporter.emit(EventKind::FileVerification {
                file_path: target.path.clone(),
                exists: target.exists,
                file_size_mb: target.size_mb(),
            });
        }
        for path in &set.invalid_paths {
            reporter.emit(EventKind::FileVerification {
                file_path: path.clone(),
                exists: false,
                file_size_mb: 0.0,
            });
        }

        Ok(self.execute(&reporter, insights, set, cancel))
    }

    /// Runs `insights` over an already resolved file list.
    ///
    /// Always returns a response: per-insight failures are reported in the
    /// corresponding [`InsightRun`].
    pub fn run(
        &self,
        insights: &[Insight],
        files: &[FileTarget],
        sink: Arc<dyn ProgressSink>,
        cancel: &CancellationToken,
    ) -> AnalysisResponse {
        let reporter = ProgressReporter::new(sink, new_task_id());
        let set = ScanSet {
            targets: files.to_vec(),
            invalid_paths: Vec::new(),
        };
        self.execute(&reporter, insights, set, cancel)
    }

    fn execute(
        &self,
        reporter: &ProgressReporter,
        insights: &[Insight],
        set: ScanSet,
        cancel: &CancellationToken,
    ) -> AnalysisResponse {
        let start = Instant::now();
        info!(
            "Starting analysis {} with {} insights over {} files",
            reporter.task_id(),
            insights.len(),
            set.targets.len()
        );

        self.states.clear();
        let mut seen = HashSet::new();
        let duplicates: Vec<bool> = insights
            .iter()
            .map(|insight| !seen.insert(insight.id.as_str()))
            .collect();
        for insight in insights {
            self.states.insert(insight.id.clone(), InsightStatus::Pending);
        }

        let runs: Vec<InsightRun> = insights
            .par_iter()
            .zip(duplicates.par_iter())
            .map(|(insight, &duplicate)| {
                self.run_insight(insight, duplicate, &set.targets, reporter, cancel)
            })
            .collect();

        let completed = runs.iter().filter(|r| r.status == InsightStatus::Completed).count();
        let failed = runs.iter().filter(|r| r.status == InsightStatus::Failed).count();
        let cancelled = runs.iter().filter(|r| r.status == InsightStatus::Cancelled).count();

        let status = if cancelled > 0 {
            reporter.emit(EventKind::Cancelled {
                reason: "cancellation requested".to_string(),
            });
            InsightStatus::Cancelled
        } else {
            reporter.emit(EventKind::AnalysisComplete {
                completed,
                failed,
                cancelled,
            });
            InsightStatus::Completed
        };

        let response = AnalysisResponse {
            task_id: reporter.task_id().to_string(),
            status,
            insights: runs,
            files: set.targets,
            invalid_paths: set.invalid_paths,
            execution_time: start.elapsed(),
        };

        self.line_filter.metrics().log_stats();
        info!(
            "Analysis {} finished in {}: {} completed, {} failed, {} cancelled",
            response.task_id,
            humantime::format_duration(response.execution_time),
            completed,
            failed,
            cancelled
        );

        reporter.emit(EventKind::Result {
            response: Box::new(response.clone()),
        });
        response
    }

    fn set_state(&self, insight_id: &str, status: InsightStatus) {
        self.states.insert(insight_id.to_string(), status);
    }

    /// Runs one insight to a terminal state. A `duplicate` shares its id with
    /// an earlier insight of the same analysis; it fails without touching the
    /// status board entry of the first one.
    fn run_insight(
        &self,
        insight: &Insight,
        duplicate: bool,
        files: &[FileTarget],
        reporter: &ProgressReporter,
        cancel: &CancellationToken,
    ) -> InsightRun {
        let start = Instant::now();
        let reporter = reporter.for_insight(&insight.id);
        if !duplicate {
            self.set_state(&insight.id, InsightStatus::Running);
        }

        let prepared = if duplicate {
            Err(ScanError::config_error(format!(
                "duplicate insight id '{}'",
                insight.id
            )))
        } else {
            self.prepare(insight, files)
        };
        let total_files = match &prepared {
            Ok(Prepared::Filter { targets, .. }) => targets.len(),
            _ => files.len(),
        };
        reporter.emit(EventKind::InsightStart {
            insight_name: insight.name.clone(),
            total_files,
        });

        let outcome = prepared.and_then(|prepared| {
            panic::catch_unwind(AssertUnwindSafe(|| {
                self.compute(prepared, files, &reporter, cancel)
            }))
            .unwrap_or_else(|payload| Err(ScanError::custom(panic_message(payload))))
        });

        let (status, output, error) = match outcome {
            Ok(output) => {
                let cut_short = match &output {
                    InsightOutput::Filter(result) => result.is_cancelled(),
                    InsightOutput::Custom(_) => false,
                };
                let status = if cut_short {
                    InsightStatus::Cancelled
                } else {
                    InsightStatus::Completed
                };
                (status, Some(output), None)
            }
            Err(e) if e.is_cancelled() => (InsightStatus::Cancelled, None, None),
            Err(e) => {
                warn!("Insight '{}' failed: {}", insight.id, e);
                reporter.error(&e, None);
                (InsightStatus::Failed, None, Some(InsightError::from(&e)))
            }
        };

        let execution_time = start.elapsed();
        if !duplicate {
            self.set_state(&insight.id, status);
        }
        reporter.emit(EventKind::InsightComplete {
            status,
            total_count: output.as_ref().map_or(0, InsightOutput::total_count),
            execution_time_ms: execution_time.as_millis(),
        });
        debug!(
            "Insight '{}' finished as {:?} in {}",
            insight.id,
            status,
            humantime::format_duration(execution_time)
        );

        InsightRun {
            insight_id: insight.id.clone(),
            name: insight.name.clone(),
            description: insight.description.clone(),
            status,
            execution_time,
            output,
            error,
        }
    }

    /// Compiles filter specs (no I/O happens before this succeeds) and picks
    /// the files each insight applies to.
    fn prepare<'a>(
        &self,
        insight: &'a Insight,
        files: &'a [FileTarget],
    ) -> ScanResult<Prepared<'a>> {
        match &insight.definition {
            InsightDefinition::Filter(config) => {
                let spec = self.apply_engine_defaults(config.clone()).compile()?;
                let targets = files.iter().filter(|t| spec.accepts_file(&t.path)).collect();
                Ok(Prepared::Filter { spec, targets })
            }
            InsightDefinition::Custom(compute) => Ok(Prepared::Custom(compute)),
        }
    }

    fn apply_engine_defaults(&self, mut config: FilterSpecConfig) -> FilterSpecConfig {
        config.chunk_size.get_or_insert(self.config.chunk_size);
        for flag in &self.config.ripgrep_extra_flags {
            if !config.ripgrep_flags.contains(flag) {
                config.ripgrep_flags.push(flag.clone());
            }
        }
        config
    }

    fn compute(
        &self,
        prepared: Prepared<'_>,
        files: &[FileTarget],
        reporter: &ProgressReporter,
        cancel: &CancellationToken,
    ) -> ScanResult<InsightOutput> {
        match prepared {
            Prepared::Filter { spec, targets } => Ok(InsightOutput::Filter(
                self.scan_files(&spec, &targets, reporter, cancel),
            )),
            Prepared::Custom(compute) => {
                if cancel.is_cancelled() {
                    return Err(ScanError::Cancelled);
                }
                let ctx = CustomContext {
                    files,
                    line_filter: &self.line_filter,
                    reporter,
                    cancel,
                };
                compute(&ctx).map(InsightOutput::Custom)
            }
        }
    }

    fn scan_files(
        &self,
        spec: &FilterSpec,
        targets: &[&FileTarget],
        reporter: &ProgressReporter,
        cancel: &CancellationToken,
    ) -> FilterResult {
        let total = targets.len();
        let outcomes: Vec<Option<ScanResult<_>>> = self.file_pool.install(|| {
            targets
                .par_iter()
                .enumerate()
                .map(|(index, target)| {
                    if cancel.is_cancelled() {
                        return None;
                    }
                    let position = FilePosition::new(index, total);
                    Some(self.line_filter.filter(target, spec, position, reporter, cancel))
                })
                .collect()
        });

        let mut result = FilterResult::new();
        for (target, outcome) in targets.iter().zip(outcomes) {
            match outcome {
                Some(Ok(matches)) => result.add_file_matches(matches),
                Some(Err(e)) => {
                    reporter.error(&e, Some(&target.path));
                    result.record_error(&target.path, &e);
                }
                // Skipped because the run was cancelled before this file started
                None => result.mark_cancelled(),
            }
        }

        if let Some(max_lines) = self.config.max_lines {
            result.truncate(max_lines);
        }
        result.freeze();
        result
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("insight panicked: {s}")
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("insight panicked: {s}")
    } else {
        "insight panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::{CollectingSink, ProgressEvent};
    use crate::spec::{ReadingMode, DEFAULT_CHUNK_SIZE};
    use std::fs;
    use std::num::NonZeroUsize;
    use tempfile::{tempdir, TempDir};

    const LOG: &str = "INFO start\nERROR disk full\nWARNING low mem\nERROR disk full\n";

    fn executor(max_lines: Option<usize>) -> InsightExecutor {
        let config = EngineConfig {
            max_file_concurrency: NonZeroUsize::new(4).unwrap(),
            max_lines,
            ripgrep_path: PathBuf::from("logscout-test-no-such-binary"),
            ..Default::default()
        };
        InsightExecutor::new(config).unwrap()
    }

    fn write_logs(dir: &TempDir, count: usize) -> Vec<FileTarget> {
        (0..count)
            .map(|i| {
                let path = dir.path().join(format!("app-{i:03}.log"));
                fs::write(&path, LOG).unwrap();
                FileTarget::from_path(&path)
            })
            .collect()
    }

    fn errors_insight() -> Insight {
        Insight::filter(
            "errors",
            "Errors",
            FilterSpecConfig::new("error").case_insensitive(true),
        )
    }

    #[test]
    fn test_invalid_regex_is_isolated() {
        let dir = tempdir().unwrap();
        let files = write_logs(&dir, 1);
        let sink = Arc::new(CollectingSink::new());
        let insights = vec![
            Insight::filter("broken", "Broken", FilterSpecConfig::new("([unclosed")),
            errors_insight(),
        ];

        let response = executor(None).run(&insights, &files, sink.clone(), &CancellationToken::new());

        let broken = response.insight("broken").unwrap();
        assert_eq!(broken.status, InsightStatus::Failed);
        assert_eq!(broken.error.as_ref().unwrap().kind, "config_error");
        assert!(broken.output.is_none());

        let errors = response.insight("errors").unwrap();
        assert_eq!(errors.status, InsightStatus::Completed);
        let result = errors.filter_result().unwrap();
        assert_eq!(result.get_total_line_count(), 2);
        assert_eq!(result.get_file_count(), 1);

        let kinds = sink.kinds();
        assert!(kinds.contains(&"analysis_complete"));
        assert_eq!(kinds.last(), Some(&"result"));
        assert_eq!(response.status, InsightStatus::Completed);
    }

    #[test]
    fn test_file_order_preserved_under_fan_out() {
        let dir = tempdir().unwrap();
        let files = write_logs(&dir, 24);
        let response = executor(None).run(
            &[errors_insight()],
            &files,
            Arc::new(crate::progress::NullSink),
            &CancellationToken::new(),
        );

        let result = response.insight("errors").unwrap().filter_result().unwrap();
        let order: Vec<&Path> = result.get_lines_by_file().into_iter().map(|(p, _)| p).collect();
        let expected: Vec<&Path> = files.iter().map(|f| f.path.as_path()).collect();
        assert_eq!(order, expected);
        assert_eq!(result.get_total_line_count(), 48);
        assert_eq!(result.files_scanned(), 24);
    }

    #[test]
    fn test_missing_file_recorded_not_fatal() {
        let dir = tempdir().unwrap();
        let mut files = write_logs(&dir, 1);
        files.push(FileTarget::from_path(&dir.path().join("gone.log")));
        let sink = Arc::new(CollectingSink::new());

        let response = executor(None).run(&[errors_insight()], &files, sink.clone(), &CancellationToken::new());

        let run = response.insight("errors").unwrap();
        assert_eq!(run.status, InsightStatus::Completed);
        let result = run.filter_result().unwrap();
        assert_eq!(result.get_total_line_count(), 2);
        assert_eq!(result.errors().len(), 1);
        assert_eq!(result.errors()[0].kind, "path_error");
        assert!(sink.kinds().contains(&"error"));
    }

    #[test]
    fn test_panicking_custom_insight_is_isolated() {
        let dir = tempdir().unwrap();
        let files = write_logs(&dir, 2);
        let insights = vec![
            Insight::custom("boom", "Boom", |_ctx: &CustomContext<'_>| -> ScanResult<serde_json::Value> {
                panic!("custom computation exploded")
            }),
            Insight::custom("count", "File count", |ctx: &CustomContext<'_>| {
                Ok(serde_json::json!({ "files": ctx.files.len() }))
            }),
            errors_insight(),
        ];

        let response = executor(None).run(
            &insights,
            &files,
            Arc::new(crate::progress::NullSink),
            &CancellationToken::new(),
        );

        let boom = response.insight("boom").unwrap();
        assert_eq!(boom.status, InsightStatus::Failed);
        let error = boom.error.as_ref().unwrap();
        assert_eq!(error.kind, "custom_error");
        assert!(error.message.contains("exploded"));

        let count = response.insight("count").unwrap();
        assert_eq!(count.status, InsightStatus::Completed);
        match &count.output {
            Some(InsightOutput::Custom(value)) => assert_eq!(value["files"], 2),
            other => panic!("unexpected output {other:?}"),
        }
        assert_eq!(response.insight("errors").unwrap().status, InsightStatus::Completed);
        assert_eq!(response.count(InsightStatus::Failed), 1);
    }

    #[test]
    fn test_cancelled_before_start() {
        let dir = tempdir().unwrap();
        let files = write_logs(&dir, 3);
        let sink = Arc::new(CollectingSink::new());
        let cancel = CancellationToken::new();
        cancel.cancel();

        let exec = executor(None);
        let response = exec.run(&[errors_insight()], &files, sink.clone(), &cancel);

        assert_eq!(response.status, InsightStatus::Cancelled);
        let run = response.insight("errors").unwrap();
        assert_eq!(run.status, InsightStatus::Cancelled);
        let result = run.filter_result().unwrap();
        assert!(result.is_cancelled());
        assert!(result.is_frozen());
        assert_eq!(result.get_total_line_count(), 0);
        assert_eq!(exec.status("errors"), Some(InsightStatus::Cancelled));

        let kinds = sink.kinds();
        assert!(kinds.contains(&"cancelled"));
        assert!(!kinds.contains(&"analysis_complete"));
        assert_eq!(kinds.last(), Some(&"result"));
    }

    #[test]
    fn test_truncation_and_status_board() {
        let dir = tempdir().unwrap();
        let files = write_logs(&dir, 3);
        let exec = executor(Some(4));
        assert_eq!(exec.status("errors"), None);

        let response = exec.run(
            &[errors_insight()],
            &files,
            Arc::new(crate::progress::NullSink),
            &CancellationToken::new(),
        );

        let result = response.insight("errors").unwrap().filter_result().unwrap();
        assert!(result.is_truncated());
        assert_eq!(result.get_lines().len(), 4);
        assert_eq!(result.get_total_line_count(), 6);
        assert_eq!(exec.status("errors"), Some(InsightStatus::Completed));
    }

    #[test]
    fn test_status_board_tracks_latest_analysis() {
        let dir = tempdir().unwrap();
        let files = write_logs(&dir, 1);
        let exec = executor(None);
        let sink: Arc<dyn ProgressSink> = Arc::new(crate::progress::NullSink);

        exec.run(&[errors_insight()], &files, sink.clone(), &CancellationToken::new());
        assert_eq!(exec.status("errors"), Some(InsightStatus::Completed));

        let response = exec.run(
            &[
                Insight::filter("warnings", "Warnings", FilterSpecConfig::new("WARNING")),
                Insight::filter("warnings", "Broken", FilterSpecConfig::new("(unclosed")),
            ],
            &files,
            sink,
            &CancellationToken::new(),
        );
        assert_eq!(exec.status("errors"), None);
        assert_eq!(exec.status("warnings"), Some(InsightStatus::Completed));

        assert_eq!(response.insights.len(), 2);
        assert_eq!(response.insights[0].status, InsightStatus::Completed);
        let duplicate = &response.insights[1];
        assert_eq!(duplicate.status, InsightStatus::Failed);
        let error = duplicate.error.as_ref().unwrap();
        assert_eq!(error.kind, "config_error");
        assert!(error.message.contains("duplicate insight id"));
    }

    #[test]
    fn test_spec_file_patterns_narrow_targets() {
        let dir = tempdir().unwrap();
        let mut files = write_logs(&dir, 2);
        let other = dir.path().join("notes.txt");
        fs::write(&other, LOG).unwrap();
        files.push(FileTarget::from_path(&other));
        let sink = Arc::new(CollectingSink::new());

        let insight = Insight::filter(
            "txt-only",
            "Text errors",
            FilterSpecConfig::new("ERROR").file_patterns([r"\.txt$"]),
        );
        let response = executor(None).run(&[insight], &files, sink.clone(), &CancellationToken::new());

        let result = response.insight("txt-only").unwrap().filter_result().unwrap();
        assert_eq!(result.files_scanned(), 1);
        assert_eq!(result.get_total_line_count(), 2);

        let start = sink
            .events()
            .into_iter()
            .find_map(|e| match e.kind {
                EventKind::InsightStart { total_files, .. } => Some(total_files),
                _ => None,
            })
            .unwrap();
        assert_eq!(start, 1);
    }

    #[test]
    fn test_analyze_emits_verification_events() {
        let dir = tempdir().unwrap();
        write_logs(&dir, 2);
        let missing = dir.path().join("missing.log");
        let sink = Arc::new(CollectingSink::new());

        let response = executor(None)
            .analyze(
                &[dir.path().to_path_buf(), missing.clone()],
                &[],
                &[errors_insight()],
                sink.clone(),
                &CancellationToken::new(),
            )
            .unwrap();

        assert_eq!(response.files.len(), 2);
        assert_eq!(response.invalid_paths, vec![missing]);

        let events: Vec<ProgressEvent> = sink.events();
        let verifications: Vec<bool> = events
            .iter()
            .filter_map(|e| match &e.kind {
                EventKind::FileVerification { exists, .. } => Some(*exists),
                _ => None,
            })
            .collect();
        assert_eq!(verifications, vec![true, true, false]);
        assert!(events.iter().all(|e| e.task_id == response.task_id));
        assert_eq!(events[0].kind.name(), "file_verification");
    }

    #[test]
    fn test_engine_defaults_apply_to_specs() {
        let config = EngineConfig {
            chunk_size: 4096,
            ripgrep_extra_flags: vec!["--mmap".to_string()],
            ..Default::default()
        };
        let exec = InsightExecutor::new(config).unwrap();

        let spec = exec.apply_engine_defaults(FilterSpecConfig::new("x"));
        assert_eq!(spec.chunk_size, Some(4096));
        assert_eq!(spec.ripgrep_flags, vec!["--mmap".to_string()]);

        let spec = exec.apply_engine_defaults(
            FilterSpecConfig::new("x")
                .chunk_size(16)
                .reading_mode(ReadingMode::Chunks),
        );
        assert_eq!(spec.chunk_size, Some(16));

        // Explicitly asking for the built-in size is not the same as leaving it unset
        let spec =
            exec.apply_engine_defaults(FilterSpecConfig::new("x").chunk_size(DEFAULT_CHUNK_SIZE));
        assert_eq!(spec.chunk_size, Some(DEFAULT_CHUNK_SIZE));
        assert_eq!(spec.compile().unwrap().chunk_size(), DEFAULT_CHUNK_SIZE);
    }

    #[test]
    fn test_response_serializes() {
        let dir = tempdir().unwrap();
        let files = write_logs(&dir, 1);
        let response = executor(None).run(
            &[errors_insight()],
            &files,
            Arc::new(crate::progress::NullSink),
            &CancellationToken::new(),
        );

        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["status"], "completed");
        assert_eq!(json["insights"][0]["status"], "completed");
        assert_eq!(json["insights"][0]["output"]["total_count"], 2);
        assert!(json["insights"][0]["execution_time"].is_number());
    }
}
