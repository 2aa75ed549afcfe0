pub mod chunks;
pub mod collector;
pub mod lines;
pub mod ripgrep;

use once_cell::sync::OnceCell;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::errors::{ScanError, ScanResult};
use crate::filters::FileTarget;
use crate::metrics::ScanMetrics;
use crate::progress::{CancellationToken, EventKind, FilePosition, ProgressReporter};
use crate::results::FileMatches;
use crate::spec::{FilterSpec, ReadingMode};

pub use ripgrep::build_args as ripgrep_args;

/// Default number of lines between two `insight_progress` events
pub const DEFAULT_PROGRESS_INTERVAL: u64 = 10_000;

/// Lazily probes for the external search tool, once per instance.
///
/// Share one probe (behind an `Arc`) across everything that scans so a missing
/// binary is only looked up a single time.
#[derive(Debug)]
pub struct RipgrepProbe {
    binary: PathBuf,
    resolved: OnceCell<Option<PathBuf>>,
}

impl RipgrepProbe {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
            resolved: OnceCell::new(),
        }
    }

    /// The configured binary name or path
    pub fn binary(&self) -> &Path {
        &self.binary
    }

    /// Full path of the tool, or `None` if it is not installed.
    pub fn resolve(&self) -> Option<&Path> {
        self.resolved
            .get_or_init(|| match which::which(&self.binary) {
                Ok(path) => {
                    debug!("Found search tool at {}", path.display());
                    Some(path)
                }
                Err(e) => {
                    warn!(
                        "Search tool '{}' not available ({}); ripgrep mode will scan line by line",
                        self.binary.display(),
                        e
                    );
                    None
                }
            })
            .as_deref()
    }

    pub fn is_available(&self) -> bool {
        self.resolve().is_some()
    }

    /// Whether the lookup already happened
    pub fn is_probed(&self) -> bool {
        self.resolved.get().is_some()
    }
}

impl Default for RipgrepProbe {
    fn default() -> Self {
        Self::new("rg")
    }
}

/// Everything a reading mode needs to scan one file
pub(crate) struct ScanContext<'a> {
    pub target: &'a FileTarget,
    pub spec: &'a FilterSpec,
    pub position: FilePosition,
    pub reporter: &'a ProgressReporter,
    pub cancel: &'a CancellationToken,
    pub progress_interval: u64,
    pub metrics: &'a ScanMetrics,
}

impl ScanContext<'_> {
    pub fn path(&self) -> &Path {
        &self.target.path
    }

    pub fn should_report(&self, lines: u64) -> bool {
        lines > 0 && lines % self.progress_interval == 0
    }

    pub fn report_progress(&self, lines_processed: u64) {
        self.reporter.emit(EventKind::InsightProgress {
            file_path: self.target.path.clone(),
            file_index: self.position.index,
            total_files: self.position.total,
            lines_processed,
        });
    }

    pub fn report_chunk(&self, chunk_index: u64, bytes_read: u64) {
        self.reporter.emit(EventKind::FileChunk {
            file_path: self.target.path.clone(),
            file_index: self.position.index,
            total_files: self.position.total,
            chunk_index,
            bytes_read,
        });
    }

    /// Book-keeping shared by every mode once a file is done
    pub fn finish(&self, result: &FileMatches, bytes_read: u64, lossy: bool) {
        if lossy {
            warn!("Invalid UTF-8 replaced in file: {}", self.path().display());
        }
        self.metrics.record_bytes(bytes_read);
        self.report_progress(result.lines_processed);
    }
}

/// Scans a single file under a [`FilterSpec`] using one of three reading modes.
///
/// The modes are interchangeable: for the same file and spec each returns the
/// same `(line number, text)` matches. `lines` and `chunks` feed the same
/// [`collector::LineCollector`], and `ripgrep` translates the spec into flags
/// that reproduce those line semantics. When `rg` is missing or fails, or the
/// file holds bytes `rg` would read differently (invalid UTF-8, a bare `\r`, a
/// BOM), the scan falls back to line mode.
///
/// Cancellation is polled at every line and chunk boundary, and while waiting
/// on the `rg` subprocess. A cancelled scan still returns what it had found,
/// flagged with `cancelled = true`.
#[derive(Debug, Clone)]
pub struct LineFilter {
    probe: Arc<RipgrepProbe>,
    metrics: ScanMetrics,
    progress_interval: u64,
}

impl Default for LineFilter {
    fn default() -> Self {
        Self::new(Arc::new(RipgrepProbe::default()))
    }
}

impl LineFilter {
    pub fn new(probe: Arc<RipgrepProbe>) -> Self {
        Self {
            probe,
            metrics: ScanMetrics::new(),
            progress_interval: DEFAULT_PROGRESS_INTERVAL,
        }
    }

    /// Sets how many lines pass between two progress events
    pub fn with_progress_interval(mut self, lines: u64) -> Self {
        self.progress_interval = lines.max(1);
        self
    }

    pub fn with_metrics(mut self, metrics: ScanMetrics) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn metrics(&self) -> &ScanMetrics {
        &self.metrics
    }

    pub fn probe(&self) -> &RipgrepProbe {
        &self.probe
    }

    /// Scans `target` with `spec`, emitting progress and honouring `cancel`.
    ///
    /// Read failures are returned as errors for the caller to attach to this
    /// file; an unavailable or failing `rg` is never an error.
    pub fn filter(
        &self,
        target: &FileTarget,
        spec: &FilterSpec,
        position: FilePosition,
        reporter: &ProgressReporter,
        cancel: &CancellationToken,
    ) -> ScanResult<FileMatches> {
        debug!(
            "Scanning {} ({} mode, file {}/{})",
            target.path.display(),
            spec.reading_mode(),
            position.index + 1,
            position.total
        );
        reporter.emit(EventKind::FileOpen {
            file_path: target.path.clone(),
            file_index: position.index,
            total_files: position.total,
            file_size_mb: target.size_mb(),
        });

        let ctx = ScanContext {
            target,
            spec,
            position,
            reporter,
            cancel,
            progress_interval: self.progress_interval,
            metrics: &self.metrics,
        };

        let outcome = match spec.reading_mode() {
            ReadingMode::Lines => lines::scan(&ctx),
            ReadingMode::Chunks => chunks::scan(&ctx),
            ReadingMode::Ripgrep => self.scan_ripgrep(&ctx),
        };

        match &outcome {
            Ok(result) => {
                self.metrics.record_file(
                    result.mode,
                    result.lines_processed,
                    result.matches.len() as u64,
                );
                if result.cancelled {
                    debug!("Scan of {} cancelled", target.path.display());
                    self.metrics.record_cancellation();
                }
            }
            Err(e) => {
                warn!("Failed to scan {}: {}", target.path.display(), e);
                self.metrics.record_failure();
            }
        }
        outcome
    }

    fn scan_ripgrep(&self, ctx: &ScanContext<'_>) -> ScanResult<FileMatches> {
        let Some(binary) = self.probe.resolve() else {
            self.metrics.record_fallback();
            return lines::scan(ctx);
        };

        match ripgrep::diverges_from_line_mode(ctx.path(), ctx.cancel) {
            Ok(false) => {}
            Ok(true) => {
                debug!(
                    "{} has invalid UTF-8, a bare carriage return or a BOM; scanning line by line",
                    ctx.path().display()
                );
                self.metrics.record_fallback();
                return lines::scan(ctx);
            }
            // Line mode reports the read error against this file
            Err(_) => return lines::scan(ctx),
        }

        match ripgrep::scan(binary, ctx) {
            Err(ScanError::SubprocessError(msg)) => {
                warn!(
                    "Search tool failed on {} ({}); falling back to line mode",
                    ctx.path().display(),
                    msg
                );
                self.metrics.record_fallback();
                lines::scan(ctx)
            }
            other => other,
        }
    }
}
