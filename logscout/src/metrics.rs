use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

use crate::spec::ReadingMode;

/// Tracks throughput and strategy metrics across scans
#[derive(Debug, Clone)]
pub struct ScanMetrics {
    // Volume metrics
    bytes_read: Arc<AtomicU64>,
    lines_scanned: Arc<AtomicU64>,
    matches_found: Arc<AtomicU64>,

    // Files per reading mode
    line_files: Arc<AtomicU64>,
    chunk_files: Arc<AtomicU64>,
    ripgrep_files: Arc<AtomicU64>,

    // Degraded paths
    ripgrep_fallbacks: Arc<AtomicU64>,
    cancelled_files: Arc<AtomicU64>,
    failed_files: Arc<AtomicU64>,
}

impl ScanMetrics {
    /// Creates a new ScanMetrics instance
    pub fn new() -> Self {
        Self {
            bytes_read: Arc::new(AtomicU64::new(0)),
            lines_scanned: Arc::new(AtomicU64::new(0)),
            matches_found: Arc::new(AtomicU64::new(0)),
            line_files: Arc::new(AtomicU64::new(0)),
            chunk_files: Arc::new(AtomicU64::new(0)),
            ripgrep_files: Arc::new(AtomicU64::new(0)),
            ripgrep_fallbacks: Arc::new(AtomicU64::new(0)),
            cancelled_files: Arc::new(AtomicU64::new(0)),
            failed_files: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn record_bytes(&self, bytes: u64) {
        self.bytes_read.fetch_add(bytes, Ordering::Relaxed);
    }

    /// Records a finished file scan
    pub fn record_file(&self, mode: ReadingMode, lines: u64, matches: u64) {
        self.lines_scanned.fetch_add(lines, Ordering::Relaxed);
        self.matches_found.fetch_add(matches, Ordering::Relaxed);
        let counter = match mode {
            ReadingMode::Lines => &self.line_files,
            ReadingMode::Chunks => &self.chunk_files,
            ReadingMode::Ripgrep => &self.ripgrep_files,
        };
        counter.fetch_add(1, Ordering::Relaxed);
        debug!("Recorded {} file: {} lines, {} matches", mode, lines, matches);
    }

    pub fn record_fallback(&self) {
        self.ripgrep_fallbacks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cancellation(&self) {
        self.cancelled_files.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failure(&self) {
        self.failed_files.fetch_add(1, Ordering::Relaxed);
    }

    pub fn ripgrep_fallbacks(&self) -> u64 {
        self.ripgrep_fallbacks.load(Ordering::Relaxed)
    }

    /// Gets current statistics
    pub fn get_stats(&self) -> ScanStats {
        ScanStats {
            bytes_read: self.bytes_read.load(Ordering::Relaxed),
            lines_scanned: self.lines_scanned.load(Ordering::Relaxed),
            matches_found: self.matches_found.load(Ordering::Relaxed),
            line_files: self.line_files.load(Ordering::Relaxed),
            chunk_files: self.chunk_files.load(Ordering::Relaxed),
            ripgrep_files: self.ripgrep_files.load(Ordering::Relaxed),
            ripgrep_fallbacks: self.ripgrep_fallbacks.load(Ordering::Relaxed),
            cancelled_files: self.cancelled_files.load(Ordering::Relaxed),
            failed_files: self.failed_files.load(Ordering::Relaxed),
        }
    }

    /// Logs current statistics
    pub fn log_stats(&self) {
        let stats = self.get_stats();
        info!(
            "Scan stats:\n\
             Bytes read: {}\n\
             Lines scanned: {}\n\
             Matches found: {}\n\
             Files processed (lines/chunks/ripgrep): {}/{}/{}\n\
             Ripgrep fallbacks: {}\n\
             Files cancelled/failed: {}/{}",
            stats.bytes_read,
            stats.lines_scanned,
            stats.matches_found,
            stats.line_files,
            stats.chunk_files,
            stats.ripgrep_files,
            stats.ripgrep_fallbacks,
            stats.cancelled_files,
            stats.failed_files
        );
    }
}

impl Default for ScanMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of scan statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanStats {
    pub bytes_read: u64,
    pub lines_scanned: u64,
    pub matches_found: u64,
    pub line_files: u64,
    pub chunk_files: u64,
    pub ripgrep_files: u64,
    pub ripgrep_fallbacks: u64,
    pub cancelled_files: u64,
    pub failed_files: u64,
}
