/// Match types and the per-insight aggregator.
///
/// A [`FilterResult`] is created empty for each insight run, fed one file at a
/// time in scan order, and frozen once the run completes or is cancelled.
/// Counters always describe everything that was matched; truncation only
/// limits which lines are exposed.
use serde::ser::SerializeStruct;
use serde::{Serialize, Serializer};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::warn;

use crate::errors::ScanError;
use crate::spec::ReadingMode;

/// A single matching line in a file
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MatchedLine {
    pub file_path: PathBuf,
    /// 1-based line number
    pub line_number: usize,
    /// The line without its terminator
    pub text: String,
    /// Lines before the match for context
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub context_before: Vec<(usize, String)>,
    /// Lines after the match for context
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub context_after: Vec<(usize, String)>,
}

impl MatchedLine {
    pub fn new(file_path: impl Into<PathBuf>, line_number: usize, text: impl Into<String>) -> Self {
        Self {
            file_path: file_path.into(),
            line_number,
            text: text.into(),
            context_before: Vec::new(),
            context_after: Vec::new(),
        }
    }
}

/// Everything one reading mode found in one file
#[derive(Debug, Clone)]
pub struct FileMatches {
    pub path: PathBuf,
    pub matches: Vec<MatchedLine>,
    /// Lines read before the scan stopped
    pub lines_processed: u64,
    /// True if the scan stopped early because of cancellation
    pub cancelled: bool,
    /// Mode that actually produced the matches (differs after a ripgrep fallback)
    pub mode: ReadingMode,
}

impl FileMatches {
    pub fn new(path: impl Into<PathBuf>, mode: ReadingMode) -> Self {
        Self {
            path: path.into(),
            matches: Vec::new(),
            lines_processed: 0,
            cancelled: false,
            mode,
        }
    }

    /// (line number, text) pairs, the identity used when comparing modes.
    pub fn line_pairs(&self) -> Vec<(usize, &str)> {
        self.matches
            .iter()
            .map(|m| (m.line_number, m.text.as_str()))
            .collect()
    }
}

/// A file that could not be scanned
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileError {
    pub file_path: PathBuf,
    pub kind: String,
    pub message: String,
}

#[derive(Debug, Clone, Default)]
struct FileEntry {
    path: PathBuf,
    lines: Vec<MatchedLine>,
}

/// Aggregated matches of one insight across its files
#[derive(Debug, Clone, Default)]
pub struct FilterResult {
    files: Vec<FileEntry>,
    index: HashMap<PathBuf, usize>,
    total_count: usize,
    files_scanned: usize,
    lines_processed: u64,
    errors: Vec<FileError>,
    max_lines: Option<usize>,
    truncated: bool,
    cancelled: bool,
    frozen: bool,
}

impl FilterResult {
    /// Creates a new empty filter result
    pub fn new() -> Self {
        Default::default()
    }

    /// Appends a matched line and updates the counters.
    pub fn add_line(&mut self, file: &Path, line: MatchedLine) {
        if self.frozen {
            warn!("Ignoring match for {} on a frozen result", file.display());
            return;
        }
        let idx = match self.index.get(file) {
            Some(&idx) => idx,
            None => {
                self.files.push(FileEntry {
                    path: file.to_path_buf(),
                    lines: Vec::new(),
                });
                self.index.insert(file.to_path_buf(), self.files.len() - 1);
                self.files.len() - 1
            }
        };
        self.files[idx].lines.push(line);
        self.total_count += 1;
    }

    /// Merges a single file's scan outcome, keeping its matches in order.
    pub fn add_file_matches(&mut self, file_matches: FileMatches) {
        if self.frozen {
            warn!(
                "Ignoring results for {} on a frozen result",
                file_matches.path.display()
            );
            return;
        }
        self.files_scanned += 1;
        self.lines_processed += file_matches.lines_processed;
        if file_matches.cancelled {
            self.cancelled = true;
        }
        let path = file_matches.path;
        for line in file_matches.matches {
            self.add_line(&path, line);
        }
    }

    /// Records a per-file failure without interrupting the run.
    pub fn record_error(&mut self, file: &Path, err: &ScanError) {
        if self.frozen {
            return;
        }
        self.errors.push(FileError {
            file_path: file.to_path_buf(),
            kind: err.kind().to_string(),
            message: err.to_string(),
        });
    }

    /// Marks the run as cancelled; whatever was gathered stays available.
    pub fn mark_cancelled(&mut self) {
        self.cancelled = true;
    }

    /// Stops exposing lines past `max_lines`. Counts are left untouched.
    pub fn truncate(&mut self, max_lines: usize) {
        self.max_lines = Some(max_lines);
        self.truncated = self.total_count > max_lines;
    }

    /// Prevents any further mutation.
    pub fn freeze(&mut self) {
        self.frozen = true;
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    fn visible_limit(&self) -> usize {
        self.max_lines.unwrap_or(usize::MAX)
    }

    /// All exposed lines, flattened in file order.
    pub fn get_lines(&self) -> Vec<&MatchedLine> {
        self.files
            .iter()
            .flat_map(|f| f.lines.iter())
            .take(self.visible_limit())
            .collect()
    }

    /// Exposed lines grouped by file, files in insertion order.
    pub fn get_lines_by_file(&self) -> Vec<(&Path, &[MatchedLine])> {
        let mut remaining = self.visible_limit();
        let mut grouped = Vec::with_capacity(self.files.len());
        for file in &self.files {
            if remaining == 0 {
                break;
            }
            let take = file.lines.len().min(remaining);
            remaining -= take;
            grouped.push((file.path.as_path(), &file.lines[..take]));
        }
        grouped
    }

    /// Total matches, regardless of truncation.
    pub fn get_total_line_count(&self) -> usize {
        self.total_count
    }

    /// Number of files with at least one match, regardless of truncation.
    pub fn get_file_count(&self) -> usize {
        self.files.iter().filter(|f| !f.lines.is_empty()).count()
    }

    /// Matches in `file`, regardless of truncation.
    pub fn get_file_line_count(&self, file: &Path) -> usize {
        self.index
            .get(file)
            .map(|&idx| self.files[idx].lines.len())
            .unwrap_or(0)
    }

    pub fn files_scanned(&self) -> usize {
        self.files_scanned
    }

    pub fn lines_processed(&self) -> u64 {
        self.lines_processed
    }

    pub fn errors(&self) -> &[FileError] {
        &self.errors
    }

    pub fn is_truncated(&self) -> bool {
        self.truncated
    }

    pub fn max_lines(&self) -> Option<usize> {
        self.max_lines
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled
    }
}

#[derive(Serialize)]
struct FileView<'a> {
    file_path: &'a Path,
    count: usize,
    lines: &'a [MatchedLine],
}

impl Serialize for FilterResult {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let files: Vec<FileView<'_>> = self
            .get_lines_by_file()
            .into_iter()
            .map(|(path, lines)| FileView {
                file_path: path,
                count: self.get_file_line_count(path),
                lines,
            })
            .collect();

        let mut state = serializer.serialize_struct("FilterResult", 9)?;
        state.serialize_field("total_count", &self.total_count)?;
        state.serialize_field("file_count", &self.get_file_count())?;
        state.serialize_field("files_scanned", &self.files_scanned)?;
        state.serialize_field("lines_processed", &self.lines_processed)?;
        state.serialize_field("truncated", &self.truncated)?;
        state.serialize_field("max_lines", &self.max_lines)?;
        state.serialize_field("cancelled", &self.cancelled)?;
        state.serialize_field("files", &files)?;
        state.serialize_field("errors", &self.errors)?;
        state.end()
    }
}

/// Serializes a duration as fractional seconds.
pub(crate) fn serialize_secs<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_f64(d.as_secs_f64())
}
