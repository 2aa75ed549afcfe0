use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

use crate::errors::{ScanError, ScanResult};

/// Default chunk size for [`ReadingMode::Chunks`]
pub const DEFAULT_CHUNK_SIZE: usize = 1024 * 1024;

/// Extra `rg` flags a spec may pass through untouched.
///
/// Anything outside this list is rejected when the spec is compiled, so user
/// supplied strings never reach the command line verbatim.
pub const ALLOWED_RIPGREP_FLAGS: &[&str] = &[
    "--pcre2",
    "--no-pcre2",
    "--no-unicode",
    "--mmap",
    "--no-mmap",
    "--engine=auto",
    "--engine=default",
    "--engine=pcre2",
];

/// Strategy used to read a file's content
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ReadingMode {
    /// Stream-decode and scan one physical line at a time
    #[default]
    Lines,
    /// Read fixed-size byte chunks and re-split them on newlines
    Chunks,
    /// Delegate to an external `rg` process
    Ripgrep,
}

impl ReadingMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReadingMode::Lines => "lines",
            ReadingMode::Chunks => "chunks",
            ReadingMode::Ripgrep => "ripgrep",
        }
    }
}

impl std::str::FromStr for ReadingMode {
    type Err = ScanError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "lines" => Ok(ReadingMode::Lines),
            "chunks" => Ok(ReadingMode::Chunks),
            "ripgrep" | "rg" => Ok(ReadingMode::Ripgrep),
            other => Err(ScanError::config_error(format!(
                "unknown reading mode '{other}' (expected lines, chunks or ripgrep)"
            ))),
        }
    }
}

impl std::fmt::Display for ReadingMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Uncompiled description of a line filter, as handed over by an insight loader.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterSpecConfig {
    /// Regex applied to every line
    pub pattern: String,
    /// File inclusion regexes, OR'd together; empty means every file
    pub file_patterns: Vec<String>,
    pub case_insensitive: bool,
    pub multiline: bool,
    pub dot_all: bool,
    pub reading_mode: ReadingMode,
    /// Bytes per read in chunk mode; `None` takes the engine setting
    pub chunk_size: Option<usize>,
    pub context_before: usize,
    pub context_after: usize,
    /// Maximum matches kept per file
    pub max_count: Option<usize>,
    /// Passthrough flags for `rg`, validated against [`ALLOWED_RIPGREP_FLAGS`]
    pub ripgrep_flags: Vec<String>,
}

impl Default for FilterSpecConfig {
    fn default() -> Self {
        Self {
            pattern: String::new(),
            file_patterns: Vec::new(),
            case_insensitive: false,
            multiline: false,
            dot_all: false,
            reading_mode: ReadingMode::Lines,
            chunk_size: None,
            context_before: 0,
            context_after: 0,
            max_count: None,
            ripgrep_flags: Vec::new(),
        }
    }
}

impl FilterSpecConfig {
    pub fn new(pattern: impl Into<String>) -> Self {
        Self {
            pattern: pattern.into(),
            ..Default::default()
        }
    }

    pub fn case_insensitive(mut self, yes: bool) -> Self {
        self.case_insensitive = yes;
        self
    }

    pub fn reading_mode(mut self, mode: ReadingMode) -> Self {
        self.reading_mode = mode;
        self
    }

    pub fn chunk_size(mut self, bytes: usize) -> Self {
        self.chunk_size = Some(bytes);
        self
    }

    pub fn context(mut self, before: usize, after: usize) -> Self {
        self.context_before = before;
        self.context_after = after;
        self
    }

    pub fn max_count(mut self, max: usize) -> Self {
        self.max_count = Some(max);
        self
    }

    pub fn file_patterns<I, S>(mut self, patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.file_patterns = patterns.into_iter().map(Into::into).collect();
        self
    }

    pub fn compile(self) -> ScanResult<FilterSpec> {
        FilterSpec::compile(self)
    }
}

/// Compiled, immutable filter specification.
///
/// All regexes are compiled and every field validated up front; a spec that
/// exists is a spec that can be scanned with. Cloning is cheap.
#[derive(Debug, Clone)]
pub struct FilterSpec {
    config: Arc<FilterSpecConfig>,
    regex: Regex,
    file_patterns: Arc<[Regex]>,
}

impl FilterSpec {
    /// Validates `config` and compiles its regexes.
    pub fn compile(config: FilterSpecConfig) -> ScanResult<Self> {
        if config.chunk_size == Some(0) {
            return Err(ScanError::config_error(
                "chunk_size must be at least 1 byte",
            ));
        }
        if config.max_count == Some(0) {
            return Err(ScanError::config_error("max_count must be at least 1"));
        }
        for flag in &config.ripgrep_flags {
            if !ALLOWED_RIPGREP_FLAGS.contains(&flag.as_str()) {
                return Err(ScanError::config_error(format!(
                    "ripgrep flag '{flag}' is not allowed"
                )));
            }
        }

        debug!("Compiling line pattern: {}", config.pattern);
        let regex = RegexBuilder::new(&config.pattern)
            .case_insensitive(config.case_insensitive)
            .multi_line(config.multiline)
            .dot_matches_new_line(config.dot_all)
            .build()
            .map_err(|e| ScanError::invalid_pattern(&config.pattern, e))?;

        let file_patterns = Arc::from(compile_file_patterns(&config.file_patterns)?);

        Ok(Self {
            config: Arc::new(config),
            regex,
            file_patterns,
        })
    }

    /// Shorthand for a line-mode spec with default settings.
    pub fn new(pattern: &str) -> ScanResult<Self> {
        FilterSpecConfig::new(pattern).compile()
    }

    pub fn config(&self) -> &FilterSpecConfig {
        &self.config
    }

    pub fn regex(&self) -> &Regex {
        &self.regex
    }

    pub fn pattern(&self) -> &str {
        &self.config.pattern
    }

    pub fn reading_mode(&self) -> ReadingMode {
        self.config.reading_mode
    }

    pub fn chunk_size(&self) -> usize {
        self.config.chunk_size.unwrap_or(DEFAULT_CHUNK_SIZE)
    }

    pub fn context_before(&self) -> usize {
        self.config.context_before
    }

    pub fn context_after(&self) -> usize {
        self.config.context_after
    }

    pub fn max_count(&self) -> Option<usize> {
        self.config.max_count
    }

    pub fn ripgrep_flags(&self) -> &[String] {
        &self.config.ripgrep_flags
    }

    pub fn is_match(&self, line: &str) -> bool {
        self.regex.is_match(line)
    }

    /// Returns a copy of this spec that scans with `mode` instead.
    pub fn with_reading_mode(&self, mode: ReadingMode) -> Self {
        let mut config = (*self.config).clone();
        config.reading_mode = mode;
        Self {
            config: Arc::new(config),
            regex: self.regex.clone(),
            file_patterns: Arc::clone(&self.file_patterns),
        }
    }

    /// Whether `path` passes this spec's file inclusion patterns.
    pub fn accepts_file(&self, path: &Path) -> bool {
        matches_any(&self.file_patterns, path)
    }
}

pub(crate) fn compile_file_patterns(patterns: &[String]) -> ScanResult<Vec<Regex>> {
    patterns
        .iter()
        .map(|p| Regex::new(p).map_err(|e| ScanError::invalid_pattern(p, e)))
        .collect()
}

/// An empty pattern list accepts everything.
pub(crate) fn matches_any(patterns: &[Regex], path: &Path) -> bool {
    if patterns.is_empty() {
        return true;
    }
    let path_str = path.to_string_lossy().replace('\\', "/");
    patterns.iter().any(|p| p.is_match(&path_str))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compile_valid_spec() {
        let spec = FilterSpecConfig::new("ERROR")
            .case_insensitive(true)
            .compile()
            .unwrap();
        assert!(spec.is_match("error: disk full"));
        assert!(spec.is_match("ERROR disk full"));
        assert!(!spec.is_match("INFO start"));
        assert_eq!(spec.reading_mode(), ReadingMode::Lines);
        assert_eq!(spec.chunk_size(), DEFAULT_CHUNK_SIZE);
    }

    #[test]
    fn test_invalid_regex_is_config_error() {
        let err = FilterSpec::new("(unclosed").unwrap_err();
        assert!(err.is_config_error());
        assert!(matches!(err, ScanError::InvalidPattern { .. }));

        let err = FilterSpecConfig::new("ok")
            .file_patterns(["[bad"])
            .compile()
            .unwrap_err();
        assert!(err.is_config_error());
    }

    #[test]
    fn test_rejects_zero_chunk_size_and_max_count() {
        assert!(FilterSpecConfig::new("x").chunk_size(0).compile().is_err());
        assert!(FilterSpecConfig::new("x").max_count(0).compile().is_err());
        assert!(FilterSpecConfig::new("x").chunk_size(1).compile().is_ok());
    }

    #[test]
    fn test_ripgrep_flag_allow_list() {
        let mut config = FilterSpecConfig::new("x");
        config.ripgrep_flags = vec!["--pcre2".to_string()];
        assert!(config.clone().compile().is_ok());

        config.ripgrep_flags = vec!["--pre=/bin/sh".to_string()];
        let err = config.compile().unwrap_err();
        assert!(err.to_string().contains("--pre=/bin/sh"));
    }

    #[test]
    fn test_file_patterns_are_ored() {
        let spec = FilterSpecConfig::new("x")
            .file_patterns([r"\.log$", r"syslog"])
            .compile()
            .unwrap();
        assert!(spec.accepts_file(Path::new("/var/log/app.log")));
        assert!(spec.accepts_file(Path::new("/var/log/syslog.1")));
        assert!(!spec.accepts_file(Path::new("/var/log/app.txt")));

        let all = FilterSpec::new("x").unwrap();
        assert!(all.accepts_file(Path::new("anything.bin")));
    }

    #[test]
    fn test_reading_mode_parsing() {
        assert_eq!("LINES".parse::<ReadingMode>().unwrap(), ReadingMode::Lines);
        assert_eq!("chunks".parse::<ReadingMode>().unwrap(), ReadingMode::Chunks);
        assert_eq!("rg".parse::<ReadingMode>().unwrap(), ReadingMode::Ripgrep);
        assert!("mmap".parse::<ReadingMode>().is_err());
    }

    #[test]
    fn test_with_reading_mode_keeps_pattern() {
        let spec = FilterSpec::new("WARN").unwrap();
        let chunked = spec.with_reading_mode(ReadingMode::Chunks);
        assert_eq!(chunked.reading_mode(), ReadingMode::Chunks);
        assert_eq!(chunked.pattern(), "WARN");
        assert_eq!(spec.reading_mode(), ReadingMode::Lines);
    }
}
