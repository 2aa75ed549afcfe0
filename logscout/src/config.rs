use config::{Config as ConfigBuilder, ConfigError, File};
use serde::{Deserialize, Serialize};
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};

use crate::search::DEFAULT_PROGRESS_INTERVAL;
use crate::spec::{ALLOWED_RIPGREP_FLAGS, DEFAULT_CHUNK_SIZE};

/// Engine-wide settings shared by every insight of an analysis.
///
/// # Configuration Locations
///
/// The configuration can be loaded from multiple locations in order of precedence:
/// 1. Custom config file specified via `--config` flag
/// 2. Local `.logscout.yaml` in the current directory
/// 3. Global `$HOME/.config/logscout/config.yaml`
///
/// # Configuration Format
///
/// ```yaml
/// # Bytes per read in chunk mode
/// chunk_size: 1048576
///
/// # Lines between two progress events
/// progress_interval_lines: 10000
///
/// # Files scanned concurrently within one insight
/// max_file_concurrency: 8
///
/// # Lines kept per insight result (counts are never truncated)
/// max_lines: 5000
///
/// # External search tool
/// ripgrep_path: "rg"
///
/// # Extra flags added to every ripgrep scan
/// ripgrep_extra_flags: ["--mmap"]
///
/// # Globs skipped while walking folders
/// exclude_patterns:
///   - "**/*.gz"
///
/// # Log level (trace, debug, info, warn, error)
/// log_level: "info"
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Default chunk size for insights that do not set their own
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    /// Lines between two `insight_progress` events
    #[serde(default = "default_progress_interval")]
    pub progress_interval_lines: u64,

    /// Upper bound on files scanned at the same time within one insight.
    /// Defaults to number of CPU cores if not specified
    #[serde(default = "default_concurrency")]
    pub max_file_concurrency: NonZeroUsize,

    /// Matched lines exposed per insight; None keeps everything
    #[serde(default)]
    pub max_lines: Option<usize>,

    /// Name or path of the ripgrep binary
    #[serde(default = "default_ripgrep_path")]
    pub ripgrep_path: PathBuf,

    /// Flags appended to every `rg` invocation; see [`ALLOWED_RIPGREP_FLAGS`]
    #[serde(default)]
    pub ripgrep_extra_flags: Vec<String>,

    /// Glob patterns excluded from folder walks
    /// Examples:
    /// - "**/*.gz": skip compressed rotations
    /// - "**/archive/**": skip an archive folder
    #[serde(default)]
    pub exclude_patterns: Vec<String>,

    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_chunk_size() -> usize {
    DEFAULT_CHUNK_SIZE
}

fn default_progress_interval() -> u64 {
    DEFAULT_PROGRESS_INTERVAL
}

fn default_concurrency() -> NonZeroUsize {
    NonZeroUsize::new(num_cpus::get()).unwrap_or(NonZeroUsize::MIN)
}

fn default_ripgrep_path() -> PathBuf {
    PathBuf::from("rg")
}

fn default_log_level() -> String {
    "warn".to_string()
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            progress_interval_lines: default_progress_interval(),
            max_file_concurrency: default_concurrency(),
            max_lines: None,
            ripgrep_path: default_ripgrep_path(),
            ripgrep_extra_flags: Vec::new(),
            exclude_patterns: Vec::new(),
            log_level: default_log_level(),
        }
    }
}

/// Values supplied on the command line; `None` keeps the file value.
#[derive(Debug, Clone, Default)]
pub struct EngineOverrides {
    pub chunk_size: Option<usize>,
    pub max_file_concurrency: Option<NonZeroUsize>,
    pub max_lines: Option<usize>,
    pub ripgrep_path: Option<PathBuf>,
    pub exclude_patterns: Vec<String>,
    pub log_level: Option<String>,
}

impl EngineConfig {
    /// Loads configuration from the default locations
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(None)
    }

    /// Loads configuration from a specific file
    pub fn load_from(config_path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = ConfigBuilder::builder();

        let defaults = [
            // Global config
            dirs::config_dir().map(|p| p.join("logscout/config.yaml")),
            // Local config
            Some(PathBuf::from(".logscout.yaml")),
        ];
        for path in defaults.iter().flatten() {
            if path.exists() {
                builder = builder.add_source(File::from(path.as_path()));
            }
        }

        // An explicitly requested file must exist
        if let Some(path) = config_path {
            builder = builder.add_source(File::from(path).required(true));
        }

        let config: Self = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Rejects values that would make scanning impossible
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.chunk_size == 0 {
            return Err(ConfigError::Message(
                "chunk_size must be at least 1 byte".to_string(),
            ));
        }
        if self.progress_interval_lines == 0 {
            return Err(ConfigError::Message(
                "progress_interval_lines must be at least 1".to_string(),
            ));
        }
        if let Some(flag) = self
            .ripgrep_extra_flags
            .iter()
            .find(|f| !ALLOWED_RIPGREP_FLAGS.contains(&f.as_str()))
        {
            return Err(ConfigError::Message(format!(
                "ripgrep flag '{flag}' is not allowed"
            )));
        }
        Ok(())
    }

    /// Merges CLI arguments with configuration file values
    pub fn merge_with_cli(mut self, cli: EngineOverrides) -> Self {
        // CLI values take precedence over config file values
        if let Some(chunk_size) = cli.chunk_size {
            self.chunk_size = chunk_size;
        }
        if let Some(concurrency) = cli.max_file_concurrency {
            self.max_file_concurrency = concurrency;
        }
        if cli.max_lines.is_some() {
            self.max_lines = cli.max_lines;
        }
        if let Some(path) = cli.ripgrep_path {
            self.ripgrep_path = path;
        }
        if !cli.exclude_patterns.is_empty() {
            self.exclude_patterns = cli.exclude_patterns;
        }
        if let Some(level) = cli.log_level {
            self.log_level = level;
        }
        self
    }
}
