/// Error types for the filtering engine.
///
/// Only spec construction is fail-fast. Everything that goes wrong while a scan is
/// already running (a missing file, a read failure halfway through, a crashed
/// `rg` process) is captured and attached to the file or insight it belongs to,
/// so one bad input never blocks the rest of a batch.
///
/// ```rust,ignore
/// match FilterSpec::compile(&config) {
///     Ok(spec) => // scan with it,
///     Err(ScanError::InvalidPattern { pattern, message }) => // reject before any I/O,
///     Err(e) => // other configuration problem
/// }
/// ```
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Result type for engine operations
pub type ScanResult<T> = Result<T, ScanError>;

/// Errors that can occur while expanding, filtering or executing insights
#[derive(Error, Debug)]
pub enum ScanError {
    #[error("Configuration error: {0}")]
    ConfigError(String),
    #[error("Invalid pattern '{pattern}': {message}")]
    InvalidPattern { pattern: String, message: String },
    #[error("Path does not exist: {0}")]
    PathError(PathBuf),
    #[error("File not found: {0}")]
    FileNotFound(PathBuf),
    #[error("Permission denied: {0}")]
    PermissionDenied(PathBuf),
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Search tool failed: {0}")]
    SubprocessError(String),
    #[error("Operation cancelled")]
    Cancelled,
    #[error("Custom insight failed: {0}")]
    Custom(String),
}

/// Canonicalize the path and strip UNC prefixes so that
/// comparisons on Windows are consistent.
pub fn unify_path(original: &Path) -> PathBuf {
    let canonical = original
        .canonicalize()
        .unwrap_or_else(|_| original.to_path_buf());
    strip_unc_prefix(&canonical)
}

/// Strips the Windows UNC prefix (\\?\) from a path if present
fn strip_unc_prefix(p: &Path) -> PathBuf {
    let s = p.display().to_string();
    if let Some(stripped) = s.strip_prefix(r"\\?\") {
        PathBuf::from(stripped)
    } else {
        p.to_path_buf()
    }
}

impl ScanError {
    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::ConfigError(msg.into())
    }

    pub fn invalid_pattern(pattern: impl Into<String>, message: impl ToString) -> Self {
        Self::InvalidPattern {
            pattern: pattern.into(),
            message: message.to_string(),
        }
    }

    pub fn path_error(path: impl Into<PathBuf>) -> Self {
        Self::PathError(path.into())
    }

    pub fn file_not_found(path: impl Into<PathBuf>) -> Self {
        Self::FileNotFound(path.into())
    }

    pub fn permission_denied(path: impl Into<PathBuf>) -> Self {
        Self::PermissionDenied(path.into())
    }

    pub fn subprocess(msg: impl Into<String>) -> Self {
        Self::SubprocessError(msg.into())
    }

    pub fn custom(msg: impl Into<String>) -> Self {
        Self::Custom(msg.into())
    }

    /// Maps an I/O error raised while touching `path` onto the taxonomy.
    pub fn from_io(path: &Path, err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => Self::file_not_found(path),
            std::io::ErrorKind::PermissionDenied => Self::permission_denied(path),
            _ => Self::IoError(err),
        }
    }

    /// Stable identifier used when errors are serialized into insight results.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ConfigError(_) | Self::InvalidPattern { .. } => "config_error",
            Self::PathError(_) | Self::FileNotFound(_) => "path_error",
            Self::PermissionDenied(_) | Self::IoError(_) => "io_error",
            Self::SubprocessError(_) => "subprocess_error",
            Self::Cancelled => "cancelled",
            Self::Custom(_) => "custom_error",
        }
    }

    pub fn is_config_error(&self) -> bool {
        self.kind() == "config_error"
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}
