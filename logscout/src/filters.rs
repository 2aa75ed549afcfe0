/// Resolves file and folder inputs into the ordered list of files to scan.
///
/// Folders are walked depth-first with entries sorted by name inside each
/// directory, so expanding an unchanged tree twice yields the same list.
/// Paths that do not exist are reported back in [`ScanSet::invalid_paths`]
/// rather than failing the whole call.
use glob::Pattern;
use ignore::WalkBuilder;
use regex::Regex;
use serde::Serialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::{debug, info, trace, warn};

use crate::errors::{unify_path, ScanError, ScanResult};
use crate::spec::{compile_file_patterns, matches_any};

/// A file selected for scanning
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileTarget {
    /// Absolute, canonical path
    pub path: PathBuf,
    /// Size in bytes at expansion time
    pub size: u64,
    pub exists: bool,
}

impl FileTarget {
    /// Builds a target by stat'ing `path`. Missing files yield `exists == false`.
    pub fn from_path(path: &Path) -> Self {
        match path.metadata() {
            Ok(metadata) => Self {
                path: unify_path(path),
                size: metadata.len(),
                exists: true,
            },
            Err(_) => Self {
                path: path.to_path_buf(),
                size: 0,
                exists: false,
            },
        }
    }

    pub fn size_mb(&self) -> f64 {
        crate::progress::bytes_to_mb(self.size)
    }
}

/// Outcome of expanding a list of inputs
#[derive(Debug, Clone, Default, Serialize)]
pub struct ScanSet {
    pub targets: Vec<FileTarget>,
    pub invalid_paths: Vec<PathBuf>,
}

impl ScanSet {
    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    pub fn total_bytes(&self) -> u64 {
        self.targets.iter().map(|t| t.size).sum()
    }
}

/// Checks if a path should be skipped based on exclude globs
pub fn should_exclude(path: &Path, exclude_patterns: &[Pattern]) -> bool {
    let normalized_path = path.to_string_lossy().replace('\\', "/");
    exclude_patterns.iter().any(|p| p.matches(&normalized_path))
}

/// Expands paths into a deduplicated, ordered scan list.
#[derive(Debug, Clone, Default)]
pub struct FileFilter {
    file_patterns: Vec<Regex>,
    exclude_patterns: Vec<Pattern>,
}

impl FileFilter {
    /// Creates a filter from inclusion regexes and exclusion globs.
    ///
    /// Invalid patterns of either kind are rejected up front.
    pub fn new(file_patterns: &[String], exclude_patterns: &[String]) -> ScanResult<Self> {
        let file_patterns = compile_file_patterns(file_patterns)?;
        let exclude_patterns = exclude_patterns
            .iter()
            .map(|p| Pattern::new(p).map_err(|e| ScanError::invalid_pattern(p, e)))
            .collect::<ScanResult<Vec<_>>>()?;
        Ok(Self {
            file_patterns,
            exclude_patterns,
        })
    }

    /// Whether a file passes the inclusion patterns.
    pub fn includes(&self, path: &Path) -> bool {
        matches_any(&self.file_patterns, path)
    }

    /// Resolves `paths` into a [`ScanSet`].
    ///
    /// Fails only when `paths` is empty or when none of the inputs exist.
    pub fn expand<P: AsRef<Path>>(&self, paths: &[P]) -> ScanResult<ScanSet> {
        if paths.is_empty() {
            return Err(ScanError::config_error("no input paths were provided"));
        }

        let mut set = ScanSet::default();
        let mut seen = HashSet::new();

        for input in paths {
            let input = input.as_ref();
            if input.is_dir() {
                debug!("Walking directory: {}", input.display());
                self.walk_dir(input, &mut seen, &mut set.targets);
            } else if input.is_file() {
                if self.includes(input) {
                    self.push_target(input, &mut seen, &mut set.targets);
                } else {
                    trace!("Skipping {} (no file pattern matched)", input.display());
                }
            } else {
                warn!("Input path does not exist: {}", input.display());
                set.invalid_paths.push(input.to_path_buf());
            }
        }

        if set.invalid_paths.len() == paths.len() {
            return Err(ScanError::path_error(&set.invalid_paths[0]));
        }

        info!(
            "Expanded {} inputs into {} files ({} invalid)",
            paths.len(),
            set.targets.len(),
            set.invalid_paths.len()
        );
        Ok(set)
    }

    fn walk_dir(&self, dir: &Path, seen: &mut HashSet<PathBuf>, targets: &mut Vec<FileTarget>) {
        let walker = WalkBuilder::new(dir)
            .standard_filters(false)
            .hidden(false)
            .follow_links(false)
            .sort_by_file_name(|a, b| a.cmp(b))
            .build();

        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!("Skipping unreadable entry under {}: {}", dir.display(), e);
                    continue;
                }
            };
            if !entry.file_type().is_some_and(|ft| ft.is_file()) {
                continue;
            }
            let path = entry.path();
            if should_exclude(path, &self.exclude_patterns) || !self.includes(path) {
                trace!("Skipping {}", path.display());
                continue;
            }
            self.push_target(path, seen, targets);
        }
    }

    fn push_target(&self, path: &Path, seen: &mut HashSet<PathBuf>, targets: &mut Vec<FileTarget>) {
        let target = FileTarget::from_path(path);
        if seen.insert(target.path.clone()) {
            trace!("Adding file: {}", target.path.display());
            targets.push(target);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn names(set: &ScanSet) -> Vec<String> {
        set.targets
            .iter()
            .map(|t| t.path.file_name().unwrap().to_string_lossy().into_owned())
            .collect()
    }

    #[test]
    fn test_should_exclude() {
        let patterns: Vec<Pattern> = ["**/*.gz", "**/archive/**"]
            .iter()
            .map(|p| Pattern::new(p).unwrap())
            .collect();

        assert!(should_exclude(Path::new("/var/log/app.log.gz"), &patterns));
        assert!(should_exclude(Path::new("/var/log/archive/app.log"), &patterns));
        assert!(!should_exclude(Path::new("/var/log/app.log"), &patterns));
    }

    #[test]
    fn test_expand_walks_depth_first_sorted() {
        let dir = tempdir().unwrap();
        fs::create_dir(dir.path().join("b_dir")).unwrap();
        fs::write(dir.path().join("c.log"), "c").unwrap();
        fs::write(dir.path().join("a.log"), "a").unwrap();
        fs::write(dir.path().join("b_dir").join("z.log"), "z").unwrap();
        fs::write(dir.path().join("b_dir").join("y.log"), "y").unwrap();

        let filter = FileFilter::default();
        let set = filter.expand(&[dir.path()]).unwrap();
        assert_eq!(names(&set), vec!["a.log", "y.log", "z.log", "c.log"]);
        assert!(set.targets.iter().all(|t| t.exists && t.path.is_absolute()));

        let again = filter.expand(&[dir.path()]).unwrap();
        assert_eq!(set.targets, again.targets);
    }

    #[test]
    fn test_expand_records_invalid_paths() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("app.log");
        fs::write(&file, "hello\n").unwrap();
        let missing = dir.path().join("missing.log");

        let set = FileFilter::default()
            .expand(&[missing.clone(), file.clone()])
            .unwrap();
        assert_eq!(set.targets.len(), 1);
        assert_eq!(set.targets[0].size, 6);
        assert_eq!(set.invalid_paths, vec![missing]);
    }

    #[test]
    fn test_expand_fails_when_nothing_resolves() {
        let filter = FileFilter::default();
        let empty: Vec<PathBuf> = Vec::new();
        assert!(filter.expand(&empty).unwrap_err().is_config_error());

        let err = filter
            .expand(&[PathBuf::from("/definitely/not/here.log")])
            .unwrap_err();
        assert!(matches!(err, ScanError::PathError(_)));
    }

    #[test]
    fn test_expand_deduplicates_preserving_first_position() {
        let dir = tempdir().unwrap();
        let a = dir.path().join("a.log");
        let b = dir.path().join("b.log");
        fs::write(&a, "a").unwrap();
        fs::write(&b, "b").unwrap();

        let set = FileFilter::default()
            .expand(&[b.clone(), dir.path().to_path_buf(), a.clone()])
            .unwrap();
        assert_eq!(names(&set), vec!["b.log", "a.log"]);
    }

    #[test]
    fn test_file_patterns_and_excludes() {
        let dir = tempdir().unwrap();
        fs::create_dir(dir.path().join("old")).unwrap();
        fs::write(dir.path().join("app.log"), "x").unwrap();
        fs::write(dir.path().join("notes.txt"), "x").unwrap();
        fs::write(dir.path().join("old").join("app.log"), "x").unwrap();

        let filter = FileFilter::new(&[r"\.log$".to_string()], &["**/old/**".to_string()]).unwrap();
        let set = filter.expand(&[dir.path()]).unwrap();
        assert_eq!(set.targets.len(), 1);
        assert!(set.targets[0].path.ends_with("app.log"));
        assert!(!set.targets[0].path.to_string_lossy().contains("old"));
    }

    #[test]
    fn test_invalid_filter_patterns() {
        assert!(FileFilter::new(&["(".to_string()], &[]).is_err());
        assert!(FileFilter::new(&[], &["[".to_string()]).is_err());
    }
}
