use crate::core::paths::normalize_path;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, warn};

pub const IGNORE_FILE: &str = ".diff-review-ignore";

#[derive(Debug, Error)]
pub enum FilesError {
    #[error("invalid file pattern `{pattern}`: {source}")]
    Pattern {
        pattern: String,
        #[source]
        source: glob::PatternError,
    },

    #[error("failed to read {path}: {source}")]
    IgnoreFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Glob patterns listed in the repository's ignore file, one per line.
/// Blank lines and `#` comments are skipped; a missing file means none.
pub fn read_ignore_file(repo_root: &Path) -> Result<Vec<String>, FilesError> {
    let path = repo_root.join(IGNORE_FILE);
    let content = match std::fs::read_to_string(&path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(source) => return Err(FilesError::IgnoreFile { path, source }),
    };

    Ok(parse_ignore_lines(&content))
}

fn parse_ignore_lines(content: &str) -> Vec<String> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect()
}

/// Turns a colon-separated list of literal paths into exclude patterns.
/// Entries are escaped, so glob metacharacters in names match literally.
pub fn literal_excludes(paths: &str) -> Vec<String> {
    paths
        .split(':')
        .map(str::trim)
        .filter(|path| !path.is_empty())
        .map(glob::Pattern::escape)
        .collect()
}

/// Expands `include` globs under `repo_root` into the normalized set of
/// files a review may comment on, minus anything matched by `exclude`.
pub fn collect_source_files(
    repo_root: &Path,
    include: &[String],
    exclude: &[String],
) -> Result<HashSet<PathBuf>, FilesError> {
    let mut files = expand(repo_root, include)?;
    let excluded = expand(repo_root, exclude)?;

    let before = files.len();
    files.retain(|file| !excluded.contains(file));
    debug!(
        "Collected {} source file(s), {} excluded",
        files.len(),
        before - files.len()
    );

    Ok(files)
}

fn expand(repo_root: &Path, patterns: &[String]) -> Result<HashSet<PathBuf>, FilesError> {
    let mut files = HashSet::new();

    for pattern in patterns {
        let rooted = if Path::new(pattern).is_absolute() {
            PathBuf::from(pattern)
        } else {
            repo_root.join(pattern)
        };
        let rooted = rooted.to_string_lossy().to_string();

        let entries = glob::glob(&rooted).map_err(|source| FilesError::Pattern {
            pattern: pattern.clone(),
            source,
        })?;

        for entry in entries {
            match entry {
                Ok(path) if path.is_file() => {
                    files.insert(normalize_path(path));
                }
                Ok(_) => {}
                Err(e) => warn!("Unreadable path while expanding {}: {}", pattern, e),
            }
        }
    }

    Ok(files)
}
