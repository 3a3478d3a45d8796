use std::path::{Component, Path, PathBuf};

/// Drops the `a/` marker git puts in front of "before" paths.
pub fn strip_source_prefix(file: &str) -> &str {
    file.strip_prefix("a/").unwrap_or(file)
}

/// Lexically resolves `.` and `..` segments and repeated separators.
/// Never touches the filesystem, so symlinks are not followed.
pub fn normalize_path(path: impl AsRef<Path>) -> PathBuf {
    let mut parts: Vec<Component> = Vec::new();

    for component in path.as_ref().components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => match parts.last() {
                Some(Component::Normal(_)) => {
                    parts.pop();
                }
                // `..` at the root stays at the root
                Some(Component::RootDir) | Some(Component::Prefix(_)) => {}
                _ => parts.push(component),
            },
            other => parts.push(other),
        }
    }

    if parts.is_empty() {
        PathBuf::from(".")
    } else {
        parts.iter().collect()
    }
}

/// Where a diff path lives on disk, in the same normalized form callers
/// use for their whitelist.
pub fn resolve_in_repo(repo_root: &Path, file: &str) -> PathBuf {
    normalize_path(repo_root.join(normalize_path(file)))
}
