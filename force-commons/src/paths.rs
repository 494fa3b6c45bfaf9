use anyhow::{Context, Result, anyhow};
use std::path::{Component, Path, PathBuf};
use tracing::warn;

/// Normalize a path by resolving `.` and `..` components lexically.
pub fn normalize_path(path: &Path) -> PathBuf {
    let mut normalized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::ParentDir => {
                normalized.pop();
            }
            Component::CurDir => {}
            Component::Prefix(prefix) => normalized.push(prefix.as_os_str()),
            Component::RootDir => normalized.push(component.as_os_str()),
            Component::Normal(part) => normalized.push(part),
        }
    }
    normalized
}

/// Canonicalize a path with fallback to the original path if canonicalization fails.
pub fn canonicalize_workspace(root: &Path) -> PathBuf {
    std::fs::canonicalize(root).unwrap_or_else(|error| {
        warn!(
            path = %root.display(),
            %error,
            "failed to canonicalize component root; falling back to provided path"
        );
        root.to_path_buf()
    })
}

/// Resolve a path relative to the component root, ensuring the result stays
/// within it. Used by the Loader and Auto-Fixer so neither can be pointed at
/// files outside the configured root.
pub fn resolve_workspace_path(root: &Path, candidate: &Path) -> Result<PathBuf> {
    let joined = if candidate.is_absolute() {
        candidate.to_path_buf()
    } else {
        root.join(candidate)
    };

    let normalized_candidate = normalize_path(&joined);
    let normalized_root = normalize_path(root);

    if !normalized_candidate.starts_with(&normalized_root) {
        return Err(anyhow!(
            "path {} escapes component root {}",
            normalized_candidate.display(),
            normalized_root.display()
        ));
    }

    Ok(normalized_candidate)
}

/// Expand a leading `~` (or `~/...`) to the current user's home directory.
/// Paths without a leading `~` are returned unchanged.
pub fn expand_tilde(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs_home() {
            return home.join(rest);
        }
    } else if path == "~"
        && let Some(home) = dirs_home()
    {
        return home;
    }
    PathBuf::from(path)
}

fn dirs_home() -> Option<PathBuf> {
    std::env::var_os("HOME").map(PathBuf::from)
}

/// Canonicalize a path, walking up to find the nearest existing ancestor for
/// files that may not exist yet (e.g. an auto-fix backup target whose parent
/// directory has not been created).
pub async fn canonicalize_allow_missing(normalized: &Path) -> Result<PathBuf> {
    if tokio::fs::try_exists(normalized).await.unwrap_or(false) {
        return tokio::fs::canonicalize(normalized)
            .await
            .with_context(|| format!("failed to resolve canonical path for {:?}", normalized));
    }

    let mut current = normalized.to_path_buf();
    while let Some(parent) = current.parent() {
        if tokio::fs::try_exists(parent).await.unwrap_or(false) {
            let canonical_parent = tokio::fs::canonicalize(parent)
                .await
                .with_context(|| format!("failed to resolve canonical path for {:?}", parent))?;
            let remainder = normalized.strip_prefix(parent).unwrap_or(Path::new(""));
            return Ok(if remainder.as_os_str().is_empty() {
                canonical_parent
            } else {
                canonical_parent.join(remainder)
            });
        }
        current = parent.to_path_buf();
    }

    Ok(normalized.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_dot_dot_components() {
        let candidate = Path::new("/root/force/tools/../tools/a.json");
        assert_eq!(normalize_path(candidate), PathBuf::from("/root/force/tools/a.json"));
    }

    #[test]
    fn resolves_nested_path_within_root() {
        let root = Path::new("/root/force");
        let resolved = resolve_workspace_path(root, Path::new("tools/a.json")).unwrap();
        assert_eq!(resolved, PathBuf::from("/root/force/tools/a.json"));
    }

    #[test]
    fn rejects_escape_from_root() {
        let root = Path::new("/root/force");
        let err = resolve_workspace_path(root, Path::new("../etc/passwd"));
        assert!(err.is_err());
    }

    #[test]
    fn expands_tilde_prefixed_paths() {
        // SAFETY: test-local mutation of the process environment, not shared
        // with other tests running concurrently in this module.
        unsafe {
            std::env::set_var("HOME", "/home/tester");
        }
        assert_eq!(expand_tilde("~/force"), PathBuf::from("/home/tester/force"));
        assert_eq!(expand_tilde("/abs/path"), PathBuf::from("/abs/path"));
    }

    #[tokio::test]
    async fn canonicalizes_missing_file_under_existing_parent() {
        let temp = std::env::temp_dir().join("force_commons_test_parent");
        tokio::fs::create_dir_all(&temp).await.unwrap();
        let missing = temp.join("missing.json");

        let canonical = canonicalize_allow_missing(&missing).await.unwrap();
        assert!(canonical.to_string_lossy().ends_with("missing.json"));

        tokio::fs::remove_dir_all(&temp).await.ok();
    }
}
