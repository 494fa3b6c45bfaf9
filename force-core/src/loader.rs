//! Component Loader (spec.md §4.2): discovers component files beneath a
//! configured root, parses them as JSON, and flattens aggregate files into
//! individual raw components. Never aborts a load on a single bad file —
//! parse failures are reported and skipped.

use crate::model::{Kind, RawComponent};
use serde_json::Value;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LoaderError {
    #[error("failed to read component directory {path}: {source}")]
    ReadDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// A file-parse failure, reported alongside successfully loaded components
/// rather than aborting the load (spec.md §4.2).
#[derive(Debug, Clone)]
pub struct ParseFailure {
    pub path: PathBuf,
    pub message: String,
}

/// Result of a full discovery+parse pass.
#[derive(Debug, Default)]
pub struct LoadReport {
    pub components: Vec<RawComponent>,
    pub failures: Vec<ParseFailure>,
}

/// Enumerate and parse every component file under `root`'s known kind
/// subtrees (spec.md §4.2 directory layout). Aggregate files are flattened
/// into individual `RawComponent`s.
pub fn load_all(root: &Path) -> Result<LoadReport, LoaderError> {
    let mut report = LoadReport::default();
    for kind in Kind::all() {
        let dir = root.join(kind.directory());
        if !dir.exists() {
            continue;
        }
        load_kind_dir(&dir, kind, &mut report)?;
    }
    Ok(report)
}

fn load_kind_dir(dir: &Path, kind_hint: Kind, report: &mut LoadReport) -> Result<(), LoaderError> {
    let mut files = Vec::new();
    collect_json_files(dir, &mut files)?;
    // Lexicographic path order so duplicate-id resolution (Registry §4.5)
    // is deterministic across platforms.
    files.sort();

    for path in files {
        let raw = match std::fs::read(&path) {
            Ok(bytes) => bytes,
            Err(source) => {
                report.failures.push(ParseFailure {
                    path,
                    message: format!("failed to read file: {source}"),
                });
                continue;
            }
        };
        match parse_component_file(&path, kind_hint, &raw) {
            Ok(mut components) => report.components.append(&mut components),
            Err(message) => report.failures.push(ParseFailure { path, message }),
        }
    }
    Ok(())
}

/// Recursively collect `.json` files beneath `dir`, ignoring hidden files
/// and hidden directories (spec.md §4.2 edge-case policy).
fn collect_json_files(dir: &Path, out: &mut Vec<PathBuf>) -> Result<(), LoaderError> {
    let entries = std::fs::read_dir(dir).map_err(|source| LoaderError::ReadDir {
        path: dir.to_path_buf(),
        source,
    })?;
    for entry in entries {
        let entry = match entry {
            Ok(entry) => entry,
            Err(_) => continue,
        };
        let path = entry.path();
        let file_name = match path.file_name().and_then(|n| n.to_str()) {
            Some(name) => name,
            None => continue,
        };
        if file_name.starts_with('.') {
            continue;
        }
        if path.is_dir() {
            collect_json_files(&path, out)?;
            continue;
        }
        if path.extension().and_then(|ext| ext.to_str()) == Some("json") {
            out.push(path);
        }
    }
    Ok(())
}

/// Parse one file's bytes into one or more `RawComponent`s, flattening
/// aggregate files (spec.md §4.2, §6 component file format).
pub fn parse_component_file(
    path: &Path,
    kind_hint: Kind,
    raw_bytes: &[u8],
) -> Result<Vec<RawComponent>, String> {
    let doc: Value = serde_json::from_slice(raw_bytes)
        .map_err(|source| format!("failed to parse component file as JSON: {source}"))?;

    if let Value::Object(map) = &doc {
        for kind in Kind::all() {
            if let Some(Value::Array(items)) = map.get(kind.aggregate_field()) {
                return Ok(items
                    .iter()
                    .cloned()
                    .map(|doc| RawComponent {
                        path: path.to_path_buf(),
                        kind_hint: kind,
                        doc,
                    })
                    .collect());
            }
        }
    }

    Ok(vec![RawComponent {
        path: path.to_path_buf(),
        kind_hint,
        doc,
    }])
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write(root: &Path, rel: &str, body: &str) {
        let path = root.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, body).unwrap();
    }

    #[test]
    fn ignores_hidden_and_non_json_files() {
        let temp = TempDir::new().unwrap();
        write(temp.path(), "tools/a.json", r#"{"id":"a"}"#);
        write(temp.path(), "tools/.hidden.json", r#"{"id":"hidden"}"#);
        write(temp.path(), "tools/readme.txt", "not json");

        let report = load_all(temp.path()).unwrap();
        assert_eq!(report.components.len(), 1);
        assert_eq!(report.components[0].doc["id"], "a");
    }

    #[test]
    fn reports_parse_failures_without_aborting() {
        let temp = TempDir::new().unwrap();
        write(temp.path(), "tools/bad.json", "{not json");
        write(temp.path(), "tools/good.json", r#"{"id":"good"}"#);

        let report = load_all(temp.path()).unwrap();
        assert_eq!(report.components.len(), 1);
        assert_eq!(report.failures.len(), 1);
        assert!(report.failures[0].path.ends_with("bad.json"));
    }

    #[test]
    fn flattens_aggregate_pattern_file() {
        let temp = TempDir::new().unwrap();
        write(
            temp.path(),
            "patterns/bundle.json",
            r#"{"patterns":[{"id":"p1"},{"id":"p2"}]}"#,
        );

        let report = load_all(temp.path()).unwrap();
        assert_eq!(report.components.len(), 2);
        assert!(report.components.iter().all(|c| c.kind_hint == Kind::Pattern));
    }

    #[test]
    fn recurses_into_nested_directories() {
        let temp = TempDir::new().unwrap();
        write(temp.path(), "tools/nested/deep/a.json", r#"{"id":"a"}"#);

        let report = load_all(temp.path()).unwrap();
        assert_eq!(report.components.len(), 1);
    }
}
