//! Auto-Fixer (spec.md §4.4): a bounded, deterministic, idempotent rule set
//! that brings near-miss components into compliance, backing up the
//! original file before any in-place rewrite.

use chrono::{DateTime, Utc};
use force_commons::to_snake_case;
use serde_json::{Map, Value, json};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AutoFixError {
    #[error("component document is not fixable: top level is not a JSON object")]
    NotAnObject,
    #[error("failed to write backup for {path}: {source}")]
    BackupWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to write auto-fixed file {path}: {source}")]
    FixWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("{path} changed on disk since it was read; discarding fix (raced with external edit)")]
    RaceWithExternalEdit { path: PathBuf },
}

/// Default denylist of unknown legacy top-level fields the Auto-Fixer
/// strips (spec.md §4.4 fix 6).
pub const DEFAULT_DENYLIST: &[&str] = &["legacy_id", "deprecated", "__internal", "_comment"];

#[derive(Debug, Clone, Default)]
pub struct FixOutcome {
    pub fixed_doc: Value,
    pub applied_fixes: Vec<String>,
}

/// Apply every applicable fix rule to `doc`. `mtime` backs fix 5 (stub
/// `metadata.created`/`updated` from file mtime when absent). Idempotent:
/// `try_fix(try_fix(doc).fixed_doc) == try_fix(doc)` (Testable Property 1).
pub fn try_fix(doc: &Value, mtime: DateTime<Utc>, denylist: &[&str]) -> Result<FixOutcome, AutoFixError> {
    let mut object = doc.as_object().ok_or(AutoFixError::NotAnObject)?.clone();
    let mut applied = Vec::new();

    fix_parameter_shape(&mut object, &mut applied);
    fix_parameter_names(&mut object, &mut applied);
    fix_missing_strategy(&mut object, &mut applied);
    fix_missing_commands(&mut object, &mut applied);
    fix_missing_metadata(&mut object, mtime, &mut applied);
    fix_strip_denylisted(&mut object, denylist, &mut applied);

    Ok(FixOutcome {
        fixed_doc: Value::Object(object),
        applied_fixes: applied,
    })
}

/// Fix 1: flat `parameters` list -> `{required, optional}` split on each
/// entry's `required` flag (default true); the flag itself is dropped.
fn fix_parameter_shape(object: &mut Map<String, Value>, applied: &mut Vec<String>) {
    let Some(Value::Array(items)) = object.get("parameters").cloned() else {
        return;
    };

    let mut required = Vec::new();
    let mut optional = Vec::new();
    for mut item in items {
        let is_required = item
            .get("required")
            .and_then(Value::as_bool)
            .unwrap_or(true);
        if let Some(map) = item.as_object_mut() {
            map.remove("required");
        }
        if is_required {
            required.push(item);
        } else {
            optional.push(item);
        }
    }

    object.insert(
        "parameters".to_string(),
        json!({"required": required, "optional": optional}),
    );
    applied.push("migrated flat parameter list to {required,optional}".to_string());
}

/// Fix 2: CamelCase/kebab-case parameter names -> snake_case, updating any
/// `execution.commands[*].parameters` keys that reference the old name.
fn fix_parameter_names(object: &mut Map<String, Value>, applied: &mut Vec<String>) {
    let Some(Value::Object(parameters)) = object.get_mut("parameters") else {
        return;
    };

    let mut renames: Vec<(String, String)> = Vec::new();
    for bucket in ["required", "optional"] {
        let Some(Value::Array(items)) = parameters.get_mut(bucket) else {
            continue;
        };
        for item in items {
            let Some(map) = item.as_object_mut() else {
                continue;
            };
            let Some(Value::String(name)) = map.get("name").cloned() else {
                continue;
            };
            let snake = to_snake_case(&name);
            if snake != name {
                map.insert("name".to_string(), Value::String(snake.clone()));
                renames.push((name, snake));
            }
        }
    }

    if renames.is_empty() {
        return;
    }

    if let Some(Value::Object(execution)) = object.get_mut("execution")
        && let Some(Value::Array(commands)) = execution.get_mut("commands")
    {
        for command in commands {
            let Some(Value::Object(params)) = command.get_mut("parameters") else {
                continue;
            };
            for (old, new) in &renames {
                if let Some(value) = params.remove(old) {
                    params.insert(new.clone(), value);
                }
            }
        }
    }

    applied.push(format!(
        "renamed {} parameter(s) to snake_case",
        renames.len()
    ));
}

/// Fix 3: insert `execution.strategy = "sequential"` if absent.
fn fix_missing_strategy(object: &mut Map<String, Value>, applied: &mut Vec<String>) {
    let Some(Value::Object(execution)) = object.get_mut("execution") else {
        return;
    };
    if !execution.contains_key("strategy") || execution.get("strategy") == Some(&Value::Null) {
        execution.insert("strategy".to_string(), json!("sequential"));
        applied.push("inserted default execution.strategy = sequential".to_string());
    }
}

/// Fix 4: ensure at least one placeholder command exists; mark the
/// component `degraded` so reload/report surfaces it as runnable-in-dry-run
/// only.
fn fix_missing_commands(object: &mut Map<String, Value>, applied: &mut Vec<String>) {
    let Some(execution) = object.get_mut("execution").and_then(Value::as_object_mut) else {
        return;
    };
    let is_empty = match execution.get("commands") {
        None => true,
        Some(Value::Array(items)) => items.is_empty(),
        Some(_) => true,
    };
    if !is_empty {
        return;
    }

    execution.insert(
        "commands".to_string(),
        json!([{
            "action": "noop",
            "description": "placeholder command inserted by auto-fix; component has no declared commands",
        }]),
    );
    let metadata = object
        .entry("metadata")
        .or_insert_with(|| json!({}))
        .as_object_mut();
    if let Some(metadata) = metadata {
        metadata.insert("degraded".to_string(), Value::Bool(true));
    }
    applied.push("inserted placeholder command and marked component degraded".to_string());
}

/// Fix 5: stub `metadata.created`/`metadata.updated` from file mtime, and
/// `metadata.version` to `"1.0.0"`, when absent.
fn fix_missing_metadata(object: &mut Map<String, Value>, mtime: DateTime<Utc>, applied: &mut Vec<String>) {
    let metadata = object
        .entry("metadata")
        .or_insert_with(|| json!({}))
        .as_object_mut();
    let Some(metadata) = metadata else { return };

    let stamp = mtime.to_rfc3339();
    let mut touched = false;
    if !matches!(metadata.get("created"), Some(Value::String(_))) {
        metadata.insert("created".to_string(), json!(stamp));
        touched = true;
    }
    if !matches!(metadata.get("updated"), Some(Value::String(_))) {
        metadata.insert("updated".to_string(), json!(stamp));
        touched = true;
    }
    if !matches!(metadata.get("version"), Some(Value::String(_))) {
        metadata.insert("version".to_string(), json!("1.0.0"));
        touched = true;
    }
    if touched {
        applied.push("stubbed missing metadata.created/updated/version".to_string());
    }
}

/// Fix 6: strip unknown legacy top-level fields listed in `denylist`.
fn fix_strip_denylisted(object: &mut Map<String, Value>, denylist: &[&str], applied: &mut Vec<String>) {
    let mut stripped = Vec::new();
    for key in denylist {
        if object.remove(*key).is_some() {
            stripped.push((*key).to_string());
        }
    }
    if !stripped.is_empty() {
        applied.push(format!("stripped unknown fields: {}", stripped.join(", ")));
    }
}

/// Back up `path`'s current on-disk bytes under
/// `<root>/.backup/<UTC-ISO8601>/<relative-path>`, then overwrite `path`
/// with `fixed_bytes`. Detects a race with an external edit by re-reading
/// `path`'s mtime immediately before the write and comparing against
/// `expected_mtime` (spec.md §5 advisory per-file lock window).
pub fn backup_and_write(
    root: &Path,
    path: &Path,
    expected_mtime: DateTime<Utc>,
    original_bytes: &[u8],
    fixed_bytes: &[u8],
) -> Result<PathBuf, AutoFixError> {
    let current_mtime = file_mtime_utc(path);
    if current_mtime.is_none_or(|mtime| mtime != expected_mtime) {
        return Err(AutoFixError::RaceWithExternalEdit {
            path: path.to_path_buf(),
        });
    }

    let relative = path.strip_prefix(root).unwrap_or(path);
    let timestamp = Utc::now().format("%Y%m%dT%H%M%S%.fZ").to_string();
    let backup_path = root.join(".backup").join(&timestamp).join(relative);

    if let Some(parent) = backup_path.parent() {
        std::fs::create_dir_all(parent).map_err(|source| AutoFixError::BackupWrite {
            path: backup_path.clone(),
            source,
        })?;
    }
    std::fs::write(&backup_path, original_bytes).map_err(|source| AutoFixError::BackupWrite {
        path: backup_path.clone(),
        source,
    })?;

    std::fs::write(path, fixed_bytes).map_err(|source| AutoFixError::FixWrite {
        path: path.to_path_buf(),
        source,
    })?;

    Ok(backup_path)
}

fn file_mtime_utc(path: &Path) -> Option<DateTime<Utc>> {
    let metadata = std::fs::metadata(path).ok()?;
    let modified = metadata.modified().ok()?;
    Some(DateTime::<Utc>::from(modified))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn now() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-01-01T00:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    #[test]
    fn migrates_legacy_flat_parameter_list() {
        let doc = json!({
            "id": "ToolId",
            "parameters": [
                {"name": "ToolId", "type": "string", "required": true},
                {"name": "dry-run", "type": "boolean", "required": false, "default": false},
            ],
            "execution": {"commands": []},
        });

        let outcome = try_fix(&doc, now(), DEFAULT_DENYLIST).unwrap();
        let parameters = &outcome.fixed_doc["parameters"];
        assert_eq!(parameters["required"][0]["name"], "tool_id");
        assert_eq!(parameters["optional"][0]["name"], "dry_run");
        assert!(parameters["required"][0].get("required").is_none());
    }

    #[test]
    fn inserts_default_strategy() {
        let doc = json!({"id": "t", "parameters": {}, "execution": {"commands": []}});
        let outcome = try_fix(&doc, now(), DEFAULT_DENYLIST).unwrap();
        assert_eq!(outcome.fixed_doc["execution"]["strategy"], "sequential");
    }

    #[test]
    fn inserts_placeholder_command_and_marks_degraded() {
        let doc = json!({"id": "t", "parameters": {}, "execution": {}});
        let outcome = try_fix(&doc, now(), DEFAULT_DENYLIST).unwrap();
        let commands = outcome.fixed_doc["execution"]["commands"].as_array().unwrap();
        assert_eq!(commands.len(), 1);
        assert_eq!(outcome.fixed_doc["metadata"]["degraded"], true);
    }

    #[test]
    fn stubs_missing_metadata_fields() {
        let doc = json!({"id": "t", "parameters": {}, "execution": {"commands": []}});
        let outcome = try_fix(&doc, now(), DEFAULT_DENYLIST).unwrap();
        assert_eq!(outcome.fixed_doc["metadata"]["version"], "1.0.0");
        assert!(outcome.fixed_doc["metadata"]["created"].is_string());
    }

    #[test]
    fn strips_denylisted_fields() {
        let doc = json!({"id": "t", "legacy_id": "old", "parameters": {}, "execution": {"commands": []}});
        let outcome = try_fix(&doc, now(), DEFAULT_DENYLIST).unwrap();
        assert!(outcome.fixed_doc.get("legacy_id").is_none());
    }

    #[test]
    fn fix_is_idempotent() {
        let doc = json!({
            "id": "ToolId",
            "parameters": [{"name": "dry-run", "type": "boolean", "required": false}],
            "execution": {},
        });
        let once = try_fix(&doc, now(), DEFAULT_DENYLIST).unwrap();
        let twice = try_fix(&once.fixed_doc, now(), DEFAULT_DENYLIST).unwrap();
        assert_eq!(once.fixed_doc, twice.fixed_doc);
    }

    #[test]
    fn rejects_non_object_documents() {
        let doc = json!([1, 2, 3]);
        assert!(matches!(
            try_fix(&doc, now(), DEFAULT_DENYLIST),
            Err(AutoFixError::NotAnObject)
        ));
    }
}
