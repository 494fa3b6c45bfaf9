//! Schema Store (spec.md §4.1): loads and holds the active JSON Schema,
//! preferring the extended (open-enum) variant over the strict one.

use jsonschema::Validator;
use serde_json::Value;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("no schema found under {0}/schemas (expected force-schema.json or force-extended-schema.json)")]
    SchemaMissing(PathBuf),
    #[error("failed to read schema file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse schema file {path} as JSON: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to compile schema {path}: {source}")]
    Compile {
        path: PathBuf,
        #[source]
        source: jsonschema::ValidationError<'static>,
    },
}

/// Which schema document is active. Downstream validation behavior differs
/// only in enum openness (spec.md §4.1 policy).
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchemaType {
    Strict,
    Extended,
}

/// A single schema-validation error, `{path, message}` per spec.md §4.1.
#[derive(Debug, Clone, serde::Serialize)]
pub struct SchemaViolation {
    pub path: String,
    pub message: String,
}

/// Holds the compiled active schema and answers `validate` calls.
pub struct SchemaStore {
    schema_type: SchemaType,
    validator: Validator,
}

impl SchemaStore {
    /// Load the active schema for `root` (spec.md §4.1 `load(root)`).
    /// Extended is preferred when present; `SchemaMissing` is a hard,
    /// startup-blocking error.
    pub fn load(root: &Path) -> Result<Self, SchemaError> {
        let schemas_dir = root.join("schemas");
        let extended_path = schemas_dir.join("force-extended-schema.json");
        let strict_path = schemas_dir.join("force-schema.json");

        let (path, schema_type) = if extended_path.exists() {
            (extended_path, SchemaType::Extended)
        } else if strict_path.exists() {
            (strict_path, SchemaType::Strict)
        } else {
            return Err(SchemaError::SchemaMissing(root.to_path_buf()));
        };

        let raw = std::fs::read_to_string(&path).map_err(|source| SchemaError::Read {
            path: path.clone(),
            source,
        })?;
        let doc: Value = serde_json::from_str(&raw).map_err(|source| SchemaError::Parse {
            path: path.clone(),
            source,
        })?;
        let validator = jsonschema::validator_for(&doc).map_err(|source| SchemaError::Compile {
            path: path.clone(),
            source: source.to_owned(),
        })?;

        Ok(Self {
            schema_type,
            validator,
        })
    }

    pub fn schema_type(&self) -> SchemaType {
        self.schema_type
    }

    /// Validate `document` against the active schema. `expected_kind` is
    /// accepted for symmetry with spec.md §4.1's contract shape; structural
    /// validation is schema-driven and does not special-case the kind.
    pub fn validate(&self, document: &Value, _expected_kind: &str) -> Vec<SchemaViolation> {
        self.validator
            .iter_errors(document)
            .map(|error| SchemaViolation {
                path: error.instance_path.to_string(),
                message: error.to_string(),
            })
            .collect()
    }

    pub fn is_valid(&self, document: &Value) -> bool {
        self.validator.is_valid(document)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write_schema(root: &Path, name: &str, body: &str) {
        let dir = root.join("schemas");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join(name), body).unwrap();
    }

    #[test]
    fn missing_schema_is_a_hard_error() {
        let temp = TempDir::new().unwrap();
        let err = SchemaStore::load(temp.path()).unwrap_err();
        assert!(matches!(err, SchemaError::SchemaMissing(_)));
    }

    #[test]
    fn prefers_extended_over_strict() {
        let temp = TempDir::new().unwrap();
        write_schema(temp.path(), "force-schema.json", r#"{"type":"object"}"#);
        write_schema(
            temp.path(),
            "force-extended-schema.json",
            r#"{"type":"object"}"#,
        );
        let store = SchemaStore::load(temp.path()).unwrap();
        assert_eq!(store.schema_type(), SchemaType::Extended);
    }

    #[test]
    fn falls_back_to_strict_when_extended_absent() {
        let temp = TempDir::new().unwrap();
        write_schema(temp.path(), "force-schema.json", r#"{"type":"object"}"#);
        let store = SchemaStore::load(temp.path()).unwrap();
        assert_eq!(store.schema_type(), SchemaType::Strict);
    }

    #[test]
    fn reports_violations_with_instance_path() {
        let temp = TempDir::new().unwrap();
        write_schema(
            temp.path(),
            "force-schema.json",
            r#"{"type":"object","required":["id"]}"#,
        );
        let store = SchemaStore::load(temp.path()).unwrap();
        let violations = store.validate(&serde_json::json!({}), "tool");
        assert!(!violations.is_empty());
    }
}
