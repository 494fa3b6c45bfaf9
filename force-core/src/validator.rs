//! Validator (spec.md §4.3): classifies raw JSON by discriminator fields,
//! then applies JSON-Schema plus semantic checks (snake_case ids, SemVer
//! versions, ISO-8601 timestamps, parameter-name regex, referential
//! integrity of pattern `toolId` / variant `anchors` references).

use crate::model::{Component, Kind};
use crate::schema::SchemaStore;
use chrono::DateTime;
use force_commons::is_snake_case;
use semver::Version;
use serde_json::Value;

/// Diagnostic category, mirrors the error-kind taxonomy of spec.md §7.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Schema,
    Semantic,
    Reference,
    Duplicate,
}

#[derive(Debug, Clone)]
pub struct ValidationIssue {
    pub kind: ErrorKind,
    pub path: String,
    pub message: String,
}

impl ValidationIssue {
    fn semantic(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::Semantic,
            path: path.into(),
            message: message.into(),
        }
    }
}

/// Per-component outcome, `{id, kind, valid, errors[]}` (spec.md §4.3).
#[derive(Debug, Clone)]
pub struct ValidationRecord {
    pub id: String,
    pub kind: Kind,
    pub valid: bool,
    pub errors: Vec<ValidationIssue>,
}

/// Classify a raw JSON document into its component kind, by presence of
/// each kind's required discriminator fields (spec.md §4.3 `classify`).
pub fn classify(doc: &Value) -> Option<Kind> {
    let obj = doc.as_object()?;

    let has_parameters = obj.contains_key("parameters");
    let has_execution = obj.contains_key("execution");
    if has_parameters && has_execution {
        return Some(Kind::Tool);
    }

    if obj.contains_key("implementation") {
        return Some(Kind::Pattern);
    }

    if obj.contains_key("validation") && obj.contains_key("enforcement") {
        return Some(Kind::Constraint);
    }

    let enforcement_level = obj
        .get("enforcement")
        .and_then(Value::as_object)
        .is_some_and(|e| e.contains_key("level"));
    if obj.contains_key("policy_type") && enforcement_level {
        return Some(Kind::GovernancePolicy);
    }

    if obj.contains_key("instructions") && obj.contains_key("anchors") {
        return Some(Kind::Variant);
    }

    if obj.contains_key("title") {
        return Some(Kind::LearningRecord);
    }

    None
}

/// Deserialize `doc` into its typed `Component` form for the given `kind`.
pub fn deserialize_typed(doc: &Value, kind: Kind) -> Result<Component, serde_json::Error> {
    Ok(match kind {
        Kind::Tool => Component::Tool(serde_json::from_value(doc.clone())?),
        Kind::Pattern => Component::Pattern(serde_json::from_value(doc.clone())?),
        Kind::Constraint => Component::Constraint(serde_json::from_value(doc.clone())?),
        Kind::GovernancePolicy => Component::GovernancePolicy(serde_json::from_value(doc.clone())?),
        Kind::LearningRecord => Component::LearningRecord(serde_json::from_value(doc.clone())?),
        Kind::Variant => Component::Variant(serde_json::from_value(doc.clone())?),
    })
}

/// Validate one document end-to-end: JSON-Schema, then semantic checks.
/// Does not perform referential-integrity checks, which require the full
/// admitted set (see [`check_references`]).
pub fn validate_document(
    schema: &SchemaStore,
    doc: &Value,
    kind: Kind,
) -> ValidationRecord {
    let id = doc
        .get("id")
        .and_then(Value::as_str)
        .unwrap_or("<unknown>")
        .to_string();

    let mut errors: Vec<ValidationIssue> = schema
        .validate(doc, kind.as_str())
        .into_iter()
        .map(|violation| ValidationIssue {
            kind: ErrorKind::Schema,
            path: violation.path,
            message: violation.message,
        })
        .collect();

    match deserialize_typed(doc, kind) {
        Ok(component) => errors.extend(semantic_checks(&component)),
        Err(err) => errors.push(ValidationIssue::semantic(
            "$",
            format!("document does not match the {} shape: {err}", kind.as_str()),
        )),
    }

    ValidationRecord {
        valid: errors.is_empty(),
        id,
        kind,
        errors,
    }
}

fn semantic_checks(component: &Component) -> Vec<ValidationIssue> {
    let mut issues = Vec::new();

    if !is_snake_case(component.id()) {
        issues.push(ValidationIssue::semantic(
            "$.id",
            format!("id `{}` is not snake_case", component.id()),
        ));
    }

    let metadata = component.metadata();
    if let Some(version) = &metadata.version
        && Version::parse(version).is_err()
    {
        issues.push(ValidationIssue::semantic(
            "$.metadata.version",
            format!("`{version}` does not parse as SemVer"),
        ));
    }

    let created = metadata
        .created
        .as_deref()
        .map(|value| (value, DateTime::parse_from_rfc3339(value)));
    let updated = metadata
        .updated
        .as_deref()
        .map(|value| (value, DateTime::parse_from_rfc3339(value)));

    if let Some((raw, Err(_))) = &created {
        issues.push(ValidationIssue::semantic(
            "$.metadata.created",
            format!("`{raw}` is not a valid ISO-8601 timestamp"),
        ));
    }
    if let Some((raw, Err(_))) = &updated {
        issues.push(ValidationIssue::semantic(
            "$.metadata.updated",
            format!("`{raw}` is not a valid ISO-8601 timestamp"),
        ));
    }
    if let (Some((_, Ok(created))), Some((_, Ok(updated)))) = (&created, &updated)
        && updated < created
    {
        issues.push(ValidationIssue::semantic(
            "$.metadata.updated",
            "metadata.updated precedes metadata.created",
        ));
    }

    if let Component::Tool(tool) = component {
        for parameter in tool.parameters.required.iter().chain(&tool.parameters.optional) {
            if !is_snake_case(&parameter.name) {
                issues.push(ValidationIssue::semantic(
                    format!("$.parameters.*.{}", parameter.name),
                    format!("parameter name `{}` is not snake_case", parameter.name),
                ));
            }
            if let Some(default) = &parameter.default
                && !default_matches_type(default, &parameter.param_type)
            {
                issues.push(ValidationIssue::semantic(
                    format!("$.parameters.*.{}.default", parameter.name),
                    format!(
                        "default value does not match declared type `{}`",
                        parameter.param_type
                    ),
                ));
            }
        }
    }

    issues
}

/// Whether `value` structurally matches a declared parameter `type`
/// (spec.md §3 Parameter). Shared with the Execution Runtime's parameter
/// binding, which applies the same check to bound values.
pub fn value_matches_type(value: &Value, param_type: &str) -> bool {
    default_matches_type(value, param_type)
}

fn default_matches_type(value: &Value, param_type: &str) -> bool {
    match param_type {
        "string" | "date" | "datetime" | "file" | "file_path" | "directory_path" => {
            value.is_string()
        }
        "number" | "float" => value.is_number(),
        "integer" => value.is_i64() || value.is_u64(),
        "boolean" => value.is_boolean(),
        "array" => value.is_array(),
        "object" | "json" => value.is_object(),
        // Unknown/custom types (extended schema) are not type-checked here.
        _ => true,
    }
}

/// Cross-check referential integrity across the full set of components
/// about to be admitted: Pattern `executable_steps[*].toolId` and Variant
/// `anchors.*` must resolve to an id present in `known_ids` (spec.md §4.3,
/// Testable Property 8).
pub fn check_references(
    components: &[Component],
    known_ids: &std::collections::HashMap<Kind, std::collections::HashSet<String>>,
) -> Vec<(String, ValidationIssue)> {
    let mut issues = Vec::new();
    let empty = std::collections::HashSet::new();

    for component in components {
        match component {
            Component::Pattern(pattern) => {
                let tool_ids = known_ids.get(&Kind::Tool).unwrap_or(&empty);
                for step in &pattern.implementation.executable_steps {
                    if let Some(tool_id) = &step.tool_id
                        && !tool_ids.contains(tool_id)
                    {
                        issues.push((
                            pattern.id.clone(),
                            ValidationIssue {
                                kind: ErrorKind::Reference,
                                path: format!("$.implementation.executable_steps[{}].toolId", step.name),
                                message: format!("toolId `{tool_id}` does not resolve to an admitted tool"),
                            },
                        ));
                    }
                }
            }
            Component::Variant(variant) => {
                let checks: [(Kind, &[String]); 4] = [
                    (Kind::Constraint, &variant.anchors.constraints),
                    (Kind::GovernancePolicy, &variant.anchors.governance),
                    (Kind::Pattern, &variant.anchors.patterns),
                    (Kind::LearningRecord, &variant.anchors.learnings),
                ];
                for (kind, ids) in checks {
                    let admitted = known_ids.get(&kind).unwrap_or(&empty);
                    for anchor_id in ids {
                        if !admitted.contains(anchor_id) {
                            issues.push((
                                variant.id.clone(),
                                ValidationIssue {
                                    kind: ErrorKind::Reference,
                                    path: format!("$.anchors.{}", kind.directory()),
                                    message: format!(
                                        "anchor `{anchor_id}` does not resolve to an admitted {}",
                                        kind.as_str()
                                    ),
                                },
                            ));
                        }
                    }
                }
            }
            _ => {}
        }
    }

    issues
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn classifies_tool_by_parameters_and_execution() {
        let doc = json!({"parameters": {}, "execution": {"commands": []}});
        assert_eq!(classify(&doc), Some(Kind::Tool));
    }

    #[test]
    fn classifies_pattern_by_implementation() {
        let doc = json!({"implementation": {"steps": []}});
        assert_eq!(classify(&doc), Some(Kind::Pattern));
    }

    #[test]
    fn classifies_governance_policy_requires_enforcement_level() {
        let doc = json!({"policy_type": "mandatory", "enforcement": {"automated": true}});
        assert_eq!(classify(&doc), None);

        let doc = json!({"policy_type": "mandatory", "enforcement": {"level": "blocking"}});
        assert_eq!(classify(&doc), Some(Kind::GovernancePolicy));
    }

    #[test]
    fn classifies_variant_by_instructions_and_anchors() {
        let doc = json!({"instructions": "do x", "anchors": {}});
        assert_eq!(classify(&doc), Some(Kind::Variant));
    }

    #[test]
    fn rejects_non_snake_case_id() {
        let tool = Component::Tool(crate::model::Tool {
            id: "MyTool".to_string(),
            name: "My Tool".to_string(),
            description: None,
            category: None,
            parameters: Default::default(),
            execution: crate::model::Execution {
                strategy: None,
                commands: vec![],
                validation: Default::default(),
            },
            metadata: Default::default(),
        });
        let issues = semantic_checks(&tool);
        assert!(issues.iter().any(|i| i.path == "$.id"));
    }

    #[test]
    fn rejects_non_semver_version() {
        let mut metadata = crate::model::Metadata::default();
        metadata.version = Some("not-semver".to_string());
        let tool = Component::Tool(crate::model::Tool {
            id: "my_tool".to_string(),
            name: "My Tool".to_string(),
            description: None,
            category: None,
            parameters: Default::default(),
            execution: crate::model::Execution {
                strategy: None,
                commands: vec![],
                validation: Default::default(),
            },
            metadata,
        });
        let issues = semantic_checks(&tool);
        assert!(issues.iter().any(|i| i.path == "$.metadata.version"));
    }

    #[test]
    fn references_unresolved_tool_id_is_reported() {
        let pattern = Component::Pattern(crate::model::Pattern {
            id: "p1".to_string(),
            name: "P1".to_string(),
            category: None,
            description: None,
            context: Default::default(),
            implementation: crate::model::PatternImplementation {
                steps: vec![],
                executable_steps: vec![crate::model::ExecutableStep {
                    name: "s1".to_string(),
                    tool_id: Some("missing_tool".to_string()),
                    parameters: None,
                    optional: false,
                }],
            },
            metadata: Default::default(),
        });
        let known = std::collections::HashMap::new();
        let issues = check_references(&[pattern], &known);
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].1.kind, ErrorKind::Reference);
    }
}
