//! Constraint Engine (spec.md §4.8): evaluates Constraint components
//! against a caller-supplied scope through a category-keyed evaluator
//! registry, generalizing the teacher's dangerous-command regex scan into
//! an open set of pluggable rule categories.

use crate::model::Constraint;
use regex::Regex;
use serde_json::Value;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

/// What a Constraint's rules are being checked against (spec.md §4.8).
#[derive(Debug, Clone)]
pub enum Scope {
    Files(Vec<PathBuf>),
    ComponentIds(Vec<String>),
    Payload(Value),
}

#[derive(Debug, Clone)]
pub struct Violation {
    pub constraint_id: String,
    pub severity: String,
    pub location: String,
    pub message: String,
    pub auto_fixable: bool,
}

pub type EvaluatorFn = Arc<dyn Fn(&Constraint, &Scope) -> Vec<Violation> + Send + Sync>;
pub type RemediatorFn = Arc<dyn Fn(&Constraint, &Scope) + Send + Sync>;

/// Host-registered evaluators (and optional remediators) keyed by
/// `constraint.category`. A `"regex"` evaluator ships by default.
#[derive(Clone)]
pub struct EvaluatorTable {
    evaluators: HashMap<String, EvaluatorFn>,
    remediators: HashMap<String, RemediatorFn>,
}

impl Default for EvaluatorTable {
    fn default() -> Self {
        let mut table = Self {
            evaluators: HashMap::new(),
            remediators: HashMap::new(),
        };
        table.register_evaluator("regex", regex_evaluator());
        table
    }
}

impl EvaluatorTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_evaluator(&mut self, category: impl Into<String>, evaluator: EvaluatorFn) {
        self.evaluators.insert(category.into(), evaluator);
    }

    pub fn register_remediator(&mut self, category: impl Into<String>, remediator: RemediatorFn) {
        self.remediators.insert(category.into(), remediator);
    }

    fn evaluator(&self, category: &str) -> Option<EvaluatorFn> {
        self.evaluators.get(category).cloned()
    }

    fn remediator(&self, category: &str) -> Option<RemediatorFn> {
        self.remediators.get(category).cloned()
    }
}

#[derive(Debug, Clone, Default)]
pub struct CheckReport {
    pub violations: Vec<Violation>,
    /// `true` if any surviving violation came from a `blocking` enforcement
    /// at `error`/`critical` severity (spec.md §4.8).
    pub blocking: bool,
}

/// `check(scope)` (spec.md §4.8). Runs every constraint's category
/// evaluator; when `enforcement.auto_fix` is set and a remediator is
/// registered for the category, a fix is attempted once and the check is
/// re-run, reporting `auto_fix_failed` if the violation survives.
pub fn check(constraints: &[Constraint], scope: &Scope, evaluators: &EvaluatorTable) -> CheckReport {
    let mut all = Vec::new();
    let mut blocking = false;

    for constraint in constraints {
        let category = constraint.category.clone().unwrap_or_else(|| "general".to_string());
        let Some(evaluator) = evaluators.evaluator(&category) else {
            tracing::warn!(
                constraint_id = %constraint.id,
                category = %category,
                "no constraint evaluator registered for this category; skipping"
            );
            continue;
        };

        let mut violations = evaluator(constraint, scope);
        if violations.is_empty() {
            continue;
        }

        if constraint.enforcement.auto_fix
            && let Some(remediator) = evaluators.remediator(&category)
        {
            remediator(constraint, scope);
            let rechecked = evaluator(constraint, scope);
            if rechecked.is_empty() {
                continue;
            }
            violations = rechecked
                .into_iter()
                .map(|mut v| {
                    v.message = format!("{} (auto_fix_failed)", v.message);
                    v
                })
                .collect();
        }

        let severity = constraint
            .validation
            .severity
            .as_deref()
            .unwrap_or("info");
        if constraint.enforcement.blocking && matches!(severity, "error" | "critical") {
            blocking = true;
        }

        all.extend(violations);
    }

    CheckReport {
        violations: all,
        blocking,
    }
}

/// Default `"regex"` category evaluator, generalizing the teacher's
/// dangerous-command pattern scan: `validation.rules.pattern` is matched
/// against file contents or a string payload.
fn regex_evaluator() -> EvaluatorFn {
    Arc::new(|constraint, scope| {
        let Some(pattern) = constraint.validation.rules.get("pattern").and_then(Value::as_str) else {
            return vec![];
        };
        let Ok(regex) = Regex::new(pattern) else {
            tracing::warn!(constraint_id = %constraint.id, pattern, "invalid regex in constraint rules");
            return vec![];
        };

        let severity = constraint
            .validation
            .severity
            .clone()
            .unwrap_or_else(|| "warning".to_string());
        let mut violations = Vec::new();

        match scope {
            Scope::Files(paths) => {
                for path in paths {
                    if let Ok(contents) = std::fs::read_to_string(path)
                        && regex.is_match(&contents)
                    {
                        violations.push(Violation {
                            constraint_id: constraint.id.clone(),
                            severity: severity.clone(),
                            location: path.display().to_string(),
                            message: format!("matched forbidden pattern `{pattern}`"),
                            auto_fixable: constraint.enforcement.auto_fix,
                        });
                    }
                }
            }
            Scope::Payload(value) => {
                if let Some(text) = value.as_str()
                    && regex.is_match(text)
                {
                    violations.push(Violation {
                        constraint_id: constraint.id.clone(),
                        severity: severity.clone(),
                        location: "$".to_string(),
                        message: format!("matched forbidden pattern `{pattern}`"),
                        auto_fixable: constraint.enforcement.auto_fix,
                    });
                }
            }
            Scope::ComponentIds(_) => {}
        }

        violations
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ConstraintEnforcement, ConstraintValidation, Metadata};
    use serde_json::json;
    use std::sync::atomic::{AtomicBool, Ordering};

    fn constraint(category: &str, pattern: &str, severity: &str, blocking: bool, auto_fix: bool) -> Constraint {
        Constraint {
            id: "no_secrets".to_string(),
            name: "No secrets".to_string(),
            category: Some(category.to_string()),
            description: None,
            validation: ConstraintValidation {
                rules: json!({"pattern": pattern}),
                severity: Some(severity.to_string()),
                scope: vec![],
            },
            enforcement: ConstraintEnforcement {
                auto_fix,
                require_approval: false,
                blocking,
            },
            metadata: Metadata::default(),
        }
    }

    #[test]
    fn regex_evaluator_flags_matching_payload() {
        let constraints = vec![constraint("regex", "sk-live-[a-z0-9]+", "error", true, false)];
        let evaluators = EvaluatorTable::new();
        let scope = Scope::Payload(json!("token is sk-live-abc123"));
        let report = check(&constraints, &scope, &evaluators);
        assert_eq!(report.violations.len(), 1);
        assert!(report.blocking);
    }

    #[test]
    fn non_blocking_severity_does_not_set_blocking_flag() {
        let constraints = vec![constraint("regex", "sk-live-[a-z0-9]+", "info", true, false)];
        let evaluators = EvaluatorTable::new();
        let scope = Scope::Payload(json!("token is sk-live-abc123"));
        let report = check(&constraints, &scope, &evaluators);
        assert_eq!(report.violations.len(), 1);
        assert!(!report.blocking);
    }

    #[test]
    fn missing_evaluator_is_skipped_not_fatal() {
        let constraints = vec![constraint("unregistered_category", "x", "error", true, false)];
        let evaluators = EvaluatorTable::new();
        let scope = Scope::Payload(json!("x"));
        let report = check(&constraints, &scope, &evaluators);
        assert!(report.violations.is_empty());
    }

    #[test]
    fn auto_fix_remediation_suppresses_violation_when_resolved() {
        let fixed = Arc::new(AtomicBool::new(false));
        let fixed_for_remediator = fixed.clone();
        let fixed_for_evaluator = fixed.clone();

        let mut evaluators = EvaluatorTable::new();
        evaluators.register_evaluator(
            "toggle",
            Arc::new(move |constraint, _scope| {
                if fixed_for_evaluator.load(Ordering::SeqCst) {
                    vec![]
                } else {
                    vec![Violation {
                        constraint_id: constraint.id.clone(),
                        severity: "error".to_string(),
                        location: "$".to_string(),
                        message: "not fixed yet".to_string(),
                        auto_fixable: true,
                    }]
                }
            }),
        );
        evaluators.register_remediator(
            "toggle",
            Arc::new(move |_constraint, _scope| {
                fixed_for_remediator.store(true, Ordering::SeqCst);
            }),
        );

        let constraints = vec![constraint("toggle", "", "error", true, true)];
        let scope = Scope::Payload(json!(null));
        let report = check(&constraints, &scope, &evaluators);
        assert!(report.violations.is_empty());
    }
}
