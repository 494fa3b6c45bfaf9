//! Governance Gate (spec.md §4.10): evaluates GovernancePolicy components
//! at component admission and at execution time, persisting the last
//! execution-time verdict per component the way the teacher's tool-policy
//! manager persists allow/prompt/deny decisions under a dotfile.

use crate::config::Mode;
use crate::model::{GovernancePolicy, Kind};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use tokio::sync::Mutex;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Allow,
    Warn { policy_id: String, reason: String },
    Deny { policy_id: String, reason: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerdictRecord {
    pub verdict: String,
    pub policy_id: Option<String>,
    pub reason: Option<String>,
    pub evaluated_at: DateTime<Utc>,
}

/// `admit_ok(component)` (spec.md §4.10): a pure, stateless check applied at
/// Registry admission time, before any component can be observed by a
/// reader. Does not persist — only execution-time verdicts are durable
/// (spec.md §6 on-disk artifacts).
pub fn admit_ok(kind: Kind, id: &str, policies: &[GovernancePolicy], mode: Mode) -> Verdict {
    evaluate(kind.as_str(), id, policies, mode)
}

/// Persists the last evaluated verdict per component id at
/// `<root>/.force/policy_state.json`, mirroring the teacher's
/// `~/.vtcode/tool-policy.json` cache.
pub struct GovernanceGate {
    state: Mutex<HashMap<String, VerdictRecord>>,
    path: Option<PathBuf>,
}

impl GovernanceGate {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(HashMap::new()),
            path: None,
        }
    }

    /// Load persisted verdicts from `path`, starting empty if the file is
    /// absent or unreadable.
    pub async fn load(path: PathBuf) -> anyhow::Result<Self> {
        let state = match tokio::fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice(&bytes).unwrap_or_default(),
            Err(_) => HashMap::new(),
        };
        Ok(Self {
            state: Mutex::new(state),
            path: Some(path),
        })
    }

    async fn save(&self, state: &HashMap<String, VerdictRecord>) {
        let Some(path) = &self.path else { return };
        if let Some(parent) = path.parent()
            && let Err(err) = tokio::fs::create_dir_all(parent).await
        {
            tracing::warn!(%err, "failed to create governance policy state directory");
            return;
        }
        match serde_json::to_vec_pretty(state) {
            Ok(bytes) => {
                if let Err(err) = tokio::fs::write(path, bytes).await {
                    tracing::warn!(%err, "failed to persist governance policy state");
                }
            }
            Err(err) => tracing::warn!(%err, "failed to serialize governance policy state"),
        }
    }

    /// `execute_ok(tool_or_pattern, context)` (spec.md §4.10): evaluates and
    /// persists the verdict for `id`.
    pub async fn execute_ok(&self, kind: Kind, id: &str, policies: &[GovernancePolicy], mode: Mode) -> Verdict {
        let verdict = evaluate(kind.as_str(), id, policies, mode);

        let record = VerdictRecord {
            verdict: verdict_label(&verdict).to_string(),
            policy_id: verdict_policy_id(&verdict),
            reason: verdict_reason(&verdict),
            evaluated_at: Utc::now(),
        };

        let mut state = self.state.lock().await;
        state.insert(id.to_string(), record);
        self.save(&state).await;

        verdict
    }
}

impl Default for GovernanceGate {
    fn default() -> Self {
        Self::new()
    }
}

fn evaluate(applies_to: &str, component_id: &str, policies: &[GovernancePolicy], mode: Mode) -> Verdict {
    let env_name = mode_label(mode);

    for policy in policies {
        let scope = &policy.scope;
        if !scope.applies_to.is_empty() && !scope.applies_to.iter().any(|a| a == applies_to || a == "*") {
            continue;
        }
        if !scope.environments.is_empty() && !scope.environments.iter().any(|e| e == env_name || e == "*") {
            continue;
        }
        if scope.exceptions.iter().any(|e| e == component_id) {
            continue;
        }

        match policy.enforcement.level.as_str() {
            "blocking" => {
                return Verdict::Deny {
                    policy_id: policy.id.clone(),
                    reason: format!("blocked by governance policy `{}`", policy.name),
                };
            }
            "strict" => {
                return Verdict::Deny {
                    policy_id: policy.id.clone(),
                    reason: format!("strict policy `{}` has no exception for `{component_id}`", policy.name),
                };
            }
            "advisory" => {
                return Verdict::Warn {
                    policy_id: policy.id.clone(),
                    reason: format!("advisory policy `{}`", policy.name),
                };
            }
            "monitoring" => {
                tracing::info!(policy_id = %policy.id, component_id, "governance monitoring policy logged");
            }
            other => {
                tracing::warn!(policy_id = %policy.id, level = other, "unknown governance enforcement level; treating as monitoring");
            }
        }
    }

    Verdict::Allow
}

fn mode_label(mode: Mode) -> &'static str {
    match mode {
        Mode::Development => "development",
        Mode::Staging => "staging",
        Mode::Production => "production",
    }
}

fn verdict_label(verdict: &Verdict) -> &'static str {
    match verdict {
        Verdict::Allow => "allow",
        Verdict::Warn { .. } => "warn",
        Verdict::Deny { .. } => "deny",
    }
}

fn verdict_policy_id(verdict: &Verdict) -> Option<String> {
    match verdict {
        Verdict::Allow => None,
        Verdict::Warn { policy_id, .. } | Verdict::Deny { policy_id, .. } => Some(policy_id.clone()),
    }
}

fn verdict_reason(verdict: &Verdict) -> Option<String> {
    match verdict {
        Verdict::Allow => None,
        Verdict::Warn { reason, .. } | Verdict::Deny { reason, .. } => Some(reason.clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{GovernanceEnforcement, GovernanceScope, Metadata};
    use tempfile::TempDir;

    fn policy(level: &str, applies_to: Vec<&str>, exceptions: Vec<&str>) -> GovernancePolicy {
        GovernancePolicy {
            id: format!("policy_{level}"),
            name: format!("{level} policy"),
            category: None,
            policy_type: "mandatory".to_string(),
            enforcement: GovernanceEnforcement {
                level: level.to_string(),
                automated: true,
                validation_rules: vec![],
            },
            scope: GovernanceScope {
                applies_to: applies_to.into_iter().map(String::from).collect(),
                environments: vec![],
                exceptions: exceptions.into_iter().map(String::from).collect(),
            },
            metadata: Metadata::default(),
        }
    }

    #[test]
    fn blocking_policy_denies_regardless_of_environment() {
        let policies = vec![policy("blocking", vec!["tool"], vec![])];
        let verdict = admit_ok(Kind::Tool, "dangerous_tool", &policies, Mode::Development);
        assert!(matches!(verdict, Verdict::Deny { .. }));
    }

    #[test]
    fn strict_policy_allows_explicit_exception() {
        let policies = vec![policy("strict", vec!["tool"], vec!["trusted_tool"])];
        let verdict = admit_ok(Kind::Tool, "trusted_tool", &policies, Mode::Production);
        assert!(matches!(verdict, Verdict::Allow));
    }

    #[test]
    fn strict_policy_denies_without_exception() {
        let policies = vec![policy("strict", vec!["tool"], vec![])];
        let verdict = admit_ok(Kind::Tool, "any_tool", &policies, Mode::Production);
        assert!(matches!(verdict, Verdict::Deny { .. }));
    }

    #[test]
    fn advisory_policy_warns_but_does_not_deny() {
        let policies = vec![policy("advisory", vec!["tool"], vec![])];
        let verdict = admit_ok(Kind::Tool, "any_tool", &policies, Mode::Development);
        assert!(matches!(verdict, Verdict::Warn { .. }));
    }

    #[test]
    fn policy_scoped_to_other_kind_does_not_apply() {
        let policies = vec![policy("blocking", vec!["pattern"], vec![])];
        let verdict = admit_ok(Kind::Tool, "any_tool", &policies, Mode::Production);
        assert!(matches!(verdict, Verdict::Allow));
    }

    #[tokio::test]
    async fn execute_ok_persists_and_reloads_verdict() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join(".force").join("policy_state.json");

        let gate = GovernanceGate::load(path.clone()).await.unwrap();
        let policies = vec![policy("blocking", vec!["tool"], vec![])];
        let verdict = gate.execute_ok(Kind::Tool, "dangerous_tool", &policies, Mode::Production).await;
        assert!(matches!(verdict, Verdict::Deny { .. }));

        let reloaded = GovernanceGate::load(path).await.unwrap();
        let state = reloaded.state.lock().await;
        assert_eq!(state.get("dangerous_tool").map(|r| r.verdict.as_str()), Some("deny"));
    }
}
