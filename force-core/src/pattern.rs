//! Pattern Engine (spec.md §4.7): orchestrates a Pattern's
//! `implementation.executable_steps`, binding each tool-bound step through
//! the Execution Runtime and aggregating per-step results into a single
//! outcome. Steps with no `toolId` are descriptive and only logged.

use crate::learning::{LearningRecorder, NewRecord, RecordKind};
use crate::model::{Component, ExecutableStep, Kind};
use crate::registry::Registry;
use crate::runtime::{ExecutionContext, ExecutionResult, ExecutionRuntime, Outcome};
use chrono::{DateTime, Utc};
use force_commons::digest::sha256_hex;
use serde_json::Value;
use std::collections::HashMap;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Error)]
pub enum PatternError {
    #[error("pattern `{0}` not found in registry")]
    NotFound(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatternOutcome {
    Success,
    Partial,
    Failure,
}

/// What happened to one step of `implementation`.
#[derive(Debug, Clone)]
pub enum StepStatus {
    /// A tool-bound step ran through the Execution Runtime.
    Executed(ExecutionResult),
    /// A descriptive step (no `toolId`, or the fallback `steps` list).
    Informational,
    /// An optional step whose tool could not be resolved or run.
    Skipped { reason: String },
}

#[derive(Debug, Clone)]
pub struct StepResult {
    pub name: String,
    pub status: StepStatus,
}

#[derive(Debug, Clone)]
pub struct PatternResult {
    pub pattern_id: String,
    pub outcome: PatternOutcome,
    pub steps: Vec<StepResult>,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub duration_ms: i64,
}

/// `apply(pattern_id, context)` (spec.md §4.7). `continue_on_failure` comes
/// from the caller's already-evaluated Governance verdict: an `advisory`
/// policy lets the pattern keep going past a required step's failure.
#[allow(clippy::too_many_arguments)]
pub async fn apply(
    registry: &Registry,
    runtime: &ExecutionRuntime,
    recorder: &LearningRecorder,
    pattern_id: &str,
    context: &ExecutionContext,
    parameter_overrides: &HashMap<String, Value>,
    continue_on_failure: bool,
    cancel: &CancellationToken,
) -> Result<PatternResult, PatternError> {
    let started_at = Utc::now();

    let component = registry
        .get(Kind::Pattern, pattern_id)
        .ok_or_else(|| PatternError::NotFound(pattern_id.to_string()))?;
    let Component::Pattern(pattern) = component else {
        return Err(PatternError::NotFound(pattern_id.to_string()));
    };

    let mut steps = Vec::new();
    let mut short_circuited = false;
    let mut any_skip_or_degrade = false;

    if pattern.implementation.executable_steps.is_empty() {
        for step_name in &pattern.implementation.steps {
            steps.push(StepResult {
                name: step_name.clone(),
                status: StepStatus::Informational,
            });
        }
    } else {
        for step in &pattern.implementation.executable_steps {
            if cancel.is_cancelled() {
                break;
            }

            let Some(tool_id) = &step.tool_id else {
                tracing::warn!(
                    pattern_id,
                    step = %step.name,
                    "executable step has no toolId; treating as descriptive"
                );
                steps.push(StepResult {
                    name: step.name.clone(),
                    status: StepStatus::Informational,
                });
                continue;
            };

            let Some(Component::Tool(tool)) = registry.get(Kind::Tool, tool_id) else {
                steps.push(StepResult {
                    name: step.name.clone(),
                    status: StepStatus::Skipped {
                        reason: "tool_not_found".to_string(),
                    },
                });
                if step.optional {
                    any_skip_or_degrade = true;
                    continue;
                }
                short_circuited = true;
                break;
            };

            let merged = merge_step_parameters(step, parameter_overrides);
            let result = runtime.execute(&tool, &merged, context, recorder, cancel).await;
            let failed = matches!(
                result.outcome,
                Outcome::Failure | Outcome::NeedsManualIntervention
            );
            let degraded = matches!(result.outcome, Outcome::Degraded);
            steps.push(StepResult {
                name: step.name.clone(),
                status: StepStatus::Executed(result),
            });

            if degraded {
                any_skip_or_degrade = true;
            }
            if failed {
                if step.optional || continue_on_failure {
                    any_skip_or_degrade = true;
                } else {
                    short_circuited = true;
                    break;
                }
            }
        }
    }

    let outcome = if short_circuited {
        PatternOutcome::Failure
    } else if any_skip_or_degrade {
        PatternOutcome::Partial
    } else {
        PatternOutcome::Success
    };

    let completed_at = Utc::now();
    let duration_ms = (completed_at - started_at).num_milliseconds();
    let params_digest = sha256_hex(serde_json::to_vec(parameter_overrides).unwrap_or_default().as_slice());

    recorder
        .append(NewRecord {
            kind: RecordKind::Pattern,
            ref_id: pattern.id.clone(),
            params_digest,
            started_at,
            completed_at,
            outcome: pattern_outcome_label(outcome).to_string(),
            error: matches!(outcome, PatternOutcome::Failure)
                .then(|| ("PatternError".to_string(), "step_failed".to_string())),
            insights: vec![],
        })
        .await;

    Ok(PatternResult {
        pattern_id: pattern.id.clone(),
        outcome,
        steps,
        started_at,
        completed_at,
        duration_ms,
    })
}

fn pattern_outcome_label(outcome: PatternOutcome) -> &'static str {
    match outcome {
        PatternOutcome::Success => "success",
        PatternOutcome::Partial => "partial",
        PatternOutcome::Failure => "failure",
    }
}

fn merge_step_parameters(step: &ExecutableStep, overrides: &HashMap<String, Value>) -> Value {
    let mut merged = step
        .parameters
        .as_ref()
        .and_then(Value::as_object)
        .cloned()
        .unwrap_or_default();
    for (key, value) in overrides {
        merged.insert(key.clone(), value.clone());
    }
    Value::Object(merged)
}
