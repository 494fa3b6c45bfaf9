//! Execution Runtime (spec.md §4.6): binds caller-supplied parameters
//! against a Tool's declared `parameters.required/optional`, then runs
//! `execution.commands` under the declared `execution.strategy`, honoring
//! pre/post conditions and `error_handling[]`.

use crate::actions::{ActionResult, ActionTable};
use crate::learning::{LearningRecorder, NewRecord, RecordKind};
use crate::model::{Command, ErrorHandler, Parameter, Tool};
use crate::validator::value_matches_type;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use force_commons::digest::sha256_hex;
use regex::Regex;
use serde::Serialize;
use serde_json::{Map, Value, json};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::warn;

const GLOBAL_ITERATION_CAP: u32 = 1000;
const DEFAULT_CIRCUIT_COOLDOWN: Duration = Duration::from_secs(30);
/// Failure threshold used when a `circuit_breaker` handler doesn't declare
/// `max_retries` itself, matching the teacher's `CircuitBreakerConfig`
/// default (`vtcode-core/src/tools/circuit_breaker.rs`).
const DEFAULT_CIRCUIT_BREAKER_THRESHOLD: u32 = 5;

#[derive(Debug, Error, Clone)]
pub enum RuntimeError {
    #[error("parameter binding failed: {0}")]
    ParameterError(String),
    #[error("pre-condition failed: {0}")]
    PreconditionFailed(String),
    #[error("post-condition failed: {0}")]
    PostconditionFailed(String),
    #[error("action `{0}` is not registered in the action table")]
    UnknownAction(String),
    #[error("execution needs manual intervention: {0}")]
    NeedsManualIntervention(String),
    #[error("circuit open for `{0}`; short-circuiting")]
    CircuitOpen(String),
    #[error("execution cancelled")]
    Cancelled,
}

/// Caller context available to pre/post-condition predicates, the
/// iterative-strategy continue predicate, and (serialized) to action
/// handlers (spec.md §4.6, §5).
#[derive(Debug, Clone, Default, Serialize)]
pub struct ExecutionContext {
    pub dry_run: bool,
    pub predicates: HashMap<String, bool>,
    #[serde(default)]
    pub values: HashMap<String, Value>,
}

impl ExecutionContext {
    pub fn predicate(&self, name: &str) -> bool {
        self.predicates.get(name).copied().unwrap_or(false)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    Failure,
    Degraded,
    Cancelled,
    /// Produced by the `manual_intervention` error-handling strategy
    /// (spec.md §4.6): a blocker was recorded and the tool result is
    /// `NeedsManualIntervention` rather than a plain failure.
    NeedsManualIntervention,
}

#[derive(Debug, Clone)]
pub enum CommandStatus {
    Success(Value),
    Skipped { reason: String },
    Failed { error: String, error_type: String },
    TimedOut,
    Cancelled,
    /// Produced by the `graceful_degradation` error-handling strategy: the
    /// command failed but the tool as a whole may still report `degraded`
    /// rather than `failure` (spec.md §4.6).
    Degraded { error: String },
    /// Produced by the `manual_intervention` error-handling strategy: the
    /// failure is recorded as a blocker rather than a plain failure
    /// (spec.md §4.6).
    Blocked { message: String },
}

#[derive(Debug, Clone)]
pub struct CommandOutcome {
    pub action: String,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub status: CommandStatus,
}

impl CommandOutcome {
    fn is_failure(&self) -> bool {
        matches!(
            self.status,
            CommandStatus::Failed { .. } | CommandStatus::TimedOut
        )
    }
}

#[derive(Debug, Clone)]
pub struct ExecutionResult {
    pub tool_id: String,
    pub outcome: Outcome,
    pub command_results: Vec<CommandOutcome>,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub duration_ms: i64,
    pub error: Option<String>,
    pub degraded: bool,
}

/// Host hook for the `dynamic`/`adaptive` strategies (spec.md §9 Open
/// Question). When none is registered the Runtime falls back to
/// `sequential` and logs a warning.
#[async_trait]
pub trait SchedulerHook: Send + Sync {
    async fn schedule(
        &self,
        strategy: &str,
        tool: &Tool,
        bound_params: &Value,
        context: &ExecutionContext,
    ) -> Vec<CommandOutcome>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Clone, Default)]
struct BreakerEntry {
    state: Option<BreakerState>,
    failures: u32,
    opened_at: Option<Instant>,
}

/// Per-key (tool_id + action) circuit breaker (spec.md §4.6 `circuit_breaker`
/// strategy, Scenario S5), grounded on the teacher's per-tool circuit
/// breaker state machine.
struct CircuitBreaker {
    entries: parking_lot::RwLock<HashMap<String, BreakerEntry>>,
    cooldown: Duration,
}

impl CircuitBreaker {
    fn new(cooldown: Duration) -> Self {
        Self {
            entries: parking_lot::RwLock::new(HashMap::new()),
            cooldown,
        }
    }

    /// Returns `true` if a call for `key` is allowed to proceed.
    fn allow(&self, key: &str) -> bool {
        let mut entries = self.entries.write();
        let entry = entries.entry(key.to_string()).or_default();
        match entry.state {
            None | Some(BreakerState::Closed) | Some(BreakerState::HalfOpen) => true,
            Some(BreakerState::Open) => {
                let Some(opened_at) = entry.opened_at else {
                    return true;
                };
                if opened_at.elapsed() >= self.cooldown {
                    entry.state = Some(BreakerState::HalfOpen);
                    true
                } else {
                    false
                }
            }
        }
    }

    fn record_success(&self, key: &str) {
        let mut entries = self.entries.write();
        let entry = entries.entry(key.to_string()).or_default();
        entry.state = Some(BreakerState::Closed);
        entry.failures = 0;
        entry.opened_at = None;
    }

    fn record_failure(&self, key: &str, threshold: u32) {
        let mut entries = self.entries.write();
        let entry = entries.entry(key.to_string()).or_default();
        entry.failures += 1;
        if entry.failures >= threshold.max(1) {
            entry.state = Some(BreakerState::Open);
            entry.opened_at = Some(Instant::now());
        }
    }
}

pub struct ExecutionRuntime {
    actions: ActionTable,
    scheduler: Option<Arc<dyn SchedulerHook>>,
    circuit: Arc<CircuitBreaker>,
}

impl ExecutionRuntime {
    pub fn new(actions: ActionTable) -> Self {
        Self {
            actions,
            scheduler: None,
            circuit: Arc::new(CircuitBreaker::new(DEFAULT_CIRCUIT_COOLDOWN)),
        }
    }

    /// Construct with an explicit circuit-breaker cooldown, used by tests
    /// that cannot wait out the default 30s window (Scenario S5).
    pub fn with_circuit_cooldown(actions: ActionTable, cooldown: Duration) -> Self {
        Self {
            actions,
            scheduler: None,
            circuit: Arc::new(CircuitBreaker::new(cooldown)),
        }
    }

    pub fn with_scheduler_hook(mut self, hook: Arc<dyn SchedulerHook>) -> Self {
        self.scheduler = Some(hook);
        self
    }

    /// `execute(tool_id, params, context) -> Result` (spec.md §4.6). Always
    /// emits exactly one Learning record, regardless of outcome (Testable
    /// Property 5).
    pub async fn execute(
        &self,
        tool: &Tool,
        params: &Value,
        context: &ExecutionContext,
        recorder: &LearningRecorder,
        cancel: &CancellationToken,
    ) -> ExecutionResult {
        let started_at = Utc::now();
        let params_digest = sha256_hex(serde_json::to_vec(params).unwrap_or_default().as_slice());

        let bound = match bind_parameters(tool, params) {
            Ok(bound) => bound,
            Err(err) => {
                return self
                    .finish(
                        tool,
                        started_at,
                        &params_digest,
                        Outcome::Failure,
                        vec![],
                        Some(err.to_string()),
                        false,
                        recorder,
                    )
                    .await;
            }
        };

        for condition in &tool.execution.validation.pre_conditions {
            if !context.predicate(condition) {
                let err = RuntimeError::PreconditionFailed(condition.clone());
                return self
                    .finish(
                        tool,
                        started_at,
                        &params_digest,
                        Outcome::Failure,
                        vec![],
                        Some(err.to_string()),
                        false,
                        recorder,
                    )
                    .await;
            }
        }

        let strategy = tool
            .execution
            .strategy
            .clone()
            .unwrap_or_else(|| "sequential".to_string());

        let command_results = if cancel.is_cancelled() {
            vec![]
        } else {
            match strategy.as_str() {
                "sequential" => {
                    self.run_sequential(tool, &bound, context, cancel).await
                }
                "parallel" => self.run_parallel(tool, &bound, context, cancel).await,
                "conditional" => {
                    self.run_conditional(tool, &bound, context, cancel).await
                }
                "iterative" => self.run_iterative(tool, &bound, context, cancel).await,
                "dynamic" | "adaptive" => {
                    if let Some(hook) = &self.scheduler {
                        hook.schedule(&strategy, tool, &bound, context).await
                    } else {
                        warn!(
                            tool_id = %tool.id,
                            strategy = %strategy,
                            "no scheduler hook registered; falling back to sequential"
                        );
                        self.run_sequential(tool, &bound, context, cancel).await
                    }
                }
                other => {
                    warn!(tool_id = %tool.id, strategy = %other, "unknown execution strategy; falling back to sequential");
                    self.run_sequential(tool, &bound, context, cancel).await
                }
            }
        };

        if cancel.is_cancelled() {
            return self
                .finish(
                    tool,
                    started_at,
                    &params_digest,
                    Outcome::Cancelled,
                    command_results,
                    Some(RuntimeError::Cancelled.to_string()),
                    false,
                    recorder,
                )
                .await;
        }

        let degraded = command_results
            .iter()
            .any(|c| matches!(&c.status, CommandStatus::Degraded { .. }));
        let blocked_message = command_results.iter().find_map(|c| match &c.status {
            CommandStatus::Blocked { message } => Some(message.clone()),
            _ => None,
        });
        let aborted = command_results.iter().any(CommandOutcome::is_failure) && !degraded;

        for condition in &tool.execution.validation.post_conditions {
            if !context.predicate(condition) {
                let err = RuntimeError::PostconditionFailed(condition.clone());
                return self
                    .finish(
                        tool,
                        started_at,
                        &params_digest,
                        Outcome::Failure,
                        command_results,
                        Some(err.to_string()),
                        false,
                        recorder,
                    )
                    .await;
            }
        }

        let outcome = if blocked_message.is_some() {
            Outcome::NeedsManualIntervention
        } else if aborted {
            Outcome::Failure
        } else if degraded {
            Outcome::Degraded
        } else {
            Outcome::Success
        };

        let error = blocked_message.map(|message| RuntimeError::NeedsManualIntervention(message).to_string());

        self.finish(tool, started_at, &params_digest, outcome, command_results, error, degraded, recorder)
            .await
    }

    #[allow(clippy::too_many_arguments)]
    async fn finish(
        &self,
        tool: &Tool,
        started_at: DateTime<Utc>,
        params_digest: &str,
        outcome: Outcome,
        command_results: Vec<CommandOutcome>,
        error: Option<String>,
        degraded: bool,
        recorder: &LearningRecorder,
    ) -> ExecutionResult {
        let completed_at = Utc::now();
        let duration_ms = (completed_at - started_at).num_milliseconds();

        recorder
            .append(NewRecord {
                kind: RecordKind::Tool,
                ref_id: tool.id.clone(),
                params_digest: params_digest.to_string(),
                started_at,
                completed_at,
                outcome: outcome_label(outcome).to_string(),
                error: error.clone().map(|message| (String::from("RuntimeError"), message)),
                insights: vec![],
            })
            .await;

        ExecutionResult {
            tool_id: tool.id.clone(),
            outcome,
            command_results,
            started_at,
            completed_at,
            duration_ms,
            error,
            degraded,
        }
    }

    async fn run_sequential(
        &self,
        tool: &Tool,
        bound: &Value,
        context: &ExecutionContext,
        cancel: &CancellationToken,
    ) -> Vec<CommandOutcome> {
        let mut results = Vec::new();
        for command in &tool.execution.commands {
            if cancel.is_cancelled() {
                break;
            }
            let outcome = self
                .run_command_with_handling(tool, command, bound, context, cancel)
                .await;
            let should_abort = matches!(
                resolve_handler(&tool.execution.validation.error_handling, command_error_type(&outcome)),
                Some(handler) if handler.strategy == "abort"
            ) && outcome.is_failure();
            let should_stop_for_intervention = matches!(&outcome.status, CommandStatus::Blocked { .. });
            results.push(outcome);
            if should_abort || should_stop_for_intervention {
                break;
            }
        }
        results
    }

    async fn run_parallel(
        &self,
        tool: &Tool,
        bound: &Value,
        context: &ExecutionContext,
        cancel: &CancellationToken,
    ) -> Vec<CommandOutcome> {
        let mut set = tokio::task::JoinSet::new();
        for command in tool.execution.commands.clone() {
            let tool_id = tool.id.clone();
            let bound = bound.clone();
            let context = context.clone();
            let cancel = cancel.clone();
            let handlers = tool.execution.validation.error_handling.clone();
            let actions = self.actions.clone();
            let circuit = self.circuit.clone();
            set.spawn(async move {
                run_single_command_standalone(&tool_id, &command, &bound, &context, &cancel, &handlers, &actions, Some(circuit.as_ref()))
                    .await
            });
        }

        let mut results = Vec::new();
        while let Some(joined) = set.join_next().await {
            if let Ok(outcome) = joined {
                results.push(outcome);
            }
        }
        results
    }

    async fn run_conditional(
        &self,
        tool: &Tool,
        bound: &Value,
        context: &ExecutionContext,
        cancel: &CancellationToken,
    ) -> Vec<CommandOutcome> {
        let mut results = Vec::new();
        for command in &tool.execution.commands {
            if cancel.is_cancelled() {
                break;
            }
            if let Some(condition) = &command.condition
                && !context.predicate(condition)
            {
                let now = Utc::now();
                results.push(CommandOutcome {
                    action: command.action.clone(),
                    started_at: now,
                    completed_at: now,
                    status: CommandStatus::Skipped {
                        reason: format!("condition `{condition}` is false"),
                    },
                });
                continue;
            }
            results.push(
                self.run_command_with_handling(tool, command, bound, context, cancel)
                    .await,
            );
        }
        results
    }

    async fn run_iterative(
        &self,
        tool: &Tool,
        bound: &Value,
        context: &ExecutionContext,
        cancel: &CancellationToken,
    ) -> Vec<CommandOutcome> {
        let mut results = Vec::new();
        let mut iterations = 0u32;
        let continue_predicate = "continue";
        while context.predicate(continue_predicate) && iterations < GLOBAL_ITERATION_CAP {
            if cancel.is_cancelled() {
                break;
            }
            for command in &tool.execution.commands {
                if cancel.is_cancelled() {
                    break;
                }
                results.push(
                    self.run_command_with_handling(tool, command, bound, context, cancel)
                        .await,
                );
            }
            iterations += 1;
        }
        results
    }

    async fn run_command_with_handling(
        &self,
        tool: &Tool,
        command: &Command,
        bound: &Value,
        context: &ExecutionContext,
        cancel: &CancellationToken,
    ) -> CommandOutcome {
        run_single_command_standalone(
            &tool.id,
            command,
            bound,
            context,
            cancel,
            &tool.execution.validation.error_handling,
            &self.actions,
            Some(self.circuit.as_ref()),
        )
        .await
    }
}

fn outcome_label(outcome: Outcome) -> &'static str {
    match outcome {
        Outcome::Success => "success",
        Outcome::Failure => "failure",
        Outcome::Degraded => "degraded",
        Outcome::Cancelled => "cancelled",
        Outcome::NeedsManualIntervention => "needs_manual_intervention",
    }
}

fn command_error_type(outcome: &CommandOutcome) -> &str {
    match &outcome.status {
        CommandStatus::Failed { error_type, .. } => error_type,
        CommandStatus::TimedOut => "timeout",
        _ => "",
    }
}

fn resolve_handler<'a>(handlers: &'a [ErrorHandler], error_type: &str) -> Option<&'a ErrorHandler> {
    handlers
        .iter()
        .find(|h| h.error_type == error_type)
        .or_else(|| handlers.iter().find(|h| h.error_type == "*"))
}

/// `circuit_breaker` is opt-in per handler (spec.md §4.6): only a Tool that
/// declares it is gated, and the failure threshold comes from that
/// handler's `max_retries` rather than a hardcoded constant.
fn circuit_breaker_threshold(handlers: &[ErrorHandler]) -> Option<u32> {
    handlers
        .iter()
        .find(|h| h.strategy == "circuit_breaker")
        .map(|h| h.max_retries.unwrap_or(DEFAULT_CIRCUIT_BREAKER_THRESHOLD))
}

/// Run one command, including its own declared `retry` attempts and then
/// the matching `error_handling` strategy, against a standalone set of
/// collaborators (so the `parallel` strategy can run this inside a spawned
/// task without borrowing `self`).
#[allow(clippy::too_many_arguments)]
async fn run_single_command_standalone(
    tool_id: &str,
    command: &Command,
    bound: &Value,
    context: &ExecutionContext,
    cancel: &CancellationToken,
    handlers: &[ErrorHandler],
    actions: &ActionTable,
    circuit: Option<&CircuitBreaker>,
) -> CommandOutcome {
    let breaker_key = format!("{tool_id}::{}", command.action);
    let breaker_threshold = circuit_breaker_threshold(handlers);
    let attempts = 1 + command.retry.unwrap_or(0);

    let mut last_status = CommandStatus::Failed {
        error: "command never attempted".to_string(),
        error_type: "action_failed".to_string(),
    };
    let mut started_at = Utc::now();

    for attempt in 0..attempts.max(1) {
        if cancel.is_cancelled() {
            return CommandOutcome {
                action: command.action.clone(),
                started_at,
                completed_at: Utc::now(),
                status: CommandStatus::Cancelled,
            };
        }

        if attempt > 0 {
            tokio::time::sleep(Duration::from_millis(50 * u64::from(attempt))).await;
        }

        started_at = Utc::now();
        last_status = attempt_command(
            tool_id, command, bound, context, cancel, actions, circuit, &breaker_key, breaker_threshold,
        )
        .await;
        if !matches!(last_status, CommandStatus::Failed { .. } | CommandStatus::TimedOut) {
            break;
        }
    }

    let mut outcome = CommandOutcome {
        action: command.action.clone(),
        started_at,
        completed_at: Utc::now(),
        status: last_status,
    };

    if !outcome.is_failure() {
        return outcome;
    }

    let error_type = command_error_type(&outcome);
    let Some(handler) = resolve_handler(handlers, error_type) else {
        return outcome;
    };

    match handler.strategy.as_str() {
        "retry" | "exponential_backoff" => {
            let max_retries = handler.max_retries.unwrap_or(1);
            for retry_attempt in 1..=max_retries {
                if cancel.is_cancelled() {
                    break;
                }
                let backoff = if handler.strategy == "exponential_backoff" {
                    Duration::from_millis(100 * 2u64.saturating_pow(retry_attempt))
                } else {
                    Duration::from_millis(100)
                };
                tokio::time::sleep(backoff).await;
                outcome.status = attempt_command(
                    tool_id, command, bound, context, cancel, actions, circuit, &breaker_key, breaker_threshold,
                )
                .await;
                outcome.completed_at = Utc::now();
                if !outcome.is_failure() {
                    break;
                }
            }
            outcome
        }
        "fallback" => {
            if let Some(fallback_action) = &handler.action {
                let mut fallback_command = command.clone();
                fallback_command.action = fallback_action.clone();
                let status = attempt_command(
                    tool_id,
                    &fallback_command,
                    bound,
                    context,
                    cancel,
                    actions,
                    circuit,
                    &format!("{tool_id}::{fallback_action}"),
                    breaker_threshold,
                )
                .await;
                outcome.action = fallback_action.clone();
                outcome.status = status;
                outcome.completed_at = Utc::now();
            }
            outcome
        }
        "skip" | "continue" | "auto_fix" => {
            outcome.status = CommandStatus::Skipped {
                reason: format!("skipped after failure ({})", handler.strategy),
            };
            outcome
        }
        "graceful_degradation" => {
            let error = match &outcome.status {
                CommandStatus::Failed { error, .. } => error.clone(),
                _ => "command timed out".to_string(),
            };
            outcome.status = CommandStatus::Degraded { error };
            outcome
        }
        "manual_intervention" => {
            let message = match &outcome.status {
                CommandStatus::Failed { error, .. } => error.clone(),
                _ => "command timed out".to_string(),
            };
            outcome.status = CommandStatus::Blocked { message };
            outcome
        }
        // "abort", "escalate", "circuit_breaker" and any unrecognized
        // strategy leave the failure outcome unchanged; the caller
        // (sequential loop, or the top-level executor) decides how to react.
        _ => outcome,
    }
}

#[allow(clippy::too_many_arguments)]
async fn attempt_command(
    tool_id: &str,
    command: &Command,
    bound: &Value,
    context: &ExecutionContext,
    cancel: &CancellationToken,
    actions: &ActionTable,
    circuit: Option<&CircuitBreaker>,
    breaker_key: &str,
    breaker_threshold: Option<u32>,
) -> CommandStatus {
    if breaker_threshold.is_some()
        && let Some(circuit) = circuit
        && !circuit.allow(breaker_key)
    {
        return CommandStatus::Failed {
            error: RuntimeError::CircuitOpen(breaker_key.to_string()).to_string(),
            error_type: "circuit_open".to_string(),
        };
    }

    if context.dry_run {
        let reply = json!({
            "dry_run": true,
            "action": command.action,
            "description": command.description.clone().unwrap_or_default(),
        });
        return CommandStatus::Success(reply);
    }

    let Some(handler) = actions.get(&command.action) else {
        return CommandStatus::Failed {
            error: RuntimeError::UnknownAction(command.action.clone()).to_string(),
            error_type: "unknown_action".to_string(),
        };
    };

    let params = command.parameters.clone().unwrap_or(Value::Null);
    let merged_params = merge_params(bound, &params);
    let context_value = serde_json::to_value(context).unwrap_or(Value::Null);

    let call = handler(merged_params, context_value, cancel.clone());
    let result: Result<ActionResult, tokio::time::error::Elapsed> = match command.timeout {
        Some(secs) => tokio::time::timeout(Duration::from_secs(secs), call).await,
        None => Ok(call.await),
    };

    let status = match result {
        Err(_) => CommandStatus::TimedOut,
        Ok(Ok(value)) => CommandStatus::Success(value),
        Ok(Err(action_error)) => CommandStatus::Failed {
            error: action_error.message,
            error_type: action_error.error_type,
        },
    };

    if let Some(threshold) = breaker_threshold
        && let Some(circuit) = circuit
    {
        match &status {
            CommandStatus::Success(_) => circuit.record_success(breaker_key),
            CommandStatus::Failed { .. } | CommandStatus::TimedOut => {
                circuit.record_failure(breaker_key, threshold);
            }
            _ => {}
        }
    }

    status
}

fn merge_params(bound: &Value, command_params: &Value) -> Value {
    let mut merged = bound.as_object().cloned().unwrap_or_default();
    if let Some(extra) = command_params.as_object() {
        for (key, value) in extra {
            merged.insert(key.clone(), value.clone());
        }
    }
    Value::Object(merged)
}

/// Bind caller-supplied `params` against `tool`'s declared parameters
/// (spec.md §4.6 Binding). No command runs unless every required parameter
/// is bound and every bound value satisfies its declared constraints
/// (Testable Property 6).
pub fn bind_parameters(tool: &Tool, params: &Value) -> Result<Value, RuntimeError> {
    let input = params.as_object().cloned().unwrap_or_default();
    let mut bound = Map::new();

    for parameter in &tool.parameters.required {
        let Some(value) = input.get(&parameter.name) else {
            return Err(RuntimeError::ParameterError(format!(
                "missing required parameter `{}`",
                parameter.name
            )));
        };
        check_parameter(parameter, value)?;
        bound.insert(parameter.name.clone(), value.clone());
    }

    for parameter in &tool.parameters.optional {
        let value = match input.get(&parameter.name) {
            Some(value) => value.clone(),
            None => match &parameter.default {
                Some(default) => default.clone(),
                None => continue,
            },
        };
        check_parameter(parameter, &value)?;
        bound.insert(parameter.name.clone(), value);
    }

    Ok(Value::Object(bound))
}

fn check_parameter(parameter: &Parameter, value: &Value) -> Result<(), RuntimeError> {
    if !value_matches_type(value, &parameter.param_type) {
        return Err(RuntimeError::ParameterError(format!(
            "parameter `{}` does not match declared type `{}`",
            parameter.name, parameter.param_type
        )));
    }

    let Some(constraints) = &parameter.constraints else {
        return Ok(());
    };

    if let Some(min) = constraints.min
        && let Some(number) = value.as_f64()
        && number < min
    {
        return Err(RuntimeError::ParameterError(format!(
            "parameter `{}` value {number} is below min {min}",
            parameter.name
        )));
    }
    if let Some(max) = constraints.max
        && let Some(number) = value.as_f64()
        && number > max
    {
        return Err(RuntimeError::ParameterError(format!(
            "parameter `{}` value {number} is above max {max}",
            parameter.name
        )));
    }
    if let Some(pattern) = &constraints.pattern
        && let Some(text) = value.as_str()
    {
        let regex = Regex::new(pattern).map_err(|err| {
            RuntimeError::ParameterError(format!("invalid constraint pattern `{pattern}`: {err}"))
        })?;
        if !regex.is_match(text) {
            return Err(RuntimeError::ParameterError(format!(
                "parameter `{}` value `{text}` does not match pattern `{pattern}`",
                parameter.name
            )));
        }
    }
    if let Some(allowed) = &constraints.allowed
        && !allowed.contains(value)
    {
        return Err(RuntimeError::ParameterError(format!(
            "parameter `{}` value is not one of the allowed values",
            parameter.name
        )));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Execution, ExecutionValidation, Metadata, Parameters};

    fn noop_tool(strategy: &str, commands: Vec<Command>, handlers: Vec<ErrorHandler>) -> Tool {
        Tool {
            id: "demo_tool".to_string(),
            name: "Demo".to_string(),
            description: None,
            category: None,
            parameters: Parameters::default(),
            execution: Execution {
                strategy: Some(strategy.to_string()),
                commands,
                validation: ExecutionValidation {
                    pre_conditions: vec![],
                    post_conditions: vec![],
                    error_handling: handlers,
                },
            },
            metadata: Metadata::default(),
        }
    }

    fn command(action: &str) -> Command {
        Command {
            action: action.to_string(),
            description: Some(format!("{action} command")),
            parameters: None,
            timeout: None,
            retry: None,
            condition: None,
        }
    }

    fn always_fail_handler() -> crate::actions::ActionHandler {
        Arc::new(|_params, _ctx, _cancel| {
            Box::pin(async move { Err(crate::actions::ActionError::new("boom")) })
        })
    }

    fn always_succeed_handler() -> crate::actions::ActionHandler {
        Arc::new(|params, _ctx, _cancel| Box::pin(async move { Ok(params) }))
    }

    #[tokio::test]
    async fn binding_fails_when_required_parameter_missing() {
        let mut tool = noop_tool("sequential", vec![], vec![]);
        tool.parameters.required.push(Parameter {
            name: "tool_id".to_string(),
            param_type: "string".to_string(),
            description: None,
            default: None,
            constraints: None,
            required: None,
        });
        let err = bind_parameters(&tool, &json!({})).unwrap_err();
        assert!(matches!(err, RuntimeError::ParameterError(_)));
    }

    #[tokio::test]
    async fn sequential_abort_stops_before_third_command() {
        // Scenario S3.
        let mut actions = ActionTable::new();
        actions.register("a", always_succeed_handler());
        actions.register("b", always_fail_handler());
        actions.register("c", always_succeed_handler());

        let handlers = vec![ErrorHandler {
            error_type: "*".to_string(),
            strategy: "abort".to_string(),
            action: None,
            escalation: None,
            max_retries: None,
        }];
        let tool = noop_tool("sequential", vec![command("a"), command("b"), command("c")], handlers);
        let runtime = ExecutionRuntime::new(actions);
        let recorder = LearningRecorder::in_memory();
        let context = ExecutionContext::default();
        let cancel = CancellationToken::new();

        let result = runtime
            .execute(&tool, &json!({}), &context, &recorder, &cancel)
            .await;

        assert_eq!(result.command_results.len(), 2);
        assert!(matches!(result.outcome, Outcome::Failure));
    }

    #[tokio::test]
    async fn manual_intervention_records_a_blocker_instead_of_a_plain_failure() {
        let mut actions = ActionTable::new();
        actions.register("a", always_fail_handler());
        actions.register("b", always_succeed_handler());

        let handlers = vec![ErrorHandler {
            error_type: "*".to_string(),
            strategy: "manual_intervention".to_string(),
            action: None,
            escalation: None,
            max_retries: None,
        }];
        let tool = noop_tool("sequential", vec![command("a"), command("b")], handlers);
        let runtime = ExecutionRuntime::new(actions);
        let recorder = LearningRecorder::in_memory();
        let context = ExecutionContext::default();
        let cancel = CancellationToken::new();

        let result = runtime
            .execute(&tool, &json!({}), &context, &recorder, &cancel)
            .await;

        assert_eq!(result.command_results.len(), 1);
        assert!(matches!(result.outcome, Outcome::NeedsManualIntervention));
        assert!(matches!(
            result.command_results[0].status,
            CommandStatus::Blocked { .. }
        ));
        assert!(result.error.is_some());
    }

    #[tokio::test]
    async fn circuit_breaker_opens_after_threshold_and_recovers_after_cooldown() {
        // Scenario S5.
        let mut actions = ActionTable::new();
        actions.register("flaky", always_fail_handler());

        let handlers = vec![ErrorHandler {
            error_type: "*".to_string(),
            strategy: "circuit_breaker".to_string(),
            action: None,
            escalation: None,
            max_retries: Some(3),
        }];
        let tool = noop_tool("sequential", vec![command("flaky")], handlers);
        let runtime = ExecutionRuntime::with_circuit_cooldown(actions, Duration::from_millis(50));
        let recorder = LearningRecorder::in_memory();
        let context = ExecutionContext::default();

        let mut open_seen = false;
        for _ in 0..4 {
            let cancel = CancellationToken::new();
            let result = runtime
                .execute(&tool, &json!({}), &context, &recorder, &cancel)
                .await;
            if result
                .command_results
                .iter()
                .any(|c| matches!(&c.status, CommandStatus::Failed{error, ..} if error.contains("circuit open")))
            {
                open_seen = true;
            }
        }
        assert!(open_seen, "expected circuit to open after repeated failures");

        tokio::time::sleep(Duration::from_millis(60)).await;
        let cancel = CancellationToken::new();
        let result = runtime
            .execute(&tool, &json!({}), &context, &recorder, &cancel)
            .await;
        // After cooldown the breaker allows one probe attempt again, which
        // still fails against the always-failing handler.
        assert_eq!(result.command_results.len(), 1);
    }

    #[tokio::test]
    async fn circuit_breaker_is_opt_in_per_handler() {
        // A tool that never declares `circuit_breaker` must never short-circuit
        // with `CircuitOpen`, no matter how many times it fails across calls.
        let mut actions = ActionTable::new();
        actions.register("flaky", always_fail_handler());

        let handlers = vec![ErrorHandler {
            error_type: "*".to_string(),
            strategy: "skip".to_string(),
            action: None,
            escalation: None,
            max_retries: None,
        }];
        let tool = noop_tool("sequential", vec![command("flaky")], handlers);
        let runtime = ExecutionRuntime::with_circuit_cooldown(actions, Duration::from_millis(50));
        let recorder = LearningRecorder::in_memory();
        let context = ExecutionContext::default();

        for _ in 0..10 {
            let cancel = CancellationToken::new();
            let result = runtime
                .execute(&tool, &json!({}), &context, &recorder, &cancel)
                .await;
            assert!(
                !result
                    .command_results
                    .iter()
                    .any(|c| matches!(&c.status, CommandStatus::Failed{error, ..} if error.contains("circuit open"))),
                "tool without a circuit_breaker handler must never be gated by the breaker"
            );
        }
    }

    #[tokio::test]
    async fn dry_run_resolves_every_action_to_a_no_op() {
        let mut actions = ActionTable::new();
        actions.register("real", always_fail_handler());
        let tool = noop_tool("sequential", vec![command("real")], vec![]);
        let runtime = ExecutionRuntime::new(actions);
        let recorder = LearningRecorder::in_memory();
        let context = ExecutionContext {
            dry_run: true,
            ..Default::default()
        };
        let cancel = CancellationToken::new();

        let result = runtime
            .execute(&tool, &json!({}), &context, &recorder, &cancel)
            .await;
        assert!(matches!(result.outcome, Outcome::Success));
        assert!(matches!(result.command_results[0].status, CommandStatus::Success(_)));
    }
}
