//! MCP tool handlers (spec.md §4.11): translates protocol calls into
//! `force_core::Engine` operations. Each method name matches the spec's MCP
//! surface exactly; the wire shape is an `rmcp` tool call whose JSON result
//! carries a top-level `outcome` field (spec.md §6).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use force_core::actions::ActionTable;
use force_core::constraint::{CheckReport, Scope, Violation};
use force_core::engine::{Engine, EngineError, SyncDirection};
use force_core::learning::{Aggregate, QueryFilter};
use force_core::model::Component;
use force_core::pattern::{PatternOutcome, PatternResult, StepStatus};
use force_core::registry::ListFilter;
use force_core::runtime::{CommandOutcome, CommandStatus, ExecutionContext, ExecutionResult, Outcome};
use rmcp::handler::server::wrapper::Parameters;
use rmcp::model::{CallToolResult, Content, Implementation, ProtocolVersion, ServerCapabilities, ServerInfo};
use rmcp::{ErrorData as McpError, ServerHandler, handler::server::tool::ToolRouter, tool, tool_handler, tool_router};
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;

fn mcp_error(err: impl ToString) -> McpError {
    McpError::internal_error(err.to_string(), None)
}

fn json_result(value: Value) -> Result<CallToolResult, McpError> {
    let text = serde_json::to_string_pretty(&value).map_err(mcp_error)?;
    Ok(CallToolResult::success(vec![Content::text(text)]))
}

/// Builds a `CancellationToken` that fires after `timeout_ms`, implementing
/// the per-call deadline every `execute`/`apply` accepts (spec.md §5).
fn deadline_token(timeout_ms: Option<u64>) -> CancellationToken {
    let token = CancellationToken::new();
    if let Some(ms) = timeout_ms {
        let child = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(ms)).await;
            child.cancel();
        });
    }
    token
}

#[derive(Debug, Deserialize, JsonSchema, Default)]
pub struct ListFilterParams {
    /// Restrict to this `category`.
    pub category: Option<String>,
    /// Every listed tag must be present on the component.
    #[serde(default)]
    pub tags: Vec<String>,
    pub complexity: Option<String>,
    /// Case-insensitive substring match on `name`/`description`.
    pub name_contains: Option<String>,
}

impl From<ListFilterParams> for ListFilter {
    fn from(params: ListFilterParams) -> Self {
        ListFilter {
            category: params.category,
            tags: params.tags,
            complexity: params.complexity,
            name_contains: params.name_contains,
        }
    }
}

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ExecuteToolParams {
    pub tool_id: String,
    #[serde(default)]
    pub parameters: Value,
    /// Binds and validates but resolves every action to a no-op
    /// (spec.md §4.11 `force_execute_tool`).
    #[serde(default)]
    pub dry_run: bool,
    #[serde(default)]
    pub predicates: HashMap<String, bool>,
    #[serde(default)]
    pub context_values: HashMap<String, Value>,
    /// Caller-supplied deadline in milliseconds (spec.md §5).
    pub timeout_ms: Option<u64>,
}

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ApplyPatternParams {
    pub pattern_id: String,
    #[serde(default)]
    pub dry_run: bool,
    #[serde(default)]
    pub predicates: HashMap<String, bool>,
    #[serde(default)]
    pub context_values: HashMap<String, Value>,
    #[serde(default)]
    pub parameter_overrides: HashMap<String, Value>,
    pub timeout_ms: Option<u64>,
}

#[derive(Debug, Deserialize, JsonSchema, Default)]
pub struct CheckConstraintsParams {
    /// Exactly one of `files`, `component_ids`, or `payload` should be set;
    /// the first one present wins.
    pub files: Option<Vec<String>>,
    pub component_ids: Option<Vec<String>>,
    pub payload: Option<Value>,
}

impl CheckConstraintsParams {
    fn into_scope(self) -> Scope {
        if let Some(files) = self.files {
            Scope::Files(files.into_iter().map(std::path::PathBuf::from).collect())
        } else if let Some(ids) = self.component_ids {
            Scope::ComponentIds(ids)
        } else {
            Scope::Payload(self.payload.unwrap_or(Value::Null))
        }
    }
}

#[derive(Debug, Deserialize, JsonSchema, Default)]
pub struct GetInsightsParams {
    pub ref_id: Option<String>,
    pub outcome: Option<String>,
    /// ISO-8601 timestamp, inclusive lower bound.
    pub since: Option<String>,
    /// ISO-8601 timestamp, inclusive upper bound.
    pub until: Option<String>,
}

impl GetInsightsParams {
    fn into_filter(self) -> Result<QueryFilter, McpError> {
        let parse = |label: &str, value: Option<String>| -> Result<Option<DateTime<Utc>>, McpError> {
            value
                .map(|raw| {
                    DateTime::parse_from_rfc3339(&raw)
                        .map(|dt| dt.with_timezone(&Utc))
                        .map_err(|err| McpError::invalid_params(format!("invalid {label}: {err}"), None))
                })
                .transpose()
        };
        Ok(QueryFilter {
            since: parse("since", self.since)?,
            until: parse("until", self.until)?,
            ref_id: self.ref_id,
            outcome: self.outcome,
        })
    }
}

#[derive(Debug, Deserialize, JsonSchema, Default)]
pub struct FixComponentsParams {
    #[serde(default)]
    pub dry_run: bool,
}

#[derive(Debug, Deserialize, JsonSchema, Default)]
pub struct SyncParams {
    /// `"to_aggregate"` or `"to_single"`; defaults to `"to_aggregate"`.
    pub direction: Option<String>,
}

fn parse_direction(direction: Option<String>) -> Result<SyncDirection, McpError> {
    match direction.as_deref() {
        None | Some("to_aggregate") => Ok(SyncDirection::ToAggregate),
        Some("to_single") => Ok(SyncDirection::ToSingle),
        Some(other) => Err(McpError::invalid_params(
            format!("unknown sync direction `{other}`"),
            None,
        )),
    }
}

fn component_json(component: &Component) -> Value {
    serde_json::to_value(component).unwrap_or(Value::Null)
}

fn command_outcome_json(outcome: &CommandOutcome) -> Value {
    if let CommandStatus::Skipped { reason } = &outcome.status {
        return json!({
            "action": outcome.action,
            "started_at": outcome.started_at,
            "completed_at": outcome.completed_at,
            "status": "skipped",
            "reason": reason,
        });
    }
    let (error, error_type) = match &outcome.status {
        CommandStatus::Failed { error, error_type } => (Some(error.clone()), Some(error_type.clone())),
        CommandStatus::Degraded { error } => (Some(error.clone()), None),
        CommandStatus::Blocked { message } => (Some(message.clone()), Some("manual_intervention".to_string())),
        _ => (None, None),
    };
    let result = match &outcome.status {
        CommandStatus::Success(value) => Some(value.clone()),
        _ => None,
    };
    json!({
        "action": outcome.action,
        "started_at": outcome.started_at,
        "completed_at": outcome.completed_at,
        "status": match &outcome.status {
            CommandStatus::Success(_) => "success",
            CommandStatus::Skipped { .. } => "skipped",
            CommandStatus::Failed { .. } => "failed",
            CommandStatus::TimedOut => "timed_out",
            CommandStatus::Cancelled => "cancelled",
            CommandStatus::Degraded { .. } => "degraded",
            CommandStatus::Blocked { .. } => "blocked",
        },
        "result": result,
        "error": error,
        "error_type": error_type,
    })
}

fn execution_result_json(result: &ExecutionResult) -> Value {
    json!({
        "outcome": match result.outcome {
            Outcome::Success => "success",
            Outcome::Failure => "failure",
            Outcome::Degraded => "degraded",
            Outcome::Cancelled => "cancelled",
            Outcome::NeedsManualIntervention => "needs_manual_intervention",
        },
        "tool_id": result.tool_id,
        "command_results": result.command_results.iter().map(command_outcome_json).collect::<Vec<_>>(),
        "started_at": result.started_at,
        "completed_at": result.completed_at,
        "duration_ms": result.duration_ms,
        "error": result.error,
        "degraded": result.degraded,
    })
}

fn pattern_result_json(result: &PatternResult) -> Value {
    json!({
        "outcome": match result.outcome {
            PatternOutcome::Success => "success",
            PatternOutcome::Partial => "partial",
            PatternOutcome::Failure => "failure",
        },
        "pattern_id": result.pattern_id,
        "steps": result.steps.iter().map(|step| {
            match &step.status {
                StepStatus::Executed(execution) => json!({
                    "name": step.name,
                    "status": "executed",
                    "result": execution_result_json(execution),
                }),
                StepStatus::Informational => json!({
                    "name": step.name,
                    "status": "informational",
                }),
                StepStatus::Skipped { reason } => json!({
                    "name": step.name,
                    "status": "skipped",
                    "reason": reason,
                }),
            }
        }).collect::<Vec<_>>(),
        "started_at": result.started_at,
        "completed_at": result.completed_at,
        "duration_ms": result.duration_ms,
    })
}

fn violation_json(violation: &Violation) -> Value {
    json!({
        "constraint_id": violation.constraint_id,
        "severity": violation.severity,
        "location": violation.location,
        "message": violation.message,
        "auto_fixable": violation.auto_fixable,
    })
}

fn check_report_json(report: &CheckReport) -> Value {
    json!({
        "outcome": if report.blocking { "denied" } else { "allowed" },
        "blocking": report.blocking,
        "violations": report.violations.iter().map(violation_json).collect::<Vec<_>>(),
    })
}

fn aggregate_json(aggregate: &Aggregate) -> Value {
    json!({
        "usage_count": aggregate.usage_count,
        "success_rate": aggregate.success_rate,
        "avg_duration_ms": aggregate.avg_duration_ms,
        "last_seen": aggregate.last_seen,
        "lifecycle": format!("{:?}", aggregate.lifecycle).to_lowercase(),
    })
}

fn engine_error_kind(err: &EngineError) -> &'static str {
    match err {
        EngineError::SchemaMissing(_) => "SchemaMissing",
        EngineError::InvalidConfig(_) => "InvalidConfig",
        EngineError::CriticalComponentsInvalid(_) => "CriticalComponentsInvalid",
        EngineError::ToolNotFound(_) => "ToolNotFound",
        EngineError::Pattern(_) => "PatternError",
        EngineError::PolicyDenied { .. } => "PolicyDenied",
        EngineError::Io(_) => "Io",
        EngineError::Other(_) => "Other",
    }
}

fn engine_error_json(err: &EngineError) -> Value {
    json!({
        "outcome": "error",
        "error": {"type": engine_error_kind(err), "message": err.to_string()},
    })
}

/// The MCP surface over an `Engine` (spec.md §4.11). `Clone` is shallow: the
/// router table and the `Arc<Engine>` are both cheap to share across
/// concurrently-handled requests (spec.md §5 "multi-request").
#[derive(Clone)]
pub struct ForceServer {
    tool_router: ToolRouter<Self>,
    engine: Arc<Engine>,
}

#[tool_router]
impl ForceServer {
    pub fn new(engine: Arc<Engine>) -> Self {
        Self {
            tool_router: Self::tool_router(),
            engine,
        }
    }

    #[tool(description = "List admitted Tools, optionally filtered by category/tags/complexity/name substring.")]
    async fn force_list_tools(
        &self,
        Parameters(filter): Parameters<ListFilterParams>,
    ) -> Result<CallToolResult, McpError> {
        let components = self.engine.list_tools(&filter.into());
        json_result(json!({
            "outcome": "ok",
            "tools": components.iter().map(component_json).collect::<Vec<_>>(),
        }))
    }

    #[tool(description = "List admitted Patterns, optionally filtered by category/tags/complexity/name substring.")]
    async fn force_list_patterns(
        &self,
        Parameters(filter): Parameters<ListFilterParams>,
    ) -> Result<CallToolResult, McpError> {
        let components = self.engine.list_patterns(&filter.into());
        json_result(json!({
            "outcome": "ok",
            "patterns": components.iter().map(component_json).collect::<Vec<_>>(),
        }))
    }

    #[tool(description = "Bind parameters and run a Tool's command sequence under its declared execution strategy. Set dryRun to validate without invoking any action.")]
    async fn force_execute_tool(
        &self,
        Parameters(params): Parameters<ExecuteToolParams>,
    ) -> Result<CallToolResult, McpError> {
        let cancel = deadline_token(params.timeout_ms);
        let context = ExecutionContext {
            dry_run: params.dry_run,
            predicates: params.predicates,
            values: params.context_values,
        };
        match self
            .engine
            .execute_tool(&params.tool_id, &params.parameters, &context, &cancel)
            .await
        {
            Ok(result) => json_result(execution_result_json(&result)),
            Err(err) => json_result(engine_error_json(&err)),
        }
    }

    #[tool(description = "Run a Pattern's executable and descriptive steps in order, aggregating per-step results.")]
    async fn force_apply_pattern(
        &self,
        Parameters(params): Parameters<ApplyPatternParams>,
    ) -> Result<CallToolResult, McpError> {
        let cancel = deadline_token(params.timeout_ms);
        let context = ExecutionContext {
            dry_run: params.dry_run,
            predicates: params.predicates,
            values: params.context_values,
        };
        match self
            .engine
            .apply_pattern(&params.pattern_id, &context, &params.parameter_overrides, &cancel)
            .await
        {
            Ok(result) => json_result(pattern_result_json(&result)),
            Err(err) => json_result(engine_error_json(&err)),
        }
    }

    #[tool(description = "Evaluate admitted Constraints against a scope of files, component ids, or an arbitrary JSON payload.")]
    async fn force_check_constraints(
        &self,
        Parameters(params): Parameters<CheckConstraintsParams>,
    ) -> Result<CallToolResult, McpError> {
        let report = self.engine.check_constraints(&params.into_scope());
        json_result(check_report_json(&report))
    }

    #[tool(description = "Query the Learning Recorder's execution-record log and/or fetch an aggregate (usage count, success rate, avg duration) for a tool or pattern id.")]
    async fn force_get_insights(
        &self,
        Parameters(params): Parameters<GetInsightsParams>,
    ) -> Result<CallToolResult, McpError> {
        let ref_id = params.ref_id.clone();
        let filter = params.into_filter()?;
        let aggregate = if let Some(ref_id) = ref_id {
            Some(self.engine.aggregate(&ref_id).await)
        } else {
            None
        };
        let records = self.engine.get_insights(&filter).await;
        json_result(json!({
            "outcome": "ok",
            "records": records,
            "aggregate": aggregate.as_ref().map(aggregate_json),
        }))
    }

    #[tool(description = "Run a full discover/validate pass over the component corpus without mutating any file, and write <root>/validation_report.json.")]
    async fn force_validate_components(&self) -> Result<CallToolResult, McpError> {
        let report = self.engine.validate_components().await;
        let path = self.engine.write_validation_report().await.map_err(mcp_error)?;
        json_result(json!({
            "outcome": "ok",
            "report_path": path.display().to_string(),
            "total": report.validation.len(),
            "valid": report.validation.iter().filter(|r| r.valid).count(),
            "quarantined": report.quarantined.iter().map(|q| json!({
                "kind": q.kind.as_str(),
                "id": q.id,
                "path": q.path.as_ref().map(|p| p.display().to_string()),
                "reasons": q.reasons,
            })).collect::<Vec<_>>(),
        }))
    }

    #[tool(description = "Apply the Auto-Fixer's bounded rule set to quarantined components. Backs up every modified file before rewriting unless dryRun is set.")]
    async fn force_fix_components(
        &self,
        Parameters(params): Parameters<FixComponentsParams>,
    ) -> Result<CallToolResult, McpError> {
        let report = self.engine.fix_components(params.dry_run).await;
        json_result(json!({
            "outcome": "ok",
            "considered": report.considered,
            "fixed": report.fixed,
            "still_invalid": report.still_invalid,
            "dry_run": report.dry_run,
        }))
    }

    #[tool(description = "Merge multi-component aggregate files into single-component files, or vice versa, then reload the Registry atomically.")]
    async fn force_sync(&self, Parameters(params): Parameters<SyncParams>) -> Result<CallToolResult, McpError> {
        let direction = parse_direction(params.direction)?;
        match self.engine.sync(direction).await {
            Ok(report) => json_result(json!({
                "outcome": "ok",
                "files_written": report.files_written,
                "files_removed": report.files_removed,
            })),
            Err(err) => json_result(engine_error_json(&err)),
        }
    }
}

#[tool_handler]
impl ServerHandler for ForceServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: ProtocolVersion::V_2024_11_05,
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: Implementation::from_build_env(),
            instructions: Some(
                "Force Engine: a schema-validated registry of Tools, Patterns, Constraints, \
                 Governance policies, Learning records and Variants. Call force_list_tools / \
                 force_list_patterns to discover components, force_execute_tool / \
                 force_apply_pattern to run them, force_check_constraints to evaluate quality \
                 rules, force_get_insights for execution history, and \
                 force_validate_components / force_fix_components / force_sync to manage the \
                 on-disk corpus.".into(),
            ),
        }
    }
}

/// Default Action Table: empty. Concrete action implementations (git,
/// documentation, analysis, ...) are host-provided and out of this
/// crate's scope (spec.md §1); a bare engine reports `UnknownAction` for
/// every command until a host registers handlers.
pub fn default_actions() -> ActionTable {
    ActionTable::new()
}

#[cfg(test)]
mod tests {
    use super::*;
    use force_core::runtime::CommandStatus;

    #[test]
    fn command_outcome_serializes_success() {
        let outcome = CommandOutcome {
            action: "noop".to_string(),
            started_at: Utc::now(),
            completed_at: Utc::now(),
            status: CommandStatus::Success(json!({"ok": true})),
        };
        let value = command_outcome_json(&outcome);
        assert_eq!(value["status"], "success");
        assert_eq!(value["result"]["ok"], true);
    }

    #[test]
    fn parse_direction_defaults_to_aggregate() {
        assert!(matches!(parse_direction(None), Ok(SyncDirection::ToAggregate)));
        assert!(matches!(
            parse_direction(Some("to_single".to_string())),
            Ok(SyncDirection::ToSingle)
        ));
        assert!(parse_direction(Some("bogus".to_string())).is_err());
    }
}
