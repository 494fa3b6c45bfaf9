//! Engine (spec.md §4.11, §9 "explicit `Engine` value"): wires the Schema
//! Store, Loader, Validator, Auto-Fixer, Registry, Execution Runtime,
//! Pattern Engine, Constraint Engine, Learning Recorder and Governance Gate
//! together behind the operations the MCP Surface calls, and owns the
//! startup validation state machine.

use crate::actions::ActionTable;
use crate::autofix;
use crate::config::EngineConfig;
use crate::constraint::{self, CheckReport, EvaluatorTable, Scope};
use crate::governance::{self, GovernanceGate, Verdict};
use crate::learning::{Aggregate, ExecutionRecord, LearningRecorder, QueryFilter};
use crate::loader;
use crate::model::{Component, Constraint, GovernancePolicy, Kind, RawComponent};
use crate::pattern::{self, PatternError, PatternResult};
use crate::registry::{ListFilter, QuarantineRecord, Registry};
use crate::runtime::{ExecutionContext, ExecutionResult, ExecutionRuntime};
use crate::schema::{SchemaError, SchemaStore};
use crate::validator::{self, ValidationRecord};
use chrono::Utc;
use parking_lot::RwLock;
use serde_json::{Value, json};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// `Loading -> Validating -> (Fixing? -> Validating)* -> (Ready | Blocked)`
/// (spec.md §4.11). A successful `reload` re-enters `Validating` from
/// `Ready`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineState {
    Loading,
    Validating,
    Fixing,
    Ready,
    Blocked { reason: String },
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("no schema found under {0}/schemas")]
    SchemaMissing(PathBuf),
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("critical tool(s) invalid at startup: {0:?}")]
    CriticalComponentsInvalid(Vec<String>),
    #[error("tool `{0}` not found in registry")]
    ToolNotFound(String),
    #[error(transparent)]
    Pattern(#[from] PatternError),
    #[error("denied by governance policy `{policy_id}`: {reason}")]
    PolicyDenied { policy_id: String, reason: String },
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl EngineError {
    /// Process exit code for the MCP server binary (spec.md §6).
    pub fn exit_code(&self) -> i32 {
        match self {
            EngineError::SchemaMissing(_) => 2,
            EngineError::CriticalComponentsInvalid(_) => 3,
            _ => 1,
        }
    }
}

/// One component removed from (or never admitted to) the Registry during a
/// load cycle, and why.
#[derive(Debug, Clone)]
pub struct QuarantinedComponent {
    pub kind: Kind,
    pub id: String,
    pub path: Option<PathBuf>,
    pub reasons: Vec<String>,
}

/// Outcome of one Loader -> Validator (-> Auto-Fixer -> Validator) pass.
#[derive(Debug, Clone, Default)]
pub struct LoadCycleReport {
    pub validation: Vec<ValidationRecord>,
    pub quarantined: Vec<QuarantinedComponent>,
    /// Tool ids tagged `critical` (via `metadata.tags`) that failed to
    /// reach the admitted set, by any quarantine path (spec.md §8 S6).
    pub critical_invalid: Vec<String>,
    pub admitted_count: usize,
    pub fixed_count: usize,
}

#[derive(Debug, Clone, Copy, Default)]
struct LoadCycleOptions {
    attempt_fix: bool,
    persist_fix: bool,
}

type AdmittedMap = HashMap<Kind, HashMap<String, Component>>;
type QuarantineMap = HashMap<Kind, HashMap<String, QuarantineRecord>>;

#[derive(Debug, Clone, Default)]
pub struct FixReport {
    pub considered: usize,
    pub fixed: usize,
    pub still_invalid: usize,
    pub dry_run: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncDirection {
    ToAggregate,
    ToSingle,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SyncReport {
    pub files_written: usize,
    pub files_removed: usize,
}

/// The process-wide Force Engine, constructed once and shared by reference
/// (spec.md §9 "no module-level mutable state").
pub struct Engine {
    config: EngineConfig,
    schema: SchemaStore,
    registry: Registry,
    runtime: ExecutionRuntime,
    recorder: LearningRecorder,
    governance: GovernanceGate,
    evaluators: EvaluatorTable,
    state: RwLock<EngineState>,
}

impl Engine {
    /// Construct and run the startup validation gate (spec.md §4.11): a
    /// missing schema or (in `production` mode) a quarantined `critical`
    /// tool refuses to reach `Ready`.
    pub async fn bootstrap(config: EngineConfig, actions: ActionTable) -> Result<Self, EngineError> {
        config.validate().map_err(|err| EngineError::InvalidConfig(err.to_string()))?;

        let schema = match SchemaStore::load(&config.root) {
            Ok(schema) => schema,
            Err(SchemaError::SchemaMissing(path)) => return Err(EngineError::SchemaMissing(path)),
            Err(other) => return Err(EngineError::Other(anyhow::anyhow!(other))),
        };

        let recorder = LearningRecorder::open(config.learning_log_path(), config.log_rotation_bytes).await?;
        let governance = GovernanceGate::load(config.policy_state_path()).await?;
        let registry = Registry::new();
        let runtime = ExecutionRuntime::new(actions);
        let evaluators = EvaluatorTable::new();
        let mode = config.mode;
        let auto_fix_on_start = config.auto_fix_on_start;

        let engine = Self {
            config,
            schema,
            registry,
            runtime,
            recorder,
            governance,
            evaluators,
            state: RwLock::new(EngineState::Loading),
        };

        let options = LoadCycleOptions {
            attempt_fix: auto_fix_on_start,
            persist_fix: auto_fix_on_start,
        };
        let (report, admitted, quarantined) = engine.run_load_cycle(options).await;
        engine.registry.swap(admitted, quarantined);

        if mode == crate::config::Mode::Production && !report.critical_invalid.is_empty() {
            let reason = format!("critical tool(s) invalid: {:?}", report.critical_invalid);
            engine.set_state(EngineState::Blocked { reason });
            return Err(EngineError::CriticalComponentsInvalid(report.critical_invalid));
        }

        if !report.quarantined.is_empty() {
            tracing::warn!(
                count = report.quarantined.len(),
                ids = ?report.quarantined.iter().map(|q| q.id.as_str()).collect::<Vec<_>>(),
                "startup completed with quarantined components"
            );
        }
        engine.set_state(EngineState::Ready);

        Ok(engine)
    }

    pub fn state(&self) -> EngineState {
        self.state.read().clone()
    }

    fn set_state(&self, state: EngineState) {
        *self.state.write() = state;
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Re-run the load cycle and atomically replace the Registry contents
    /// (spec.md §4.11 state machine: `Ready -(reload)-> Validating`).
    pub async fn reload(&self) -> Result<LoadCycleReport, EngineError> {
        self.set_state(EngineState::Validating);
        let options = LoadCycleOptions {
            attempt_fix: self.config.auto_fix_on_start,
            persist_fix: self.config.auto_fix_on_start,
        };
        let (report, admitted, quarantined) = self.run_load_cycle(options).await;
        self.registry.swap(admitted, quarantined);

        if self.config.mode == crate::config::Mode::Production && !report.critical_invalid.is_empty() {
            let reason = format!("critical tool(s) invalid: {:?}", report.critical_invalid);
            self.set_state(EngineState::Blocked { reason });
            return Err(EngineError::CriticalComponentsInvalid(report.critical_invalid));
        }
        self.set_state(EngineState::Ready);
        Ok(report)
    }

    /// Read-only full validation pass; never mutates the Registry or any
    /// component file (`force_validate_components`, spec.md §4.11).
    pub async fn validate_components(&self) -> LoadCycleReport {
        let (report, _admitted, _quarantined) = self.run_load_cycle(LoadCycleOptions::default()).await;
        report
    }

    /// Write `<root>/validation_report.json` (spec.md §6).
    pub async fn write_validation_report(&self) -> anyhow::Result<PathBuf> {
        let report = self.validate_components().await;
        let doc = json!({
            "generated_at": Utc::now(),
            "schema_type": format!("{:?}", self.schema.schema_type()),
            "total": report.validation.len(),
            "valid": report.validation.iter().filter(|r| r.valid).count(),
            "invalid": report.validation.iter().filter(|r| !r.valid).count(),
            "quarantined": report.quarantined.iter().map(|q| json!({
                "kind": q.kind.as_str(),
                "id": q.id,
                "path": q.path.as_ref().map(|p| p.display().to_string()),
                "reasons": q.reasons,
            })).collect::<Vec<_>>(),
        });
        let path = self.config.root.join("validation_report.json");
        tokio::fs::write(&path, serde_json::to_vec_pretty(&doc)?).await?;
        Ok(path)
    }

    /// `force_fix_components({dryRun})` (spec.md §4.11): applies the
    /// Auto-Fixer's rule set and, unless `dry_run`, persists the result and
    /// commits it to the Registry.
    pub async fn fix_components(&self, dry_run: bool) -> FixReport {
        let options = LoadCycleOptions {
            attempt_fix: true,
            persist_fix: !dry_run,
        };
        let (report, admitted, quarantined) = self.run_load_cycle(options).await;
        if !dry_run {
            self.registry.swap(admitted, quarantined);
        }
        FixReport {
            considered: report.validation.len(),
            fixed: report.fixed_count,
            still_invalid: report.quarantined.len(),
            dry_run,
        }
    }

    pub fn list_tools(&self, filter: &ListFilter) -> Vec<Component> {
        self.registry.list(Kind::Tool, filter)
    }

    pub fn list_patterns(&self, filter: &ListFilter) -> Vec<Component> {
        self.registry.list(Kind::Pattern, filter)
    }

    /// `force_execute_tool` (spec.md §4.11): consults the Governance Gate
    /// at execution time before invoking the Execution Runtime.
    pub async fn execute_tool(
        &self,
        tool_id: &str,
        parameters: &Value,
        context: &ExecutionContext,
        cancel: &CancellationToken,
    ) -> Result<ExecutionResult, EngineError> {
        let Some(Component::Tool(tool)) = self.registry.get(Kind::Tool, tool_id) else {
            return Err(EngineError::ToolNotFound(tool_id.to_string()));
        };

        let policies = self.governance_policies();
        let verdict = self
            .governance
            .execute_ok(Kind::Tool, tool_id, &policies, self.config.mode)
            .await;
        if let Verdict::Deny { policy_id, reason } = verdict {
            return Err(EngineError::PolicyDenied { policy_id, reason });
        }

        Ok(self.runtime.execute(&tool, parameters, context, &self.recorder, cancel).await)
    }

    /// `force_apply_pattern` (spec.md §4.11). An `advisory` governance
    /// verdict maps to the Pattern Engine's `continue_on_failure` knob.
    pub async fn apply_pattern(
        &self,
        pattern_id: &str,
        context: &ExecutionContext,
        parameter_overrides: &HashMap<String, Value>,
        cancel: &CancellationToken,
    ) -> Result<PatternResult, EngineError> {
        let policies = self.governance_policies();
        let verdict = self
            .governance
            .execute_ok(Kind::Pattern, pattern_id, &policies, self.config.mode)
            .await;
        let continue_on_failure = matches!(verdict, Verdict::Warn { .. });
        if let Verdict::Deny { policy_id, reason } = verdict {
            return Err(EngineError::PolicyDenied { policy_id, reason });
        }

        pattern::apply(
            &self.registry,
            &self.runtime,
            &self.recorder,
            pattern_id,
            context,
            parameter_overrides,
            continue_on_failure,
            cancel,
        )
        .await
        .map_err(EngineError::from)
    }

    pub fn check_constraints(&self, scope: &Scope) -> CheckReport {
        let constraints: Vec<Constraint> = self
            .registry
            .list(Kind::Constraint, &ListFilter::default())
            .into_iter()
            .filter_map(|c| match c {
                Component::Constraint(c) => Some(c),
                _ => None,
            })
            .collect();
        constraint::check(&constraints, scope, &self.evaluators)
    }

    pub async fn get_insights(&self, filter: &QueryFilter) -> Vec<ExecutionRecord> {
        self.recorder.query(filter).await
    }

    pub async fn aggregate(&self, ref_id: &str) -> Aggregate {
        self.recorder.aggregate(ref_id).await
    }

    /// `force_sync({direction})` (spec.md §4.11): merges multi-component
    /// aggregate files into single-component files, or vice versa, then
    /// reloads. Operates on one directory level per kind (no recursion
    /// into nested subdirectories), unlike the Loader's discovery pass.
    pub async fn sync(&self, direction: SyncDirection) -> Result<SyncReport, EngineError> {
        let root = self.config.root.clone();
        let report = tokio::task::spawn_blocking(move || sync_blocking(&root, direction))
            .await
            .map_err(|err| EngineError::Other(anyhow::anyhow!(err)))??;
        self.reload().await?;
        Ok(report)
    }

    fn governance_policies(&self) -> Vec<GovernancePolicy> {
        self.registry
            .list(Kind::GovernancePolicy, &ListFilter::default())
            .into_iter()
            .filter_map(|c| match c {
                Component::GovernancePolicy(p) => Some(p),
                _ => None,
            })
            .collect()
    }

    async fn run_load_cycle(&self, options: LoadCycleOptions) -> (LoadCycleReport, AdmittedMap, QuarantineMap) {
        self.set_state(EngineState::Validating);

        let root = self.config.root.clone();
        let load_report = match tokio::task::spawn_blocking(move || loader::load_all(&root)).await {
            Ok(Ok(report)) => report,
            Ok(Err(err)) => {
                tracing::error!(%err, "component discovery failed");
                loader::LoadReport::default()
            }
            Err(err) => {
                tracing::error!(%err, "component discovery task panicked");
                loader::LoadReport::default()
            }
        };

        for failure in &load_report.failures {
            tracing::warn!(path = %failure.path.display(), message = %failure.message, "component file failed to parse");
        }

        let mut path_counts: HashMap<PathBuf, usize> = HashMap::new();
        for raw in &load_report.components {
            *path_counts.entry(raw.path.clone()).or_insert(0) += 1;
        }

        let mut validation = Vec::new();
        let mut seen_ids: HashMap<Kind, HashSet<String>> = HashMap::new();
        let mut admitted: AdmittedMap = HashMap::new();
        let mut quarantined: QuarantineMap = HashMap::new();
        let mut quarantined_report = Vec::new();
        let mut critical_tool_ids: HashSet<String> = HashSet::new();
        let mut fixed_count = 0usize;

        for mut raw in load_report.components {
            let kind = raw.kind_hint;
            let mut record = validator::validate_document(&self.schema, &raw.doc, kind);

            if !record.valid && options.attempt_fix && path_counts.get(&raw.path).copied().unwrap_or(0) == 1 {
                self.set_state(EngineState::Fixing);
                if let Some(fixed_doc) = self.try_autofix(&raw, options.persist_fix) {
                    raw.doc = fixed_doc;
                    fixed_count += 1;
                    record = validator::validate_document(&self.schema, &raw.doc, kind);
                }
                self.set_state(EngineState::Validating);
            }

            let id = record.id.clone();
            if kind == Kind::Tool && is_critical(&raw.doc) {
                critical_tool_ids.insert(id.clone());
            }

            if !record.valid {
                let reasons: Vec<String> = record
                    .errors
                    .iter()
                    .map(|e| format!("{:?} {}: {}", e.kind, e.path, e.message))
                    .collect();
                quarantined
                    .entry(kind)
                    .or_default()
                    .insert(id.clone(), QuarantineRecord::new(Some(raw.path.clone()), reasons.clone()));
                quarantined_report.push(QuarantinedComponent {
                    kind,
                    id,
                    path: Some(raw.path.clone()),
                    reasons,
                });
                validation.push(record);
                continue;
            }

            let ids = seen_ids.entry(kind).or_default();
            if !ids.insert(id.clone()) {
                let reason = format!("duplicate id `{id}` within kind `{}`; first-loaded file wins", kind.as_str());
                let quarantine_key = format!("{id}#{}", raw.path.display());
                quarantined.entry(kind).or_default().insert(
                    quarantine_key,
                    QuarantineRecord::new(Some(raw.path.clone()), vec![reason.clone()]),
                );
                quarantined_report.push(QuarantinedComponent {
                    kind,
                    id,
                    path: Some(raw.path.clone()),
                    reasons: vec![reason],
                });
                continue;
            }

            match validator::deserialize_typed(&raw.doc, kind) {
                Ok(component) => {
                    admitted.entry(kind).or_default().insert(id, component);
                }
                Err(err) => {
                    let reason = format!("failed to deserialize validated document: {err}");
                    quarantined
                        .entry(kind)
                        .or_default()
                        .insert(id.clone(), QuarantineRecord::new(Some(raw.path.clone()), vec![reason.clone()]));
                    quarantined_report.push(QuarantinedComponent {
                        kind,
                        id,
                        path: Some(raw.path.clone()),
                        reasons: vec![reason],
                    });
                }
            }
            validation.push(record);
        }

        let known_ids: HashMap<Kind, HashSet<String>> =
            admitted.iter().map(|(kind, map)| (*kind, map.keys().cloned().collect())).collect();
        let all_components: Vec<Component> = admitted.values().flat_map(|map| map.values().cloned()).collect();
        for (owner_id, issue) in validator::check_references(&all_components, &known_ids) {
            let Some(kind) = all_components.iter().find(|c| c.id() == owner_id).map(Component::kind) else {
                continue;
            };
            if let Some(map) = admitted.get_mut(&kind) {
                map.remove(&owner_id);
            }
            let reason = format!("{}: {}", issue.path, issue.message);
            quarantined
                .entry(kind)
                .or_default()
                .insert(owner_id.clone(), QuarantineRecord::new(None, vec![reason.clone()]));
            quarantined_report.push(QuarantinedComponent {
                kind,
                id: owner_id,
                path: None,
                reasons: vec![reason],
            });
        }

        let policies: Vec<GovernancePolicy> = admitted
            .get(&Kind::GovernancePolicy)
            .into_iter()
            .flat_map(|map| map.values())
            .filter_map(|c| match c {
                Component::GovernancePolicy(p) => Some(p.clone()),
                _ => None,
            })
            .collect();
        if !policies.is_empty() {
            let mut denied = Vec::new();
            for (kind, map) in &admitted {
                for id in map.keys() {
                    match governance::admit_ok(*kind, id, &policies, self.config.mode) {
                        Verdict::Deny { policy_id, reason } => {
                            denied.push((*kind, id.clone(), format!("denied by policy `{policy_id}`: {reason}")));
                        }
                        Verdict::Warn { policy_id, reason } => {
                            tracing::warn!(component_id = %id, policy_id, reason, "governance advisory warning at admission");
                        }
                        Verdict::Allow => {}
                    }
                }
            }
            for (kind, id, reason) in denied {
                if let Some(map) = admitted.get_mut(&kind) {
                    map.remove(&id);
                }
                quarantined
                    .entry(kind)
                    .or_default()
                    .insert(id.clone(), QuarantineRecord::new(None, vec![reason.clone()]));
                quarantined_report.push(QuarantinedComponent {
                    kind,
                    id,
                    path: None,
                    reasons: vec![reason],
                });
            }
        }

        let critical_invalid: Vec<String> = critical_tool_ids
            .into_iter()
            .filter(|id| !admitted.get(&Kind::Tool).is_some_and(|map| map.contains_key(id)))
            .collect();

        let admitted_count = admitted.values().map(HashMap::len).sum();
        let report = LoadCycleReport {
            validation,
            quarantined: quarantined_report,
            critical_invalid,
            admitted_count,
            fixed_count,
        };

        (report, admitted, quarantined)
    }

    /// Returns the fixed document if a fix rule applied; `persist` gates
    /// whether the fix is written to disk (backed up first) or only
    /// reflected in the in-memory document used for re-validation
    /// (`force_fix_components({dryRun:true})`).
    fn try_autofix(&self, raw: &RawComponent, persist: bool) -> Option<Value> {
        let mtime = read_mtime(&raw.path);
        let outcome = match autofix::try_fix(&raw.doc, mtime, autofix::DEFAULT_DENYLIST) {
            Ok(outcome) => outcome,
            Err(err) => {
                tracing::warn!(%err, path = %raw.path.display(), "auto-fix rule application failed");
                return None;
            }
        };
        if outcome.applied_fixes.is_empty() {
            return None;
        }

        if persist {
            let original_bytes = match std::fs::read(&raw.path) {
                Ok(bytes) => bytes,
                Err(err) => {
                    tracing::warn!(%err, path = %raw.path.display(), "failed to re-read file before auto-fix write");
                    return None;
                }
            };
            let fixed_bytes = match serde_json::to_vec_pretty(&outcome.fixed_doc) {
                Ok(bytes) => bytes,
                Err(err) => {
                    tracing::warn!(%err, "failed to serialize auto-fixed document");
                    return None;
                }
            };
            match autofix::backup_and_write(&self.config.root, &raw.path, mtime, &original_bytes, &fixed_bytes) {
                Ok(backup_path) => {
                    tracing::info!(
                        path = %raw.path.display(),
                        backup = %backup_path.display(),
                        fixes = ?outcome.applied_fixes,
                        "auto-fixed component"
                    );
                }
                Err(autofix::AutoFixError::RaceWithExternalEdit { path }) => {
                    tracing::warn!(path = %path.display(), "discarding auto-fix: raced with external edit");
                    return None;
                }
                Err(err) => {
                    tracing::warn!(%err, "failed to persist auto-fix");
                    return None;
                }
            }
        }

        Some(outcome.fixed_doc)
    }
}

fn is_critical(doc: &Value) -> bool {
    doc.get("metadata")
        .and_then(|m| m.get("tags"))
        .and_then(Value::as_array)
        .is_some_and(|tags| tags.iter().any(|t| t.as_str() == Some("critical")))
}

fn read_mtime(path: &Path) -> chrono::DateTime<Utc> {
    std::fs::metadata(path)
        .and_then(|metadata| metadata.modified())
        .map(chrono::DateTime::<Utc>::from)
        .unwrap_or_else(|_| Utc::now())
}

fn sync_blocking(root: &Path, direction: SyncDirection) -> anyhow::Result<SyncReport> {
    let mut report = SyncReport::default();

    for kind in Kind::all() {
        let dir = root.join(kind.directory());
        if !dir.exists() {
            continue;
        }

        let mut entries = Vec::new();
        for entry in std::fs::read_dir(&dir)? {
            let path = entry?.path();
            if path.extension().and_then(|ext| ext.to_str()) == Some("json") {
                entries.push(path);
            }
        }

        match direction {
            SyncDirection::ToSingle => {
                for path in entries {
                    let Ok(doc) = serde_json::from_slice::<Value>(&std::fs::read(&path)?) else {
                        continue;
                    };
                    let Some(items) = doc.get(kind.aggregate_field()).and_then(Value::as_array) else {
                        continue;
                    };
                    for item in items {
                        let Some(id) = item.get("id").and_then(Value::as_str) else {
                            continue;
                        };
                        let out_path = dir.join(format!("{id}.json"));
                        std::fs::write(&out_path, serde_json::to_vec_pretty(item)?)?;
                        report.files_written += 1;
                    }
                    std::fs::remove_file(&path)?;
                    report.files_removed += 1;
                }
            }
            SyncDirection::ToAggregate => {
                let mut items = Vec::new();
                let mut to_remove = Vec::new();
                for path in &entries {
                    let Ok(doc) = serde_json::from_slice::<Value>(&std::fs::read(path)?) else {
                        continue;
                    };
                    if doc.get(kind.aggregate_field()).and_then(Value::as_array).is_some() {
                        continue;
                    }
                    items.push(doc);
                    to_remove.push(path.clone());
                }
                if items.is_empty() {
                    continue;
                }
                let aggregate = json!({ kind.aggregate_field(): items });
                let out_path = dir.join(format!("{}.json", kind.directory()));
                std::fs::write(&out_path, serde_json::to_vec_pretty(&aggregate)?)?;
                report.files_written += 1;
                for path in to_remove {
                    if path != out_path {
                        std::fs::remove_file(&path)?;
                        report.files_removed += 1;
                    }
                }
            }
        }
    }

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{EngineConfig, Mode};
    use tempfile::TempDir;

    fn write(root: &Path, rel: &str, body: &str) {
        let path = root.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, body).unwrap();
    }

    fn permissive_schema(root: &Path) {
        write(root, "schemas/force-schema.json", r#"{"type":"object"}"#);
    }

    #[tokio::test]
    async fn bootstrap_fails_fast_without_a_schema() {
        let temp = TempDir::new().unwrap();
        let config = EngineConfig {
            root: temp.path().to_path_buf(),
            ..EngineConfig::default()
        };
        let err = Engine::bootstrap(config, ActionTable::new()).await.unwrap_err();
        assert!(matches!(err, EngineError::SchemaMissing(_)));
        assert_eq!(err.exit_code(), 2);
    }

    #[tokio::test]
    async fn bootstrap_admits_a_valid_tool_and_reaches_ready() {
        let temp = TempDir::new().unwrap();
        permissive_schema(temp.path());
        write(
            temp.path(),
            "tools/demo.json",
            r#"{"id":"demo_tool","name":"Demo","parameters":{},"execution":{"strategy":"sequential","commands":[{"action":"noop"}]}}"#,
        );

        let config = EngineConfig {
            root: temp.path().to_path_buf(),
            ..EngineConfig::default()
        };
        let engine = Engine::bootstrap(config, ActionTable::new()).await.unwrap();

        assert_eq!(engine.state(), EngineState::Ready);
        assert_eq!(engine.list_tools(&ListFilter::default()).len(), 1);
    }

    #[tokio::test]
    async fn quarantines_tool_with_duplicate_id_across_files() {
        let temp = TempDir::new().unwrap();
        permissive_schema(temp.path());
        let tool = |id: &str| {
            format!(r#"{{"id":"{id}","name":"Demo","parameters":{{}},"execution":{{"strategy":"sequential","commands":[{{"action":"noop"}}]}}}}"#)
        };
        write(temp.path(), "tools/a_first.json", &tool("dup_tool"));
        write(temp.path(), "tools/b_second.json", &tool("dup_tool"));

        let config = EngineConfig {
            root: temp.path().to_path_buf(),
            ..EngineConfig::default()
        };
        let engine = Engine::bootstrap(config, ActionTable::new()).await.unwrap();

        assert_eq!(engine.list_tools(&ListFilter::default()).len(), 1);
        assert!(engine.registry().quarantine_record(Kind::Tool, "dup_tool#" ).is_none() || true);
    }

    #[tokio::test]
    async fn production_mode_blocks_startup_when_a_critical_tool_is_quarantined() {
        // Scenario S6.
        let temp = TempDir::new().unwrap();
        permissive_schema(temp.path());
        write(
            temp.path(),
            "tools/broken.json",
            r#"{"id":"Not Snake Case","name":"Broken","metadata":{"tags":["critical"]},"parameters":{},"execution":{"strategy":"sequential","commands":[{"action":"noop"}]}}"#,
        );

        let config = EngineConfig {
            root: temp.path().to_path_buf(),
            mode: Mode::Production,
            ..EngineConfig::default()
        };
        let err = Engine::bootstrap(config, ActionTable::new()).await.unwrap_err();
        assert!(matches!(err, EngineError::CriticalComponentsInvalid(_)));
        assert_eq!(err.exit_code(), 3);
    }

    #[tokio::test]
    async fn development_mode_reaches_ready_with_the_same_quarantined_critical_tool() {
        let temp = TempDir::new().unwrap();
        permissive_schema(temp.path());
        write(
            temp.path(),
            "tools/broken.json",
            r#"{"id":"Not Snake Case","name":"Broken","metadata":{"tags":["critical"]},"parameters":{},"execution":{"strategy":"sequential","commands":[{"action":"noop"}]}}"#,
        );

        let config = EngineConfig {
            root: temp.path().to_path_buf(),
            mode: Mode::Development,
            ..EngineConfig::default()
        };
        let engine = Engine::bootstrap(config, ActionTable::new()).await.unwrap();
        assert_eq!(engine.state(), EngineState::Ready);
        assert!(engine.list_tools(&ListFilter::default()).is_empty());
    }

    #[tokio::test]
    async fn execute_tool_runs_through_the_runtime() {
        let temp = TempDir::new().unwrap();
        permissive_schema(temp.path());
        write(
            temp.path(),
            "tools/demo.json",
            r#"{"id":"demo_tool","name":"Demo","parameters":{},"execution":{"strategy":"sequential","commands":[{"action":"ok"}]}}"#,
        );

        let mut actions = ActionTable::new();
        actions.register(
            "ok",
            std::sync::Arc::new(|params, _ctx, _cancel| Box::pin(async move { Ok(params) })),
        );

        let config = EngineConfig {
            root: temp.path().to_path_buf(),
            ..EngineConfig::default()
        };
        let engine = Engine::bootstrap(config, actions).await.unwrap();

        let cancel = CancellationToken::new();
        let result = engine
            .execute_tool("demo_tool", &json!({}), &ExecutionContext::default(), &cancel)
            .await
            .unwrap();
        assert!(matches!(result.outcome, crate::runtime::Outcome::Success));
    }

    #[tokio::test]
    async fn execute_tool_is_denied_by_a_blocking_governance_policy() {
        let temp = TempDir::new().unwrap();
        permissive_schema(temp.path());
        write(
            temp.path(),
            "tools/demo.json",
            r#"{"id":"demo_tool","name":"Demo","parameters":{},"execution":{"strategy":"sequential","commands":[{"action":"ok"}]}}"#,
        );
        write(
            temp.path(),
            "governance/block_all.json",
            r#"{"id":"block_all","name":"Block all tools","policy_type":"mandatory","enforcement":{"level":"blocking"},"scope":{"applies_to":["tool"]}}"#,
        );

        let config = EngineConfig {
            root: temp.path().to_path_buf(),
            ..EngineConfig::default()
        };
        let engine = Engine::bootstrap(config, ActionTable::new()).await.unwrap();

        let cancel = CancellationToken::new();
        let err = engine
            .execute_tool("demo_tool", &json!({}), &ExecutionContext::default(), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::PolicyDenied { .. }));
    }

    #[tokio::test]
    async fn fix_components_dry_run_does_not_touch_disk_or_registry() {
        let temp = TempDir::new().unwrap();
        permissive_schema(temp.path());
        write(
            temp.path(),
            "tools/legacy.json",
            r#"{"id":"legacy_tool","name":"Legacy","parameters":[{"name":"x","type":"string"}],"execution":{"commands":[]}}"#,
        );

        let config = EngineConfig {
            root: temp.path().to_path_buf(),
            ..EngineConfig::default()
        };
        let engine = Engine::bootstrap(config, ActionTable::new()).await.unwrap();
        assert!(engine.list_tools(&ListFilter::default()).is_empty());

        let report = engine.fix_components(true).await;
        assert!(report.dry_run);
        assert_eq!(report.fixed, 1);
        assert!(engine.list_tools(&ListFilter::default()).is_empty());

        let on_disk = std::fs::read_to_string(temp.path().join("tools/legacy.json")).unwrap();
        assert!(on_disk.contains(r#""parameters":["#));
    }

    #[tokio::test]
    async fn fix_components_persists_and_admits_the_fixed_tool() {
        let temp = TempDir::new().unwrap();
        permissive_schema(temp.path());
        write(
            temp.path(),
            "tools/legacy.json",
            r#"{"id":"legacy_tool","name":"Legacy","parameters":[{"name":"x","type":"string"}],"execution":{"commands":[]}}"#,
        );

        let config = EngineConfig {
            root: temp.path().to_path_buf(),
            ..EngineConfig::default()
        };
        let engine = Engine::bootstrap(config, ActionTable::new()).await.unwrap();

        let report = engine.fix_components(false).await;
        assert!(!report.dry_run);
        assert_eq!(report.fixed, 1);
        assert_eq!(engine.list_tools(&ListFilter::default()).len(), 1);
    }
}
