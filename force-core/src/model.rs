//! Data model shared by every component kind (spec.md §3).

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// The six admissible component kinds, plus the loader's classification
/// failure case.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Kind {
    Tool,
    Pattern,
    Constraint,
    GovernancePolicy,
    LearningRecord,
    Variant,
}

impl Kind {
    pub fn as_str(self) -> &'static str {
        match self {
            Kind::Tool => "tool",
            Kind::Pattern => "pattern",
            Kind::Constraint => "constraint",
            Kind::GovernancePolicy => "governance_policy",
            Kind::LearningRecord => "learning_record",
            Kind::Variant => "variant",
        }
    }

    /// Directory name this kind is discovered under (spec.md §4.2).
    pub fn directory(self) -> &'static str {
        match self {
            Kind::Tool => "tools",
            Kind::Pattern => "patterns",
            Kind::Constraint => "constraints",
            Kind::GovernancePolicy => "governance",
            Kind::LearningRecord => "learning",
            Kind::Variant => "variants",
        }
    }

    /// Field name used by aggregate files, e.g. `{"governance_policies":[...]}`.
    pub fn aggregate_field(self) -> &'static str {
        match self {
            Kind::Tool => "tools",
            Kind::Pattern => "patterns",
            Kind::Constraint => "constraints",
            Kind::GovernancePolicy => "governance_policies",
            Kind::LearningRecord => "learning_records",
            Kind::Variant => "variants",
        }
    }

    pub fn all() -> [Kind; 6] {
        [
            Kind::Tool,
            Kind::Pattern,
            Kind::Constraint,
            Kind::GovernancePolicy,
            Kind::LearningRecord,
            Kind::Variant,
        ]
    }
}

/// Common metadata block present on every component kind.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Metadata {
    pub created: Option<String>,
    pub updated: Option<String>,
    pub version: Option<String>,
    pub complexity: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    pub author: Option<String>,
    pub performance_metrics: Option<PerformanceMetrics>,
    #[serde(flatten)]
    pub extra: HashMap<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerformanceMetrics {
    pub avg_execution_time: Option<f64>,
    pub success_rate: Option<f64>,
    pub usage_count: Option<u64>,
}

/// A declared tool parameter (spec.md §3 Parameter).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Parameter {
    pub name: String,
    #[serde(rename = "type")]
    pub param_type: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub default: Option<Value>,
    #[serde(default)]
    pub constraints: Option<ParameterConstraints>,
    /// Legacy flat-list shape carries `required` alongside the parameter
    /// (spec.md §4.4 fix 1); dropped once migrated into `{required,optional}`.
    #[serde(default)]
    pub required: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ParameterConstraints {
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub pattern: Option<String>,
    #[serde(rename = "enum", default)]
    pub allowed: Option<Vec<Value>>,
    #[serde(default)]
    pub required: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Parameters {
    #[serde(default)]
    pub required: Vec<Parameter>,
    #[serde(default)]
    pub optional: Vec<Parameter>,
}

/// A single command within a Tool's `execution.commands` sequence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Command {
    pub action: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub parameters: Option<Value>,
    #[serde(default)]
    pub timeout: Option<u64>,
    #[serde(default)]
    pub retry: Option<u32>,
    #[serde(default)]
    pub condition: Option<String>,
}

/// One entry of `execution.validation.error_handling` (spec.md §3 ErrorHandler).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorHandler {
    pub error_type: String,
    pub strategy: String,
    #[serde(default)]
    pub action: Option<String>,
    #[serde(default)]
    pub escalation: Option<String>,
    #[serde(default)]
    pub max_retries: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ExecutionValidation {
    #[serde(default)]
    pub pre_conditions: Vec<String>,
    #[serde(default)]
    pub post_conditions: Vec<String>,
    #[serde(default)]
    pub error_handling: Vec<ErrorHandler>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Execution {
    #[serde(default)]
    pub strategy: Option<String>,
    #[serde(default)]
    pub commands: Vec<Command>,
    #[serde(default)]
    pub validation: ExecutionValidation,
}

/// A Tool component (spec.md §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tool {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub parameters: Parameters,
    pub execution: Execution,
    #[serde(default)]
    pub metadata: Metadata,
}

/// One step of a Pattern's `implementation.executable_steps`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutableStep {
    pub name: String,
    #[serde(rename = "toolId", default)]
    pub tool_id: Option<String>,
    #[serde(default)]
    pub parameters: Option<Value>,
    #[serde(default)]
    pub optional: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PatternContext {
    #[serde(default)]
    pub when_to_use: Option<String>,
    #[serde(default)]
    pub benefits: Vec<String>,
    #[serde(default)]
    pub trade_offs: Vec<String>,
    #[serde(default)]
    pub anti_patterns: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PatternImplementation {
    #[serde(default)]
    pub steps: Vec<String>,
    #[serde(default)]
    pub executable_steps: Vec<ExecutableStep>,
}

/// A Pattern component (spec.md §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pattern {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub context: PatternContext,
    pub implementation: PatternImplementation,
    #[serde(default)]
    pub metadata: Metadata,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ConstraintValidation {
    #[serde(default)]
    pub rules: Value,
    #[serde(default)]
    pub severity: Option<String>,
    #[serde(default)]
    pub scope: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ConstraintEnforcement {
    #[serde(default)]
    pub auto_fix: bool,
    #[serde(default)]
    pub require_approval: bool,
    #[serde(default)]
    pub blocking: bool,
}

/// A Constraint component (spec.md §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Constraint {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub validation: ConstraintValidation,
    #[serde(default)]
    pub enforcement: ConstraintEnforcement,
    #[serde(default)]
    pub metadata: Metadata,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct GovernanceEnforcement {
    pub level: String,
    #[serde(default)]
    pub automated: bool,
    #[serde(default)]
    pub validation_rules: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct GovernanceScope {
    #[serde(default)]
    pub applies_to: Vec<String>,
    #[serde(default)]
    pub environments: Vec<String>,
    #[serde(default)]
    pub exceptions: Vec<String>,
}

/// A GovernancePolicy component (spec.md §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GovernancePolicy {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub category: Option<String>,
    pub policy_type: String,
    pub enforcement: GovernanceEnforcement,
    #[serde(default)]
    pub scope: GovernanceScope,
    #[serde(default)]
    pub metadata: Metadata,
}

/// A durable LearningRecord (distinct from the ephemeral execution log,
/// spec.md §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LearningRecordDoc {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub metadata: Metadata,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct VariantContext {
    #[serde(default)]
    pub persona: Option<String>,
    #[serde(default)]
    pub goals: Vec<String>,
    #[serde(default)]
    pub environment: Option<String>,
    #[serde(default)]
    pub examples: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct VariantAnchors {
    #[serde(default)]
    pub constraints: Vec<String>,
    #[serde(default)]
    pub governance: Vec<String>,
    #[serde(default)]
    pub patterns: Vec<String>,
    #[serde(default)]
    pub learnings: Vec<String>,
}

/// A session-orchestration Variant (spec.md §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Variant {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    pub instructions: String,
    #[serde(default)]
    pub rules: Vec<String>,
    #[serde(default)]
    pub context: VariantContext,
    #[serde(default)]
    pub targets: Vec<String>,
    pub anchors: VariantAnchors,
    #[serde(default)]
    pub metadata: Metadata,
}

/// A component after classification but before validation: the raw JSON
/// plus its inferred kind and source path.
#[derive(Debug, Clone)]
pub struct RawComponent {
    pub path: std::path::PathBuf,
    pub kind_hint: Kind,
    pub doc: Value,
}

/// The canonical, typed form of an admitted component. Callers only ever
/// see `Component`, never the raw JSON, once validation has passed.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Component {
    Tool(Tool),
    Pattern(Pattern),
    Constraint(Constraint),
    GovernancePolicy(GovernancePolicy),
    LearningRecord(LearningRecordDoc),
    Variant(Variant),
}

impl Component {
    pub fn kind(&self) -> Kind {
        match self {
            Component::Tool(_) => Kind::Tool,
            Component::Pattern(_) => Kind::Pattern,
            Component::Constraint(_) => Kind::Constraint,
            Component::GovernancePolicy(_) => Kind::GovernancePolicy,
            Component::LearningRecord(_) => Kind::LearningRecord,
            Component::Variant(_) => Kind::Variant,
        }
    }

    pub fn id(&self) -> &str {
        match self {
            Component::Tool(t) => &t.id,
            Component::Pattern(p) => &p.id,
            Component::Constraint(c) => &c.id,
            Component::GovernancePolicy(g) => &g.id,
            Component::LearningRecord(l) => &l.id,
            Component::Variant(v) => &v.id,
        }
    }

    pub fn metadata(&self) -> &Metadata {
        match self {
            Component::Tool(t) => &t.metadata,
            Component::Pattern(p) => &p.metadata,
            Component::Constraint(c) => &c.metadata,
            Component::GovernancePolicy(g) => &g.metadata,
            Component::LearningRecord(l) => &l.metadata,
            Component::Variant(v) => &v.metadata,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Component::Tool(t) => &t.name,
            Component::Pattern(p) => &p.name,
            Component::Constraint(c) => &c.name,
            Component::GovernancePolicy(g) => &g.name,
            Component::LearningRecord(l) => &l.title,
            Component::Variant(v) => &v.name,
        }
    }

    pub fn description(&self) -> Option<&str> {
        match self {
            Component::Tool(t) => t.description.as_deref(),
            Component::Pattern(p) => p.description.as_deref(),
            Component::Constraint(c) => c.description.as_deref(),
            Component::GovernancePolicy(_) => None,
            Component::LearningRecord(l) => l.description.as_deref(),
            Component::Variant(v) => v.description.as_deref(),
        }
    }

    pub fn category(&self) -> Option<&str> {
        match self {
            Component::Tool(t) => t.category.as_deref(),
            Component::Pattern(p) => p.category.as_deref(),
            Component::Constraint(c) => c.category.as_deref(),
            Component::GovernancePolicy(g) => g.category.as_deref(),
            Component::LearningRecord(l) => l.category.as_deref(),
            Component::Variant(v) => v.category.as_deref(),
        }
    }

    pub fn complexity(&self) -> Option<&str> {
        self.metadata().complexity.as_deref()
    }

    pub fn tags(&self) -> &[String] {
        &self.metadata().tags
    }
}
