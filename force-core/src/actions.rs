//! Action Table (spec.md §4.11 component 7): a plug-point mapping a
//! command's string `action` to a host-provided handler. The core treats
//! actions as opaque — it passes bound parameters and a context, and
//! receives a result value or a typed error. Unregistered actions are a
//! first-class `UnknownAction` error, never a silent no-op (spec.md §9).

use futures::future::BoxFuture;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Error surfaced by an action handler (spec.md §7 `ActionFailed`).
#[derive(Debug, Clone, thiserror::Error)]
#[error("{message}")]
pub struct ActionError {
    pub message: String,
    /// Classifies the failure so the Runtime can match it against a
    /// Tool's `error_handling[*].error_type` (spec.md §4.6). Defaults to
    /// `"action_failed"` when the handler doesn't classify its own errors.
    pub error_type: String,
}

impl ActionError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            error_type: "action_failed".to_string(),
        }
    }

    pub fn with_type(message: impl Into<String>, error_type: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            error_type: error_type.into(),
        }
    }
}

pub type ActionResult = Result<Value, ActionError>;
pub type ActionFuture = BoxFuture<'static, ActionResult>;

/// A host-provided action handler: `(params, context, cancel) -> Result`.
/// The cancellation token must be honored by every handler (spec.md §9
/// design note: "the Action Table contract mandates handlers accept and
/// honor a cancel token").
pub type ActionHandler = Arc<dyn Fn(Value, Value, CancellationToken) -> ActionFuture + Send + Sync>;

/// Process-wide table of registered action handlers. Initialized once at
/// startup and immutable thereafter (spec.md §5 Shared resources).
#[derive(Clone, Default)]
pub struct ActionTable {
    handlers: HashMap<String, ActionHandler>,
}

impl ActionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for `action`. Re-registering the same name
    /// replaces the previous handler (used by hosts to override defaults
    /// in tests).
    pub fn register(&mut self, action: impl Into<String>, handler: ActionHandler) {
        self.handlers.insert(action.into(), handler);
    }

    pub fn get(&self, action: &str) -> Option<ActionHandler> {
        self.handlers.get(action).cloned()
    }

    pub fn is_registered(&self, action: &str) -> bool {
        self.handlers.contains_key(action)
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn echo_handler() -> ActionHandler {
        Arc::new(|params, _context, _cancel| Box::pin(async move { Ok(params) }))
    }

    #[tokio::test]
    async fn registers_and_invokes_handler() {
        let mut table = ActionTable::new();
        table.register("echo", echo_handler());

        assert!(table.is_registered("echo"));
        let handler = table.get("echo").unwrap();
        let result = handler(json!({"x": 1}), json!({}), CancellationToken::new()).await;
        assert_eq!(result.unwrap(), json!({"x": 1}));
    }

    #[test]
    fn unknown_action_is_not_registered() {
        let table = ActionTable::new();
        assert!(!table.is_registered("nonexistent"));
        assert!(table.get("nonexistent").is_none());
    }
}
