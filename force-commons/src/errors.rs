use std::borrow::Cow;

use anyhow::{Error, Result};

// Loader errors
pub const ERR_READ_FILE: &str = "failed to read component file";
pub const ERR_PARSE_JSON: &str = "failed to parse component file as JSON";
pub const ERR_READ_DIR: &str = "failed to read component directory";

// Validator errors
pub const ERR_SCHEMA_MISSING: &str = "no schema found under <root>/schemas";
pub const ERR_SCHEMA_INVALID: &str = "component failed schema validation";
pub const ERR_ID_NOT_SNAKE_CASE: &str = "component id is not snake_case";
pub const ERR_VERSION_NOT_SEMVER: &str = "metadata.version does not parse as SemVer";
pub const ERR_TIMESTAMP_INVALID: &str = "metadata timestamp is not ISO-8601";
pub const ERR_DUPLICATE_ID: &str = "duplicate component id within kind";
pub const ERR_REFERENCE_UNRESOLVED: &str = "referenced component id does not resolve";

// Auto-fixer errors
pub const ERR_BACKUP_WRITE: &str = "failed to write backup before auto-fix";
pub const ERR_FIX_WRITE: &str = "failed to write auto-fixed component file";

// Execution errors
pub const ERR_PARAMETER_BINDING: &str = "failed to bind required parameters";
pub const ERR_UNKNOWN_ACTION: &str = "action is not registered in the action table";
pub const ERR_PRECONDITION: &str = "pre-condition failed";
pub const ERR_POSTCONDITION: &str = "post-condition failed";

// Learning log errors
pub const ERR_LEARNING_APPEND: &str = "failed to append execution record to learning log";
pub const ERR_LEARNING_ROTATE: &str = "failed to rotate learning log";

/// Helper macro for file operation errors with context.
/// Usage: `file_err!("path", read)` -> "failed to read path"
#[macro_export]
macro_rules! file_err {
    ($path:expr, read) => {
        format!("failed to read {}", $path)
    };
    ($path:expr, write) => {
        format!("failed to write {}", $path)
    };
    ($path:expr, parse) => {
        format!("failed to parse {}", $path)
    };
}

/// Formats an error into a user-facing description, so extracted
/// components can present consistent error messaging without depending
/// on any particular transport layer.
pub trait ErrorFormatter: Send + Sync {
    /// Render the error into a user-facing string.
    fn format_error(&self, error: &Error) -> Cow<'_, str>;
}

/// Reports non-fatal errors to an observability backend.
pub trait ErrorReporter: Send + Sync {
    /// Capture the provided error for later inspection.
    fn capture(&self, error: &Error) -> Result<()>;

    /// Convenience helper to capture a simple message.
    fn capture_message(&self, message: impl Into<Cow<'static, str>>) -> Result<()> {
        let message: Cow<'static, str> = message.into();
        self.capture(&Error::msg(message))
    }
}

/// Error reporting implementation that drops every event. Useful for tests
/// or when a consumer does not yet integrate with error monitoring.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopErrorReporter;

impl ErrorReporter for NoopErrorReporter {
    fn capture(&self, _error: &Error) -> Result<()> {
        Ok(())
    }
}

/// Default formatter that surfaces the error's display output.
#[derive(Debug, Default, Clone, Copy)]
pub struct DisplayErrorFormatter;

impl ErrorFormatter for DisplayErrorFormatter {
    fn format_error(&self, error: &Error) -> Cow<'_, str> {
        Cow::Owned(format!("{error}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formatter_uses_display() {
        let formatter = DisplayErrorFormatter;
        let error = Error::msg("test error");
        assert_eq!(formatter.format_error(&error), "test error");
    }

    #[test]
    fn noop_reporter_drops_errors() {
        let reporter = NoopErrorReporter;
        let error = Error::msg("test");
        assert!(reporter.capture(&error).is_ok());
        assert!(reporter.capture_message("message").is_ok());
    }
}
