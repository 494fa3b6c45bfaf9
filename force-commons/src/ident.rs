//! Identifier normalization: the Validator requires snake_case component
//! and parameter names (spec invariant); the Auto-Fixer converts
//! CamelCase/kebab-case names into that form.

use regex::Regex;
use std::sync::LazyLock;

static SNAKE_CASE_RE: LazyLock<Regex> =
    LazyLock::new(|| compile_regex(r"^[a-z][a-z0-9_]*$"));

fn compile_regex(pattern: &str) -> Regex {
    match Regex::new(pattern) {
        Ok(regex) => regex,
        Err(err) => panic!("invalid regex pattern `{pattern}`: {err}"),
    }
}

/// True when `value` matches `^[a-z][a-z0-9_]*$`.
pub fn is_snake_case(value: &str) -> bool {
    SNAKE_CASE_RE.is_match(value)
}

/// Convert a CamelCase, PascalCase, or kebab-case identifier into snake_case.
/// Identifiers already in snake_case are returned unchanged.
pub fn to_snake_case(value: &str) -> String {
    if is_snake_case(value) {
        return value.to_string();
    }

    let mut out = String::with_capacity(value.len() + 4);
    let mut prev_lower_or_digit = false;

    for ch in value.chars() {
        if ch == '-' || ch == ' ' {
            out.push('_');
            prev_lower_or_digit = false;
            continue;
        }
        if ch == '_' {
            out.push('_');
            prev_lower_or_digit = false;
            continue;
        }
        if ch.is_ascii_uppercase() {
            if prev_lower_or_digit {
                out.push('_');
            }
            out.push(ch.to_ascii_lowercase());
            prev_lower_or_digit = false;
        } else {
            out.push(ch.to_ascii_lowercase());
            prev_lower_or_digit = ch.is_ascii_lowercase() || ch.is_ascii_digit();
        }
    }

    // Collapse any accidental repeated underscores introduced above.
    while out.contains("__") {
        out = out.replace("__", "_");
    }
    out.trim_matches('_').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_valid_snake_case() {
        assert!(is_snake_case("tool_id"));
        assert!(is_snake_case("a"));
        assert!(is_snake_case("a1_b2"));
    }

    #[test]
    fn rejects_non_snake_case() {
        assert!(!is_snake_case("ToolId"));
        assert!(!is_snake_case("dry-run"));
        assert!(!is_snake_case("1abc"));
        assert!(!is_snake_case(""));
    }

    #[test]
    fn converts_camel_case() {
        assert_eq!(to_snake_case("ToolId"), "tool_id");
        assert_eq!(to_snake_case("dryRun"), "dry_run");
    }

    #[test]
    fn converts_kebab_case() {
        assert_eq!(to_snake_case("dry-run"), "dry_run");
    }

    #[test]
    fn leaves_snake_case_unchanged() {
        assert_eq!(to_snake_case("already_snake"), "already_snake");
    }
}
