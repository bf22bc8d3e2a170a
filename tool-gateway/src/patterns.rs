use std::sync::LazyLock;

use regex::RegexSet;

/// SQL-shaped and script-shaped fragments that must never reach an
/// external tool as a parameter value.
static DANGEROUS_PATTERNS: LazyLock<RegexSet> = LazyLock::new(|| {
    RegexSet::new([
        r"(?i)\b(select|insert|update|delete|drop|alter|truncate)\b.{0,80}\b(from|into|table|database)\b",
        r"(?i)\bunion\b.{0,40}\bselect\b",
        r"(?i)(;|--)\s*(drop|delete|shutdown)\b",
        r"(?i)<\s*script\b",
        r"(?i)\bjavascript\s*:",
        r"(?i)\b(eval|exec)\s*\(",
        r"\$\(.+\)",
        r"`[^`]+`",
        r"(?i)\brm\s+-rf\b",
    ])
    .unwrap_or_else(|e| {
        // The pattern list is static; a failure here is a programming error.
        panic!("invalid dangerous-parameter patterns: {e}")
    })
});

/// Returns the first string that matches a dangerous pattern, if any.
pub fn find_dangerous<'a>(values: &[&'a str]) -> Option<&'a str> {
    values
        .iter()
        .find(|value| DANGEROUS_PATTERNS.is_match(value))
        .copied()
}
