//! Portable argv quoting for shell statements.

use once_cell::sync::Lazy;
use regex::Regex;

/// Joins `args` into a single shell statement, quoting each argument so the
/// platform shell parses it back byte-for-byte.
///
/// # Example
///
/// ```
/// use executor::quote_commands;
/// let args = ["a/*".to_string(), "$a".to_string(), "hello".to_string()];
/// assert_eq!(quote_commands(&args), "'a/*' '$a' hello");
/// ```
pub fn quote_commands(args: &[String]) -> String {
    args.iter()
        .map(|arg| quote(arg))
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(not(windows))]
static ESCAPE_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[^A-Za-z0-9_@%+=:,./-]").expect("valid escape pattern"));

#[cfg(not(windows))]
fn quote(s: &str) -> String {
    if s.is_empty() {
        return "''".to_string();
    }
    if ESCAPE_PATTERN.is_match(s) {
        return format!("'{}'", s.replace('\'', r#"'"'"'"#));
    }
    s.to_string()
}

#[cfg(windows)]
static ESCAPE_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"[\s"]"#).expect("valid escape pattern"));

// cmd.exe rules: wrap in double quotes, doubling embedded quotes.
#[cfg(windows)]
fn quote(s: &str) -> String {
    if s.is_empty() {
        return "\"\"".to_string();
    }
    if ESCAPE_PATTERN.is_match(s) {
        return format!("\"{}\"", s.replace('"', "\"\""));
    }
    s.to_string()
}
