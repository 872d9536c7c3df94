//! Credential string classification and redaction.
//!
//! Inbound `Authorization` headers may carry arbitrary bearer tokens meant
//! for other services; only values recognizable as Copilot-ecosystem
//! credentials are accepted. Classification is prefix-only.

/// Exact prefixes recognized as Copilot-ecosystem credentials.
const TOKEN_PREFIXES: &[&str] = &["ghu_", "ghp_", "gho_", "ghs_", "copilot_", "tid="];

/// Returns `true` if `s` classifies as a Copilot-ecosystem credential.
///
/// A string classifies when it starts with one of the known prefixes, or
/// with any `gh<alnum>_` prefix (covering token families GitHub introduces
/// after this list was written).
#[must_use]
pub fn is_copilot_token(s: &str) -> bool {
    let s = s.trim();
    if s.is_empty() {
        return false;
    }
    if TOKEN_PREFIXES.iter().any(|p| s.starts_with(p)) {
        return true;
    }
    // gh*_ wildcard: "gh", an alphanumeric run, then '_'.
    if let Some(idx) = s.find('_')
        && idx >= 2
        && s.starts_with("gh")
        && s[2..idx].chars().all(|c| c.is_ascii_alphanumeric())
    {
        return true;
    }
    false
}

/// Reduces a credential to its first four and last four characters.
///
/// Short values that would leak most of themselves collapse to `[redacted]`.
#[must_use]
pub fn redact(s: &str) -> String {
    let chars: Vec<char> = s.chars().collect();
    if chars.len() <= 12 {
        return "[redacted]".to_string();
    }
    let head: String = chars[..4].iter().collect();
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{head}...{tail}")
}
