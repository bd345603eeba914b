//! Environment-driven configuration helpers.

use std::env;

/// Returns the trimmed value of `name`, ignoring unset or blank variables.
pub fn env_string(name: &str) -> Option<String> {
    let raw = env::var(name).ok()?;
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// Interprets `1`, `true`, `yes` and `on` (any case) as enabled.
pub fn env_flag(name: &str) -> bool {
    env_string(name)
        .map(|value| {
            matches!(
                value.to_ascii_lowercase().as_str(),
                "1" | "true" | "yes" | "on"
            )
        })
        .unwrap_or(false)
}
