//! Small shared helpers

use regex::Regex;

/// Match a `*` wildcard pattern against a value, case-insensitively.
///
/// Used by the reasoning alias table where entries like `gpt-4*` select
/// settings for a family of model ids.
pub fn wildcard_match(pattern: &str, value: &str) -> bool {
    let mut escaped = String::with_capacity(pattern.len() + 8);
    escaped.push_str("^(?i)");
    for ch in pattern.chars() {
        if ch == '*' {
            escaped.push_str(".*");
        } else {
            escaped.push_str(&regex::escape(&ch.to_string()));
        }
    }
    escaped.push('$');
    match Regex::new(&escaped) {
        Ok(re) => re.is_match(value),
        Err(_) => pattern.eq_ignore_ascii_case(value),
    }
}

/// Expand `~` and `$VAR` / `${VAR}` references in a path string.
pub fn expand_path(raw: &str) -> String {
    let mut path = raw.trim().to_string();

    if path == "~" || path.starts_with("~/") || path.starts_with("~\\") {
        if let Some(home) = std::env::var_os("HOME").or_else(|| std::env::var_os("USERPROFILE")) {
            let home = home.to_string_lossy().to_string();
            path = if path == "~" {
                home
            } else {
                format!("{}{}", home, &path[1..])
            };
        }
    }

    let var_re = Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}|\$([A-Za-z_][A-Za-z0-9_]*)")
        .expect("static pattern");
    let expanded = var_re.replace_all(&path, |caps: &regex::Captures<'_>| {
        let name = caps
            .get(1)
            .or_else(|| caps.get(2))
            .map(|m| m.as_str())
            .unwrap_or_default();
        std::env::var(name).unwrap_or_default()
    });

    expanded.into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wildcard_exact() {
        assert!(wildcard_match("gpt-4", "gpt-4"));
        assert!(!wildcard_match("gpt-4", "gpt-4o"));
    }

    #[test]
    fn test_wildcard_star() {
        assert!(wildcard_match("gemini-*", "gemini-2.5-pro"));
        assert!(wildcard_match("*", "anything"));
        assert!(!wildcard_match("claude-*", "gpt-4"));
    }

    #[test]
    fn test_wildcard_case_insensitive() {
        assert!(wildcard_match("GPT-4*", "gpt-4-turbo"));
    }

    #[test]
    fn test_expand_path_env_var() {
        std::env::set_var("SWITCHBOARD_TEST_DIR", "/opt/data");
        assert_eq!(expand_path("$SWITCHBOARD_TEST_DIR/logs"), "/opt/data/logs");
        assert_eq!(
            expand_path("${SWITCHBOARD_TEST_DIR}/logs"),
            "/opt/data/logs"
        );
        std::env::remove_var("SWITCHBOARD_TEST_DIR");
    }
}
