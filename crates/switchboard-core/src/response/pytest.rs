//! Pytest output compression
//!
//! Command replies that carry pytest output are shrunk before reaching the
//! client: PASSED lines are dropped, inline timing segments stripped and
//! whitespace runs collapsed. The last line (the pytest summary) always
//! survives. Compression is skipped for outputs below the configured line
//! threshold and for outputs that look like execution errors.

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::info;

use crate::domain::session::Session;

static PASSED_LINE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\bPASSED\b").expect("static pattern"));
static TIMING_SEGMENT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b\d+(?:\.\d+)?s\s+(setup|call|teardown)\b|\bs\s+(setup|call|teardown)\b")
        .expect("static pattern")
});
static SPACE_RUN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s{2,}").expect("static pattern"));

const ERROR_INDICATORS: &[&str] = &[
    "Traceback (most recent call last):",
    "command not found",
    "SyntaxError:",
    "ERROR: file or directory not found",
];

const SHELL_TOOL_NAMES: &[&str] = &[
    "bash",
    "exec_command",
    "execute_command",
    "run_shell_command",
    "shell",
    "local_shell",
    "container.exec",
];

/// Whether the command name or its output suggests a pytest run.
pub fn looks_like_pytest(command_name: &str, message: &str) -> bool {
    static PYTEST_COMMAND: Lazy<Regex> = Lazy::new(|| {
        Regex::new(r"(?i)^\s*(pytest\b|python3?\s+-m\s+pytest\b|py\.test\b)").expect("static pattern")
    });
    if PYTEST_COMMAND.is_match(command_name) {
        return true;
    }
    if SHELL_TOOL_NAMES.contains(&command_name)
        && (message.contains("test session starts") || message.contains("short test summary info"))
    {
        return true;
    }
    message.contains("test session starts") || message.contains("short test summary info")
}

/// Compress a pytest reply when the session's toggles allow it.
///
/// Returns the message unchanged when compression does not apply. The
/// one-shot `compress_next_tool_call_reply` flag forces the pytest
/// detection; the caller resets the flag afterwards.
pub fn maybe_compress(command_name: &str, message: &str, session: &Session) -> String {
    if message.is_empty() || !session.state.pytest_compression_enabled {
        return message.to_string();
    }
    let forced = session.state.compress_next_tool_call_reply;
    if !forced && !looks_like_pytest(command_name, message) {
        return message.to_string();
    }
    if ERROR_INDICATORS
        .iter()
        .any(|indicator| message.contains(indicator))
    {
        return message.to_string();
    }

    let line_count = message.lines().count();
    let min_lines = threshold(session);
    if line_count < min_lines {
        info!(
            lines = line_count,
            threshold = min_lines,
            "Skipping pytest compression below threshold"
        );
        return message.to_string();
    }

    compress(message)
}

/// Minimum line count before compression fires. The environment variable
/// overrides the session value.
fn threshold(session: &Session) -> usize {
    if let Ok(raw) = std::env::var("PYTEST_COMPRESSION_MIN_LINES") {
        if let Ok(value) = raw.trim().parse::<usize>() {
            return value;
        }
    }
    session.state.pytest_compression_min_lines.unwrap_or(0)
}

/// Unconditional compression pass.
pub fn compress(output: &str) -> String {
    let lines: Vec<&str> = output.split('\n').collect();
    let Some((last_line, head)) = lines.split_last() else {
        return output.to_string();
    };

    let mut filtered: Vec<String> = Vec::with_capacity(head.len());
    for line in head {
        if PASSED_LINE.is_match(line) {
            continue;
        }
        let trimmed = TIMING_SEGMENT.replace_all(line, "");
        let trimmed = SPACE_RUN.replace_all(&trimmed, " ");
        let trimmed = trimmed.trim();
        if !trimmed.is_empty() {
            filtered.push(trimmed.to_string());
        }
    }

    // The summary line survives even when a filter would match it.
    filtered.push((*last_line).to_string());

    let compressed = filtered.join("\n");
    info!(
        original_lines = lines.len(),
        compressed_lines = filtered.len(),
        "Pytest compression applied"
    );
    compressed
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "\
============================= test session starts ==============================
tests/test_a.py::test_one PASSED                                         [ 25%]
tests/test_a.py::test_two 0.12s call FAILED                              [ 50%]
tests/test_a.py::test_three PASSED                                       [ 75%]
tests/test_a.py::test_four 0.03s setup PASSED                            [100%]
========================= 1 failed, 3 passed in 0.21s ==========================";

    fn session() -> Session {
        Session::new("s1")
    }

    #[test]
    fn test_passed_lines_dropped_summary_kept() {
        let out = compress(SAMPLE);
        assert!(!out.contains("test_one"));
        assert!(!out.contains("test_three"));
        assert!(out.contains("test_two"));
        assert!(out.ends_with("1 failed, 3 passed in 0.21s =========================="));
    }

    #[test]
    fn test_timing_segments_stripped() {
        let out = compress(SAMPLE);
        assert!(!out.contains("0.12s call"));
        assert!(out.contains("FAILED"));
    }

    #[test]
    fn test_below_threshold_untouched() {
        let mut session = session();
        session.state = session.state.with_pytest_compression_min_lines(Some(100));
        let out = maybe_compress("pytest", SAMPLE, &session);
        assert_eq!(out, SAMPLE);
    }

    #[test]
    fn test_disabled_untouched() {
        let mut session = session();
        session.state = session.state.with_pytest_compression(false);
        let out = maybe_compress("pytest", SAMPLE, &session);
        assert_eq!(out, SAMPLE);
    }

    #[test]
    fn test_error_output_untouched() {
        let with_error = format!("Traceback (most recent call last):\n{SAMPLE}");
        let out = maybe_compress("pytest", &with_error, &session());
        assert_eq!(out, with_error);
    }

    #[test]
    fn test_non_pytest_output_untouched() {
        let out = maybe_compress("ls", "file_a\nfile_b PASSED\nfile_c", &session());
        assert_eq!(out, "file_a\nfile_b PASSED\nfile_c");
    }

    #[test]
    fn test_shell_tool_with_pytest_output_detected() {
        assert!(looks_like_pytest(
            "bash",
            "===== test session starts =====\n1 passed"
        ));
        assert!(!looks_like_pytest("bash", "plain output"));
    }

    #[test]
    fn test_env_override_takes_precedence() {
        std::env::set_var("PYTEST_COMPRESSION_MIN_LINES", "1000");
        let out = maybe_compress("pytest", SAMPLE, &session());
        std::env::remove_var("PYTEST_COMPRESSION_MIN_LINES");
        assert_eq!(out, SAMPLE);
    }
}
