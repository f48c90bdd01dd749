//! Degenerate tool-call loop detection
//!
//! Scans the trailing assistant turns of a conversation for the same tool
//! invoked repeatedly with identical arguments, and rejects the request
//! before it reaches an upstream once the repeat count inside the
//! configured time window passes `tool_loop_max_repeats`.
//!
//! Inbound message lists carry no timestamps, so the TTL window is
//! tracked across requests: the session persists a `ToolLoopStreak`
//! recording when the current window opened and how long the streak was
//! when it opened. Repeats observed before an expired window no longer
//! count toward the threshold.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::chat::{ChatMessage, Role};
use crate::domain::session::{LoopSettings, ToolLoopMode};
use crate::error::{ProxyError, Result};

/// Per-session record of the trailing tool-call streak.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolLoopStreak {
    pub name: String,
    pub arguments: String,
    /// Streak length when the active TTL window opened; repeats up to this
    /// point are stale and do not count.
    pub len_at_window_start: u32,
    /// Streak length at the last observation.
    pub last_len: u32,
    pub window_started_at: DateTime<Utc>,
}

/// Evaluate the conversation against the loop config.
///
/// Returns the streak record to persist on the session alongside the
/// verdict; the record is updated even when the verdict rejects the
/// request.
pub fn check_tool_loop(
    messages: &[ChatMessage],
    config: &LoopSettings,
    previous: Option<&ToolLoopStreak>,
) -> (Option<ToolLoopStreak>, Result<()>) {
    evaluate(messages, config, previous, Utc::now())
}

fn evaluate(
    messages: &[ChatMessage],
    config: &LoopSettings,
    previous: Option<&ToolLoopStreak>,
    now: DateTime<Utc>,
) -> (Option<ToolLoopStreak>, Result<()>) {
    if !config.loop_detection_enabled
        || !config.tool_loop_detection_enabled
        || config.tool_loop_mode == ToolLoopMode::None
    {
        return (previous.cloned(), Ok(()));
    }

    let Some((name, arguments, len)) = trailing_streak(messages) else {
        return (None, Ok(()));
    };

    let ttl = chrono::Duration::seconds(config.tool_loop_ttl_seconds as i64);
    let streak = match previous {
        Some(prev) if prev.name == name && prev.arguments == arguments => {
            if now - prev.window_started_at > ttl {
                // Window expired: everything seen so far is stale.
                ToolLoopStreak {
                    name,
                    arguments,
                    len_at_window_start: prev.last_len,
                    last_len: len,
                    window_started_at: now,
                }
            } else {
                ToolLoopStreak {
                    name,
                    arguments,
                    len_at_window_start: prev.len_at_window_start,
                    last_len: len,
                    window_started_at: prev.window_started_at,
                }
            }
        }
        _ => ToolLoopStreak {
            name,
            arguments,
            len_at_window_start: 0,
            last_len: len,
            window_started_at: now,
        },
    };

    let repeats_in_window = streak.last_len.saturating_sub(streak.len_at_window_start);
    let verdict = if repeats_in_window >= config.tool_loop_max_repeats {
        Err(ProxyError::LoopDetection(format!(
            "Tool '{}' was called {repeats_in_window} times with identical arguments \
             within {} seconds",
            streak.name, config.tool_loop_ttl_seconds
        )))
    } else {
        Ok(())
    };

    (Some(streak), verdict)
}

/// Trailing run of identical `(name, arguments)` tool calls across the
/// assistant turns at the end of the conversation.
fn trailing_streak(messages: &[ChatMessage]) -> Option<(String, String, u32)> {
    let mut calls: Vec<(&str, &str)> = Vec::new();
    for message in messages {
        if !matches!(message.role, Role::Assistant | Role::Model) {
            continue;
        }
        let Some(tool_calls) = &message.tool_calls else {
            continue;
        };
        for call in tool_calls {
            calls.push((call.function.name.as_str(), call.function.arguments.as_str()));
        }
    }

    let (name, arguments) = *calls.last()?;
    let len = calls
        .iter()
        .rev()
        .take_while(|(n, a)| *n == name && *a == arguments)
        .count() as u32;
    Some((name.to_string(), arguments.to_string(), len))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::chat::ToolCall;

    fn assistant_with_call(name: &str, arguments: &str) -> ChatMessage {
        ChatMessage {
            role: Role::Assistant,
            content: None,
            name: None,
            tool_call_id: None,
            tool_calls: Some(vec![ToolCall::function("call_1", name, arguments)]),
        }
    }

    fn repeated(count: usize) -> Vec<ChatMessage> {
        (0..count)
            .map(|_| assistant_with_call("read_file", r#"{"path":"x"}"#))
            .collect()
    }

    fn settings(max_repeats: u32, ttl_seconds: u64) -> LoopSettings {
        LoopSettings {
            tool_loop_max_repeats: max_repeats,
            tool_loop_ttl_seconds: ttl_seconds,
            ..Default::default()
        }
    }

    #[test]
    fn test_loop_detected_at_threshold() {
        let (streak, verdict) = evaluate(&repeated(4), &settings(4, 120), None, Utc::now());
        let err = verdict.unwrap_err();
        assert!(matches!(err, ProxyError::LoopDetection(_)));
        assert_eq!(err.status_code(), 400);
        assert_eq!(streak.unwrap().last_len, 4);
    }

    #[test]
    fn test_below_threshold_passes() {
        let (streak, verdict) = evaluate(&repeated(3), &settings(4, 120), None, Utc::now());
        assert!(verdict.is_ok());
        assert_eq!(streak.unwrap().last_len, 3);
    }

    #[test]
    fn test_different_arguments_reset_the_count() {
        let messages = vec![
            assistant_with_call("read_file", r#"{"path":"a"}"#),
            assistant_with_call("read_file", r#"{"path":"b"}"#),
            assistant_with_call("read_file", r#"{"path":"a"}"#),
            assistant_with_call("read_file", r#"{"path":"b"}"#),
        ];
        let (_, verdict) = evaluate(&messages, &settings(2, 120), None, Utc::now());
        assert!(verdict.is_ok());
    }

    #[test]
    fn test_repeats_outside_ttl_window_do_not_count() {
        let config = settings(5, 60);
        let t0 = Utc::now();

        // Three repeats observed at t0: below threshold, window opens.
        let (streak, verdict) = evaluate(&repeated(3), &config, None, t0);
        assert!(verdict.is_ok());
        let streak = streak.unwrap();
        assert_eq!(streak.len_at_window_start, 0);

        // The streak grows to six, but only after the window expired; the
        // three stale repeats no longer count and 6 - 3 < 5.
        let later = t0 + chrono::Duration::seconds(61);
        let (streak, verdict) = evaluate(&repeated(6), &config, Some(&streak), later);
        assert!(verdict.is_ok());
        let streak = streak.unwrap();
        assert_eq!(streak.len_at_window_start, 3);
        assert_eq!(streak.window_started_at, later);
    }

    #[test]
    fn test_repeats_inside_ttl_window_accumulate() {
        let config = settings(5, 60);
        let t0 = Utc::now();

        let (streak, verdict) = evaluate(&repeated(3), &config, None, t0);
        assert!(verdict.is_ok());

        // Still inside the window: the full streak counts and trips.
        let later = t0 + chrono::Duration::seconds(30);
        let (_, verdict) = evaluate(&repeated(6), &config, streak.as_ref(), later);
        assert!(verdict.is_err());
    }

    #[test]
    fn test_signature_change_restarts_streak() {
        let config = settings(2, 120);
        let t0 = Utc::now();
        let (streak, _) = evaluate(&repeated(3), &config, None, t0);

        let messages = vec![assistant_with_call("write_file", r#"{"path":"y"}"#)];
        let (streak, verdict) = evaluate(&messages, &config, streak.as_ref(), t0);
        assert!(verdict.is_ok());
        let streak = streak.unwrap();
        assert_eq!(streak.name, "write_file");
        assert_eq!(streak.len_at_window_start, 0);
        assert_eq!(streak.last_len, 1);
    }

    #[test]
    fn test_no_tool_calls_clears_streak() {
        let config = settings(2, 120);
        let (streak, _) = evaluate(&repeated(3), &config, None, Utc::now());
        assert!(streak.is_some());

        let messages = vec![ChatMessage::user("plain text")];
        let (streak, verdict) = evaluate(&messages, &config, streak.as_ref(), Utc::now());
        assert!(verdict.is_ok());
        assert!(streak.is_none());
    }

    #[test]
    fn test_disabled_detection_passes() {
        let mut config = settings(2, 120);
        config.tool_loop_detection_enabled = false;
        let (_, verdict) = evaluate(&repeated(10), &config, None, Utc::now());
        assert!(verdict.is_ok());

        let mut config = settings(2, 120);
        config.tool_loop_mode = ToolLoopMode::None;
        let (_, verdict) = evaluate(&repeated(10), &config, None, Utc::now());
        assert!(verdict.is_ok());
    }
}
