//! Command parser
//!
//! Recognizes `<prefix><name>` and `<prefix><name>(k1=v1,k2=v2,…)` inside a
//! message. Values may be unquoted, single-quoted or double-quoted; quoted
//! whitespace is preserved. A bare boolean-like argument becomes the
//! `enabled` flag; other bare arguments are positional.

use regex::Regex;

use crate::commands::command::{parse_bool, Command};

pub struct CommandParser {
    prefix: String,
    pattern: Regex,
}

impl CommandParser {
    pub fn new(prefix: impl Into<String>) -> Self {
        let prefix = prefix.into();
        let escaped = regex::escape(&prefix);
        let pattern = Regex::new(&format!(r"(?i){escaped}([\w-]+)(?:\(([^)]*)\))?"))
            .expect("valid command pattern");
        Self { prefix, pattern }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Parse the command in `text`, if any.
    ///
    /// When the text contains several syntactically valid commands, the
    /// last one wins; the returned span covers only that match. Earlier
    /// literals are the caller's to strip.
    pub fn parse(&self, text: &str) -> Option<(Command, String)> {
        let m = self.pattern.captures_iter(text).last()?;
        let full = m.get(0)?.as_str().to_string();
        let name = m.get(1)?.as_str().to_lowercase();

        let mut command = Command::new(name);
        if let Some(args) = m.get(2) {
            fill_args(&mut command, args.as_str());
        }
        Some((command, full))
    }

    /// Spans of every command literal in `text`, in order.
    pub fn all_spans<'t>(&self, text: &'t str) -> Vec<&'t str> {
        self.pattern.find_iter(text).map(|m| m.as_str()).collect()
    }
}

fn fill_args(command: &mut Command, raw: &str) {
    for part in split_args(raw) {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }
        match split_key_value(part) {
            Some((key, value)) => {
                command
                    .args
                    .insert(key.trim().to_lowercase(), unquote(value.trim()));
            }
            None => {
                let token = unquote(part);
                if parse_bool(&token).is_some() && !command.args.contains_key("enabled") {
                    command.args.insert("enabled".to_string(), token);
                } else {
                    command.positional.push(token);
                }
            }
        }
    }
}

/// Split on commas that are not inside quotes.
fn split_args(raw: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut quote: Option<char> = None;

    for ch in raw.chars() {
        match quote {
            Some(q) => {
                current.push(ch);
                if ch == q {
                    quote = None;
                }
            }
            None => match ch {
                '\'' | '"' => {
                    quote = Some(ch);
                    current.push(ch);
                }
                ',' => {
                    parts.push(std::mem::take(&mut current));
                }
                _ => current.push(ch),
            },
        }
    }
    if !current.is_empty() {
        parts.push(current);
    }
    parts
}

/// Split on the first `=` that is not inside quotes.
fn split_key_value(part: &str) -> Option<(&str, &str)> {
    let mut quote: Option<char> = None;
    for (idx, ch) in part.char_indices() {
        match quote {
            Some(q) => {
                if ch == q {
                    quote = None;
                }
            }
            None => match ch {
                '\'' | '"' => quote = Some(ch),
                '=' => return Some((&part[..idx], &part[idx + 1..])),
                _ => {}
            },
        }
    }
    None
}

fn unquote(value: &str) -> String {
    let bytes = value.as_bytes();
    if bytes.len() >= 2 {
        let first = bytes[0];
        let last = bytes[bytes.len() - 1];
        if (first == b'"' && last == b'"') || (first == b'\'' && last == b'\'') {
            return value[1..value.len() - 1].to_string();
        }
    }
    value.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parser() -> CommandParser {
        CommandParser::new("!/")
    }

    #[test]
    fn test_bare_command() {
        let (command, span) = parser().parse("!/hello").unwrap();
        assert_eq!(command.name, "hello");
        assert!(command.is_empty());
        assert_eq!(span, "!/hello");
    }

    #[test]
    fn test_command_with_args() {
        let (command, span) = parser().parse("please !/set(model=gpt-4, temperature=0.3)").unwrap();
        assert_eq!(command.name, "set");
        assert_eq!(command.arg("model"), Some("gpt-4"));
        assert_eq!(command.arg("temperature"), Some("0.3"));
        assert_eq!(span, "!/set(model=gpt-4, temperature=0.3)");
    }

    #[test]
    fn test_quoted_values_preserve_whitespace() {
        let (command, _) = parser()
            .parse(r#"!/set(project="my project", dir='/tmp/a b')"#)
            .unwrap();
        assert_eq!(command.arg("project"), Some("my project"));
        assert_eq!(command.arg("dir"), Some("/tmp/a b"));
    }

    #[test]
    fn test_positional_bool_becomes_enabled() {
        let (command, _) = parser().parse("!/loop-detection(false)").unwrap();
        assert_eq!(command.arg("enabled"), Some("false"));
    }

    #[test]
    fn test_positional_value() {
        let (command, _) = parser().parse("!/workspace(/home/user/project)").unwrap();
        assert_eq!(command.positional, vec!["/home/user/project"]);
        assert_eq!(command.arg_or_positional("path"), Some("/home/user/project"));
    }

    #[test]
    fn test_last_command_wins() {
        let (command, span) = parser()
            .parse("!/set(model=a) and later !/model(name=b)")
            .unwrap();
        assert_eq!(command.name, "model");
        assert_eq!(span, "!/model(name=b)");
    }

    #[test]
    fn test_no_command() {
        assert!(parser().parse("just some text").is_none());
    }

    #[test]
    fn test_case_insensitive_name() {
        let (command, _) = parser().parse("!/HELLO").unwrap();
        assert_eq!(command.name, "hello");
    }

    #[test]
    fn test_all_spans() {
        let spans = parser().all_spans("!/set(a=1) mid !/hello end");
        assert_eq!(spans, vec!["!/set(a=1)", "!/hello"]);
    }

    #[test]
    fn test_quoted_comma_not_split() {
        let (command, _) = parser().parse(r#"!/set(stop="a,b", model=x)"#).unwrap();
        assert_eq!(command.arg("stop"), Some("a,b"));
        assert_eq!(command.arg("model"), Some("x"));
    }
}
