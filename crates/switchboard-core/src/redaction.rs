//! API key redaction and the emergency command filter
//!
//! `SecretRegistry` collects the secret pool from the in-memory config and
//! the process environment at startup. `ApiKeyRedactor` masks every known
//! secret plus anything matching the generic key patterns. The
//! `ProxyCommandFilter` is a last line of defense that strips inline proxy
//! commands from text about to leave for a remote LLM.

use std::collections::{BTreeSet, HashMap};

use once_cell::sync::Lazy;
use parking_lot::Mutex;
use regex::Regex;
use tracing::warn;

use crate::config::AppConfig;

/// Replacement mask for redacted secrets.
pub const REDACTION_MASK: &str = "(API_KEY_HAS_BEEN_REDACTED)";

/// Generic API key shape: `sk-` / `ak-` prefix followed by 20+ alphanumerics.
static API_KEY_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(sk-|ak-)[A-Za-z0-9]{20,}").expect("static pattern"));

/// ZAI-style keys: 32 hex chars, dot, 16+ mixed alphanumerics.
static ZAI_KEY_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b[0-9a-f]{32}\.[A-Za-z0-9]{16,}\b").expect("static pattern"));

static BEARER_TOKEN_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"Bearer\s+([A-Za-z0-9._~+/-]+=*)").expect("static pattern"));

/// Inputs shorter than this go through the bounded redaction cache.
const CACHE_TEXT_LIMIT: usize = 1000;
const CACHE_MAX_ENTRIES: usize = 1024;

/// Pool of known secrets collected at startup.
///
/// Injected into the redactor and the wire capture rather than living in
/// module-level state.
#[derive(Debug, Clone, Default)]
pub struct SecretRegistry {
    secrets: Vec<String>,
}

impl SecretRegistry {
    pub fn new(secrets: impl IntoIterator<Item = String>) -> Self {
        let mut unique: BTreeSet<String> = BTreeSet::new();
        for secret in secrets {
            if !secret.is_empty() {
                unique.insert(secret);
            }
        }
        Self {
            secrets: unique.into_iter().collect(),
        }
    }

    /// Walk the in-memory config and the process environment for secrets.
    pub fn discover(config: &AppConfig) -> Self {
        let mut found: BTreeSet<String> = BTreeSet::new();

        for key in &config.auth.api_keys {
            if !key.is_empty() {
                warn!(
                    "SECURITY WARNING: API key found in config auth.api_keys. \
                     API keys should only be set via environment variables."
                );
                found.insert(key.clone());
            }
        }

        for (name, backend) in &config.backends {
            for key in &backend.api_keys {
                if !key.is_empty() {
                    warn!(
                        backend = %name,
                        "SECURITY WARNING: API key found in backend config. \
                         API keys should only be set via environment variables."
                    );
                    found.insert(key.clone());
                }
            }
        }

        collect_env_secrets(std::env::vars(), &mut found);

        Self {
            secrets: found.into_iter().collect(),
        }
    }

    pub fn secrets(&self) -> &[String] {
        &self.secrets
    }

    pub fn is_empty(&self) -> bool {
        self.secrets.is_empty()
    }
}

/// Scan environment-like `(name, value)` pairs for secret material.
///
/// Variables whose name ends in `API_KEY`, `API_KEYS` or `API_KEY_<n>` are
/// split on `,;\n` and each fragment is taken when it is a bearer token, a
/// generic key match, or a plausible 10-400 char single token. All other
/// values are scanned with the key and bearer patterns.
fn collect_env_secrets(vars: impl Iterator<Item = (String, String)>, found: &mut BTreeSet<String>) {
    static KEY_NAME_RE: Lazy<Regex> =
        Lazy::new(|| Regex::new(r"(?i).*API_KEY(_\d+)?$").expect("static pattern"));
    static KEYS_CONTAINER_RE: Lazy<Regex> =
        Lazy::new(|| Regex::new(r"(?i).*API_KEYS?$").expect("static pattern"));

    for (name, value) in vars {
        if value.is_empty() {
            continue;
        }

        if KEY_NAME_RE.is_match(&name) || KEYS_CONTAINER_RE.is_match(&name) {
            for part in value.split([',', ';', '\n']) {
                let part = part.trim();
                if part.is_empty() {
                    continue;
                }
                if let Some(caps) = BEARER_TOKEN_PATTERN.captures(part) {
                    if let Some(token) = caps.get(1) {
                        found.insert(token.as_str().to_string());
                        continue;
                    }
                }
                if API_KEY_PATTERN.is_match(part) {
                    found.insert(part.to_string());
                    continue;
                }
                if part.len() >= 10 && part.len() <= 400 && !part.contains(char::is_whitespace) {
                    found.insert(part.to_string());
                }
            }
            continue;
        }

        for m in API_KEY_PATTERN.find_iter(&value) {
            found.insert(m.as_str().to_string());
        }
        for caps in BEARER_TOKEN_PATTERN.captures_iter(&value) {
            if let Some(token) = caps.get(1) {
                found.insert(token.as_str().to_string());
            }
        }
    }
}

/// Redact known API keys and generic key shapes from text.
pub struct ApiKeyRedactor {
    api_keys: Vec<String>,
    explicit_pattern: Option<Regex>,
    cache: Mutex<HashMap<String, String>>,
}

impl ApiKeyRedactor {
    /// Build a redactor over an explicit secret pool.
    ///
    /// Keys are sorted longest-first before building the alternation so a
    /// longer key that subsumes a shorter one is matched first.
    pub fn new(api_keys: impl IntoIterator<Item = String>) -> Self {
        let mut keys: Vec<String> = api_keys.into_iter().filter(|k| !k.is_empty()).collect();
        keys.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));
        keys.dedup();

        let explicit_pattern = if keys.is_empty() {
            None
        } else {
            let alternation = keys
                .iter()
                .map(|k| regex::escape(k))
                .collect::<Vec<_>>()
                .join("|");
            Regex::new(&alternation).ok()
        };

        Self {
            api_keys: keys,
            explicit_pattern,
            cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn from_registry(registry: &SecretRegistry) -> Self {
        Self::new(registry.secrets().iter().cloned())
    }

    /// Replace every occurrence of a known or generically shaped API key.
    pub fn redact(&self, text: &str) -> String {
        if text.is_empty() {
            return text.to_string();
        }

        if text.len() < CACHE_TEXT_LIMIT {
            if let Some(hit) = self.cache.lock().get(text) {
                return hit.clone();
            }
            let result = self.redact_internal(text);
            let mut cache = self.cache.lock();
            if cache.len() < CACHE_MAX_ENTRIES {
                cache.insert(text.to_string(), result.clone());
            }
            return result;
        }

        self.redact_internal(text)
    }

    fn redact_internal(&self, text: &str) -> String {
        let mut redacted = text.to_string();

        // Cheap containment check before the regex substitution.
        let has_explicit_hit = self.api_keys.iter().any(|key| redacted.contains(key));
        if has_explicit_hit {
            warn!("API key detected in prompt. Redacting before forwarding.");
            if let Some(pattern) = &self.explicit_pattern {
                redacted = pattern.replace_all(&redacted, REDACTION_MASK).into_owned();
            }
        }

        redacted = API_KEY_PATTERN
            .replace_all(&redacted, REDACTION_MASK)
            .into_owned();
        redacted = ZAI_KEY_PATTERN
            .replace_all(&redacted, REDACTION_MASK)
            .into_owned();
        redacted = BEARER_TOKEN_PATTERN
            .replace_all(&redacted, format!("Bearer {REDACTION_MASK}").as_str())
            .into_owned();

        redacted
    }
}

/// Emergency filter removing inline proxy commands before upstream dispatch.
///
/// The command system has already had its chance by the time this runs, so
/// any hit indicates a leak and is logged loudly.
pub struct ProxyCommandFilter {
    prefix: String,
    pattern: Regex,
}

impl ProxyCommandFilter {
    pub fn new(prefix: impl Into<String>) -> Self {
        let prefix = prefix.into();
        let pattern = Self::build_pattern(&prefix);
        Self { prefix, pattern }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    fn build_pattern(prefix: &str) -> Regex {
        let escaped = regex::escape(prefix);
        // Bare commands and the parenthesized argument form. The argument
        // group is matched greedily so `!/hello(x=1)` is removed whole.
        Regex::new(&format!(r"(?i){escaped}[\w-]+(?:\([^)]*\))?"))
            .expect("valid command pattern")
    }

    /// Remove every command match and collapse resulting whitespace runs.
    pub fn filter_commands(&self, text: &str) -> String {
        if text.trim().is_empty() {
            return text.to_string();
        }

        let matches: Vec<(usize, usize, &str)> = self
            .pattern
            .find_iter(text)
            .map(|m| (m.start(), m.end(), m.as_str()))
            .collect();
        if matches.is_empty() {
            return text.to_string();
        }

        warn!(
            count = matches.len(),
            "EMERGENCY FILTER TRIGGERED: proxy command(s) detected in text bound \
             for a remote LLM. Commands will be removed."
        );
        for (i, (start, end, matched)) in matches.iter().enumerate() {
            warn!(
                "  Command {}: '{}' at position {}-{}",
                i + 1,
                matched,
                start,
                end
            );
        }

        let filtered = self.pattern.replace_all(text, "");
        static WS_RUN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("static pattern"));
        WS_RUN.replace_all(&filtered, " ").trim().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_explicit_key_redacted() {
        let redactor = ApiKeyRedactor::new(vec!["super-secret-key-123".to_string()]);
        let out = redactor.redact("my key is super-secret-key-123 ok");
        assert_eq!(out, format!("my key is {REDACTION_MASK} ok"));
    }

    #[test]
    fn test_longer_key_matched_first() {
        let redactor = ApiKeyRedactor::new(vec![
            "secretvalue".to_string(),
            "secretvalue-extended-suffix".to_string(),
        ]);
        let out = redactor.redact("token=secretvalue-extended-suffix");
        assert!(!out.contains("extended-suffix"));
        assert!(out.contains(REDACTION_MASK));
    }

    #[test]
    fn test_generic_patterns_redacted() {
        let redactor = ApiKeyRedactor::new(Vec::<String>::new());
        let out = redactor.redact("use sk-AAAAAAAAAAAAAAAAAAAA please");
        assert_eq!(out, format!("use {REDACTION_MASK} please"));

        let zai = format!("{}.{}", "a".repeat(32).replace('a', "0"), "Zz19".repeat(5));
        let out = redactor.redact(&format!("zai {zai} end"));
        assert!(!out.contains(&zai));
    }

    #[test]
    fn test_bearer_token_redacted() {
        let redactor = ApiKeyRedactor::new(Vec::<String>::new());
        let out = redactor.redact("Authorization: Bearer abc.def-ghi_jkl");
        assert_eq!(out, format!("Authorization: Bearer {REDACTION_MASK}"));
    }

    #[test]
    fn test_redaction_monotone_over_pool() {
        let secrets = vec![
            "sk-ThisIsALongEnoughKey000001".to_string(),
            "plainsecrettoken".to_string(),
        ];
        let redactor = ApiKeyRedactor::new(secrets.clone());
        let text = format!(
            "first {} then {} and both again {} {}",
            secrets[0], secrets[1], secrets[0], secrets[1]
        );
        let out = redactor.redact(&text);
        for secret in &secrets {
            assert!(!out.contains(secret.as_str()));
        }
    }

    #[test]
    fn test_cache_returns_same_result() {
        let redactor = ApiKeyRedactor::new(vec!["cachedsecret".to_string()]);
        let first = redactor.redact("x cachedsecret y");
        let second = redactor.redact("x cachedsecret y");
        assert_eq!(first, second);
    }

    #[test]
    fn test_env_discovery_key_name_split() {
        let mut found = BTreeSet::new();
        collect_env_secrets(
            vec![(
                "OPENAI_API_KEYS".to_string(),
                "sk-AAAAAAAAAAAAAAAAAAAA, plain-token-long-enough".to_string(),
            )]
            .into_iter(),
            &mut found,
        );
        assert!(found.contains("sk-AAAAAAAAAAAAAAAAAAAA"));
        assert!(found.contains("plain-token-long-enough"));
    }

    #[test]
    fn test_env_discovery_numbered_and_bearer() {
        let mut found = BTreeSet::new();
        collect_env_secrets(
            vec![
                ("GEMINI_API_KEY_2".to_string(), "Bearer tok-abc.def".to_string()),
                ("UNRELATED".to_string(), "short".to_string()),
            ]
            .into_iter(),
            &mut found,
        );
        assert!(found.contains("tok-abc.def"));
        assert!(!found.contains("short"));
    }

    #[test]
    fn test_env_discovery_embedded_in_other_values() {
        let mut found = BTreeSet::new();
        collect_env_secrets(
            vec![(
                "STARTUP_FLAGS".to_string(),
                "--token sk-BBBBBBBBBBBBBBBBBBBBBB --verbose".to_string(),
            )]
            .into_iter(),
            &mut found,
        );
        assert!(found.contains("sk-BBBBBBBBBBBBBBBBBBBBBB"));
    }

    #[test]
    fn test_filter_removes_commands() {
        let filter = ProxyCommandFilter::new("!/");
        assert_eq!(filter.filter_commands("hi !/set(model=gpt-4) there"), "hi there");
        assert_eq!(filter.filter_commands("!/hello"), "");
        assert_eq!(filter.filter_commands("plain text"), "plain text");
    }

    #[test]
    fn test_filter_collapses_whitespace() {
        let filter = ProxyCommandFilter::new("!/");
        let out = filter.filter_commands("a !/set(x=1)   !/unset(x) b");
        assert_eq!(out, "a b");
    }

    #[test]
    fn test_filter_case_insensitive() {
        let filter = ProxyCommandFilter::new("!/");
        assert_eq!(filter.filter_commands("!/HELLO friend"), "friend");
    }
}
