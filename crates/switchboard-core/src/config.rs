//! Application configuration
//!
//! Loaded from a TOML file (`SWITCHBOARD_CONFIG` or `./switchboard.toml`)
//! with environment-variable fallbacks for the common knobs. Backend API key
//! pools are merged from `<BACKEND>_API_KEY` / `<BACKEND>_API_KEY_<n>` env
//! vars so keys never have to live in the config file.

use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::path::Path;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;

use crate::domain::session::ReasoningEffort;

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Prefix introducing inline commands inside chat messages.
    #[serde(default = "default_command_prefix")]
    pub command_prefix: String,
    /// When set, requests without a session project are rejected with 400.
    #[serde(default)]
    pub force_set_project: bool,
    #[serde(default = "default_backend_name")]
    pub default_backend: String,
    #[serde(default = "default_true")]
    pub redact_api_keys_in_prompts: bool,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub backends: BTreeMap<String, BackendSection>,
    #[serde(default)]
    pub logging: LoggingSection,
    #[serde(default)]
    pub session: SessionSection,
    #[serde(default)]
    pub reasoning_aliases: Vec<ModelReasoningAliases>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct AuthConfig {
    /// Allow-list of client keys accepted by the proxy itself.
    #[serde(default)]
    pub api_keys: Vec<String>,
    #[serde(default)]
    pub disable_auth: bool,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct BackendSection {
    /// Ordered key pool; rotation walks this list round-robin.
    #[serde(default)]
    pub api_keys: Vec<String>,
    #[serde(default)]
    pub base_url: Option<String>,
    /// Static model list for connectors without a discovery endpoint.
    #[serde(default)]
    pub models: Vec<String>,
    #[serde(default)]
    pub google_cloud_project: Option<String>,
    /// Connector implementation name; defaults to the section name.
    #[serde(default)]
    pub connector: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingSection {
    /// Wire capture file; capture is disabled when unset.
    #[serde(default)]
    pub capture_file: Option<String>,
    #[serde(default = "default_capture_entries")]
    pub capture_max_entries_per_flush: usize,
    #[serde(default = "default_capture_flush_secs")]
    pub capture_flush_interval_secs: f64,
    #[serde(default)]
    pub capture_max_bytes: Option<u64>,
    #[serde(default)]
    pub capture_max_files: usize,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            capture_file: None,
            capture_max_entries_per_flush: default_capture_entries(),
            capture_flush_interval_secs: default_capture_flush_secs(),
            capture_max_bytes: None,
            capture_max_files: 0,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SessionSection {
    /// Session TTL in seconds; 0 keeps sessions forever.
    #[serde(default)]
    pub ttl_secs: u64,
    #[serde(default = "default_cleanup_secs")]
    pub cleanup_interval_secs: u64,
}

impl Default for SessionSection {
    fn default() -> Self {
        Self {
            ttl_secs: 0,
            cleanup_interval_secs: default_cleanup_secs(),
        }
    }
}

/// Reasoning settings installed by a reasoning-alias command.
#[derive(Debug, Clone, Deserialize, Default, PartialEq)]
pub struct ReasoningMode {
    #[serde(default)]
    pub temperature: Option<f64>,
    #[serde(default)]
    pub top_p: Option<f64>,
    #[serde(default)]
    pub reasoning_effort: Option<ReasoningEffort>,
    #[serde(default)]
    pub thinking_budget: Option<u32>,
}

/// Per-model-family reasoning alias table entry.
///
/// `model` is a `*` wildcard matched against the session's current model id;
/// `modes` maps the alias level (`high`, `medium`, `low`, `none` or a custom
/// name) to the settings it installs.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct ModelReasoningAliases {
    pub model: String,
    #[serde(default)]
    pub modes: BTreeMap<String, ReasoningMode>,
}

/// CLI/environment overrides that lock certain session mutations.
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    /// When set, `set(reasoning-effort=…)` and `set(thinking-budget=…)` fail.
    pub thinking_budget: Option<String>,
    /// When set, `set(backend=…)`, `set(model=…)` and `model(name=…)` fail.
    pub static_route: Option<String>,
}

impl CliOverrides {
    pub fn from_env() -> Self {
        Self {
            thinking_budget: env::var("THINKING_BUDGET").ok().filter(|v| !v.is_empty()),
            static_route: env::var("STATIC_ROUTE").ok().filter(|v| !v.is_empty()),
        }
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8000
}

fn default_command_prefix() -> String {
    "!/".to_string()
}

fn default_backend_name() -> String {
    "openai".to_string()
}

fn default_true() -> bool {
    true
}

fn default_capture_entries() -> usize {
    100
}

fn default_capture_flush_secs() -> f64 {
    1.0
}

fn default_cleanup_secs() -> u64 {
    60
}

impl AppConfig {
    /// Load from the configured TOML file, then apply env fallbacks and
    /// merge backend key pools from the environment.
    pub fn load() -> anyhow::Result<Self> {
        let mut config = match config_file_path() {
            Some(path) => {
                let contents = fs::read_to_string(&path)
                    .map_err(|err| anyhow::anyhow!("Failed to read config {}: {}", path, err))?;
                toml::from_str(&contents)
                    .map_err(|err| anyhow::anyhow!("Failed to parse config {}: {}", path, err))?
            }
            None => Self::defaults(),
        };

        config.apply_env_overrides();
        config.merge_env_api_keys(env::vars());
        Ok(config)
    }

    /// The configuration produced by an empty config file.
    pub fn defaults() -> Self {
        toml::from_str("").expect("empty config parses")
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(host) = env::var("SWITCHBOARD_HOST") {
            self.host = host;
        }
        if let Some(port) = env::var("SWITCHBOARD_PORT")
            .ok()
            .and_then(|value| value.parse::<u16>().ok())
        {
            self.port = port;
        }
        if let Ok(raw) = env::var("SWITCHBOARD_API_KEYS") {
            let keys: Vec<String> = raw
                .split(',')
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(str::to_string)
                .collect();
            if !keys.is_empty() {
                self.auth.api_keys = keys;
            }
        }
        if env::var("SWITCHBOARD_DISABLE_AUTH")
            .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
            .unwrap_or(false)
        {
            self.auth.disable_auth = true;
        }
        if let Ok(backend) = env::var("SWITCHBOARD_DEFAULT_BACKEND") {
            if !backend.is_empty() {
                self.default_backend = backend;
            }
        }
        if let Ok(path) = env::var("SWITCHBOARD_CAPTURE_FILE") {
            if !path.is_empty() {
                self.logging.capture_file = Some(path);
            }
        }
    }

    /// Merge `<BACKEND>_API_KEY` and numbered `<BACKEND>_API_KEY_<n>` env
    /// vars into the matching backend's key pool, creating the section when
    /// the backend is only configured through the environment.
    pub fn merge_env_api_keys(&mut self, vars: impl Iterator<Item = (String, String)>) {
        static BACKEND_KEY_RE: Lazy<Regex> =
            Lazy::new(|| Regex::new(r"^([A-Z][A-Z0-9]*)_API_KEY(?:_(\d+))?$").expect("static pattern"));

        let mut numbered: Vec<(String, u32, String)> = Vec::new();
        for (name, value) in vars {
            let value = value.trim().to_string();
            if value.is_empty() {
                continue;
            }
            if let Some(caps) = BACKEND_KEY_RE.captures(&name) {
                let backend = caps[1].to_lowercase();
                let index: u32 = caps
                    .get(2)
                    .and_then(|m| m.as_str().parse().ok())
                    .unwrap_or(0);
                numbered.push((backend, index, value));
            }
        }

        numbered.sort();
        for (backend, _, key) in numbered {
            let section = self.backends.entry(backend).or_default();
            if !section.api_keys.contains(&key) {
                section.api_keys.push(key);
            }
        }
    }

    /// Reasoning alias entries matching the given model id.
    pub fn reasoning_aliases_for(&self, model: &str) -> Option<&ModelReasoningAliases> {
        self.reasoning_aliases
            .iter()
            .find(|entry| crate::util::wildcard_match(&entry.model, model))
    }
}

fn config_file_path() -> Option<String> {
    if let Ok(path) = env::var("SWITCHBOARD_CONFIG") {
        if !path.is_empty() {
            return Some(path);
        }
    }
    if Path::new("switchboard.toml").exists() {
        return Some("switchboard.toml".to_string());
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_from_empty_toml() {
        let config: AppConfig = toml::from_str("").unwrap();
        assert_eq!(config.host, "127.0.0.1");
        assert_eq!(config.port, 8000);
        assert_eq!(config.command_prefix, "!/");
        assert_eq!(config.default_backend, "openai");
        assert!(config.redact_api_keys_in_prompts);
        assert!(!config.force_set_project);
        assert!(!config.auth.disable_auth);
    }

    #[test]
    fn test_parse_backends_and_aliases() {
        let config: AppConfig = toml::from_str(
            r#"
            default_backend = "gemini"
            force_set_project = true

            [auth]
            api_keys = ["client-key-1"]

            [backends.gemini]
            api_keys = ["g-key-a", "g-key-b"]
            base_url = "https://generativelanguage.googleapis.com/v1beta"

            [[reasoning_aliases]]
            model = "gemini-*"
            [reasoning_aliases.modes.high]
            temperature = 0.9
            thinking_budget = 32768
            [reasoning_aliases.modes.none]
            reasoning_effort = "none"
            "#,
        )
        .unwrap();

        assert_eq!(config.default_backend, "gemini");
        assert!(config.force_set_project);
        assert_eq!(config.backends["gemini"].api_keys.len(), 2);

        let aliases = config.reasoning_aliases_for("gemini-2.5-pro").unwrap();
        assert_eq!(aliases.modes["high"].thinking_budget, Some(32768));
        assert_eq!(
            aliases.modes["none"].reasoning_effort,
            Some(ReasoningEffort::None)
        );
        assert!(config.reasoning_aliases_for("gpt-4").is_none());
    }

    #[test]
    fn test_merge_env_api_keys() {
        let mut config: AppConfig = toml::from_str("").unwrap();
        config.merge_env_api_keys(
            vec![
                ("OPENAI_API_KEY".to_string(), "sk-one".to_string()),
                ("OPENAI_API_KEY_2".to_string(), "sk-two".to_string()),
                ("GEMINI_API_KEY".to_string(), "g-one".to_string()),
                ("NOT_A_KEY".to_string(), "ignored".to_string()),
            ]
            .into_iter(),
        );

        assert_eq!(config.backends["openai"].api_keys, vec!["sk-one", "sk-two"]);
        assert_eq!(config.backends["gemini"].api_keys, vec!["g-one"]);
        assert!(!config.backends.contains_key("not"));
    }

    #[test]
    fn test_merge_env_api_keys_deduplicates() {
        let mut config: AppConfig = toml::from_str(
            r#"
            [backends.openai]
            api_keys = ["sk-one"]
            "#,
        )
        .unwrap();
        config.merge_env_api_keys(
            vec![("OPENAI_API_KEY".to_string(), "sk-one".to_string())].into_iter(),
        );
        assert_eq!(config.backends["openai"].api_keys, vec!["sk-one"]);
    }
}
