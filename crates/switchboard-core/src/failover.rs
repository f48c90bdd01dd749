//! Failover routes and attempt planning
//!
//! A failover route is a named, ordered list of `backend:model` elements
//! with a rotation policy. The planner expands a route into the concrete
//! attempt sequence; the pipeline walks that sequence, advancing on
//! retryable errors only.

use serde::{Deserialize, Serialize};

use crate::error::ProxyError;

/// Rotation policy for a failover route.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum FailoverPolicy {
    /// `k`: exhaust all API keys for the current element's backend before
    /// moving to the next element.
    #[serde(rename = "k")]
    KeyRotation,
    /// `m`: walk the elements in order, one attempt each.
    #[serde(rename = "m")]
    ModelFirst,
    /// `km`: keys inner, elements outer (same walk as `k`).
    #[serde(rename = "km")]
    KeyThenModel,
    /// `mk`: elements inner, keys outer.
    #[serde(rename = "mk")]
    ModelThenKey,
}

impl FailoverPolicy {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "k" => Some(Self::KeyRotation),
            "m" => Some(Self::ModelFirst),
            "km" => Some(Self::KeyThenModel),
            "mk" => Some(Self::ModelThenKey),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::KeyRotation => "k",
            Self::ModelFirst => "m",
            Self::KeyThenModel => "km",
            Self::ModelThenKey => "mk",
        }
    }
}

/// Named, ordered failover route.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FailoverRoute {
    pub policy: FailoverPolicy,
    pub elements: Vec<String>,
}

/// One concrete dispatch attempt produced by the planner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailoverAttempt {
    pub backend: String,
    pub model: String,
    /// Explicit key slot for key-rotating policies; `None` lets the backend
    /// service pick the next key round-robin.
    pub key_index: Option<usize>,
}

impl FailoverAttempt {
    fn new(backend: &str, model: &str, key_index: Option<usize>) -> Self {
        Self {
            backend: backend.to_string(),
            model: model.to_string(),
            key_index,
        }
    }
}

/// Splits a `backend:model` element. Returns `None` for malformed elements.
pub fn parse_route_element(element: &str) -> Option<(&str, &str)> {
    let (backend, model) = element.split_once(':')?;
    if backend.is_empty() || model.is_empty() {
        return None;
    }
    Some((backend, model))
}

/// Expands routes into ordered attempt sequences.
pub struct FailoverPlanner;

impl FailoverPlanner {
    /// Plan the attempts for a route. `key_count` reports the pool size for
    /// a backend name; backends with no keys still get one attempt.
    pub fn plan(route: &FailoverRoute, key_count: impl Fn(&str) -> usize) -> Vec<FailoverAttempt> {
        let elements: Vec<(&str, &str)> = route
            .elements
            .iter()
            .filter_map(|element| parse_route_element(element))
            .collect();

        match route.policy {
            FailoverPolicy::ModelFirst => elements
                .iter()
                .map(|(backend, model)| FailoverAttempt::new(backend, model, None))
                .collect(),
            FailoverPolicy::KeyRotation | FailoverPolicy::KeyThenModel => {
                let mut attempts = Vec::new();
                for (backend, model) in &elements {
                    let keys = key_count(backend).max(1);
                    for key_index in 0..keys {
                        attempts.push(FailoverAttempt::new(backend, model, Some(key_index)));
                    }
                }
                attempts
            }
            FailoverPolicy::ModelThenKey => {
                let max_keys = elements
                    .iter()
                    .map(|(backend, _)| key_count(backend).max(1))
                    .max()
                    .unwrap_or(1);
                let mut attempts = Vec::new();
                for key_index in 0..max_keys {
                    for (backend, model) in &elements {
                        if key_index < key_count(backend).max(1) {
                            attempts.push(FailoverAttempt::new(backend, model, Some(key_index)));
                        }
                    }
                }
                attempts
            }
        }
    }

    /// Whether a failed attempt may be retried on the next element.
    pub fn should_retry(error: &ProxyError) -> bool {
        error.is_retryable()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn route(policy: FailoverPolicy, elements: &[&str]) -> FailoverRoute {
        FailoverRoute {
            policy,
            elements: elements.iter().map(|e| e.to_string()).collect(),
        }
    }

    fn key_counts(backend: &str) -> usize {
        match backend {
            "openai" => 2,
            "gemini" => 3,
            _ => 0,
        }
    }

    #[test]
    fn test_policy_parse() {
        assert_eq!(FailoverPolicy::parse("k"), Some(FailoverPolicy::KeyRotation));
        assert_eq!(FailoverPolicy::parse("M"), Some(FailoverPolicy::ModelFirst));
        assert_eq!(FailoverPolicy::parse("km"), Some(FailoverPolicy::KeyThenModel));
        assert_eq!(FailoverPolicy::parse("mk"), Some(FailoverPolicy::ModelThenKey));
        assert_eq!(FailoverPolicy::parse("x"), None);
    }

    #[test]
    fn test_parse_route_element() {
        assert_eq!(parse_route_element("openai:gpt-4"), Some(("openai", "gpt-4")));
        assert_eq!(
            parse_route_element("openrouter:vendor/model:free"),
            Some(("openrouter", "vendor/model:free"))
        );
        assert_eq!(parse_route_element("missing-colon"), None);
        assert_eq!(parse_route_element(":model"), None);
    }

    #[test]
    fn test_model_first_plan() {
        let plan = FailoverPlanner::plan(
            &route(FailoverPolicy::ModelFirst, &["openai:gpt-4", "gemini:gemini-pro"]),
            key_counts,
        );
        assert_eq!(plan.len(), 2);
        assert_eq!(plan[0], FailoverAttempt::new("openai", "gpt-4", None));
        assert_eq!(plan[1], FailoverAttempt::new("gemini", "gemini-pro", None));
    }

    #[test]
    fn test_key_rotation_exhausts_keys_per_element() {
        let plan = FailoverPlanner::plan(
            &route(FailoverPolicy::KeyRotation, &["openai:gpt-4", "gemini:gemini-pro"]),
            key_counts,
        );
        assert_eq!(plan.len(), 2 + 3);
        assert_eq!(plan[0].key_index, Some(0));
        assert_eq!(plan[1].key_index, Some(1));
        assert_eq!(plan[1].backend, "openai");
        assert_eq!(plan[2].backend, "gemini");
    }

    #[test]
    fn test_model_then_key_interleaves() {
        let plan = FailoverPlanner::plan(
            &route(FailoverPolicy::ModelThenKey, &["openai:gpt-4", "gemini:gemini-pro"]),
            key_counts,
        );
        // First pass over both elements with key 0, then key 1, then gemini only.
        assert_eq!(
            plan.iter()
                .map(|a| (a.backend.as_str(), a.key_index))
                .collect::<Vec<_>>(),
            vec![
                ("openai", Some(0)),
                ("gemini", Some(0)),
                ("openai", Some(1)),
                ("gemini", Some(1)),
                ("gemini", Some(2)),
            ]
        );
    }

    #[test]
    fn test_backend_without_keys_still_attempted() {
        let plan = FailoverPlanner::plan(
            &route(FailoverPolicy::KeyRotation, &["local:llama"]),
            key_counts,
        );
        assert_eq!(plan.len(), 1);
        assert_eq!(plan[0].key_index, Some(0));
    }

    #[test]
    fn test_malformed_elements_skipped() {
        let plan = FailoverPlanner::plan(
            &route(FailoverPolicy::ModelFirst, &["openai:gpt-4", "nocolon"]),
            key_counts,
        );
        assert_eq!(plan.len(), 1);
    }
}
