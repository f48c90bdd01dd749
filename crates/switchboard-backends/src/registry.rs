//! Connector registry, backend service and key pools
//!
//! The registry maps connector type names to factories; the backend
//! service owns the instantiated connectors, their cached model lists and
//! the per-backend API key pools with round-robin rotation.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use reqwest::Client;
use tracing::{info, warn};

use switchboard_core::config::{AppConfig, BackendSection};
use switchboard_core::{ProxyError, Result};

use crate::anthropic::AnthropicConnector;
use crate::connector::BackendConnector;
use crate::gemini::GeminiConnector;
use crate::gemini_cli_batch::GeminiCliBatchConnector;
use crate::gemini_cli_interactive::GeminiCliInteractiveConnector;
use crate::gemini_oauth::GeminiOauthConnector;
use crate::openai::OpenAiConnector;

pub type ConnectorFactory =
    Arc<dyn Fn(&str, &BackendSection, Client) -> Arc<dyn BackendConnector> + Send + Sync>;

/// Maps connector type names to factories.
pub struct ConnectorRegistry {
    factories: BTreeMap<String, ConnectorFactory>,
}

impl ConnectorRegistry {
    pub fn empty() -> Self {
        Self {
            factories: BTreeMap::new(),
        }
    }

    /// Registry with every built-in connector type.
    pub fn standard() -> Self {
        let mut registry = Self::empty();

        registry.register("openai", |name, section, client| {
            let mut connector = OpenAiConnector::new(name, client)
                .with_discovery_key(section.api_keys.first().cloned())
                .with_static_models(section.models.clone());
            if let Some(base_url) = &section.base_url {
                connector = connector.with_base_url(base_url);
            }
            Arc::new(connector)
        });

        registry.register("gemini", |name, section, client| {
            let mut connector = GeminiConnector::new(name, client)
                .with_discovery_key(section.api_keys.first().cloned())
                .with_static_models(section.models.clone());
            if let Some(base_url) = &section.base_url {
                connector = connector.with_base_url(base_url);
            }
            Arc::new(connector)
        });

        registry.register("anthropic", |name, section, client| {
            let mut connector = AnthropicConnector::new(name, client)
                .with_discovery_key(section.api_keys.first().cloned())
                .with_static_models(section.models.clone());
            if let Some(base_url) = &section.base_url {
                connector = connector.with_base_url(base_url);
            }
            Arc::new(connector)
        });

        registry.register("gemini-cli-batch", |name, section, _client| {
            Arc::new(
                GeminiCliBatchConnector::new(name)
                    .with_google_cloud_project(section.google_cloud_project.clone()),
            )
        });

        registry.register("gemini-cli-interactive", |name, section, _client| {
            Arc::new(
                GeminiCliInteractiveConnector::new(name)
                    .with_google_cloud_project(section.google_cloud_project.clone()),
            )
        });

        registry.register("gemini-oauth", |name, section, client| {
            let mut connector = GeminiOauthConnector::new(name, client);
            if let Some(base_url) = &section.base_url {
                connector = connector.with_base_url(base_url);
            }
            Arc::new(connector)
        });

        registry
    }

    pub fn register<F>(&mut self, name: &str, factory: F)
    where
        F: Fn(&str, &BackendSection, Client) -> Arc<dyn BackendConnector> + Send + Sync + 'static,
    {
        self.factories.insert(name.to_string(), Arc::new(factory));
    }

    pub fn create(
        &self,
        connector_type: &str,
        backend_name: &str,
        section: &BackendSection,
        client: Client,
    ) -> Option<Arc<dyn BackendConnector>> {
        self.factories
            .get(connector_type)
            .map(|factory| factory(backend_name, section, client))
    }

    pub fn known_types(&self) -> Vec<String> {
        self.factories.keys().cloned().collect()
    }
}

/// Ordered API key pool with round-robin rotation.
pub struct KeyPool {
    backend: String,
    keys: Vec<String>,
    cursor: AtomicUsize,
}

impl KeyPool {
    pub fn new(backend: impl Into<String>, keys: Vec<String>) -> Self {
        Self {
            backend: backend.into(),
            keys,
            cursor: AtomicUsize::new(0),
        }
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Next key round-robin as `(key_name, key)`.
    pub fn next(&self) -> Option<(String, String)> {
        if self.keys.is_empty() {
            return None;
        }
        let index = self.cursor.fetch_add(1, Ordering::Relaxed) % self.keys.len();
        Some((self.key_name(index), self.keys[index].clone()))
    }

    /// Key at an explicit slot, for key-rotating failover policies.
    pub fn at(&self, index: usize) -> Option<(String, String)> {
        self.keys
            .get(index)
            .map(|key| (self.key_name(index), key.clone()))
    }

    fn key_name(&self, index: usize) -> String {
        format!("{}-{}", self.backend, index + 1)
    }
}

/// Owns the connectors and key pools; validates dispatch targets.
pub struct BackendService {
    connectors: BTreeMap<String, Arc<dyn BackendConnector>>,
    key_pools: BTreeMap<String, KeyPool>,
    default_backend: String,
}

impl BackendService {
    /// Instantiate and initialize every configured backend.
    ///
    /// Initialization failures leave the backend non-functional but do not
    /// abort startup.
    pub async fn from_config(
        config: &AppConfig,
        registry: &ConnectorRegistry,
        client: Client,
    ) -> Self {
        let mut service = Self {
            connectors: BTreeMap::new(),
            key_pools: BTreeMap::new(),
            default_backend: config.default_backend.clone(),
        };

        for (name, section) in &config.backends {
            let connector_type = section.connector.as_deref().unwrap_or(name.as_str());
            match registry.create(connector_type, name, section, client.clone()) {
                Some(connector) => {
                    service.add_backend(connector, section.api_keys.clone());
                }
                None => warn!(
                    backend = %name,
                    connector_type,
                    "Unknown connector type, backend skipped"
                ),
            }
        }

        for (name, connector) in &service.connectors {
            match connector.initialize().await {
                Ok(()) => info!(
                    backend = %name,
                    functional = connector.is_functional(),
                    models = connector.available_models().len(),
                    "Backend initialized"
                ),
                Err(err) => warn!(backend = %name, error = %err, "Backend initialization failed"),
            }
        }

        service
    }

    /// Register a backend directly (tests, programmatic setup).
    pub fn add_backend(&mut self, connector: Arc<dyn BackendConnector>, keys: Vec<String>) {
        let name = connector.name().to_string();
        self.key_pools.insert(name.clone(), KeyPool::new(&name, keys));
        self.connectors.insert(name, connector);
    }

    pub fn default_backend(&self) -> &str {
        &self.default_backend
    }

    pub fn set_default_backend(&mut self, backend: impl Into<String>) {
        self.default_backend = backend.into();
    }

    pub fn connector(&self, name: &str) -> Result<Arc<dyn BackendConnector>> {
        self.connectors
            .get(name)
            .cloned()
            .ok_or_else(|| ProxyError::Configuration(format!("Backend '{name}' not found")))
    }

    /// Validate a `(backend, model)` dispatch target against the cached
    /// model lists.
    pub fn validate_backend_and_model(&self, backend: &str, model: &str) -> Result<()> {
        let connector = self
            .connectors
            .get(backend)
            .ok_or_else(|| ProxyError::InvalidRequest(format!("Backend '{backend}' not found")))?;
        if !connector.is_functional() {
            return Err(ProxyError::InvalidRequest(format!(
                "Backend '{backend}' is not functional"
            )));
        }
        if !connector.available_models().iter().any(|m| m == model) {
            return Err(ProxyError::InvalidRequest(format!(
                "Model '{model}' is not available for backend '{backend}'"
            )));
        }
        Ok(())
    }

    /// Strip a `backend:` prefix from a request model field when the
    /// prefix names a known backend.
    pub fn split_model_prefix(&self, model: &str) -> (Option<String>, String) {
        if let Some((prefix, rest)) = model.split_once(':') {
            if self.connectors.contains_key(prefix) && !rest.is_empty() {
                return (Some(prefix.to_string()), rest.to_string());
            }
        }
        (None, model.to_string())
    }

    pub fn next_key(&self, backend: &str) -> Option<(String, String)> {
        self.key_pools.get(backend).and_then(KeyPool::next)
    }

    pub fn key_at(&self, backend: &str, index: usize) -> Option<(String, String)> {
        self.key_pools.get(backend).and_then(|pool| pool.at(index))
    }

    pub fn key_count(&self, backend: &str) -> usize {
        self.key_pools.get(backend).map(KeyPool::len).unwrap_or(0)
    }

    /// `(name, model count)` for every functional backend.
    pub fn functional_backends(&self) -> Vec<(String, usize)> {
        self.connectors
            .iter()
            .filter(|(_, connector)| connector.is_functional())
            .map(|(name, connector)| (name.clone(), connector.available_models().len()))
            .collect()
    }

    /// Union of models across functional backends, for the models routes.
    pub fn all_models(&self) -> Vec<String> {
        let mut models: Vec<String> = self
            .connectors
            .values()
            .filter(|connector| connector.is_functional())
            .flat_map(|connector| connector.available_models())
            .collect();
        models.sort();
        models.dedup();
        models
    }

    pub async fn shutdown(&self) {
        for connector in self.connectors.values() {
            connector.shutdown().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockConnector;

    async fn service_with_mock() -> BackendService {
        let mut service = BackendService {
            connectors: BTreeMap::new(),
            key_pools: BTreeMap::new(),
            default_backend: "mock".to_string(),
        };
        let connector = Arc::new(MockConnector::new(
            "mock",
            vec!["model-a".to_string(), "model-b".to_string()],
        ));
        connector.initialize().await.unwrap();
        service.add_backend(connector, vec!["key-1".to_string(), "key-2".to_string()]);
        service
    }

    #[tokio::test]
    async fn test_validate_backend_and_model() {
        let service = service_with_mock().await;
        assert!(service.validate_backend_and_model("mock", "model-a").is_ok());

        let err = service
            .validate_backend_and_model("mock", "model-z")
            .unwrap_err();
        assert!(matches!(err, ProxyError::InvalidRequest(_)));
        assert!(err.to_string().contains("model-z"));

        let err = service
            .validate_backend_and_model("ghost", "model-a")
            .unwrap_err();
        assert!(err.to_string().contains("Backend 'ghost' not found"));
    }

    #[tokio::test]
    async fn test_key_rotation_round_robin() {
        let service = service_with_mock().await;
        let (name1, key1) = service.next_key("mock").unwrap();
        let (name2, key2) = service.next_key("mock").unwrap();
        let (name3, _) = service.next_key("mock").unwrap();
        assert_eq!((name1.as_str(), key1.as_str()), ("mock-1", "key-1"));
        assert_eq!((name2.as_str(), key2.as_str()), ("mock-2", "key-2"));
        assert_eq!(name3, "mock-1");
    }

    #[tokio::test]
    async fn test_key_at_explicit_slot() {
        let service = service_with_mock().await;
        let (name, key) = service.key_at("mock", 1).unwrap();
        assert_eq!(name, "mock-2");
        assert_eq!(key, "key-2");
        assert!(service.key_at("mock", 9).is_none());
    }

    #[tokio::test]
    async fn test_split_model_prefix() {
        let service = service_with_mock().await;
        assert_eq!(
            service.split_model_prefix("mock:model-a"),
            (Some("mock".to_string()), "model-a".to_string())
        );
        assert_eq!(
            service.split_model_prefix("unknown:model"),
            (None, "unknown:model".to_string())
        );
        assert_eq!(
            service.split_model_prefix("model-a"),
            (None, "model-a".to_string())
        );
    }

    #[tokio::test]
    async fn test_functional_backends_listing() {
        let service = service_with_mock().await;
        let backends = service.functional_backends();
        assert_eq!(backends, vec![("mock".to_string(), 2)]);
        assert_eq!(service.all_models(), vec!["model-a", "model-b"]);
    }

    #[tokio::test]
    async fn test_from_config_skips_unknown_connector_type() {
        let config: AppConfig = toml::from_str(
            r#"
            [backends.custom]
            connector = "does-not-exist"
            "#,
        )
        .unwrap();
        let registry = ConnectorRegistry::standard();
        let service = BackendService::from_config(&config, &registry, Client::new()).await;
        assert!(service.connector("custom").is_err());
    }
}
