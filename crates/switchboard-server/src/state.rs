//! Shared application state

use std::sync::Arc;

use switchboard_backends::registry::{BackendService, ConnectorRegistry};
use switchboard_core::capture::{BufferedWireCapture, NoopWireCapture, WireCapture};
use switchboard_core::commands::CommandService;
use switchboard_core::config::{AppConfig, CliOverrides};
use switchboard_core::middleware::RequestMiddleware;
use switchboard_core::redaction::{ApiKeyRedactor, ProxyCommandFilter, SecretRegistry};
use switchboard_core::response::ResponseManager;
use switchboard_core::session::store::InMemorySessionStore;
use switchboard_core::CommandRegistry;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub sessions: Arc<InMemorySessionStore>,
    pub backends: Arc<BackendService>,
    pub commands: Arc<CommandService>,
    pub redactor: Arc<ApiKeyRedactor>,
    pub command_filter: Arc<ProxyCommandFilter>,
    pub capture: Arc<dyn WireCapture>,
    pub responses: Arc<ResponseManager>,
    pub middleware: Arc<RequestMiddleware>,
}

impl AppState {
    /// Full production build: discover secrets, open the capture sink,
    /// instantiate and initialize every configured backend.
    pub async fn build(config: AppConfig) -> anyhow::Result<Self> {
        let secrets = SecretRegistry::discover(&config);
        let redactor = Arc::new(ApiKeyRedactor::from_registry(&secrets));

        let capture: Arc<dyn WireCapture> = match &config.logging.capture_file {
            Some(path) => Arc::new(BufferedWireCapture::new(
                path,
                redactor.clone(),
                &config.logging,
            )?),
            None => Arc::new(NoopWireCapture),
        };

        let registry = ConnectorRegistry::standard();
        let backends = Arc::new(
            BackendService::from_config(
                &config,
                &registry,
                switchboard_backends::http_client::shared_client(),
            )
            .await,
        );

        Ok(Self::assemble(config, backends, redactor, capture))
    }

    /// Wire the services around an existing backend service. Used by
    /// `build` and by tests that inject mock connectors.
    pub fn assemble(
        config: AppConfig,
        backends: Arc<BackendService>,
        redactor: Arc<ApiKeyRedactor>,
        capture: Arc<dyn WireCapture>,
    ) -> Self {
        let sessions = Arc::new(InMemorySessionStore::new());
        let commands = Arc::new(
            CommandService::new(
                sessions.clone(),
                Arc::new(CommandRegistry::standard()),
                &config.command_prefix,
                CliOverrides::from_env(),
            )
            .with_reasoning_aliases(config.reasoning_aliases.clone())
            .with_functional_backends(backends.functional_backends()),
        );
        let command_filter = Arc::new(ProxyCommandFilter::new(&config.command_prefix));

        Self {
            config: Arc::new(config),
            sessions,
            backends,
            commands,
            redactor,
            command_filter,
            capture,
            responses: Arc::new(ResponseManager::new()),
            middleware: Arc::new(RequestMiddleware::standard()),
        }
    }
}
