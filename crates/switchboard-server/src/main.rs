#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

use std::time::Duration;

use axum::http::{header, Method};
use tower_http::cors::CorsLayer;

use switchboard_core::config::AppConfig;
use switchboard_core::session::store::spawn_ttl_sweeper;

use switchboard_server::routes;
use switchboard_server::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,switchboard_server=debug".into()),
        )
        .with_target(false)
        .init();

    tracing::info!("Starting Switchboard proxy");

    let config = AppConfig::load()?;
    let addr = format!("{}:{}", config.host, config.port);
    let session_config = config.session.clone();

    let state = AppState::build(config).await?;

    for (name, models) in state.backends.functional_backends() {
        tracing::info!(backend = %name, models, "Functional backend");
    }

    let _sweeper = spawn_ttl_sweeper(
        state.sessions.clone(),
        Duration::from_secs(session_config.ttl_secs),
        Duration::from_secs(session_config.cleanup_interval_secs.max(1)),
    );

    let cors = CorsLayer::new()
        .allow_origin(tower_http::cors::Any)
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION]);

    let app = routes::router(state.clone()).layer(cors);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|err| anyhow::anyhow!("Failed to bind to {}: {}", addr, err))?;
    tracing::info!("Switchboard listening on http://{}", addr);

    let shutdown_state = state.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|err| anyhow::anyhow!("Server error: {}", err))?;

    // Best-effort final flush and child-process teardown.
    shutdown_state.capture.shutdown().await;
    shutdown_state.backends.shutdown().await;
    tracing::info!("Switchboard stopped");

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(_) => std::future::pending().await,
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
