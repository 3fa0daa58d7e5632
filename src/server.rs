//! Router assembly and service lifecycle.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tracing::{debug, info, warn};

use crate::api::{self, AppState, SharedState};
use crate::config::Config;
use crate::deploy::Deployer;
use crate::health::Reconciler;
use crate::proxy::Proxy;
use crate::registry::Registry;
use crate::runtime::{ContainerRuntime, DockerRuntime};

/// Build the full application router: management API, webhook, health, and
/// the proxy fallback for app paths.
pub fn build_router(state: SharedState) -> Router {
    Router::new()
        .route("/", get(api::index))
        .route("/webhook", post(api::webhook))
        .route("/api/apps", get(api::list_apps))
        .route(
            "/api/apps/{*repo}",
            post(api::deploy_app).delete(api::stop_app),
        )
        .route("/health", get(api::health))
        .fallback(api::proxy_app)
        // The status front end is served from a different origin.
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Wire up the shared state for a given runtime.
pub fn build_state(config: &Config, runtime: Arc<dyn ContainerRuntime>) -> Result<SharedState> {
    let registry = Arc::new(Registry::new(config.state_file.clone()));
    let deployer = Arc::new(Deployer::new(config, registry.clone(), runtime.clone()));
    let reconciler = Arc::new(Reconciler::new(
        registry.clone(),
        runtime,
        config.port_range(),
    ));
    let proxy = Proxy::new(config.backend_host.clone(), config.proxy_timeout_secs)?;
    Ok(Arc::new(AppState {
        registry,
        deployer,
        reconciler,
        proxy,
    }))
}

/// Start the service: seed the registry from the snapshot, reacquire
/// container handles, and serve until ctrl-c.
pub async fn start_server(config: Config) -> Result<()> {
    config.validate()?;

    let runtime: Arc<dyn ContainerRuntime> = Arc::new(
        DockerRuntime::connect().context("failed to connect to the container runtime")?,
    );
    let state = build_state(&config, runtime)?;

    match state.registry.load().await {
        Ok(0) => {}
        Ok(n) => info!("loaded {} apps from {}", n, config.state_file.display()),
        // A bad snapshot should not keep the service down; deploys rebuild it.
        Err(e) => warn!("failed to load state: {:#}", e),
    }

    // Records seeded from disk carry no container handle; one reconcile
    // pass reattaches handles for containers that survived the restart.
    let summary = state.reconciler.reconcile().await;
    info!(
        total = summary.total_apps,
        healthy = summary.healthy_apps,
        "startup reconcile complete"
    );

    spawn_reconcile_loop(state.clone(), config.reconcile_interval_secs);

    let app = build_router(state);
    let addr = format!("0.0.0.0:{}", config.listen_port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind to {}", addr))?;
    info!("gradio-pages listening on http://{}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    info!("server shut down gracefully");
    Ok(())
}

fn spawn_reconcile_loop(state: SharedState, interval_secs: u64) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(interval_secs));
        // The immediate first tick duplicates the startup pass.
        interval.tick().await;
        loop {
            interval.tick().await;
            let summary = state.reconciler.reconcile().await;
            debug!(
                total = summary.total_apps,
                healthy = summary.healthy_apps,
                "reconcile pass"
            );
        }
    });
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("failed to install ctrl-c handler: {}", e);
        return;
    }
    info!("shutting down");
}
