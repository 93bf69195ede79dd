//! Relay Fleet daemon.
//!
//! Wires the registry, provisioner, DNS manager, health monitor and alert
//! dispatcher together, starts the background loops and serves liveness and
//! readiness endpoints until Ctrl-C.

use std::sync::Arc;

use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Json, Router};
use relay_fleet_control::{
    run_role_resync, DirectoryConfigTarget, FleetConfig, FleetControl, JsonFileRoleSource,
    NodeOrchestrator,
};
use relay_fleet_dns::{CloudflareClient, DnsRecordManager};
use relay_fleet_monitor::{
    notify, AlertSink, HealthMonitor, HttpMetricsSource, TelegramSink, WebhookSink,
};
use relay_fleet_provision::{OpenSshTransport, Provisioner, TcpProbe};
use relay_fleet_store::RocksRegistry;
use serde::Serialize;
use tokio::sync::watch;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Application state shared across handlers.
#[derive(Clone)]
struct AppState {
    fleet: Arc<NodeOrchestrator<RocksRegistry>>,
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    service: &'static str,
}

#[derive(Serialize)]
struct ReadyResponse {
    nodes: usize,
    pending_confirmations: usize,
}

async fn health_handler() -> impl IntoResponse {
    Json(HealthResponse {
        status: "healthy",
        service: "relay-fleet",
    })
}

async fn ready_handler(State(state): State<AppState>) -> impl IntoResponse {
    match state.fleet.list_nodes().await {
        Ok(nodes) => (
            StatusCode::OK,
            Json(ReadyResponse {
                nodes: nodes.len(),
                pending_confirmations: state.fleet.pending_confirmations(),
            }),
        )
            .into_response(),
        Err(e) => {
            tracing::warn!(error = %e, "Readiness check failed");
            (StatusCode::SERVICE_UNAVAILABLE, e.to_string()).into_response()
        }
    }
}

fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/ready", get(ready_handler))
        .with_state(state)
}

fn build_sinks(config: &FleetConfig) -> Result<Vec<Arc<dyn AlertSink>>, Box<dyn std::error::Error>> {
    let mut sinks: Vec<Arc<dyn AlertSink>> = Vec::new();
    if let Some(url) = &config.webhook_url {
        sinks.push(Arc::new(WebhookSink::new(url.clone(), config.notify_timeout)?));
    }
    if let Some(telegram) = &config.telegram {
        sinks.push(Arc::new(TelegramSink::new(
            telegram.clone(),
            config.notify_timeout,
        )?));
    }
    if sinks.is_empty() {
        tracing::warn!("No alert sinks configured, alerts will only be logged");
    }
    Ok(sinks)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,relay_fleet=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Relay Fleet");

    let config = FleetConfig::from_env();

    let registry = Arc::new(RocksRegistry::open(&config.data_dir)?);
    tracing::info!(data_dir = %config.data_dir.display(), "Initialized RocksDB registry");

    let provisioner = Arc::new(Provisioner::new(
        Arc::new(TcpProbe::new(config.probe_timeout)),
        Arc::new(OpenSshTransport::new(config.ssh.clone())),
        config.provision.clone(),
    ));

    let dns = if config.dns.api_token.is_some() {
        let client = CloudflareClient::new(config.dns.clone())?;
        Some(Arc::new(DnsRecordManager::new(
            Arc::new(client),
            config.dns_manager.clone(),
        )))
    } else {
        tracing::warn!("CLOUDFLARE_API_TOKEN not set, DNS-bound roles will be rejected");
        None
    };

    let (queue, dispatcher) = notify::channel(build_sinks(&config)?, config.notify.clone());
    let monitor = Arc::new(HealthMonitor::new(
        Arc::clone(&registry),
        Arc::new(HttpMetricsSource::new(config.metrics.clone())?),
        queue,
        config.monitor.clone(),
    ));

    let fleet = Arc::new(NodeOrchestrator::new(
        Arc::clone(&registry),
        provisioner,
        dns.clone(),
        Arc::clone(&monitor),
        Arc::new(DirectoryConfigTarget::new(
            config.control.proxy_config_dir.clone(),
        )),
        config.control.clone(),
    ));

    // Background loops
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut tasks = vec![
        tokio::spawn(Arc::clone(&monitor).run(shutdown_rx.clone())),
        tokio::spawn(dispatcher.run(shutdown_rx.clone())),
    ];
    if let Some(dns) = dns {
        tasks.push(tokio::spawn(dns.run_sweeper(shutdown_rx.clone())));
    }
    if let Some(path) = &config.control.roles_file {
        tasks.push(tokio::spawn(run_role_resync(
            Arc::clone(&registry),
            Arc::new(JsonFileRoleSource::new(path.clone())),
            config.control.role_resync_interval,
            shutdown_rx.clone(),
        )));
    }

    let app = create_router(AppState {
        fleet: Arc::clone(&fleet),
    });

    tracing::info!(listen_addr = %config.listen_addr, "Starting HTTP server");
    let listener = tokio::net::TcpListener::bind(&config.listen_addr).await?;
    let mut server_shutdown = shutdown_rx.clone();
    let server = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = server_shutdown.wait_for(|stop| *stop).await;
            })
            .await
    });

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutdown requested");

    let _ = shutdown_tx.send(true);
    fleet.shutdown().await;
    for task in tasks {
        if let Err(e) = task.await {
            tracing::error!(error = %e, "Background task panicked");
        }
    }
    server.await??;

    tracing::info!("Relay Fleet stopped");
    Ok(())
}
