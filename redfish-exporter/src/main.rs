/**
 * REDFISH EXPORTER - Point d'entrée du service
 *
 * RÔLE : Câblage config, client Redfish, boucle de collecte et serveur HTTP.
 * Seules les erreurs de configuration sont fatales ; les pannes du BMC ne le
 * sont pas (la boucle réessaie et /metrics sert les dernières données valides).
 */

use anyhow::{Context, Result};
use redfish_exporter::cache::CollectionCache;
use redfish_exporter::config::{load_config, ExporterConfig};
use redfish_exporter::health::HealthTracker;
use redfish_exporter::http::{build_router, AppState};
use redfish_exporter::redfish::RedfishClient;
use redfish_exporter::scheduler::{spawn_scheduler, Collector};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

fn init_tracing(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("shutdown requested");
}

async fn run(cfg: ExporterConfig) -> Result<()> {
    let credentials = cfg
        .credentials(|key| std::env::var(key).ok())
        .context("BMC credentials")?;
    info!(bmc = %cfg.base_url(), user = %credentials.username, auth = ?cfg.bmc.auth, "starting redfish exporter");

    let health = HealthTracker::new();
    let client = Arc::new(
        RedfishClient::new(&cfg, credentials)
            .context("failed to build Redfish client")?
            .with_health(health.clone()),
    );

    // scrapes report stale once three cycles in a row went missing
    let cache = Arc::new(CollectionCache::new().with_stale_after(cfg.collect_interval() * 3));
    let collector = Arc::new(Collector::new(&cfg, client.clone(), health.clone()));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let scheduler = spawn_scheduler(collector, cache.clone(), cfg.collect_interval(), shutdown_rx);

    let app = build_router(AppState { cache, health });
    let addr: SocketAddr = format!("{}:{}", cfg.listen.address, cfg.listen.port)
        .parse()
        .with_context(|| format!("invalid listen address {}:{}", cfg.listen.address, cfg.listen.port))?;
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!("listening on http://{addr}/metrics");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server failed")?;

    let _ = shutdown_tx.send(true);
    if let Err(e) = scheduler.await {
        error!("collection loop ended abnormally: {}", e);
    }
    client.logout().await;
    info!("bye");
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    // .env is optional
    dotenvy::dotenv().ok();

    let cfg = match load_config().await {
        Ok(cfg) => cfg,
        Err(e) => {
            init_tracing("info");
            error!("invalid configuration: {}", e);
            return Err(e).context("failed to load configuration");
        }
    };
    init_tracing(&cfg.log_level);

    run(cfg).await
}
