mod api;
mod config;
mod directory;
mod discovery;
mod dispatcher;
mod error;
mod lan;
mod mdns;
mod scanner;
mod site;
mod sync;

use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use mdns_sd::ServiceDaemon;
use anyhow::{Context, Result};
use crate::config::Config;
use crate::directory::DirectoryCache;
use crate::discovery::DiscoveryService;
use crate::dispatcher::CommandDispatcher;
use crate::lan::{TcpOutletConnector, UdpBroadcastDiscovery};
use crate::scanner::BoundedScanner;
use crate::site::SiteStore;
use crate::sync::RemoteCollaborators;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("outlet_bridged=info,tower_http=info"))
        )
        .init();

    tracing::info!("Starting outlet-bridged");

    // Load config
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "/etc/outlet-bridge/bridged.toml".to_string());

    let config = Config::load_or_default(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path))?;

    // Site settings live apart from the daemon config because the API rewrites them
    let site = Arc::new(SiteStore::open(&config.site.config_path)?);
    let site_changes = site.subscribe();
    tracing::info!("Serving site {}", site.site_name().await);

    let cache = Arc::new(DirectoryCache::new());
    let scanner = BoundedScanner::new(Arc::new(UdpBroadcastDiscovery::new(
        config.scan.listen_window(),
    )));
    let discovery = Arc::new(DiscoveryService::new(scanner, cache, config.scan.timeout()));
    let dispatcher = Arc::new(CommandDispatcher::new(
        discovery.clone(),
        Arc::new(TcpOutletConnector::new(&config.device)),
    ));

    let http = reqwest::Client::builder()
        .timeout(Duration::from_secs(config.cloud.timeout_secs))
        .build()
        .context("Failed to build HTTP client")?;

    // Create cancellation token for graceful shutdown
    let cancel = CancellationToken::new();

    // Warm the directory cache without delaying the API
    let warmup_handle = if config.scan.startup_scan {
        let warmup_cancel = cancel.clone();
        let warmup_discovery = discovery.clone();
        Some(tokio::spawn(async move {
            tokio::select! {
                seen = warmup_discovery.warm_up() => {
                    tracing::info!("Startup scan cached {} device(s)", seen);
                }
                _ = warmup_cancel.cancelled() => {}
            }
        }))
    } else {
        None
    };

    // Build API router
    let app_state = api::routes::AppState {
        discovery,
        dispatcher,
        site,
        collaborators: Arc::new(RemoteCollaborators::new(http)),
    };
    let app = api::routes::router(app_state);

    // Bind HTTP server
    let listener = tokio::net::TcpListener::bind(&config.api.listen)
        .await
        .with_context(|| format!("Failed to bind to {}", config.api.listen))?;
    let api_port = listener.local_addr()?.port();

    tracing::info!("API listening on {}", config.api.listen);

    // Optional self-advertisement, kept in step with the site name
    let advertise_handle = if config.advertise.enabled {
        let daemon = ServiceDaemon::new().context("Failed to create mDNS daemon")?;
        Some(tokio::spawn(mdns::advertise::run_advertiser(
            daemon,
            config.advertise.instance.clone(),
            api_port,
            site_changes,
            cancel.clone(),
        )))
    } else {
        None
    };

    // Run server with graceful shutdown
    let server_cancel = cancel.clone();
    let server_handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app)
            .with_graceful_shutdown(async move { server_cancel.cancelled().await })
            .await
        {
            tracing::error!("Server error: {}", e);
        }
    });

    // Wait for shutdown signal
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")?;

    tracing::info!("Shutdown signal received");

    // Trigger cancellation
    cancel.cancel();

    let _ = server_handle.await;
    if let Some(handle) = warmup_handle {
        let _ = handle.await;
    }

    if let Some(handle) = advertise_handle {
        let _ = handle.await;
    }

    tracing::info!("Shutdown complete");
    Ok(())
}
