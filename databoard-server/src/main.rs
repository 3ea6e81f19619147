//! Databoard Server
//!
//! Channel search and curve data from the archiver, plus capacity-bounded
//! storage for user dashboards.

mod api;
mod config;
mod daqbuf;
mod error;
mod lifecycle;
mod models;
mod storage;

use std::sync::Arc;

use clap::Parser;
use databoard::catalog::ChannelCatalog;
use databoard::dashboard::DashboardService;
use databoard::dashboard::validation::DashboardValidator;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::Config;
use crate::daqbuf::DaqbufGateway;

/// Application state shared across handlers
pub struct AppState {
    pub catalog: Arc<ChannelCatalog>,
    pub dashboards: DashboardService,
    pub config: Config,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "databoard=debug,databoard_server=debug,tower_http=debug".into()
            }),
        )
        .init();

    // Parse CLI args
    let config = Config::parse();
    config.check()?;
    info!("Starting databoard-server on {}:{}", config.host, config.port);

    // Dashboard storage
    let store = storage::open(&config.store).await?;
    let schema = lifecycle::dashboard_schema(config.schema_source.as_deref()).await?;
    let validator = DashboardValidator::new(schema.as_ref(), config.validation())?;
    let dashboards = DashboardService::new(store, validator, config.storage_policy());

    // Channel catalog backed by the archiver
    info!("Archiver at {}", config.archiver_url);
    let gateway = Arc::new(DaqbufGateway::new(config.archiver_url.clone()));
    let catalog = Arc::new(ChannelCatalog::new(gateway));

    // Build app state
    let state = Arc::new(AppState {
        catalog,
        dashboards,
        config: config.clone(),
    });

    // Start the periodic catalog resync
    let synchronizer = lifecycle::start_synchronizer(&state);

    // Build router
    let app = api::app(Arc::clone(&state));

    // Start server
    let addr = format!("{}:{}", config.host, config.port);

    if let (Some(cert_path), Some(key_path)) = (&config.tls_cert, &config.tls_key) {
        // TLS enabled
        info!("TLS enabled with cert: {}", cert_path);
        let tls_config = config::load_tls_config(cert_path, key_path)?;
        let listener = tokio::net::TcpListener::bind(&addr).await?;

        let handle = axum_server::Handle::new();
        let shutdown_handle = handle.clone();
        let grace = config.shutdown_grace();
        tokio::spawn(async move {
            shutdown_signal().await;
            shutdown_handle.graceful_shutdown(Some(grace));
        });

        axum_server::from_tcp_rustls(listener.into_std()?, tls_config)
            .handle(handle)
            .serve(app.into_make_service())
            .await?;
    } else {
        // Plain HTTP
        let listener = tokio::net::TcpListener::bind(&addr).await?;
        info!("Listening on http://{}", addr);
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await?;
    }

    lifecycle::shutdown(synchronizer, config.shutdown_grace()).await;
    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
