// Main entry point for the gateway server

use std::sync::Arc;

use anyhow::{Context, Result};
use elc_composite::{Gateway, GatewayOptions, ReqwestSource};
use elc_server::{server::build_app, Config};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "info,elc_server=debug,elc_composite=debug,tower_http=debug".into()
            }),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_line_number(true),
        )
        .init();

    tracing::info!("Starting fossil-occurrence gateway");

    // Load configuration
    let config = Config::from_env().context("Failed to load configuration")?;
    tracing::info!(
        pbdb = %config.pbdb_base_url,
        neotoma = %config.neotoma_base_url,
        timeout = ?config.composite_timeout,
        retries = config.composite_retries,
        "Configuration loaded"
    );

    // Build the composite gateway
    let http = ReqwestSource::new().context("Failed to create HTTP client")?;
    let gateway = Gateway::new(
        Arc::new(http),
        GatewayOptions {
            pbdb_base_url: config.pbdb_base_url.clone(),
            neotoma_base_url: config.neotoma_base_url.clone(),
            timeout: config.composite_timeout,
            retries: config.composite_retries,
        },
    );

    let app = build_app(Arc::new(gateway));

    // Start server
    let addr = format!("0.0.0.0:{}", config.port);
    tracing::info!("Starting server on {}", addr);
    tracing::info!(
        "Composite list endpoint: http://localhost:{}/occs/list.json",
        config.port
    );
    tracing::info!("Health check: http://localhost:{}/health", config.port);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .context("Failed to bind to address")?;

    axum::serve(listener, app)
        .await
        .context("Server error")?;

    Ok(())
}
