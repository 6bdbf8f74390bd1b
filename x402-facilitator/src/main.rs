//! x402 facilitator HTTP server.
//!
//! # Usage
//!
//! ```bash
//! # Run with config.json from the current directory
//! cargo run -p x402-facilitator --release
//!
//! # Custom config path and port
//! x402-facilitator --config /etc/x402/config.json --port 8080
//!
//! # Configure logging level
//! RUST_LOG=debug x402-facilitator
//! ```
//!
//! # Environment Variables
//!
//! - `CONFIG`: path to the JSON configuration file (default: `config.json`)
//! - `HOST`, `PORT`: bind address overrides (default: `0.0.0.0:4021`)
//! - `RUST_LOG`: log filter (default: `info`)
//! - `OTEL_EXPORTER_OTLP_*`: enable OpenTelemetry export
//!
//! `.env` in the working directory is loaded first.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use axum::http::Method;
use tower_http::cors;
use tower_http::trace::TraceLayer;
use x402_core::proto::ProtocolAdapter;

use x402_facilitator::config::FacilitatorConfig;
use x402_facilitator::discovery::DiscoveryCatalog;
use x402_facilitator::handlers::{AppState, facilitator_router};
use x402_facilitator::schemes::{asset_registry, build_facilitator, network_registry};
use x402_facilitator::sig_down::SigDown;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    let _ = rustls::crypto::ring::default_provider().install_default();

    #[cfg(feature = "telemetry")]
    let _telemetry = match x402_facilitator::telemetry::Telemetry::init() {
        Ok(telemetry) => telemetry,
        Err(e) => {
            eprintln!("telemetry setup failed: {e}");
            std::process::exit(1);
        }
    };
    #[cfg(not(feature = "telemetry"))]
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    if let Err(e) = run().await {
        tracing::error!("facilitator failed: {e}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let config = FacilitatorConfig::load()?;
    tracing::info!(
        host = %config.host,
        port = config.port,
        chains = config.chains.len(),
        "loaded configuration"
    );

    let networks = network_registry(&config);
    let assets = asset_registry(&config, &networks);
    let facilitator = build_facilitator(&config, &networks, &assets)?;
    let catalog = DiscoveryCatalog::from_requirements(&ProtocolAdapter::new(networks), &config.resources);
    tracing::info!(resources = catalog.len().await, "discovery catalog ready");

    let state = Arc::new(AppState::new(facilitator).with_catalog(catalog));
    let app = Router::new()
        .merge(facilitator_router(state))
        .layer(TraceLayer::new_for_http())
        .layer(
            cors::CorsLayer::new()
                .allow_origin(cors::Any)
                .allow_methods([Method::GET, Method::POST])
                .allow_headers(cors::Any),
        );

    let addr = SocketAddr::new(config.host, config.port);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("facilitator listening on http://{addr}");

    let sig_down = SigDown::try_new()?;
    let token = sig_down.cancellation_token();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { token.cancelled().await })
        .await?;

    tracing::info!("facilitator shut down gracefully");
    Ok(())
}
