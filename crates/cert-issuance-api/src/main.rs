//! Certificate issuance HTTP service.
//!
//! Usage:
//!   cert-issuance-api --config path/to/cert-issuance.toml

use std::path::PathBuf;
use std::process::ExitCode;

use cert_issuance::{IssuanceConfig, Issuer};
use cert_issuance_api::{router, AppState};
use clap::Parser;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "cert-issuance-api")]
#[command(about = "Pins, mints and delivers environmental preservation certificates")]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(short, long, env = "CERT_ISSUANCE_CONFIG")]
    config: PathBuf,

    /// Listen address, overriding `server.listen`.
    #[arg(long, env = "CERT_ISSUANCE_LISTEN")]
    listen: Option<String>,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let cli = Cli::parse();
    if let Err(e) = run(cli).await {
        tracing::error!(error = %e, "Fatal error");
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}

async fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    let config = IssuanceConfig::load(&cli.config)?;
    let listen = cli.listen.unwrap_or_else(|| config.server.listen.clone());

    tracing::info!(
        network = ?config.ledger.network,
        rpc_url = %config.ledger.effective_rpc_url(),
        symbol = %config.certificate.symbol,
        "Starting certificate issuance API"
    );

    let issuer = Issuer::from_config(&config)?;
    let state = AppState::new(issuer, config.server.max_upload_bytes);

    let app = router(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let listener = tokio::net::TcpListener::bind(&listen).await?;
    tracing::info!(addr = %listener.local_addr()?, "Listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Shut down cleanly");
    Ok(())
}

async fn shutdown_signal() {
    tokio::signal::ctrl_c().await.ok();
    tracing::info!("Received shutdown signal");
}
