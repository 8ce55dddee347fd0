//! stepgate CLI entry point.

mod cli;

use clap::Parser;
use cli::Cli;
use std::sync::Arc;
use std::time::Duration;
use stepgate::extract::GeminiExtractor;
use stepgate::policy::PolicyCache;
use stepgate::quota::QuotaStore;
use stepgate::supabase::SupabaseClient;
use stepgate::{server, ServiceConfig, VerificationService, VerifyPolicy};
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
    // Initialize error handling
    color_eyre::install()?;

    // Parse CLI arguments
    let cli = Cli::parse();

    // Initialize tracing
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&cli.log_level));

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();

    info!("stepgate v{}", env!("CARGO_PKG_VERSION"));

    // Build configuration
    let config: ServiceConfig = cli.into_config()?;
    config.validate()?;

    // One Supabase client serves as settings source, proof store,
    // submission store and identity provider.
    let supabase = Arc::new(SupabaseClient::new(&config.supabase)?);
    let extractor = Arc::new(GeminiExtractor::new(&config.gemini)?);

    let policy = PolicyCache::new(
        supabase.clone(),
        VerifyPolicy::from_config(&config),
        Duration::from_millis(config.settings_ttl_ms),
    );
    let quota = QuotaStore::new(config.max_tracked_actors);

    let service = Arc::new(VerificationService::new(
        policy,
        quota.clone(),
        supabase.clone(),
        extractor,
        supabase.clone(),
        supabase,
    ));

    let listener = TcpListener::bind(config.bind).await?;
    info!("listening on {}", config.bind);

    // Run until shutdown
    server::serve(listener, service, shutdown_signal()).await?;

    let stats = quota.stats();
    info!(
        allowed = stats.allowed,
        denied = stats.denied,
        "quota totals"
    );
    info!("Goodbye!");
    Ok(())
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("shutdown signal received"),
        Err(e) => tracing::error!("failed to listen for shutdown signal: {e}"),
    }
}
