//! marketsync: incremental GraphQL sync + PnL rebuild engine for
//! prediction-market data.

use anyhow::{Context, Result};
use clap::Parser;
use marketsync_core::api::{router, AppState};
use marketsync_core::rebuild::RebuildEngine;
use marketsync_core::stats::StatsLedger;
use marketsync_core::store::Store;
use marketsync_core::sync::SyncCoordinator;
use marketsync_core::Config;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

const REBUILD_FILE: &str = "data/pnl/rebuild.bin";

#[derive(Debug, Parser)]
#[command(name = "marketsync")]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long, env = "MARKETSYNC_CONFIG", default_value = "config.toml")]
    config: String,

    /// Address the read-only query façade listens on.
    #[arg(long, env = "MARKETSYNC_LISTEN", default_value = "0.0.0.0:3000")]
    listen: String,
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "marketsync_core=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    info!(config = %cli.config, "loading configuration");
    let config = Config::load(&cli.config).with_context(|| format!("loading config from {}", cli.config))?;

    let store = Arc::new(Store::open(&config.db_path).with_context(|| format!("opening store at {}", config.db_path))?);
    let stats = Arc::new(StatsLedger::new(store.clone()));
    let rebuild = Arc::new(RebuildEngine::new(store.clone(), REBUILD_FILE));

    let coordinator = Arc::new(SyncCoordinator::new(config, store.clone(), stats.clone()));
    tokio::spawn(async move {
        if let Err(e) = coordinator.run_forever().await {
            tracing::error!(error = %e, "sync coordinator exited");
        }
    });

    let state = Arc::new(AppState { store, stats, rebuild });
    let app = router(state);

    let listener = TcpListener::bind(&cli.listen).await.with_context(|| format!("binding {}", cli.listen))?;
    info!(addr = %cli.listen, "query façade listening");
    axum::serve(listener, app).await.context("http server error")?;

    Ok(())
}
