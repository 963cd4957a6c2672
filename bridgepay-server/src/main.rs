//! BridgePay Server
//!
//! Settles card payments as native-unit transfers between a fixed pool of
//! ledger accounts and the platform account, and reconciles bank-transfer
//! notifications against the same orders.

mod api;
mod config;
mod server;
mod shutdown;
mod state;

use bridgepay_core::config::ConfigStore;
use bridgepay_core::events::settlement_event_channel;
use bridgepay_core::ledger::{EvmLedger, LedgerClient, SimulatedLedger};
use bridgepay_core::service::{PaymentService, ServiceParts};
use bridgepay_core::store::PgOrderStore;
use bridgepay_core::wallet::Signer;
use clap::Parser;
use config::file::LedgerKind;
use config::{ConfigError, ConfigLoader, LoadedConfig, get_database_url};
use server::{build_router, run_server};
use shutdown::{shutdown_signal, spawn_config_reload_handler};
use sqlx::postgres::PgPoolOptions;
use state::AppState;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// BridgePay - card-to-wallet settlement bridge
#[derive(Parser, Debug)]
#[command(name = "bridgepay-server")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to the configuration file
    #[arg(short, long, default_value = "./bridgepay.toml")]
    config: PathBuf,

    /// Override the listen address (e.g., 0.0.0.0:3000)
    #[arg(short, long)]
    listen: Option<SocketAddr>,

    /// Run database migrations on startup
    #[arg(long, default_value = "false")]
    migrate: bool,

    /// Emit logs as JSON lines
    #[arg(long, env = "BRIDGEPAY_LOG_JSON", default_value = "false")]
    log_json: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(args.log_json);

    tracing::info!("Starting bridgepay-server v{}", env!("CARGO_PKG_VERSION"));

    let config_loader = Arc::new(ConfigLoader::new(&args.config, args.listen));
    let loaded = config_loader.load().map_err(|e| {
        tracing::error!("Failed to load configuration: {}", e);
        e
    })?;
    tracing::info!(
        pool_size = loaded.pool.len(),
        exchange_rate = %loaded.exchange_rate,
        "Configuration loaded from {:?}",
        args.config
    );

    let database_url = get_database_url().map_err(|e: ConfigError| {
        tracing::error!("DATABASE_URL environment variable not set");
        e
    })?;

    tracing::info!("Connecting to database...");
    let db_pool = PgPoolOptions::new()
        .max_connections(10)
        .acquire_timeout(loaded.settings.store_timeout)
        .connect(&database_url)
        .await
        .map_err(|e| {
            tracing::error!("Failed to connect to database: {}", e);
            e
        })?;
    tracing::info!("Database connection established");

    if args.migrate {
        tracing::info!("Running database migrations...");
        sqlx::migrate!("../migrations")
            .run(&db_pool)
            .await
            .map_err(|e| {
                tracing::error!("Failed to run migrations: {}", e);
                e
            })?;
        tracing::info!("Migrations completed successfully");
    }

    let ledger = connect_ledger(&loaded).await?;
    let listen_addr = loaded.listen;
    let LoadedConfig {
        admin,
        exchange_rate,
        settings,
        memo_patterns,
        platform,
        pool,
        webhook_secret,
        ..
    } = loaded;
    tracing::info!(platform = %platform.address(), "Platform account ready");

    let (event_tx, event_rx) = settlement_event_channel();
    let service = PaymentService::new(
        ServiceParts {
            settings,
            memo_patterns,
            pool,
            store: Arc::new(PgOrderStore::new(db_pool.clone())),
            ledger,
            platform: Arc::new(platform),
            rates: ConfigStore::new(exchange_rate),
        },
        event_tx,
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let watcher = service.settlement_watcher();
    let watcher_handle = tokio::spawn(watcher.run(shutdown_rx, event_rx));

    let state = AppState::new(service, admin, webhook_secret);
    let reload_notify = spawn_config_reload_handler(state.clone(), config_loader);
    let router = build_router(state);

    tracing::info!("Starting HTTP server on {}", listen_addr);
    let result = run_server(router, listen_addr, shutdown_signal()).await;

    reload_notify.notify_one();
    let _ = shutdown_tx.send(true);
    if let Err(e) = watcher_handle.await {
        tracing::error!(error = %e, "Settlement watcher task failed");
    }

    tracing::info!("Closing database connections...");
    db_pool.close().await;
    tracing::info!("Server shutdown complete");

    result.map_err(Into::into)
}

async fn connect_ledger(loaded: &LoadedConfig) -> anyhow::Result<Arc<dyn LedgerClient>> {
    match loaded.ledger.kind {
        LedgerKind::Evm => {
            let endpoint = loaded
                .ledger
                .endpoint
                .as_ref()
                .ok_or_else(|| anyhow::anyhow!("ledger.endpoint is required for the evm ledger"))?;
            let mut ledger =
                EvmLedger::connect(endpoint, loaded.settings.required_confirmations).await?;
            if let Some(ms) = loaded.ledger.poll_interval_ms {
                ledger = ledger.with_poll_interval(Duration::from_millis(ms));
            }
            if let Some(ms) = loaded.ledger.request_timeout_ms {
                ledger = ledger.with_request_timeout(Duration::from_millis(ms));
            }
            tracing::info!(chain_id = ledger.chain_id(), %endpoint, "Connected to EVM ledger");
            Ok(Arc::new(ledger))
        }
        LedgerKind::Simulated => {
            let ledger = SimulatedLedger::from_pool(&loaded.pool)?;
            ledger.fund(loaded.platform.address(), loaded.platform_starting_balance)?;
            tracing::warn!("Using the simulated ledger, no real funds move");
            Ok(Arc::new(ledger))
        }
    }
}

/// Initialize the tracing subscriber with environment-based filtering.
fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,sqlx=warn"));
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}
