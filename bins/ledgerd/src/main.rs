//! OpenExchange ledger binary
//!
//! Entry point for initializing, validating and running the spot ledger,
//! plus a few read accessors for operators.

use anyhow::{Context, Result};
use cli::{Cli, Commands};
use common::{Platform, Protocol};
use config::{
    generate_default_config, load_config, save_config, validate_config, LedgerConfig,
    StorageBackend, ValidationReport,
};
use observability::{init_logging, init_metrics, LogFormat};
use oms::{OmsError, OrderManager};
use settlement::{
    LedgerWorker, LogNotifier, SettlementEngine, SettlementOptions, TransactionReconciler,
};
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;
use storage::{InMemoryLedgerStore, LedgerStore};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};
use wallet::{BalanceLedger, ReserveManager, WalletError};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse_args();

    // The configuration is read before logging starts so its format applies.
    let loaded = cli.command.config_path().map(load_config);
    let format = cli
        .log_format
        .map(|f| f.as_str().to_string())
        .or_else(|| match &loaded {
            Some(Ok(config)) => Some(config.logging.format.clone()),
            _ => None,
        })
        .and_then(|f| LogFormat::parse(&f))
        .unwrap_or_default();
    init_logging("ledgerd", format)?;
    debug!(?cli, "CLI arguments parsed");

    info!(command = cli.command.name(), "Executing command");
    match cli.command {
        Commands::Init { output, force } => init_command(&output, force),
        Commands::Validate { .. } => validate_command(&required(loaded)?),
        Commands::Start { .. } => start_command(required(loaded)?).await,
        Commands::Migrate { .. } => migrate_command(&required(loaded)?).await,
        Commands::Balance { user, symbol, .. } => {
            balance_command(&required(loaded)?, user, &symbol).await
        }
        Commands::Reserve {
            symbol,
            platform,
            protocol,
            ..
        } => reserve_command(&required(loaded)?, &symbol, &platform, &protocol).await,
        Commands::Order { id, .. } => order_command(&required(loaded)?, id).await,
    }
}

fn required(loaded: Option<Result<LedgerConfig>>) -> Result<LedgerConfig> {
    loaded
        .context("Command needs a configuration file")?
        .map_err(|e| {
            error!(error = %e, "Failed to load configuration");
            e
        })
}

async fn start_command(config: LedgerConfig) -> Result<()> {
    let report = validate_config(&config);
    for warning in &report.warnings {
        warn!(field = %warning.field, message = %warning.message, "Configuration warning");
    }
    if !report.is_valid() {
        error!(
            error_count = report.errors.len(),
            "Configuration validation failed"
        );
        for err in &report.errors {
            error!("{}", err);
        }
        anyhow::bail!("Cannot start ledger due to configuration errors");
    }

    if config.metrics.enabled {
        init_metrics(config.metrics.port).context("Failed to start metrics exporter")?;
    }

    let store = open_store(&config).await?;
    let options = SettlementOptions::from_config(&config.settlement)?;
    let engine = SettlementEngine::new(store.clone(), Arc::new(LogNotifier), options);
    let reconciler = TransactionReconciler::new(store, config.settlement.operation_timeout());
    let (worker, handle) = LedgerWorker::new(
        engine,
        reconciler,
        config.settlement.workers,
        config.settlement.queue_capacity,
    );

    let (shutdown, shutdown_rx) = watch::channel(false);
    let running = tokio::spawn(worker.run(shutdown_rx));
    info!(
        service = %config.service.name,
        backend = ?config.storage.backend,
        workers = config.settlement.workers,
        "Ledger started, press Ctrl+C to stop"
    );

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl+C")?;
    info!("Shutdown signal received");

    drop(handle);
    if shutdown.send(true).is_err() {
        warn!("Ledger worker had already stopped");
    }
    running.await.context("Ledger worker panicked")?;

    info!("Ledger stopped");
    Ok(())
}

fn validate_command(config: &LedgerConfig) -> Result<()> {
    let report = validate_config(config);
    print_report(&report);

    if !report.is_valid() {
        anyhow::bail!("Configuration validation failed");
    }

    println!("[ok] Configuration is valid!");
    println!();
    println!("Service: {}", config.service.name);
    println!("Environment: {:?}", config.service.environment);
    println!("Storage: {:?}", config.storage.backend);
    println!("Workers: {}", config.settlement.workers);
    println!("Currencies: {}", config.reference.currencies.len());
    println!("Chains: {}", config.reference.chains.len());
    println!("Pairs: {}", config.reference.pairs.len());
    Ok(())
}

fn print_report(report: &ValidationReport) {
    println!("\n=== Configuration Validation Report ===\n");

    if !report.defaults_applied.is_empty() {
        println!("Defaults Applied ({}):", report.defaults_applied.len());
        for default in &report.defaults_applied {
            println!("  [info] {} = {}", default.field, default.value);
        }
        println!();
    }

    if !report.warnings.is_empty() {
        println!("Warnings ({}):", report.warnings.len());
        for warning in &report.warnings {
            println!("  [warn] [{}] {}", warning.field, warning.message);
        }
        println!();
    }

    if !report.errors.is_empty() {
        println!("Errors ({}):", report.errors.len());
        for err in &report.errors {
            println!("  [error] {}", err);
        }
        println!();
    }
}

fn init_command(output_path: &Path, force: bool) -> Result<()> {
    info!(?output_path, "Initializing new configuration file");
    if output_path.exists() && !force {
        anyhow::bail!(
            "{:?} already exists, pass --force to replace it",
            output_path
        );
    }

    let config = generate_default_config();
    if let Some(parent) = output_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory: {:?}", parent))?;
    }
    save_config(&config, output_path)?;

    println!("[ok] Configuration file created successfully!");
    println!();
    println!("Location: {:?}", output_path);
    println!();
    println!("This configuration includes:");
    println!("  - In-memory storage");
    println!("  - 2 currencies (BTC, USDT) and 1 chain (Bitcoin)");
    println!("  - 1 pair (BTC/USDT)");
    println!();
    println!("Next steps:");
    println!("  1. Edit the configuration file to customize settings");
    println!("  2. Set required environment variables (database URL)");
    println!(
        "  3. Run 'ledgerd validate --config {:?}' to check configuration",
        output_path
    );
    println!(
        "  4. Run 'ledgerd start --config {:?}' to start the ledger",
        output_path
    );
    Ok(())
}

async fn balance_command(config: &LedgerConfig, user_id: i64, symbol: &str) -> Result<()> {
    let balances = BalanceLedger::new(open_store(config).await?);
    match balances.get_balance(user_id, symbol).await {
        Ok(balance) => println!("user {} {}: {}", user_id, symbol, balance),
        Err(WalletError::AssetNotFound { .. }) => {
            println!("user {} holds no {} asset", user_id, symbol)
        }
        Err(e) => return Err(e.into()),
    }
    Ok(())
}

async fn reserve_command(
    config: &LedgerConfig,
    symbol: &str,
    platform: &str,
    protocol: &str,
) -> Result<()> {
    let platform = Platform::from_str(platform)?;
    let protocol = Protocol::from_str(protocol)?;
    let reserves = ReserveManager::new(open_store(config).await?);

    let total = reserves.get_reserve(symbol, platform, protocol).await?;
    println!("{} on {}/{}: {}", symbol, platform, protocol, total);
    Ok(())
}

async fn order_command(config: &LedgerConfig, id: i64) -> Result<()> {
    let store = open_store(config).await?;
    let orders = OrderManager::new(store.clone(), BalanceLedger::new(store));
    match orders.get(id).await {
        Ok(order) => println!("{}", serde_json::to_string_pretty(&order)?),
        Err(OmsError::NotFound(_)) => println!("order {} not found", id),
        Err(e) => return Err(e.into()),
    }
    Ok(())
}

async fn open_store(config: &LedgerConfig) -> Result<Arc<dyn LedgerStore>> {
    match config.storage.backend {
        StorageBackend::Memory => {
            info!(
                currencies = config.reference.currencies.len(),
                pairs = config.reference.pairs.len(),
                "Using in-memory ledger store"
            );
            Ok(Arc::new(InMemoryLedgerStore::with_reference(
                config.reference.clone(),
            )))
        }
        StorageBackend::Postgres => open_postgres(config).await,
    }
}

#[cfg(feature = "postgres")]
async fn connect_postgres(config: &LedgerConfig) -> Result<storage::PostgresLedgerStore> {
    let postgres = config
        .storage
        .postgres
        .as_ref()
        .context("storage.postgres is required for the postgres backend")?;
    storage::PostgresLedgerStore::connect(
        &postgres.url,
        postgres.max_connections,
        postgres.connect_timeout(),
    )
    .await
    .context("Failed to connect to PostgreSQL")
}

#[cfg(feature = "postgres")]
async fn open_postgres(config: &LedgerConfig) -> Result<Arc<dyn LedgerStore>> {
    let store = connect_postgres(config).await?;
    let run_migrations = config
        .storage
        .postgres
        .as_ref()
        .is_some_and(|p| p.run_migrations);
    if run_migrations {
        store.migrate().await.context("Failed to apply ledger schema")?;
    }
    if !config.reference.is_empty() {
        store
            .seed_reference(&config.reference)
            .await
            .context("Failed to seed reference data")?;
    }
    Ok(Arc::new(store))
}

#[cfg(not(feature = "postgres"))]
async fn open_postgres(_config: &LedgerConfig) -> Result<Arc<dyn LedgerStore>> {
    anyhow::bail!("ledgerd was built without the postgres feature")
}

#[cfg(feature = "postgres")]
async fn migrate_command(config: &LedgerConfig) -> Result<()> {
    if config.storage.backend != StorageBackend::Postgres {
        anyhow::bail!("Migrations only apply to the postgres backend");
    }
    let store = connect_postgres(config).await?;
    store.migrate().await.context("Failed to apply ledger schema")?;
    println!("[ok] Ledger schema applied");
    Ok(())
}

#[cfg(not(feature = "postgres"))]
async fn migrate_command(_config: &LedgerConfig) -> Result<()> {
    anyhow::bail!("ledgerd was built without the postgres feature")
}
