//! Balance monitor CLI
//!
//! Follows a bitcoind-compatible node block by block and keeps per-address
//! balances in a local state file.

use std::{path::PathBuf, sync::Arc};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use log::{info, warn};
use parking_lot::RwLock;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use url::Url;

use balance_monitor::{
    config::{LedgerConfig, MonitorConfig},
    AddressLedger, BitcoindBackend, BlockWalker, CheckpointStore, FileStore, TxCache,
};

#[derive(Parser)]
#[command(name = "balance-monitor")]
#[command(about = "Per-address balance ledger following a Bitcoin node")]
#[command(version)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "monitor.toml", env = "BALANCE_MONITOR_CONFIG")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Follow the chain until interrupted
    Run,

    /// Show the checkpoint and balances from the state file
    Status {
        /// Only show this address
        #[arg(short, long)]
        address: Option<String>,
    },

    /// Validate configuration file
    ValidateConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(&cli.log_level)?;

    let config = match MonitorConfig::from_file(&cli.config) {
        Ok(c) => c,
        Err(e) => {
            if matches!(cli.command, Commands::ValidateConfig) {
                eprintln!("Configuration validation failed: {:#}", e);
                std::process::exit(1);
            }
            anyhow::bail!("Failed to load config from {:?}: {:#}", cli.config, e);
        }
    };

    match cli.command {
        Commands::Run => run_monitor(&config).await,
        Commands::Status { address } => show_status(&config, address.as_deref()),
        Commands::ValidateConfig => {
            println!("Configuration is valid.");
            println!("  RPC endpoint: {}", config.rpc.url);
            println!("  Start policy: {:?}", config.start_policy);
            match &config.ledger {
                LedgerConfig::Full => println!("  Ledger: full"),
                LedgerConfig::Watchlist { watchlist_file } => {
                    println!("  Ledger: watchlist ({:?})", watchlist_file)
                }
            }
            println!("  State file: {}", config.state_file.display());
            println!("  Cache capacity: {}", config.cache_capacity);
            Ok(())
        }
    }
}

fn init_logging(level: &str) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    Ok(())
}

async fn run_monitor(config: &MonitorConfig) -> Result<()> {
    info!("Starting balance monitor against {}", config.rpc.url);

    let walker_config = config.walker_config()?;
    let store = FileStore::open(&config.state_file)?;

    let url = Url::parse(&config.rpc.url).context("invalid rpc.url")?;
    let backend = Arc::new(BitcoindBackend::new(
        url,
        config.rpc.username.clone(),
        config.rpc.password.clone(),
        config.rpc_timeout(),
    )?);
    let cache = TxCache::new(backend.clone(), config.cache_capacity());

    let mut walker = BlockWalker::new(backend, cache, Arc::new(RwLock::new(store)), walker_config);

    let stop = walker.stop_handle();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Interrupt received, stopping");
                stop.stop();
            }
            Err(e) => warn!("Unable to listen for interrupts: {}", e),
        }
    });

    walker.run().await?;

    let store = walker.store();
    let store = store.read();
    info!(
        "Stopped at checkpoint {:?} with {} addresses in the ledger",
        store.load()?,
        store.balances().len()
    );

    Ok(())
}

fn show_status(config: &MonitorConfig, address: Option<&str>) -> Result<()> {
    if !config.state_file.exists() {
        println!("No state at {}", config.state_file.display());
        return Ok(());
    }

    let store = FileStore::open(&config.state_file)?;
    match store.load()? {
        Some(checkpoint) => println!("Checkpoint: {}", checkpoint),
        None => println!("Checkpoint: none"),
    }

    match address {
        Some(address) => println!("{} {}", address, store.balance(address)),
        None => {
            let balances = store.balances();
            println!("Addresses: {}", balances.len());
            for (address, balance) in balances {
                println!("{} {}", address, balance);
            }
        }
    }

    Ok(())
}
