//! HD Bridge - Server Processes
//!
//! Run modes:
//!   cargo run                    - Show usage
//!   cargo run -- api             - Start REST API (for frontend)
//!   cargo run -- watcher         - Start deposit watcher (background)
//!   cargo run -- all             - API and watcher in one process

use hdbridge::api;
use hdbridge::chain::JsonRpcClient;
use hdbridge::common::{init_from_config, log_system_event, BridgeConfig, ConfigError, Result};
use hdbridge::service::DepositService;
use hdbridge::storage::SqliteDepositStore;
use hdbridge::types::format_ether;
use hdbridge::watcher::{DepositWatcher, SystemClock};
use std::env;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() {
    dotenv::dotenv().ok();
    let args: Vec<String> = env::args().collect();

    if args.len() < 2 {
        print_usage();
        return;
    }

    let result = match args[1].as_str() {
        "api" => run_api_server(&args[2..]).await,
        "watcher" => run_watcher(&args[2..]).await,
        "all" => run_all(&args[2..]).await,
        "help" | "--help" | "-h" => {
            print_usage();
            Ok(())
        }
        _ => {
            print_usage();
            Ok(())
        }
    };

    if let Err(e) = result {
        eprintln!("Error [{}]: {}", e.error_code(), e);
        std::process::exit(1);
    }
}

fn print_usage() {
    println!("HD Bridge - Server Processes");
    println!();
    println!("Usage:");
    println!("  hdbridge api [--port <port>]                         Start REST API server (default: 3001)");
    println!("  hdbridge watcher [--interval-ms <ms>] [--confirmations <n>]");
    println!("                                                       Start deposit watcher");
    println!("  hdbridge all [--port <port>]                         API and watcher together");
    println!();
    println!("Environment Variables:");
    println!("  BRIDGE_MNEMONIC       BIP-39 phrase of the bridge wallet (required)");
    println!("  BRIDGE_XPUB           Account xpub, checked against the mnemonic");
    println!("  SOURCE_RPC_URL        Source chain JSON-RPC endpoint (required)");
    println!("  PAYOUT_RPC_URL        Payout chain JSON-RPC endpoint (required)");
    println!("  PAYOUT_CHAIN_ID       Payout chain EIP-155 id (required)");
    println!("  BRIDGE_DB_PATH        SQLite database (default: data/bridge.db)");
    println!("  API_PORT              REST API port (default: 3001)");
    println!("  LOG_LEVEL, LOG_FORMAT Logging (default: info, pretty)");
    println!();
    println!("Key tooling (xpub, mnemonic, index, verify): see `bridge-keys help`");
}

/// Parse the value following a flag
fn flag_value<T: std::str::FromStr>(args: &[String], i: usize, flag: &str) -> Result<T> {
    let raw = args
        .get(i + 1)
        .ok_or_else(|| ConfigError::InvalidValue(flag.to_string(), "missing value".to_string()))?;
    raw.parse()
        .map_err(|_| ConfigError::InvalidValue(flag.to_string(), raw.clone()).into())
}

/// Load configuration and install logging
fn load_config() -> Result<BridgeConfig> {
    let config = BridgeConfig::from_env()?;
    init_from_config(&config)?;
    Ok(config)
}

/// Apply `--port`
fn apply_api_args(config: &mut BridgeConfig, args: &[String]) -> Result<()> {
    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "--port" => {
                config.api_port = flag_value(args, i, "--port")?;
                i += 2;
            }
            _ => i += 1,
        }
    }
    Ok(())
}

/// Apply `--interval-ms` and `--confirmations`
fn apply_watcher_args(config: &mut BridgeConfig, args: &[String]) -> Result<()> {
    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "--interval-ms" => {
                let ms: u64 = flag_value(args, i, "--interval-ms")?;
                config.watcher.poll_interval = Duration::from_millis(ms);
                i += 2;
            }
            "--confirmations" => {
                config.watcher.required_confirmations = flag_value(args, i, "--confirmations")?;
                i += 2;
            }
            _ => i += 1,
        }
    }
    Ok(())
}

/// Shared handles built once per process
struct Components {
    store: Arc<SqliteDepositStore>,
    source: Arc<JsonRpcClient>,
}

fn build_components(config: &BridgeConfig) -> Result<Components> {
    let store = Arc::new(SqliteDepositStore::new(&config.db_path)?);
    let source = Arc::new(JsonRpcClient::new(&config.source_rpc_url, config.rpc_timeout)?);
    Ok(Components { store, source })
}

fn build_service(config: &BridgeConfig, components: &Components) -> Arc<DepositService> {
    Arc::new(DepositService::new(
        components.store.clone(),
        components.source.clone(),
        config.seed.clone(),
        config.xpub.clone(),
    ))
}

async fn build_watcher(config: &BridgeConfig, components: &Components) -> Result<DepositWatcher> {
    let payout = Arc::new(
        JsonRpcClient::new(&config.payout_rpc_url, config.rpc_timeout)?
            .with_chain_id(config.payout_chain_id)
            .with_receipt_timeout(config.receipt_timeout),
    );

    // A wrong chain id would produce transactions the node rejects
    match payout.remote_chain_id().await {
        Ok(remote) if remote != config.payout_chain_id => {
            return Err(ConfigError::InvalidValue(
                "PAYOUT_CHAIN_ID".to_string(),
                format!(
                    "{} configured but {} reports chain id {}",
                    config.payout_chain_id,
                    payout.url(),
                    remote
                ),
            )
            .into());
        }
        Ok(_) => {}
        Err(e) => warn!("Could not verify payout chain id: {}", e),
    }

    Ok(DepositWatcher::new(
        components.store.clone(),
        components.source.clone(),
        payout.clone(),
        payout,
        config.seed.clone(),
        config.watcher.clone(),
        Arc::new(SystemClock),
    ))
}

/// Resolves on Ctrl-C
async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for Ctrl-C: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}

/// Start REST API server
async fn run_api_server(args: &[String]) -> Result<()> {
    let mut config = load_config()?;
    apply_api_args(&mut config, args)?;
    config.print_summary();

    let components = build_components(&config)?;
    let service = build_service(&config, &components);
    log_system_event("api_started", serde_json::json!({ "port": config.api_port }));

    api::start_server(service, config.api_port, shutdown_signal()).await?;
    Ok(())
}

/// Start the deposit watcher
async fn run_watcher(args: &[String]) -> Result<()> {
    let mut config = load_config()?;
    apply_watcher_args(&mut config, args)?;
    config.print_summary();

    let components = build_components(&config)?;
    let watcher = build_watcher(&config, &components).await?;
    log_system_event(
        "watcher_started",
        serde_json::json!({
            "watcher_id": watcher.id(),
            "required_confirmations": config.watcher.required_confirmations,
        }),
    );

    if let Ok(stats) = build_service(&config, &components).stats().await {
        info!(
            "{} | paid out {} ETH",
            stats,
            format_ether(stats.total_paid_out_wei)
        );
    }

    println!("Watching for deposits...");
    println!("Press Ctrl+C to stop");
    println!();

    tokio::select! {
        _ = watcher.run() => {}
        _ = shutdown_signal() => {}
    }
    Ok(())
}

/// API and watcher in one process
async fn run_all(args: &[String]) -> Result<()> {
    let mut config = load_config()?;
    apply_api_args(&mut config, args)?;
    apply_watcher_args(&mut config, args)?;
    config.print_summary();

    let components = build_components(&config)?;
    let service = build_service(&config, &components);
    let watcher = build_watcher(&config, &components).await?;
    log_system_event(
        "bridge_started",
        serde_json::json!({ "port": config.api_port, "watcher_id": watcher.id() }),
    );

    let watcher_task = tokio::spawn(async move { watcher.run().await });
    let served = api::start_server(service, config.api_port, shutdown_signal()).await;
    watcher_task.abort();

    served?;
    Ok(())
}
