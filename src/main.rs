//! Yield aggregator CLI
//!
//! Discovers opportunities across protocols, reads wallet positions, and
//! drives plan actions through the safety-checked pipeline.

use alloy::primitives::Address;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use yield_pilot::aggregator::Aggregator;
use yield_pilot::audit::AuditLog;
use yield_pilot::chain::{ChainAccess, RpcChain};
use yield_pilot::connector::{AaveV3Connector, Connector, UniswapV3Connector, VaultConnector};
use yield_pilot::ledger::DailyLedger;
use yield_pilot::model::PlanAction;
use yield_pilot::pipeline::ActionPipeline;
use yield_pilot::tokens::TokenRegistry;
use yield_pilot::wallet::Signer;
use yield_pilot::{Config, Error, Protocol, Result, RpcConfig};

#[derive(Parser)]
#[command(name = "yield-pilot")]
#[command(about = "Multi-protocol DeFi yield aggregator")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Discover yield opportunities across all registered protocols
    Discover,

    /// Read wallet positions across all registered protocols
    Positions {
        /// Wallet address to read
        #[arg(short, long)]
        wallet: String,
    },

    /// Run a plan action through the pipeline (validate, build, dry-run,
    /// estimate; broadcast only with --send)
    Execute {
        /// Path to a PlanAction JSON file
        #[arg(short, long)]
        plan: PathBuf,

        /// Wallet address the action executes for
        #[arg(short, long)]
        wallet: String,

        /// Broadcast after a clean dry run (requires PRIVATE_KEY)
        #[arg(long)]
        send: bool,
    },

    /// Show current configuration
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (ignore if not found)
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();

    let config = if let Some(config_path) = cli.config {
        Config::load(&config_path)?
    } else {
        Config::default()
    };

    match cli.command {
        Commands::Discover => run_discover(&config).await?,
        Commands::Positions { wallet } => run_positions(&config, &wallet).await?,
        Commands::Execute { plan, wallet, send } => {
            run_execute(&config, &plan, &wallet, send).await?
        }
        Commands::Config => {
            println!("{}", serde_json::to_string_pretty(&config)?);
        }
    }

    Ok(())
}

/// Wires one connector per configured protocol. Each gets its own chain
/// handle and daily ledger; only the token registry is shared.
fn build_connectors(config: &Config) -> Result<Vec<Arc<dyn Connector>>> {
    let rpc = RpcConfig::from_env();
    let chain_id = config.network.chain_id();
    let registry = Arc::new(TokenRegistry::new());

    let mut connectors: Vec<Arc<dyn Connector>> = Vec::new();

    if let Some(limits) = config.limits_for(Protocol::UniswapV3) {
        let chain: Arc<dyn ChainAccess> = Arc::new(RpcChain::from_rpc_config(&rpc, chain_id)?);
        connectors.push(Arc::new(UniswapV3Connector::new(
            chain,
            limits.clone(),
            DailyLedger::shared(),
            config.dex.clone(),
            registry.clone(),
            chain_id,
        )));
    }

    if let Some(limits) = config.limits_for(Protocol::AaveV3) {
        let chain: Arc<dyn ChainAccess> = Arc::new(RpcChain::from_rpc_config(&rpc, chain_id)?);
        connectors.push(Arc::new(AaveV3Connector::new(
            chain,
            limits.clone(),
            DailyLedger::shared(),
            config.lending.clone(),
            registry.clone(),
            chain_id,
        )));
    }

    if let Some(limits) = config.limits_for(Protocol::YearnV3) {
        let chain: Arc<dyn ChainAccess> = Arc::new(RpcChain::from_rpc_config(&rpc, chain_id)?);
        connectors.push(Arc::new(VaultConnector::new(
            chain,
            limits.clone(),
            DailyLedger::shared(),
            config.vaults.clone(),
            registry.clone(),
            chain_id,
        )));
    }

    if connectors.is_empty() {
        return Err(Error::Config(
            "no protocols configured under 'limits'".to_string(),
        ));
    }
    Ok(connectors)
}

async fn run_discover(config: &Config) -> Result<()> {
    let aggregator = Aggregator::new(build_connectors(config)?);
    let opportunities = aggregator.discover_all().await;

    println!("{}", serde_json::to_string_pretty(&opportunities)?);

    if let Some(best) = Aggregator::best_by_rate(&opportunities) {
        println!(
            "\nBest rate: {} via {} at {:.2}% APR",
            best.asset_symbol, best.protocol, best.apr_percent
        );
    }
    if let Some(avg) = Aggregator::average_risk(&opportunities) {
        println!("Average risk ordinal: {:.2}", avg);
    }
    Ok(())
}

async fn run_positions(config: &Config, wallet: &str) -> Result<()> {
    let wallet = parse_address(wallet)?;
    let aggregator = Aggregator::new(build_connectors(config)?);
    let positions = aggregator.read_all_positions(wallet).await;

    println!("{}", serde_json::to_string_pretty(&positions)?);
    Ok(())
}

async fn run_execute(config: &Config, plan: &PathBuf, wallet: &str, send: bool) -> Result<()> {
    let wallet = parse_address(wallet)?;
    let content = std::fs::read_to_string(plan)
        .map_err(|e| Error::Config(format!("{}: {}", plan.display(), e)))?;
    let action: PlanAction = serde_json::from_str(&content)?;

    let aggregator = Aggregator::new(build_connectors(config)?);
    let connector = aggregator
        .connector_for(action.protocol)
        .ok_or_else(|| {
            Error::Config(format!("protocol {} is not configured", action.protocol))
        })?
        .clone();

    let mut pipeline = ActionPipeline::new(connector, action, wallet);
    if let Some(path) = &config.audit_log_path {
        pipeline = pipeline.with_audit(Arc::new(AuditLog::new(path)));
    }

    let check = pipeline.validate().await?;
    println!("Safety check passed ({})", check.reason_or_ok());

    let tx = pipeline.build().await?;
    println!("Built call to {:#x} ({} bytes)", tx.to, tx.data.len());

    let dry = pipeline.dry_run().await?;
    if !dry.success {
        // Proceeding past a failed dry run is a policy decision; this CLI
        // stops here
        println!(
            "Dry run FAILED: {}",
            dry.revert_reason.as_deref().unwrap_or("unknown reason")
        );
        return Ok(());
    }
    println!("Dry run succeeded");

    let gas = pipeline.estimate_gas().await?;
    println!("Gas estimate: {}", gas);

    if !send {
        println!("Dry-run only (pass --send to broadcast)");
        return Ok(());
    }

    let signer = Signer::from_env("PRIVATE_KEY")?;
    let receipt = pipeline.send(&signer).await?;
    println!(
        "Confirmed in block {}: {} (gas used {})",
        receipt
            .block_number
            .map(|n| n.to_string())
            .unwrap_or_else(|| "?".to_string()),
        receipt.tx_hash,
        receipt.gas_used
    );
    Ok(())
}

fn parse_address(value: &str) -> Result<Address> {
    Address::from_str(value)
        .map_err(|e| Error::Config(format!("invalid wallet address {}: {}", value, e)))
}
