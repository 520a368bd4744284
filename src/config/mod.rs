//! Configuration for the yield aggregation pipeline
//!
//! Everything is loaded once at process start and threaded through
//! constructors. No module-level lookups happen inside core logic, so tests
//! can inject arbitrary configs.

pub mod rpc;

use crate::{Error, Result};
use alloy::primitives::{address, Address};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

pub use rpc::RpcConfig;

/// Supported blockchain networks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Network {
    Ethereum,
    Arbitrum,
    Optimism,
    Base,
}

impl Network {
    pub fn chain_id(&self) -> u64 {
        match self {
            Network::Ethereum => 1,
            Network::Arbitrum => 42161,
            Network::Optimism => 10,
            Network::Base => 8453,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Network::Ethereum => "ethereum",
            Network::Arbitrum => "arbitrum",
            Network::Optimism => "optimism",
            Network::Base => "base",
        }
    }
}

/// Integrated protocols. One connector variant per entry; all branching on
/// protocol kind happens inside that variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Protocol {
    UniswapV3,
    AaveV3,
    YearnV3,
}

impl Protocol {
    pub fn name(&self) -> &'static str {
        match self {
            Protocol::UniswapV3 => "uniswap_v3",
            Protocol::AaveV3 => "aave_v3",
            Protocol::YearnV3 => "yearn_v3",
        }
    }
}

impl std::fmt::Display for Protocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Per-protocol money-safety limits, immutable for the lifetime of a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProtocolLimits {
    /// Maximum USD value permitted for a single transaction
    pub max_notional_per_tx_usd: f64,
    /// Maximum USD value across all transactions in a UTC day
    pub daily_cap_usd: f64,
    /// Slippage applied when the planner leaves it unset (basis points)
    pub default_slippage_bps: u32,
    /// Hard ceiling on requested slippage (basis points)
    pub max_slippage_bps: u32,
    /// Minimum projected collateralization ratio after the action; lending
    /// protocols only
    #[serde(default)]
    pub min_health_factor: Option<f64>,
}

impl Default for ProtocolLimits {
    fn default() -> Self {
        Self {
            max_notional_per_tx_usd: 250.0,
            daily_cap_usd: 1_000.0,
            default_slippage_bps: 50,
            max_slippage_bps: 500,
            min_health_factor: None,
        }
    }
}

/// Uniswap V3 adapter settings. Subgraph for discovery, contracts for
/// encoding. Defaults target Ethereum mainnet.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DexSettings {
    pub subgraph_url: String,
    pub router: Address,
    pub position_manager: Address,
    pub quoter: Address,
    /// Pools considered during discovery, most-liquid first
    pub top_pools: u32,
}

impl Default for DexSettings {
    fn default() -> Self {
        Self {
            // The Graph decentralized network; substitute {api-key} via config
            subgraph_url: "https://gateway.thegraph.com/api/subgraphs/id/5zvR82QoaXYFyDEKLZ9t6v9adgnptxYpKpSbxtgVENFV".to_string(),
            router: address!("e592427a0aece92de3edee1f18e0157c05861564"),
            position_manager: address!("c36442b4a4522e871399cd717abdd847ab11fe88"),
            quoter: address!("b27308f9f90d607463bb33ea1bebb41c27ce5ab6"),
            top_pools: 20,
        }
    }
}

/// One lending reserve the Aave adapter watches.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReserveSettings {
    pub asset: Address,
    pub a_token: Address,
    pub variable_debt_token: Address,
    pub symbol: String,
    pub decimals: u8,
}

/// Aave V3 adapter settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LendingSettings {
    pub pool: Address,
    pub reserves: Vec<ReserveSettings>,
}

impl Default for LendingSettings {
    fn default() -> Self {
        Self {
            pool: address!("87870bca3f3fd6335c3f4ce8392d69350b4fa4e2"),
            reserves: vec![
                ReserveSettings {
                    asset: address!("a0b86991c6218b36c1d19d4a2e9eb0ce3606eb48"),
                    a_token: address!("98c23e9d8f34fefb1b7bd6a91b7ff122f4e16f5c"),
                    variable_debt_token: address!("72e95b8931767c79ba4eee721354d6e99a61d004"),
                    symbol: "USDC".to_string(),
                    decimals: 6,
                },
                ReserveSettings {
                    asset: address!("c02aaa39b223fe8d0a0e5c4f27ead9083c756cc2"),
                    a_token: address!("4d5f47fa6a74757f35c14fd3a6ef8e3c9bc514e8"),
                    variable_debt_token: address!("ea51d7853eefb32b6ee06b1c12e6dcca88be0ffe"),
                    symbol: "WETH".to_string(),
                    decimals: 18,
                },
            ],
        }
    }
}

/// One ERC-4626 vault the vault adapter watches.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VaultSettings {
    pub vault: Address,
    pub asset: Address,
    pub symbol: String,
    pub decimals: u8,
}

/// Yearn-style vault adapter settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VaultsSettings {
    /// Vault registry API returning per-vault APR and TVL
    pub api_url: String,
    pub vaults: Vec<VaultSettings>,
}

impl Default for VaultsSettings {
    fn default() -> Self {
        Self {
            api_url: "https://ydaemon.yearn.fi/1/vaults/all".to_string(),
            vaults: vec![VaultSettings {
                vault: address!("028ec7330ff87667b6dfb0d94b954c820195336c"),
                asset: address!("6b175474e89094c44da98b954eedeac495271d0f"),
                symbol: "DAI".to_string(),
                decimals: 18,
            }],
        }
    }
}

/// Main configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub network: Network,
    /// Limits per protocol; a protocol absent from this map is not registered
    pub limits: HashMap<Protocol, ProtocolLimits>,
    #[serde(default)]
    pub dex: DexSettings,
    #[serde(default = "LendingSettings::default")]
    pub lending: LendingSettings,
    #[serde(default = "VaultsSettings::default")]
    pub vaults: VaultsSettings,
    /// Path to the pipeline audit log (JSONL); None disables auditing
    pub audit_log_path: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        let mut limits = HashMap::new();
        limits.insert(Protocol::UniswapV3, ProtocolLimits::default());
        limits.insert(
            Protocol::AaveV3,
            ProtocolLimits {
                min_health_factor: Some(1.3),
                ..ProtocolLimits::default()
            },
        );
        limits.insert(Protocol::YearnV3, ProtocolLimits::default());

        Self {
            network: Network::Ethereum,
            limits,
            dex: DexSettings::default(),
            lending: LendingSettings::default(),
            vaults: VaultsSettings::default(),
            audit_log_path: Some("audit.jsonl".to_string()),
        }
    }
}

impl Config {
    /// Loads a JSON config file. Called once in `main`; the parsed value is
    /// passed down by reference from there.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| Error::Config(format!("{}: {}", path.as_ref().display(), e)))?;
        serde_json::from_str(&content).map_err(|e| Error::Config(e.to_string()))
    }

    pub fn limits_for(&self, protocol: Protocol) -> Option<&ProtocolLimits> {
        self.limits.get(&protocol)
    }
}
