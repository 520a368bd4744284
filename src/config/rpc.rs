//! RPC endpoint configuration
//!
//! Follows Ethereum ecosystem conventions:
//! 1. Per-chain env vars (ETH_RPC_URL, ARBITRUM_RPC_URL, ...) - highest priority
//! 2. Provider API keys (ALCHEMY_API_KEY, INFURA_API_KEY) - builds URLs automatically
//! 3. Public RPC fallbacks - rate limited, for testing only

use std::collections::HashMap;

/// RPC URLs indexed by chain ID
#[derive(Debug, Clone)]
pub struct RpcConfig {
    urls: HashMap<u64, String>,
}

/// Chain ID constants
pub mod chains {
    pub const ETHEREUM: u64 = 1;
    pub const ARBITRUM: u64 = 42161;
    pub const OPTIMISM: u64 = 10;
    pub const BASE: u64 = 8453;
}

mod env_vars {
    pub const ETH_RPC_URL: &str = "ETH_RPC_URL";
    pub const ARBITRUM_RPC_URL: &str = "ARBITRUM_RPC_URL";
    pub const OPTIMISM_RPC_URL: &str = "OPTIMISM_RPC_URL";
    pub const BASE_RPC_URL: &str = "BASE_RPC_URL";

    pub const ALCHEMY_API_KEY: &str = "ALCHEMY_API_KEY";
    pub const INFURA_API_KEY: &str = "INFURA_API_KEY";
}

mod public_rpcs {
    pub const ETHEREUM: &str = "https://eth.llamarpc.com";
    pub const ARBITRUM: &str = "https://arb1.arbitrum.io/rpc";
    pub const OPTIMISM: &str = "https://mainnet.optimism.io";
    pub const BASE: &str = "https://mainnet.base.org";
}

impl RpcConfig {
    /// Create RPC config from environment variables.
    ///
    /// Priority: per-chain env vars, then ALCHEMY_API_KEY, then
    /// INFURA_API_KEY, then public fallbacks for anything still missing.
    pub fn from_env() -> Self {
        let mut urls = HashMap::new();

        for (var, chain) in [
            (env_vars::ETH_RPC_URL, chains::ETHEREUM),
            (env_vars::ARBITRUM_RPC_URL, chains::ARBITRUM),
            (env_vars::OPTIMISM_RPC_URL, chains::OPTIMISM),
            (env_vars::BASE_RPC_URL, chains::BASE),
        ] {
            if let Ok(url) = std::env::var(var) {
                tracing::debug!(var, chain, "Using per-chain RPC URL");
                urls.insert(chain, url);
            }
        }

        if urls.is_empty() {
            if let Ok(key) = std::env::var(env_vars::ALCHEMY_API_KEY) {
                tracing::info!("Building RPC URLs from ALCHEMY_API_KEY");
                urls.insert(
                    chains::ETHEREUM,
                    format!("https://eth-mainnet.g.alchemy.com/v2/{}", key),
                );
                urls.insert(
                    chains::ARBITRUM,
                    format!("https://arb-mainnet.g.alchemy.com/v2/{}", key),
                );
                urls.insert(
                    chains::OPTIMISM,
                    format!("https://opt-mainnet.g.alchemy.com/v2/{}", key),
                );
                urls.insert(
                    chains::BASE,
                    format!("https://base-mainnet.g.alchemy.com/v2/{}", key),
                );
            }
        }

        if urls.is_empty() {
            if let Ok(key) = std::env::var(env_vars::INFURA_API_KEY) {
                tracing::info!("Building RPC URLs from INFURA_API_KEY");
                urls.insert(
                    chains::ETHEREUM,
                    format!("https://mainnet.infura.io/v3/{}", key),
                );
                urls.insert(
                    chains::ARBITRUM,
                    format!("https://arbitrum-mainnet.infura.io/v3/{}", key),
                );
                urls.insert(
                    chains::OPTIMISM,
                    format!("https://optimism-mainnet.infura.io/v3/{}", key),
                );
                // Infura doesn't support Base
            }
        }

        if !urls.contains_key(&chains::ETHEREUM) {
            tracing::warn!("No RPC configured for Ethereum, using public RPC (rate limited)");
        }
        urls.entry(chains::ETHEREUM)
            .or_insert_with(|| public_rpcs::ETHEREUM.to_string());
        urls.entry(chains::ARBITRUM)
            .or_insert_with(|| public_rpcs::ARBITRUM.to_string());
        urls.entry(chains::OPTIMISM)
            .or_insert_with(|| public_rpcs::OPTIMISM.to_string());
        urls.entry(chains::BASE)
            .or_insert_with(|| public_rpcs::BASE.to_string());

        Self { urls }
    }

    /// Create with explicit RPC URLs
    pub fn with_urls(urls: HashMap<u64, String>) -> Self {
        Self { urls }
    }

    /// Get RPC URL for a chain
    pub fn get(&self, chain_id: u64) -> Option<&str> {
        self.urls.get(&chain_id).map(|s| s.as_str())
    }

    pub fn has_chain(&self, chain_id: u64) -> bool {
        self.urls.contains_key(&chain_id)
    }
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self::from_env()
    }
}
