//! Shared token registry
//!
//! Single source of truth for token metadata (addresses, decimals, symbols)
//! used by the adapters and the safety layer when valuing balances in USD.
//!
//! Prices here are explicitly approximate and only cover what an oracle-less
//! deployment needs: stablecoins at 1:1 and a coarse native-asset figure for
//! gas costing. A token the registry cannot value yields `None`, never a
//! fabricated number.

use alloy::primitives::{address, Address, U256};
use std::collections::HashMap;

/// Token metadata
#[derive(Debug, Clone, Copy)]
pub struct TokenInfo {
    pub symbol: &'static str,
    pub decimals: u8,
    pub is_stablecoin: bool,
    /// Approximate USD price; fallback only, used when no oracle is wired in
    pub approx_price_usd: Option<f64>,
}

impl TokenInfo {
    pub const fn stablecoin(symbol: &'static str, decimals: u8) -> Self {
        Self {
            symbol,
            decimals,
            is_stablecoin: true,
            approx_price_usd: Some(1.0),
        }
    }

    pub const fn token(symbol: &'static str, decimals: u8, approx_price: Option<f64>) -> Self {
        Self {
            symbol,
            decimals,
            is_stablecoin: false,
            approx_price_usd: approx_price,
        }
    }
}

/// Well-known token addresses (Ethereum mainnet unless suffixed)
pub mod addresses {
    use super::*;

    pub const USDC: Address = address!("a0b86991c6218b36c1d19d4a2e9eb0ce3606eb48");
    pub const USDT: Address = address!("dac17f958d2ee523a2206206994597c13d831ec7");
    pub const DAI: Address = address!("6b175474e89094c44da98b954eedeac495271d0f");
    pub const WETH: Address = address!("c02aaa39b223fe8d0a0e5c4f27ead9083c756cc2");
    pub const WBTC: Address = address!("2260fac5e5542a773aa44fbcfedf7c193bc2c599");

    pub const USDC_ARB: Address = address!("af88d065e77c8cc2239327c5edb3a432268e5831");
    pub const WETH_ARB: Address = address!("82af49447d8a07e3bd95bd0d56f35241523fbab1");
    pub const USDC_BASE: Address = address!("833589fcd6edb6e08f4c7c32d4f71b54bda02913");
    pub const WETH_OPT: Address = address!("4200000000000000000000000000000000000006");
}

/// Token info lookups keyed by address.
pub struct TokenRegistry {
    tokens: HashMap<Address, TokenInfo>,
}

impl TokenRegistry {
    pub fn new() -> Self {
        use addresses::*;

        let mut tokens = HashMap::new();

        tokens.insert(USDC, TokenInfo::stablecoin("USDC", 6));
        tokens.insert(USDT, TokenInfo::stablecoin("USDT", 6));
        tokens.insert(DAI, TokenInfo::stablecoin("DAI", 18));
        tokens.insert(USDC_ARB, TokenInfo::stablecoin("USDC", 6));
        tokens.insert(USDC_BASE, TokenInfo::stablecoin("USDC", 6));

        tokens.insert(WETH, TokenInfo::token("WETH", 18, Some(3500.0)));
        tokens.insert(WETH_ARB, TokenInfo::token("WETH", 18, Some(3500.0)));
        tokens.insert(WETH_OPT, TokenInfo::token("WETH", 18, Some(3500.0)));
        tokens.insert(WBTC, TokenInfo::token("WBTC", 8, Some(95_000.0)));

        Self { tokens }
    }

    pub fn get(&self, address: &Address) -> Option<&TokenInfo> {
        self.tokens.get(address)
    }

    /// Scaled token quantity for a base-unit amount, None for unknown tokens.
    pub fn scaled_amount(&self, address: &Address, amount: U256) -> Option<f64> {
        let info = self.get(address)?;
        Some(u256_to_f64(amount) / 10f64.powi(info.decimals as i32))
    }

    /// Approximate USD value for a base-unit amount. None when the token is
    /// unknown or has no price; callers must treat that as "unavailable", not
    /// zero.
    pub fn usd_value(&self, address: &Address, amount: U256) -> Option<f64> {
        let info = self.get(address)?;
        let price = info.approx_price_usd?;
        Some(self.scaled_amount(address, amount)? * price)
    }

    /// Coarse native-asset (ETH) price used for gas-cost estimates.
    pub fn native_price_usd(&self) -> f64 {
        self.get(&addresses::WETH)
            .and_then(|info| info.approx_price_usd)
            .unwrap_or(0.0)
    }
}

impl Default for TokenRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Lossy conversion for display/valuation math only. Base-unit arithmetic
/// stays in U256 everywhere else.
pub fn u256_to_f64(value: U256) -> f64 {
    // Decimal round-trip: precise for anything representable, saturates to
    // infinity far beyond any token supply otherwise
    value.to_string().parse::<f64>().unwrap_or(f64::INFINITY)
}

/// Format a U256 value with decimals for human-readable output.
pub fn format_units(value: U256, decimals: u32) -> String {
    if value.is_zero() {
        return "0".to_string();
    }

    let divisor = U256::from(10).pow(U256::from(decimals));
    let whole = value / divisor;
    let remainder = value % divisor;

    if remainder.is_zero() {
        whole.to_string()
    } else {
        let remainder_str = format!("{:0>width$}", remainder, width = decimals as usize);
        let trimmed = remainder_str.trim_end_matches('0');
        if trimmed.is_empty() {
            whole.to_string()
        } else {
            format!("{}.{}", whole, trimmed)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stablecoin_values_at_par() {
        let registry = TokenRegistry::new();
        // 50 USDC in base units (6 decimals)
        let value = registry
            .usd_value(&addresses::USDC, U256::from(50_000_000u64))
            .unwrap();
        assert!((value - 50.0).abs() < 1e-9);
    }

    #[test]
    fn unknown_token_has_no_value() {
        let registry = TokenRegistry::new();
        let unknown = Address::ZERO;
        assert!(registry.usd_value(&unknown, U256::from(1u64)).is_none());
    }

    #[test]
    fn format_units_trims_trailing_zeros() {
        let one_eth = U256::from(1_000_000_000_000_000_000u128);
        assert_eq!(format_units(one_eth, 18), "1");

        let one_point_five = U256::from(1_500_000_000_000_000_000u128);
        assert_eq!(format_units(one_point_five, 18), "1.5");

        let thousand_usdc = U256::from(1_000_000_000u64);
        assert_eq!(format_units(thousand_usdc, 6), "1000");

        assert_eq!(format_units(U256::ZERO, 18), "0");
    }

    #[test]
    fn native_price_comes_from_weth_entry() {
        let registry = TokenRegistry::new();
        assert!(registry.native_price_usd() > 0.0);
    }
}
