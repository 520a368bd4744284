//! Uniswap V3 connector
//!
//! Discovery and position reads go through the protocol subgraph; swap and
//! liquidity calls are encoded against the router and position manager, with
//! swap minimum-out derived from an on-chain quoter call so the configured
//! slippage tolerance is honored in the calldata itself.

use super::abi;
use super::Connector;
use crate::chain::{ChainAccess, ChainReader};
use crate::config::{DexSettings, Protocol, ProtocolLimits};
use crate::ledger::SharedLedger;
use crate::model::{ActionKind, Opportunity, PlanAction, Position, PreparedTransaction, RiskScore};
use crate::tokens::TokenRegistry;
use crate::{Error, Result};
use alloy::primitives::{Address, U256};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use std::str::FromStr;
use std::sync::Arc;

/// Selectors for the contracts this adapter touches
mod selectors {
    /// SwapRouter exactInputSingle(ExactInputSingleParams)
    pub const EXACT_INPUT_SINGLE: [u8; 4] = [0x41, 0x4b, 0xf3, 0x89];
    /// Quoter quoteExactInputSingle(address,address,uint24,uint256,uint160)
    pub const QUOTE_EXACT_INPUT_SINGLE: [u8; 4] = [0xf7, 0x72, 0x9d, 0x43];
    /// NonfungiblePositionManager mint(MintParams)
    pub const MINT: [u8; 4] = [0x88, 0x31, 0x64, 0x56];
    /// NonfungiblePositionManager decreaseLiquidity(DecreaseLiquidityParams)
    pub const DECREASE_LIQUIDITY: [u8; 4] = [0x0c, 0x49, 0xcc, 0xbe];
}

/// 0.30% pools; the planner's amounts are quoted against this tier
const DEFAULT_FEE_TIER: u32 = 3_000;
/// Full-range ticks for 60 tick spacing
const MIN_TICK: i32 = -887_220;
const MAX_TICK: i32 = 887_220;
/// Rough gas for entering a position, used for the discovery gas estimate
const ENTRY_GAS_UNITS: u64 = 250_000;

#[derive(Debug, Deserialize)]
struct GraphQlResponse {
    data: Option<Value>,
    errors: Option<Value>,
}

pub struct UniswapV3Connector {
    chain: Arc<dyn ChainAccess>,
    limits: ProtocolLimits,
    ledger: SharedLedger,
    http: Client,
    settings: DexSettings,
    registry: Arc<TokenRegistry>,
    chain_id: u64,
}

impl UniswapV3Connector {
    pub fn new(
        chain: Arc<dyn ChainAccess>,
        limits: ProtocolLimits,
        ledger: SharedLedger,
        settings: DexSettings,
        registry: Arc<TokenRegistry>,
        chain_id: u64,
    ) -> Self {
        Self {
            chain,
            limits,
            ledger,
            http: Client::new(),
            settings,
            registry,
            chain_id,
        }
    }

    async fn query_subgraph(&self, query: &str, variables: Value) -> Result<Value> {
        let response = self
            .http
            .post(&self.settings.subgraph_url)
            .json(&json!({
                "query": query,
                "variables": variables
            }))
            .send()
            .await?;

        let result: GraphQlResponse = response.json().await?;

        if let Some(errors) = result.errors {
            return Err(Error::ChainRead(format!("subgraph errors: {}", errors)));
        }

        result
            .data
            .ok_or_else(|| Error::ChainRead("no data in subgraph response".to_string()))
    }

    /// Parses one subgraph pool entry into an opportunity. None skips the
    /// element.
    fn pool_to_opportunity(&self, pool: &Value, gas_cost_usd: f64) -> Option<Opportunity> {
        let id = pool.get("id")?.as_str()?;
        let tvl: f64 = pool.get("totalValueLockedUSD")?.as_str()?.parse().ok()?;
        let volume: f64 = pool.get("volumeUSD")?.as_str()?.parse().ok()?;
        let fee_tier: u32 = pool.get("feeTier")?.as_str()?.parse().ok()?;
        let token0 = pool.get("token0")?;
        let asset = Address::from_str(token0.get("id")?.as_str()?).ok()?;
        let symbol = token0.get("symbol")?.as_str()?.to_string();

        if tvl <= 0.0 {
            return None;
        }

        Some(Opportunity {
            id: format!("uniswap_v3:{}", id),
            protocol: Protocol::UniswapV3,
            apr_percent: fee_apr_percent(volume, tvl, fee_tier),
            volatility: None,
            il_risk: Some(il_exposure(fee_tier)),
            tvl_usd: Some(tvl),
            gas_cost_usd,
            asset,
            asset_symbol: symbol,
            risk: risk_from_tvl(tvl),
        })
    }

    /// Quote amount-out through the quoter, then shave the slippage
    /// tolerance off it.
    async fn min_amount_out(&self, action: &PlanAction, wallet: Address) -> Result<U256> {
        let from = action
            .from_token
            .ok_or_else(|| Error::InvalidAction("swap requires from_token".to_string()))?;
        let to = action
            .to_token
            .ok_or_else(|| Error::InvalidAction("swap requires to_token".to_string()))?;

        let data = abi::encode_call(
            selectors::QUOTE_EXACT_INPUT_SINGLE,
            &[
                abi::word_address(from),
                abi::word_address(to),
                abi::word_u64(DEFAULT_FEE_TIER as u64),
                abi::word_u256(action.amount),
                abi::word_u64(0), // no price limit
            ],
        );
        let call = PreparedTransaction::new(self.settings.quoter, data, self.chain_id);
        let out = self.chain.call(&call, wallet).await?;
        let quoted = abi::decode_u256(&out, 0)
            .ok_or_else(|| Error::ChainRead("quoter returned short payload".to_string()))?;

        Ok(apply_slippage(quoted, action.slippage_bps))
    }
}

#[async_trait]
impl Connector for UniswapV3Connector {
    fn protocol(&self) -> Protocol {
        Protocol::UniswapV3
    }

    fn limits(&self) -> &ProtocolLimits {
        &self.limits
    }

    fn supported_kinds(&self) -> &'static [ActionKind] {
        &[
            ActionKind::Swap,
            ActionKind::AddLiquidity,
            ActionKind::RemoveLiquidity,
        ]
    }

    fn chain(&self) -> &Arc<dyn ChainAccess> {
        &self.chain
    }

    fn ledger(&self) -> &SharedLedger {
        &self.ledger
    }

    async fn discover_opportunities(&self) -> Result<Vec<Opportunity>> {
        let query = r#"
            query TopPools($first: Int!) {
                pools(
                    first: $first
                    orderBy: totalValueLockedUSD
                    orderDirection: desc
                ) {
                    id
                    token0 { id symbol decimals }
                    token1 { id symbol decimals }
                    feeTier
                    volumeUSD
                    totalValueLockedUSD
                }
            }
        "#;

        let data = self
            .query_subgraph(query, json!({ "first": self.settings.top_pools }))
            .await?;

        // Gas estimate needs live fee data; the chain reader being down is a
        // hard failure, not something to paper over with a number
        let fees = self.chain.fee_data().await?;
        let gas_cost_usd = fees.gas_cost_usd(ENTRY_GAS_UNITS, self.registry.native_price_usd());

        let pools = data
            .get("pools")
            .and_then(|p| p.as_array())
            .cloned()
            .unwrap_or_default();

        let mut opportunities = Vec::with_capacity(pools.len());
        for pool in &pools {
            match self.pool_to_opportunity(pool, gas_cost_usd) {
                Some(op) => opportunities.push(op),
                None => {
                    tracing::warn!(
                        pool = %pool.get("id").and_then(|v| v.as_str()).unwrap_or("?"),
                        "Skipping malformed pool entry"
                    );
                }
            }
        }

        tracing::info!(
            count = opportunities.len(),
            skipped = pools.len() - opportunities.len(),
            "Uniswap V3 discovery complete"
        );
        Ok(opportunities)
    }

    async fn read_positions(&self, wallet: Address) -> Result<Vec<Position>> {
        let query = r#"
            query WalletPositions($owner: String!) {
                positions(where: { owner: $owner, liquidity_gt: 0 }) {
                    id
                    liquidity
                    pool { id }
                    token0 { id symbol }
                    token1 { id symbol }
                    depositedToken0
                    depositedToken1
                    withdrawnToken0
                    withdrawnToken1
                }
            }
        "#;

        let owner = format!("{:#x}", wallet).to_lowercase();
        let data = self.query_subgraph(query, json!({ "owner": owner })).await?;

        let entries = data
            .get("positions")
            .and_then(|p| p.as_array())
            .cloned()
            .unwrap_or_default();

        let mut positions = Vec::new();
        for entry in &entries {
            match self.position_from_entry(entry) {
                Some(position) => positions.push(position),
                None => {
                    tracing::warn!(
                        position = %entry.get("id").and_then(|v| v.as_str()).unwrap_or("?"),
                        "Skipping position with unvaluable tokens"
                    );
                }
            }
        }
        Ok(positions)
    }

    async fn encode_action(
        &self,
        action: &PlanAction,
        wallet: Address,
    ) -> Result<PreparedTransaction> {
        match action.kind {
            ActionKind::Swap => {
                let from = action.from_token.ok_or_else(|| {
                    Error::InvalidAction("swap requires from_token".to_string())
                })?;
                let to = action
                    .to_token
                    .ok_or_else(|| Error::InvalidAction("swap requires to_token".to_string()))?;
                let min_out = self.min_amount_out(action, wallet).await?;

                let data = abi::encode_call(
                    selectors::EXACT_INPUT_SINGLE,
                    &[
                        abi::word_address(from),
                        abi::word_address(to),
                        abi::word_u64(DEFAULT_FEE_TIER as u64),
                        abi::word_address(wallet),
                        abi::word_u64(action.deadline_secs()),
                        abi::word_u256(action.amount),
                        abi::word_u256(min_out),
                        abi::word_u64(0), // sqrtPriceLimitX96
                    ],
                );
                Ok(PreparedTransaction::new(
                    self.settings.router,
                    data,
                    self.chain_id,
                ))
            }
            ActionKind::AddLiquidity => {
                let from = action.from_token.ok_or_else(|| {
                    Error::InvalidAction("add_liquidity requires from_token".to_string())
                })?;
                let pair = action.to_token.unwrap_or(from);
                // Pool token ordering is by address; the provided amount goes
                // on whichever side from_token lands
                let (token0, token1, from_is_token0) = if from <= pair {
                    (from, pair, true)
                } else {
                    (pair, from, false)
                };
                let desired = action.amount;
                let min = apply_slippage(desired, action.slippage_bps);
                let (amount0, amount1, min0, min1) = if from_is_token0 {
                    (desired, U256::ZERO, min, U256::ZERO)
                } else {
                    (U256::ZERO, desired, U256::ZERO, min)
                };

                let data = abi::encode_call(
                    selectors::MINT,
                    &[
                        abi::word_address(token0),
                        abi::word_address(token1),
                        abi::word_u64(DEFAULT_FEE_TIER as u64),
                        abi::word_i24(MIN_TICK),
                        abi::word_i24(MAX_TICK),
                        abi::word_u256(amount0),
                        abi::word_u256(amount1),
                        abi::word_u256(min0),
                        abi::word_u256(min1),
                        abi::word_address(wallet),
                        abi::word_u64(action.deadline_secs()),
                    ],
                );
                Ok(PreparedTransaction::new(
                    self.settings.position_manager,
                    data,
                    self.chain_id,
                ))
            }
            ActionKind::RemoveLiquidity => {
                let position_id = action.position_id.as_deref().ok_or_else(|| {
                    Error::InvalidAction("remove_liquidity requires position_id".to_string())
                })?;
                let token_id = U256::from_str_radix(position_id, 10).map_err(|_| {
                    Error::InvalidAction(format!("invalid position_id: {}", position_id))
                })?;

                let data = abi::encode_call(
                    selectors::DECREASE_LIQUIDITY,
                    &[
                        abi::word_u256(token_id),
                        abi::word_u256(action.amount),
                        abi::word_u256(U256::ZERO),
                        abi::word_u256(U256::ZERO),
                        abi::word_u64(action.deadline_secs()),
                    ],
                );
                Ok(PreparedTransaction::new(
                    self.settings.position_manager,
                    data,
                    self.chain_id,
                ))
            }
            other => Err(Error::UnsupportedAction(other)),
        }
    }
}

impl UniswapV3Connector {
    fn position_from_entry(&self, entry: &Value) -> Option<Position> {
        let id = entry.get("id")?.as_str()?;
        let liquidity = U256::from_str_radix(entry.get("liquidity")?.as_str()?, 10).ok()?;
        let token0 = entry.get("token0")?;
        let token1 = entry.get("token1")?;
        let addr0 = Address::from_str(token0.get("id")?.as_str()?).ok()?;
        let addr1 = Address::from_str(token1.get("id")?.as_str()?).ok()?;
        let symbol0 = token0.get("symbol")?.as_str()?;
        let symbol1 = token1.get("symbol")?.as_str()?;

        let net = |dep: &str, wd: &str| -> Option<f64> {
            let d: f64 = entry.get(dep)?.as_str()?.parse().ok()?;
            let w: f64 = entry.get(wd)?.as_str()?.parse().ok()?;
            Some((d - w).max(0.0))
        };
        let net0 = net("depositedToken0", "withdrawnToken0")?;
        let net1 = net("depositedToken1", "withdrawnToken1")?;

        // Both sides must be valuable; otherwise report the position as
        // unavailable rather than inventing a number
        let price0 = self.registry.get(&addr0)?.approx_price_usd?;
        let price1 = self.registry.get(&addr1)?.approx_price_usd?;

        Some(Position {
            id: format!("uniswap_v3:{}", id),
            protocol: Protocol::UniswapV3,
            asset: addr0,
            asset_symbol: format!("{}/{}", symbol0, symbol1),
            balance: liquidity,
            balance_usd: net0 * price0 + net1 * price1,
            apr_percent: None,
            health_factor: None,
        })
    }
}

/// Annualized fee APR in percent from 24h-ish cumulative figures.
fn fee_apr_percent(volume_usd: f64, tvl_usd: f64, fee_tier: u32) -> f64 {
    if tvl_usd <= 0.0 {
        return 0.0;
    }
    let daily_fees = volume_usd * (fee_tier as f64 / 1_000_000.0);
    (daily_fees / tvl_usd) * 365.0 * 100.0
}

/// Higher fee tiers exist for more volatile pairs; use that as a coarse
/// impermanent-loss exposure signal.
fn il_exposure(fee_tier: u32) -> f64 {
    match fee_tier {
        0..=500 => 0.05,
        501..=3_000 => 0.15,
        _ => 0.30,
    }
}

fn risk_from_tvl(tvl_usd: f64) -> RiskScore {
    if tvl_usd >= 10_000_000.0 {
        RiskScore::Low
    } else if tvl_usd >= 1_000_000.0 {
        RiskScore::Medium
    } else {
        RiskScore::High
    }
}

/// amount * (10000 - bps) / 10000, in integer space.
fn apply_slippage(amount: U256, slippage_bps: u32) -> U256 {
    let keep = U256::from(10_000u64.saturating_sub(slippage_bps as u64));
    amount * keep / U256::from(10_000u64)
}
