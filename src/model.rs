//! Shared data model for the aggregation pipeline
//!
//! Everything here is a value object: opportunities and positions are
//! snapshots regenerated on every read, plan actions are consumed exactly
//! once by the pipeline. Token amounts stay in `U256` base units throughout;
//! floats appear only for already-scaled USD and APR figures.

use crate::config::Protocol;
use crate::{Error, Result};
use alloy::primitives::{Address, Bytes, U256};
use alloy::rpc::types::TransactionRequest;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The closed set of operations a planner may propose.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    Swap,
    AddLiquidity,
    RemoveLiquidity,
    Supply,
    Withdraw,
    Borrow,
    Repay,
    VaultDeposit,
    VaultWithdraw,
}

impl ActionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionKind::Swap => "swap",
            ActionKind::AddLiquidity => "add_liquidity",
            ActionKind::RemoveLiquidity => "remove_liquidity",
            ActionKind::Supply => "supply",
            ActionKind::Withdraw => "withdraw",
            ActionKind::Borrow => "borrow",
            ActionKind::Repay => "repay",
            ActionKind::VaultDeposit => "vault_deposit",
            ActionKind::VaultWithdraw => "vault_withdraw",
        }
    }
}

impl std::fmt::Display for ActionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Protocol-assigned risk ordinal, low to high.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskScore {
    Low,
    Medium,
    High,
}

impl RiskScore {
    /// Numeric ordinal for averaging across heterogeneous opportunity sets.
    pub fn ordinal(&self) -> u8 {
        match self {
            RiskScore::Low => 0,
            RiskScore::Medium => 1,
            RiskScore::High => 2,
        }
    }
}

/// A discoverable yield source, regenerated on every discovery call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Opportunity {
    /// Stable identifier, unique per protocol + instrument
    pub id: String,
    pub protocol: Protocol,
    /// Annualized rate in percent; negative means a cost (e.g. borrowing)
    pub apr_percent: f64,
    pub volatility: Option<f64>,
    /// Estimated impermanent-loss exposure, 0.0..=1.0
    pub il_risk: Option<f64>,
    pub tvl_usd: Option<f64>,
    /// Estimated gas cost to enter, in USD
    pub gas_cost_usd: f64,
    /// Underlying asset
    pub asset: Address,
    pub asset_symbol: String,
    pub risk: RiskScore,
}

/// A wallet's existing stake in a protocol, fresh per read.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub id: String,
    pub protocol: Protocol,
    pub asset: Address,
    pub asset_symbol: String,
    /// Raw balance in base units
    pub balance: U256,
    pub balance_usd: f64,
    pub apr_percent: Option<f64>,
    /// Collateralization ratio; lending positions only. Below 1.0 implies
    /// liquidation risk.
    pub health_factor: Option<f64>,
}

/// A proposed operation awaiting validation and execution.
///
/// Constructed by a planner outside this crate and consumed exactly once by
/// an [`crate::pipeline::ActionPipeline`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanAction {
    pub kind: ActionKind,
    pub protocol: Protocol,
    pub from_token: Option<Address>,
    pub to_token: Option<Address>,
    /// Targets an existing instrument (LP position id, vault address) for
    /// remove-liquidity and vault-withdraw kinds
    pub position_id: Option<String>,
    /// Base units, unsigned
    pub amount: U256,
    pub amount_usd: f64,
    /// Slippage tolerance in basis points, 0..=10000
    pub slippage_bps: u32,
    /// Absolute expiry for the encoded call
    pub deadline: DateTime<Utc>,
    pub gas_estimate: Option<u64>,
    pub gas_cost_usd: Option<f64>,
    pub risk: RiskScore,
}

impl PlanAction {
    /// Checks that the token fields agree with the action kind and that the
    /// scalar fields are in range. The pipeline runs this before anything
    /// else touches the action.
    pub fn ensure_shape(&self) -> Result<()> {
        if self.amount.is_zero() {
            return Err(Error::InvalidAction("amount must be non-zero".to_string()));
        }
        if self.slippage_bps > 10_000 {
            return Err(Error::InvalidAction(format!(
                "slippage {} bps exceeds 10000",
                self.slippage_bps
            )));
        }
        if self.amount_usd < 0.0 {
            return Err(Error::InvalidAction("amount_usd must not be negative".to_string()));
        }

        let require = |field: Option<Address>, name: &str| -> Result<()> {
            if field.is_none() {
                return Err(Error::InvalidAction(format!(
                    "{} requires {}",
                    self.kind, name
                )));
            }
            Ok(())
        };
        let forbid = |field: Option<Address>, name: &str| -> Result<()> {
            if field.is_some() {
                return Err(Error::InvalidAction(format!(
                    "{} has no meaningful {}",
                    self.kind, name
                )));
            }
            Ok(())
        };

        match self.kind {
            ActionKind::Swap => {
                require(self.from_token, "from_token")?;
                require(self.to_token, "to_token")?;
            }
            ActionKind::AddLiquidity => {
                require(self.from_token, "from_token")?;
            }
            ActionKind::RemoveLiquidity => {
                if self.position_id.is_none() {
                    return Err(Error::InvalidAction(
                        "remove_liquidity requires position_id".to_string(),
                    ));
                }
            }
            ActionKind::Supply | ActionKind::Withdraw | ActionKind::Repay => {
                require(self.from_token, "from_token")?;
                forbid(self.to_token, "to_token")?;
            }
            ActionKind::Borrow => {
                forbid(self.from_token, "from_token")?;
                require(self.to_token, "to_token")?;
            }
            ActionKind::VaultDeposit | ActionKind::VaultWithdraw => {
                require(self.from_token, "from_token")?;
                require(self.to_token, "to_token")?;
            }
        }
        Ok(())
    }

    /// Deadline as unix seconds for calldata encoding.
    pub fn deadline_secs(&self) -> u64 {
        self.deadline.timestamp().max(0) as u64
    }
}

/// A built, unsigned call ready for dry-run, estimation, and signing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreparedTransaction {
    pub to: Address,
    pub data: Bytes,
    pub value: U256,
    pub gas_limit: Option<u64>,
    pub chain_id: u64,
}

impl PreparedTransaction {
    pub fn new(to: Address, data: Bytes, chain_id: u64) -> Self {
        Self {
            to,
            data,
            value: U256::ZERO,
            gas_limit: None,
            chain_id,
        }
    }

    /// Converts to an alloy request with `from` set for simulation or send.
    pub fn to_request(&self, from: Address) -> TransactionRequest {
        let mut req = TransactionRequest::default()
            .from(from)
            .to(self.to)
            .input(self.data.clone().into())
            .value(self.value);
        if let Some(gas) = self.gas_limit {
            req = req.gas_limit(gas);
        }
        req
    }
}

/// Outcome of replaying a transaction against current chain state without
/// committing it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DryRunResult {
    pub success: bool,
    pub gas_used: Option<u64>,
    pub revert_reason: Option<String>,
    pub return_data: Option<String>,
}

impl DryRunResult {
    pub fn success(gas_used: Option<u64>, return_data: Option<String>) -> Self {
        Self {
            success: true,
            gas_used,
            revert_reason: None,
            return_data,
        }
    }

    pub fn failed(reason: String) -> Self {
        Self {
            success: false,
            gas_used: None,
            revert_reason: Some(reason),
            return_data: None,
        }
    }
}

/// What `build_transaction` hands back to the caller.
#[derive(Debug, Clone)]
pub struct BuildOutcome {
    pub transaction: PreparedTransaction,
    pub dry_run: DryRunResult,
}

/// Summary of a mined receipt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionReceipt {
    pub tx_hash: String,
    pub block_number: Option<u64>,
    pub gas_used: u64,
    pub success: bool,
}

/// Current network fee conditions.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct FeeData {
    /// Legacy/base gas price in wei
    pub gas_price: u128,
}

impl FeeData {
    /// USD cost of `gas_units` at this gas price, given a native-token price.
    pub fn gas_cost_usd(&self, gas_units: u64, native_price_usd: f64) -> f64 {
        let wei = self.gas_price.saturating_mul(gas_units as u128);
        (wei as f64 / 1e18) * native_price_usd
    }
}
