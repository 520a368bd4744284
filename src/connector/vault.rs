//! ERC-4626 vault connector (Yearn V3 style)
//!
//! APR and TVL come from the vault registry API; share prices and balances
//! are read on-chain so the registry can never claim a vault the chain does
//! not back. A vault that fails either read is omitted from discovery rather
//! than reported with made-up numbers.

use super::abi;
use super::Connector;
use crate::chain::{ChainAccess, ChainReader};
use crate::config::{Protocol, ProtocolLimits, VaultSettings, VaultsSettings};
use crate::ledger::SharedLedger;
use crate::model::{ActionKind, Opportunity, PlanAction, Position, PreparedTransaction, RiskScore};
use crate::tokens::TokenRegistry;
use crate::{Error, Result};
use alloy::primitives::{Address, U256};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use std::str::FromStr;
use std::sync::Arc;

mod selectors {
    /// ERC-4626 deposit(uint256,address)
    pub const DEPOSIT: [u8; 4] = [0x6e, 0x55, 0x3f, 0x65];
    /// ERC-4626 withdraw(uint256,address,address)
    pub const WITHDRAW: [u8; 4] = [0xb4, 0x60, 0xaf, 0x94];
    /// ERC-4626 convertToAssets(uint256)
    pub const CONVERT_TO_ASSETS: [u8; 4] = [0x07, 0xa2, 0xd1, 0x3a];
    /// ERC20 balanceOf(address)
    pub const BALANCE_OF: [u8; 4] = [0x70, 0xa0, 0x82, 0x31];
}

const DEPOSIT_GAS_UNITS: u64 = 180_000;

pub struct VaultConnector {
    chain: Arc<dyn ChainAccess>,
    limits: ProtocolLimits,
    ledger: SharedLedger,
    http: Client,
    settings: VaultsSettings,
    registry: Arc<TokenRegistry>,
    chain_id: u64,
}

impl VaultConnector {
    pub fn new(
        chain: Arc<dyn ChainAccess>,
        limits: ProtocolLimits,
        ledger: SharedLedger,
        settings: VaultsSettings,
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

    fn vault_config(&self, vault: Address) -> Option<&VaultSettings> {
        self.settings.vaults.iter().find(|v| v.vault == vault)
    }

    async fn fetch_registry(&self) -> Result<Vec<Value>> {
        let response = self.http.get(&self.settings.api_url).send().await?;
        let entries: Value = response.json().await?;
        entries
            .as_array()
            .cloned()
            .ok_or_else(|| Error::ChainRead("vault API did not return an array".to_string()))
    }

    /// One share's worth of underlying, straight from the vault contract.
    async fn share_price(&self, vault: &VaultSettings) -> Result<U256> {
        let one_share = U256::from(10u64).pow(U256::from(vault.decimals));
        let data = abi::encode_call(selectors::CONVERT_TO_ASSETS, &[abi::word_u256(one_share)]);
        let call = PreparedTransaction::new(vault.vault, data, self.chain_id);
        let out = self.chain.call(&call, Address::ZERO).await?;
        abi::decode_u256(&out, 0)
            .ok_or_else(|| Error::ChainRead("short convertToAssets payload".to_string()))
    }

    async fn share_balance(&self, vault: &VaultSettings, wallet: Address) -> Result<U256> {
        let data = abi::encode_call(selectors::BALANCE_OF, &[abi::word_address(wallet)]);
        let call = PreparedTransaction::new(vault.vault, data, self.chain_id);
        let out = self.chain.call(&call, wallet).await?;
        abi::decode_u256(&out, 0)
            .ok_or_else(|| Error::ChainRead("short balanceOf payload".to_string()))
    }

    async fn assets_for_shares(&self, vault: &VaultSettings, shares: U256) -> Result<U256> {
        let data = abi::encode_call(selectors::CONVERT_TO_ASSETS, &[abi::word_u256(shares)]);
        let call = PreparedTransaction::new(vault.vault, data, self.chain_id);
        let out = self.chain.call(&call, Address::ZERO).await?;
        abi::decode_u256(&out, 0)
            .ok_or_else(|| Error::ChainRead("short convertToAssets payload".to_string()))
    }
}

#[async_trait]
impl Connector for VaultConnector {
    fn protocol(&self) -> Protocol {
        Protocol::YearnV3
    }

    fn limits(&self) -> &ProtocolLimits {
        &self.limits
    }

    fn supported_kinds(&self) -> &'static [ActionKind] {
        &[ActionKind::VaultDeposit, ActionKind::VaultWithdraw]
    }

    fn chain(&self) -> &Arc<dyn ChainAccess> {
        &self.chain
    }

    fn ledger(&self) -> &SharedLedger {
        &self.ledger
    }

    async fn discover_opportunities(&self) -> Result<Vec<Opportunity>> {
        let entries = self.fetch_registry().await?;
        let fees = self.chain.fee_data().await?;
        let gas_cost_usd = fees.gas_cost_usd(DEPOSIT_GAS_UNITS, self.registry.native_price_usd());

        let mut opportunities = Vec::new();
        for vault in &self.settings.vaults {
            let Some(entry) = find_entry(&entries, vault.vault) else {
                tracing::warn!(vault = %vault.vault, "Vault missing from registry API, skipping");
                continue;
            };

            // Cross-check the contract actually prices shares before trusting
            // the registry's yield figure
            if let Err(e) = self.share_price(vault).await {
                tracing::warn!(vault = %vault.vault, error = %e, "Share price read failed, skipping");
                continue;
            }

            let Some(apr_percent) = entry_apr_percent(entry) else {
                tracing::warn!(vault = %vault.vault, "Registry entry has no APR, skipping");
                continue;
            };
            let tvl_usd = entry
                .get("tvl")
                .and_then(|t| t.get("tvl"))
                .and_then(|v| v.as_f64());

            opportunities.push(Opportunity {
                id: format!("yearn_v3:{:#x}", vault.vault),
                protocol: Protocol::YearnV3,
                apr_percent,
                volatility: None,
                il_risk: None,
                tvl_usd,
                gas_cost_usd,
                asset: vault.asset,
                asset_symbol: vault.symbol.clone(),
                risk: risk_from_tvl(tvl_usd),
            });
        }
        Ok(opportunities)
    }

    async fn read_positions(&self, wallet: Address) -> Result<Vec<Position>> {
        let mut positions = Vec::new();
        for vault in &self.settings.vaults {
            let shares = match self.share_balance(vault, wallet).await {
                Ok(shares) => shares,
                Err(e) => {
                    tracing::warn!(vault = %vault.vault, error = %e, "Skipping vault read");
                    continue;
                }
            };
            if shares.is_zero() {
                continue;
            }

            let assets = match self.assets_for_shares(vault, shares).await {
                Ok(assets) => assets,
                Err(e) => {
                    tracing::warn!(vault = %vault.vault, error = %e, "Skipping vault read");
                    continue;
                }
            };

            let Some(balance_usd) = self.registry.usd_value(&vault.asset, assets) else {
                tracing::warn!(vault = %vault.vault, "Cannot value underlying, omitting");
                continue;
            };

            positions.push(Position {
                id: format!("yearn_v3:{:#x}", vault.vault),
                protocol: Protocol::YearnV3,
                asset: vault.asset,
                asset_symbol: vault.symbol.clone(),
                balance: shares,
                balance_usd,
                apr_percent: None,
                health_factor: None,
            });
        }
        Ok(positions)
    }

    async fn encode_action(
        &self,
        action: &PlanAction,
        wallet: Address,
    ) -> Result<PreparedTransaction> {
        match action.kind {
            ActionKind::VaultDeposit => {
                let vault_addr = action.to_token.ok_or_else(|| {
                    Error::InvalidAction("vault_deposit requires to_token (the vault)".to_string())
                })?;
                let vault = self.vault_config(vault_addr).ok_or_else(|| {
                    Error::InvalidAction(format!("unknown vault: {:#x}", vault_addr))
                })?;

                let data = abi::encode_call(
                    selectors::DEPOSIT,
                    &[abi::word_u256(action.amount), abi::word_address(wallet)],
                );
                Ok(PreparedTransaction::new(vault.vault, data, self.chain_id))
            }
            ActionKind::VaultWithdraw => {
                let vault_addr = action.from_token.ok_or_else(|| {
                    Error::InvalidAction(
                        "vault_withdraw requires from_token (the vault)".to_string(),
                    )
                })?;
                let vault = self.vault_config(vault_addr).ok_or_else(|| {
                    Error::InvalidAction(format!("unknown vault: {:#x}", vault_addr))
                })?;

                let data = abi::encode_call(
                    selectors::WITHDRAW,
                    &[
                        abi::word_u256(action.amount),
                        abi::word_address(wallet),
                        abi::word_address(wallet),
                    ],
                );
                Ok(PreparedTransaction::new(vault.vault, data, self.chain_id))
            }
            other => Err(Error::UnsupportedAction(other)),
        }
    }
}

fn find_entry(entries: &[Value], vault: Address) -> Option<&Value> {
    entries.iter().find(|entry| {
        entry
            .get("address")
            .and_then(|a| a.as_str())
            .and_then(|a| Address::from_str(a).ok())
            .map(|a| a == vault)
            .unwrap_or(false)
    })
}

/// Net APR from a registry entry, as percent. The API reports a fraction.
fn entry_apr_percent(entry: &Value) -> Option<f64> {
    entry
        .get("apr")
        .and_then(|a| a.get("netAPR"))
        .and_then(|v| v.as_f64())
        .map(|fraction| fraction * 100.0)
}

fn risk_from_tvl(tvl_usd: Option<f64>) -> RiskScore {
    match tvl_usd {
        Some(tvl) if tvl >= 10_000_000.0 => RiskScore::Low,
        Some(tvl) if tvl >= 1_000_000.0 => RiskScore::Medium,
        _ => RiskScore::High,
    }
}
