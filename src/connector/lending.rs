//! Aave V3 connector
//!
//! Discovery and positions come straight from on-chain reserve and account
//! data. Borrow/repay actions run a health-factor preflight that recomputes
//! the projected collateralization ratio from live account data before the
//! generic safety engine ever sees the action; the engine itself stays
//! protocol-agnostic.

use super::abi;
use super::Connector;
use crate::chain::{ChainAccess, ChainReader};
use crate::config::{LendingSettings, Protocol, ProtocolLimits, ReserveSettings};
use crate::ledger::SharedLedger;
use crate::model::{ActionKind, Opportunity, PlanAction, Position, PreparedTransaction, RiskScore};
use crate::tokens::{u256_to_f64, TokenRegistry};
use crate::{Error, Result};
use alloy::primitives::{Address, U256};
use async_trait::async_trait;
use std::sync::Arc;

mod selectors {
    /// Pool supply(address,uint256,address,uint16)
    pub const SUPPLY: [u8; 4] = [0x61, 0x7b, 0xa0, 0x37];
    /// Pool withdraw(address,uint256,address)
    pub const WITHDRAW: [u8; 4] = [0x69, 0x32, 0x8d, 0xec];
    /// Pool borrow(address,uint256,uint256,uint16,address)
    pub const BORROW: [u8; 4] = [0xa4, 0x15, 0xbc, 0xad];
    /// Pool repay(address,uint256,uint256,address)
    pub const REPAY: [u8; 4] = [0x57, 0x3a, 0xde, 0x81];
    /// Pool getUserAccountData(address)
    pub const GET_USER_ACCOUNT_DATA: [u8; 4] = [0xbf, 0x92, 0x85, 0x7c];
    /// Pool getReserveData(address)
    pub const GET_RESERVE_DATA: [u8; 4] = [0x35, 0xea, 0x6a, 0x75];
    /// ERC20 balanceOf(address)
    pub const BALANCE_OF: [u8; 4] = [0x70, 0xa0, 0x82, 0x31];
}

/// Variable-rate borrowing; stable mode is not offered here
const INTEREST_RATE_MODE_VARIABLE: u64 = 2;
/// Aave's base currency is USD with 8 decimals
const BASE_CURRENCY_UNIT: f64 = 1e8;
const SUPPLY_GAS_UNITS: u64 = 220_000;

/// getUserAccountData return values, base-currency units
#[derive(Debug, Clone, Copy)]
struct AccountData {
    total_collateral_base: U256,
    total_debt_base: U256,
    /// Basis points
    liquidation_threshold_bps: u64,
    /// Wad-scaled (1e18); U256::MAX when there is no debt
    health_factor: U256,
}

pub struct AaveV3Connector {
    chain: Arc<dyn ChainAccess>,
    limits: ProtocolLimits,
    ledger: SharedLedger,
    settings: LendingSettings,
    registry: Arc<TokenRegistry>,
    chain_id: u64,
}

impl AaveV3Connector {
    pub fn new(
        chain: Arc<dyn ChainAccess>,
        limits: ProtocolLimits,
        ledger: SharedLedger,
        settings: LendingSettings,
        registry: Arc<TokenRegistry>,
        chain_id: u64,
    ) -> Self {
        Self {
            chain,
            limits,
            ledger,
            settings,
            registry,
            chain_id,
        }
    }

    async fn account_data(&self, wallet: Address) -> Result<AccountData> {
        let data = abi::encode_call(
            selectors::GET_USER_ACCOUNT_DATA,
            &[abi::word_address(wallet)],
        );
        let call = PreparedTransaction::new(self.settings.pool, data, self.chain_id);
        let out = self.chain.call(&call, wallet).await?;

        let word = |i| {
            abi::decode_u256(&out, i)
                .ok_or_else(|| Error::ChainRead("short account data payload".to_string()))
        };
        Ok(AccountData {
            total_collateral_base: word(0)?,
            total_debt_base: word(1)?,
            liquidation_threshold_bps: word(3)?.saturating_to::<u64>(),
            health_factor: word(5)?,
        })
    }

    /// Supply and variable borrow rates for one reserve, in percent APR.
    async fn reserve_rates(&self, asset: Address) -> Result<(f64, f64)> {
        let data = abi::encode_call(selectors::GET_RESERVE_DATA, &[abi::word_address(asset)]);
        let call = PreparedTransaction::new(self.settings.pool, data, self.chain_id);
        let out = self.chain.call(&call, Address::ZERO).await?;

        let liquidity_rate = abi::decode_u256(&out, 2)
            .ok_or_else(|| Error::ChainRead("short reserve data payload".to_string()))?;
        let borrow_rate = abi::decode_u256(&out, 4)
            .ok_or_else(|| Error::ChainRead("short reserve data payload".to_string()))?;

        Ok((ray_to_percent(liquidity_rate), ray_to_percent(borrow_rate)))
    }

    async fn token_balance(&self, token: Address, wallet: Address) -> Result<U256> {
        let data = abi::encode_call(selectors::BALANCE_OF, &[abi::word_address(wallet)]);
        let call = PreparedTransaction::new(token, data, self.chain_id);
        let out = self.chain.call(&call, wallet).await?;
        abi::decode_u256(&out, 0)
            .ok_or_else(|| Error::ChainRead("short balanceOf payload".to_string()))
    }

    fn reserve_positions(
        &self,
        reserve: &ReserveSettings,
        a_balance: U256,
        debt_balance: U256,
        supply_apr: f64,
        borrow_apr: f64,
        health_factor: Option<f64>,
    ) -> Vec<Position> {
        let mut positions = Vec::new();

        if !a_balance.is_zero() {
            if let Some(usd) = self.registry.usd_value(&reserve.asset, a_balance) {
                positions.push(Position {
                    id: format!("aave_v3:supply:{}", reserve.symbol.to_lowercase()),
                    protocol: Protocol::AaveV3,
                    asset: reserve.asset,
                    asset_symbol: reserve.symbol.clone(),
                    balance: a_balance,
                    balance_usd: usd,
                    apr_percent: Some(supply_apr),
                    health_factor,
                });
            } else {
                tracing::warn!(symbol = %reserve.symbol, "Cannot value supply balance, omitting");
            }
        }

        if !debt_balance.is_zero() {
            if let Some(usd) = self.registry.usd_value(&reserve.asset, debt_balance) {
                positions.push(Position {
                    id: format!("aave_v3:debt:{}", reserve.symbol.to_lowercase()),
                    protocol: Protocol::AaveV3,
                    asset: reserve.asset,
                    asset_symbol: reserve.symbol.clone(),
                    balance: debt_balance,
                    balance_usd: -usd,
                    apr_percent: Some(-borrow_apr),
                    health_factor,
                });
            } else {
                tracing::warn!(symbol = %reserve.symbol, "Cannot value debt balance, omitting");
            }
        }

        positions
    }
}

#[async_trait]
impl Connector for AaveV3Connector {
    fn protocol(&self) -> Protocol {
        Protocol::AaveV3
    }

    fn limits(&self) -> &ProtocolLimits {
        &self.limits
    }

    fn supported_kinds(&self) -> &'static [ActionKind] {
        &[
            ActionKind::Supply,
            ActionKind::Withdraw,
            ActionKind::Borrow,
            ActionKind::Repay,
        ]
    }

    fn chain(&self) -> &Arc<dyn ChainAccess> {
        &self.chain
    }

    fn ledger(&self) -> &SharedLedger {
        &self.ledger
    }

    async fn discover_opportunities(&self) -> Result<Vec<Opportunity>> {
        let fees = self.chain.fee_data().await?;
        let gas_cost_usd = fees.gas_cost_usd(SUPPLY_GAS_UNITS, self.registry.native_price_usd());

        let mut opportunities = Vec::new();
        for reserve in &self.settings.reserves {
            let (supply_apr, borrow_apr) = match self.reserve_rates(reserve.asset).await {
                Ok(rates) => rates,
                Err(e) => {
                    tracing::warn!(symbol = %reserve.symbol, error = %e, "Skipping reserve");
                    continue;
                }
            };

            opportunities.push(Opportunity {
                id: format!("aave_v3:supply:{}", reserve.symbol.to_lowercase()),
                protocol: Protocol::AaveV3,
                apr_percent: supply_apr,
                volatility: None,
                il_risk: None,
                tvl_usd: None,
                gas_cost_usd,
                asset: reserve.asset,
                asset_symbol: reserve.symbol.clone(),
                risk: RiskScore::Low,
            });
            // Borrow side is a cost, reported as a negative rate
            opportunities.push(Opportunity {
                id: format!("aave_v3:borrow:{}", reserve.symbol.to_lowercase()),
                protocol: Protocol::AaveV3,
                apr_percent: -borrow_apr,
                volatility: None,
                il_risk: None,
                tvl_usd: None,
                gas_cost_usd,
                asset: reserve.asset,
                asset_symbol: reserve.symbol.clone(),
                risk: RiskScore::Medium,
            });
        }
        Ok(opportunities)
    }

    async fn read_positions(&self, wallet: Address) -> Result<Vec<Position>> {
        // Account-level ratio; attached to every lending position it covers
        let health_factor = match self.account_data(wallet).await {
            Ok(account) => wad_health_factor(account.health_factor, account.total_debt_base),
            Err(e) => {
                tracing::warn!(error = %e, "Account data unavailable, positions carry no health factor");
                None
            }
        };

        let mut positions = Vec::new();
        for reserve in &self.settings.reserves {
            let a_balance = match self.token_balance(reserve.a_token, wallet).await {
                Ok(balance) => balance,
                Err(e) => {
                    tracing::warn!(symbol = %reserve.symbol, error = %e, "Skipping reserve read");
                    continue;
                }
            };
            let debt_balance = match self.token_balance(reserve.variable_debt_token, wallet).await
            {
                Ok(balance) => balance,
                Err(e) => {
                    tracing::warn!(symbol = %reserve.symbol, error = %e, "Skipping reserve read");
                    continue;
                }
            };

            if a_balance.is_zero() && debt_balance.is_zero() {
                continue;
            }

            let (supply_apr, borrow_apr) = match self.reserve_rates(reserve.asset).await {
                Ok(rates) => rates,
                Err(_) => (0.0, 0.0),
            };

            positions.extend(self.reserve_positions(
                reserve,
                a_balance,
                debt_balance,
                supply_apr,
                borrow_apr,
                health_factor,
            ));
        }
        Ok(positions)
    }

    /// Recomputes the projected health factor for debt-changing actions from
    /// live account data and blocks anything that would land below the
    /// configured minimum, before any transaction is built.
    async fn preflight(&self, action: &PlanAction, wallet: Address) -> Result<()> {
        if !matches!(action.kind, ActionKind::Borrow | ActionKind::Repay) {
            return Ok(());
        }
        let Some(min_health_factor) = self.limits.min_health_factor else {
            return Ok(());
        };

        let account = self.account_data(wallet).await?;
        let projected = projected_health_factor(
            u256_to_f64(account.total_collateral_base),
            u256_to_f64(account.total_debt_base),
            account.liquidation_threshold_bps,
            action.amount_usd * BASE_CURRENCY_UNIT,
            action.kind == ActionKind::Borrow,
        );

        if projected < min_health_factor {
            return Err(Error::Validation(format!(
                "health factor {:.2} after {} is below minimum {:.2}",
                projected, action.kind, min_health_factor
            )));
        }

        tracing::debug!(
            projected_health_factor = projected,
            min_health_factor,
            kind = %action.kind,
            "Health factor preflight passed"
        );
        Ok(())
    }

    async fn encode_action(
        &self,
        action: &PlanAction,
        wallet: Address,
    ) -> Result<PreparedTransaction> {
        let data = match action.kind {
            ActionKind::Supply => {
                let asset = action.from_token.ok_or_else(|| {
                    Error::InvalidAction("supply requires from_token".to_string())
                })?;
                abi::encode_call(
                    selectors::SUPPLY,
                    &[
                        abi::word_address(asset),
                        abi::word_u256(action.amount),
                        abi::word_address(wallet),
                        abi::word_u64(0), // referral code
                    ],
                )
            }
            ActionKind::Withdraw => {
                let asset = action.from_token.ok_or_else(|| {
                    Error::InvalidAction("withdraw requires from_token".to_string())
                })?;
                abi::encode_call(
                    selectors::WITHDRAW,
                    &[
                        abi::word_address(asset),
                        abi::word_u256(action.amount),
                        abi::word_address(wallet),
                    ],
                )
            }
            ActionKind::Borrow => {
                let asset = action
                    .to_token
                    .ok_or_else(|| Error::InvalidAction("borrow requires to_token".to_string()))?;
                abi::encode_call(
                    selectors::BORROW,
                    &[
                        abi::word_address(asset),
                        abi::word_u256(action.amount),
                        abi::word_u64(INTEREST_RATE_MODE_VARIABLE),
                        abi::word_u64(0), // referral code
                        abi::word_address(wallet),
                    ],
                )
            }
            ActionKind::Repay => {
                let asset = action.from_token.ok_or_else(|| {
                    Error::InvalidAction("repay requires from_token".to_string())
                })?;
                abi::encode_call(
                    selectors::REPAY,
                    &[
                        abi::word_address(asset),
                        abi::word_u256(action.amount),
                        abi::word_u64(INTEREST_RATE_MODE_VARIABLE),
                        abi::word_address(wallet),
                    ],
                )
            }
            other => return Err(Error::UnsupportedAction(other)),
        };

        Ok(PreparedTransaction::new(
            self.settings.pool,
            data,
            self.chain_id,
        ))
    }
}

/// Ray-scaled (1e27) per-second-compounded rate to percent APR. The linear
/// approximation is what the protocol UI shows too.
fn ray_to_percent(rate: U256) -> f64 {
    u256_to_f64(rate) / 1e27 * 100.0
}

/// Account health factor as a float, None when there is no debt (the chain
/// reports U256::MAX).
fn wad_health_factor(health_factor: U256, total_debt_base: U256) -> Option<f64> {
    if total_debt_base.is_zero() {
        return None;
    }
    Some(u256_to_f64(health_factor) / 1e18)
}

/// Collateralization ratio after applying a debt delta, all figures in
/// base-currency units.
fn projected_health_factor(
    collateral_base: f64,
    debt_base: f64,
    liquidation_threshold_bps: u64,
    delta_base: f64,
    is_borrow: bool,
) -> f64 {
    let new_debt = if is_borrow {
        debt_base + delta_base
    } else {
        (debt_base - delta_base).max(0.0)
    };
    if new_debt <= 0.0 {
        return f64::INFINITY;
    }
    let weighted_collateral = collateral_base * (liquidation_threshold_bps as f64 / 10_000.0);
    weighted_collateral / new_debt
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::DailyLedger;
    use crate::model::{ExecutionReceipt, FeeData};
    use alloy::network::EthereumWallet;
    use alloy::primitives::Bytes;
    use chrono::{TimeZone, Utc};

    #[test]
    fn ray_rate_converts_to_percent() {
        // 0.05 ray-scaled = 5%
        let five_percent = U256::from(10u64).pow(U256::from(27u64)) / U256::from(20u64);
        assert!((ray_to_percent(five_percent) - 5.0).abs() < 1e-9);
    }

    #[test]
    fn no_debt_means_no_health_factor() {
        assert!(wad_health_factor(U256::MAX, U256::ZERO).is_none());
        let hf = wad_health_factor(U256::from(1_500_000_000_000_000_000u128), U256::from(1u64));
        assert!((hf.unwrap() - 1.5).abs() < 1e-9);
    }

    #[test]
    fn borrow_lowers_projected_health_factor() {
        // $10k collateral at 80% threshold, $5k debt => HF 1.6
        let before = projected_health_factor(10_000e8, 5_000e8, 8_000, 0.0, true);
        assert!((before - 1.6).abs() < 1e-9);

        // Borrowing another $2k => 8000/7000 ≈ 1.14
        let after = projected_health_factor(10_000e8, 5_000e8, 8_000, 2_000e8, true);
        assert!(after < 1.3);

        // Repaying everything => no debt left
        let cleared = projected_health_factor(10_000e8, 5_000e8, 8_000, 5_000e8, false);
        assert!(cleared.is_infinite());
    }

    /// Chain stub answering account-data calls with a configurable snapshot.
    struct AccountChain {
        collateral_base: U256,
        debt_base: U256,
        liq_threshold_bps: u64,
    }

    #[async_trait]
    impl crate::chain::ChainReader for AccountChain {
        async fn call(&self, tx: &PreparedTransaction, _from: Address) -> Result<Bytes> {
            if tx.data.len() >= 4 && tx.data[..4] == selectors::GET_USER_ACCOUNT_DATA {
                let mut payload = Vec::new();
                payload.extend_from_slice(&abi::word_u256(self.collateral_base));
                payload.extend_from_slice(&abi::word_u256(self.debt_base));
                payload.extend_from_slice(&abi::word_u256(U256::ZERO));
                payload.extend_from_slice(&abi::word_u64(self.liq_threshold_bps));
                payload.extend_from_slice(&abi::word_u64(7_500));
                payload.extend_from_slice(&abi::word_u256(U256::from(
                    1_600_000_000_000_000_000u128,
                )));
                return Ok(Bytes::from(payload));
            }
            Err(Error::ChainRead("unexpected call".to_string()))
        }

        async fn estimate_gas(&self, _tx: &PreparedTransaction, _from: Address) -> Result<u64> {
            Ok(200_000)
        }

        async fn get_balance(&self, _address: Address) -> Result<U256> {
            Ok(U256::ZERO)
        }

        async fn fee_data(&self) -> Result<FeeData> {
            Ok(FeeData {
                gas_price: 20_000_000_000,
            })
        }
    }

    #[async_trait]
    impl crate::chain::ChainWriter for AccountChain {
        async fn send_transaction(
            &self,
            _tx: &PreparedTransaction,
            _wallet: &EthereumWallet,
        ) -> Result<ExecutionReceipt> {
            Err(Error::Send("not wired in tests".to_string()))
        }
    }

    fn connector(chain: AccountChain) -> AaveV3Connector {
        AaveV3Connector::new(
            Arc::new(chain),
            ProtocolLimits {
                min_health_factor: Some(1.3),
                ..ProtocolLimits::default()
            },
            DailyLedger::shared(),
            LendingSettings::default(),
            Arc::new(TokenRegistry::new()),
            1,
        )
    }

    fn borrow_action(amount_usd: f64) -> PlanAction {
        PlanAction {
            kind: ActionKind::Borrow,
            protocol: Protocol::AaveV3,
            from_token: None,
            to_token: Some(crate::tokens::addresses::USDC),
            position_id: None,
            amount: U256::from(2_000_000_000u64),
            amount_usd,
            slippage_bps: 0,
            deadline: Utc.timestamp_opt(2_000_000_000, 0).unwrap(),
            gas_estimate: None,
            gas_cost_usd: None,
            risk: RiskScore::Medium,
        }
    }

    #[tokio::test]
    async fn preflight_blocks_borrow_below_minimum() {
        // $10k collateral at 80%, $5k debt; borrowing $2k projects ~1.14
        let connector = connector(AccountChain {
            collateral_base: U256::from(1_000_000_000_000u64), // $10k, 8 decimals
            debt_base: U256::from(500_000_000_000u64),         // $5k
            liq_threshold_bps: 8_000,
        });

        let err = connector
            .preflight(&borrow_action(2_000.0), Address::ZERO)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
        assert!(err.to_string().contains("health factor"));
    }

    #[tokio::test]
    async fn preflight_allows_safe_borrow() {
        let connector = connector(AccountChain {
            collateral_base: U256::from(1_000_000_000_000u64),
            debt_base: U256::from(100_000_000_000u64), // $1k debt
            liq_threshold_bps: 8_000,
        });

        // $1k more debt => 8000/2000 = 4.0
        connector
            .preflight(&borrow_action(1_000.0), Address::ZERO)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn preflight_ignores_non_debt_actions() {
        // Account data is never read for supply, so a failing chain is fine
        let connector = connector(AccountChain {
            collateral_base: U256::ZERO,
            debt_base: U256::ZERO,
            liq_threshold_bps: 0,
        });

        let mut action = borrow_action(100.0);
        action.kind = ActionKind::Supply;
        action.from_token = Some(crate::tokens::addresses::USDC);
        action.to_token = None;
        connector.preflight(&action, Address::ZERO).await.unwrap();
    }

    #[tokio::test]
    async fn encode_rejects_unsupported_kind() {
        let connector = connector(AccountChain {
            collateral_base: U256::ZERO,
            debt_base: U256::ZERO,
            liq_threshold_bps: 0,
        });

        let mut action = borrow_action(100.0);
        action.kind = ActionKind::Swap;
        let err = connector
            .encode_action(&action, Address::ZERO)
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Unsupported action type: swap");
    }

    #[tokio::test]
    async fn borrow_encodes_variable_rate_mode() {
        let connector = connector(AccountChain {
            collateral_base: U256::ZERO,
            debt_base: U256::ZERO,
            liq_threshold_bps: 0,
        });

        let tx = connector
            .encode_action(&borrow_action(100.0), Address::repeat_byte(7))
            .await
            .unwrap();
        assert_eq!(tx.to, LendingSettings::default().pool);
        assert_eq!(&tx.data[..4], &selectors::BORROW);
        // Third parameter word is the interest rate mode
        let mode = abi::decode_u256(&tx.data[4..], 2).unwrap();
        assert_eq!(mode, U256::from(INTEREST_RATE_MODE_VARIABLE));
    }
}
