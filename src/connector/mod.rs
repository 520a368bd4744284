//! Protocol connector capability
//!
//! One trait, N heterogeneous backends. The aggregator and the action
//! pipeline hold only `Arc<dyn Connector>` and never branch on a concrete
//! protocol; all protocol-kind branching lives inside the adapter modules.
//! Adding a protocol means adding a module here, never touching shared code.
//!
//! The build → dry-run → estimate and send lifecycles are provided methods so
//! every adapter gets them identically; adapters implement discovery,
//! position reads, calldata encoding, and (for lending) an overlay preflight.

pub mod abi;
pub mod dex;
pub mod lending;
pub mod vault;

use crate::chain::{self, ChainAccess, ChainReader, ChainWriter};
use crate::config::{Protocol, ProtocolLimits};
use crate::ledger::SharedLedger;
use crate::model::{
    ActionKind, BuildOutcome, ExecutionReceipt, Opportunity, PlanAction, Position,
    PreparedTransaction,
};
use crate::safety::SafetyEngine;
use crate::wallet::Signer;
use crate::{Error, Result};
use alloy::primitives::Address;
use async_trait::async_trait;
use std::sync::Arc;

pub use dex::UniswapV3Connector;
pub use lending::AaveV3Connector;
pub use vault::VaultConnector;

#[async_trait]
pub trait Connector: Send + Sync {
    fn protocol(&self) -> Protocol;

    fn limits(&self) -> &ProtocolLimits;

    /// Action kinds this adapter can encode. Everything else fails fast.
    fn supported_kinds(&self) -> &'static [ActionKind];

    fn chain(&self) -> &Arc<dyn ChainAccess>;

    /// This protocol's daily-usage ledger. Ledgers are per protocol;
    /// adapters never share one.
    fn ledger(&self) -> &SharedLedger;

    /// Best-effort discovery: an element that fails to read is omitted with a
    /// warning, never a hard failure. Only total backend unavailability
    /// errors.
    async fn discover_opportunities(&self) -> Result<Vec<Opportunity>>;

    /// Same partial-failure tolerance as discovery; a wallet with nothing in
    /// this protocol yields an empty vec.
    async fn read_positions(&self, wallet: Address) -> Result<Vec<Position>>;

    /// Protocol-specific overlay checks that must run before the generic
    /// safety engine (health-factor recomputation for lending). Default: no
    /// overlay.
    async fn preflight(&self, _action: &PlanAction, _wallet: Address) -> Result<()> {
        Ok(())
    }

    /// Pure protocol-specific encoding of `action` into a call. May read
    /// chain state (e.g. a quote) but never mutates it.
    async fn encode_action(
        &self,
        action: &PlanAction,
        wallet: Address,
    ) -> Result<PreparedTransaction>;

    fn supports(&self, kind: ActionKind) -> bool {
        self.supported_kinds().contains(&kind)
    }

    /// The build lifecycle, identical for every adapter: shape check,
    /// unsupported-kind fail-fast, overlay preflight, safety evaluation with
    /// the current ledger total, encode, dry-run, gas estimate.
    ///
    /// A dry-run revert is returned inside the outcome rather than raised;
    /// whether to continue is the caller's policy. Builds are idempotent and
    /// have no on-chain side effects.
    async fn build_transaction(
        &self,
        action: &PlanAction,
        wallet: Address,
    ) -> Result<BuildOutcome> {
        action.ensure_shape()?;
        if !self.supports(action.kind) {
            return Err(Error::UnsupportedAction(action.kind));
        }
        self.preflight(action, wallet).await?;

        let usage = self.ledger().write().await.current_total();
        let check = SafetyEngine::evaluate(action, self.limits(), usage);
        if !check.passed {
            return Err(Error::Validation(check.reason_or_ok().to_string()));
        }

        let mut tx = self.encode_action(action, wallet).await?;
        let mut dry = chain::dry_run(self.chain().as_ref(), &tx, wallet).await;

        if dry.success {
            let gas = self.chain().estimate_gas(&tx, wallet).await?;
            tx.gas_limit = Some(gas);
            dry.gas_used = Some(gas);
        } else {
            tracing::warn!(
                protocol = %self.protocol(),
                kind = %action.kind,
                reason = dry.revert_reason.as_deref().unwrap_or("unknown"),
                "Dry run reverted; skipping gas estimation"
            );
        }

        Ok(BuildOutcome {
            transaction: tx,
            dry_run: dry,
        })
    }

    /// Broadcasts and always awaits the mined receipt. A revert surfaces as
    /// [`Error::Reverted`] with full receipt detail, never silently.
    async fn send_transaction(
        &self,
        tx: &PreparedTransaction,
        signer: &Signer,
    ) -> Result<ExecutionReceipt> {
        let receipt = self.chain().send_transaction(tx, signer.wallet()).await?;
        if !receipt.success {
            return Err(Error::Reverted {
                tx_hash: receipt.tx_hash,
                gas_used: receipt.gas_used,
                reason: "transaction reverted on-chain".to_string(),
            });
        }
        tracing::info!(
            protocol = %self.protocol(),
            tx_hash = %receipt.tx_hash,
            gas_used = receipt.gas_used,
            "Transaction confirmed"
        );
        Ok(receipt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::DailyLedger;
    use crate::model::{DryRunResult, FeeData, RiskScore};
    use alloy::network::EthereumWallet;
    use alloy::primitives::{Bytes, U256};
    use chrono::{TimeZone, Utc};

    /// Chain stub: calls succeed, estimates return a fixed figure.
    struct StubChain {
        revert: bool,
    }

    #[async_trait]
    impl crate::chain::ChainReader for StubChain {
        async fn call(&self, _tx: &PreparedTransaction, _from: Address) -> Result<Bytes> {
            if self.revert {
                Err(Error::ChainRead(
                    "execution reverted: revert: Paused\"".to_string(),
                ))
            } else {
                Ok(Bytes::new())
            }
        }

        async fn estimate_gas(&self, _tx: &PreparedTransaction, _from: Address) -> Result<u64> {
            Ok(120_000)
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
    impl crate::chain::ChainWriter for StubChain {
        async fn send_transaction(
            &self,
            _tx: &PreparedTransaction,
            _wallet: &EthereumWallet,
        ) -> Result<ExecutionReceipt> {
            Ok(ExecutionReceipt {
                tx_hash: "0xabc".to_string(),
                block_number: Some(1),
                gas_used: 100_000,
                success: true,
            })
        }
    }

    /// Minimal adapter that encodes every supported action to a fixed call.
    struct StubConnector {
        chain: Arc<dyn ChainAccess>,
        limits: ProtocolLimits,
        ledger: SharedLedger,
    }

    impl StubConnector {
        fn new(revert: bool) -> Self {
            Self {
                chain: Arc::new(StubChain { revert }),
                limits: ProtocolLimits::default(),
                ledger: DailyLedger::shared(),
            }
        }
    }

    #[async_trait]
    impl Connector for StubConnector {
        fn protocol(&self) -> Protocol {
            Protocol::UniswapV3
        }

        fn limits(&self) -> &ProtocolLimits {
            &self.limits
        }

        fn supported_kinds(&self) -> &'static [ActionKind] {
            &[ActionKind::Swap]
        }

        fn chain(&self) -> &Arc<dyn ChainAccess> {
            &self.chain
        }

        fn ledger(&self) -> &SharedLedger {
            &self.ledger
        }

        async fn discover_opportunities(&self) -> Result<Vec<Opportunity>> {
            Ok(vec![])
        }

        async fn read_positions(&self, _wallet: Address) -> Result<Vec<Position>> {
            Ok(vec![])
        }

        async fn encode_action(
            &self,
            _action: &PlanAction,
            _wallet: Address,
        ) -> Result<PreparedTransaction> {
            Ok(PreparedTransaction::new(
                Address::ZERO,
                Bytes::from(vec![0xde, 0xad]),
                1,
            ))
        }
    }

    fn swap_action(amount_usd: f64) -> PlanAction {
        PlanAction {
            kind: ActionKind::Swap,
            protocol: Protocol::UniswapV3,
            from_token: Some(Address::ZERO),
            to_token: Some(Address::repeat_byte(1)),
            position_id: None,
            amount: U256::from(1_000u64),
            amount_usd,
            slippage_bps: 50,
            deadline: Utc.timestamp_opt(2_000_000_000, 0).unwrap(),
            gas_estimate: None,
            gas_cost_usd: None,
            risk: RiskScore::Low,
        }
    }

    #[tokio::test]
    async fn build_attaches_gas_on_clean_dry_run() {
        let connector = StubConnector::new(false);
        let outcome = connector
            .build_transaction(&swap_action(100.0), Address::ZERO)
            .await
            .unwrap();

        assert!(outcome.dry_run.success);
        assert_eq!(outcome.transaction.gas_limit, Some(120_000));
        assert_eq!(outcome.dry_run.gas_used, Some(120_000));
    }

    #[tokio::test]
    async fn build_keeps_failed_dry_run_in_outcome() {
        let connector = StubConnector::new(true);
        let outcome = connector
            .build_transaction(&swap_action(100.0), Address::ZERO)
            .await
            .unwrap();

        assert!(!outcome.dry_run.success);
        assert_eq!(outcome.dry_run.revert_reason.as_deref(), Some("Paused"));
        assert!(outcome.transaction.gas_limit.is_none());
    }

    #[tokio::test]
    async fn build_rejects_unsupported_kind_with_exact_message() {
        let connector = StubConnector::new(false);
        let mut action = swap_action(100.0);
        action.kind = ActionKind::Supply;
        action.to_token = None;

        let err = connector
            .build_transaction(&action, Address::ZERO)
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Unsupported action type: supply");
    }

    #[tokio::test]
    async fn build_rejects_over_notional() {
        let connector = StubConnector::new(false);
        let err = connector
            .build_transaction(&swap_action(100_000.0), Address::ZERO)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
        assert!(err.to_string().contains("exceeds max notional"));
    }

    #[tokio::test]
    async fn builds_are_idempotent() {
        let connector = StubConnector::new(false);
        let action = swap_action(100.0);
        let first = connector
            .build_transaction(&action, Address::ZERO)
            .await
            .unwrap();
        let second = connector
            .build_transaction(&action, Address::ZERO)
            .await
            .unwrap();

        assert_eq!(first.transaction, second.transaction);
        assert_eq!(first.dry_run.success, second.dry_run.success);
    }

    #[test]
    fn dry_run_result_failed_carries_reason() {
        let result = DryRunResult::failed("insufficient balance".to_string());
        assert!(!result.success);
        assert_eq!(result.revert_reason.as_deref(), Some("insufficient balance"));
    }
}
