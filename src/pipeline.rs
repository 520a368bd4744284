//! Action pipeline state machine
//!
//! Drives exactly one [`PlanAction`] through one connector:
//!
//! `Planned → Validated → Built → DryRun → GasEstimated → (Sent → Confirmed |
//! Reverted) | Rejected | Failed`
//!
//! Transitions are strictly sequential; calling a step out of order is a
//! [`Error::PipelineState`] rejection, never a silent bypass. Builds and dry
//! runs are repeatable with no on-chain effects; only `send` has a side
//! effect, and it always waits for the mined receipt. A caller that abandons
//! a step (e.g. with a timeout wrapper) leaves the pipeline in its last
//! completed stage; retry policy belongs to the caller, not here.
//!
//! The safety engine runs twice: in `validate` and again inside `send` with a
//! freshly read ledger total, closing the window between planning and
//! execution.

use crate::audit::AuditLog;
use crate::chain::{self, ChainReader};
use crate::connector::Connector;
use crate::model::{DryRunResult, ExecutionReceipt, PlanAction, PreparedTransaction};
use crate::safety::{SafetyCheck, SafetyEngine};
use crate::wallet::Signer;
use crate::{Error, Result};
use alloy::primitives::Address;
use std::sync::Arc;

/// Where a safety rejection happened, so callers can distinguish "never
/// attempted" from "attempted but blocked at send time".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectionPoint {
    Planning,
    Send,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Planned,
    Validated,
    Built,
    DryRun,
    GasEstimated,
    Sent,
    Confirmed,
    Reverted,
    Rejected(RejectionPoint),
    Failed,
}

impl Stage {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Stage::Confirmed | Stage::Reverted | Stage::Rejected(_) | Stage::Failed
        )
    }

    fn name(&self) -> &'static str {
        match self {
            Stage::Planned => "planned",
            Stage::Validated => "validated",
            Stage::Built => "built",
            Stage::DryRun => "dry_run",
            Stage::GasEstimated => "gas_estimated",
            Stage::Sent => "sent",
            Stage::Confirmed => "confirmed",
            Stage::Reverted => "reverted",
            Stage::Rejected(RejectionPoint::Planning) => "rejected_at_planning",
            Stage::Rejected(RejectionPoint::Send) => "rejected_at_send",
            Stage::Failed => "failed",
        }
    }
}

pub struct ActionPipeline {
    connector: Arc<dyn Connector>,
    action: PlanAction,
    wallet: Address,
    audit: Option<Arc<AuditLog>>,
    stage: Stage,
    safety: Option<SafetyCheck>,
    transaction: Option<PreparedTransaction>,
    dry_run: Option<DryRunResult>,
    receipt: Option<ExecutionReceipt>,
    failure: Option<String>,
}

impl ActionPipeline {
    pub fn new(connector: Arc<dyn Connector>, action: PlanAction, wallet: Address) -> Self {
        Self {
            connector,
            action,
            wallet,
            audit: None,
            stage: Stage::Planned,
            safety: None,
            transaction: None,
            dry_run: None,
            receipt: None,
            failure: None,
        }
    }

    pub fn with_audit(mut self, audit: Arc<AuditLog>) -> Self {
        self.audit = Some(audit);
        self
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    pub fn action(&self) -> &PlanAction {
        &self.action
    }

    pub fn safety_check(&self) -> Option<&SafetyCheck> {
        self.safety.as_ref()
    }

    pub fn transaction(&self) -> Option<&PreparedTransaction> {
        self.transaction.as_ref()
    }

    pub fn dry_run_result(&self) -> Option<&DryRunResult> {
        self.dry_run.as_ref()
    }

    pub fn receipt(&self) -> Option<&ExecutionReceipt> {
        self.receipt.as_ref()
    }

    pub fn failure(&self) -> Option<&str> {
        self.failure.as_deref()
    }

    fn expect_stage(&self, expected: Stage, op: &str) -> Result<()> {
        if self.stage != expected {
            return Err(Error::PipelineState(format!(
                "{} requires stage {}, pipeline is at {}",
                op,
                expected.name(),
                self.stage.name()
            )));
        }
        Ok(())
    }

    async fn transition(&mut self, stage: Stage, detail: Option<String>) {
        tracing::info!(
            protocol = %self.connector.protocol(),
            kind = %self.action.kind,
            stage = stage.name(),
            detail = detail.as_deref().unwrap_or(""),
            "Pipeline transition"
        );
        if let Some(audit) = &self.audit {
            audit
                .record(
                    self.connector.protocol(),
                    self.action.kind,
                    stage.name(),
                    self.action.amount_usd,
                    detail,
                )
                .await;
        }
        self.stage = stage;
    }

    async fn fail(&mut self, message: String) {
        self.failure = Some(message.clone());
        self.transition(Stage::Failed, Some(message)).await;
    }

    /// `Planned → Validated`. A safety rejection is terminal
    /// `Rejected(Planning)` and comes back as [`Error::Validation`] carrying
    /// the check's reason.
    pub async fn validate(&mut self) -> Result<SafetyCheck> {
        self.expect_stage(Stage::Planned, "validate")?;

        if let Err(e) = self.action.ensure_shape() {
            let message = e.to_string();
            self.fail(message).await;
            return Err(e);
        }

        let usage = self.connector.ledger().write().await.current_total();
        let check = SafetyEngine::evaluate(&self.action, self.connector.limits(), usage);
        self.safety = Some(check.clone());

        if check.passed {
            self.transition(Stage::Validated, None).await;
            Ok(check)
        } else {
            let reason = check.reason_or_ok().to_string();
            self.transition(Stage::Rejected(RejectionPoint::Planning), Some(reason.clone()))
                .await;
            Err(Error::Validation(reason))
        }
    }

    /// `Validated → Built`. Unsupported kinds and encoding failures are
    /// terminal `Failed`; a protocol preflight rejection (health factor) is
    /// terminal `Rejected(Planning)`.
    pub async fn build(&mut self) -> Result<PreparedTransaction> {
        self.expect_stage(Stage::Validated, "build")?;

        if !self.connector.supports(self.action.kind) {
            let err = Error::UnsupportedAction(self.action.kind);
            self.fail(err.to_string()).await;
            return Err(err);
        }

        if let Err(e) = self.connector.preflight(&self.action, self.wallet).await {
            let message = e.to_string();
            if matches!(e, Error::Validation(_)) {
                self.transition(
                    Stage::Rejected(RejectionPoint::Planning),
                    Some(message),
                )
                .await;
            } else {
                self.fail(message).await;
            }
            return Err(e);
        }

        match self.connector.encode_action(&self.action, self.wallet).await {
            Ok(tx) => {
                self.transaction = Some(tx.clone());
                self.transition(Stage::Built, None).await;
                Ok(tx)
            }
            Err(e) => {
                self.fail(e.to_string()).await;
                Err(e)
            }
        }
    }

    /// `Built → DryRun`. A revert does NOT terminate the pipeline; the failed
    /// result is recorded and whether to continue is the caller's policy.
    pub async fn dry_run(&mut self) -> Result<DryRunResult> {
        self.expect_stage(Stage::Built, "dry_run")?;
        let tx = self
            .transaction
            .as_ref()
            .ok_or_else(|| Error::PipelineState("dry_run without a built transaction".to_string()))?;

        let result = chain::dry_run(self.connector.chain().as_ref(), tx, self.wallet).await;
        let detail = result.revert_reason.clone();
        self.dry_run = Some(result.clone());
        self.transition(Stage::DryRun, detail).await;
        Ok(result)
    }

    /// `DryRun → GasEstimated`. The estimate becomes the transaction's gas
    /// limit; an estimation failure is terminal `Failed`.
    pub async fn estimate_gas(&mut self) -> Result<u64> {
        self.expect_stage(Stage::DryRun, "estimate_gas")?;
        let tx = self.transaction.as_ref().ok_or_else(|| {
            Error::PipelineState("estimate_gas without a built transaction".to_string())
        })?;

        match self.connector.chain().estimate_gas(tx, self.wallet).await {
            Ok(gas) => {
                if let Some(tx) = self.transaction.as_mut() {
                    tx.gas_limit = Some(gas);
                }
                self.transition(Stage::GasEstimated, Some(format!("gas {}", gas)))
                    .await;
                Ok(gas)
            }
            Err(e) => {
                self.fail(format!("gas estimation failed: {}", e)).await;
                Err(e)
            }
        }
    }

    /// `GasEstimated → Sent → Confirmed | Reverted`. Re-runs the safety
    /// engine against a freshly read ledger total first; a rejection here is
    /// terminal `Rejected(Send)`. The broadcast always waits for the receipt,
    /// and a confirmed send is recorded into the ledger.
    pub async fn send(&mut self, signer: &Signer) -> Result<ExecutionReceipt> {
        self.expect_stage(Stage::GasEstimated, "send")?;

        let usage = self.connector.ledger().write().await.current_total();
        let check = SafetyEngine::evaluate(&self.action, self.connector.limits(), usage);
        if !check.passed {
            let reason = check.reason_or_ok().to_string();
            self.safety = Some(check);
            self.transition(Stage::Rejected(RejectionPoint::Send), Some(reason.clone()))
                .await;
            return Err(Error::Validation(reason));
        }
        self.safety = Some(check);

        let tx = self
            .transaction
            .clone()
            .ok_or_else(|| Error::PipelineState("send without a built transaction".to_string()))?;

        self.transition(Stage::Sent, None).await;

        match self.connector.send_transaction(&tx, signer).await {
            Ok(receipt) => {
                self.connector
                    .ledger()
                    .write()
                    .await
                    .record(self.action.amount_usd);
                self.receipt = Some(receipt.clone());
                self.transition(Stage::Confirmed, Some(receipt.tx_hash.clone()))
                    .await;
                Ok(receipt)
            }
            Err(e @ Error::Reverted { .. }) => {
                let message = e.to_string();
                self.failure = Some(message.clone());
                self.transition(Stage::Reverted, Some(message)).await;
                Err(e)
            }
            Err(e) => {
                self.fail(format!("send failed: {}", e)).await;
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::{ChainAccess, ChainReader, ChainWriter};
    use crate::config::{Protocol, ProtocolLimits};
    use crate::ledger::{DailyLedger, SharedLedger};
    use crate::model::{ActionKind, FeeData, Opportunity, Position, RiskScore};
    use alloy::network::EthereumWallet;
    use alloy::primitives::{Bytes, U256};
    use async_trait::async_trait;
    use chrono::{TimeZone, Utc};
    use secrecy::SecretString;

    struct ScriptedChain {
        revert_call: bool,
        fail_estimate: bool,
        revert_receipt: bool,
    }

    impl Default for ScriptedChain {
        fn default() -> Self {
            Self {
                revert_call: false,
                fail_estimate: false,
                revert_receipt: false,
            }
        }
    }

    #[async_trait]
    impl ChainReader for ScriptedChain {
        async fn call(&self, _tx: &PreparedTransaction, _from: Address) -> Result<Bytes> {
            if self.revert_call {
                Err(Error::ChainRead(
                    "execution reverted: revert: Paused\"".to_string(),
                ))
            } else {
                Ok(Bytes::new())
            }
        }

        async fn estimate_gas(&self, _tx: &PreparedTransaction, _from: Address) -> Result<u64> {
            if self.fail_estimate {
                Err(Error::ChainRead("node refused estimate".to_string()))
            } else {
                Ok(90_000)
            }
        }

        async fn get_balance(&self, _address: Address) -> Result<U256> {
            Ok(U256::ZERO)
        }

        async fn fee_data(&self) -> Result<FeeData> {
            Ok(FeeData {
                gas_price: 10_000_000_000,
            })
        }
    }

    #[async_trait]
    impl ChainWriter for ScriptedChain {
        async fn send_transaction(
            &self,
            _tx: &PreparedTransaction,
            _wallet: &EthereumWallet,
        ) -> Result<ExecutionReceipt> {
            Ok(ExecutionReceipt {
                tx_hash: "0xfeed".to_string(),
                block_number: Some(42),
                gas_used: 88_000,
                success: !self.revert_receipt,
            })
        }
    }

    struct TestConnector {
        chain: Arc<dyn ChainAccess>,
        limits: ProtocolLimits,
        ledger: SharedLedger,
    }

    impl TestConnector {
        fn with_chain(chain: ScriptedChain) -> Arc<Self> {
            Arc::new(Self {
                chain: Arc::new(chain),
                limits: ProtocolLimits::default(),
                ledger: DailyLedger::shared(),
            })
        }
    }

    #[async_trait]
    impl Connector for TestConnector {
        fn protocol(&self) -> Protocol {
            Protocol::YearnV3
        }

        fn limits(&self) -> &ProtocolLimits {
            &self.limits
        }

        fn supported_kinds(&self) -> &'static [ActionKind] {
            &[ActionKind::VaultDeposit]
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
                Address::repeat_byte(9),
                Bytes::from(vec![0x6e, 0x55, 0x3f, 0x65]),
                1,
            ))
        }
    }

    fn deposit_action(amount_usd: f64) -> PlanAction {
        PlanAction {
            kind: ActionKind::VaultDeposit,
            protocol: Protocol::YearnV3,
            from_token: Some(Address::repeat_byte(1)),
            to_token: Some(Address::repeat_byte(9)),
            position_id: None,
            amount: U256::from(1_000_000u64),
            amount_usd,
            slippage_bps: 10,
            deadline: Utc.timestamp_opt(2_000_000_000, 0).unwrap(),
            gas_estimate: None,
            gas_cost_usd: None,
            risk: RiskScore::Low,
        }
    }

    fn signer() -> Signer {
        Signer::from_secret(&SecretString::from(
            "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80",
        ))
        .unwrap()
    }

    #[tokio::test]
    async fn happy_path_reaches_confirmed_and_records_usage() {
        let connector = TestConnector::with_chain(ScriptedChain::default());
        let mut pipeline =
            ActionPipeline::new(connector.clone(), deposit_action(100.0), Address::ZERO);

        pipeline.validate().await.unwrap();
        pipeline.build().await.unwrap();
        let dry = pipeline.dry_run().await.unwrap();
        assert!(dry.success);
        let gas = pipeline.estimate_gas().await.unwrap();
        assert_eq!(gas, 90_000);
        assert_eq!(
            pipeline.transaction().unwrap().gas_limit,
            Some(90_000)
        );

        let receipt = pipeline.send(&signer()).await.unwrap();
        assert!(receipt.success);
        assert_eq!(pipeline.stage(), Stage::Confirmed);
        assert!((connector.ledger.write().await.current_total() - 100.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn send_is_unreachable_before_build_and_dry_run() {
        let connector = TestConnector::with_chain(ScriptedChain::default());
        let mut pipeline = ActionPipeline::new(connector, deposit_action(100.0), Address::ZERO);

        let err = pipeline.send(&signer()).await.unwrap_err();
        assert!(matches!(err, Error::PipelineState(_)));

        pipeline.validate().await.unwrap();
        pipeline.build().await.unwrap();
        // Still no dry run or estimate
        let err = pipeline.send(&signer()).await.unwrap_err();
        assert!(matches!(err, Error::PipelineState(_)));
        // The pipeline stays usable at its last completed stage
        assert_eq!(pipeline.stage(), Stage::Built);
    }

    #[tokio::test]
    async fn steps_cannot_be_reordered_or_repeated() {
        let connector = TestConnector::with_chain(ScriptedChain::default());
        let mut pipeline = ActionPipeline::new(connector, deposit_action(100.0), Address::ZERO);

        assert!(matches!(
            pipeline.build().await.unwrap_err(),
            Error::PipelineState(_)
        ));
        pipeline.validate().await.unwrap();
        assert!(matches!(
            pipeline.validate().await.unwrap_err(),
            Error::PipelineState(_)
        ));
        assert!(matches!(
            pipeline.estimate_gas().await.unwrap_err(),
            Error::PipelineState(_)
        ));
    }

    #[tokio::test]
    async fn planning_rejection_is_terminal() {
        let connector = TestConnector::with_chain(ScriptedChain::default());
        // Default limits cap a single tx at $250
        let mut pipeline =
            ActionPipeline::new(connector, deposit_action(100_000.0), Address::ZERO);

        let err = pipeline.validate().await.unwrap_err();
        assert!(err.to_string().contains("exceeds max notional"));
        assert_eq!(pipeline.stage(), Stage::Rejected(RejectionPoint::Planning));
        assert!(!pipeline.safety_check().unwrap().passed);

        // Terminal: nothing further may run
        assert!(matches!(
            pipeline.build().await.unwrap_err(),
            Error::PipelineState(_)
        ));
    }

    #[tokio::test]
    async fn dry_run_revert_keeps_pipeline_alive() {
        let connector = TestConnector::with_chain(ScriptedChain {
            revert_call: true,
            ..ScriptedChain::default()
        });
        let mut pipeline = ActionPipeline::new(connector, deposit_action(100.0), Address::ZERO);

        pipeline.validate().await.unwrap();
        pipeline.build().await.unwrap();
        let dry = pipeline.dry_run().await.unwrap();
        assert!(!dry.success);
        assert_eq!(dry.revert_reason.as_deref(), Some("Paused"));
        assert_eq!(pipeline.stage(), Stage::DryRun);

        // Continuing to estimation is the caller's choice and still works
        pipeline.estimate_gas().await.unwrap();
        assert_eq!(pipeline.stage(), Stage::GasEstimated);
    }

    #[tokio::test]
    async fn estimation_failure_is_terminal() {
        let connector = TestConnector::with_chain(ScriptedChain {
            fail_estimate: true,
            ..ScriptedChain::default()
        });
        let mut pipeline = ActionPipeline::new(connector, deposit_action(100.0), Address::ZERO);

        pipeline.validate().await.unwrap();
        pipeline.build().await.unwrap();
        pipeline.dry_run().await.unwrap();
        let err = pipeline.estimate_gas().await.unwrap_err();
        assert!(matches!(err, Error::ChainRead(_)));
        assert_eq!(pipeline.stage(), Stage::Failed);
        assert!(pipeline.failure().unwrap().contains("gas estimation"));
    }

    #[tokio::test]
    async fn send_recheck_reads_fresh_ledger_state() {
        let connector = TestConnector::with_chain(ScriptedChain::default());
        let mut pipeline =
            ActionPipeline::new(connector.clone(), deposit_action(200.0), Address::ZERO);

        pipeline.validate().await.unwrap();
        pipeline.build().await.unwrap();
        pipeline.dry_run().await.unwrap();
        pipeline.estimate_gas().await.unwrap();

        // Another pipeline spent the day's budget between build and send
        connector.ledger.write().await.record(900.0);

        let err = pipeline.send(&signer()).await.unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
        assert_eq!(pipeline.stage(), Stage::Rejected(RejectionPoint::Send));
    }

    #[tokio::test]
    async fn reverted_receipt_surfaces_with_detail() {
        let connector = TestConnector::with_chain(ScriptedChain {
            revert_receipt: true,
            ..ScriptedChain::default()
        });
        let mut pipeline = ActionPipeline::new(connector.clone(), deposit_action(50.0), Address::ZERO);

        pipeline.validate().await.unwrap();
        pipeline.build().await.unwrap();
        pipeline.dry_run().await.unwrap();
        pipeline.estimate_gas().await.unwrap();

        let err = pipeline.send(&signer()).await.unwrap_err();
        match err {
            Error::Reverted { tx_hash, gas_used, .. } => {
                assert_eq!(tx_hash, "0xfeed");
                assert_eq!(gas_used, 88_000);
            }
            other => panic!("expected Reverted, got {:?}", other),
        }
        assert_eq!(pipeline.stage(), Stage::Reverted);
        // A reverted send never counts against the daily cap
        assert_eq!(connector.ledger.write().await.current_total(), 0.0);
    }

    #[tokio::test]
    async fn unsupported_kind_fails_at_build() {
        let connector = TestConnector::with_chain(ScriptedChain::default());
        let mut action = deposit_action(100.0);
        action.kind = ActionKind::Borrow;
        action.from_token = None;
        let mut pipeline = ActionPipeline::new(connector, action, Address::ZERO);

        pipeline.validate().await.unwrap();
        let err = pipeline.build().await.unwrap_err();
        assert_eq!(err.to_string(), "Unsupported action type: borrow");
        assert_eq!(pipeline.stage(), Stage::Failed);
    }

    #[tokio::test]
    async fn audit_log_receives_transitions() {
        let temp = tempfile::NamedTempFile::new().unwrap();
        let audit = Arc::new(AuditLog::new(temp.path()));
        let connector = TestConnector::with_chain(ScriptedChain::default());
        let mut pipeline = ActionPipeline::new(connector, deposit_action(100.0), Address::ZERO)
            .with_audit(audit);

        pipeline.validate().await.unwrap();
        pipeline.build().await.unwrap();

        let content = std::fs::read_to_string(temp.path()).unwrap();
        assert!(content.contains("validated"));
        assert!(content.contains("built"));
    }
}
