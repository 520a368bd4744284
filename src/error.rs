//! Error types for the yield aggregation pipeline

use crate::model::ActionKind;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    /// Safety engine rejected the action. Recoverable: adjust the plan and
    /// retry from `Planned`.
    #[error("safety check rejected action: {0}")]
    Validation(String),

    /// The chosen adapter does not implement this action kind. Fatal for this
    /// adapter/action pair.
    #[error("Unsupported action type: {0}")]
    UnsupportedAction(ActionKind),

    /// The plan action is internally inconsistent (token fields vs kind,
    /// slippage out of range, zero amount).
    #[error("invalid plan action: {0}")]
    InvalidAction(String),

    #[error("chain read failed: {0}")]
    ChainRead(String),

    #[error("transaction send failed: {0}")]
    Send(String),

    /// Mined but reverted. Carries the full receipt detail.
    #[error("transaction {tx_hash} reverted (gas used {gas_used}): {reason}")]
    Reverted {
        tx_hash: String,
        gas_used: u64,
        reason: String,
    },

    /// A pipeline method was called out of order.
    #[error("pipeline state violation: {0}")]
    PipelineState(String),

    #[error("wallet error: {0}")]
    Wallet(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
