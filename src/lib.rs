//! Multi-protocol yield aggregation and action orchestration
//!
//! One capability contract, N protocol backends:
//! - Discovery and position reads fan out across connectors and tolerate
//!   partial failure
//! - A chosen plan action runs through exactly one connector's
//!   build → dry-run → estimate → send pipeline
//! - The safety engine gates every action twice: at build time and again
//!   immediately before signing
//!
//! # Security Model
//!
//! - Private keys never leave the wallet module
//! - Nothing is broadcast without a fresh safety re-check
//! - Every pipeline transition lands in the audit log

pub mod aggregator;
pub mod audit;
pub mod chain;
pub mod config;
pub mod connector;
pub mod ledger;
pub mod model;
pub mod pipeline;
pub mod safety;
pub mod tokens;
pub mod wallet;

mod error;

// Re-export commonly used types
pub use aggregator::Aggregator;
pub use config::{Config, Network, Protocol, ProtocolLimits, RpcConfig};
pub use connector::Connector;
pub use error::{Error, Result};
pub use model::{ActionKind, Opportunity, PlanAction, Position, RiskScore};
pub use pipeline::{ActionPipeline, Stage};
pub use safety::{SafetyCheck, SafetyEngine};
