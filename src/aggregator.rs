//! Cross-protocol aggregation
//!
//! Fans discovery and position reads out to every registered connector
//! concurrently and merges whatever comes back. Partial degradation is the
//! default posture: a connector that errors contributes an empty set and a
//! warning, never a pipeline-wide failure. Completion order across
//! connectors is unspecified; nothing here depends on it.

use crate::config::Protocol;
use crate::connector::Connector;
use crate::model::{Opportunity, Position};
use alloy::primitives::Address;
use futures::future::join_all;
use std::collections::HashMap;
use std::sync::Arc;

pub struct Aggregator {
    connectors: Vec<Arc<dyn Connector>>,
}

impl Aggregator {
    pub fn new(connectors: Vec<Arc<dyn Connector>>) -> Self {
        Self { connectors }
    }

    pub fn connectors(&self) -> &[Arc<dyn Connector>] {
        &self.connectors
    }

    pub fn connector_for(&self, protocol: Protocol) -> Option<&Arc<dyn Connector>> {
        self.connectors.iter().find(|c| c.protocol() == protocol)
    }

    /// One discovery call per connector, concurrently, unordered. Failing
    /// connectors are logged and contribute nothing.
    pub async fn discover_all(&self) -> Vec<Opportunity> {
        let calls = self.connectors.iter().map(|connector| {
            let connector = connector.clone();
            async move {
                match connector.discover_opportunities().await {
                    Ok(opportunities) => opportunities,
                    Err(e) => {
                        tracing::warn!(
                            protocol = %connector.protocol(),
                            error = %e,
                            "Discovery failed, continuing without this protocol"
                        );
                        Vec::new()
                    }
                }
            }
        });

        join_all(calls).await.into_iter().flatten().collect()
    }

    /// Identical fan-out/fan-in contract as [`discover_all`].
    ///
    /// [`discover_all`]: Aggregator::discover_all
    pub async fn read_all_positions(&self, wallet: Address) -> Vec<Position> {
        let calls = self.connectors.iter().map(|connector| {
            let connector = connector.clone();
            async move {
                match connector.read_positions(wallet).await {
                    Ok(positions) => positions,
                    Err(e) => {
                        tracing::warn!(
                            protocol = %connector.protocol(),
                            error = %e,
                            "Position read failed, continuing without this protocol"
                        );
                        Vec::new()
                    }
                }
            }
        });

        join_all(calls).await.into_iter().flatten().collect()
    }

    /// Highest signed rate across heterogeneous results.
    pub fn best_by_rate(opportunities: &[Opportunity]) -> Option<&Opportunity> {
        opportunities
            .iter()
            .max_by(|a, b| a.apr_percent.total_cmp(&b.apr_percent))
    }

    pub fn group_by_protocol(
        opportunities: &[Opportunity],
    ) -> HashMap<Protocol, Vec<Opportunity>> {
        let mut grouped: HashMap<Protocol, Vec<Opportunity>> = HashMap::new();
        for opportunity in opportunities {
            grouped
                .entry(opportunity.protocol)
                .or_default()
                .push(opportunity.clone());
        }
        grouped
    }

    /// Mean risk ordinal, None for an empty set.
    pub fn average_risk(opportunities: &[Opportunity]) -> Option<f64> {
        if opportunities.is_empty() {
            return None;
        }
        let sum: u32 = opportunities
            .iter()
            .map(|o| o.risk.ordinal() as u32)
            .sum();
        Some(sum as f64 / opportunities.len() as f64)
    }
}
