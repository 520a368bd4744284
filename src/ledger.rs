//! Daily usage ledger
//!
//! Tracks USD committed per protocol over the current UTC day. One ledger per
//! protocol, owned by the composition root and injected into the connector
//! and pipeline for that protocol; adapters never share a ledger. The
//! pipeline reads it fresh immediately before the final safety check.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::RwLock;

/// Handle shared between a connector and its pipelines.
pub type SharedLedger = Arc<RwLock<DailyLedger>>;

/// USD spent today, with automatic rollover at UTC midnight.
#[derive(Debug)]
pub struct DailyLedger {
    total: f64,
    date: DateTime<Utc>,
    /// Individual amounts for audit
    entries: Vec<f64>,
}

impl DailyLedger {
    pub fn new() -> Self {
        Self {
            total: 0.0,
            date: Utc::now(),
            entries: Vec::new(),
        }
    }

    pub fn shared() -> SharedLedger {
        Arc::new(RwLock::new(Self::new()))
    }

    fn roll_over_if_new_day(&mut self, now: DateTime<Utc>) {
        if now.date_naive() != self.date.date_naive() {
            self.total = 0.0;
            self.entries.clear();
            self.date = now;
        }
    }

    /// Records a committed amount, resetting first if the day changed.
    pub fn record(&mut self, amount_usd: f64) {
        self.roll_over_if_new_day(Utc::now());
        self.total += amount_usd;
        self.entries.push(amount_usd);
    }

    /// Current daily total, resetting first if the day changed.
    pub fn current_total(&mut self) -> f64 {
        self.roll_over_if_new_day(Utc::now());
        self.total
    }

    pub fn entry_count(&self) -> usize {
        self.entries.len()
    }

    #[cfg(test)]
    fn backdate(&mut self, date: DateTime<Utc>) {
        self.date = date;
    }
}

impl Default for DailyLedger {
    fn default() -> Self {
        Self::new()
    }
}
