//! Safety-check engine
//!
//! Pure, deterministic evaluation of a proposed action against configured
//! limits. Identical inputs always produce identical output; the engine holds
//! no state beyond what is passed in. It runs twice per action: once at build
//! time and once immediately before send, with a freshly read daily total.
//!
//! Health-factor gating is deliberately NOT here: lending adapters layer it
//! on top in their preflight, keeping this engine reusable across protocols
//! that have no notion of collateralization.

use crate::config::ProtocolLimits;
use crate::model::PlanAction;
use serde::{Deserialize, Serialize};

/// Outcome of one evaluation. All sub-checks are reported regardless of
/// earlier failures; `reason` carries only the first violation in priority
/// order notional → daily cap → slippage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SafetyCheck {
    pub passed: bool,
    pub reason: Option<String>,
    pub notional_ok: bool,
    pub daily_cap_ok: bool,
    pub slippage_ok: bool,
    /// Set only when a protocol overlay (health factor) contributed a verdict
    pub health_ok: Option<bool>,
}

impl SafetyCheck {
    /// Reason string, or a fixed placeholder for passing checks.
    pub fn reason_or_ok(&self) -> &str {
        self.reason.as_deref().unwrap_or("ok")
    }
}

/// Stateless limit evaluation.
pub struct SafetyEngine;

impl SafetyEngine {
    /// Evaluates `action` against `limits` given the USD already spent today.
    pub fn evaluate(
        action: &PlanAction,
        limits: &ProtocolLimits,
        daily_usage_usd: f64,
    ) -> SafetyCheck {
        let notional_ok = action.amount_usd <= limits.max_notional_per_tx_usd;
        let daily_cap_ok = daily_usage_usd + action.amount_usd <= limits.daily_cap_usd;
        let slippage_ok = action.slippage_bps <= limits.max_slippage_bps;

        let reason = if !notional_ok {
            Some(format!(
                "amount ${:.2} exceeds max notional per tx ${:.2}",
                action.amount_usd, limits.max_notional_per_tx_usd
            ))
        } else if !daily_cap_ok {
            Some(format!(
                "daily cap would be exceeded: spent ${:.2} today, this action ${:.2}, cap ${:.2}",
                daily_usage_usd, action.amount_usd, limits.daily_cap_usd
            ))
        } else if !slippage_ok {
            Some(format!(
                "slippage {} bps exceeds maximum allowed {} bps",
                action.slippage_bps, limits.max_slippage_bps
            ))
        } else {
            None
        };

        let passed = notional_ok && daily_cap_ok && slippage_ok;
        if passed {
            tracing::debug!(
                amount_usd = action.amount_usd,
                daily_usage_usd,
                slippage_bps = action.slippage_bps,
                protocol = %action.protocol,
                "Safety check passed"
            );
        }

        SafetyCheck {
            passed,
            reason,
            notional_ok,
            daily_cap_ok,
            slippage_ok,
            health_ok: None,
        }
    }
}
