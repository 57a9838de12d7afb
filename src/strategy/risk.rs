//! Risk manager.
//!
//! Depth-walk slippage estimation, portfolio exposure limits and the
//! remaining risk capacity published in `risk_params.json`.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::RiskConfig;
use crate::types::{round4, round6, BookLevel, RiskState};

// ---------------------------------------------------------------------------
// Slippage
// ---------------------------------------------------------------------------

/// Result of walking a book for a requested share count.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SlippageEstimate {
    pub requested_shares: Decimal,
    pub shares_filled: Decimal,
    /// `None` when nothing could be filled.
    pub avg_price: Option<Decimal>,
    pub worst_price: Option<Decimal>,
    /// `(avg − best) / best`, zero when nothing filled.
    pub slippage: Decimal,
    pub filled: bool,
}

/// Walk `depth` (best level first) consuming up to `requested` shares.
pub fn estimate_slippage(requested: Decimal, best_price: Decimal, depth: &[BookLevel]) -> SlippageEstimate {
    let mut remaining = requested.max(Decimal::ZERO);
    let mut shares = Decimal::ZERO;
    let mut cost = Decimal::ZERO;
    let mut worst: Option<Decimal> = None;

    for level in depth {
        if remaining <= Decimal::ZERO {
            break;
        }
        let take = remaining.min(level.size);
        if take <= Decimal::ZERO {
            continue;
        }
        shares += take;
        cost += take * level.price;
        remaining -= take;
        worst = Some(level.price);
    }

    let avg_price = (shares > Decimal::ZERO).then(|| cost / shares);
    let slippage = match avg_price {
        Some(avg) if best_price > Decimal::ZERO => (avg - best_price) / best_price,
        _ => Decimal::ZERO,
    };

    SlippageEstimate {
        requested_shares: requested,
        shares_filled: round6(shares),
        avg_price: avg_price.map(round6),
        worst_price: worst,
        slippage: round6(slippage),
        filled: requested > Decimal::ZERO && remaining <= Decimal::ZERO,
    }
}

// ---------------------------------------------------------------------------
// Exposure
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExposureCheck {
    pub within_limits: bool,
    pub current_exposure_usd: Decimal,
    pub new_exposure_usd: Decimal,
    /// `None` when the bankroll is zero or negative.
    pub exposure_pct: Option<Decimal>,
    pub limit_pct: Decimal,
}

/// Snapshot written to `risk_params.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskParams {
    pub timestamp: DateTime<Utc>,
    pub bankroll_usd: Decimal,
    pub current_exposure_usd: Decimal,
    pub max_position_pct: Decimal,
    pub max_exposure_pct: Decimal,
    pub kelly_fraction: Decimal,
    pub min_edge_for_sizing: Decimal,
    pub min_order_usd: Decimal,
    pub max_order_usd: Decimal,
    pub available_capacity_usd: Decimal,
}

// ---------------------------------------------------------------------------
// Risk manager
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct RiskLimits {
    pub max_position_pct: Decimal,
}

impl Default for RiskLimits {
    fn default() -> Self {
        Self {
            max_position_pct: dec!(0.15),
        }
    }
}

impl From<&RiskConfig> for RiskLimits {
    fn from(config: &RiskConfig) -> Self {
        Self {
            max_position_pct: config.max_position_pct,
        }
    }
}

pub struct RiskManager {
    limits: RiskLimits,
}

impl RiskManager {
    pub fn new(limits: RiskLimits) -> Self {
        Self { limits }
    }

    pub fn limits(&self) -> &RiskLimits {
        &self.limits
    }

    /// Portfolio cap: twice the per-position fraction.
    pub fn max_exposure_pct(&self) -> Decimal {
        self.limits.max_position_pct * dec!(2)
    }

    /// Would adding `candidate_usd` keep total exposure within the cap?
    pub fn check_exposure(&self, risk: &RiskState, candidate_usd: Decimal) -> ExposureCheck {
        let new_exposure = risk.current_exposure_usd + candidate_usd;
        let limit_pct = self.max_exposure_pct();

        let exposure_pct =
            (risk.bankroll_usd > Decimal::ZERO).then(|| new_exposure / risk.bankroll_usd);
        let within_limits = exposure_pct.is_some_and(|pct| pct <= limit_pct);

        debug!(
            current = %risk.current_exposure_usd,
            candidate = %candidate_usd,
            pct = ?exposure_pct,
            within_limits,
            "Exposure check"
        );

        ExposureCheck {
            within_limits,
            current_exposure_usd: risk.current_exposure_usd,
            new_exposure_usd: new_exposure,
            exposure_pct: exposure_pct.map(round6),
            limit_pct,
        }
    }

    /// `bankroll × max_exposure_pct − exposure`, floored at zero.
    pub fn available_capacity(&self, risk: &RiskState) -> Decimal {
        let cap = risk.bankroll_usd * self.max_exposure_pct() - risk.current_exposure_usd;
        round4(cap.max(Decimal::ZERO))
    }

    /// Parameters snapshot for the risk artifact.
    pub fn params(&self, risk: &RiskState, config: &RiskConfig) -> RiskParams {
        RiskParams {
            timestamp: Utc::now(),
            bankroll_usd: risk.bankroll_usd,
            current_exposure_usd: risk.current_exposure_usd,
            max_position_pct: self.limits.max_position_pct,
            max_exposure_pct: self.max_exposure_pct(),
            kelly_fraction: config.kelly_fraction,
            min_edge_for_sizing: config.min_edge_for_sizing,
            min_order_usd: config.min_order_usd,
            max_order_usd: config.max_order_usd,
            available_capacity_usd: self.available_capacity(risk),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
