//! Strategy engine: basket detection, consistency heuristics, Kelly sizing
//! and risk management.

pub mod consistency;
pub mod detector;
pub mod kelly;
pub mod risk;
pub mod signals;

use rust_decimal::{Decimal, RoundingStrategy};
use tracing::{debug, info};

use crate::config::RiskConfig;
use crate::types::{
    round4, round6, BookLevel, Opportunity, OpportunityKind, RiskState, SizingDecision,
    SizingRejection,
};
use kelly::{KellyCalculator, KellyConfig};
use risk::{estimate_slippage, RiskLimits, RiskManager};

// ---------------------------------------------------------------------------
// Position sizer
// ---------------------------------------------------------------------------

/// Pipelines Kelly sizing → per-leg depth walk → exposure check into a
/// [`SizingDecision`]. Every rejection is a value, never an error.
pub struct PositionSizer {
    kelly: KellyCalculator,
    risk: RiskManager,
    min_shares_per_leg: Decimal,
}

impl PositionSizer {
    pub fn new(kelly: KellyCalculator, risk: RiskManager, min_shares_per_leg: Decimal) -> Self {
        Self {
            kelly,
            risk,
            min_shares_per_leg,
        }
    }

    pub fn from_config(config: &RiskConfig) -> Self {
        Self::new(
            KellyCalculator::new(KellyConfig::from(config)),
            RiskManager::new(RiskLimits::from(config)),
            config.min_shares_per_leg,
        )
    }

    pub fn risk_manager(&self) -> &RiskManager {
        &self.risk
    }

    /// Size `opp` for execution.
    ///
    /// `depth` holds one ask ladder per leg (best first, leg order). A missing
    /// or empty ladder falls back to the leg's recorded best level.
    pub fn size_opportunity(
        &self,
        opp: &Opportunity,
        depth: &[Vec<BookLevel>],
        risk: &RiskState,
        max_position_usd: Decimal,
    ) -> SizingDecision {
        if opp.kind == OpportunityKind::SellAll {
            return SizingDecision::rejected(&opp.id, SizingRejection::RequiresInventory);
        }

        let kelly = self.kelly.size(risk.bankroll_usd, opp.gross_edge);
        if let Some(reason) = kelly.rejection {
            debug!(opportunity = %opp.id, reason = %reason, "Kelly rejected");
            return SizingDecision::rejected(&opp.id, reason);
        }
        if opp.basket_value <= Decimal::ZERO {
            return SizingDecision::rejected(&opp.id, SizingRejection::InsufficientDepth);
        }

        let usd = kelly.size_usd.min(max_position_usd);
        let shares = (usd / opp.basket_value)
            .round_dp_with_strategy(6, RoundingStrategy::ToZero)
            .min(opp.max_tradable_size);
        if shares < self.min_shares_per_leg || shares <= Decimal::ZERO {
            debug!(
                opportunity = %opp.id,
                shares = %shares,
                min = %self.min_shares_per_leg,
                "Below minimum shares per leg"
            );
            return SizingDecision::rejected(&opp.id, SizingRejection::BelowMinShares);
        }

        let mut basket_avg = Decimal::ZERO;
        let mut filled = true;
        for (i, leg) in opp.legs.iter().enumerate() {
            let fallback = [BookLevel::new(leg.price, leg.available_size)];
            let ladder: &[BookLevel] = match depth.get(i) {
                Some(levels) if !levels.is_empty() => levels,
                _ => &fallback,
            };
            let est = estimate_slippage(shares, leg.price, ladder);
            basket_avg += est.avg_price.unwrap_or(leg.price);
            filled &= est.filled;
        }

        let estimated_slippage = round6((basket_avg - opp.basket_value) / opp.basket_value);
        let size_usd = round4(shares * basket_avg);
        let exposure = self.risk.check_exposure(risk, size_usd);

        let rejection = if !filled {
            Some(SizingRejection::InsufficientDepth)
        } else if !exposure.within_limits {
            Some(SizingRejection::ExposureLimit)
        } else {
            None
        };

        info!(
            opportunity = %opp.id,
            shares = %shares,
            size = format!("${:.2}", size_usd),
            slippage = format!("{:.3}%", estimated_slippage * Decimal::ONE_HUNDRED),
            filled,
            within_exposure = exposure.within_limits,
            "Opportunity sized"
        );

        SizingDecision {
            opportunity_id: opp.id.clone(),
            size_in_shares: shares,
            size_usd,
            estimated_avg_price: round6(basket_avg),
            estimated_slippage,
            filled,
            within_exposure_limit: exposure.within_limits,
            exposure_pct: exposure.exposure_pct,
            rejection,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
