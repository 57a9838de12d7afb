//! Kelly criterion position sizing.
//!
//! Fractional Kelly on the basket's gross edge, capped by a bankroll
//! fraction and an absolute order ceiling, with a minimum order floor.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tracing::debug;

use crate::config::RiskConfig;
use crate::types::{round4, SizingRejection};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Kelly sizing configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct KellyConfig {
    /// Fractional Kelly multiplier (0.25 = quarter-Kelly).
    pub kelly_fraction: Decimal,
    /// Edges below this size to zero.
    pub min_edge: Decimal,
    /// Net odds per dollar risked.
    pub odds: Decimal,
    /// Maximum order as a fraction of bankroll.
    pub max_position_pct: Decimal,
    pub min_order_usd: Decimal,
    pub max_order_usd: Decimal,
}

impl Default for KellyConfig {
    fn default() -> Self {
        Self {
            kelly_fraction: dec!(0.25),   // Quarter-Kelly
            min_edge: dec!(0.02),         // Ignore edges under 2%
            odds: Decimal::ONE,           // Even money
            max_position_pct: dec!(0.15), // Max 15% of bankroll per order
            min_order_usd: dec!(5),       // $5 minimum
            max_order_usd: dec!(50),      // $50 ceiling
        }
    }
}

impl From<&RiskConfig> for KellyConfig {
    fn from(config: &RiskConfig) -> Self {
        Self {
            kelly_fraction: config.kelly_fraction,
            min_edge: config.min_edge_for_sizing,
            odds: config.odds,
            max_position_pct: config.max_position_pct,
            min_order_usd: config.min_order_usd,
            max_order_usd: config.max_order_usd,
        }
    }
}

// ---------------------------------------------------------------------------
// Kelly calculator
// ---------------------------------------------------------------------------

/// Kelly sizing result. `size_usd` is zero whenever `rejection` is set.
#[derive(Debug, Clone, PartialEq)]
pub struct KellySize {
    pub kelly_full: Decimal,
    pub kelly_safe: Decimal,
    pub size_usd: Decimal,
    pub rejection: Option<SizingRejection>,
}

impl KellySize {
    fn rejected(reason: SizingRejection) -> Self {
        Self {
            kelly_full: Decimal::ZERO,
            kelly_safe: Decimal::ZERO,
            size_usd: Decimal::ZERO,
            rejection: Some(reason),
        }
    }
}

pub struct KellyCalculator {
    config: KellyConfig,
}

impl KellyCalculator {
    pub fn new(config: KellyConfig) -> Self {
        Self { config }
    }

    /// Access the Kelly configuration.
    pub fn config(&self) -> &KellyConfig {
        &self.config
    }

    /// Dollar size for `edge` against `bankroll_usd`.
    ///
    /// `f* = edge / odds`, scaled by the Kelly fraction, then
    /// `min(bankroll × f, bankroll × max_position_pct, max_order_usd)`.
    /// Results under `min_order_usd` become zero. Non-decreasing in `edge`.
    pub fn size(&self, bankroll_usd: Decimal, edge: Decimal) -> KellySize {
        if bankroll_usd <= Decimal::ZERO {
            return KellySize::rejected(SizingRejection::NoBankroll);
        }
        if edge < self.config.min_edge || self.config.odds <= Decimal::ZERO {
            return KellySize::rejected(SizingRejection::EdgeBelowFloor);
        }

        let kelly_full = edge / self.config.odds;
        let kelly_safe = kelly_full * self.config.kelly_fraction;

        let size = (bankroll_usd * kelly_safe)
            .min(bankroll_usd * self.config.max_position_pct)
            .min(self.config.max_order_usd);

        if size < self.config.min_order_usd {
            debug!(
                size = format!("${:.2}", size),
                min = format!("${:.2}", self.config.min_order_usd),
                "Kelly size below minimum order"
            );
            return KellySize {
                kelly_full,
                kelly_safe,
                size_usd: Decimal::ZERO,
                rejection: Some(SizingRejection::SizeBelowMinimum),
            };
        }

        let size_usd = round4(size);
        debug!(
            raw_kelly = format!("{:.2}%", kelly_full * Decimal::ONE_HUNDRED),
            fractional = format!("{:.2}%", kelly_safe * Decimal::ONE_HUNDRED),
            size = format!("${:.2}", size_usd),
            "Kelly sized"
        );

        KellySize {
            kelly_full,
            kelly_safe,
            size_usd,
            rejection: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn calc() -> KellyCalculator {
        KellyCalculator::new(KellyConfig::default())
    }

    #[test]
    fn test_edge_below_floor_is_zero() {
        let s = calc().size(dec!(1000), dec!(0.019));
        assert_eq!(s.size_usd, Decimal::ZERO);
        assert_eq!(s.rejection, Some(SizingRejection::EdgeBelowFloor));
    }

    #[test]
    fn test_zero_or_negative_bankroll() {
        assert_eq!(calc().size(Decimal::ZERO, dec!(0.1)).rejection, Some(SizingRejection::NoBankroll));
        assert_eq!(calc().size(dec!(-5), dec!(0.1)).size_usd, Decimal::ZERO);
    }

    #[test]
    fn test_fractional_kelly_size() {
        // 1000 × 0.04 × 0.25 = 10
        let s = calc().size(dec!(1000), dec!(0.04));
        assert_eq!(s.kelly_full, dec!(0.04));
        assert_eq!(s.kelly_safe, dec!(0.01));
        assert_eq!(s.size_usd, dec!(10));
        assert!(s.rejection.is_none());
    }

    #[test]
    fn test_capped_by_max_order() {
        // 10_000 × 0.2 × 0.25 = 500 → 50
        assert_eq!(calc().size(dec!(10000), dec!(0.2)).size_usd, dec!(50));
    }

    #[test]
    fn test_capped_by_position_pct() {
        let calc = KellyCalculator::new(KellyConfig {
            kelly_fraction: Decimal::ONE,
            max_order_usd: dec!(1000),
            ..Default::default()
        });
        // 100 × 0.5 = 50, pct cap 100 × 0.15 = 15
        assert_eq!(calc.size(dec!(100), dec!(0.5)).size_usd, dec!(15));
    }

    #[test]
    fn test_below_min_order_is_zero() {
        // 100 × 0.04 × 0.25 = 1 < 5
        let s = calc().size(dec!(100), dec!(0.04));
        assert_eq!(s.size_usd, Decimal::ZERO);
        assert_eq!(s.rejection, Some(SizingRejection::SizeBelowMinimum));
    }

    #[test]
    fn test_non_positive_odds() {
        let calc = KellyCalculator::new(KellyConfig {
            odds: Decimal::ZERO,
            ..Default::default()
        });
        assert_eq!(calc.size(dec!(1000), dec!(0.1)).size_usd, Decimal::ZERO);
    }

    #[test]
    fn test_rounded_to_four_places() {
        // 777.77777 × 0.03 × 0.25 = 5.8333332750
        let s = calc().size(dec!(777.77777), dec!(0.03));
        assert_eq!(s.size_usd, dec!(5.8333));
    }

    #[test]
    fn test_monotonic_in_edge() {
        let calc = calc();
        let mut last = Decimal::ZERO;
        let mut edge = dec!(0.0);
        while edge <= dec!(0.5) {
            let size = calc.size(dec!(2500), edge).size_usd;
            assert!(size >= last, "size fell at edge {edge}");
            last = size;
            edge += dec!(0.005);
        }
        assert_eq!(last, dec!(50));
    }
}
