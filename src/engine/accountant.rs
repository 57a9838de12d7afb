//! Accountant: cycle performance history and survival checks.
//!
//! Every cycle appends one record to `cycle_performance.json`. The trailing
//! run of zero-opportunity records is the "no-opportunity streak" that drives
//! lane selection and threshold relaxation, and together with the bankroll it
//! feeds the survival-mode recommendation.

use std::fmt;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::types::{round4, Lane};

// ---------------------------------------------------------------------------
// Performance history
// ---------------------------------------------------------------------------

/// One completed cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CycleRecord {
    pub timestamp: DateTime<Utc>,
    pub cycle: u64,
    pub lane: Lane,
    pub opportunities: usize,
    pub scanned: usize,
    pub errors: usize,
    pub empty_books: usize,
    pub duration_ms: u64,
    pub bankroll_usd: Decimal,
}

/// Bounded history persisted in `cycle_performance.json`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PerformanceHistory {
    pub cycles: Vec<CycleRecord>,
}

impl PerformanceHistory {
    /// Number of trailing records that found no opportunities.
    pub fn no_opportunity_streak(&self) -> u32 {
        self.cycles
            .iter()
            .rev()
            .take_while(|c| c.opportunities == 0)
            .count() as u32
    }

    /// Append `record`, keeping only the newest `limit` entries.
    pub fn record(&mut self, record: CycleRecord, limit: usize) {
        self.cycles.push(record);
        if self.cycles.len() > limit {
            let excess = self.cycles.len() - limit;
            self.cycles.drain(..excess);
        }
    }

    pub fn latest(&self) -> Option<&CycleRecord> {
        self.cycles.last()
    }
}

// ---------------------------------------------------------------------------
// Survival mode
// ---------------------------------------------------------------------------

/// Operating cadence, from most to least active.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SurvivalMode {
    Aggressive,
    Normal,
    Conservative,
    Survival,
    Hibernation,
}

impl SurvivalMode {
    pub const ALL: [SurvivalMode; 5] = [
        SurvivalMode::Aggressive,
        SurvivalMode::Normal,
        SurvivalMode::Conservative,
        SurvivalMode::Survival,
        SurvivalMode::Hibernation,
    ];

    /// Estimated operating cost per cycle, USD.
    pub fn burn_per_cycle(self) -> Decimal {
        match self {
            SurvivalMode::Aggressive => dec!(0.08),
            SurvivalMode::Normal => dec!(0.05),
            SurvivalMode::Conservative => dec!(0.03),
            SurvivalMode::Survival => dec!(0.01),
            SurvivalMode::Hibernation => dec!(0.005),
        }
    }

    /// Minutes between cycles.
    pub fn interval_minutes(self) -> u32 {
        match self {
            SurvivalMode::Aggressive => 1,
            SurvivalMode::Normal => 2,
            SurvivalMode::Conservative => 5,
            SurvivalMode::Survival => 15,
            SurvivalMode::Hibernation => 60,
        }
    }

    /// Hours `bankroll_usd` lasts at this mode's burn rate.
    pub fn runway_hours(self, bankroll_usd: Decimal) -> Decimal {
        let cycles_per_hour = dec!(60) / Decimal::from(self.interval_minutes());
        let burn_per_hour = self.burn_per_cycle() * cycles_per_hour;
        if bankroll_usd <= Decimal::ZERO {
            return Decimal::ZERO;
        }
        round4(bankroll_usd / burn_per_hour)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SurvivalMode::Aggressive => "aggressive",
            SurvivalMode::Normal => "normal",
            SurvivalMode::Conservative => "conservative",
            SurvivalMode::Survival => "survival",
            SurvivalMode::Hibernation => "hibernation",
        }
    }
}

impl fmt::Display for SurvivalMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Pick a mode from the no-opportunity streak and the runway (hours) at the
/// current mode.
pub fn recommend_mode(streak: u32, runway_hours: Decimal) -> SurvivalMode {
    if streak > 100 || runway_hours < dec!(6) {
        SurvivalMode::Hibernation
    } else if streak > 60 || runway_hours < dec!(12) {
        SurvivalMode::Survival
    } else if streak > 40 || runway_hours < dec!(24) {
        SurvivalMode::Conservative
    } else if streak > 20 {
        SurvivalMode::Normal
    } else {
        SurvivalMode::Aggressive
    }
}

/// Survival assessment reported with each cycle summary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SurvivalRecommendation {
    pub current: SurvivalMode,
    pub recommended: SurvivalMode,
    pub streak: u32,
    pub bankroll_usd: Decimal,
    pub runway_hours: Decimal,
    pub recommended_runway_hours: Decimal,
}

impl SurvivalRecommendation {
    pub fn should_switch(&self) -> bool {
        self.current != self.recommended
    }
}

pub struct Accountant;

impl Accountant {
    /// Assess survival for a bankroll running at `current`.
    pub fn assess(current: SurvivalMode, streak: u32, bankroll_usd: Decimal) -> SurvivalRecommendation {
        let runway = current.runway_hours(bankroll_usd);
        let recommended = recommend_mode(streak, runway);
        let rec = SurvivalRecommendation {
            current,
            recommended,
            streak,
            bankroll_usd,
            runway_hours: runway,
            recommended_runway_hours: recommended.runway_hours(bankroll_usd),
        };

        if rec.should_switch() {
            warn!(
                current = %current,
                recommended = %recommended,
                runway = format!("{:.1}h", runway),
                extended = format!("{:.1}h", rec.recommended_runway_hours),
                "Survival mode change recommended"
            );
        } else {
            info!(
                mode = %current,
                streak,
                runway = format!("{:.1}h", runway),
                "Survival mode unchanged"
            );
        }
        rec
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn make_record(cycle: u64, opportunities: usize) -> CycleRecord {
        CycleRecord {
            timestamp: Utc::now(),
            cycle,
            lane: Lane::OrderbookArb,
            opportunities,
            scanned: 10,
            errors: 0,
            empty_books: 0,
            duration_ms: 100,
            bankroll_usd: dec!(100),
        }
    }

    #[test]
    fn test_streak_counts_trailing_zeroes() {
        let mut history = PerformanceHistory::default();
        for (i, opps) in [0, 2, 0, 0, 0].into_iter().enumerate() {
            history.record(make_record(i as u64, opps), 500);
        }
        assert_eq!(history.no_opportunity_streak(), 3);
    }

    #[test]
    fn test_streak_empty_history() {
        assert_eq!(PerformanceHistory::default().no_opportunity_streak(), 0);
    }

    #[test]
    fn test_streak_resets_on_opportunity() {
        let mut history = PerformanceHistory::default();
        history.record(make_record(1, 0), 500);
        history.record(make_record(2, 1), 500);
        assert_eq!(history.no_opportunity_streak(), 0);
    }

    #[test]
    fn test_history_bounded() {
        let mut history = PerformanceHistory::default();
        for i in 0..10 {
            history.record(make_record(i, 0), 4);
        }
        assert_eq!(history.cycles.len(), 4);
        assert_eq!(history.cycles[0].cycle, 6);
        assert_eq!(history.latest().map(|c| c.cycle), Some(9));
    }

    #[test]
    fn test_runway_hours() {
        // Normal: 0.05 × 30 cycles/h = 1.50/h
        assert_eq!(SurvivalMode::Normal.runway_hours(dec!(30)), dec!(20));
        // Hibernation: 0.005 × 1 = 0.005/h
        assert_eq!(SurvivalMode::Hibernation.runway_hours(dec!(1)), dec!(200));
        assert_eq!(SurvivalMode::Aggressive.runway_hours(Decimal::ZERO), Decimal::ZERO);
    }

    #[test]
    fn test_recommend_mode_tiers() {
        let plenty = dec!(1000);
        assert_eq!(recommend_mode(0, plenty), SurvivalMode::Aggressive);
        assert_eq!(recommend_mode(21, plenty), SurvivalMode::Normal);
        assert_eq!(recommend_mode(41, plenty), SurvivalMode::Conservative);
        assert_eq!(recommend_mode(61, plenty), SurvivalMode::Survival);
        assert_eq!(recommend_mode(101, plenty), SurvivalMode::Hibernation);
    }

    #[test]
    fn test_recommend_mode_runway_overrides_streak() {
        assert_eq!(recommend_mode(0, dec!(5)), SurvivalMode::Hibernation);
        assert_eq!(recommend_mode(0, dec!(11)), SurvivalMode::Survival);
        assert_eq!(recommend_mode(0, dec!(23)), SurvivalMode::Conservative);
        assert_eq!(recommend_mode(20, dec!(24)), SurvivalMode::Aggressive);
    }

    #[test]
    fn test_assess_recommends_switch() {
        // Aggressive: 0.08 × 60 = 4.80/h; $48 lasts 10h → survival.
        let rec = Accountant::assess(SurvivalMode::Aggressive, 0, dec!(48));
        assert_eq!(rec.runway_hours, dec!(10));
        assert_eq!(rec.recommended, SurvivalMode::Survival);
        assert!(rec.should_switch());
        assert!(rec.recommended_runway_hours > rec.runway_hours);
    }

    #[test]
    fn test_history_tolerates_missing_fields() {
        let history: PerformanceHistory = serde_json::from_str("{}").unwrap();
        assert!(history.cycles.is_empty());
    }
}
