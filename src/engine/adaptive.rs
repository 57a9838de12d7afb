//! Adaptive lane selection and threshold relaxation.
//!
//! Pure functions of the previous [`CycleState`] and the no-opportunity
//! streak. Long dry spells push the cycle toward exploratory lanes and
//! loosen scan/execute thresholds in three tiers.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use crate::config::{RiskConfig, ScanConfig};
use crate::types::{CycleState, Lane, Thresholds};

/// Consecutive runs of one lane before rotation is forced.
const LANE_STREAK_LIMIT: u32 = 2;

// ---------------------------------------------------------------------------
// Lane selection
// ---------------------------------------------------------------------------

/// Lane the streak tiers favour, if any.
pub fn preferred_lane(streak: u32) -> Option<Lane> {
    match streak {
        s if s >= 25 => Some(Lane::NewsDiscovery),
        s if s >= 15 => Some(Lane::CrossMarket),
        s if s >= 8 => Some(Lane::ExternalReality),
        _ => None,
    }
}

/// Choose this cycle's lane.
///
/// The preferred lane wins unless it already ran at least twice in a row;
/// a lane that ran twice rotates to the next in [`Lane::ALL`]; otherwise
/// the lane follows `cycle_count mod 5`.
pub fn select_lane(prev: &CycleState, streak: u32) -> Lane {
    let saturated = |lane: Lane| prev.last_lane == Some(lane) && prev.lane_streak >= LANE_STREAK_LIMIT;

    if let Some(preferred) = preferred_lane(streak) {
        if !saturated(preferred) {
            return preferred;
        }
    }

    match prev.last_lane {
        Some(last) if prev.lane_streak >= LANE_STREAK_LIMIT => last.next(),
        _ => Lane::ALL[(prev.cycle_count % Lane::ALL.len() as u64) as usize],
    }
}

/// Lane streak after running `lane`.
pub fn next_lane_streak(prev: &CycleState, lane: Lane) -> u32 {
    if prev.last_lane == Some(lane) {
        prev.lane_streak.saturating_add(1)
    } else {
        1
    }
}

// ---------------------------------------------------------------------------
// Thresholds
// ---------------------------------------------------------------------------

struct Tier {
    min_streak: u32,
    limit_tenths: usize,
    limit_bounds: (usize, usize),
    scan_edge: Decimal,
    execute_edge: Decimal,
    position_step: Decimal,
    position_bounds: (Decimal, Decimal),
}

const TIERS: [Tier; 3] = [
    Tier {
        min_streak: 8,
        limit_tenths: 12,
        limit_bounds: (150, 400),
        scan_edge: dec!(0.002),
        execute_edge: dec!(0.0045),
        position_step: dec!(1),
        position_bounds: (dec!(4), dec!(15)),
    },
    Tier {
        min_streak: 15,
        limit_tenths: 14,
        limit_bounds: (200, 600),
        scan_edge: dec!(0.0015),
        execute_edge: dec!(0.0035),
        position_step: dec!(2),
        position_bounds: (dec!(5), dec!(18)),
    },
    Tier {
        min_streak: 25,
        limit_tenths: 16,
        limit_bounds: (250, 800),
        scan_edge: dec!(0.001),
        execute_edge: dec!(0.0025),
        position_step: dec!(4),
        position_bounds: (dec!(6), dec!(24)),
    },
];

/// `round(base × tenths / 10)`, halves rounding up.
fn scale_limit(base: usize, tenths: usize) -> usize {
    (base.saturating_mul(tenths) + 5) / 10
}

/// Thresholds for a cycle entered with `streak` empty cycles behind it.
///
/// Each tier recomputes the market limit and position size from the base
/// config; edges only ever tighten toward the tier's floor.
pub fn derive_thresholds(scan: &ScanConfig, risk: &RiskConfig, streak: u32) -> Thresholds {
    let mut thresholds = Thresholds {
        scan_edge_min: scan.min_edge,
        execute_edge_min: risk.execute_min_edge,
        scan_market_limit: scan.market_limit,
        max_position_usd: risk.max_position_usd,
    };

    for tier in TIERS.iter().filter(|t| streak >= t.min_streak) {
        let (lo, hi) = tier.limit_bounds;
        thresholds.scan_market_limit = scale_limit(scan.market_limit, tier.limit_tenths).clamp(lo, hi);
        thresholds.scan_edge_min = thresholds.scan_edge_min.min(tier.scan_edge);
        thresholds.execute_edge_min = thresholds.execute_edge_min.min(tier.execute_edge);
        let (plo, phi) = tier.position_bounds;
        thresholds.max_position_usd = (risk.max_position_usd + tier.position_step).clamp(plo, phi);
    }

    thresholds
}

/// Parameters for the orderbook lane's wider second scan.
pub fn wide_scan(base: &Thresholds) -> Thresholds {
    Thresholds {
        scan_market_limit: (base.scan_market_limit + 100).clamp(150, 900),
        scan_edge_min: (base.scan_edge_min * dec!(0.9)).max(dec!(0.0008)),
        ..*base
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
