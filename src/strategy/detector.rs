//! Basket arbitrage detection.
//!
//! For a market with outcomes that are mutually exclusive and exhaustive,
//! exactly one outcome pays 1 at resolution. Buying every outcome at its best
//! ask for a total below 1, or selling every outcome at its best bid for a
//! total above 1, locks in the difference. Binary markets are the 2-leg case
//! of the same check.
//!
//! Detection is pure and deterministic: the same books always produce the
//! same opportunities in the same order.

use rust_decimal::Decimal;
use tracing::debug;

use crate::config::ScanConfig;
use crate::engine::scanner::MarketBooks;
use crate::types::{
    round6, BookLevel, BookSnapshot, MarketCandidate, Opportunity, OpportunityKind,
    OpportunityLeg,
};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct DetectorConfig {
    /// Minimum gross edge to record an opportunity.
    pub scan_edge_min: Decimal,
    /// Scan markets with 3..=`max_legs` outcomes.
    pub multi_outcome_enabled: bool,
    pub max_legs: usize,
    /// Opportunities kept after ranking.
    pub results_cap: usize,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            scan_edge_min: rust_decimal_macros::dec!(0.0025),
            multi_outcome_enabled: false,
            max_legs: 6,
            results_cap: 50,
        }
    }
}

impl From<&ScanConfig> for DetectorConfig {
    fn from(config: &ScanConfig) -> Self {
        Self {
            scan_edge_min: config.min_edge,
            multi_outcome_enabled: config.multi_outcome,
            max_legs: config.max_legs,
            results_cap: config.results_cap,
        }
    }
}

// ---------------------------------------------------------------------------
// Detector
// ---------------------------------------------------------------------------

pub struct OpportunityDetector {
    config: DetectorConfig,
}

impl OpportunityDetector {
    pub fn new(config: DetectorConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &DetectorConfig {
        &self.config
    }

    /// Whether a market with `legs` outcomes is scanned at all.
    pub fn accepts_leg_count(&self, legs: usize) -> bool {
        legs == 2 || (self.config.multi_outcome_enabled && legs > 2 && legs <= self.config.max_legs)
    }

    /// BuyAll and SellAll checks for one market. `books` must be in outcome
    /// order; a length mismatch yields nothing.
    pub fn detect_market(
        &self,
        candidate: &MarketCandidate,
        books: &[BookSnapshot],
    ) -> Vec<Opportunity> {
        if !self.accepts_leg_count(candidate.leg_count()) {
            return Vec::new();
        }
        if books.len() != candidate.leg_count() {
            debug!(
                market = %candidate.id,
                legs = candidate.leg_count(),
                books = books.len(),
                "Book count does not match outcome count, skipping"
            );
            return Vec::new();
        }

        [OpportunityKind::BuyAll, OpportunityKind::SellAll]
            .into_iter()
            .filter_map(|kind| self.basket(kind, candidate, books))
            .collect()
    }

    /// Detect across every scanned market, rank by edge and cap.
    pub fn detect_all(&self, scanned: &[MarketBooks]) -> Vec<Opportunity> {
        let found: Vec<Opportunity> = scanned
            .iter()
            .flat_map(|m| self.detect_market(&m.candidate, &m.books))
            .collect();
        rank_and_truncate(found, self.config.results_cap)
    }

    fn basket(
        &self,
        kind: OpportunityKind,
        candidate: &MarketCandidate,
        books: &[BookSnapshot],
    ) -> Option<Opportunity> {
        // Every leg needs a valid best level on this side, else the side is void.
        let best: Vec<BookLevel> = books
            .iter()
            .map(|book| match kind {
                OpportunityKind::BuyAll => book.best_ask(),
                OpportunityKind::SellAll => book.best_bid(),
            })
            .collect::<Option<Vec<_>>>()?;

        let basket_value: Decimal = best.iter().map(|l| l.price).sum();
        let gross_edge = match kind {
            OpportunityKind::BuyAll => Decimal::ONE - basket_value,
            OpportunityKind::SellAll => basket_value - Decimal::ONE,
        };
        if gross_edge < self.config.scan_edge_min {
            return None;
        }

        let max_tradable_size = best.iter().map(|l| l.size).min()?;
        if max_tradable_size <= Decimal::ZERO {
            return None;
        }

        let legs = candidate
            .outcome_tokens
            .iter()
            .zip(best.iter())
            .map(|(token, level)| OpportunityLeg {
                token_id: token.id.clone(),
                outcome_label: token.outcome_label.clone(),
                price: round6(level.price),
                available_size: round6(level.size),
            })
            .collect();

        let captured_at = books.iter().map(|b| b.fetched_at).max()?;

        debug!(
            market = %candidate.id,
            kind = %kind,
            basket = %basket_value,
            edge = %gross_edge,
            "Basket mispricing found"
        );

        Some(Opportunity {
            id: format!("{}:{}", candidate.id, kind),
            kind,
            basket_value: round6(basket_value),
            gross_edge: round6(gross_edge),
            max_tradable_size: round6(max_tradable_size),
            legs,
            source_market_id: candidate.id.clone(),
            captured_at,
        })
    }
}

/// Sort by descending edge (stable, so ties keep scan order) and cap.
pub fn rank_and_truncate(mut opportunities: Vec<Opportunity>, cap: usize) -> Vec<Opportunity> {
    opportunities.sort_by(|a, b| b.gross_edge.cmp(&a.gross_edge));
    opportunities.truncate(cap);
    opportunities
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
