//! Shared types for the basket-arbitrage engine.
//!
//! These types form the data model used across all modules: venue
//! snapshots (candidates, books), detector output (opportunities), sizing
//! output, and the persisted cycle state owned by the orchestrator.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Numeric policy
// ---------------------------------------------------------------------------

/// Round a recorded price/size/edge figure to 6 dp, half away from zero.
pub fn round6(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(6, RoundingStrategy::MidpointAwayFromZero)
}

/// Round a dollar figure to 4 dp, half away from zero.
pub fn round4(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(4, RoundingStrategy::MidpointAwayFromZero)
}

// ---------------------------------------------------------------------------
// Markets
// ---------------------------------------------------------------------------

/// One outcome token of a market.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutcomeToken {
    pub id: String,
    pub outcome_label: String,
}

/// A market selected for a book scan. Immutable per scan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketCandidate {
    pub id: String,
    /// Outcome tokens in venue order. Opportunity legs keep this order.
    pub outcome_tokens: Vec<OutcomeToken>,
    pub liquidity_hint: Decimal,
    pub accepting_orders: bool,
}

impl MarketCandidate {
    pub fn leg_count(&self) -> usize {
        self.outcome_tokens.len()
    }

    pub fn is_binary(&self) -> bool {
        self.leg_count() == 2
    }
}

impl fmt::Display for MarketCandidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let labels: Vec<&str> = self
            .outcome_tokens
            .iter()
            .map(|t| t.outcome_label.as_str())
            .collect();
        write!(
            f,
            "{} [{}] liq={}",
            self.id,
            labels.join("/"),
            self.liquidity_hint
        )
    }
}

/// A market as listed in the venue's sampling catalog, before filtering.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogMarket {
    pub condition_id: String,
    pub tokens: Vec<OutcomeToken>,
    pub liquidity: Decimal,
    pub active: bool,
    pub closed: bool,
    pub archived: bool,
    pub accepting_orders: bool,
}

impl CatalogMarket {
    /// Open for trading right now.
    pub fn is_tradeable(&self) -> bool {
        self.active && !self.closed && !self.archived && self.accepting_orders
    }

    pub fn to_candidate(&self) -> MarketCandidate {
        MarketCandidate {
            id: self.condition_id.clone(),
            outcome_tokens: self.tokens.clone(),
            liquidity_hint: self.liquidity,
            accepting_orders: self.accepting_orders,
        }
    }
}

/// A market as seen by the consistency scanners (question text + YES price).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListedMarket {
    pub id: String,
    pub question: String,
    pub end_date: Option<DateTime<Utc>>,
    /// First outcome price, `None` when the venue reported none.
    pub yes_price: Option<Decimal>,
    pub liquidity: Decimal,
}

/// A venue event grouping several related markets.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketEvent {
    pub id: String,
    pub title: String,
    pub markets: Vec<ListedMarket>,
}

// ---------------------------------------------------------------------------
// Order books
// ---------------------------------------------------------------------------

/// A single price level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookLevel {
    pub price: Decimal,
    pub size: Decimal,
}

impl BookLevel {
    pub fn new(price: Decimal, size: Decimal) -> Self {
        Self { price, size }
    }
}

/// Order book snapshot for one outcome token.
///
/// The venue does not guarantee sorted levels, so best prices are always
/// derived by scanning every level.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BookSnapshot {
    pub token_id: String,
    pub bids: Vec<BookLevel>,
    pub asks: Vec<BookLevel>,
    pub fetched_at: DateTime<Utc>,
}

impl BookSnapshot {
    /// Lowest positive ask. Ties keep the first occurrence.
    pub fn best_ask(&self) -> Option<BookLevel> {
        let mut best: Option<BookLevel> = None;
        for level in self.asks.iter().filter(|l| l.price > Decimal::ZERO) {
            match best {
                Some(b) if level.price >= b.price => {}
                _ => best = Some(*level),
            }
        }
        best
    }

    /// Highest positive bid. Ties keep the first occurrence.
    pub fn best_bid(&self) -> Option<BookLevel> {
        let mut best: Option<BookLevel> = None;
        for level in self.bids.iter().filter(|l| l.price > Decimal::ZERO) {
            match best {
                Some(b) if level.price <= b.price => {}
                _ => best = Some(*level),
            }
        }
        best
    }

    pub fn has_asks(&self) -> bool {
        !self.asks.is_empty()
    }

    /// Valid ask levels, cheapest first (stable for equal prices).
    pub fn ask_depth(&self) -> Vec<BookLevel> {
        let mut levels: Vec<BookLevel> = self
            .asks
            .iter()
            .copied()
            .filter(|l| l.price > Decimal::ZERO)
            .collect();
        levels.sort_by(|a, b| a.price.cmp(&b.price));
        levels
    }

    /// Valid bid levels, richest first (stable for equal prices).
    pub fn bid_depth(&self) -> Vec<BookLevel> {
        let mut levels: Vec<BookLevel> = self
            .bids
            .iter()
            .copied()
            .filter(|l| l.price > Decimal::ZERO)
            .collect();
        levels.sort_by(|a, b| b.price.cmp(&a.price));
        levels
    }
}

// ---------------------------------------------------------------------------
// Opportunities
// ---------------------------------------------------------------------------

/// Which side of the basket is mispriced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OpportunityKind {
    /// Asks sum below 1: buy every outcome.
    BuyAll,
    /// Bids sum above 1: sell every outcome.
    SellAll,
}

impl fmt::Display for OpportunityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OpportunityKind::BuyAll => write!(f, "buy_all"),
            OpportunityKind::SellAll => write!(f, "sell_all"),
        }
    }
}

/// One leg of a basket at its best level.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpportunityLeg {
    pub token_id: String,
    pub outcome_label: String,
    pub price: Decimal,
    pub available_size: Decimal,
}

/// A basket mispricing observed at one scan instant. Never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Opportunity {
    /// `<market id>:<kind>`, stable across rescans of the same market.
    pub id: String,
    pub kind: OpportunityKind,
    /// Basket cost (BuyAll) or proceeds (SellAll).
    pub basket_value: Decimal,
    pub gross_edge: Decimal,
    pub max_tradable_size: Decimal,
    pub legs: Vec<OpportunityLeg>,
    pub source_market_id: String,
    pub captured_at: DateTime<Utc>,
}

impl fmt::Display for Opportunity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} legs={} basket={} edge={:.2}% max={}",
            self.kind,
            self.source_market_id,
            self.legs.len(),
            self.basket_value,
            self.gross_edge * Decimal::ONE_HUNDRED,
            self.max_tradable_size,
        )
    }
}

// ---------------------------------------------------------------------------
// Risk & sizing
// ---------------------------------------------------------------------------

/// Bankroll and open exposure, refreshed externally each cycle.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct RiskState {
    pub bankroll_usd: Decimal,
    pub current_exposure_usd: Decimal,
}

/// Why a sizing pass produced no trade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SizingRejection {
    NoBankroll,
    EdgeBelowFloor,
    SizeBelowMinimum,
    BelowMinShares,
    InsufficientDepth,
    ExposureLimit,
    /// SellAll needs inventory in every leg.
    RequiresInventory,
}

impl fmt::Display for SizingRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let code = match self {
            SizingRejection::NoBankroll => "no_bankroll",
            SizingRejection::EdgeBelowFloor => "edge_below_floor",
            SizingRejection::SizeBelowMinimum => "size_below_minimum",
            SizingRejection::BelowMinShares => "below_min_shares",
            SizingRejection::InsufficientDepth => "insufficient_depth",
            SizingRejection::ExposureLimit => "exposure_limit",
            SizingRejection::RequiresInventory => "requires_inventory",
        };
        write!(f, "{code}")
    }
}

/// Sized trade for one opportunity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SizingDecision {
    pub opportunity_id: String,
    /// Shares per leg (legs are kept balanced).
    pub size_in_shares: Decimal,
    pub size_usd: Decimal,
    /// Estimated basket cost per share after walking each leg's depth.
    pub estimated_avg_price: Decimal,
    pub estimated_slippage: Decimal,
    pub filled: bool,
    pub within_exposure_limit: bool,
    /// `None` when the bankroll is zero or unknown.
    pub exposure_pct: Option<Decimal>,
    pub rejection: Option<SizingRejection>,
}

impl SizingDecision {
    /// A zero-size decision carrying only a reason code.
    pub fn rejected(opportunity_id: &str, reason: SizingRejection) -> Self {
        Self {
            opportunity_id: opportunity_id.to_string(),
            size_in_shares: Decimal::ZERO,
            size_usd: Decimal::ZERO,
            estimated_avg_price: Decimal::ZERO,
            estimated_slippage: Decimal::ZERO,
            filled: false,
            within_exposure_limit: false,
            exposure_pct: None,
            rejection: Some(reason),
        }
    }

    pub fn is_approved(&self) -> bool {
        self.rejection.is_none() && self.size_in_shares > Decimal::ZERO
    }
}

// ---------------------------------------------------------------------------
// Orders
// ---------------------------------------------------------------------------

/// Order direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Side {
    Buy,
    Sell,
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Buy => write!(f, "BUY"),
            Side::Sell => write!(f, "SELL"),
        }
    }
}

/// What the core asks the execution gateway to submit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderRequest {
    pub token_id: String,
    pub side: Side,
    pub price: Decimal,
    pub size: Decimal,
}

/// Gateway acknowledgement of a submitted order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderAck {
    pub order_id: String,
    pub token_id: String,
    pub status: String,
    pub timestamp: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Reference data
// ---------------------------------------------------------------------------

/// One exchange's spot price. A failed lookup keeps the error instead.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpotQuote {
    pub source: String,
    pub price_usd: Option<Decimal>,
    pub error: Option<String>,
}

impl SpotQuote {
    pub fn ok(source: &str, price_usd: Decimal) -> Self {
        Self {
            source: source.to_string(),
            price_usd: Some(price_usd),
            error: None,
        }
    }

    pub fn failed(source: &str, error: impl Into<String>) -> Self {
        Self {
            source: source.to_string(),
            price_usd: None,
            error: Some(error.into()),
        }
    }
}

/// A web search result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Headline {
    pub title: String,
    pub url: String,
    pub description: String,
    pub age: Option<String>,
}

// ---------------------------------------------------------------------------
// Lanes & thresholds
// ---------------------------------------------------------------------------

/// A named scanning strategy the orchestrator can run in a cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Lane {
    OrderbookArb,
    CrossMarket,
    ExternalReality,
    NewsDiscovery,
    ExecutionQuality,
}

impl Lane {
    /// Fixed round-robin order.
    pub const ALL: [Lane; 5] = [
        Lane::OrderbookArb,
        Lane::CrossMarket,
        Lane::ExternalReality,
        Lane::NewsDiscovery,
        Lane::ExecutionQuality,
    ];

    pub fn index(self) -> usize {
        Lane::ALL.iter().position(|l| *l == self).unwrap_or(0)
    }

    /// The lane after this one in the round-robin list.
    pub fn next(self) -> Lane {
        Lane::ALL[(self.index() + 1) % Lane::ALL.len()]
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Lane::OrderbookArb => "orderbook_arb",
            Lane::CrossMarket => "cross_market",
            Lane::ExternalReality => "external_reality",
            Lane::NewsDiscovery => "news_discovery",
            Lane::ExecutionQuality => "execution_quality",
        }
    }
}

impl fmt::Display for Lane {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Lane {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Lane::ALL
            .iter()
            .copied()
            .find(|l| l.as_str() == s.trim().to_lowercase())
            .ok_or_else(|| anyhow::anyhow!("Unknown lane: {s}"))
    }
}

/// Tunable thresholds for one cycle, recomputed from the streak.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Thresholds {
    pub scan_edge_min: Decimal,
    pub execute_edge_min: Decimal,
    pub scan_market_limit: usize,
    pub max_position_usd: Decimal,
}

impl fmt::Display for Thresholds {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "scan_limit={} scan_edge={} exec_edge={} max_pos_usd={}",
            self.scan_market_limit, self.scan_edge_min, self.execute_edge_min, self.max_position_usd,
        )
    }
}

// ---------------------------------------------------------------------------
// Cycle state
// ---------------------------------------------------------------------------

/// Orchestrator state persisted between invocations.
///
/// Missing fields deserialize to their zero value, so an older or partial
/// file still loads.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CycleState {
    pub cycle_count: u64,
    pub last_lane: Option<Lane>,
    pub lane_streak: u32,
    pub last_no_opportunity_streak: u32,
    pub last_opportunity_count: usize,
    pub last_thresholds: Option<Thresholds>,
    pub recent_action_summaries: Vec<String>,
    pub last_duration_ms: u64,
    pub updated_at: Option<DateTime<Utc>>,
}

impl fmt::Display for CycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "cycles={} last_lane={} lane_streak={} no_opp_streak={} last_opps={}",
            self.cycle_count,
            self.last_lane.map(|l| l.as_str()).unwrap_or("none"),
            self.lane_streak,
            self.last_no_opportunity_streak,
            self.last_opportunity_count,
        )
    }
}

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Book fetch failure, as translated by the venue adapter.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum FetchError {
    #[error("book fetch timed out")]
    Timeout,

    #[error("venue returned HTTP {0}")]
    HttpStatus(u16),

    #[error("malformed book payload: {0}")]
    Malformed(String),

    #[error("transport error: {0}")]
    Transport(String),
}

/// Order submission failure.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SubmissionError {
    #[error("order rejected by venue: {0}")]
    Rejected(String),

    #[error("submission timed out")]
    Timeout,

    #[error("gateway unavailable: {0}")]
    Unavailable(String),
}

/// Conditions that abort a cycle outright.
#[derive(Debug, thiserror::Error)]
pub enum CycleError {
    #[error("execution attempted without credentials")]
    MissingCredentials,

    #[error("cycle state unavailable: {0}")]
    State(#[source] anyhow::Error),
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
