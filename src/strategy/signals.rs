//! External-signal heuristics.
//!
//! Pure functions behind the external-reality and news lanes:
//! - BTC threshold markets priced against a consensus exchange spot
//! - YES price momentum across cycles
//! - headline scoring against the venue's most liquid topics
//!
//! Like the consistency scans, everything here is advisory.

use std::collections::{BTreeMap, HashSet};

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use crate::strategy::consistency::{cluster_key, parse_direction, parse_threshold, Direction};
use crate::types::{round4, Headline, ListedMarket, SpotQuote};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct SignalConfig {
    /// Only markets resolving within this many days are compared to spot.
    pub max_days_to_end: i64,
    /// Spot must clear the threshold by this fraction either way.
    pub moneyness_band: Decimal,
    /// In-the-money markets priced under this look cheap.
    pub underpriced_below: Decimal,
    /// Out-of-the-money markets priced over this look rich.
    pub overpriced_above: Decimal,
    pub moneyness_score_cap: Decimal,
    pub monotonic_tolerance: Decimal,
    pub max_candidates: usize,
    /// Observations kept per tracked market.
    pub history_points: usize,
    pub tracked_markets: usize,
    pub momentum_window: usize,
    /// Percent move over the window that counts as a trend.
    pub momentum_pct: Decimal,
    pub topic_markets: usize,
    pub topic_keywords: usize,
    pub headline_floor: Decimal,
    pub max_headlines: usize,
}

impl Default for SignalConfig {
    fn default() -> Self {
        Self {
            max_days_to_end: 14,
            moneyness_band: dec!(0.04),
            underpriced_below: dec!(0.55),
            overpriced_above: dec!(0.45),
            moneyness_score_cap: dec!(0.25),
            monotonic_tolerance: dec!(0.03),
            max_candidates: 25,
            history_points: 50,
            tracked_markets: 100,
            momentum_window: 5,
            momentum_pct: dec!(2),
            topic_markets: 10,
            topic_keywords: 16,
            headline_floor: dec!(2.4),
            max_headlines: 12,
        }
    }
}

// ---------------------------------------------------------------------------
// Spot vs threshold markets
// ---------------------------------------------------------------------------

/// Median of `values`, `None` when empty.
pub fn median(values: &[Decimal]) -> Option<Decimal> {
    let mut sorted = values.to_vec();
    sorted.sort();
    let mid = sorted.len() / 2;
    match sorted.len() {
        0 => None,
        n if n % 2 == 0 => Some((sorted[mid - 1] + sorted[mid]) / dec!(2)),
        _ => Some(sorted[mid]),
    }
}

/// Median of the quotes that returned a positive price.
pub fn consensus_spot(quotes: &[SpotQuote]) -> Option<Decimal> {
    let prices: Vec<Decimal> = quotes
        .iter()
        .filter_map(|q| q.price_usd)
        .filter(|p| *p > Decimal::ZERO)
        .collect();
    median(&prices).map(round4)
}

/// How far spot sits on the YES side of `threshold`, as a fraction of it.
pub fn moneyness(spot: Decimal, threshold: Decimal, direction: Direction) -> Option<Decimal> {
    if threshold <= Decimal::ZERO {
        return None;
    }
    let distance = match direction {
        Direction::Above => spot - threshold,
        Direction::Below => threshold - spot,
    };
    Some(round4(distance / threshold))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpotSignal {
    PossibleUnderpricedYes,
    PossibleOverpricedYes,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpotCandidate {
    pub signal: SpotSignal,
    pub market_id: String,
    pub question: String,
    pub direction: Direction,
    pub threshold: Decimal,
    pub yes_price: Decimal,
    pub days_to_end: Decimal,
    pub moneyness: Decimal,
    pub score: Decimal,
}

/// BTC threshold markets whose YES price disagrees with where spot sits.
///
/// Only markets with an explicit direction, a threshold, a YES price and an
/// end date inside `max_days_to_end` are considered. Sorted by score.
pub fn spot_candidates(
    markets: &[ListedMarket],
    spot: Decimal,
    now: DateTime<Utc>,
    config: &SignalConfig,
) -> Vec<SpotCandidate> {
    let mut found = Vec::new();

    for market in markets {
        if cluster_key(&market.question) != Some("btc") {
            continue;
        }
        let (Some(direction), Some(threshold), Some(yes), Some(end)) = (
            parse_direction(&market.question),
            parse_threshold(&market.question),
            market.yes_price,
            market.end_date,
        ) else {
            continue;
        };

        let days = round4(Decimal::from((end - now).num_seconds()) / dec!(86400));
        if days < Decimal::ZERO || days > Decimal::from(config.max_days_to_end) {
            continue;
        }
        let Some(m) = moneyness(spot, threshold, direction) else { continue };
        let bonus = m.abs().min(config.moneyness_score_cap);

        let (signal, score) = if m >= config.moneyness_band && yes < config.underpriced_below {
            (SpotSignal::PossibleUnderpricedYes, config.underpriced_below - yes + bonus)
        } else if m <= -config.moneyness_band && yes > config.overpriced_above {
            (SpotSignal::PossibleOverpricedYes, yes - config.overpriced_above + bonus)
        } else {
            continue;
        };

        found.push(SpotCandidate {
            signal,
            market_id: market.id.clone(),
            question: market.question.clone(),
            direction,
            threshold,
            yes_price: yes,
            days_to_end: days,
            moneyness: m,
            score: round4(score),
        });
    }

    found.sort_by(|a, b| b.score.cmp(&a.score));
    found.truncate(config.max_candidates);
    found
}

// ---------------------------------------------------------------------------
// Price momentum
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PricePoint {
    pub timestamp: DateTime<Utc>,
    pub price: Decimal,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackedMarket {
    pub question: String,
    pub prices: Vec<PricePoint>,
}

/// Contents of `price_history.json`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PriceHistory {
    pub markets: BTreeMap<String, TrackedMarket>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl PriceHistory {
    /// Append the current YES price of each market, keeping the newest
    /// `max_points` per market. Unpriced markets are skipped.
    pub fn record(&mut self, markets: &[&ListedMarket], at: DateTime<Utc>, max_points: usize) -> usize {
        let mut recorded = 0;
        for market in markets {
            let Some(price) = market.yes_price else { continue };
            let tracked = self.markets.entry(market.id.clone()).or_default();
            tracked.question = market.question.clone();
            tracked.prices.push(PricePoint { timestamp: at, price });
            let excess = tracked.prices.len().saturating_sub(max_points);
            tracked.prices.drain(..excess);
            recorded += 1;
        }
        self.updated_at = Some(at);
        recorded
    }
}

/// Clustered, priced markets worth tracking, most liquid first.
pub fn tracked_markets(markets: &[ListedMarket], limit: usize) -> Vec<&ListedMarket> {
    let mut picked: Vec<&ListedMarket> = markets
        .iter()
        .filter(|m| m.yes_price.is_some() && cluster_key(&m.question).is_some())
        .collect();
    picked.sort_by(|a, b| b.liquidity.cmp(&a.liquidity));
    picked.truncate(limit);
    picked
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Trend {
    Up,
    Down,
    Flat,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Momentum {
    pub trend: Trend,
    pub change: Decimal,
    /// `None` when the window starts at a zero price.
    pub pct_change: Option<Decimal>,
}

/// Move over the last `window` observations.
pub fn momentum(prices: &[PricePoint], window: usize, threshold_pct: Decimal) -> Momentum {
    let flat = Momentum {
        trend: Trend::Flat,
        change: Decimal::ZERO,
        pct_change: None,
    };
    if prices.len() < 2 || window < 2 {
        return flat;
    }

    let recent = &prices[prices.len().saturating_sub(window)..];
    let (first, last) = (recent[0].price, recent[recent.len() - 1].price);
    let change = round4(last - first);
    if first.is_zero() {
        return Momentum { change, ..flat };
    }

    let pct = (last - first) / first * dec!(100);
    let trend = if pct > threshold_pct {
        Trend::Up
    } else if pct < -threshold_pct {
        Trend::Down
    } else {
        Trend::Flat
    };
    Momentum {
        trend,
        change,
        pct_change: Some(pct.round_dp(2)),
    }
}

// ---------------------------------------------------------------------------
// News scoring
// ---------------------------------------------------------------------------

const TOPIC_STOP_WORDS: &[&str] = &[
    "the", "will", "what", "when", "where", "which", "before", "after", "have", "has",
    "been", "into", "with", "that", "this", "from", "market", "polymarket", "2028",
    "win", "wins", "presidential", "democratic", "nomination", "election", "party",
    "above", "below", "than",
];

const URGENCY_TERMS: &[&str] = &[
    "breaking", "lawsuit", "emergency", "attack", "missile", "hack", "sec", "fed",
    "rate", "approval", "ban", "shutdown", "resign",
];

const BASE_QUERIES: &[&str] = &[
    "breaking prediction market relevant macro events today",
    "crypto regulation SEC ETF breaking",
    "US election campaign odds breaking news",
];

const MAX_QUERIES: usize = 4;

/// Lowercase words of three or more characters, digits-only tokens dropped.
pub fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|w| w.len() >= 3 && !w.chars().all(|c| c.is_ascii_digit()))
        .map(String::from)
        .collect()
}

/// Most frequent words across the most liquid markets' questions. Ties keep
/// first-seen order.
pub fn topic_keywords(markets: &[ListedMarket], top_markets: usize, max_keywords: usize) -> Vec<String> {
    let mut ranked: Vec<&ListedMarket> = markets.iter().filter(|m| !m.question.is_empty()).collect();
    ranked.sort_by(|a, b| b.liquidity.cmp(&a.liquidity));

    let mut counts: Vec<(String, usize)> = Vec::new();
    for market in ranked.into_iter().take(top_markets.max(1)) {
        for word in tokenize(&market.question) {
            if TOPIC_STOP_WORDS.contains(&word.as_str()) {
                continue;
            }
            match counts.iter_mut().find(|(w, _)| *w == word) {
                Some((_, n)) => *n += 1,
                None => counts.push((word, 1)),
            }
        }
    }

    counts.sort_by(|a, b| b.1.cmp(&a.1));
    counts.into_iter().take(max_keywords).map(|(w, _)| w).collect()
}

/// Fixed catalyst queries plus one built from the top keywords.
pub fn news_queries(keywords: &[String]) -> Vec<String> {
    let mut queries: Vec<String> = BASE_QUERIES.iter().map(|q| q.to_string()).collect();
    if !keywords.is_empty() {
        let head: Vec<&str> = keywords.iter().take(6).map(String::as_str).collect();
        queries.push(format!("latest news {}", head.join(" ")));
    }
    let mut seen = HashSet::new();
    queries.retain(|q| seen.insert(q.clone()));
    queries.truncate(MAX_QUERIES);
    queries
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeadlineScore {
    pub matched_keywords: Vec<String>,
    pub urgency_hits: usize,
    pub score: Decimal,
}

/// Topic overlap weighs 1.2 per keyword, urgency terms 1.8 each.
pub fn score_headline(headline: &Headline, keywords: &[String]) -> HeadlineScore {
    let words: HashSet<String> = tokenize(&format!("{} {}", headline.title, headline.description))
        .into_iter()
        .collect();
    let matched_keywords: Vec<String> = keywords.iter().filter(|k| words.contains(*k)).cloned().collect();
    let urgency_hits = URGENCY_TERMS.iter().filter(|t| words.contains(**t)).count();

    let score = Decimal::from(matched_keywords.len()) * dec!(1.2) + Decimal::from(urgency_hits) * dec!(1.8);
    HeadlineScore {
        matched_keywords,
        urgency_hits,
        score,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
