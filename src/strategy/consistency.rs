//! Cross-market consistency heuristics.
//!
//! Two advisory scans over question-level markets:
//! - threshold monotonicity: "BTC above $100k" can never be likelier than
//!   "BTC above $90k" for the same horizon
//! - exclusive sums: YES prices of mutually exclusive markets in one event
//!   should not add up to materially more than 1
//!
//! Findings have no tradable size and never reach sizing. Text parsing is
//! best-effort and every parser returns `None` rather than guessing.

use std::collections::{BTreeMap, HashSet};
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::types::{round4, ListedMarket, MarketEvent};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct ConsistencyConfig {
    /// YES may move the wrong way by this much before it is flagged.
    pub monotonic_tolerance: Decimal,
    /// Exclusive sums above `1 + tolerance` are flagged.
    pub exclusive_tolerance: Decimal,
    /// Markets per event included in the exclusive sum, by liquidity.
    pub exclusive_top_n: usize,
    /// End dates further apart than this are never compared.
    pub horizon_days: i64,
}

impl Default for ConsistencyConfig {
    fn default() -> Self {
        Self {
            monotonic_tolerance: dec!(0.02),
            exclusive_tolerance: dec!(0.05),
            exclusive_top_n: 6,
            horizon_days: 120,
        }
    }
}

const STEM_CHARS: usize = 80;
const STOP_WORDS: &[&str] = &[
    "will", "be", "is", "the", "a", "an", "in", "on", "by", "for", "to", "of",
];

// ---------------------------------------------------------------------------
// Text parsing
// ---------------------------------------------------------------------------

/// Which way YES moves as the threshold grows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    /// "above X": YES is non-increasing in X.
    Above,
    /// "below X": YES is non-decreasing in X.
    Below,
}

fn words(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(String::from)
        .collect()
}

/// Topic cluster for monotonicity comparison.
pub fn cluster_key(question: &str) -> Option<&'static str> {
    let q = question.to_lowercase();
    let w = words(&q);
    let has = |word: &str| w.iter().any(|x| x == word);

    if q.contains("bitcoin") || has("btc") {
        Some("btc")
    } else if q.contains("ethereum") || has("eth") {
        Some("eth")
    } else if has("fed") || q.contains("federal reserve") || q.contains("interest rate") {
        Some("fed")
    } else if has("trump") && has("2028") {
        Some("trump_2028")
    } else if q.contains("election") {
        Some("elections")
    } else {
        None
    }
}

/// Threshold direction from phrasing, `None` when nothing matches.
pub fn parse_direction(question: &str) -> Option<Direction> {
    let q = question.to_lowercase();
    let w = words(&q);
    let has = |word: &str| w.iter().any(|x| x == word);

    let below = has("below")
        || has("under")
        || ["less than", "lower than", "dip to", "drop to", "fall to"]
            .iter()
            .any(|p| q.contains(p));
    if below {
        return Some(Direction::Below);
    }

    let above = ["above", "hit", "hits", "reach", "reaches", "over", "exceed", "exceeds"]
        .iter()
        .any(|word| has(word))
        || ["at least", "more than", "higher than"].iter().any(|p| q.contains(p));
    above.then_some(Direction::Above)
}

/// Largest money-like figure in the question.
///
/// `$`-prefixed or `k`/`m`-suffixed figures win over bare numbers (years,
/// dates). Thousands separators are accepted.
pub fn parse_threshold(question: &str) -> Option<Decimal> {
    let chars: Vec<char> = question.to_lowercase().chars().collect();
    let mut best_money: Option<Decimal> = None;
    let mut best_plain: Option<Decimal> = None;
    let mut i = 0;

    while i < chars.len() {
        if !chars[i].is_ascii_digit() {
            i += 1;
            continue;
        }

        let start = i;
        let mut text = String::new();
        while i < chars.len() {
            let c = chars[i];
            let digit_at = |j: usize| chars.get(j).is_some_and(|c| c.is_ascii_digit());
            if c.is_ascii_digit() {
                text.push(c);
            } else if c == ','
                && !text.contains('.')
                && (1..=3).all(|k| digit_at(i + k))
                && !digit_at(i + 4)
            {
                // thousands separator
            } else if c == '.' && !text.contains('.') && digit_at(i + 1) {
                text.push('.');
            } else {
                break;
            }
            i += 1;
        }

        let Ok(mut value) = Decimal::from_str(&text) else { continue };
        let mut money = start > 0 && chars[start - 1] == '$';

        let suffix = chars.get(i).copied();
        let after_suffix = chars.get(i + 1).copied();
        if !after_suffix.is_some_and(char::is_alphanumeric) {
            let scale = match suffix {
                Some('k') => Some(dec!(1000)),
                Some('m') => Some(dec!(1000000)),
                _ => None,
            };
            if let Some(scaled) = scale.and_then(|s| value.checked_mul(s)) {
                value = scaled;
                money = true;
                i += 1;
            }
        }

        let slot = if money { &mut best_money } else { &mut best_plain };
        if slot.map_or(true, |b| value > b) {
            *slot = Some(value);
        }
    }

    best_money.or(best_plain)
}

/// Question with stop words removed, whitespace collapsed, first 80 chars.
pub fn question_stem(question: &str) -> String {
    let lowered = question.to_lowercase();
    let kept: Vec<&str> = lowered
        .split_whitespace()
        .filter(|token| {
            let bare = token.trim_matches(|c: char| !c.is_alphanumeric());
            !STOP_WORDS.contains(&bare)
        })
        .collect();
    kept.join(" ").chars().take(STEM_CHARS).collect()
}

/// Few distinct stems relative to the market count suggests one question
/// with different terminal options (candidate names, ranges).
pub fn likely_mutually_exclusive<S: AsRef<str>>(questions: &[S]) -> bool {
    let stems: HashSet<String> = questions.iter().map(|q| question_stem(q.as_ref())).collect();
    let limit = 2.max(questions.len() * 6 / 10);
    stems.len() <= limit
}

// ---------------------------------------------------------------------------
// Monotonicity
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonotonicityViolation {
    pub cluster: String,
    pub direction: Direction,
    pub lower_threshold_market: String,
    pub higher_threshold_market: String,
    pub lower_threshold: Decimal,
    pub higher_threshold: Decimal,
    pub lower_yes: Decimal,
    pub higher_yes: Decimal,
    /// Size of the wrong-way move, 4 dp.
    pub edge_proxy: Decimal,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MonotonicityScan {
    /// Markets per cluster key.
    pub clusters: BTreeMap<String, usize>,
    pub violations: Vec<MonotonicityViolation>,
}

#[derive(Debug, Clone)]
struct Parsed<'a> {
    market: &'a ListedMarket,
    threshold: Decimal,
    yes: Decimal,
}

/// Split markets into horizon buckets: each bucket spans at most
/// `horizon_days` from its earliest end date. Undated markets share a bucket.
fn horizon_buckets<'a>(mut group: Vec<Parsed<'a>>, horizon: Duration) -> Vec<Vec<Parsed<'a>>> {
    group.sort_by_key(|p| p.market.end_date);
    let mut buckets: Vec<Vec<Parsed<'a>>> = Vec::new();
    let mut bucket_start: Option<Option<DateTime<Utc>>> = None;

    for parsed in group {
        let end = parsed.market.end_date;
        let same_bucket = match (bucket_start, end) {
            (Some(None), None) => true,
            (Some(Some(start)), Some(end)) => end - start <= horizon,
            _ => false,
        };
        if !same_bucket {
            buckets.push(Vec::new());
            bucket_start = Some(end);
        }
        if let Some(bucket) = buckets.last_mut() {
            bucket.push(parsed);
        }
    }
    buckets
}

/// Flag adjacent threshold pairs whose YES moves the wrong way.
pub fn scan_monotonicity(markets: &[ListedMarket], config: &ConsistencyConfig) -> MonotonicityScan {
    let mut scan = MonotonicityScan::default();
    let mut groups: BTreeMap<(&'static str, Direction), Vec<Parsed<'_>>> = BTreeMap::new();

    for market in markets {
        let Some(cluster) = cluster_key(&market.question) else { continue };
        *scan.clusters.entry(cluster.to_string()).or_default() += 1;

        let (Some(threshold), Some(yes)) = (parse_threshold(&market.question), market.yes_price)
        else {
            continue;
        };
        let direction = parse_direction(&market.question).unwrap_or(Direction::Above);
        groups
            .entry((cluster, direction))
            .or_default()
            .push(Parsed { market, threshold, yes });
    }

    let horizon = Duration::days(config.horizon_days);
    for ((cluster, direction), group) in groups {
        for mut bucket in horizon_buckets(group, horizon) {
            bucket.sort_by(|a, b| a.threshold.cmp(&b.threshold));
            for pair in bucket.windows(2) {
                let (lower, higher) = (&pair[0], &pair[1]);
                if lower.threshold == higher.threshold {
                    continue;
                }
                let wrong_way = match direction {
                    Direction::Above => higher.yes - lower.yes,
                    Direction::Below => lower.yes - higher.yes,
                };
                if wrong_way > config.monotonic_tolerance {
                    scan.violations.push(MonotonicityViolation {
                        cluster: cluster.to_string(),
                        direction,
                        lower_threshold_market: lower.market.question.clone(),
                        higher_threshold_market: higher.market.question.clone(),
                        lower_threshold: lower.threshold,
                        higher_threshold: higher.threshold,
                        lower_yes: lower.yes,
                        higher_yes: higher.yes,
                        edge_proxy: round4(wrong_way),
                    });
                }
            }
        }
    }

    debug!(
        clusters = scan.clusters.len(),
        violations = scan.violations.len(),
        "Monotonicity scan complete"
    );
    scan
}

// ---------------------------------------------------------------------------
// Exclusive sums
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventLeg {
    pub question: String,
    pub yes: Decimal,
    pub liquidity: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExclusiveSumFinding {
    pub event_id: String,
    pub event_title: String,
    /// 4 dp.
    pub sum_yes: Decimal,
    pub markets: Vec<EventLeg>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExclusiveSumScan {
    pub scanned_events: usize,
    pub findings: Vec<ExclusiveSumFinding>,
}

/// Flag likely-exclusive events whose top YES prices sum above `1 + tolerance`.
pub fn scan_exclusive_sums(events: &[MarketEvent], config: &ConsistencyConfig) -> ExclusiveSumScan {
    let mut scan = ExclusiveSumScan::default();
    let ceiling = Decimal::ONE + config.exclusive_tolerance;

    for event in events {
        if event.markets.len() < 2 {
            continue;
        }
        scan.scanned_events += 1;

        let mut priced: Vec<EventLeg> = event
            .markets
            .iter()
            .filter_map(|m| {
                Some(EventLeg {
                    question: m.question.clone(),
                    yes: m.yes_price?,
                    liquidity: m.liquidity,
                })
            })
            .collect();
        if priced.len() < 2 {
            continue;
        }

        let questions: Vec<&str> = priced.iter().map(|l| l.question.as_str()).collect();
        if !likely_mutually_exclusive(&questions) {
            continue;
        }

        priced.sort_by(|a, b| b.liquidity.cmp(&a.liquidity));
        priced.truncate(config.exclusive_top_n);
        let sum_yes: Decimal = priced.iter().map(|l| l.yes).sum();

        if sum_yes > ceiling {
            scan.findings.push(ExclusiveSumFinding {
                event_id: event.id.clone(),
                event_title: if event.title.is_empty() {
                    "unknown".to_string()
                } else {
                    event.title.clone()
                },
                sum_yes: round4(sum_yes),
                markets: priced
                    .into_iter()
                    .map(|l| EventLeg { yes: round4(l.yes), ..l })
                    .collect(),
            });
        }
    }

    debug!(
        scanned = scan.scanned_events,
        findings = scan.findings.len(),
        "Exclusive-sum scan complete"
    );
    scan
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
