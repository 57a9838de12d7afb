//! External-signal feed.
//!
//! [`MarketSignalFeed`] backs the orchestrator's signal units. Each kind
//! writes its own artifact and returns its finding count:
//!
//! | Kind              | Artifact                        | Findings              |
//! |-------------------|---------------------------------|-----------------------|
//! | `ExternalReality` | `external_signal_snapshot.json` | spot-mispriced markets |
//! | `PriceHistory`    | `price_history.json`            | trending markets      |
//! | `News`            | `news_signal_snapshot.json`     | scored headlines      |

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::platforms::{MarketSource, NewsSource, SignalFeed, SignalKind, SpotSource};
use crate::storage::{load_or_default, save_atomic, ArtifactPaths};
use crate::strategy::consistency::{cluster_key, scan_monotonicity, ConsistencyConfig, MonotonicityViolation};
use crate::strategy::signals::{
    consensus_spot, momentum, news_queries, score_headline, spot_candidates, topic_keywords,
    tracked_markets, PriceHistory, SignalConfig, SpotCandidate, Trend,
};
use crate::types::{ListedMarket, SpotQuote};

/// Results per query considered for scoring.
const RESULTS_PER_QUERY: usize = 6;

// ---------------------------------------------------------------------------
// Artifacts
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpotSummary {
    pub median_btc_usd: Option<Decimal>,
    pub sources: Vec<SpotQuote>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExternalSignalStats {
    pub markets: usize,
    pub btc_markets: usize,
    pub candidates: usize,
    pub monotonic_violations: usize,
}

/// Contents of `external_signal_snapshot.json`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExternalSignalSnapshot {
    pub timestamp: Option<DateTime<Utc>>,
    pub spot: SpotSummary,
    pub stats: ExternalSignalStats,
    pub candidates: Vec<SpotCandidate>,
    pub monotonic_violations: Vec<MonotonicityViolation>,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryOutcome {
    pub query: String,
    pub results: usize,
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewsCandidate {
    pub query: String,
    pub title: String,
    pub url: String,
    pub age: Option<String>,
    pub matched_keywords: Vec<String>,
    pub urgency_hits: usize,
    pub score: Decimal,
}

/// Contents of `news_signal_snapshot.json`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NewsSignalSnapshot {
    pub timestamp: Option<DateTime<Utc>>,
    pub enabled: bool,
    /// Why the scan did not run, when `enabled` is false.
    pub reason: Option<String>,
    pub keywords: Vec<String>,
    pub queries: Vec<QueryOutcome>,
    pub candidates: Vec<NewsCandidate>,
    pub duration_ms: u64,
}

// ---------------------------------------------------------------------------
// Feed
// ---------------------------------------------------------------------------

/// Signal feed over the venue catalog plus outside reference data.
pub struct MarketSignalFeed {
    catalog: Arc<dyn MarketSource>,
    spot: Arc<dyn SpotSource>,
    news: Option<Arc<dyn NewsSource>>,
    paths: ArtifactPaths,
    config: SignalConfig,
}

impl MarketSignalFeed {
    pub fn new(catalog: Arc<dyn MarketSource>, spot: Arc<dyn SpotSource>, paths: ArtifactPaths) -> Self {
        Self {
            catalog,
            spot,
            news: None,
            paths,
            config: SignalConfig::default(),
        }
    }

    /// Enable the news lane.
    pub fn with_news(mut self, news: Arc<dyn NewsSource>) -> Self {
        self.news = Some(news);
        self
    }

    async fn listed(&self) -> Result<Vec<ListedMarket>> {
        self.catalog
            .listed_markets()
            .await
            .context("Failed to load listed markets")
    }

    /// BTC threshold markets against the exchange consensus.
    async fn external_reality(&self) -> Result<usize> {
        let started = Instant::now();
        let (markets, quotes) = tokio::join!(self.listed(), self.spot.btc_quotes());
        let markets = markets?;
        let now = Utc::now();

        let btc: Vec<ListedMarket> = markets
            .iter()
            .filter(|m| cluster_key(&m.question) == Some("btc"))
            .cloned()
            .collect();
        let spot = consensus_spot(&quotes);
        let candidates = match spot {
            Some(spot) => spot_candidates(&btc, spot, now, &self.config),
            None => {
                warn!(sources = quotes.len(), "No usable spot quote, skipping spot comparison");
                Vec::new()
            }
        };

        let consistency = ConsistencyConfig {
            monotonic_tolerance: self.config.monotonic_tolerance,
            ..ConsistencyConfig::default()
        };
        let mut monotonic = scan_monotonicity(&btc, &consistency).violations;
        monotonic.sort_by(|a, b| b.edge_proxy.cmp(&a.edge_proxy));
        monotonic.truncate(self.config.max_candidates);

        let found = candidates.len();
        let snapshot = ExternalSignalSnapshot {
            timestamp: Some(now),
            spot: SpotSummary {
                median_btc_usd: spot,
                sources: quotes,
            },
            stats: ExternalSignalStats {
                markets: markets.len(),
                btc_markets: btc.len(),
                candidates: found,
                monotonic_violations: monotonic.len(),
            },
            candidates,
            monotonic_violations: monotonic,
            duration_ms: started.elapsed().as_millis() as u64,
        };
        save_atomic(&self.paths.external_signal(), &snapshot)?;

        info!(
            spot = ?spot,
            btc_markets = snapshot.stats.btc_markets,
            candidates = found,
            violations = snapshot.stats.monotonic_violations,
            "External signal scan finished"
        );
        Ok(found)
    }

    /// Append current YES prices and count markets trending either way.
    async fn price_history(&self) -> Result<usize> {
        let markets = self.listed().await?;
        let path = self.paths.price_history();
        let mut history: PriceHistory = load_or_default(&path);

        let tracked = tracked_markets(&markets, self.config.tracked_markets);
        let recorded = history.record(&tracked, Utc::now(), self.config.history_points);
        save_atomic(&path, &history)?;

        let mut trending = 0;
        for (id, market) in &history.markets {
            let m = momentum(&market.prices, self.config.momentum_window, self.config.momentum_pct);
            if m.trend != Trend::Flat {
                trending += 1;
                debug!(market = %id, trend = ?m.trend, pct = ?m.pct_change, "Trending market");
            }
        }

        info!(recorded, tracked = history.markets.len(), trending, "Price history updated");
        Ok(trending)
    }

    /// Headlines that touch the most liquid topics or carry urgency terms.
    async fn news(&self) -> Result<usize> {
        let started = Instant::now();
        let Some(source) = &self.news else {
            let snapshot = NewsSignalSnapshot {
                timestamp: Some(Utc::now()),
                enabled: false,
                reason: Some("news search key not configured".into()),
                ..NewsSignalSnapshot::default()
            };
            save_atomic(&self.paths.news_signal(), &snapshot)?;
            debug!("News scan disabled");
            return Ok(0);
        };

        let markets = self.listed().await?;
        let keywords = topic_keywords(&markets, self.config.topic_markets, self.config.topic_keywords);
        let queries = news_queries(&keywords);

        let mut outcomes = Vec::with_capacity(queries.len());
        let mut candidates: Vec<NewsCandidate> = Vec::new();
        for query in &queries {
            match source.search(query).await {
                Ok(headlines) => {
                    outcomes.push(QueryOutcome {
                        query: query.clone(),
                        results: headlines.len(),
                        error: None,
                    });
                    for headline in headlines.into_iter().take(RESULTS_PER_QUERY) {
                        let scored = score_headline(&headline, &keywords);
                        if scored.score < self.config.headline_floor {
                            continue;
                        }
                        candidates.push(NewsCandidate {
                            query: query.clone(),
                            title: headline.title,
                            url: headline.url,
                            age: headline.age,
                            matched_keywords: scored.matched_keywords,
                            urgency_hits: scored.urgency_hits,
                            score: scored.score,
                        });
                    }
                }
                Err(e) => {
                    warn!(query = %query, error = %e, "News query failed");
                    outcomes.push(QueryOutcome {
                        query: query.clone(),
                        results: 0,
                        error: Some(e.to_string()),
                    });
                }
            }
        }

        let mut seen = HashSet::new();
        candidates.retain(|c| seen.insert(c.url.clone()));
        candidates.sort_by(|a, b| b.score.cmp(&a.score));
        candidates.truncate(self.config.max_headlines);

        let found = candidates.len();
        let failed = outcomes.iter().filter(|o| o.error.is_some()).count();
        let snapshot = NewsSignalSnapshot {
            timestamp: Some(Utc::now()),
            enabled: true,
            reason: None,
            keywords,
            queries: outcomes,
            candidates,
            duration_ms: started.elapsed().as_millis() as u64,
        };
        save_atomic(&self.paths.news_signal(), &snapshot)?;

        info!(queries = snapshot.queries.len(), failed, candidates = found, "News scan finished");
        Ok(found)
    }
}

#[async_trait]
impl SignalFeed for MarketSignalFeed {
    async fn run(&self, kind: SignalKind) -> Result<usize> {
        match kind {
            SignalKind::ExternalReality => self.external_reality().await,
            SignalKind::PriceHistory => self.price_history().await,
            SignalKind::News => self.news().await,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
