//! Bounded-concurrency order book scanner.
//!
//! Selects candidate markets from the venue catalog, then fetches every
//! outcome book through a fixed pool of workers. Workers pull the next
//! candidate from a shared atomic index and write their result into that
//! candidate's slot, so output order always matches input order regardless
//! of completion order. A failing market never affects its neighbours.

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::{join_all, try_join_all};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::ScanConfig;
use crate::platforms::BookFetcher;
use crate::types::{BookSnapshot, CatalogMarket, FetchError, MarketCandidate};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Retry and pool settings for one scan.
#[derive(Debug, Clone, PartialEq)]
pub struct ScanPolicy {
    pub concurrency: usize,
    pub max_retries: u32,
    pub base_delay: Duration,
    /// Per-attempt limit; a timed-out attempt counts as a transient failure.
    pub fetch_timeout: Option<Duration>,
}

impl Default for ScanPolicy {
    fn default() -> Self {
        Self {
            concurrency: 16,
            max_retries: 2,
            base_delay: Duration::from_millis(250),
            fetch_timeout: None,
        }
    }
}

impl From<&ScanConfig> for ScanPolicy {
    fn from(config: &ScanConfig) -> Self {
        Self {
            concurrency: config.concurrency.max(1),
            max_retries: config.max_retries,
            base_delay: Duration::from_millis(config.retry_base_ms),
            fetch_timeout: (config.fetch_timeout_ms > 0)
                .then(|| Duration::from_millis(config.fetch_timeout_ms)),
        }
    }
}

/// Sample errors kept in scan statistics.
const MAX_SAMPLE_ERRORS: usize = 3;

// ---------------------------------------------------------------------------
// Candidate selection
// ---------------------------------------------------------------------------

/// Markets chosen for one scan pass.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CandidateSet {
    pub sampled: usize,
    pub binary: Vec<MarketCandidate>,
    pub multi_outcome: Vec<MarketCandidate>,
}

impl CandidateSet {
    /// Binary markets first, then multi-outcome markets.
    pub fn all(&self) -> Vec<MarketCandidate> {
        self.binary
            .iter()
            .chain(self.multi_outcome.iter())
            .cloned()
            .collect()
    }
}

/// Keep tradeable markets, most liquid first. Binary markets are capped at
/// `market_limit`; 3..=`max_legs` outcome markets are included only when
/// `multi_outcome` is set and are capped at `multi_limit`.
pub fn select_candidates(
    catalog: &[CatalogMarket],
    market_limit: usize,
    multi_outcome: bool,
    multi_limit: usize,
    max_legs: usize,
) -> CandidateSet {
    let by_liquidity = |legs: &dyn Fn(usize) -> bool| -> Vec<MarketCandidate> {
        let mut picked: Vec<MarketCandidate> = catalog
            .iter()
            .filter(|m| m.is_tradeable() && legs(m.tokens.len()))
            .map(CatalogMarket::to_candidate)
            .collect();
        picked.sort_by(|a, b| b.liquidity_hint.cmp(&a.liquidity_hint));
        picked
    };

    let mut binary = by_liquidity(&|n: usize| n == 2);
    binary.truncate(market_limit);

    let multi_outcome = if multi_outcome {
        let mut multi = by_liquidity(&|n: usize| n > 2 && n <= max_legs);
        multi.truncate(multi_limit);
        multi
    } else {
        Vec::new()
    };

    CandidateSet {
        sampled: catalog.len(),
        binary,
        multi_outcome,
    }
}

// ---------------------------------------------------------------------------
// Worker pool
// ---------------------------------------------------------------------------

/// Run `f` over `items` with at most `concurrency` in flight.
///
/// Results are returned in input order. Dropping the returned future cancels
/// every worker.
pub async fn map_bounded<'a, T, R, F, Fut>(items: &'a [T], concurrency: usize, f: F) -> Vec<R>
where
    F: Fn(usize, &'a T) -> Fut,
    Fut: Future<Output = R>,
{
    let next = AtomicUsize::new(0);
    let (next, f) = (&next, &f);

    let workers = (0..concurrency.max(1).min(items.len().max(1))).map(|_| async move {
        let mut done = Vec::new();
        loop {
            let index = next.fetch_add(1, Ordering::Relaxed);
            let Some(item) = items.get(index) else { break };
            done.push((index, f(index, item).await));
        }
        done
    });

    let mut slots: Vec<Option<R>> = (0..items.len()).map(|_| None).collect();
    for (index, result) in join_all(workers).await.into_iter().flatten() {
        slots[index] = Some(result);
    }
    slots.into_iter().flatten().collect()
}

// ---------------------------------------------------------------------------
// Scanner
// ---------------------------------------------------------------------------

/// Books for every outcome of one market, in outcome order.
#[derive(Debug, Clone, PartialEq)]
pub struct MarketBooks {
    pub candidate: MarketCandidate,
    pub books: Vec<BookSnapshot>,
}

impl MarketBooks {
    /// Any leg with an empty ask side.
    pub fn has_empty_book(&self) -> bool {
        self.books.iter().any(|b| !b.has_asks())
    }
}

/// A market whose books could not be fetched.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{market_id}: {source}")]
pub struct ScanError {
    pub market_id: String,
    #[source]
    pub source: FetchError,
}

/// Fetch outcome per market, in candidate order.
pub type ScanResults = Vec<Result<MarketBooks, ScanError>>;

/// Counters published with every opportunity snapshot.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanStats {
    pub sampled: usize,
    pub scanned: usize,
    pub multi_outcome_scanned: usize,
    pub valid_books: usize,
    pub empty_books: usize,
    pub errors: usize,
    pub sample_errors: Vec<String>,
    pub opportunities: usize,
    pub duration_ms: u64,
}

impl ScanStats {
    /// Count fetch outcomes. `opportunities` and `duration_ms` are filled in
    /// by the caller.
    pub fn from_results(candidates: &CandidateSet, results: &ScanResults) -> Self {
        let mut stats = ScanStats {
            sampled: candidates.sampled,
            scanned: candidates.binary.len(),
            multi_outcome_scanned: candidates.multi_outcome.len(),
            ..Default::default()
        };
        for result in results {
            match result {
                Ok(books) => {
                    stats.valid_books += 1;
                    if books.has_empty_book() {
                        stats.empty_books += 1;
                    }
                }
                Err(e) => {
                    stats.errors += 1;
                    if stats.sample_errors.len() < MAX_SAMPLE_ERRORS {
                        stats.sample_errors.push(e.to_string());
                    }
                }
            }
        }
        stats
    }
}

pub struct BoundedScanner {
    fetcher: Arc<dyn BookFetcher>,
    policy: ScanPolicy,
}

impl BoundedScanner {
    pub fn new(fetcher: Arc<dyn BookFetcher>, policy: ScanPolicy) -> Self {
        Self { fetcher, policy }
    }

    pub fn policy(&self) -> &ScanPolicy {
        &self.policy
    }

    /// Fetch every leg of every candidate. One entry per candidate, same order.
    pub async fn scan(&self, candidates: &[MarketCandidate]) -> ScanResults {
        info!(
            markets = candidates.len(),
            concurrency = self.policy.concurrency,
            "Starting book scan"
        );

        let results = map_bounded(candidates, self.policy.concurrency, |_, candidate| {
            self.scan_market(candidate)
        })
        .await;

        let failed = results.iter().filter(|r| r.is_err()).count();
        info!(
            markets = results.len(),
            failed,
            "Book scan complete"
        );
        results
    }

    /// Fetch all legs of one market concurrently; any leg failure fails it.
    async fn scan_market(&self, candidate: &MarketCandidate) -> Result<MarketBooks, ScanError> {
        let legs = candidate
            .outcome_tokens
            .iter()
            .map(|token| self.fetch_with_retry(&token.id));

        match try_join_all(legs).await {
            Ok(books) => Ok(MarketBooks {
                candidate: candidate.clone(),
                books,
            }),
            Err(source) => {
                warn!(market = %candidate.id, error = %source, "Market scan failed, skipping");
                Err(ScanError {
                    market_id: candidate.id.clone(),
                    source,
                })
            }
        }
    }

    /// One book with retry: delay `base × 2^attempt` between attempts.
    pub async fn fetch_with_retry(&self, token_id: &str) -> Result<BookSnapshot, FetchError> {
        let mut attempt: u32 = 0;
        loop {
            let result = match self.policy.fetch_timeout {
                Some(limit) => tokio::time::timeout(limit, self.fetcher.fetch_book(token_id))
                    .await
                    .unwrap_or(Err(FetchError::Timeout)),
                None => self.fetcher.fetch_book(token_id).await,
            };

            match result {
                Ok(book) => return Ok(book),
                Err(e) if attempt < self.policy.max_retries => {
                    let delay = self.policy.base_delay * 2u32.saturating_pow(attempt);
                    debug!(
                        token = token_id,
                        attempt = attempt + 1,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Book fetch failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
