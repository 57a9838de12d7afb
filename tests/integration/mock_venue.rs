//! Mock venue for integration testing.
//!
//! Provides deterministic `BookFetcher`, `MarketSource`, `SpotSource` and
//! `NewsSource` implementations that serve known books, catalog entries,
//! listed markets, events, spot quotes and headlines, all in-memory with no
//! external dependencies.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{Duration, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use basket_arb::platforms::{BookFetcher, MarketSource, NewsSource, SpotSource};
use basket_arb::types::*;

/// Question prefix long enough that the 80-char stem ignores the suffix.
const RACE_PREFIX: &str =
    "Who will be named the overall winner of the annual international championship final held this summer:";

#[derive(Clone)]
struct MockBook {
    bids: Vec<BookLevel>,
    asks: Vec<BookLevel>,
}

/// A mock venue for deterministic testing.
///
/// Markets:
/// - `MKT-ARB`: asks sum to 0.95 (buy-all edge 0.05)
/// - `MKT-SELL`: bids sum to 1.03 (sell-all edge 0.03)
/// - `MKT-FAIR`: no mispricing
/// - `MKT-THIN`: one leg has an empty ask side
/// - `MKT-FAIL`: every book fetch returns HTTP 500
/// - `MKT-CLOSED`: closed, never scanned
///
/// Spot: binance and coinbase quote BTC at 104,000, kraken is down.
pub struct MockVenue {
    catalog: Vec<CatalogMarket>,
    books: HashMap<String, MockBook>,
    failing_tokens: HashSet<String>,
    listed: Vec<ListedMarket>,
    events: Vec<MarketEvent>,
    /// If set, all catalog operations will return this error.
    force_error: Arc<Mutex<Option<String>>>,
    fetches: AtomicUsize,
}

impl MockVenue {
    pub fn new() -> Self {
        let mut venue = Self {
            catalog: Vec::new(),
            books: HashMap::new(),
            failing_tokens: HashSet::new(),
            listed: Self::default_listed(),
            events: Self::default_events(),
            force_error: Arc::new(Mutex::new(None)),
            fetches: AtomicUsize::new(0),
        };

        venue.add_binary(
            "MKT-ARB",
            dec!(9000),
            (vec![(dec!(0.40), dec!(30))], vec![(dec!(0.45), dec!(50)), (dec!(0.47), dec!(100))]),
            (vec![(dec!(0.45), dec!(30))], vec![(dec!(0.50), dec!(50))]),
        );
        venue.add_binary(
            "MKT-SELL",
            dec!(8000),
            (vec![(dec!(0.53), dec!(40))], vec![(dec!(0.60), dec!(40))]),
            (vec![(dec!(0.50), dec!(40))], vec![(dec!(0.55), dec!(40))]),
        );
        venue.add_binary(
            "MKT-FAIR",
            dec!(7000),
            (vec![(dec!(0.48), dec!(10))], vec![(dec!(0.52), dec!(10))]),
            (vec![(dec!(0.47), dec!(10))], vec![(dec!(0.50), dec!(10))]),
        );
        venue.add_binary(
            "MKT-THIN",
            dec!(6000),
            (Vec::new(), vec![(dec!(0.30), dec!(10))]),
            (Vec::new(), Vec::new()),
        );
        venue.add_binary("MKT-FAIL", dec!(5000), (Vec::new(), Vec::new()), (Vec::new(), Vec::new()));
        venue.failing_tokens.insert("MKT-FAIL-yes".into());
        venue.failing_tokens.insert("MKT-FAIL-no".into());

        let mut closed = Self::catalog_entry("MKT-CLOSED", dec!(10000));
        closed.closed = true;
        venue.catalog.push(closed);

        venue
    }

    /// Force all subsequent catalog operations to return an error.
    pub fn set_error(&self, msg: &str) {
        *self.force_error.lock().unwrap() = Some(msg.to_string());
    }

    /// Book fetches served so far, including failures.
    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    fn catalog_entry(id: &str, liquidity: Decimal) -> CatalogMarket {
        CatalogMarket {
            condition_id: id.to_string(),
            tokens: vec![
                OutcomeToken {
                    id: format!("{id}-yes"),
                    outcome_label: "Yes".into(),
                },
                OutcomeToken {
                    id: format!("{id}-no"),
                    outcome_label: "No".into(),
                },
            ],
            liquidity,
            active: true,
            closed: false,
            archived: false,
            accepting_orders: true,
        }
    }

    fn add_binary(
        &mut self,
        id: &str,
        liquidity: Decimal,
        yes: (Vec<(Decimal, Decimal)>, Vec<(Decimal, Decimal)>),
        no: (Vec<(Decimal, Decimal)>, Vec<(Decimal, Decimal)>),
    ) {
        let levels = |raw: Vec<(Decimal, Decimal)>| -> Vec<BookLevel> {
            raw.into_iter().map(|(p, s)| BookLevel::new(p, s)).collect()
        };
        self.catalog.push(Self::catalog_entry(id, liquidity));
        for (suffix, (bids, asks)) in [("yes", yes), ("no", no)] {
            self.books.insert(
                format!("{id}-{suffix}"),
                MockBook {
                    bids: levels(bids),
                    asks: levels(asks),
                },
            );
        }
    }

    fn check_error(&self) -> Result<()> {
        match self.force_error.lock().unwrap().as_ref() {
            Some(err) => Err(anyhow!("{}", err)),
            None => Ok(()),
        }
    }

    /// A bitcoin threshold ladder priced the wrong way round, resolving in
    /// ten days.
    fn default_listed() -> Vec<ListedMarket> {
        let end = Some(Utc::now() + Duration::days(10));
        vec![
            ListedMarket {
                id: "L-BTC-90".into(),
                question: "Will Bitcoin be above $90,000 by December 31?".into(),
                end_date: end,
                yes_price: Some(dec!(0.30)),
                liquidity: dec!(5000),
            },
            ListedMarket {
                id: "L-BTC-100".into(),
                question: "Will Bitcoin be above $100,000 by December 31?".into(),
                end_date: end,
                yes_price: Some(dec!(0.40)),
                liquidity: dec!(5000),
            },
            ListedMarket {
                id: "L-OTHER".into(),
                question: "Will it snow in Sydney this year?".into(),
                end_date: end,
                yes_price: Some(dec!(0.05)),
                liquidity: dec!(100),
            },
        ]
    }

    /// One exclusive event whose YES prices sum to 1.15.
    fn default_events() -> Vec<MarketEvent> {
        let leg = |name: &str, yes: Decimal| ListedMarket {
            id: format!("E-{name}"),
            question: format!("{RACE_PREFIX} {name}?"),
            end_date: None,
            yes_price: Some(yes),
            liquidity: dec!(1000),
        };
        vec![MarketEvent {
            id: "EVT-1".into(),
            title: "Championship winner".into(),
            markets: vec![leg("Alpha", dec!(0.40)), leg("Bravo", dec!(0.40)), leg("Charlie", dec!(0.35))],
        }]
    }
}

#[async_trait]
impl BookFetcher for MockVenue {
    async fn fetch_book(&self, token_id: &str) -> Result<BookSnapshot, FetchError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        if self.failing_tokens.contains(token_id) {
            return Err(FetchError::HttpStatus(500));
        }
        let book = self
            .books
            .get(token_id)
            .cloned()
            .ok_or_else(|| FetchError::Malformed(format!("unknown token {token_id}")))?;
        Ok(BookSnapshot {
            token_id: token_id.to_string(),
            bids: book.bids,
            asks: book.asks,
            fetched_at: Utc::now(),
        })
    }
}

#[async_trait]
impl MarketSource for MockVenue {
    async fn sampling_markets(&self) -> Result<Vec<CatalogMarket>> {
        self.check_error()?;
        Ok(self.catalog.clone())
    }

    async fn listed_markets(&self) -> Result<Vec<ListedMarket>> {
        self.check_error()?;
        Ok(self.listed.clone())
    }

    async fn events(&self) -> Result<Vec<MarketEvent>> {
        self.check_error()?;
        Ok(self.events.clone())
    }
}

#[async_trait]
impl SpotSource for MockVenue {
    async fn btc_quotes(&self) -> Vec<SpotQuote> {
        vec![
            SpotQuote::ok("binance", dec!(104000)),
            SpotQuote::ok("coinbase", dec!(104000)),
            SpotQuote::failed("kraken", "HTTP 503"),
        ]
    }
}

#[async_trait]
impl NewsSource for MockVenue {
    async fn search(&self, _query: &str) -> Result<Vec<Headline>> {
        self.check_error()?;
        Ok(vec![
            Headline {
                title: "Breaking: Bitcoin ETF approval as SEC weighs lawsuit".into(),
                url: "https://news.example/btc-etf".into(),
                description: String::new(),
                age: Some("3 hours ago".into()),
            },
            Headline {
                title: "Local weather update".into(),
                url: "https://news.example/weather".into(),
                description: "Clear skies expected".into(),
                age: None,
            },
        ])
    }
}
