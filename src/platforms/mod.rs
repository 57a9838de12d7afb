//! Venue integrations.
//!
//! The engine talks to the outside world only through the traits below:
//! - `BookFetcher` returns one order book per outcome token
//! - `MarketSource` lists the catalog, question-level markets and events
//! - `ExecutionGateway` submits orders (signing lives behind it)
//! - `SignalFeed` runs an optional external or news scan
//! - `SpotSource` and `NewsSource` supply the reference data those scans use
//!
//! `polymarket` implements the read side over HTTP; `paper` acknowledges
//! orders in memory; `reference` queries exchange tickers and web search.

pub mod paper;
pub mod polymarket;
pub mod reference;

use anyhow::Result;
use async_trait::async_trait;

use crate::types::{
    BookSnapshot, CatalogMarket, FetchError, Headline, ListedMarket, MarketEvent, OrderAck,
    OrderRequest, SpotQuote, SubmissionError,
};

/// Fetches a single order book. Implementations map every transport or
/// payload problem to a [`FetchError`] and never panic.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait BookFetcher: Send + Sync {
    async fn fetch_book(&self, token_id: &str) -> Result<BookSnapshot, FetchError>;
}

/// Venue catalog used for candidate selection and consistency scans.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MarketSource: Send + Sync {
    /// Markets currently in the venue's sampling set, with their tokens.
    async fn sampling_markets(&self) -> Result<Vec<CatalogMarket>>;

    /// Active markets with question text and outcome prices.
    async fn listed_markets(&self) -> Result<Vec<ListedMarket>>;

    /// Active events with their grouped markets.
    async fn events(&self) -> Result<Vec<MarketEvent>>;
}

/// Order submission boundary.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ExecutionGateway: Send + Sync {
    async fn submit(&self, order: &OrderRequest) -> Result<OrderAck, SubmissionError>;

    /// Gateway name for logging and the trade ledger.
    fn name(&self) -> &'static str;

    /// True when acknowledgements never reach a venue.
    fn is_simulated(&self) -> bool {
        false
    }
}

/// Kind of external scan a lane can ask for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalKind {
    /// Compare venue prices against outside reference data.
    ExternalReality,
    /// Scan recent news for markets worth a closer look.
    News,
    /// Record YES prices and report trending markets.
    PriceHistory,
}

impl SignalKind {
    pub fn as_str(self) -> &'static str {
        match self {
            SignalKind::ExternalReality => "external_signal",
            SignalKind::News => "news_signal",
            SignalKind::PriceHistory => "price_history",
        }
    }
}

/// Optional external-signal lanes. Returns the number of findings.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SignalFeed: Send + Sync {
    async fn run(&self, kind: SignalKind) -> Result<usize>;
}

/// Exchange spot prices. One quote per exchange, failures included.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SpotSource: Send + Sync {
    async fn btc_quotes(&self) -> Vec<SpotQuote>;
}

/// Web search used by the news lane.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait NewsSource: Send + Sync {
    async fn search(&self, query: &str) -> Result<Vec<Headline>>;
}
