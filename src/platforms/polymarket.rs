//! Polymarket integration (read side).
//!
//! Uses the CLOB API for order books and the sampling catalog, and the Gamma
//! API for question-level markets and events. All endpoints used here are
//! public and unauthenticated.
//!
//! CLOB API: https://clob.polymarket.com
//! Gamma API: https://gamma-api.polymarket.com
//!
//! Upstream payloads are loose (numbers sent as strings, arrays sent as
//! stringified JSON, lists sometimes wrapped in an object). The schema types
//! below absorb that, and conversion drops anything that does not parse
//! instead of failing the whole response.

use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use reqwest::Client;
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::config::VenueConfig;
use crate::platforms::{BookFetcher, MarketSource};
use crate::types::{
    BookLevel, BookSnapshot, CatalogMarket, FetchError, ListedMarket, MarketEvent, OutcomeToken,
};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Sampling catalog pages followed per call.
const MAX_SAMPLING_PAGES: usize = 10;
/// Cursor the CLOB returns after the last page.
const END_CURSOR: &str = "LTE=";
const EVENTS_LIMIT: usize = 250;

// ---------------------------------------------------------------------------
// Wire schema
// ---------------------------------------------------------------------------

/// A number the venue may send as a JSON number or a decimal string.
#[derive(Debug, Deserialize, Clone)]
#[serde(untagged)]
pub enum NumberLike {
    Number(serde_json::Number),
    Text(String),
    Other(serde_json::Value),
}

impl NumberLike {
    /// Finite decimal value, or `None` for anything else.
    pub fn to_decimal(&self) -> Option<Decimal> {
        match self {
            NumberLike::Number(n) => Decimal::from_str(&n.to_string())
                .ok()
                .or_else(|| n.as_f64().and_then(Decimal::from_f64)),
            NumberLike::Text(s) => {
                let s = s.trim();
                Decimal::from_str(s)
                    .or_else(|_| Decimal::from_scientific(s))
                    .ok()
            }
            NumberLike::Other(_) => None,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct RawLevel {
    #[serde(default)]
    pub price: Option<NumberLike>,
    #[serde(default)]
    pub size: Option<NumberLike>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RawBook {
    #[serde(default)]
    pub asset_id: Option<String>,
    #[serde(default)]
    pub bids: Option<Vec<RawLevel>>,
    #[serde(default)]
    pub asks: Option<Vec<RawLevel>>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SamplingPage {
    #[serde(default)]
    pub data: Vec<SamplingMarket>,
    #[serde(default)]
    pub next_cursor: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SamplingMarket {
    #[serde(default)]
    pub condition_id: String,
    #[serde(default)]
    pub tokens: Vec<SamplingToken>,
    #[serde(default)]
    pub liquidity: Option<NumberLike>,
    #[serde(default)]
    pub active: bool,
    #[serde(default)]
    pub closed: bool,
    #[serde(default)]
    pub archived: bool,
    #[serde(default)]
    pub accepting_orders: bool,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SamplingToken {
    #[serde(default)]
    pub token_id: String,
    #[serde(default)]
    pub outcome: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct GammaMarket {
    #[serde(default)]
    pub id: Option<serde_json::Value>,
    #[serde(default)]
    pub question: String,
    #[serde(default, rename = "conditionId")]
    pub condition_id: String,
    #[serde(default, rename = "endDate")]
    pub end_date: Option<String>,
    /// Either a JSON array or a stringified one: "[\"0.65\",\"0.35\"]".
    #[serde(default, rename = "outcomePrices")]
    pub outcome_prices: Option<serde_json::Value>,
    #[serde(default)]
    pub liquidity: Option<NumberLike>,
    #[serde(default, rename = "liquidityNum")]
    pub liquidity_num: Option<NumberLike>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct GammaEvent {
    #[serde(default)]
    pub id: Option<serde_json::Value>,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub markets: Vec<GammaMarket>,
}

/// Gamma list endpoints return a bare array or an object wrapping one.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum ListResponse<T> {
    Bare(Vec<T>),
    Wrapped {
        #[serde(default = "Vec::new")]
        markets: Vec<T>,
        #[serde(default = "Vec::new")]
        events: Vec<T>,
        #[serde(default = "Vec::new")]
        data: Vec<T>,
    },
}

impl<T> ListResponse<T> {
    pub fn into_items(self) -> Vec<T> {
        match self {
            ListResponse::Bare(items) => items,
            ListResponse::Wrapped {
                markets,
                events,
                data,
            } => {
                if !markets.is_empty() {
                    markets
                } else if !events.is_empty() {
                    events
                } else {
                    data
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Conversion
// ---------------------------------------------------------------------------

/// Convert a raw book, dropping levels whose price or size is unusable.
pub fn convert_book(token_id: &str, raw: RawBook, fetched_at: DateTime<Utc>) -> BookSnapshot {
    let levels = |side: Option<Vec<RawLevel>>| -> Vec<BookLevel> {
        side.unwrap_or_default()
            .iter()
            .filter_map(|l| {
                let price = l.price.as_ref()?.to_decimal()?;
                let size = l.size.as_ref()?.to_decimal()?;
                (size >= Decimal::ZERO).then_some(BookLevel::new(price, size))
            })
            .collect()
    };

    BookSnapshot {
        token_id: raw.asset_id.filter(|a| !a.is_empty()).unwrap_or_else(|| token_id.to_string()),
        bids: levels(raw.bids),
        asks: levels(raw.asks),
        fetched_at,
    }
}

/// Convert a sampling entry; entries without ids are skipped.
pub fn convert_sampling_market(m: &SamplingMarket) -> Option<CatalogMarket> {
    if m.condition_id.is_empty() || m.tokens.iter().any(|t| t.token_id.is_empty()) {
        return None;
    }
    Some(CatalogMarket {
        condition_id: m.condition_id.clone(),
        tokens: m
            .tokens
            .iter()
            .map(|t| OutcomeToken {
                id: t.token_id.clone(),
                outcome_label: t.outcome.clone(),
            })
            .collect(),
        liquidity: m
            .liquidity
            .as_ref()
            .and_then(NumberLike::to_decimal)
            .unwrap_or(Decimal::ZERO),
        active: m.active,
        closed: m.closed,
        archived: m.archived,
        accepting_orders: m.accepting_orders,
    })
}

/// Parse outcome prices from a JSON array or Gamma's stringified form.
pub fn parse_outcome_prices(value: &serde_json::Value) -> Vec<Decimal> {
    let items: Vec<serde_json::Value> = match value {
        serde_json::Value::Array(items) => items.clone(),
        serde_json::Value::String(s) => match serde_json::from_str(s) {
            Ok(serde_json::Value::Array(items)) => items,
            _ => s
                .replace(['[', ']', '"', '\\'], "")
                .split(',')
                .map(|p| serde_json::Value::String(p.trim().to_string()))
                .collect(),
        },
        _ => Vec::new(),
    };

    items
        .into_iter()
        .map_while(|item| match item {
            serde_json::Value::Number(n) => NumberLike::Number(n).to_decimal(),
            serde_json::Value::String(s) => NumberLike::Text(s).to_decimal(),
            _ => None,
        })
        .collect()
}

/// RFC 3339 timestamp or bare `YYYY-MM-DD` (end of day, UTC).
pub fn parse_end_date(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
        .or_else(|| {
            NaiveDate::parse_from_str(raw.get(..10).unwrap_or(raw), "%Y-%m-%d")
                .ok()
                .and_then(|nd| nd.and_hms_opt(23, 59, 59))
                .map(|dt| dt.and_utc())
        })
}

fn json_id(value: &Option<serde_json::Value>) -> Option<String> {
    match value.as_ref()? {
        serde_json::Value::String(s) if !s.is_empty() => Some(s.clone()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Convert a Gamma market; markets without a question are skipped.
pub fn convert_gamma_market(gm: &GammaMarket) -> Option<ListedMarket> {
    if gm.question.trim().is_empty() {
        return None;
    }
    let id = json_id(&gm.id)
        .or_else(|| (!gm.condition_id.is_empty()).then(|| gm.condition_id.clone()))?;
    let yes_price = gm
        .outcome_prices
        .as_ref()
        .map(parse_outcome_prices)
        .and_then(|prices| prices.first().copied());
    let liquidity = gm
        .liquidity_num
        .as_ref()
        .or(gm.liquidity.as_ref())
        .and_then(NumberLike::to_decimal)
        .unwrap_or(Decimal::ZERO);

    Some(ListedMarket {
        id,
        question: gm.question.clone(),
        end_date: gm.end_date.as_deref().and_then(parse_end_date),
        yes_price,
        liquidity,
    })
}

pub fn convert_gamma_event(ge: &GammaEvent) -> Option<MarketEvent> {
    let id = json_id(&ge.id)?;
    Some(MarketEvent {
        id,
        title: ge.title.clone(),
        markets: ge.markets.iter().filter_map(convert_gamma_market).collect(),
    })
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

pub struct PolymarketClient {
    http: Client,
    clob_url: String,
    gamma_url: String,
    listing_limit: usize,
}

impl PolymarketClient {
    pub fn new(config: &VenueConfig) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .context("Failed to build Polymarket HTTP client")?;

        Ok(Self {
            http,
            clob_url: config.clob_url.trim_end_matches('/').to_string(),
            gamma_url: config.gamma_url.trim_end_matches('/').to_string(),
            listing_limit: config.listing_limit,
        })
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, String)],
    ) -> Result<T> {
        let resp = self
            .http
            .get(url)
            .query(query)
            .send()
            .await
            .with_context(|| format!("Request failed: {url}"))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("Polymarket API error {status} for {url}: {body}");
        }

        resp.json()
            .await
            .with_context(|| format!("Failed to parse response from {url}"))
    }
}

fn classify_transport(e: reqwest::Error) -> FetchError {
    if e.is_timeout() {
        FetchError::Timeout
    } else if let Some(status) = e.status() {
        FetchError::HttpStatus(status.as_u16())
    } else {
        FetchError::Transport(e.to_string())
    }
}

// ---------------------------------------------------------------------------
// Trait implementations
// ---------------------------------------------------------------------------

#[async_trait]
impl BookFetcher for PolymarketClient {
    async fn fetch_book(&self, token_id: &str) -> Result<BookSnapshot, FetchError> {
        let url = format!("{}/book", self.clob_url);
        let resp = self
            .http
            .get(&url)
            .query(&[("token_id", token_id)])
            .send()
            .await
            .map_err(classify_transport)?;

        if !resp.status().is_success() {
            return Err(FetchError::HttpStatus(resp.status().as_u16()));
        }

        let raw: RawBook = resp.json().await.map_err(|e| {
            if e.is_timeout() {
                FetchError::Timeout
            } else {
                FetchError::Malformed(e.to_string())
            }
        })?;

        Ok(convert_book(token_id, raw, Utc::now()))
    }
}

#[async_trait]
impl MarketSource for PolymarketClient {
    async fn sampling_markets(&self) -> Result<Vec<CatalogMarket>> {
        let url = format!("{}/sampling-simplified-markets", self.clob_url);
        let mut markets = Vec::new();
        let mut cursor: Option<String> = None;

        for page_no in 0..MAX_SAMPLING_PAGES {
            let query: Vec<(&str, String)> = cursor
                .iter()
                .map(|c| ("next_cursor", c.clone()))
                .collect();
            let page: SamplingPage = match self.get_json(&url, &query).await {
                Ok(page) => page,
                // A later page failing still leaves a usable catalog.
                Err(e) if page_no > 0 => {
                    warn!(error = %e, page = page_no, "Sampling page failed, using partial catalog");
                    break;
                }
                Err(e) => return Err(e),
            };

            let before = markets.len();
            markets.extend(page.data.iter().filter_map(convert_sampling_market));
            debug!(page = page_no, added = markets.len() - before, "Sampling page fetched");

            match page.next_cursor {
                Some(next) if !next.is_empty() && next != END_CURSOR => cursor = Some(next),
                _ => break,
            }
        }

        info!(count = markets.len(), "Fetched sampling markets");
        Ok(markets)
    }

    async fn listed_markets(&self) -> Result<Vec<ListedMarket>> {
        let url = format!("{}/markets", self.gamma_url);
        let query = [
            ("active", "true".to_string()),
            ("closed", "false".to_string()),
            ("limit", self.listing_limit.to_string()),
        ];
        let resp: ListResponse<GammaMarket> = self.get_json(&url, &query).await?;
        let markets: Vec<ListedMarket> = resp
            .into_items()
            .iter()
            .filter_map(convert_gamma_market)
            .collect();

        info!(count = markets.len(), "Fetched Gamma markets");
        Ok(markets)
    }

    async fn events(&self) -> Result<Vec<MarketEvent>> {
        let url = format!("{}/events", self.gamma_url);
        let query = [
            ("active", "true".to_string()),
            ("closed", "false".to_string()),
            ("limit", EVENTS_LIMIT.to_string()),
        ];
        let resp: ListResponse<GammaEvent> = self.get_json(&url, &query).await?;
        let events: Vec<MarketEvent> = resp
            .into_items()
            .iter()
            .filter_map(convert_gamma_event)
            .collect();

        info!(count = events.len(), "Fetched Gamma events");
        Ok(events)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
