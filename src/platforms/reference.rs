//! Reference data outside the venue.
//!
//! `ReferencePriceClient` reads BTC/USD from three public exchange tickers.
//! `BraveSearchClient` runs web searches for the news lane and needs an
//! API key. Both are read-only.

use std::collections::BTreeMap;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::config::VenueConfig;
use crate::platforms::polymarket::NumberLike;
use crate::platforms::{NewsSource, SpotSource};
use crate::types::{round4, Headline, SpotQuote};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

const BINANCE_TICKER: &str = "https://api.binance.com/api/v3/ticker/price?symbol=BTCUSDT";
const COINBASE_SPOT: &str = "https://api.coinbase.com/v2/prices/BTC-USD/spot";
const KRAKEN_TICKER: &str = "https://api.kraken.com/0/public/Ticker?pair=XBTUSD";

/// Results requested per news query.
const NEWS_RESULTS: usize = 8;

// ---------------------------------------------------------------------------
// Wire schema
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct BinanceTicker {
    #[serde(default)]
    pub price: Option<NumberLike>,
}

#[derive(Debug, Deserialize)]
pub struct CoinbaseSpot {
    #[serde(default)]
    pub data: Option<CoinbaseAmount>,
}

#[derive(Debug, Deserialize)]
pub struct CoinbaseAmount {
    #[serde(default)]
    pub amount: Option<NumberLike>,
}

#[derive(Debug, Deserialize)]
pub struct KrakenTicker {
    #[serde(default)]
    pub result: BTreeMap<String, KrakenPair>,
}

#[derive(Debug, Deserialize)]
pub struct KrakenPair {
    /// Last trade: [price, lot volume].
    #[serde(default)]
    pub c: Vec<NumberLike>,
}

#[derive(Debug, Default, Deserialize)]
pub struct SearchResponse {
    #[serde(default)]
    pub web: Option<SearchWeb>,
}

#[derive(Debug, Default, Deserialize)]
pub struct SearchWeb {
    #[serde(default)]
    pub results: Vec<SearchResult>,
}

#[derive(Debug, Deserialize)]
pub struct SearchResult {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub age: Option<String>,
}

// ---------------------------------------------------------------------------
// Conversion
// ---------------------------------------------------------------------------

fn quote_from(source: &str, price: Option<&NumberLike>) -> SpotQuote {
    match price.and_then(NumberLike::to_decimal) {
        Some(p) if p > rust_decimal::Decimal::ZERO => SpotQuote::ok(source, round4(p)),
        _ => SpotQuote::failed(source, "no price in response"),
    }
}

pub fn convert_binance(t: &BinanceTicker) -> SpotQuote {
    quote_from("binance", t.price.as_ref())
}

pub fn convert_coinbase(s: &CoinbaseSpot) -> SpotQuote {
    quote_from("coinbase", s.data.as_ref().and_then(|d| d.amount.as_ref()))
}

/// Kraken keys the result by its own pair name; the first pair is used.
pub fn convert_kraken(t: &KrakenTicker) -> SpotQuote {
    quote_from("kraken", t.result.values().next().and_then(|p| p.c.first()))
}

pub fn convert_search(resp: SearchResponse) -> Vec<Headline> {
    resp.web
        .map(|w| w.results)
        .unwrap_or_default()
        .into_iter()
        .filter(|r| !r.url.is_empty())
        .map(|r| Headline {
            title: r.title,
            url: r.url,
            description: r.description,
            age: r.age,
        })
        .collect()
}

async fn get_json<T: DeserializeOwned>(request: reqwest::RequestBuilder, url: &str) -> Result<T> {
    let resp = request
        .send()
        .await
        .with_context(|| format!("Request failed: {url}"))?;
    if !resp.status().is_success() {
        anyhow::bail!("HTTP {} from {url}", resp.status());
    }
    resp.json()
        .await
        .with_context(|| format!("Failed to parse response from {url}"))
}

// ---------------------------------------------------------------------------
// Spot prices
// ---------------------------------------------------------------------------

pub struct ReferencePriceClient {
    http: Client,
}

impl ReferencePriceClient {
    pub fn new(config: &VenueConfig) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_millis(config.spot_timeout_ms))
            .build()
            .context("Failed to build reference price HTTP client")?;
        Ok(Self { http })
    }

    async fn quote<T, F>(&self, source: &str, url: &str, convert: F) -> SpotQuote
    where
        T: DeserializeOwned,
        F: Fn(&T) -> SpotQuote,
    {
        match get_json::<T>(self.http.get(url), url).await {
            Ok(body) => convert(&body),
            Err(e) => {
                warn!(source, error = %e, "Spot quote failed");
                SpotQuote::failed(source, e.to_string())
            }
        }
    }
}

#[async_trait]
impl SpotSource for ReferencePriceClient {
    async fn btc_quotes(&self) -> Vec<SpotQuote> {
        let (binance, coinbase, kraken) = tokio::join!(
            self.quote("binance", BINANCE_TICKER, convert_binance),
            self.quote("coinbase", COINBASE_SPOT, convert_coinbase),
            self.quote("kraken", KRAKEN_TICKER, convert_kraken),
        );
        debug!(
            binance = ?binance.price_usd,
            coinbase = ?coinbase.price_usd,
            kraken = ?kraken.price_usd,
            "Spot quotes fetched"
        );
        vec![binance, coinbase, kraken]
    }
}

// ---------------------------------------------------------------------------
// News search
// ---------------------------------------------------------------------------

pub struct BraveSearchClient {
    http: Client,
    url: String,
    key: SecretString,
}

impl BraveSearchClient {
    pub fn new(config: &VenueConfig, key: SecretString) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .context("Failed to build news search HTTP client")?;
        Ok(Self {
            http,
            url: config.news_url.clone(),
            key,
        })
    }
}

#[async_trait]
impl NewsSource for BraveSearchClient {
    async fn search(&self, query: &str) -> Result<Vec<Headline>> {
        let request = self
            .http
            .get(&self.url)
            .header("Accept", "application/json")
            .header("X-Subscription-Token", self.key.expose_secret().as_str())
            .query(&[
                ("q", query.to_string()),
                ("count", NEWS_RESULTS.to_string()),
                ("result_filter", "web".to_string()),
            ]);
        let resp: SearchResponse = get_json(request, &self.url).await?;
        Ok(convert_search(resp))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
