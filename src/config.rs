//! Configuration loading from TOML with environment variable overrides.
//!
//! Every field has a default, so the engine runs with no config file at all.
//! An optional TOML file (path in `ARB_CONFIG`) provides a base, then the
//! recognised `ARB_*` environment keys override it. Execution credentials are
//! referenced by env-var name and resolved once at startup into a
//! [`SecretString`].

use std::fs;
use std::path::PathBuf;
use std::str::FromStr;

use anyhow::{Context, Result};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use secrecy::SecretString;
use serde::Deserialize;
use tracing::warn;

use crate::engine::accountant::SurvivalMode;

/// Top-level application configuration.
#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct AppConfig {
    pub scan: ScanConfig,
    pub risk: RiskConfig,
    pub cycle: CycleConfig,
    pub venue: VenueConfig,
    /// Execution signing key, resolved from the environment. Never serialized.
    #[serde(skip)]
    pub execution_key: Option<SecretString>,
    /// News search key, resolved from `venue.news_key_env`. Never serialized.
    #[serde(skip)]
    pub news_key: Option<SecretString>,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ScanConfig {
    /// Worker pool width for book fetches.
    pub concurrency: usize,
    /// Minimum gross edge for an opportunity to be recorded.
    pub min_edge: Decimal,
    /// Binary markets scanned per baseline pass.
    pub market_limit: usize,
    /// Opportunities kept after ranking.
    pub results_cap: usize,
    /// Also scan 3-6 outcome markets.
    pub multi_outcome: bool,
    pub max_multi_outcome_markets: usize,
    /// Legs per basket above which a market is skipped.
    pub max_legs: usize,
    /// Per-attempt fetch timeout; 0 disables it.
    pub fetch_timeout_ms: u64,
    pub max_retries: u32,
    pub retry_base_ms: u64,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            concurrency: 16,
            min_edge: dec!(0.0025),
            market_limit: 250,
            results_cap: 50,
            multi_outcome: false,
            max_multi_outcome_markets: 50,
            max_legs: 6,
            fetch_timeout_ms: 10_000,
            max_retries: 2,
            retry_base_ms: 250,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct RiskConfig {
    pub kelly_fraction: Decimal,
    /// Kelly sizing returns zero below this edge.
    pub min_edge_for_sizing: Decimal,
    pub odds: Decimal,
    pub min_order_usd: Decimal,
    pub max_order_usd: Decimal,
    pub max_position_pct: Decimal,
    /// Base per-trade cap before streak mutation.
    pub max_position_usd: Decimal,
    /// Base execution edge floor before streak mutation.
    pub execute_min_edge: Decimal,
    pub min_shares_per_leg: Decimal,
    /// Opportunities thinner than this are never executed.
    pub min_executable_shares: Decimal,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            kelly_fraction: dec!(0.25),
            min_edge_for_sizing: dec!(0.02),
            odds: Decimal::ONE,
            min_order_usd: dec!(5),
            max_order_usd: dec!(50),
            max_position_pct: dec!(0.15),
            max_position_usd: dec!(5),
            execute_min_edge: dec!(0.005),
            min_shares_per_leg: Decimal::ONE,
            min_executable_shares: dec!(5),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct CycleConfig {
    /// Directory holding every persisted artifact.
    pub state_dir: PathBuf,
    pub scan_timeout_secs: u64,
    pub unit_timeout_secs: u64,
    pub execution_timeout_secs: u64,
    /// Work units run at once within a cycle.
    pub unit_concurrency: usize,
    pub history_limit: usize,
    pub recent_actions: usize,
    /// Log planned orders instead of submitting them.
    pub dry_run: bool,
    pub private_key_env: String,
    pub fallback_key_env: String,
    /// Cadence the deployment currently runs at.
    pub survival_mode: SurvivalMode,
}

impl Default for CycleConfig {
    fn default() -> Self {
        Self {
            state_dir: PathBuf::from("state"),
            scan_timeout_secs: 70,
            unit_timeout_secs: 60,
            execution_timeout_secs: 35,
            unit_concurrency: 4,
            history_limit: 500,
            recent_actions: 8,
            dry_run: true,
            private_key_env: "POLYMARKET_PRIVATE_KEY".into(),
            fallback_key_env: "PRIVATE_KEY".into(),
            survival_mode: SurvivalMode::Normal,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct VenueConfig {
    pub clob_url: String,
    pub gamma_url: String,
    pub request_timeout_secs: u64,
    /// Listed markets pulled for consistency scans.
    pub listing_limit: usize,
    /// Per-exchange timeout for spot price lookups.
    pub spot_timeout_ms: u64,
    pub news_url: String,
    /// Env var holding the news search key. The news lane is off without it.
    pub news_key_env: String,
}

impl Default for VenueConfig {
    fn default() -> Self {
        Self {
            clob_url: "https://clob.polymarket.com".into(),
            gamma_url: "https://gamma-api.polymarket.com".into(),
            request_timeout_secs: 30,
            listing_limit: 500,
            spot_timeout_ms: 9000,
            news_url: "https://api.search.brave.com/res/v1/web/search".into(),
            news_key_env: "BRAVE_API_KEY".into(),
        }
    }
}

impl AppConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {path}"))?;
        let config: AppConfig = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {path}"))?;
        Ok(config)
    }

    /// Build the startup configuration from the process environment.
    pub fn from_env() -> Result<Self> {
        let mut config = match std::env::var("ARB_CONFIG") {
            Ok(path) if !path.trim().is_empty() => Self::load(path.trim())?,
            _ => Self::default(),
        };
        config.apply_overrides(|key| std::env::var(key).ok());
        config.execution_key = config.resolve_credentials(|key| std::env::var(key).ok());
        config.news_key = config.resolve_news_key(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Apply `ARB_*` overrides from `lookup`. Unparseable values are logged
    /// and ignored.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        override_from(&lookup, "ARB_SCAN_CONCURRENCY", &mut self.scan.concurrency);
        override_from(&lookup, "ARB_SCAN_MIN_EDGE", &mut self.scan.min_edge);
        override_from(&lookup, "ARB_SCAN_MARKET_LIMIT", &mut self.scan.market_limit);
        override_from(&lookup, "ARB_RESULTS_CAP", &mut self.scan.results_cap);
        override_bool(&lookup, "ARB_MULTI_OUTCOME", &mut self.scan.multi_outcome);
        override_from(&lookup, "ARB_EXECUTE_MIN_EDGE", &mut self.risk.execute_min_edge);
        override_from(&lookup, "ARB_KELLY_FRACTION", &mut self.risk.kelly_fraction);
        override_from(&lookup, "ARB_MIN_ORDER_USD", &mut self.risk.min_order_usd);
        override_from(&lookup, "ARB_MAX_ORDER_USD", &mut self.risk.max_order_usd);
        override_from(&lookup, "ARB_MAX_POSITION_PCT", &mut self.risk.max_position_pct);
        override_from(&lookup, "ARB_MAX_POSITION_USD", &mut self.risk.max_position_usd);
        override_bool(&lookup, "ARB_DRY_RUN", &mut self.cycle.dry_run);
        if let Some(dir) = lookup("ARB_STATE_DIR").filter(|v| !v.trim().is_empty()) {
            self.cycle.state_dir = PathBuf::from(dir.trim());
        }
    }

    /// Resolve the execution key from the configured env names, primary first.
    pub fn resolve_credentials<F>(&self, lookup: F) -> Option<SecretString>
    where
        F: Fn(&str) -> Option<String>,
    {
        [&self.cycle.private_key_env, &self.cycle.fallback_key_env]
            .into_iter()
            .filter_map(|name| lookup(name.as_str()))
            .map(|v| v.trim().to_string())
            .find(|v| !v.is_empty())
            .map(SecretString::new)
    }

    pub fn resolve_news_key<F>(&self, lookup: F) -> Option<SecretString>
    where
        F: Fn(&str) -> Option<String>,
    {
        lookup(&self.venue.news_key_env)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .map(SecretString::new)
    }

    pub fn has_execution_credentials(&self) -> bool {
        self.execution_key.is_some()
    }
}

fn override_from<F, T>(lookup: &F, key: &str, slot: &mut T)
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    let Some(raw) = lookup(key) else { return };
    match raw.trim().parse::<T>() {
        Ok(value) => *slot = value,
        Err(_) => warn!(key, value = %raw, "Ignoring unparseable config override"),
    }
}

fn override_bool<F>(lookup: &F, key: &str, slot: &mut bool)
where
    F: Fn(&str) -> Option<String>,
{
    let Some(raw) = lookup(key) else { return };
    match raw.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => *slot = true,
        "0" | "false" | "no" | "off" => *slot = false,
        _ => warn!(key, value = %raw, "Ignoring unparseable config override"),
    }
}
