//! basket-arb: adaptive basket-arbitrage cycle runner.
//!
//! Entry point. Loads `.env` and configuration, initialises structured
//! logging, wires the venue adapter and signal feed, and runs exactly one
//! cycle. Exits non-zero only when the cycle aborts.

use std::sync::Arc;

use anyhow::Result;
use tracing::{error, info, warn};

use basket_arb::config::AppConfig;
use basket_arb::engine::orchestrator::CycleOrchestrator;
use basket_arb::engine::signals::MarketSignalFeed;
use basket_arb::platforms::paper::PaperGateway;
use basket_arb::platforms::polymarket::PolymarketClient;
use basket_arb::platforms::reference::{BraveSearchClient, ReferencePriceClient};
use basket_arb::storage::ArtifactPaths;

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (non-fatal if missing)
    let _ = dotenv::dotenv();

    init_logging();

    let cfg = AppConfig::from_env()?;
    info!(
        state_dir = %cfg.cycle.state_dir.display(),
        dry_run = cfg.cycle.dry_run,
        credentials = cfg.has_execution_credentials(),
        concurrency = cfg.scan.concurrency,
        market_limit = cfg.scan.market_limit,
        mode = %cfg.cycle.survival_mode,
        "basket-arb starting"
    );

    if !cfg.cycle.dry_run {
        warn!("Live mode requested but only the paper gateway is wired; trades are recorded as paper");
    }

    let venue = Arc::new(PolymarketClient::new(&cfg.venue)?);

    let mut signals = MarketSignalFeed::new(
        venue.clone(),
        Arc::new(ReferencePriceClient::new(&cfg.venue)?),
        ArtifactPaths::new(&cfg.cycle.state_dir),
    );
    match cfg.news_key.clone() {
        Some(key) => signals = signals.with_news(Arc::new(BraveSearchClient::new(&cfg.venue, key)?)),
        None => info!(env = %cfg.venue.news_key_env, "News search disabled: no key configured"),
    }

    let orchestrator = CycleOrchestrator::new(cfg, venue.clone(), venue)
        .with_gateway(Arc::new(PaperGateway::new()))
        .with_signals(Arc::new(signals));

    match orchestrator.run_cycle().await {
        Ok(summary) => {
            info!(
                cycle = summary.cycle,
                lane = %summary.lane,
                opportunities = summary.opportunities,
                trade = ?summary.trade,
                recommended_mode = %summary.survival.recommended,
                runway = format!("{:.1}h", summary.survival.runway_hours),
                "Cycle finished"
            );
            Ok(())
        }
        Err(e) => {
            error!(error = %e, "Cycle aborted");
            Err(e.into())
        }
    }
}

/// Initialise the tracing subscriber. `RUST_LOG` overrides the default
/// filter; `ARB_LOG_JSON` switches to JSON lines.
fn init_logging() {
    use tracing_subscriber::{fmt, EnvFilter};

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("basket_arb=info"));

    let json_logging = std::env::var("ARB_LOG_JSON").is_ok();

    if json_logging {
        fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_thread_ids(true)
            .init();
    } else {
        fmt()
            .with_env_filter(env_filter)
            .with_target(true)
            .init();
    }
}
