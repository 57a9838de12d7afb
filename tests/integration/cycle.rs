//! Full-cycle scenarios: artifacts, lane rotation, failure isolation, signal
//! lanes and execution across consecutive invocations.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use secrecy::SecretString;

use basket_arb::config::AppConfig;
use basket_arb::engine::accountant::{CycleRecord, PerformanceHistory, SurvivalMode};
use basket_arb::engine::executor::{TradeRecord, TradeStatus};
use basket_arb::engine::signals::{ExternalSignalSnapshot, MarketSignalFeed, NewsSignalSnapshot};
use basket_arb::engine::orchestrator::{
    BalanceFile, CorrelationSnapshot, CrossMarketSnapshot, CycleOrchestrator, OpportunitySnapshot,
    PositionEntry, PositionsFile, UnitStatus,
};
use basket_arb::platforms::paper::PaperGateway;
use basket_arb::storage::{load_or_default, save_atomic, ArtifactPaths};
use basket_arb::strategy::risk::RiskParams;
use basket_arb::strategy::signals::{PriceHistory, SpotSignal};
use basket_arb::types::{CycleState, Lane, OpportunityKind, Side};

use crate::mock_venue::MockVenue;

fn temp_state_dir() -> PathBuf {
    std::env::temp_dir().join(format!("basket-arb-it-{}", uuid::Uuid::new_v4()))
}

fn make_config(dir: &PathBuf) -> AppConfig {
    let mut config = AppConfig::default();
    config.cycle.state_dir = dir.clone();
    config.scan.max_retries = 0;
    config
}

fn make_orchestrator(config: AppConfig, venue: &Arc<MockVenue>) -> CycleOrchestrator {
    CycleOrchestrator::new(config, venue.clone(), venue.clone())
}

fn with_signal_feed(orchestrator: CycleOrchestrator, venue: &Arc<MockVenue>) -> CycleOrchestrator {
    let feed = MarketSignalFeed::new(venue.clone(), venue.clone(), orchestrator.paths().clone())
        .with_news(venue.clone());
    orchestrator.with_signals(Arc::new(feed))
}

fn seed_state(dir: &PathBuf, state: CycleState) {
    save_atomic(&ArtifactPaths::new(dir).cycle_state(), &state).unwrap();
}

fn seed_balance(dir: &PathBuf, bankroll: Decimal) {
    save_atomic(
        &ArtifactPaths::new(dir).balance(),
        &BalanceFile { bankroll_usd: bankroll },
    )
    .unwrap();
}

#[tokio::test]
async fn test_full_cycle_writes_artifacts() {
    let dir = temp_state_dir();
    let venue = Arc::new(MockVenue::new());
    let orchestrator = make_orchestrator(make_config(&dir), &venue);

    let summary = orchestrator.run_cycle().await.unwrap();

    assert_eq!(summary.cycle, 1);
    assert_eq!(summary.lane, Lane::OrderbookArb);
    assert_eq!(summary.streak, 0);
    assert_eq!(summary.opportunities, 2);
    assert!(summary.trade.is_none());

    let statuses: Vec<(&str, UnitStatus)> = summary
        .actions
        .iter()
        .map(|a| (a.name.as_str(), a.status))
        .collect();
    assert_eq!(
        statuses,
        vec![
            ("book_scan", UnitStatus::Ok),
            ("external_signal", UnitStatus::Skip),
            ("wide_book_scan", UnitStatus::Ok),
        ]
    );

    let paths = orchestrator.paths();
    let snapshot: OpportunitySnapshot = load_or_default(&paths.opportunities());
    let ids: Vec<&str> = snapshot.opportunities.iter().map(|o| o.id.as_str()).collect();
    assert_eq!(ids, vec!["MKT-ARB:buy_all", "MKT-SELL:sell_all"]);
    assert_eq!(snapshot.opportunities[0].kind, OpportunityKind::BuyAll);
    assert_eq!(snapshot.opportunities[0].gross_edge, dec!(0.05));
    assert_eq!(snapshot.opportunities[0].max_tradable_size, dec!(50));
    assert_eq!(snapshot.scans.len(), 2);
    assert_eq!(snapshot.stats.scanned, 10);
    assert_eq!(snapshot.stats.errors, 2);
    assert_eq!(snapshot.stats.empty_books, 2);
    assert!(snapshot.stats.sample_errors.iter().all(|e| e.contains("MKT-FAIL")));

    let state: CycleState = load_or_default(&paths.cycle_state());
    assert_eq!(state.cycle_count, 1);
    assert_eq!(state.last_lane, Some(Lane::OrderbookArb));
    assert_eq!(state.lane_streak, 1);
    assert_eq!(state.last_opportunity_count, 2);
    assert_eq!(state.recent_action_summaries.len(), 3);
    assert!(state.recent_action_summaries[0].starts_with("book_scan:ok:"));
    assert!(state.recent_action_summaries[1].starts_with("external_signal:skip:"));

    let history: PerformanceHistory = load_or_default(&paths.performance());
    assert_eq!(history.cycles.len(), 1);
    assert_eq!(history.cycles[0].opportunities, 2);
    assert_eq!(history.no_opportunity_streak(), 0);

    let _ = std::fs::remove_dir_all(dir);
}

#[tokio::test]
async fn test_second_cycle_executes_via_gateway() {
    let dir = temp_state_dir();
    seed_balance(&dir, dec!(1000));

    let mut config = make_config(&dir);
    config.cycle.dry_run = false;
    config.execution_key = Some(SecretString::new("0xtest".into()));

    let venue = Arc::new(MockVenue::new());
    let paper = Arc::new(PaperGateway::new());
    let orchestrator = make_orchestrator(config, &venue).with_gateway(paper.clone());

    // First cycle: nothing in the snapshot yet.
    let first = orchestrator.run_cycle().await.unwrap();
    assert!(first.trade.is_none());
    assert!(paper.orders().is_empty());
    assert_eq!(first.actions.last().map(|a| a.name.as_str()), Some("execution"));

    // Second cycle executes the top opportunity captured by the first.
    let second = orchestrator.run_cycle().await.unwrap();
    assert_eq!(second.lane, Lane::CrossMarket);
    assert_eq!(second.trade, Some(TradeStatus::Paper));

    let orders = paper.orders();
    assert_eq!(orders.len(), 2);
    assert_eq!(orders[0].token_id, "MKT-ARB-yes");
    assert_eq!(orders[1].token_id, "MKT-ARB-no");
    assert!(orders.iter().all(|o| o.side == Side::Buy));
    assert_eq!(orders[0].size, orders[1].size);
    assert!(orders[0].size >= Decimal::ONE);

    let trades: Vec<TradeRecord> = load_or_default(&orchestrator.paths().trades());
    assert_eq!(trades.len(), 1);
    assert_eq!(trades[0].status, TradeStatus::Paper);
    assert_eq!(trades[0].orders.len(), 2);
    assert_eq!(trades[0].gateway.as_deref(), Some("paper"));
    assert!(trades[0].sizing.size_usd <= dec!(5));

    let _ = std::fs::remove_dir_all(dir);
}

#[tokio::test]
async fn test_dry_run_never_submits() {
    let dir = temp_state_dir();
    seed_balance(&dir, dec!(1000));

    let mut config = make_config(&dir);
    config.execution_key = Some(SecretString::new("0xtest".into()));

    let venue = Arc::new(MockVenue::new());
    let paper = Arc::new(PaperGateway::new());
    let orchestrator = make_orchestrator(config, &venue).with_gateway(paper.clone());

    orchestrator.run_cycle().await.unwrap();
    let second = orchestrator.run_cycle().await.unwrap();

    assert_eq!(second.trade, Some(TradeStatus::DryRun));
    assert!(paper.orders().is_empty());

    let _ = std::fs::remove_dir_all(dir);
}

#[tokio::test]
async fn test_corrupt_state_starts_from_zero() {
    let dir = temp_state_dir();
    let paths = ArtifactPaths::new(&dir);
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(paths.cycle_state(), "{ not json").unwrap();
    std::fs::write(paths.performance(), "[[[").unwrap();

    let venue = Arc::new(MockVenue::new());
    let orchestrator = make_orchestrator(make_config(&dir), &venue);
    let summary = orchestrator.run_cycle().await.unwrap();

    assert_eq!(summary.cycle, 1);
    assert_eq!(summary.lane, Lane::OrderbookArb);

    let state: CycleState = load_or_default(&paths.cycle_state());
    assert_eq!(state.cycle_count, 1);

    let _ = std::fs::remove_dir_all(dir);
}

#[tokio::test]
async fn test_catalog_outage_is_not_fatal() {
    let dir = temp_state_dir();
    let venue = Arc::new(MockVenue::new());
    venue.set_error("catalog offline");
    let orchestrator = make_orchestrator(make_config(&dir), &venue);

    let summary = orchestrator.run_cycle().await.unwrap();

    assert_eq!(summary.opportunities, 0);
    assert_eq!(summary.actions[0].status, UnitStatus::Err);
    assert!(summary.actions[0]
        .detail
        .as_deref()
        .is_some_and(|d| d.contains("catalog offline")));
    assert_eq!(venue.fetch_count(), 0);

    let paths = orchestrator.paths();
    assert!(!paths.opportunities().exists());
    let history: PerformanceHistory = load_or_default(&paths.performance());
    assert_eq!(history.no_opportunity_streak(), 1);

    let _ = std::fs::remove_dir_all(dir);
}

#[tokio::test]
async fn test_no_opportunity_streak_escalates() {
    let dir = temp_state_dir();
    let paths = ArtifactPaths::new(&dir);
    let history = PerformanceHistory {
        cycles: (1..=26)
            .map(|cycle| CycleRecord {
                timestamp: Utc::now(),
                cycle,
                lane: Lane::OrderbookArb,
                opportunities: 0,
                scanned: 5,
                errors: 0,
                empty_books: 0,
                duration_ms: 10,
                bankroll_usd: Decimal::ZERO,
            })
            .collect(),
    };
    save_atomic(&paths.performance(), &history).unwrap();
    seed_state(
        &dir,
        CycleState {
            cycle_count: 26,
            last_lane: Some(Lane::OrderbookArb),
            lane_streak: 1,
            ..Default::default()
        },
    );

    let venue = Arc::new(MockVenue::new());
    let orchestrator = make_orchestrator(make_config(&dir), &venue);
    let summary = orchestrator.run_cycle().await.unwrap();

    assert_eq!(summary.streak, 26);
    assert_eq!(summary.lane, Lane::NewsDiscovery);
    assert_eq!(summary.thresholds.scan_market_limit, 400);
    assert_eq!(summary.thresholds.scan_edge_min, dec!(0.001));
    assert_eq!(summary.thresholds.execute_edge_min, dec!(0.0025));
    assert_eq!(summary.thresholds.max_position_usd, dec!(9));
    // Zero bankroll means zero runway.
    assert_eq!(summary.survival.recommended, SurvivalMode::Hibernation);

    let names: Vec<&str> = summary.actions.iter().map(|a| a.name.as_str()).collect();
    assert_eq!(names, vec!["book_scan", "external_signal", "news_signal", "cross_market_scan"]);
    assert!(paths.cross_market().exists());

    let state: CycleState = load_or_default(&paths.cycle_state());
    assert_eq!(state.last_no_opportunity_streak, 26);
    assert_eq!(state.last_thresholds.map(|t| t.scan_market_limit), Some(400));

    let _ = std::fs::remove_dir_all(dir);
}

#[tokio::test]
async fn test_lane_rotates_after_two_runs() {
    let dir = temp_state_dir();
    seed_state(
        &dir,
        CycleState {
            cycle_count: 5,
            last_lane: Some(Lane::CrossMarket),
            lane_streak: 2,
            ..Default::default()
        },
    );

    let venue = Arc::new(MockVenue::new());
    let orchestrator = make_orchestrator(make_config(&dir), &venue);
    let summary = orchestrator.run_cycle().await.unwrap();

    assert_eq!(summary.lane, Lane::ExternalReality);
    let state: CycleState = load_or_default(&orchestrator.paths().cycle_state());
    assert_eq!(state.cycle_count, 6);
    assert_eq!(state.lane_streak, 1);

    let _ = std::fs::remove_dir_all(dir);
}

#[tokio::test]
async fn test_cross_market_lane_writes_snapshots() {
    let dir = temp_state_dir();
    seed_state(
        &dir,
        CycleState {
            cycle_count: 1,
            ..Default::default()
        },
    );

    let venue = Arc::new(MockVenue::new());
    let orchestrator = make_orchestrator(make_config(&dir), &venue);
    let summary = orchestrator.run_cycle().await.unwrap();
    assert_eq!(summary.lane, Lane::CrossMarket);

    let paths = orchestrator.paths();
    let cross: CrossMarketSnapshot = load_or_default(&paths.cross_market());
    assert_eq!(cross.stats.markets, 3);
    assert_eq!(cross.stats.violations, 1);
    assert_eq!(cross.violations[0].lower_threshold, dec!(90000));
    assert_eq!(cross.violations[0].higher_threshold, dec!(100000));
    assert_eq!(cross.stats.clusters.get("btc"), Some(&2));

    let correlation: CorrelationSnapshot = load_or_default(&paths.correlation());
    assert_eq!(correlation.stats.findings, 1);
    assert_eq!(correlation.findings[0].event_id, "EVT-1");
    assert!((correlation.findings[0].sum_yes - dec!(1.15)).abs() < dec!(0.0001));

    let _ = std::fs::remove_dir_all(dir);
}

#[tokio::test]
async fn test_execution_quality_lane_publishes_risk_params() {
    let dir = temp_state_dir();
    seed_balance(&dir, dec!(200));
    save_atomic(
        &ArtifactPaths::new(&dir).positions(),
        &PositionsFile {
            positions: vec![PositionEntry {
                token_id: "MKT-ARB-yes".into(),
                shares: dec!(30),
                value_usd: dec!(15),
            }],
        },
    )
    .unwrap();
    seed_state(
        &dir,
        CycleState {
            cycle_count: 4,
            ..Default::default()
        },
    );

    let venue = Arc::new(MockVenue::new());
    let orchestrator = make_orchestrator(make_config(&dir), &venue);
    let summary = orchestrator.run_cycle().await.unwrap();
    assert_eq!(summary.lane, Lane::ExecutionQuality);

    let params: Option<RiskParams> =
        basket_arb::storage::load_strict(&orchestrator.paths().risk_params()).unwrap();
    let params = params.expect("risk params written");
    assert_eq!(params.bankroll_usd, dec!(200));
    assert_eq!(params.current_exposure_usd, dec!(15));
    assert_eq!(params.available_capacity_usd, dec!(45));

    let _ = std::fs::remove_dir_all(dir);
}

#[tokio::test]
async fn test_external_reality_lane_runs_signal_feed() {
    let dir = temp_state_dir();
    seed_state(
        &dir,
        CycleState {
            cycle_count: 2,
            ..Default::default()
        },
    );

    let venue = Arc::new(MockVenue::new());
    let orchestrator = with_signal_feed(make_orchestrator(make_config(&dir), &venue), &venue);
    let summary = orchestrator.run_cycle().await.unwrap();
    assert_eq!(summary.lane, Lane::ExternalReality);

    let actions: Vec<(&str, UnitStatus, Option<&str>)> = summary
        .actions
        .iter()
        .map(|a| (a.name.as_str(), a.status, a.detail.as_deref()))
        .collect();
    assert_eq!(actions[1], ("external_signal", UnitStatus::Ok, Some("2 findings")));
    assert_eq!(actions[2], ("price_history", UnitStatus::Ok, Some("0 findings")));

    let paths = orchestrator.paths();
    let external: ExternalSignalSnapshot = load_or_default(&paths.external_signal());
    assert_eq!(external.spot.median_btc_usd, Some(dec!(104000)));
    assert_eq!(external.spot.sources.len(), 3);
    assert_eq!(external.stats.btc_markets, 2);
    assert_eq!(external.candidates.len(), 2);
    assert_eq!(external.candidates[0].market_id, "L-BTC-90");
    assert_eq!(external.candidates[0].signal, SpotSignal::PossibleUnderpricedYes);
    assert_eq!(external.candidates[0].score, dec!(0.4056));
    assert_eq!(external.monotonic_violations.len(), 1);

    let history: PriceHistory = load_or_default(&paths.price_history());
    assert_eq!(history.markets.len(), 2);
    assert!(history.markets.contains_key("L-BTC-100"));

    let _ = std::fs::remove_dir_all(dir);
}

#[tokio::test]
async fn test_news_lane_scores_headlines() {
    let dir = temp_state_dir();
    seed_state(
        &dir,
        CycleState {
            cycle_count: 3,
            ..Default::default()
        },
    );

    let venue = Arc::new(MockVenue::new());
    let orchestrator = with_signal_feed(make_orchestrator(make_config(&dir), &venue), &venue);
    let summary = orchestrator.run_cycle().await.unwrap();
    assert_eq!(summary.lane, Lane::NewsDiscovery);

    let news_unit = summary
        .actions
        .iter()
        .find(|a| a.name == "news_signal")
        .expect("news unit planned");
    assert_eq!(news_unit.status, UnitStatus::Ok);

    let news: NewsSignalSnapshot = load_or_default(&orchestrator.paths().news_signal());
    assert!(news.enabled);
    assert_eq!(news.queries.len(), 4);
    assert!(news.keywords.contains(&"bitcoin".to_string()));
    // Same headline from every query, the weather story scores zero.
    assert_eq!(news.candidates.len(), 1);
    assert_eq!(news.candidates[0].url, "https://news.example/btc-etf");
    assert_eq!(news.candidates[0].score, dec!(8.4));

    let _ = std::fs::remove_dir_all(dir);
}
