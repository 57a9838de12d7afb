//! Cycle orchestrator.
//!
//! One invocation performs exactly one state transition:
//!
//! 1. Load the persisted [`CycleState`], the performance history and the
//!    latest opportunity snapshot.
//! 2. Derive the no-opportunity streak, pick a lane and relax thresholds.
//! 3. Dispatch the cycle's work units concurrently, each under its own
//!    timeout. A unit that fails or times out is recorded and skipped.
//! 4. Merge scan outcomes into `opportunities.json`, append a performance
//!    record and atomically persist the next state.
//!
//! Only a missing execution credential (when live execution was asked for)
//! or an unusable state file aborts the cycle.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::AppConfig;
use crate::engine::accountant::{Accountant, CycleRecord, PerformanceHistory, SurvivalRecommendation};
use crate::engine::adaptive::{derive_thresholds, next_lane_streak, select_lane, wide_scan};
use crate::engine::executor::{ExecutionReport, Executor, TradeStatus};
use crate::engine::scanner::{
    map_bounded, select_candidates, BoundedScanner, MarketBooks, ScanPolicy, ScanStats,
};
use crate::platforms::{BookFetcher, ExecutionGateway, MarketSource, SignalFeed, SignalKind};
use crate::storage::{load_or_default, load_strict, save_atomic, ArtifactPaths};
use crate::strategy::consistency::{
    scan_exclusive_sums, scan_monotonicity, ConsistencyConfig, ExclusiveSumFinding,
    MonotonicityViolation,
};
use crate::strategy::detector::{rank_and_truncate, DetectorConfig, OpportunityDetector};
use crate::strategy::risk::{RiskLimits, RiskManager};
use crate::strategy::PositionSizer;
use crate::types::{CycleError, CycleState, Lane, Opportunity, RiskState, Thresholds};

/// Findings kept in `cross_market_snapshot.json`.
const MAX_CROSS_MARKET_FINDINGS: usize = 50;
/// Findings kept in `correlation_snapshot.json`.
const MAX_CORRELATION_FINDINGS: usize = 30;

// ---------------------------------------------------------------------------
// Artifacts
// ---------------------------------------------------------------------------

/// One scan pass as reported in the opportunity snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanReport {
    pub label: String,
    pub params: Thresholds,
    pub stats: ScanStats,
}

/// Contents of `opportunities.json`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OpportunitySnapshot {
    pub timestamp: Option<DateTime<Utc>>,
    pub params: Option<Thresholds>,
    /// Totals across every scan in `scans`; `opportunities` counts the
    /// merged list.
    pub stats: ScanStats,
    pub scans: Vec<ScanReport>,
    pub opportunities: Vec<Opportunity>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CrossMarketStats {
    pub markets: usize,
    pub clusters: BTreeMap<String, usize>,
    pub violations: usize,
}

/// Contents of `cross_market_snapshot.json`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CrossMarketSnapshot {
    pub timestamp: Option<DateTime<Utc>>,
    pub stats: CrossMarketStats,
    pub violations: Vec<MonotonicityViolation>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CorrelationStats {
    pub events: usize,
    pub scanned_events: usize,
    pub findings: usize,
}

/// Contents of `correlation_snapshot.json`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CorrelationSnapshot {
    pub timestamp: Option<DateTime<Utc>>,
    pub stats: CorrelationStats,
    pub findings: Vec<ExclusiveSumFinding>,
}

/// `balance.json`, written by whatever tracks the funding wallet.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BalanceFile {
    pub bankroll_usd: Decimal,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PositionEntry {
    pub token_id: String,
    pub shares: Decimal,
    pub value_usd: Decimal,
}

/// `positions.json`, written by the position tracker.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PositionsFile {
    pub positions: Vec<PositionEntry>,
}

/// Bankroll and open exposure from the balance and position files.
/// Either file missing or unreadable counts as zero.
pub fn load_risk_state(paths: &ArtifactPaths) -> RiskState {
    let balance: BalanceFile = load_or_default(&paths.balance());
    let positions: PositionsFile = load_or_default(&paths.positions());
    RiskState {
        bankroll_usd: balance.bankroll_usd,
        current_exposure_usd: positions.positions.iter().map(|p| p.value_usd).sum(),
    }
}

// ---------------------------------------------------------------------------
// Work units
// ---------------------------------------------------------------------------

/// An independently timed piece of cycle work.
#[derive(Debug, Clone, PartialEq)]
pub enum WorkUnit {
    BookScan { label: &'static str, params: Thresholds },
    Signal(SignalKind),
    CrossMarket,
    Correlation,
    RiskControls,
    Execution,
}

impl WorkUnit {
    pub fn name(&self) -> &'static str {
        match self {
            WorkUnit::BookScan { label, .. } => *label,
            WorkUnit::Signal(kind) => kind.as_str(),
            WorkUnit::CrossMarket => "cross_market_scan",
            WorkUnit::Correlation => "correlation_scan",
            WorkUnit::RiskControls => "risk_controls",
            WorkUnit::Execution => "execution",
        }
    }
}

/// Units for one cycle: the baseline scan and external signal, the lane's
/// own units, then an execution attempt when `execute` is set.
pub fn plan_units(lane: Lane, thresholds: &Thresholds, execute: bool) -> Vec<WorkUnit> {
    let mut units = vec![
        WorkUnit::BookScan {
            label: "book_scan",
            params: *thresholds,
        },
        WorkUnit::Signal(SignalKind::ExternalReality),
    ];

    match lane {
        Lane::OrderbookArb => units.push(WorkUnit::BookScan {
            label: "wide_book_scan",
            params: wide_scan(thresholds),
        }),
        Lane::CrossMarket => {
            units.push(WorkUnit::CrossMarket);
            units.push(WorkUnit::Correlation);
        }
        // The baseline already runs the external signal.
        Lane::ExternalReality => units.push(WorkUnit::Signal(SignalKind::PriceHistory)),
        Lane::NewsDiscovery => {
            units.push(WorkUnit::Signal(SignalKind::News));
            units.push(WorkUnit::CrossMarket);
        }
        Lane::ExecutionQuality => units.push(WorkUnit::RiskControls),
    }

    if execute {
        units.push(WorkUnit::Execution);
    }
    units
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitStatus {
    Ok,
    Err,
    Skip,
}

impl fmt::Display for UnitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnitStatus::Ok => write!(f, "ok"),
            UnitStatus::Err => write!(f, "err"),
            UnitStatus::Skip => write!(f, "skip"),
        }
    }
}

/// How one unit went.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnitReport {
    pub name: String,
    pub status: UnitStatus,
    pub duration_ms: u64,
    pub detail: Option<String>,
}

impl UnitReport {
    /// `name:status:<ms>ms`, as kept in the cycle state.
    pub fn summary(&self) -> String {
        format!("{}:{}:{}ms", self.name, self.status, self.duration_ms)
    }
}

/// A scan unit's result, merged by the orchestrator.
#[derive(Debug, Clone, PartialEq)]
pub struct ScanOutcome {
    pub report: ScanReport,
    pub opportunities: Vec<Opportunity>,
}

enum UnitOutput {
    Scan(ScanOutcome),
    Findings(usize),
    Trade(ExecutionReport),
    Skipped(String),
}

enum UnitFailure {
    Failed(anyhow::Error),
    Fatal(CycleError),
}

impl From<anyhow::Error> for UnitFailure {
    fn from(e: anyhow::Error) -> Self {
        UnitFailure::Failed(e)
    }
}

struct UnitRun {
    report: UnitReport,
    output: Option<UnitOutput>,
}

/// Inputs every unit of a cycle shares.
struct CycleContext<'a> {
    thresholds: Thresholds,
    risk: RiskState,
    /// Opportunity snapshot as it stood when dispatch started.
    snapshot: &'a [Opportunity],
}

/// Merge scan outcomes: one entry per opportunity id (latest capture wins),
/// ranked by edge and capped.
pub fn merge_scans(outcomes: Vec<ScanOutcome>, params: Thresholds, cap: usize) -> OpportunitySnapshot {
    let mut merged: Vec<Opportunity> = Vec::new();
    let mut totals = ScanStats::default();
    let mut scans = Vec::with_capacity(outcomes.len());

    for outcome in outcomes {
        let stats = &outcome.report.stats;
        totals.sampled = totals.sampled.max(stats.sampled);
        totals.scanned += stats.scanned;
        totals.multi_outcome_scanned += stats.multi_outcome_scanned;
        totals.valid_books += stats.valid_books;
        totals.empty_books += stats.empty_books;
        totals.errors += stats.errors;
        totals.duration_ms = totals.duration_ms.max(stats.duration_ms);
        for sample in &stats.sample_errors {
            if totals.sample_errors.len() < 3 {
                totals.sample_errors.push(sample.clone());
            }
        }

        for opp in outcome.opportunities {
            match merged.iter_mut().find(|o| o.id == opp.id) {
                Some(existing) if opp.captured_at > existing.captured_at => *existing = opp,
                Some(_) => {}
                None => merged.push(opp),
            }
        }
        scans.push(outcome.report);
    }

    let opportunities = rank_and_truncate(merged, cap);
    totals.opportunities = opportunities.len();

    OpportunitySnapshot {
        timestamp: Some(Utc::now()),
        params: Some(params),
        stats: totals,
        scans,
        opportunities,
    }
}

// ---------------------------------------------------------------------------
// Cycle summary
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CycleSummary {
    pub cycle: u64,
    pub lane: Lane,
    /// No-opportunity streak the cycle started with.
    pub streak: u32,
    pub thresholds: Thresholds,
    pub opportunities: usize,
    pub actions: Vec<UnitReport>,
    pub trade: Option<TradeStatus>,
    pub survival: SurvivalRecommendation,
    pub duration_ms: u64,
}

impl fmt::Display for CycleSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "cycle={} lane={} opps={} streak={} mode={} duration={}ms",
            self.cycle,
            self.lane,
            self.opportunities,
            self.streak,
            self.survival.recommended,
            self.duration_ms,
        )
    }
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

pub struct CycleOrchestrator {
    config: AppConfig,
    paths: ArtifactPaths,
    catalog: Arc<dyn MarketSource>,
    fetcher: Arc<dyn BookFetcher>,
    gateway: Option<Arc<dyn ExecutionGateway>>,
    signals: Option<Arc<dyn SignalFeed>>,
}

impl CycleOrchestrator {
    pub fn new(config: AppConfig, catalog: Arc<dyn MarketSource>, fetcher: Arc<dyn BookFetcher>) -> Self {
        let paths = ArtifactPaths::new(config.cycle.state_dir.clone());
        Self {
            config,
            paths,
            catalog,
            fetcher,
            gateway: None,
            signals: None,
        }
    }

    pub fn with_gateway(mut self, gateway: Arc<dyn ExecutionGateway>) -> Self {
        self.gateway = Some(gateway);
        self
    }

    pub fn with_signals(mut self, signals: Arc<dyn SignalFeed>) -> Self {
        self.signals = Some(signals);
        self
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn paths(&self) -> &ArtifactPaths {
        &self.paths
    }

    /// Run one full cycle and persist its outcome.
    pub async fn run_cycle(&self) -> Result<CycleSummary, CycleError> {
        let started = Instant::now();
        let cycle_cfg = &self.config.cycle;

        let prev: CycleState = load_strict(&self.paths.cycle_state())
            .map_err(CycleError::State)?
            .unwrap_or_default();
        let mut history: PerformanceHistory = load_or_default(&self.paths.performance());
        let snapshot: OpportunitySnapshot = load_or_default(&self.paths.opportunities());
        let risk = load_risk_state(&self.paths);

        let streak = history.no_opportunity_streak();
        let lane = select_lane(&prev, streak);
        let thresholds = derive_thresholds(&self.config.scan, &self.config.risk, streak);

        let has_credentials = self.config.has_execution_credentials();
        if !has_credentials && !cycle_cfg.dry_run {
            return Err(CycleError::MissingCredentials);
        }

        info!(
            cycle = prev.cycle_count + 1,
            lane = %lane,
            streak,
            last_opps = snapshot.opportunities.len(),
            "=== Cycle start ==="
        );
        info!(thresholds = %thresholds, "Thresholds derived");
        if !has_credentials {
            info!(env = %cycle_cfg.private_key_env, "Execution skipped: no credentials configured");
        }

        let units = plan_units(lane, &thresholds, has_credentials);
        let ctx = CycleContext {
            thresholds,
            risk,
            snapshot: &snapshot.opportunities,
        };

        let runs = map_bounded(&units, cycle_cfg.unit_concurrency, |_, unit| self.run_unit(unit, &ctx)).await;

        let mut actions = Vec::with_capacity(runs.len());
        let mut scans = Vec::new();
        let mut trade = None;
        for run in runs {
            let run = run?;
            match run.output {
                Some(UnitOutput::Scan(outcome)) => scans.push(outcome),
                Some(UnitOutput::Trade(report)) => trade = report.trade.map(|t| t.status),
                _ => {}
            }
            actions.push(run.report);
        }

        // -- Merge scan outcomes -----------------------------------------

        let merged = if scans.is_empty() {
            warn!("No scan completed this cycle, keeping previous opportunity snapshot");
            None
        } else {
            let merged = merge_scans(scans, thresholds, self.config.scan.results_cap);
            if let Err(e) = save_atomic(&self.paths.opportunities(), &merged) {
                warn!(error = %e, "Failed to write opportunity snapshot");
            }
            Some(merged)
        };
        let opportunities = merged.as_ref().map_or(0, |m| m.opportunities.len());
        let totals = merged.map(|m| m.stats).unwrap_or_default();

        // -- Performance record ------------------------------------------

        let cycle = prev.cycle_count + 1;
        let duration_ms = started.elapsed().as_millis() as u64;
        history.record(
            CycleRecord {
                timestamp: Utc::now(),
                cycle,
                lane,
                opportunities,
                scanned: totals.scanned + totals.multi_outcome_scanned,
                errors: totals.errors,
                empty_books: totals.empty_books,
                duration_ms,
                bankroll_usd: risk.bankroll_usd,
            },
            cycle_cfg.history_limit,
        );
        if let Err(e) = save_atomic(&self.paths.performance(), &history) {
            warn!(error = %e, "Failed to write performance history");
        }

        // -- Next state --------------------------------------------------

        let summaries: Vec<String> = actions.iter().map(UnitReport::summary).collect();
        let keep_from = summaries.len().saturating_sub(cycle_cfg.recent_actions);
        let next = CycleState {
            cycle_count: cycle,
            last_lane: Some(lane),
            lane_streak: next_lane_streak(&prev, lane),
            last_no_opportunity_streak: streak,
            last_opportunity_count: opportunities,
            last_thresholds: Some(thresholds),
            recent_action_summaries: summaries[keep_from..].to_vec(),
            last_duration_ms: duration_ms,
            updated_at: Some(Utc::now()),
        };
        save_atomic(&self.paths.cycle_state(), &next).map_err(CycleError::State)?;

        let survival = Accountant::assess(
            cycle_cfg.survival_mode,
            history.no_opportunity_streak(),
            risk.bankroll_usd,
        );

        let summary = CycleSummary {
            cycle,
            lane,
            streak,
            thresholds,
            opportunities,
            actions,
            trade,
            survival,
            duration_ms,
        };
        for action in &summary.actions {
            match action.status {
                UnitStatus::Err => warn!(unit = %action.name, detail = ?action.detail, "Unit failed"),
                _ => info!(unit = %action.name, status = %action.status, ms = action.duration_ms, "Unit finished"),
            }
        }
        info!(summary = %summary, state = %next, "=== Cycle complete ===");
        Ok(summary)
    }

    fn timeout_for(&self, unit: &WorkUnit) -> Duration {
        let cycle = &self.config.cycle;
        let secs = match unit {
            WorkUnit::BookScan { .. } => cycle.scan_timeout_secs,
            WorkUnit::Execution => cycle.execution_timeout_secs,
            _ => cycle.unit_timeout_secs,
        };
        Duration::from_secs(secs)
    }

    /// Run one unit under its timeout. Only fatal errors escape.
    async fn run_unit(&self, unit: &WorkUnit, ctx: &CycleContext<'_>) -> Result<UnitRun, CycleError> {
        let started = Instant::now();
        let limit = self.timeout_for(unit);
        let result = tokio::time::timeout(limit, self.dispatch(unit, ctx)).await;
        let duration_ms = started.elapsed().as_millis() as u64;

        let (status, detail, output) = match result {
            Err(_) => {
                warn!(unit = unit.name(), timeout_secs = limit.as_secs(), "Work unit timed out");
                (UnitStatus::Err, Some(format!("timed out after {}s", limit.as_secs())), None)
            }
            Ok(Err(UnitFailure::Fatal(e))) => return Err(e),
            Ok(Err(UnitFailure::Failed(e))) => {
                warn!(unit = unit.name(), error = %e, "Work unit failed, continuing");
                (UnitStatus::Err, Some(format!("{e:#}")), None)
            }
            Ok(Ok(UnitOutput::Skipped(reason))) => (UnitStatus::Skip, Some(reason), None),
            Ok(Ok(UnitOutput::Findings(n))) => (UnitStatus::Ok, Some(format!("{n} findings")), None),
            Ok(Ok(output)) => (UnitStatus::Ok, None, Some(output)),
        };

        Ok(UnitRun {
            report: UnitReport {
                name: unit.name().to_string(),
                status,
                duration_ms,
                detail,
            },
            output,
        })
    }

    async fn dispatch(&self, unit: &WorkUnit, ctx: &CycleContext<'_>) -> Result<UnitOutput, UnitFailure> {
        match unit {
            WorkUnit::BookScan { label, params } => Ok(UnitOutput::Scan(self.book_scan(label, params).await?)),
            WorkUnit::Signal(kind) => match &self.signals {
                Some(feed) => Ok(UnitOutput::Findings(feed.run(*kind).await?)),
                None => Ok(UnitOutput::Skipped("no signal feed configured".into())),
            },
            WorkUnit::CrossMarket => Ok(UnitOutput::Findings(self.cross_market_scan().await?)),
            WorkUnit::Correlation => Ok(UnitOutput::Findings(self.correlation_scan().await?)),
            WorkUnit::RiskControls => Ok(UnitOutput::Findings(self.risk_controls(&ctx.risk)?)),
            WorkUnit::Execution => self
                .execute(ctx)
                .await
                .map(UnitOutput::Trade)
                .map_err(UnitFailure::Fatal),
        }
    }

    // -- Units -----------------------------------------------------------

    /// Select candidates, fetch their books and detect basket mispricings.
    async fn book_scan(&self, label: &str, params: &Thresholds) -> Result<ScanOutcome> {
        let started = Instant::now();
        let scan = &self.config.scan;

        let catalog = self
            .catalog
            .sampling_markets()
            .await
            .context("Failed to load sampling markets")?;
        let candidates = select_candidates(
            &catalog,
            params.scan_market_limit,
            scan.multi_outcome,
            scan.max_multi_outcome_markets,
            scan.max_legs,
        );

        let scanner = BoundedScanner::new(self.fetcher.clone(), ScanPolicy::from(scan));
        let results = scanner.scan(&candidates.all()).await;
        let mut stats = ScanStats::from_results(&candidates, &results);

        let books: Vec<MarketBooks> = results.into_iter().filter_map(Result::ok).collect();
        let detector = OpportunityDetector::new(DetectorConfig {
            scan_edge_min: params.scan_edge_min,
            ..DetectorConfig::from(scan)
        });
        let opportunities = detector.detect_all(&books);

        stats.opportunities = opportunities.len();
        stats.duration_ms = started.elapsed().as_millis() as u64;

        info!(
            scan = label,
            sampled = stats.sampled,
            scanned = stats.scanned,
            multi = stats.multi_outcome_scanned,
            valid = stats.valid_books,
            empty = stats.empty_books,
            errors = stats.errors,
            opportunities = stats.opportunities,
            "Book scan finished"
        );

        Ok(ScanOutcome {
            report: ScanReport {
                label: label.to_string(),
                params: *params,
                stats,
            },
            opportunities,
        })
    }

    /// Threshold-ladder monotonicity across listed markets.
    async fn cross_market_scan(&self) -> Result<usize> {
        let markets = self
            .catalog
            .listed_markets()
            .await
            .context("Failed to load listed markets")?;
        let mut scan = scan_monotonicity(&markets, &ConsistencyConfig::default());
        scan.violations.sort_by(|a, b| b.edge_proxy.cmp(&a.edge_proxy));
        let found = scan.violations.len();
        scan.violations.truncate(MAX_CROSS_MARKET_FINDINGS);

        let snapshot = CrossMarketSnapshot {
            timestamp: Some(Utc::now()),
            stats: CrossMarketStats {
                markets: markets.len(),
                clusters: scan.clusters,
                violations: found,
            },
            violations: scan.violations,
        };
        save_atomic(&self.paths.cross_market(), &snapshot)?;

        info!(markets = markets.len(), violations = found, "Cross-market scan finished");
        Ok(found)
    }

    /// Over-priced mutually exclusive event groups.
    async fn correlation_scan(&self) -> Result<usize> {
        let events = self.catalog.events().await.context("Failed to load events")?;
        let mut scan = scan_exclusive_sums(&events, &ConsistencyConfig::default());
        scan.findings.sort_by(|a, b| b.sum_yes.cmp(&a.sum_yes));
        let found = scan.findings.len();
        scan.findings.truncate(MAX_CORRELATION_FINDINGS);

        let snapshot = CorrelationSnapshot {
            timestamp: Some(Utc::now()),
            stats: CorrelationStats {
                events: events.len(),
                scanned_events: scan.scanned_events,
                findings: found,
            },
            findings: scan.findings,
        };
        save_atomic(&self.paths.correlation(), &snapshot)?;

        info!(events = events.len(), findings = found, "Correlation scan finished");
        Ok(found)
    }

    /// Publish current limits and remaining capacity.
    fn risk_controls(&self, risk: &RiskState) -> Result<usize> {
        let manager = RiskManager::new(RiskLimits::from(&self.config.risk));
        let params = manager.params(risk, &self.config.risk);
        save_atomic(&self.paths.risk_params(), &params)?;
        info!(
            bankroll = format!("${:.2}", params.bankroll_usd),
            exposure = format!("${:.2}", params.current_exposure_usd),
            capacity = format!("${:.2}", params.available_capacity_usd),
            "Risk parameters published"
        );
        Ok(1)
    }

    /// Attempt the top executable opportunity from the dispatch-time snapshot.
    async fn execute(&self, ctx: &CycleContext<'_>) -> Result<ExecutionReport, CycleError> {
        let depth = BoundedScanner::new(self.fetcher.clone(), ScanPolicy::from(&self.config.scan));
        let mut executor = Executor::new(
            PositionSizer::from_config(&self.config.risk),
            self.config.cycle.dry_run,
        )
        .with_min_executable_shares(self.config.risk.min_executable_shares)
        .with_depth_refresh(Arc::new(depth));

        if let Some(key) = &self.config.execution_key {
            executor = executor.with_credentials(SecretString::new(key.expose_secret().clone()));
        }
        if let Some(gateway) = &self.gateway {
            executor = executor.with_gateway(gateway.clone());
        }

        executor
            .execute(ctx.snapshot, &ctx.risk, &ctx.thresholds, &self.paths.trades())
            .await
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platforms::{MockBookFetcher, MockMarketSource, MockSignalFeed};
    use crate::types::{BookLevel, BookSnapshot, CatalogMarket, OpportunityKind, OutcomeToken};
    use rust_decimal_macros::dec;
    use std::path::PathBuf;

    fn temp_dir() -> PathBuf {
        std::env::temp_dir().join(format!("basket-arb-cycle-{}", uuid::Uuid::new_v4()))
    }

    fn make_config(dir: &PathBuf) -> AppConfig {
        let mut config = AppConfig::default();
        config.cycle.state_dir = dir.clone();
        config.scan.max_retries = 0;
        config
    }

    fn make_thresholds() -> Thresholds {
        Thresholds {
            scan_edge_min: dec!(0.0025),
            execute_edge_min: dec!(0.005),
            scan_market_limit: 250,
            max_position_usd: dec!(5),
        }
    }

    fn make_opportunity(market: &str, edge: Decimal, secs: i64) -> Opportunity {
        Opportunity {
            id: format!("{market}:buy_all"),
            kind: OpportunityKind::BuyAll,
            basket_value: Decimal::ONE - edge,
            gross_edge: edge,
            max_tradable_size: dec!(10),
            legs: Vec::new(),
            source_market_id: market.into(),
            captured_at: DateTime::from_timestamp(secs, 0).unwrap_or_default(),
        }
    }

    fn make_outcome(label: &str, opps: Vec<Opportunity>) -> ScanOutcome {
        ScanOutcome {
            report: ScanReport {
                label: label.into(),
                params: make_thresholds(),
                stats: ScanStats {
                    sampled: 10,
                    scanned: 5,
                    errors: 1,
                    sample_errors: vec![format!("{label}: boom")],
                    opportunities: opps.len(),
                    ..Default::default()
                },
            },
            opportunities: opps,
        }
    }

    fn catalog_market(id: &str) -> CatalogMarket {
        CatalogMarket {
            condition_id: id.into(),
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
            liquidity: dec!(1000),
            active: true,
            closed: false,
            archived: false,
            accepting_orders: true,
        }
    }

    #[test]
    fn test_plan_units_per_lane() {
        let t = make_thresholds();
        let names = |lane, exec| -> Vec<&'static str> {
            plan_units(lane, &t, exec).iter().map(WorkUnit::name).collect()
        };

        assert_eq!(
            names(Lane::OrderbookArb, false),
            vec!["book_scan", "external_signal", "wide_book_scan"]
        );
        assert_eq!(
            names(Lane::CrossMarket, true),
            vec!["book_scan", "external_signal", "cross_market_scan", "correlation_scan", "execution"]
        );
        assert_eq!(
            names(Lane::ExternalReality, false),
            vec!["book_scan", "external_signal", "price_history"]
        );
        assert_eq!(
            names(Lane::NewsDiscovery, false),
            vec!["book_scan", "external_signal", "news_signal", "cross_market_scan"]
        );
        assert_eq!(
            names(Lane::ExecutionQuality, false),
            vec!["book_scan", "external_signal", "risk_controls"]
        );
    }

    #[test]
    fn test_wide_scan_unit_params() {
        let units = plan_units(Lane::OrderbookArb, &make_thresholds(), false);
        match &units[2] {
            WorkUnit::BookScan { params, .. } => {
                assert_eq!(params.scan_market_limit, 350);
                assert_eq!(params.scan_edge_min, dec!(0.00225));
            }
            other => panic!("unexpected unit {other:?}"),
        }
    }

    #[test]
    fn test_unit_summary_format() {
        let report = UnitReport {
            name: "book_scan".into(),
            status: UnitStatus::Skip,
            duration_ms: 12,
            detail: None,
        };
        assert_eq!(report.summary(), "book_scan:skip:12ms");
    }

    #[test]
    fn test_merge_dedupes_latest_capture() {
        let baseline = make_outcome(
            "book_scan",
            vec![make_opportunity("a", dec!(0.02), 100), make_opportunity("b", dec!(0.05), 100)],
        );
        let wide = make_outcome(
            "wide_book_scan",
            vec![make_opportunity("a", dec!(0.03), 200), make_opportunity("c", dec!(0.01), 150)],
        );

        let snapshot = merge_scans(vec![baseline, wide], make_thresholds(), 50);

        let ids: Vec<&str> = snapshot.opportunities.iter().map(|o| o.id.as_str()).collect();
        assert_eq!(ids, vec!["b:buy_all", "a:buy_all", "c:buy_all"]);
        assert_eq!(snapshot.opportunities[1].gross_edge, dec!(0.03));
        assert_eq!(snapshot.stats.opportunities, 3);
        assert_eq!(snapshot.stats.scanned, 10);
        assert_eq!(snapshot.stats.errors, 2);
        assert_eq!(snapshot.stats.sample_errors.len(), 2);
        assert_eq!(snapshot.scans.len(), 2);
    }

    #[test]
    fn test_merge_respects_cap() {
        let opps = (0..5)
            .map(|i| make_opportunity(&format!("m{i}"), Decimal::new(i + 1, 2), 100))
            .collect();
        let snapshot = merge_scans(vec![make_outcome("book_scan", opps)], make_thresholds(), 2);
        assert_eq!(snapshot.opportunities.len(), 2);
        assert_eq!(snapshot.opportunities[0].gross_edge, dec!(0.05));
    }

    #[test]
    fn test_risk_state_from_files() {
        let dir = temp_dir();
        let paths = ArtifactPaths::new(&dir);
        assert_eq!(load_risk_state(&paths), RiskState::default());

        save_atomic(&paths.balance(), &BalanceFile { bankroll_usd: dec!(120) }).unwrap();
        save_atomic(
            &paths.positions(),
            &PositionsFile {
                positions: vec![
                    PositionEntry {
                        token_id: "a".into(),
                        shares: dec!(10),
                        value_usd: dec!(4.5),
                    },
                    PositionEntry {
                        token_id: "b".into(),
                        shares: dec!(2),
                        value_usd: dec!(1.5),
                    },
                ],
            },
        )
        .unwrap();

        let risk = load_risk_state(&paths);
        assert_eq!(risk.bankroll_usd, dec!(120));
        assert_eq!(risk.current_exposure_usd, dec!(6));
        let _ = std::fs::remove_dir_all(dir);
    }

    #[tokio::test]
    async fn test_cycle_survives_failing_units() {
        let dir = temp_dir();
        let mut source = MockMarketSource::new();
        source
            .expect_sampling_markets()
            .returning(|| Ok(vec![catalog_market("m1")]));
        source
            .expect_listed_markets()
            .returning(|| Err(anyhow::anyhow!("gamma down")));
        source
            .expect_events()
            .returning(|| Err(anyhow::anyhow!("gamma down")));

        let mut fetcher = MockBookFetcher::new();
        fetcher.expect_fetch_book().returning(|token| {
            let price = if token.ends_with("-yes") { dec!(0.45) } else { dec!(0.50) };
            Ok(BookSnapshot {
                token_id: token.to_string(),
                bids: Vec::new(),
                asks: vec![BookLevel::new(price, dec!(20))],
                fetched_at: Utc::now(),
            })
        });

        let mut signals = MockSignalFeed::new();
        signals
            .expect_run()
            .returning(|_| Err(anyhow::anyhow!("feed offline")));

        let mut config = make_config(&dir);
        // cycle_count 1 → cross_market lane.
        save_atomic(
            &ArtifactPaths::new(&dir).cycle_state(),
            &CycleState {
                cycle_count: 1,
                ..Default::default()
            },
        )
        .unwrap();
        config.cycle.unit_concurrency = 2;

        let orchestrator = CycleOrchestrator::new(config, Arc::new(source), Arc::new(fetcher))
            .with_signals(Arc::new(signals));
        let summary = orchestrator.run_cycle().await.unwrap();

        assert_eq!(summary.lane, Lane::CrossMarket);
        assert_eq!(summary.opportunities, 1);
        let statuses: Vec<(String, UnitStatus)> = summary
            .actions
            .iter()
            .map(|a| (a.name.clone(), a.status))
            .collect();
        assert_eq!(statuses[0], ("book_scan".to_string(), UnitStatus::Ok));
        assert!(statuses[1..].iter().all(|(_, s)| *s == UnitStatus::Err));

        let state: CycleState = load_or_default(&orchestrator.paths().cycle_state());
        assert_eq!(state.cycle_count, 2);
        assert_eq!(state.last_lane, Some(Lane::CrossMarket));
        assert_eq!(state.recent_action_summaries.len(), 4);
        let _ = std::fs::remove_dir_all(dir);
    }

    #[tokio::test]
    async fn test_signal_findings_reported_in_detail() {
        let dir = temp_dir();
        let mut source = MockMarketSource::new();
        source.expect_sampling_markets().returning(|| Ok(Vec::new()));

        let mut signals = MockSignalFeed::new();
        signals
            .expect_run()
            .withf(|kind| *kind == SignalKind::ExternalReality)
            .returning(|_| Ok(3));

        let orchestrator = CycleOrchestrator::new(make_config(&dir), Arc::new(source), Arc::new(MockBookFetcher::new()))
            .with_signals(Arc::new(signals));
        let summary = orchestrator.run_cycle().await.unwrap();

        assert_eq!(summary.lane, Lane::OrderbookArb);
        let signal = summary
            .actions
            .iter()
            .find(|a| a.name == "external_signal")
            .unwrap();
        assert_eq!(signal.status, UnitStatus::Ok);
        assert_eq!(signal.detail.as_deref(), Some("3 findings"));
        let _ = std::fs::remove_dir_all(dir);
    }

    #[tokio::test]
    async fn test_live_without_credentials_aborts() {
        let dir = temp_dir();
        let mut config = make_config(&dir);
        config.cycle.dry_run = false;

        let orchestrator = CycleOrchestrator::new(
            config,
            Arc::new(MockMarketSource::new()),
            Arc::new(MockBookFetcher::new()),
        );
        let result = orchestrator.run_cycle().await;
        assert!(matches!(result, Err(CycleError::MissingCredentials)));
        assert!(!orchestrator.paths().cycle_state().exists());
    }
}
