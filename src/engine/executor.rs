//! Trade executor.
//!
//! Picks the top executable opportunity from the snapshot, sizes it against
//! refreshed depth, and either logs the plan (dry run) or submits one BUY per
//! leg through the execution gateway. Every attempt lands in `trades.json`.

use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::engine::scanner::BoundedScanner;
use crate::platforms::ExecutionGateway;
use crate::storage::{load_or_default, save_atomic};
use crate::strategy::PositionSizer;
use crate::types::{
    BookLevel, CycleError, Opportunity, OrderAck, OrderRequest, RiskState, Side, SizingDecision,
    Thresholds,
};

// ---------------------------------------------------------------------------
// Trade ledger
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TradeStatus {
    /// Sized and logged, nothing submitted.
    DryRun,
    /// Sizing said no.
    Rejected,
    /// Every leg acknowledged by the venue.
    Submitted,
    /// Every leg acknowledged by a simulated gateway.
    Paper,
    /// Some legs acknowledged before a failure.
    Partial,
    Failed,
}

/// One entry in `trades.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeRecord {
    pub timestamp: DateTime<Utc>,
    pub opportunity: Opportunity,
    pub sizing: SizingDecision,
    pub status: TradeStatus,
    pub gateway: Option<String>,
    #[serde(default)]
    pub orders: Vec<OrderAck>,
    pub error: Option<String>,
}

/// Append `record` to the ledger at `path`.
pub fn append_trade(path: &Path, record: TradeRecord) -> Result<()> {
    let mut trades: Vec<TradeRecord> = load_or_default(path);
    trades.push(record);
    save_atomic(path, &trades)
}

// ---------------------------------------------------------------------------
// Execution report
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionReport {
    /// Opportunities that passed the edge and size filter.
    pub executable: usize,
    /// The attempt made this cycle, if any.
    pub trade: Option<TradeRecord>,
}

/// Opportunities worth attempting, in snapshot (rank) order.
pub fn executable<'a>(
    opportunities: &'a [Opportunity],
    execute_edge_min: Decimal,
    min_shares: Decimal,
) -> Vec<&'a Opportunity> {
    opportunities
        .iter()
        .filter(|o| o.gross_edge >= execute_edge_min && o.max_tradable_size >= min_shares)
        .collect()
}

// ---------------------------------------------------------------------------
// Executor
// ---------------------------------------------------------------------------

pub struct Executor {
    sizer: PositionSizer,
    gateway: Option<Arc<dyn ExecutionGateway>>,
    credentials: Option<SecretString>,
    depth: Option<Arc<BoundedScanner>>,
    dry_run: bool,
    min_executable_shares: Decimal,
}

impl Executor {
    pub fn new(sizer: PositionSizer, dry_run: bool) -> Self {
        Self {
            sizer,
            gateway: None,
            credentials: None,
            depth: None,
            dry_run,
            min_executable_shares: dec!(5),
        }
    }

    pub fn with_gateway(mut self, gateway: Arc<dyn ExecutionGateway>) -> Self {
        self.gateway = Some(gateway);
        self
    }

    pub fn with_credentials(mut self, credentials: SecretString) -> Self {
        self.credentials = Some(credentials);
        self
    }

    /// Refetch leg books before sizing instead of trusting snapshot levels.
    pub fn with_depth_refresh(mut self, scanner: Arc<BoundedScanner>) -> Self {
        self.depth = Some(scanner);
        self
    }

    pub fn with_min_executable_shares(mut self, shares: Decimal) -> Self {
        self.min_executable_shares = shares;
        self
    }

    /// Live only with credentials and a gateway to submit through.
    fn is_live(&self) -> bool {
        !self.dry_run && self.credentials.is_some() && self.gateway.is_some()
    }

    /// Attempt at most one opportunity and record it in `trades_path`.
    pub async fn execute(
        &self,
        opportunities: &[Opportunity],
        risk: &RiskState,
        thresholds: &Thresholds,
        trades_path: &Path,
    ) -> Result<ExecutionReport, CycleError> {
        if !self.dry_run && self.credentials.is_none() {
            return Err(CycleError::MissingCredentials);
        }

        let candidates = executable(
            opportunities,
            thresholds.execute_edge_min,
            self.min_executable_shares,
        );
        let Some(top) = candidates.first().copied() else {
            info!(
                snapshot = opportunities.len(),
                min_edge = format!("{:.2}%", thresholds.execute_edge_min * dec!(100)),
                "No executable opportunities"
            );
            return Ok(ExecutionReport {
                executable: 0,
                trade: None,
            });
        };

        info!(executable = candidates.len(), top = %top, "Executable opportunities found");

        let depth = self.refresh_depth(top).await;
        let sizing = self
            .sizer
            .size_opportunity(top, &depth, risk, thresholds.max_position_usd);

        let record = if !sizing.is_approved() {
            let reason = sizing.rejection.map(|r| r.to_string());
            info!(opportunity = %top.id, reason = ?reason, "Opportunity not sized for execution");
            self.record(top, sizing, TradeStatus::Rejected, Vec::new(), reason)
        } else if !self.is_live() {
            info!(
                opportunity = %top.id,
                shares = %sizing.size_in_shares,
                size = format!("${:.2}", sizing.size_usd),
                edge = format!("{:.2}%", top.gross_edge * dec!(100)),
                "[DRY RUN] Would buy every leg"
            );
            self.record(top, sizing, TradeStatus::DryRun, Vec::new(), None)
        } else {
            self.submit_legs(top, sizing).await
        };

        if let Err(e) = append_trade(trades_path, record.clone()) {
            warn!(error = %e, "Failed to append trade ledger, continuing without");
        }

        Ok(ExecutionReport {
            executable: candidates.len(),
            trade: Some(record),
        })
    }

    /// Current ask ladders per leg. A leg that cannot be refetched gets an
    /// empty ladder, which the sizer replaces with the snapshot level.
    async fn refresh_depth(&self, opp: &Opportunity) -> Vec<Vec<BookLevel>> {
        let Some(scanner) = &self.depth else {
            return Vec::new();
        };

        let mut depth = Vec::with_capacity(opp.legs.len());
        for leg in &opp.legs {
            match scanner.fetch_with_retry(&leg.token_id).await {
                Ok(book) => depth.push(book.ask_depth()),
                Err(e) => {
                    debug!(token = %leg.token_id, error = %e, "Depth refresh failed, using snapshot level");
                    depth.push(Vec::new());
                }
            }
        }
        depth
    }

    /// One BUY per leg at its recorded price; stops at the first failure.
    async fn submit_legs(&self, opp: &Opportunity, sizing: SizingDecision) -> TradeRecord {
        let Some(gateway) = &self.gateway else {
            return self.record(opp, sizing, TradeStatus::DryRun, Vec::new(), None);
        };

        let mut acks = Vec::with_capacity(opp.legs.len());
        let mut error = None;
        for leg in &opp.legs {
            let order = OrderRequest {
                token_id: leg.token_id.clone(),
                side: Side::Buy,
                price: leg.price,
                size: sizing.size_in_shares,
            };
            match gateway.submit(&order).await {
                Ok(ack) => acks.push(ack),
                Err(e) => {
                    warn!(
                        opportunity = %opp.id,
                        token = %leg.token_id,
                        gateway = gateway.name(),
                        error = %e,
                        "Leg submission failed, stopping"
                    );
                    error = Some(e.to_string());
                    break;
                }
            }
        }

        let status = match (&error, acks.is_empty()) {
            (None, _) if gateway.is_simulated() => TradeStatus::Paper,
            (None, _) => TradeStatus::Submitted,
            (Some(_), true) => TradeStatus::Failed,
            (Some(_), false) => TradeStatus::Partial,
        };
        info!(
            opportunity = %opp.id,
            gateway = gateway.name(),
            legs = opp.legs.len(),
            acknowledged = acks.len(),
            status = ?status,
            "Execution attempt complete"
        );
        self.record(opp, sizing, status, acks, error)
    }

    fn record(
        &self,
        opp: &Opportunity,
        sizing: SizingDecision,
        status: TradeStatus,
        orders: Vec<OrderAck>,
        error: Option<String>,
    ) -> TradeRecord {
        TradeRecord {
            timestamp: Utc::now(),
            opportunity: opp.clone(),
            sizing,
            status,
            gateway: self.gateway.as_ref().map(|g| g.name().to_string()),
            orders,
            error,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
