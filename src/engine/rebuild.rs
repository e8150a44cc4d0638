//! Reconciliation: recompute position state by replaying the event log.
//!
//! Used to audit a market after resolution, migrate storage shapes, and
//! recover from disasters. Replay folds events through the exact same
//! aggregator code as the live path, so for an identical event sequence
//! the output matches the live store.

use crate::db::Repository;
use crate::domain::{MarketId, Position};
use crate::engine::aggregator;
use futures::future::try_join_all;
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::info;

type PositionKey = (String, String, i64, i64);

fn position_key(position: &Position) -> PositionKey {
    (
        position.user.as_str().to_string(),
        position.market_id.as_str().to_string(),
        position.range_lower,
        position.range_upper,
    )
}

/// Fold an ordered event sequence into from-scratch position snapshots.
///
/// Events must already be in replay order (`time_ms, checkpoint,
/// event_key`); each event only touches its own key, so the global order
/// induces the per-position order the fold requires.
pub fn replay(events: impl IntoIterator<Item = crate::domain::LedgerEvent>) -> Vec<Position> {
    let mut by_key: BTreeMap<PositionKey, Position> = BTreeMap::new();

    for event in events {
        let key = match (&event.user, event.range_lower, event.range_upper) {
            (Some(user), Some(lower), Some(upper)) => (
                user.as_str().to_string(),
                event.market_id.as_str().to_string(),
                lower,
                upper,
            ),
            _ => continue,
        };

        let existing = by_key.remove(&key);
        if let Some(outcome) = aggregator::fold_trade(existing, &event) {
            by_key.insert(key, outcome.position);
        }
    }

    by_key.into_values().collect()
}

/// Rebuild position snapshots from the raw log, optionally scoped to one
/// market.
pub async fn rebuild_positions(
    repo: &Repository,
    market_id: Option<&MarketId>,
) -> Result<Vec<Position>, sqlx::Error> {
    let events = repo.query_trade_events(market_id).await?;
    Ok(replay(events))
}

/// Rebuild and persist: overwrite the live aggregates with the replayed
/// state. This is the migration/disaster-recovery path; audit flows
/// should prefer [`reconcile`], which never writes.
pub async fn rebuild_and_store(
    repo: &Repository,
    market_id: Option<&MarketId>,
) -> Result<usize, sqlx::Error> {
    let positions = rebuild_positions(repo, market_id).await?;
    try_join_all(positions.iter().map(|p| repo.upsert_position(p))).await?;
    info!(
        market = market_id.map(|m| m.as_str()).unwrap_or("*"),
        count = positions.len(),
        "Rebuilt positions persisted"
    );
    Ok(positions.len())
}

/// One divergent key in a reconcile report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconcileMismatch {
    pub user: String,
    pub range_lower: i64,
    pub range_upper: i64,
    pub live: Option<Position>,
    pub rebuilt: Option<Position>,
}

/// Outcome of recomputing one market's final positions from the raw log.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconcileReport {
    pub market_id: MarketId,
    pub resolved_value: i64,
    pub rebuilt_count: usize,
    pub live_count: usize,
    pub mismatches: Vec<ReconcileMismatch>,
    pub positions: Vec<Position>,
}

/// Recompute a resolved market's final positions directly from the event
/// log, bypassing the live aggregate, and diff the two. Synchronous
/// operator entry point for cross-validation.
pub async fn reconcile(
    repo: &Repository,
    market_id: &MarketId,
    resolved_value: i64,
) -> Result<ReconcileReport, sqlx::Error> {
    let mut rebuilt = rebuild_positions(repo, Some(market_id)).await?;

    // Apply the same win/loss classification the settlement engine does.
    for position in rebuilt.iter_mut() {
        if !position.is_active {
            continue;
        }
        if position.range_contains(resolved_value) {
            position.unrealized_pnl = Some(position.total_shares - position.total_cost_basis);
        } else {
            position.is_active = false;
            position.close_reason = crate::domain::CloseReason::LostResolution;
            position.unrealized_pnl = Some(-position.total_cost_basis);
        }
    }

    let live = repo.query_positions(None, Some(market_id)).await?;
    let live_count = live.len();
    let live_by_key: BTreeMap<PositionKey, Position> =
        live.into_iter().map(|p| (position_key(&p), p)).collect();
    let rebuilt_by_key: BTreeMap<PositionKey, Position> = rebuilt
        .iter()
        .cloned()
        .map(|p| (position_key(&p), p))
        .collect();

    let mut mismatches = Vec::new();
    let all_keys: std::collections::BTreeSet<&PositionKey> =
        live_by_key.keys().chain(rebuilt_by_key.keys()).collect();
    for key in all_keys {
        let live_pos = live_by_key.get(key);
        let rebuilt_pos = rebuilt_by_key.get(key);
        let matches = match (live_pos, rebuilt_pos) {
            (Some(a), Some(b)) => accounting_eq(a, b),
            _ => false,
        };
        if !matches {
            mismatches.push(ReconcileMismatch {
                user: key.0.clone(),
                range_lower: key.2,
                range_upper: key.3,
                live: live_pos.cloned(),
                rebuilt: rebuilt_pos.cloned(),
            });
        }
    }

    info!(
        market = %market_id,
        rebuilt = rebuilt.len(),
        live = live_count,
        mismatches = mismatches.len(),
        "Reconcile completed"
    );

    Ok(ReconcileReport {
        market_id: market_id.clone(),
        resolved_value,
        rebuilt_count: rebuilt.len(),
        live_count,
        mismatches,
        positions: rebuilt,
    })
}

/// Accounting-field equality. Bookkeeping stamps (`last_updated_ms`,
/// `last_event_key`) are excluded: live rows settled in bulk carry the
/// settlement wall-clock, not the event time.
fn accounting_eq(a: &Position, b: &Position) -> bool {
    a.total_shares == b.total_shares
        && a.total_cost_basis == b.total_cost_basis
        && a.realized_pnl == b.realized_pnl
        && a.total_shares_sold == b.total_shares_sold
        && a.total_proceeds == b.total_proceeds
        && a.unrealized_pnl == b.unrealized_pnl
        && a.is_active == b.is_active
        && a.close_reason == b.close_reason
}
