//! Weighted-average-cost position fold.
//!
//! All accounting lives here: the live ingestion path and the
//! reconciliation/rebuild job fold events through the same functions, which
//! is what makes replay equivalence hold by construction. Quantities are
//! integers in the chain's smallest unit; the only fractional value
//! (average entry price) is derived on read.

use crate::domain::{CloseReason, EventKind, LedgerEvent, Position, TimeMs};
use tracing::warn;

/// Result of folding one trade event into a position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FoldOutcome {
    pub position: Position,
    /// Realized-PnL movement caused by this event (0 for purchases).
    pub pnl_delta: i64,
}

/// Outcome detail for a sale.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SaleOutcome {
    pub cost_removed: i64,
    pub pnl_delta: i64,
    pub oversold: bool,
}

/// Fold a single trade event into the (possibly absent) current position.
///
/// Returns None when the event has no effect: a sale or claim with no
/// prior position on record (recoverable and logged; the purchase may
/// simply not have been ingested yet), or a non-trade kind.
pub fn fold_trade(existing: Option<Position>, event: &LedgerEvent) -> Option<FoldOutcome> {
    if !event.kind.is_trade() {
        return None;
    }

    let (user, range_lower, range_upper) =
        match (&event.user, event.range_lower, event.range_upper) {
            (Some(user), Some(lower), Some(upper)) => (user.clone(), lower, upper),
            _ => {
                warn!(
                    event_key = %event.event_key,
                    kind = %event.kind,
                    "Trade event missing user or range fields, skipping"
                );
                return None;
            }
        };

    let mut position = match existing {
        Some(pos) => pos,
        None => {
            if event.kind != EventKind::SharesPurchased {
                warn!(
                    event_key = %event.event_key,
                    kind = %event.kind,
                    user = %user,
                    market = %event.market_id,
                    "No position on record for sale/claim, applying as no-op"
                );
                return None;
            }
            Position::new(
                user,
                event.market_id.clone(),
                range_lower,
                range_upper,
                event.time_ms,
            )
        }
    };

    if position.is_terminal() {
        warn!(
            event_key = %event.event_key,
            kind = %event.kind,
            close_reason = position.close_reason.as_str(),
            "Event arrived against a closed position, applying delta anyway"
        );
    }

    let pnl_delta = match event.kind {
        EventKind::SharesPurchased => {
            apply_purchase(
                &mut position,
                event.shares_abs(),
                event.cash_abs(),
                event.time_ms,
                &event.event_key,
            );
            0
        }
        EventKind::SharesSold => {
            apply_sale(
                &mut position,
                event.shares_abs(),
                event.cash_abs(),
                event.time_ms,
                &event.event_key,
            )
            .pnl_delta
        }
        EventKind::RewardsClaimed => apply_claim(
            &mut position,
            event.cash_abs(),
            event.time_ms,
            &event.event_key,
        ),
        _ => unreachable!("non-trade kinds are filtered above"),
    };

    Some(FoldOutcome {
        position,
        pnl_delta,
    })
}

/// Purchase: add shares and cost to the running totals.
pub fn apply_purchase(
    position: &mut Position,
    shares: i64,
    cost: i64,
    time_ms: TimeMs,
    event_key: &str,
) {
    position.total_shares += shares;
    position.total_cost_basis += cost;
    position.is_active = true;
    position.close_reason = CloseReason::None;
    if position.first_purchase_ms.is_none() {
        position.first_purchase_ms = Some(time_ms);
    }
    touch(position, time_ms, event_key);
}

/// Sale: remove shares at the blended average cost.
///
/// `cost_removed = floor(avg_cost * shares)`, computed exactly as
/// `basis * shares / total_shares` in integer math. When the sale is
/// larger than the recorded balance the recorded balance prices the
/// removal (full basis comes out) and the share delta is applied as
/// reported, so the running total can go transiently negative.
pub fn apply_sale(
    position: &mut Position,
    shares: i64,
    proceeds: i64,
    time_ms: TimeMs,
    event_key: &str,
) -> SaleOutcome {
    let recorded = position.total_shares;
    let oversold = shares > recorded;
    if oversold {
        warn!(
            event_key = %event_key,
            user = %position.user,
            market = %position.market_id,
            requested = shares,
            recorded = recorded,
            "Sale exceeds recorded balance, proceeding with recorded balance"
        );
    }

    let cost_removed = if recorded > 0 {
        let priced_shares = shares.min(recorded);
        ((position.total_cost_basis as i128 * priced_shares as i128) / recorded as i128) as i64
    } else {
        0
    };

    let pnl_delta = proceeds - cost_removed;
    position.realized_pnl += pnl_delta;
    position.total_shares -= shares;
    position.total_cost_basis -= cost_removed;
    position.total_shares_sold += shares;
    position.total_proceeds += proceeds;
    position.is_active = position.total_shares > 0;
    if !position.is_active && position.close_reason == CloseReason::None {
        position.close_reason = CloseReason::Sold;
    }
    touch(position, time_ms, event_key);

    SaleOutcome {
        cost_removed,
        pnl_delta,
        oversold,
    }
}

/// Claim: the whole remaining basis converts to realized PnL against the
/// payout and the position closes.
pub fn apply_claim(
    position: &mut Position,
    payout: i64,
    time_ms: TimeMs,
    event_key: &str,
) -> i64 {
    let pnl_delta = payout - position.total_cost_basis;
    position.realized_pnl += pnl_delta;
    position.total_shares = 0;
    position.total_cost_basis = 0;
    position.is_active = false;
    position.close_reason = CloseReason::Claimed;
    touch(position, time_ms, event_key);
    pnl_delta
}

fn touch(position: &mut Position, time_ms: TimeMs, event_key: &str) {
    position.last_updated_ms = time_ms;
    position.last_event_key = Some(event_key.to_string());
}
