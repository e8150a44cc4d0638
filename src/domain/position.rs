//! Position: the mutable per-(user, market, range) aggregate.

use crate::domain::{Address, CloseReason, MarketId, TimeMs};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Current aggregate state for one user's holdings in one range bucket of
/// one market. All cash/share quantities are in the chain's smallest unit.
/// Never hard-deleted; settlement and claims soft-close via `is_active` +
/// `close_reason`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Position {
    pub user: Address,
    pub market_id: MarketId,
    pub range_lower: i64,
    pub range_upper: i64,
    pub total_shares: i64,
    pub total_cost_basis: i64,
    pub realized_pnl: i64,
    pub total_shares_sold: i64,
    pub total_proceeds: i64,
    /// Set only after resolution: `shares - basis` for winners,
    /// `-basis` for losers.
    pub unrealized_pnl: Option<i64>,
    pub is_active: bool,
    pub close_reason: CloseReason,
    pub first_purchase_ms: Option<TimeMs>,
    pub last_updated_ms: TimeMs,
    pub last_event_key: Option<String>,
}

impl Position {
    /// Fresh (empty) position for a key. Callers apply the first purchase
    /// immediately after.
    pub fn new(
        user: Address,
        market_id: MarketId,
        range_lower: i64,
        range_upper: i64,
        now: TimeMs,
    ) -> Self {
        Position {
            user,
            market_id,
            range_lower,
            range_upper,
            total_shares: 0,
            total_cost_basis: 0,
            realized_pnl: 0,
            total_shares_sold: 0,
            total_proceeds: 0,
            unrealized_pnl: None,
            is_active: false,
            close_reason: CloseReason::None,
            first_purchase_ms: None,
            last_updated_ms: now,
            last_event_key: None,
        }
    }

    /// Blended average entry price, derived from the two running totals.
    /// Zero when the position holds no shares.
    pub fn avg_entry_price(&self) -> Decimal {
        if self.total_shares <= 0 {
            return Decimal::ZERO;
        }
        Decimal::from(self.total_cost_basis) / Decimal::from(self.total_shares)
    }

    /// Whether a resolved value lands inside this position's range.
    /// Boundaries are inclusive for settlement purposes.
    pub fn range_contains(&self, resolved_value: i64) -> bool {
        self.range_lower <= resolved_value && resolved_value <= self.range_upper
    }

    /// Terminal positions no longer expect events; one arriving anyway is
    /// a data-consistency anomaly the aggregator logs.
    pub fn is_terminal(&self) -> bool {
        !self.is_active && self.close_reason != CloseReason::None
    }
}
