//! LedgerEvent: one immutable row of the append-only event log.

use crate::domain::{Address, Cursor, EventKind, MarketId, SellMode, TimeMs};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// A single chain event as ingested. Trade kinds carry the trade fields;
/// market kinds carry `resolved_value`/market metadata only. The event log
/// is unique on (tx_hash, kind), enforced through `event_key`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEvent {
    /// Stable unique key: `tx:<hash>:<kind>`, or a hash fallback when the
    /// upstream payload carried no transaction hash.
    pub event_key: String,
    pub tx_hash: Option<String>,
    pub kind: EventKind,
    /// Position in this kind's cursor stream.
    pub checkpoint: Cursor,
    pub time_ms: TimeMs,
    pub market_id: MarketId,
    pub user: Option<Address>,
    pub range_lower: Option<i64>,
    pub range_upper: Option<i64>,
    /// Signed share delta: >0 purchase, <0 sell/claim.
    pub shares_delta: Option<i64>,
    /// Signed cash delta in smallest units: <0 purchase, >0 sell/claim.
    pub cash_delta: Option<i64>,
    pub price_per_share: Option<Decimal>,
    /// SharesSold only. Audit trail; never consumed by the accounting.
    pub sell_mode: Option<SellMode>,
    /// Computed at ingestion for Sold/Claimed; None until applied.
    pub realized_pnl_delta: Option<i64>,
    /// MarketResolved only.
    pub resolved_value: Option<i64>,
}

impl LedgerEvent {
    /// Derive the stable event key for a (tx_hash, kind) pair.
    ///
    /// Priority: transaction hash (if present) > sha2 hash of the
    /// deterministic fields.
    pub fn compute_event_key(
        tx_hash: Option<&str>,
        kind: EventKind,
        checkpoint: Cursor,
        market_id: &MarketId,
        user: Option<&Address>,
        time_ms: TimeMs,
    ) -> String {
        if let Some(tx) = tx_hash {
            return format!("tx:{}:{}", tx, kind.as_str());
        }

        use sha2::{Digest, Sha256};

        let mut hasher = Sha256::new();
        hasher.update(kind.as_str());
        hasher.update(checkpoint.as_i64().to_le_bytes());
        hasher.update(market_id.as_str());
        if let Some(user) = user {
            hasher.update(user.as_str());
        }
        hasher.update(time_ms.as_ms().to_le_bytes());
        let hash = hasher.finalize();
        format!("hash:{}", hex::encode(&hash[..16]))
    }

    #[allow(clippy::too_many_arguments)]
    pub fn purchase(
        tx_hash: Option<String>,
        checkpoint: Cursor,
        time_ms: TimeMs,
        market_id: MarketId,
        user: Address,
        range_lower: i64,
        range_upper: i64,
        shares: i64,
        cost: i64,
        price_per_share: Option<Decimal>,
    ) -> Self {
        let event_key = Self::compute_event_key(
            tx_hash.as_deref(),
            EventKind::SharesPurchased,
            checkpoint,
            &market_id,
            Some(&user),
            time_ms,
        );
        LedgerEvent {
            event_key,
            tx_hash,
            kind: EventKind::SharesPurchased,
            checkpoint,
            time_ms,
            market_id,
            user: Some(user),
            range_lower: Some(range_lower),
            range_upper: Some(range_upper),
            shares_delta: Some(shares),
            cash_delta: Some(-cost),
            price_per_share,
            sell_mode: None,
            realized_pnl_delta: None,
            resolved_value: None,
        }
    }

    #[allow(clippy::too_many_arguments)]
    pub fn sale(
        tx_hash: Option<String>,
        checkpoint: Cursor,
        time_ms: TimeMs,
        market_id: MarketId,
        user: Address,
        range_lower: i64,
        range_upper: i64,
        shares: i64,
        proceeds: i64,
        price_per_share: Option<Decimal>,
        sell_mode: SellMode,
    ) -> Self {
        let event_key = Self::compute_event_key(
            tx_hash.as_deref(),
            EventKind::SharesSold,
            checkpoint,
            &market_id,
            Some(&user),
            time_ms,
        );
        LedgerEvent {
            event_key,
            tx_hash,
            kind: EventKind::SharesSold,
            checkpoint,
            time_ms,
            market_id,
            user: Some(user),
            range_lower: Some(range_lower),
            range_upper: Some(range_upper),
            shares_delta: Some(-shares),
            cash_delta: Some(proceeds),
            price_per_share,
            sell_mode: Some(sell_mode),
            realized_pnl_delta: None,
            resolved_value: None,
        }
    }

    #[allow(clippy::too_many_arguments)]
    pub fn claim(
        tx_hash: Option<String>,
        checkpoint: Cursor,
        time_ms: TimeMs,
        market_id: MarketId,
        user: Address,
        range_lower: i64,
        range_upper: i64,
        shares: i64,
        payout: i64,
    ) -> Self {
        let event_key = Self::compute_event_key(
            tx_hash.as_deref(),
            EventKind::RewardsClaimed,
            checkpoint,
            &market_id,
            Some(&user),
            time_ms,
        );
        LedgerEvent {
            event_key,
            tx_hash,
            kind: EventKind::RewardsClaimed,
            checkpoint,
            time_ms,
            market_id,
            user: Some(user),
            range_lower: Some(range_lower),
            range_upper: Some(range_upper),
            shares_delta: Some(-shares),
            cash_delta: Some(payout),
            price_per_share: None,
            sell_mode: None,
            realized_pnl_delta: None,
            resolved_value: None,
        }
    }

    pub fn market_created(
        tx_hash: Option<String>,
        checkpoint: Cursor,
        time_ms: TimeMs,
        market_id: MarketId,
    ) -> Self {
        let event_key = Self::compute_event_key(
            tx_hash.as_deref(),
            EventKind::MarketCreated,
            checkpoint,
            &market_id,
            None,
            time_ms,
        );
        LedgerEvent {
            event_key,
            tx_hash,
            kind: EventKind::MarketCreated,
            checkpoint,
            time_ms,
            market_id,
            user: None,
            range_lower: None,
            range_upper: None,
            shares_delta: None,
            cash_delta: None,
            price_per_share: None,
            sell_mode: None,
            realized_pnl_delta: None,
            resolved_value: None,
        }
    }

    pub fn market_resolved(
        tx_hash: Option<String>,
        checkpoint: Cursor,
        time_ms: TimeMs,
        market_id: MarketId,
        resolved_value: i64,
    ) -> Self {
        let event_key = Self::compute_event_key(
            tx_hash.as_deref(),
            EventKind::MarketResolved,
            checkpoint,
            &market_id,
            None,
            time_ms,
        );
        LedgerEvent {
            event_key,
            tx_hash,
            kind: EventKind::MarketResolved,
            checkpoint,
            time_ms,
            market_id,
            user: None,
            range_lower: None,
            range_upper: None,
            shares_delta: None,
            cash_delta: None,
            price_per_share: None,
            sell_mode: None,
            realized_pnl_delta: None,
            resolved_value: Some(resolved_value),
        }
    }

    /// Magnitude of the share movement (trade kinds).
    pub fn shares_abs(&self) -> i64 {
        self.shares_delta.map(|d| d.abs()).unwrap_or(0)
    }

    /// Magnitude of the cash movement (trade kinds).
    pub fn cash_abs(&self) -> i64 {
        self.cash_delta.map(|d| d.abs()).unwrap_or(0)
    }

    pub fn event_key(&self) -> &str {
        &self.event_key
    }
}
