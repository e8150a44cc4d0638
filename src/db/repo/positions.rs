//! Position store and market cache operations.

use super::Repository;
use crate::domain::{
    Address, CloseReason, MarketId, MarketRecord, MarketStatus, Position, TimeMs,
};
use sqlx::sqlite::{SqliteConnection, SqliteRow};
use sqlx::Row;
use tracing::warn;

pub(super) fn position_from_row(row: &SqliteRow) -> Position {
    let close_reason_str: String = row.get("close_reason");
    let close_reason = CloseReason::parse(&close_reason_str).unwrap_or_else(|| {
        warn!(
            close_reason = %close_reason_str,
            "Unknown close_reason in position row, defaulting to none"
        );
        CloseReason::None
    });

    Position {
        user: Address::new(row.get("user")),
        market_id: MarketId::new(row.get("market_id")),
        range_lower: row.get("range_lower"),
        range_upper: row.get("range_upper"),
        total_shares: row.get("total_shares"),
        total_cost_basis: row.get("total_cost_basis"),
        realized_pnl: row.get("realized_pnl"),
        total_shares_sold: row.get("total_shares_sold"),
        total_proceeds: row.get("total_proceeds"),
        unrealized_pnl: row.get("unrealized_pnl"),
        is_active: row.get::<i64, _>("is_active") != 0,
        close_reason,
        first_purchase_ms: row.get::<Option<i64>, _>("first_purchase_ms").map(TimeMs::new),
        last_updated_ms: TimeMs::new(row.get("last_updated_ms")),
        last_event_key: row.get("last_event_key"),
    }
}

const POSITION_COLUMNS: &str = "user, market_id, range_lower, range_upper, total_shares, \
     total_cost_basis, realized_pnl, total_shares_sold, total_proceeds, unrealized_pnl, \
     is_active, close_reason, first_purchase_ms, last_updated_ms, last_event_key";

pub(super) async fn get_position_conn(
    conn: &mut SqliteConnection,
    user: &Address,
    market_id: &MarketId,
    range_lower: i64,
    range_upper: i64,
) -> Result<Option<Position>, sqlx::Error> {
    let row = sqlx::query(&format!(
        "SELECT {} FROM positions \
         WHERE user = ? AND market_id = ? AND range_lower = ? AND range_upper = ?",
        POSITION_COLUMNS
    ))
    .bind(user.as_str())
    .bind(market_id.as_str())
    .bind(range_lower)
    .bind(range_upper)
    .fetch_optional(conn)
    .await?;

    Ok(row.as_ref().map(position_from_row))
}

pub(super) async fn upsert_position_conn(
    conn: &mut SqliteConnection,
    position: &Position,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO positions
            (user, market_id, range_lower, range_upper, total_shares, total_cost_basis,
             realized_pnl, total_shares_sold, total_proceeds, unrealized_pnl, is_active,
             close_reason, first_purchase_ms, last_updated_ms, last_event_key)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(user, market_id, range_lower, range_upper) DO UPDATE SET
            total_shares = excluded.total_shares,
            total_cost_basis = excluded.total_cost_basis,
            realized_pnl = excluded.realized_pnl,
            total_shares_sold = excluded.total_shares_sold,
            total_proceeds = excluded.total_proceeds,
            unrealized_pnl = excluded.unrealized_pnl,
            is_active = excluded.is_active,
            close_reason = excluded.close_reason,
            first_purchase_ms = excluded.first_purchase_ms,
            last_updated_ms = excluded.last_updated_ms,
            last_event_key = excluded.last_event_key
        "#,
    )
    .bind(position.user.as_str())
    .bind(position.market_id.as_str())
    .bind(position.range_lower)
    .bind(position.range_upper)
    .bind(position.total_shares)
    .bind(position.total_cost_basis)
    .bind(position.realized_pnl)
    .bind(position.total_shares_sold)
    .bind(position.total_proceeds)
    .bind(position.unrealized_pnl)
    .bind(position.is_active as i64)
    .bind(position.close_reason.as_str())
    .bind(position.first_purchase_ms.map(|t| t.as_ms()))
    .bind(position.last_updated_ms.as_ms())
    .bind(position.last_event_key.as_deref())
    .execute(conn)
    .await?;

    Ok(())
}

impl Repository {
    /// Fetch one position by its full key.
    pub async fn get_position(
        &self,
        user: &Address,
        market_id: &MarketId,
        range_lower: i64,
        range_upper: i64,
    ) -> Result<Option<Position>, sqlx::Error> {
        let mut conn = self.pool().acquire().await?;
        get_position_conn(&mut conn, user, market_id, range_lower, range_upper).await
    }

    /// Insert or replace a position aggregate.
    pub async fn upsert_position(&self, position: &Position) -> Result<(), sqlx::Error> {
        let mut conn = self.pool().acquire().await?;
        upsert_position_conn(&mut conn, position).await
    }

    /// Query positions, optionally filtered by user and/or market.
    pub async fn query_positions(
        &self,
        user: Option<&Address>,
        market_id: Option<&MarketId>,
    ) -> Result<Vec<Position>, sqlx::Error> {
        let order = "ORDER BY market_id ASC, user ASC, range_lower ASC";
        let rows = match (user, market_id) {
            (Some(user), Some(market)) => {
                sqlx::query(&format!(
                    "SELECT {} FROM positions WHERE user = ? AND market_id = ? {}",
                    POSITION_COLUMNS, order
                ))
                .bind(user.as_str())
                .bind(market.as_str())
                .fetch_all(self.pool())
                .await?
            }
            (Some(user), None) => {
                sqlx::query(&format!(
                    "SELECT {} FROM positions WHERE user = ? {}",
                    POSITION_COLUMNS, order
                ))
                .bind(user.as_str())
                .fetch_all(self.pool())
                .await?
            }
            (None, Some(market)) => {
                sqlx::query(&format!(
                    "SELECT {} FROM positions WHERE market_id = ? {}",
                    POSITION_COLUMNS, order
                ))
                .bind(market.as_str())
                .fetch_all(self.pool())
                .await?
            }
            (None, None) => {
                sqlx::query(&format!("SELECT {} FROM positions {}", POSITION_COLUMNS, order))
                    .fetch_all(self.pool())
                    .await?
            }
        };

        Ok(rows.iter().map(position_from_row).collect())
    }

    // =========================================================================
    // Bulk settlement updates
    // =========================================================================

    /// Close every active out-of-range position of a resolved market in one
    /// statement. Shares and basis stay untouched to preserve the size of
    /// the loss; the `is_active` filter makes re-runs no-ops.
    pub async fn settle_losing_positions(
        &self,
        market_id: &MarketId,
        resolved_value: i64,
        now: TimeMs,
    ) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            r#"
            UPDATE positions
            SET is_active = 0,
                close_reason = 'lost_resolution',
                unrealized_pnl = -total_cost_basis,
                last_updated_ms = ?
            WHERE market_id = ? AND is_active = 1
              AND (? < range_lower OR ? > range_upper)
            "#,
        )
        .bind(now.as_ms())
        .bind(market_id.as_str())
        .bind(resolved_value)
        .bind(resolved_value)
        .execute(self.pool())
        .await?;

        Ok(result.rows_affected())
    }

    /// Mark every active in-range position of a resolved market as a
    /// provisional winner in one statement. One winning share pays exactly
    /// one smallest unit, so the payout equals the share count and no
    /// scaling applies. Winners stay active until claimed.
    pub async fn settle_winning_positions(
        &self,
        market_id: &MarketId,
        resolved_value: i64,
        now: TimeMs,
    ) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            r#"
            UPDATE positions
            SET unrealized_pnl = total_shares - total_cost_basis,
                last_updated_ms = ?
            WHERE market_id = ? AND is_active = 1
              AND range_lower <= ? AND ? <= range_upper
            "#,
        )
        .bind(now.as_ms())
        .bind(market_id.as_str())
        .bind(resolved_value)
        .bind(resolved_value)
        .execute(self.pool())
        .await?;

        Ok(result.rows_affected())
    }

    // =========================================================================
    // Market cache operations
    // =========================================================================

    /// Insert or refresh a market cache row.
    pub async fn upsert_market(&self, market: &MarketRecord) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO markets
                (market_id, name, category, min_value, max_value, range_width,
                 resolution_time_ms, status, resolved_value)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(market_id) DO UPDATE SET
                name = excluded.name,
                category = excluded.category,
                min_value = excluded.min_value,
                max_value = excluded.max_value,
                range_width = excluded.range_width,
                resolution_time_ms = excluded.resolution_time_ms,
                status = excluded.status,
                resolved_value = excluded.resolved_value
            "#,
        )
        .bind(market.market_id.as_str())
        .bind(&market.name)
        .bind(&market.category)
        .bind(market.min_value)
        .bind(market.max_value)
        .bind(market.range_width)
        .bind(market.resolution_time_ms.map(|t| t.as_ms()))
        .bind(market.status.as_str())
        .bind(market.resolved_value)
        .execute(self.pool())
        .await?;

        Ok(())
    }

    /// Flip a market to resolved with its final value. Returns false when
    /// the market was never cached (e.g. created before this service
    /// started watching the stream).
    pub async fn mark_market_resolved(
        &self,
        market_id: &MarketId,
        resolved_value: i64,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE markets SET status = 'resolved', resolved_value = ? WHERE market_id = ?",
        )
        .bind(resolved_value)
        .bind(market_id.as_str())
        .execute(self.pool())
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Fetch one market cache row.
    pub async fn get_market(
        &self,
        market_id: &MarketId,
    ) -> Result<Option<MarketRecord>, sqlx::Error> {
        let row = sqlx::query(
            r#"
            SELECT market_id, name, category, min_value, max_value, range_width,
                   resolution_time_ms, status, resolved_value
            FROM markets
            WHERE market_id = ?
            "#,
        )
        .bind(market_id.as_str())
        .fetch_optional(self.pool())
        .await?;

        Ok(row.map(|r| {
            let status_str: String = r.get("status");
            let status = MarketStatus::parse(&status_str).unwrap_or_else(|| {
                warn!(status = %status_str, "Unknown market status, defaulting to active");
                MarketStatus::Active
            });
            MarketRecord {
                market_id: MarketId::new(r.get("market_id")),
                name: r.get("name"),
                category: r.get("category"),
                min_value: r.get("min_value"),
                max_value: r.get("max_value"),
                range_width: r.get("range_width"),
                resolution_time_ms: r.get::<Option<i64>, _>("resolution_time_ms").map(TimeMs::new),
                status,
                resolved_value: r.get("resolved_value"),
            }
        }))
    }
}
