//! Repository layer for database operations.
//!
//! All SQL lives here. Methods are organized across submodules by domain:
//! - `events.rs` - event log inserts (duplicate-tolerant) and replay queries
//! - `positions.rs` - position upserts, bulk settlement updates, market cache
//!
//! This file holds the shared struct plus checkpoint and failure-queue
//! operations.

mod events;
mod positions;

pub use events::TradeIngest;

use crate::domain::{Cursor, EventKind, MarketId, TimeMs};
use sqlx::sqlite::SqlitePool;
use sqlx::Row;

/// A settlement attempt that failed and awaits bounded retry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedSettlementJob {
    pub market_id: MarketId,
    pub resolved_value: i64,
    pub error: String,
    pub retry_count: i64,
    pub last_attempt_ms: TimeMs,
    pub created_ms: TimeMs,
}

/// Repository for database operations.
pub struct Repository {
    pool: SqlitePool,
}

impl Repository {
    /// Create a new repository with the given connection pool.
    pub fn new(pool: SqlitePool) -> Self {
        Repository { pool }
    }

    pub(crate) fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    // =========================================================================
    // Checkpoint operations
    // =========================================================================

    /// Get the persisted cursor for an event kind, if any.
    pub async fn get_checkpoint(&self, kind: EventKind) -> Result<Option<Cursor>, sqlx::Error> {
        let row = sqlx::query("SELECT cursor FROM checkpoints WHERE kind = ?")
            .bind(kind.as_str())
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(|r| Cursor::new(r.get("cursor"))))
    }

    /// Persist the cursor for an event kind. Called only after the batch it
    /// covers has been fully handled.
    pub async fn store_checkpoint(
        &self,
        kind: EventKind,
        cursor: Cursor,
        now: TimeMs,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO checkpoints (kind, cursor, updated_ms)
            VALUES (?, ?, ?)
            ON CONFLICT(kind) DO UPDATE SET
                cursor = excluded.cursor,
                updated_ms = excluded.updated_ms
            "#,
        )
        .bind(kind.as_str())
        .bind(cursor.as_i64())
        .bind(now.as_ms())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    // =========================================================================
    // Failure queue operations
    // =========================================================================

    /// Record a fresh settlement failure. A later failure for the same
    /// market refreshes the resolved value and error but keeps the retry
    /// accounting.
    pub async fn record_failed_settlement(
        &self,
        market_id: &MarketId,
        resolved_value: i64,
        error: &str,
        now: TimeMs,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO failed_settlements
                (market_id, resolved_value, error, retry_count, last_attempt_ms, created_ms)
            VALUES (?, ?, ?, 0, ?, ?)
            ON CONFLICT(market_id) DO UPDATE SET
                resolved_value = excluded.resolved_value,
                error = excluded.error,
                last_attempt_ms = excluded.last_attempt_ms
            "#,
        )
        .bind(market_id.as_str())
        .bind(resolved_value)
        .bind(error)
        .bind(now.as_ms())
        .bind(now.as_ms())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Increment the retry count after a failed retry attempt.
    pub async fn bump_failed_settlement(
        &self,
        market_id: &MarketId,
        error: &str,
        now: TimeMs,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            UPDATE failed_settlements
            SET retry_count = retry_count + 1, error = ?, last_attempt_ms = ?
            WHERE market_id = ?
            "#,
        )
        .bind(error)
        .bind(now.as_ms())
        .bind(market_id.as_str())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Delete a job after a successful retry.
    pub async fn delete_failed_settlement(
        &self,
        market_id: &MarketId,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("DELETE FROM failed_settlements WHERE market_id = ?")
            .bind(market_id.as_str())
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Jobs still within the retry bound, oldest first.
    pub async fn list_retryable_settlements(
        &self,
        max_retries: i64,
    ) -> Result<Vec<FailedSettlementJob>, sqlx::Error> {
        let rows = sqlx::query(
            r#"
            SELECT market_id, resolved_value, error, retry_count, last_attempt_ms, created_ms
            FROM failed_settlements
            WHERE retry_count < ?
            ORDER BY created_ms ASC, market_id ASC
            "#,
        )
        .bind(max_retries)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(job_from_row).collect())
    }

    /// Jobs at or past the retry bound: these need manual intervention and
    /// are reported, not retried.
    pub async fn list_exhausted_settlements(
        &self,
        max_retries: i64,
    ) -> Result<Vec<FailedSettlementJob>, sqlx::Error> {
        let rows = sqlx::query(
            r#"
            SELECT market_id, resolved_value, error, retry_count, last_attempt_ms, created_ms
            FROM failed_settlements
            WHERE retry_count >= ?
            ORDER BY created_ms ASC, market_id ASC
            "#,
        )
        .bind(max_retries)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(job_from_row).collect())
    }
}

fn job_from_row(row: &sqlx::sqlite::SqliteRow) -> FailedSettlementJob {
    FailedSettlementJob {
        market_id: MarketId::new(row.get("market_id")),
        resolved_value: row.get("resolved_value"),
        error: row.get("error"),
        retry_count: row.get("retry_count"),
        last_attempt_ms: TimeMs::new(row.get("last_attempt_ms")),
        created_ms: TimeMs::new(row.get("created_ms")),
    }
}
