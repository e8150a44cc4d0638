//! Event log operations: duplicate-tolerant inserts and replay queries.

use super::{positions, Repository};
use crate::domain::{Address, Cursor, EventKind, LedgerEvent, MarketId, SellMode, TimeMs};
use crate::engine::aggregator;
use rust_decimal::Decimal;
use sqlx::sqlite::{SqliteConnection, SqliteRow};
use sqlx::Row;
use std::str::FromStr;
use tracing::warn;

/// Result of routing one trade event through the log and the aggregator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TradeIngest {
    /// The event row was new (not a duplicate delivery).
    pub inserted: bool,
    /// A position was actually mutated. False for duplicates and for
    /// sales/claims with no prior position on record.
    pub applied: bool,
    pub pnl_delta: i64,
}

const EVENT_COLUMNS: &str = "event_key, tx_hash, kind, checkpoint, time_ms, market_id, user, \
     range_lower, range_upper, shares_delta, cash_delta, price_per_share, sell_mode, \
     realized_pnl_delta, resolved_value";

fn event_from_row(row: &SqliteRow) -> Option<LedgerEvent> {
    let kind_str: String = row.get("kind");
    let Some(kind) = EventKind::parse(&kind_str) else {
        warn!(kind = %kind_str, "Unknown event kind in log row, skipping");
        return None;
    };

    let price_per_share = row
        .get::<Option<String>, _>("price_per_share")
        .and_then(|s| match Decimal::from_str(&s) {
            Ok(d) => Some(d),
            Err(e) => {
                warn!(price = %s, error = %e, "Failed to parse price_per_share, dropping");
                None
            }
        });

    Some(LedgerEvent {
        event_key: row.get("event_key"),
        tx_hash: row.get("tx_hash"),
        kind,
        checkpoint: Cursor::new(row.get("checkpoint")),
        time_ms: TimeMs::new(row.get("time_ms")),
        market_id: MarketId::new(row.get("market_id")),
        user: row.get::<Option<String>, _>("user").map(Address::new),
        range_lower: row.get("range_lower"),
        range_upper: row.get("range_upper"),
        shares_delta: row.get("shares_delta"),
        cash_delta: row.get("cash_delta"),
        price_per_share,
        sell_mode: row
            .get::<Option<String>, _>("sell_mode")
            .and_then(|s| SellMode::decode(&s)),
        realized_pnl_delta: row.get("realized_pnl_delta"),
        resolved_value: row.get("resolved_value"),
    })
}

async fn insert_event_conn(
    conn: &mut SqliteConnection,
    event: &LedgerEvent,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        r#"
        INSERT INTO ledger_events
            (event_key, tx_hash, kind, checkpoint, time_ms, market_id, user,
             range_lower, range_upper, shares_delta, cash_delta, price_per_share,
             sell_mode, realized_pnl_delta, resolved_value)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(event_key) DO NOTHING
        "#,
    )
    .bind(event.event_key.as_str())
    .bind(event.tx_hash.as_deref())
    .bind(event.kind.as_str())
    .bind(event.checkpoint.as_i64())
    .bind(event.time_ms.as_ms())
    .bind(event.market_id.as_str())
    .bind(event.user.as_ref().map(|u| u.as_str()))
    .bind(event.range_lower)
    .bind(event.range_upper)
    .bind(event.shares_delta)
    .bind(event.cash_delta)
    .bind(event.price_per_share.map(|p| p.normalize().to_string()))
    .bind(event.sell_mode.map(|m| m.encode()))
    .bind(event.realized_pnl_delta)
    .bind(event.resolved_value)
    .execute(conn)
    .await?;

    Ok(result.rows_affected() > 0)
}

impl Repository {
    /// Insert an event into the log idempotently. Duplicate (tx, kind)
    /// deliveries are swallowed, not surfaced as errors.
    pub async fn insert_event(&self, event: &LedgerEvent) -> Result<bool, sqlx::Error> {
        let mut conn = self.pool().acquire().await?;
        insert_event_conn(&mut conn, event).await
    }

    /// Route one trade event: log it, and if the log row is new, fold it
    /// into the matching position in the same transaction, so a crash
    /// between the two writes cannot leave the event applied twice on
    /// re-delivery.
    pub async fn ingest_trade_event(
        &self,
        event: &LedgerEvent,
    ) -> Result<TradeIngest, sqlx::Error> {
        let mut tx = self.pool().begin().await?;

        if !insert_event_conn(&mut tx, event).await? {
            tx.commit().await?;
            return Ok(TradeIngest {
                inserted: false,
                applied: false,
                pnl_delta: 0,
            });
        }

        let existing = match (&event.user, event.range_lower, event.range_upper) {
            (Some(user), Some(lower), Some(upper)) => {
                positions::get_position_conn(&mut tx, user, &event.market_id, lower, upper).await?
            }
            _ => None,
        };

        let ingest = match aggregator::fold_trade(existing, event) {
            Some(outcome) => {
                positions::upsert_position_conn(&mut tx, &outcome.position).await?;
                TradeIngest {
                    inserted: true,
                    applied: true,
                    pnl_delta: outcome.pnl_delta,
                }
            }
            None => TradeIngest {
                inserted: true,
                applied: false,
                pnl_delta: 0,
            },
        };

        if ingest.applied
            && matches!(
                event.kind,
                EventKind::SharesSold | EventKind::RewardsClaimed
            )
        {
            sqlx::query("UPDATE ledger_events SET realized_pnl_delta = ? WHERE event_key = ?")
                .bind(ingest.pnl_delta)
                .bind(event.event_key.as_str())
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(ingest)
    }

    /// All trade events, optionally scoped to one market, in replay order:
    /// `(time_ms, checkpoint, event_key)`.
    pub async fn query_trade_events(
        &self,
        market_id: Option<&MarketId>,
    ) -> Result<Vec<LedgerEvent>, sqlx::Error> {
        let base = format!(
            "SELECT {} FROM ledger_events \
             WHERE kind IN ('shares_purchased', 'shares_sold', 'rewards_claimed')",
            EVENT_COLUMNS
        );
        let order = " ORDER BY time_ms ASC, checkpoint ASC, event_key ASC";

        let rows = match market_id {
            Some(market) => {
                sqlx::query(&format!("{} AND market_id = ?{}", base, order))
                    .bind(market.as_str())
                    .fetch_all(self.pool())
                    .await?
            }
            None => {
                sqlx::query(&format!("{}{}", base, order))
                    .fetch_all(self.pool())
                    .await?
            }
        };

        Ok(rows.iter().filter_map(event_from_row).collect())
    }

    /// Count of rows in the event log (all kinds).
    pub async fn count_events(&self) -> Result<i64, sqlx::Error> {
        let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM ledger_events")
            .fetch_one(self.pool())
            .await?;
        Ok(row.0)
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::setup_test_repo;
    use super::*;

    fn market() -> MarketId {
        MarketId::new("mkt-1".to_string())
    }

    fn user() -> Address {
        Address::new("0xabc".to_string())
    }

    fn purchase_event(cp: i64, shares: i64, cost: i64) -> LedgerEvent {
        LedgerEvent::purchase(
            Some(format!("0xbuy{}", cp)),
            Cursor::new(cp),
            TimeMs::new(cp * 1000),
            market(),
            user(),
            90_000,
            91_000,
            shares,
            cost,
            Some(Decimal::from_str("0.5").unwrap()),
        )
    }

    fn sale_event(cp: i64, shares: i64, proceeds: i64) -> LedgerEvent {
        LedgerEvent::sale(
            Some(format!("0xsell{}", cp)),
            Cursor::new(cp),
            TimeMs::new(cp * 1000),
            market(),
            user(),
            90_000,
            91_000,
            shares,
            proceeds,
            None,
            SellMode::Fifo,
        )
    }

    #[tokio::test]
    async fn test_insert_duplicate_event_ignored() {
        let (repo, _temp) = setup_test_repo().await;
        let event = purchase_event(1, 100, 50);

        assert!(repo.insert_event(&event).await.unwrap());
        assert!(!repo.insert_event(&event).await.unwrap());
        assert_eq!(repo.count_events().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_ingest_applies_exactly_once() {
        let (repo, _temp) = setup_test_repo().await;
        let event = purchase_event(1, 100, 50);

        let first = repo.ingest_trade_event(&event).await.unwrap();
        assert!(first.inserted);
        assert!(first.applied);

        // Re-delivery of the same (tx, kind) must be a no-op.
        let second = repo.ingest_trade_event(&event).await.unwrap();
        assert!(!second.inserted);
        assert!(!second.applied);

        let pos = repo
            .get_position(&user(), &market(), 90_000, 91_000)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(pos.total_shares, 100);
        assert_eq!(pos.total_cost_basis, 50);
    }

    #[tokio::test]
    async fn test_ingest_sale_computes_pnl_delta() {
        let (repo, _temp) = setup_test_repo().await;
        repo.ingest_trade_event(&purchase_event(1, 100, 50))
            .await
            .unwrap();

        let ingest = repo.ingest_trade_event(&sale_event(2, 40, 25)).await.unwrap();
        assert!(ingest.applied);
        assert_eq!(ingest.pnl_delta, 5);

        // The computed delta lands on the stored event row.
        let events = repo.query_trade_events(Some(&market())).await.unwrap();
        let sale = events
            .iter()
            .find(|e| e.kind == EventKind::SharesSold)
            .unwrap();
        assert_eq!(sale.realized_pnl_delta, Some(5));
    }

    #[tokio::test]
    async fn test_ingest_sale_without_position_logs_event_but_applies_nothing() {
        let (repo, _temp) = setup_test_repo().await;

        let ingest = repo.ingest_trade_event(&sale_event(1, 40, 25)).await.unwrap();
        assert!(ingest.inserted, "the event is still logged");
        assert!(!ingest.applied);
        assert_eq!(ingest.pnl_delta, 0);

        assert!(repo
            .get_position(&user(), &market(), 90_000, 91_000)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_query_trade_events_replay_order() {
        let (repo, _temp) = setup_test_repo().await;
        // Insert out of order; replay must come back time-ordered.
        repo.ingest_trade_event(&sale_event(5, 10, 6)).await.unwrap();
        repo.ingest_trade_event(&purchase_event(1, 100, 50))
            .await
            .unwrap();
        repo.ingest_trade_event(&purchase_event(3, 20, 10))
            .await
            .unwrap();

        let events = repo.query_trade_events(None).await.unwrap();
        let times: Vec<i64> = events.iter().map(|e| e.time_ms.as_ms()).collect();
        assert_eq!(times, vec![1000, 3000, 5000]);
    }

    #[tokio::test]
    async fn test_query_trade_events_excludes_market_kinds() {
        let (repo, _temp) = setup_test_repo().await;
        repo.ingest_trade_event(&purchase_event(1, 100, 50))
            .await
            .unwrap();
        repo.insert_event(&LedgerEvent::market_resolved(
            Some("0xres".to_string()),
            Cursor::new(2),
            TimeMs::new(2000),
            market(),
            90_500,
        ))
        .await
        .unwrap();

        assert_eq!(repo.count_events().await.unwrap(), 2);
        let trades = repo.query_trade_events(None).await.unwrap();
        assert_eq!(trades.len(), 1);
        assert_eq!(trades[0].kind, EventKind::SharesPurchased);
    }

    #[tokio::test]
    async fn test_event_row_roundtrip() {
        let (repo, _temp) = setup_test_repo().await;
        let mut event = sale_event(2, 40, 25);
        event.sell_mode = Some(SellMode::Targeted(3));
        repo.insert_event(&event).await.unwrap();

        let events = repo.query_trade_events(None).await.unwrap();
        assert_eq!(events.len(), 1);
        let loaded = &events[0];
        assert_eq!(loaded.event_key, event.event_key);
        assert_eq!(loaded.sell_mode, Some(SellMode::Targeted(3)));
        assert_eq!(loaded.shares_delta, Some(-40));
        assert_eq!(loaded.cash_delta, Some(25));
    }
}
