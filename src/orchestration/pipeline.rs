//! Resumable per-kind ingestion loops.
//!
//! One long-lived loop per event kind, each with its own persisted cursor.
//! Loops run concurrently but independently: a slow or erroring kind never
//! blocks the others. Cursors are persisted only after a batch is fully
//! handled, so a crash mid-batch re-delivers events; the event log's
//! uniqueness constraint absorbs the re-delivery.

use crate::config::Config;
use crate::datasource::{DecodedEvent, EventSource, SourceError};
use crate::db::Repository;
use crate::domain::{Cursor, EventKind, TimeMs};
use crate::engine::SettlementEngine;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum IngestError {
    #[error(transparent)]
    Source(#[from] SourceError),
    #[error(transparent)]
    Db(#[from] sqlx::Error),
}

pub struct Ingestor {
    source: Arc<dyn EventSource>,
    repo: Arc<Repository>,
    settlement: SettlementEngine,
    config: Config,
}

impl Ingestor {
    pub fn new(
        source: Arc<dyn EventSource>,
        repo: Arc<Repository>,
        settlement: SettlementEngine,
        config: Config,
    ) -> Self {
        Self {
            source,
            repo,
            settlement,
            config,
        }
    }

    /// Spawn one polling loop per event kind.
    pub fn spawn_all(self: &Arc<Self>) -> Vec<tokio::task::JoinHandle<()>> {
        EventKind::ALL
            .iter()
            .map(|kind| {
                let ingestor = Arc::clone(self);
                let kind = *kind;
                tokio::spawn(async move { ingestor.run_kind_loop(kind).await })
            })
            .collect()
    }

    /// Poll one kind forever. Transient failures back off by a fixed
    /// multiple of the poll interval and retry indefinitely; they never
    /// take the process down.
    pub async fn run_kind_loop(&self, kind: EventKind) {
        let poll_interval = Duration::from_millis(self.config.poll_interval_ms);
        let backoff_interval = poll_interval * self.config.error_backoff_multiplier;

        let mut cursor = loop {
            match self.resume_cursor(kind).await {
                Ok(cursor) => break cursor,
                Err(e) => {
                    warn!(kind = %kind, error = %e, "Failed to resume cursor, backing off");
                    tokio::time::sleep(backoff_interval).await;
                }
            }
        };

        info!(kind = %kind, cursor = cursor.as_i64(), "Ingestion loop started");

        loop {
            match self.poll_once(kind, cursor).await {
                Ok(next_cursor) => {
                    cursor = next_cursor;
                    tokio::time::sleep(poll_interval).await;
                }
                Err(e) => {
                    warn!(kind = %kind, error = %e, "Poll cycle failed, backing off");
                    tokio::time::sleep(backoff_interval).await;
                }
            }
        }
    }

    /// Cursor to start polling from: the persisted checkpoint if one
    /// exists, else the current tip of the stream (first start skips all
    /// history rather than reprocessing it).
    pub async fn resume_cursor(&self, kind: EventKind) -> Result<Cursor, IngestError> {
        if let Some(cursor) = self.repo.get_checkpoint(kind).await? {
            return Ok(cursor);
        }

        let tip = self.source.latest_cursor(kind).await?;
        self.repo.store_checkpoint(kind, tip, TimeMs::now()).await?;
        info!(
            kind = %kind,
            tip = tip.as_i64(),
            "No checkpoint found, fast-forwarded to stream tip"
        );
        Ok(tip)
    }

    /// Fetch and handle one batch. The checkpoint is written only after
    /// every event in the batch has been routed.
    pub async fn poll_once(&self, kind: EventKind, cursor: Cursor) -> Result<Cursor, IngestError> {
        let batch = self.source.poll(kind, cursor).await?;

        for decoded in &batch.events {
            self.handle_event(decoded).await?;
        }

        if !batch.events.is_empty() || batch.next_cursor != cursor {
            self.repo
                .store_checkpoint(kind, batch.next_cursor, TimeMs::now())
                .await?;
        }

        Ok(batch.next_cursor)
    }

    /// Route one event to its handler. Duplicate deliveries are absorbed
    /// by the event log's uniqueness constraint and skipped here.
    async fn handle_event(&self, decoded: &DecodedEvent) -> Result<(), IngestError> {
        let event = &decoded.event;
        match event.kind {
            EventKind::SharesPurchased | EventKind::SharesSold | EventKind::RewardsClaimed => {
                let ingest = self.repo.ingest_trade_event(event).await?;
                debug!(
                    event_key = %event.event_key,
                    kind = %event.kind,
                    inserted = ingest.inserted,
                    applied = ingest.applied,
                    pnl_delta = ingest.pnl_delta,
                    "Trade event handled"
                );
            }
            EventKind::MarketCreated => {
                if self.repo.insert_event(event).await? {
                    if let Some(market) = &decoded.market {
                        self.repo.upsert_market(market).await?;
                        info!(market = %market.market_id, "Market cached");
                    } else {
                        warn!(
                            event_key = %event.event_key,
                            "MarketCreated event without metadata"
                        );
                    }
                }
            }
            EventKind::MarketResolved => {
                if self.repo.insert_event(event).await? {
                    self.handle_market_resolved(event).await?;
                }
            }
        }
        Ok(())
    }

    async fn handle_market_resolved(
        &self,
        event: &crate::domain::LedgerEvent,
    ) -> Result<(), IngestError> {
        let Some(resolved_value) = event.resolved_value else {
            warn!(
                event_key = %event.event_key,
                "MarketResolved event without resolved value, skipping"
            );
            return Ok(());
        };

        if !self
            .repo
            .mark_market_resolved(&event.market_id, resolved_value)
            .await?
        {
            warn!(
                market = %event.market_id,
                "Resolved market was never cached"
            );
        }

        // Settlement runs detached: a bulk update over a large position
        // set must not stall the ingestion loop.
        let engine = self.settlement.clone();
        let market_id = event.market_id.clone();
        tokio::spawn(async move {
            engine.settle_or_enqueue(&market_id, resolved_value).await;
        });

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datasource::MockEventSource;
    use crate::db::migrations::init_db;
    use crate::domain::{Address, LedgerEvent, MarketId};
    use tempfile::TempDir;

    fn test_config() -> Config {
        Config {
            port: 0,
            database_path: ":memory:".to_string(),
            chain_api_url: "http://example.invalid".to_string(),
            registry_api_url: None,
            poll_interval_ms: 10,
            error_backoff_multiplier: 2,
            settlement_max_retries: 3,
            retry_interval_ms: 1000,
        }
    }

    async fn setup(source: MockEventSource) -> (Arc<Ingestor>, Arc<Repository>, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir
            .path()
            .join("test.db")
            .to_string_lossy()
            .to_string();
        let pool = init_db(&db_path).await.expect("init_db failed");
        let repo = Arc::new(Repository::new(pool));
        let settlement = SettlementEngine::new(repo.clone(), None);
        let ingestor = Arc::new(Ingestor::new(
            Arc::new(source),
            repo.clone(),
            settlement,
            test_config(),
        ));
        (ingestor, repo, temp_dir)
    }

    fn purchase(cp: i64, shares: i64, cost: i64) -> LedgerEvent {
        LedgerEvent::purchase(
            Some(format!("0xbuy{}", cp)),
            Cursor::new(cp),
            TimeMs::new(cp * 1000),
            MarketId::new("mkt-1".to_string()),
            Address::new("0xabc".to_string()),
            90_000,
            91_000,
            shares,
            cost,
            None,
        )
    }

    #[tokio::test]
    async fn test_first_start_fast_forwards_to_tip() {
        let source = MockEventSource::new()
            .with_event(purchase(1, 100, 50))
            .with_event(purchase(2, 10, 5));
        let (ingestor, repo, _temp) = setup(source).await;

        let cursor = ingestor
            .resume_cursor(EventKind::SharesPurchased)
            .await
            .unwrap();
        assert_eq!(cursor, Cursor::new(2), "history must be skipped");

        // The fast-forward cursor is persisted immediately.
        assert_eq!(
            repo.get_checkpoint(EventKind::SharesPurchased).await.unwrap(),
            Some(Cursor::new(2))
        );

        // Nothing behind the tip gets ingested.
        let next = ingestor
            .poll_once(EventKind::SharesPurchased, cursor)
            .await
            .unwrap();
        assert_eq!(next, Cursor::new(2));
        assert_eq!(repo.count_events().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_resume_uses_persisted_checkpoint() {
        let source = MockEventSource::new()
            .with_event(purchase(1, 100, 50))
            .with_event(purchase(2, 10, 5));
        let (ingestor, repo, _temp) = setup(source).await;

        repo.store_checkpoint(EventKind::SharesPurchased, Cursor::new(1), TimeMs::new(1))
            .await
            .unwrap();

        let cursor = ingestor
            .resume_cursor(EventKind::SharesPurchased)
            .await
            .unwrap();
        assert_eq!(cursor, Cursor::new(1), "must resume exactly, not fast-forward");

        // Only the event past the checkpoint is ingested.
        ingestor
            .poll_once(EventKind::SharesPurchased, cursor)
            .await
            .unwrap();
        assert_eq!(repo.count_events().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_poll_once_ingests_and_persists_checkpoint() {
        let source = MockEventSource::new()
            .with_event(purchase(1, 100, 50))
            .with_event(purchase(2, 10, 5));
        let (ingestor, repo, _temp) = setup(source).await;

        let next = ingestor
            .poll_once(EventKind::SharesPurchased, Cursor::new(0))
            .await
            .unwrap();
        assert_eq!(next, Cursor::new(2));
        assert_eq!(repo.count_events().await.unwrap(), 2);
        assert_eq!(
            repo.get_checkpoint(EventKind::SharesPurchased).await.unwrap(),
            Some(Cursor::new(2))
        );

        let pos = repo
            .get_position(
                &Address::new("0xabc".to_string()),
                &MarketId::new("mkt-1".to_string()),
                90_000,
                91_000,
            )
            .await
            .unwrap()
            .unwrap();
        assert_eq!(pos.total_shares, 110);
        assert_eq!(pos.total_cost_basis, 55);
    }

    #[tokio::test]
    async fn test_redelivered_batch_is_noop() {
        let source = MockEventSource::new().with_event(purchase(1, 100, 50));
        let (ingestor, repo, _temp) = setup(source).await;

        ingestor
            .poll_once(EventKind::SharesPurchased, Cursor::new(0))
            .await
            .unwrap();
        // Simulate a crash before the checkpoint write by re-polling from
        // the old cursor.
        ingestor
            .poll_once(EventKind::SharesPurchased, Cursor::new(0))
            .await
            .unwrap();

        let pos = repo
            .get_position(
                &Address::new("0xabc".to_string()),
                &MarketId::new("mkt-1".to_string()),
                90_000,
                91_000,
            )
            .await
            .unwrap()
            .unwrap();
        assert_eq!(pos.total_shares, 100, "duplicate delivery must not double-apply");
        assert_eq!(repo.count_events().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_market_resolved_triggers_settlement() {
        let source = MockEventSource::new().with_event(LedgerEvent::market_resolved(
            Some("0xres".to_string()),
            Cursor::new(1),
            TimeMs::new(1000),
            MarketId::new("mkt-1".to_string()),
            90_500,
        ));
        let (ingestor, repo, _temp) = setup(source).await;

        // Seed one active out-of-range position.
        let mut pos = crate::domain::Position::new(
            Address::new("0xabc".to_string()),
            MarketId::new("mkt-1".to_string()),
            92_000,
            93_000,
            TimeMs::new(500),
        );
        pos.total_shares = 10;
        pos.total_cost_basis = 8;
        pos.is_active = true;
        repo.upsert_position(&pos).await.unwrap();

        ingestor
            .poll_once(EventKind::MarketResolved, Cursor::new(0))
            .await
            .unwrap();

        // Settlement is fire-and-forget; wait for the detached task.
        let mut settled = false;
        for _ in 0..100 {
            tokio::time::sleep(Duration::from_millis(10)).await;
            let current = repo
                .get_position(&pos.user, &pos.market_id, 92_000, 93_000)
                .await
                .unwrap()
                .unwrap();
            if !current.is_active {
                settled = true;
                assert_eq!(current.unrealized_pnl, Some(-8));
                break;
            }
        }
        assert!(settled, "detached settlement never ran");
    }
}
