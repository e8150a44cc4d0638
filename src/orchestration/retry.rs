//! Bounded retry of failed settlements.
//!
//! The worker runs serially: one job at a time, oldest first, so failure
//! accounting stays simple and no job is retried twice concurrently.

use crate::db::{FailedSettlementJob, Repository};
use crate::domain::TimeMs;
use crate::engine::SettlementEngine;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Summary of one drain pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryReport {
    pub attempted: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Jobs at the retry bound, surfaced for manual intervention.
    pub exhausted: usize,
}

pub struct RetryWorker {
    repo: Arc<Repository>,
    settlement: SettlementEngine,
    max_retries: i64,
}

impl RetryWorker {
    pub fn new(repo: Arc<Repository>, settlement: SettlementEngine, max_retries: i64) -> Self {
        Self {
            repo,
            settlement,
            max_retries,
        }
    }

    /// Retry every queued job still under the bound, oldest first.
    pub async fn drain_once(&self) -> Result<RetryReport, sqlx::Error> {
        let jobs = self.repo.list_retryable_settlements(self.max_retries).await?;
        let mut report = RetryReport {
            attempted: jobs.len(),
            ..Default::default()
        };

        for job in jobs {
            match self
                .settlement
                .settle(&job.market_id, job.resolved_value)
                .await
            {
                Ok(_) => {
                    self.repo.delete_failed_settlement(&job.market_id).await?;
                    report.succeeded += 1;
                    info!(market = %job.market_id, "Settlement retry succeeded");
                }
                Err(e) => {
                    self.repo
                        .bump_failed_settlement(&job.market_id, &e.to_string(), TimeMs::now())
                        .await?;
                    report.failed += 1;
                    warn!(
                        market = %job.market_id,
                        retry_count = job.retry_count + 1,
                        error = %e,
                        "Settlement retry failed"
                    );
                }
            }
        }

        let exhausted = self.exhausted_jobs().await?;
        report.exhausted = exhausted.len();
        for job in &exhausted {
            warn!(
                market = %job.market_id,
                retry_count = job.retry_count,
                error = %job.error,
                "Settlement exhausted retries, manual intervention required"
            );
        }

        Ok(report)
    }

    /// Jobs past the bound, for the operator report.
    pub async fn exhausted_jobs(&self) -> Result<Vec<FailedSettlementJob>, sqlx::Error> {
        self.repo.list_exhausted_settlements(self.max_retries).await
    }

    /// Drain on a fixed interval forever.
    pub async fn run_loop(&self, interval: Duration) {
        loop {
            if let Err(e) = self.drain_once().await {
                warn!(error = %e, "Retry drain failed");
            }
            tokio::time::sleep(interval).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::migrations::init_db;
    use crate::domain::{Address, MarketId, Position};
    use tempfile::TempDir;

    async fn setup() -> (RetryWorker, Arc<Repository>, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir
            .path()
            .join("test.db")
            .to_string_lossy()
            .to_string();
        let pool = init_db(&db_path).await.expect("init_db failed");
        let repo = Arc::new(Repository::new(pool));
        let settlement = SettlementEngine::new(repo.clone(), None);
        (RetryWorker::new(repo.clone(), settlement, 3), repo, temp_dir)
    }

    #[tokio::test]
    async fn test_drain_empty_queue() {
        let (worker, _repo, _temp) = setup().await;
        let report = worker.drain_once().await.unwrap();
        assert_eq!(report, RetryReport::default());
    }

    #[tokio::test]
    async fn test_successful_retry_deletes_job() {
        let (worker, repo, _temp) = setup().await;
        let market = MarketId::new("mkt-1".to_string());

        let mut pos = Position::new(
            Address::new("0xabc".to_string()),
            market.clone(),
            92_000,
            93_000,
            TimeMs::new(500),
        );
        pos.total_shares = 10;
        pos.total_cost_basis = 8;
        pos.is_active = true;
        repo.upsert_position(&pos).await.unwrap();

        repo.record_failed_settlement(&market, 90_500, "timeout", TimeMs::new(1000))
            .await
            .unwrap();

        let report = worker.drain_once().await.unwrap();
        assert_eq!(report.attempted, 1);
        assert_eq!(report.succeeded, 1);
        assert_eq!(report.failed, 0);

        // Job gone, settlement applied.
        assert!(repo.list_retryable_settlements(3).await.unwrap().is_empty());
        let settled = repo
            .get_position(&pos.user, &market, 92_000, 93_000)
            .await
            .unwrap()
            .unwrap();
        assert!(!settled.is_active);
    }

    #[tokio::test]
    async fn test_exhausted_jobs_reported_not_retried() {
        let (worker, repo, _temp) = setup().await;
        let market = MarketId::new("mkt-1".to_string());

        repo.record_failed_settlement(&market, 90_500, "timeout", TimeMs::new(1000))
            .await
            .unwrap();
        for attempt in 0..3 {
            repo.bump_failed_settlement(&market, "down", TimeMs::new(2000 + attempt))
                .await
                .unwrap();
        }

        let report = worker.drain_once().await.unwrap();
        assert_eq!(report.attempted, 0);
        assert_eq!(report.exhausted, 1);

        let exhausted = worker.exhausted_jobs().await.unwrap();
        assert_eq!(exhausted.len(), 1);
        assert_eq!(exhausted[0].retry_count, 3);
    }
}
