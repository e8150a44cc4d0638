//! Operator entry points: reconcile and failure-queue management.

use crate::api::AppState;
use crate::domain::MarketId;
use crate::engine::{reconcile, ReconcileReport};
use crate::error::AppError;
use crate::orchestration::RetryReport;
use axum::extract::State;
use axum::Json;
use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconcileRequest {
    pub market_id: String,
    pub resolved_value: i64,
}

/// Recompute a market's final positions directly from the raw event log
/// and diff them against the live aggregate. Blocks until the diff is
/// complete.
pub async fn post_reconcile(
    State(state): State<AppState>,
    Json(request): Json<ReconcileRequest>,
) -> Result<Json<ReconcileReport>, AppError> {
    let market_id = MarketId::new(request.market_id);
    let report = reconcile(&state.repo, &market_id, request.resolved_value).await?;
    Ok(Json(report))
}

/// Drain the settlement failure queue now.
pub async fn post_retry_settlements(
    State(state): State<AppState>,
) -> Result<Json<RetryReport>, AppError> {
    let report = state.retry_worker.drain_once().await?;
    Ok(Json(report))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FailedSettlementDto {
    pub market_id: String,
    pub resolved_value: i64,
    pub error: String,
    pub retry_count: i64,
    pub last_attempt_ms: i64,
    pub created_ms: i64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FailedSettlementsResponse {
    pub jobs: Vec<FailedSettlementDto>,
}

/// Report jobs that exhausted their retries and need manual intervention.
pub async fn get_failed_settlements(
    State(state): State<AppState>,
) -> Result<Json<FailedSettlementsResponse>, AppError> {
    let jobs = state
        .retry_worker
        .exhausted_jobs()
        .await?
        .into_iter()
        .map(|job| FailedSettlementDto {
            market_id: job.market_id.as_str().to_string(),
            resolved_value: job.resolved_value,
            error: job.error,
            retry_count: job.retry_count,
            last_attempt_ms: job.last_attempt_ms.as_ms(),
            created_ms: job.created_ms.as_ms(),
        })
        .collect();

    Ok(Json(FailedSettlementsResponse { jobs }))
}
