pub mod admin;
pub mod health;
pub mod markets;
pub mod positions;

use crate::db::Repository;
use crate::orchestration::RetryWorker;
use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

#[derive(Clone)]
pub struct AppState {
    pub repo: Arc<Repository>,
    pub retry_worker: Arc<RetryWorker>,
}

pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health::health))
        .route("/ready", get(health::ready))
        .route("/v1/positions", get(positions::get_positions))
        .route("/v1/markets/:market_id", get(markets::get_market))
        .route("/v1/reconcile", post(admin::post_reconcile))
        .route("/v1/settlements/retry", post(admin::post_retry_settlements))
        .route(
            "/v1/settlements/failed",
            get(admin::get_failed_settlements),
        )
        .layer(cors)
        .with_state(state)
}
