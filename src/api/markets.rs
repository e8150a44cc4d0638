use crate::api::AppState;
use crate::domain::{MarketId, MarketRecord};
use crate::error::AppError;
use axum::extract::{Path, State};
use axum::Json;
use serde::Serialize;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MarketDto {
    pub market_id: String,
    pub name: String,
    pub category: String,
    pub min_value: i64,
    pub max_value: i64,
    pub range_width: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolution_time_ms: Option<i64>,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolved_value: Option<i64>,
}

impl From<MarketRecord> for MarketDto {
    fn from(market: MarketRecord) -> Self {
        MarketDto {
            market_id: market.market_id.as_str().to_string(),
            name: market.name,
            category: market.category,
            min_value: market.min_value,
            max_value: market.max_value,
            range_width: market.range_width,
            resolution_time_ms: market.resolution_time_ms.map(|t| t.as_ms()),
            status: market.status.as_str().to_string(),
            resolved_value: market.resolved_value,
        }
    }
}

pub async fn get_market(
    Path(market_id): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<MarketDto>, AppError> {
    let market_id = MarketId::new(market_id);
    let market = state
        .repo
        .get_market(&market_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Market {} not found", market_id)))?;

    Ok(Json(MarketDto::from(market)))
}
