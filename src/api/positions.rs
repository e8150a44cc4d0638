use crate::api::AppState;
use crate::domain::{Address, MarketId, Position};
use crate::error::AppError;
use axum::extract::{Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PositionsQuery {
    pub user: Option<String>,
    pub market_id: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PositionsResponse {
    pub positions: Vec<PositionDto>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PositionDto {
    pub user: String,
    pub market_id: String,
    pub range_lower: i64,
    pub range_upper: i64,
    pub total_shares: i64,
    pub total_cost_basis: i64,
    pub avg_entry_price: String,
    pub realized_pnl: i64,
    pub total_shares_sold: i64,
    pub total_proceeds: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unrealized_pnl: Option<i64>,
    pub is_active: bool,
    pub close_reason: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first_purchase_ms: Option<i64>,
    pub last_updated_ms: i64,
}

impl From<Position> for PositionDto {
    fn from(pos: Position) -> Self {
        let avg_entry_price = pos.avg_entry_price().normalize().to_string();
        PositionDto {
            user: pos.user.as_str().to_string(),
            market_id: pos.market_id.as_str().to_string(),
            range_lower: pos.range_lower,
            range_upper: pos.range_upper,
            total_shares: pos.total_shares,
            total_cost_basis: pos.total_cost_basis,
            avg_entry_price,
            realized_pnl: pos.realized_pnl,
            total_shares_sold: pos.total_shares_sold,
            total_proceeds: pos.total_proceeds,
            unrealized_pnl: pos.unrealized_pnl,
            is_active: pos.is_active,
            close_reason: pos.close_reason.as_str().to_string(),
            first_purchase_ms: pos.first_purchase_ms.map(|t| t.as_ms()),
            last_updated_ms: pos.last_updated_ms.as_ms(),
        }
    }
}

pub async fn get_positions(
    Query(params): Query<PositionsQuery>,
    State(state): State<AppState>,
) -> Result<Json<PositionsResponse>, AppError> {
    if params.user.is_none() && params.market_id.is_none() {
        return Err(AppError::BadRequest(
            "At least one of user or marketId is required".into(),
        ));
    }

    let user = params.user.map(Address::new);
    let market_id = params.market_id.map(MarketId::new);

    let positions = state
        .repo
        .query_positions(user.as_ref(), market_id.as_ref())
        .await?;

    Ok(Json(PositionsResponse {
        positions: positions.into_iter().map(PositionDto::from).collect(),
    }))
}
