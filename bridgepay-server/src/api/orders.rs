use axum::{
    Json,
    extract::{Path, State},
};
use bridgepay_sdk::objects::OrderResponse;
use uuid::Uuid;

use super::ApiError;
use crate::state::AppState;

/// `GET /orders/{order_id}`: current payment state of an order.
pub(super) async fn get_order(
    State(state): State<AppState>,
    Path(order_id): Path<Uuid>,
) -> Result<Json<OrderResponse>, ApiError> {
    let order = state.service.order(order_id).await?;
    Ok(Json(OrderResponse::from(&order)))
}
