use axum::{
    Json,
    extract::{Path, State},
    response::Response,
};
use bridgepay_core::card::CardPresentment;
use bridgepay_sdk::objects::CardPaymentRequest;
use uuid::Uuid;

use super::{ApiError, settlement_response};
use crate::state::AppState;

/// `POST /orders/{order_id}/payment`: pay with a card.
///
/// The card maps to a pool account which transfers the order total, at the
/// current rate, to the platform account.
pub(super) async fn pay_order(
    State(state): State<AppState>,
    Path(order_id): Path<Uuid>,
    Json(body): Json<CardPaymentRequest>,
) -> Result<Response, ApiError> {
    let result = state
        .service
        .process_payment(order_id, CardPresentment::from(body))
        .await?;
    Ok(settlement_response(result))
}
