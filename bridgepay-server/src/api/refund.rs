use axum::{
    extract::{Path, State},
    response::Response,
};

use super::{ApiError, settlement_response};
use crate::api::extractors::AdminAuth;
use crate::state::AppState;

/// `POST /orders/by-number/{order_number}/refund`: refund a paid order to
/// the account that paid it.
pub(super) async fn refund_order(
    State(state): State<AppState>,
    _auth: AdminAuth,
    Path(order_number): Path<String>,
) -> Result<Response, ApiError> {
    tracing::info!(%order_number, "Refund requested");
    let result = state.service.issue_refund(&order_number).await?;
    Ok(settlement_response(result))
}
