use axum::{Json, extract::State};
use bridgepay_sdk::objects::{BankTransferNotification, NotificationAck};

use super::ApiError;
use crate::api::extractors::SignedBody;
use crate::state::AppState;

/// `POST /notifications/bank-transfer`: a bank transfer arrived.
///
/// Unmatched or insufficient transfers are acknowledged with
/// `accepted: false`. Store failures and orders whose card settlement is
/// still unresolved answer with an error status, so the provider redelivers.
pub(super) async fn bank_transfer(
    State(state): State<AppState>,
    SignedBody(notification): SignedBody<BankTransferNotification>,
) -> Result<Json<NotificationAck>, ApiError> {
    tracing::info!(
        provider_tx_id = %notification.provider_tx_id,
        amount = %notification.amount,
        "Bank transfer notification"
    );
    let ack = state
        .service
        .reconcile_from_notification(notification)
        .await?;
    Ok(Json(ack))
}
