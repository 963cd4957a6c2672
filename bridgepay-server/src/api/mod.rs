//! HTTP API.
//!
//! # Endpoints
//!
//! - `POST /orders/{order_id}/payment`               – pay an order with a card
//! - `GET  /orders/{order_id}`                       – order payment status
//! - `POST /orders/by-number/{order_number}/refund`  – refund a paid order (admin)
//! - `POST /notifications/bank-transfer`             – signed bank-transfer notification

use axum::{
    Json, Router,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use bridgepay_core::service::PaymentError;
use bridgepay_core::settlement::SettlementResult;
use bridgepay_sdk::objects::SettlementResponse;
use serde::Serialize;

use crate::state::AppState;

pub mod extractors;
mod notification;
mod orders;
mod payment;
mod refund;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/orders/{order_id}", get(orders::get_order))
        .route("/orders/{order_id}/payment", post(payment::pay_order))
        .route(
            "/orders/by-number/{order_number}/refund",
            post(refund::refund_order),
        )
        .route(
            "/notifications/bank-transfer",
            post(notification::bank_transfer),
        )
}

/// Settlement outcome as an HTTP response.
///
/// A timed-out transfer answers `202 Accepted`: the money may still move and
/// the caller must not try again.
fn settlement_response(result: SettlementResult) -> Response {
    let status = if result.is_timed_out() {
        StatusCode::ACCEPTED
    } else {
        StatusCode::OK
    };
    (status, Json(SettlementResponse::from(result))).into_response()
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: &'static str,
    message: String,
}

/// Errors surfaced by the handlers.
#[derive(Debug)]
pub(crate) struct ApiError(PaymentError);

impl From<PaymentError> for ApiError {
    fn from(e: PaymentError) -> Self {
        Self(e)
    }
}

impl ApiError {
    fn status_and_code(&self) -> (StatusCode, &'static str) {
        match &self.0 {
            PaymentError::InvalidCardFormat(_) => {
                (StatusCode::UNPROCESSABLE_ENTITY, "invalid_card_format")
            }
            PaymentError::InvalidRequest(_) => (StatusCode::BAD_REQUEST, "invalid_request"),
            PaymentError::OrderNotFound(_) | PaymentError::OrderNumberNotFound(_) => {
                (StatusCode::NOT_FOUND, "order_not_found")
            }
            PaymentError::AlreadyPaid(_) => (StatusCode::CONFLICT, "already_paid"),
            PaymentError::NotPayable { .. } => (StatusCode::CONFLICT, "not_payable"),
            PaymentError::NotRefundable { .. } => (StatusCode::CONFLICT, "not_refundable"),
            PaymentError::NoCounterparty(_) => (StatusCode::CONFLICT, "no_counterparty"),
            PaymentError::SettlementInDoubt(_) => (StatusCode::CONFLICT, "settlement_in_progress"),
            PaymentError::Reconcile(_) => (StatusCode::CONFLICT, "order_state_conflict"),
            PaymentError::PersistenceError(_) => {
                (StatusCode::SERVICE_UNAVAILABLE, "persistence_error")
            }
            PaymentError::PartialSettlement { .. } => {
                (StatusCode::INTERNAL_SERVER_ERROR, "partial_settlement")
            }
            PaymentError::InvalidRate(_) | PaymentError::Interrupted => {
                (StatusCode::INTERNAL_SERVER_ERROR, "internal_error")
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();
        let message = match &self.0 {
            PaymentError::PartialSettlement { transaction_id, .. } => format!(
                "payment {transaction_id} went through but could not be recorded yet, do not pay again"
            ),
            PaymentError::SettlementInDoubt(_) => {
                "a payment for this order is still processing, check again later".to_string()
            }
            PaymentError::PersistenceError(_) | PaymentError::InvalidRate(_) | PaymentError::Interrupted => {
                "internal server error".to_string()
            }
            other => other.to_string(),
        };
        if status.is_server_error() {
            tracing::error!(error = %self.0, code, "API request failed");
        } else {
            tracing::debug!(error = %self.0, code, "API request refused");
        }
        (status, Json(ErrorBody { error: code, message })).into_response()
    }
}
