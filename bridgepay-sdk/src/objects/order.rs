//! Order status types as exposed over the API.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Payment status of an order.
///
/// This is the API/DTO version without sqlx::Type.
/// For database operations, use the version in `bridgepay-core::entities`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    Pending,
    Paid,
    Failed,
    Refunded,
    Cancelled,
}

impl std::fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PaymentStatus::Pending => write!(f, "pending"),
            PaymentStatus::Paid => write!(f, "paid"),
            PaymentStatus::Failed => write!(f, "failed"),
            PaymentStatus::Refunded => write!(f, "refunded"),
            PaymentStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Fulfilment status of an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Pending,
    Confirmed,
    Preparing,
    Delivering,
    Delivered,
    Cancelled,
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OrderStatus::Pending => write!(f, "pending"),
            OrderStatus::Confirmed => write!(f, "confirmed"),
            OrderStatus::Preparing => write!(f, "preparing"),
            OrderStatus::Delivering => write!(f, "delivering"),
            OrderStatus::Delivered => write!(f, "delivered"),
            OrderStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Snapshot of the payment-relevant fields of an order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderResponse {
    pub order_id: Uuid,
    pub order_number: String,
    /// Order total in fiat (VND).
    pub total: rust_decimal::Decimal,
    pub payment_status: PaymentStatus,
    pub order_status: OrderStatus,
    pub transaction_id: Option<String>,
    pub refund_tx_hash: Option<String>,
    /// Unix timestamp of the confirmed payment, if any.
    pub paid_at: Option<i64>,
    /// Unix timestamp of the confirmed refund, if any.
    pub refunded_at: Option<i64>,
}
