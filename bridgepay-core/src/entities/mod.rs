pub mod order_records;

use bridgepay_sdk::objects::{OrderStatus as SdkOrderStatus, PaymentStatus as SdkPaymentStatus};

/// Payment status for database operations.
///
/// This is the sqlx::Type version. For API/DTO use, see `bridgepay_sdk::objects::PaymentStatus`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, sqlx::Type)]
#[sqlx(rename_all = "lowercase", type_name = "payment_status")]
pub enum PaymentStatus {
    Pending,
    Paid,
    Failed,
    Refunded,
    Cancelled,
}

impl PaymentStatus {
    /// Whether a new payment attempt may be started from this status.
    pub fn accepts_payment(self) -> bool {
        matches!(self, PaymentStatus::Pending | PaymentStatus::Failed)
    }
}

impl std::fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", SdkPaymentStatus::from(*self))
    }
}

impl From<PaymentStatus> for SdkPaymentStatus {
    fn from(value: PaymentStatus) -> Self {
        match value {
            PaymentStatus::Pending => SdkPaymentStatus::Pending,
            PaymentStatus::Paid => SdkPaymentStatus::Paid,
            PaymentStatus::Failed => SdkPaymentStatus::Failed,
            PaymentStatus::Refunded => SdkPaymentStatus::Refunded,
            PaymentStatus::Cancelled => SdkPaymentStatus::Cancelled,
        }
    }
}

impl From<SdkPaymentStatus> for PaymentStatus {
    fn from(value: SdkPaymentStatus) -> Self {
        match value {
            SdkPaymentStatus::Pending => PaymentStatus::Pending,
            SdkPaymentStatus::Paid => PaymentStatus::Paid,
            SdkPaymentStatus::Failed => PaymentStatus::Failed,
            SdkPaymentStatus::Refunded => PaymentStatus::Refunded,
            SdkPaymentStatus::Cancelled => PaymentStatus::Cancelled,
        }
    }
}

/// Order fulfilment status for database operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, sqlx::Type)]
#[sqlx(rename_all = "lowercase", type_name = "order_status")]
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
        write!(f, "{}", SdkOrderStatus::from(*self))
    }
}

impl From<OrderStatus> for SdkOrderStatus {
    fn from(value: OrderStatus) -> Self {
        match value {
            OrderStatus::Pending => SdkOrderStatus::Pending,
            OrderStatus::Confirmed => SdkOrderStatus::Confirmed,
            OrderStatus::Preparing => SdkOrderStatus::Preparing,
            OrderStatus::Delivering => SdkOrderStatus::Delivering,
            OrderStatus::Delivered => SdkOrderStatus::Delivered,
            OrderStatus::Cancelled => SdkOrderStatus::Cancelled,
        }
    }
}

impl From<SdkOrderStatus> for OrderStatus {
    fn from(value: SdkOrderStatus) -> Self {
        match value {
            SdkOrderStatus::Pending => OrderStatus::Pending,
            SdkOrderStatus::Confirmed => OrderStatus::Confirmed,
            SdkOrderStatus::Preparing => OrderStatus::Preparing,
            SdkOrderStatus::Delivering => OrderStatus::Delivering,
            SdkOrderStatus::Delivered => OrderStatus::Delivered,
            SdkOrderStatus::Cancelled => OrderStatus::Cancelled,
        }
    }
}
