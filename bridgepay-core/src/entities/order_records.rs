use crate::entities::{OrderStatus, PaymentStatus};
use crate::framework::DatabaseProcessor;
use bridgepay_sdk::objects::OrderResponse;
use kanau::processor::Processor;
use rust_decimal::Decimal;
use time::OffsetDateTime;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct OrderRecord {
    pub order_id: Uuid,
    pub order_number: String,
    /// Order total in fiat (VND).
    pub total: Decimal,
    pub payment_status: PaymentStatus,
    pub order_status: OrderStatus,
    pub transaction_id: Option<String>,
    pub refund_tx_hash: Option<String>,
    /// Ledger account that paid, used as the refund destination.
    pub payer_address: Option<String>,
    pub paid_at: Option<OffsetDateTime>,
    pub refunded_at: Option<OffsetDateTime>,
    pub created_at: OffsetDateTime,
}

impl OrderRecord {
    /// A fresh unpaid order.
    pub fn new_pending(order_number: impl Into<String>, total: Decimal) -> Self {
        Self {
            order_id: Uuid::now_v7(),
            order_number: order_number.into(),
            total,
            payment_status: PaymentStatus::Pending,
            order_status: OrderStatus::Pending,
            transaction_id: None,
            refund_tx_hash: None,
            payer_address: None,
            paid_at: None,
            refunded_at: None,
            created_at: OffsetDateTime::now_utc(),
        }
    }

    /// Apply a patch in memory, the same way the store applies it.
    pub fn apply(&mut self, patch: &OrderPatch) {
        if let Some(status) = patch.payment_status {
            self.payment_status = status;
        }
        if let Some(status) = patch.order_status {
            self.order_status = status;
        }
        if let Some(tx) = &patch.transaction_id {
            self.transaction_id = Some(tx.clone());
        }
        if let Some(tx) = &patch.refund_tx_hash {
            self.refund_tx_hash = Some(tx.clone());
        }
        if let Some(address) = &patch.payer_address {
            self.payer_address = Some(address.clone());
        }
        if let Some(at) = patch.paid_at {
            self.paid_at = Some(at);
        }
        if let Some(at) = patch.refunded_at {
            self.refunded_at = Some(at);
        }
    }
}

impl From<&OrderRecord> for OrderResponse {
    fn from(record: &OrderRecord) -> Self {
        OrderResponse {
            order_id: record.order_id,
            order_number: record.order_number.clone(),
            total: record.total,
            payment_status: record.payment_status.into(),
            order_status: record.order_status.into(),
            transaction_id: record.transaction_id.clone(),
            refund_tx_hash: record.refund_tx_hash.clone(),
            paid_at: record.paid_at.map(|t| t.unix_timestamp()),
            refunded_at: record.refunded_at.map(|t| t.unix_timestamp()),
        }
    }
}

/// Partial update of the payment fields of an order.
///
/// `None` leaves the stored value untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OrderPatch {
    pub payment_status: Option<PaymentStatus>,
    pub order_status: Option<OrderStatus>,
    pub transaction_id: Option<String>,
    pub refund_tx_hash: Option<String>,
    pub payer_address: Option<String>,
    pub paid_at: Option<OffsetDateTime>,
    pub refunded_at: Option<OffsetDateTime>,
}

impl OrderPatch {
    pub fn is_empty(&self) -> bool {
        self == &OrderPatch::default()
    }
}

#[derive(Debug, Clone)]
/// Get an order by its id.
pub struct GetOrderRecordById {
    pub order_id: Uuid,
}

impl Processor<GetOrderRecordById> for DatabaseProcessor {
    type Output = Option<OrderRecord>;
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:GetOrderRecordById")]
    async fn process(&self, query: GetOrderRecordById) -> Result<Option<OrderRecord>, sqlx::Error> {
        sqlx::query_as::<_, OrderRecord>(
            r#"
            SELECT order_id, order_number, total, payment_status, order_status,
                   transaction_id, refund_tx_hash, payer_address,
                   paid_at, refunded_at, created_at
            FROM orders
            WHERE order_id = $1
            "#,
        )
        .bind(query.order_id)
        .fetch_optional(&self.pool)
        .await
    }
}

#[derive(Debug, Clone)]
/// Get an order by its human-facing order number.
pub struct GetOrderRecordByNumber {
    pub order_number: String,
}

impl Processor<GetOrderRecordByNumber> for DatabaseProcessor {
    type Output = Option<OrderRecord>;
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:GetOrderRecordByNumber")]
    async fn process(
        &self,
        query: GetOrderRecordByNumber,
    ) -> Result<Option<OrderRecord>, sqlx::Error> {
        sqlx::query_as::<_, OrderRecord>(
            r#"
            SELECT order_id, order_number, total, payment_status, order_status,
                   transaction_id, refund_tx_hash, payer_address,
                   paid_at, refunded_at, created_at
            FROM orders
            WHERE order_number = $1
            "#,
        )
        .bind(query.order_number)
        .fetch_optional(&self.pool)
        .await
    }
}

#[derive(Debug, Clone)]
/// Write the non-empty fields of a patch.
///
/// Returns the number of rows updated (0 when the order does not exist).
pub struct UpdateOrderRecord {
    pub order_id: Uuid,
    pub patch: OrderPatch,
}

impl Processor<UpdateOrderRecord> for DatabaseProcessor {
    type Output = u64;
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:UpdateOrderRecord")]
    async fn process(&self, update: UpdateOrderRecord) -> Result<u64, sqlx::Error> {
        let UpdateOrderRecord { order_id, patch } = update;
        let result = sqlx::query(
            r#"
            UPDATE orders
            SET payment_status = COALESCE($2, payment_status),
                order_status   = COALESCE($3, order_status),
                transaction_id = COALESCE($4, transaction_id),
                refund_tx_hash = COALESCE($5, refund_tx_hash),
                payer_address  = COALESCE($6, payer_address),
                paid_at        = COALESCE($7, paid_at),
                refunded_at    = COALESCE($8, refunded_at)
            WHERE order_id = $1
            "#,
        )
        .bind(order_id)
        .bind(patch.payment_status)
        .bind(patch.order_status)
        .bind(patch.transaction_id)
        .bind(patch.refund_tx_hash)
        .bind(patch.payer_address)
        .bind(patch.paid_at)
        .bind(patch.refunded_at)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_apply_patch_only_touches_set_fields() {
        let mut order = OrderRecord::new_pending("ORD1", Decimal::from(250_000));
        let before = order.clone();
        order.apply(&OrderPatch {
            payment_status: Some(PaymentStatus::Failed),
            ..Default::default()
        });
        assert_eq!(order.payment_status, PaymentStatus::Failed);
        assert_eq!(order.order_status, before.order_status);
        assert_eq!(order.transaction_id, None);
        assert!(OrderPatch::default().is_empty());
    }
}
