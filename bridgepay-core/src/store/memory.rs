use crate::entities::order_records::{OrderPatch, OrderRecord};
use crate::store::{OrderStore, StoreError};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tokio::sync::RwLock;
use uuid::Uuid;

/// In-memory [`OrderStore`].
///
/// Useful for tests and local runs. Writes can be made to fail on demand to
/// exercise the money-moved-but-not-recorded path.
#[derive(Debug, Default)]
pub struct MemoryOrderStore {
    orders: RwLock<HashMap<Uuid, OrderRecord>>,
    fail_updates: AtomicBool,
    updates: AtomicUsize,
}

impl MemoryOrderStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace an order.
    pub async fn insert(&self, record: OrderRecord) {
        self.orders.write().await.insert(record.order_id, record);
    }

    /// Make every following `update_order` fail (or succeed again).
    pub fn set_fail_updates(&self, fail: bool) {
        self.fail_updates.store(fail, Ordering::SeqCst);
    }

    /// Number of successful writes so far.
    pub fn update_count(&self) -> usize {
        self.updates.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl OrderStore for MemoryOrderStore {
    async fn get_order(&self, order_id: Uuid) -> Result<Option<OrderRecord>, StoreError> {
        Ok(self.orders.read().await.get(&order_id).cloned())
    }

    async fn find_order_by_number(
        &self,
        order_number: &str,
    ) -> Result<Option<OrderRecord>, StoreError> {
        Ok(self
            .orders
            .read()
            .await
            .values()
            .find(|o| o.order_number == order_number)
            .cloned())
    }

    async fn update_order(&self, order_id: Uuid, patch: OrderPatch) -> Result<(), StoreError> {
        if self.fail_updates.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("writes disabled".to_string()));
        }
        let mut orders = self.orders.write().await;
        let record = orders
            .get_mut(&order_id)
            .ok_or(StoreError::NotFound(order_id))?;
        record.apply(&patch);
        self.updates.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::PaymentStatus;
    use rust_decimal::Decimal;

    #[tokio::test]
    async fn test_lookup_and_update() {
        let store = MemoryOrderStore::new();
        let order = OrderRecord::new_pending("ORD7", Decimal::from(50_000));
        let id = order.order_id;
        store.insert(order).await;

        let found = store.find_order_by_number("ORD7").await.unwrap().unwrap();
        assert_eq!(found.order_id, id);
        assert!(store.find_order_by_number("ORD8").await.unwrap().is_none());

        store
            .update_order(
                id,
                OrderPatch {
                    payment_status: Some(PaymentStatus::Failed),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        let updated = store.get_order(id).await.unwrap().unwrap();
        assert_eq!(updated.payment_status, PaymentStatus::Failed);
        assert_eq!(store.update_count(), 1);
    }

    #[tokio::test]
    async fn test_update_missing_order() {
        let store = MemoryOrderStore::new();
        let missing = Uuid::now_v7();
        let err = store
            .update_order(missing, OrderPatch::default())
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound(id) if id == missing));
    }

    #[tokio::test]
    async fn test_failing_writes() {
        let store = MemoryOrderStore::new();
        let order = OrderRecord::new_pending("ORD9", Decimal::from(10));
        let id = order.order_id;
        store.insert(order).await;
        store.set_fail_updates(true);
        assert!(matches!(
            store.update_order(id, OrderPatch::default()).await,
            Err(StoreError::Unavailable(_))
        ));
    }
}
