use crate::entities::order_records::{
    GetOrderRecordById, GetOrderRecordByNumber, OrderPatch, OrderRecord, UpdateOrderRecord,
};
use crate::framework::DatabaseProcessor;
use crate::store::{OrderStore, StoreError};
use async_trait::async_trait;
use kanau::processor::Processor;
use sqlx::PgPool;
use uuid::Uuid;

/// [`OrderStore`] backed by the `orders` table.
#[derive(Debug, Clone)]
pub struct PgOrderStore {
    processor: DatabaseProcessor,
}

impl PgOrderStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            processor: DatabaseProcessor::new(pool),
        }
    }
}

#[async_trait]
impl OrderStore for PgOrderStore {
    async fn get_order(&self, order_id: Uuid) -> Result<Option<OrderRecord>, StoreError> {
        let record = self
            .processor
            .process(GetOrderRecordById { order_id })
            .await?;
        Ok(record)
    }

    async fn find_order_by_number(
        &self,
        order_number: &str,
    ) -> Result<Option<OrderRecord>, StoreError> {
        let record = self
            .processor
            .process(GetOrderRecordByNumber {
                order_number: order_number.to_owned(),
            })
            .await?;
        Ok(record)
    }

    async fn update_order(&self, order_id: Uuid, patch: OrderPatch) -> Result<(), StoreError> {
        if patch.is_empty() {
            return Ok(());
        }
        let updated = self
            .processor
            .process(UpdateOrderRecord { order_id, patch })
            .await?;
        if updated == 0 {
            return Err(StoreError::NotFound(order_id));
        }
        Ok(())
    }
}
