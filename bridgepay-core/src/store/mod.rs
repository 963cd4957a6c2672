//! The order record store collaborator.
//!
//! Orders are owned by the storefront; this crate only reads them and writes
//! their payment fields through the reconciler.

pub mod memory;
pub mod postgres;

pub use memory::MemoryOrderStore;
pub use postgres::PgOrderStore;

use crate::entities::order_records::{OrderPatch, OrderRecord};
use async_trait::async_trait;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

/// Errors returned by an [`OrderStore`].
#[derive(Debug, Error)]
pub enum StoreError {
    /// Database error
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// The order to update does not exist
    #[error("order not found: {0}")]
    NotFound(Uuid),

    /// The store did not answer in time
    #[error("order store timed out after {0:?}")]
    Timeout(Duration),

    /// The store refused the operation
    #[error("order store unavailable: {0}")]
    Unavailable(String),
}

/// Document-style access to order records.
#[async_trait]
pub trait OrderStore: Send + Sync {
    /// Fetch an order by id.
    async fn get_order(&self, order_id: Uuid) -> Result<Option<OrderRecord>, StoreError>;

    /// Fetch an order by its order number.
    async fn find_order_by_number(
        &self,
        order_number: &str,
    ) -> Result<Option<OrderRecord>, StoreError>;

    /// Write the set fields of `patch`. Fails with [`StoreError::NotFound`]
    /// if the order does not exist.
    async fn update_order(&self, order_id: Uuid, patch: OrderPatch) -> Result<(), StoreError>;
}

/// Bound a store call by `limit`.
pub async fn with_timeout<T>(
    limit: Duration,
    call: impl Future<Output = Result<T, StoreError>>,
) -> Result<T, StoreError> {
    tokio::time::timeout(limit, call)
        .await
        .map_err(|_| StoreError::Timeout(limit))?
}
