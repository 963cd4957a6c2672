//! Per-order mutual exclusion.
//!
//! Holding an [`OrderGuard`] is required to settle an order. Entries are
//! removed once the last holder or waiter is gone, so the map only grows
//! with the number of orders being settled right now.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::OwnedMutexGuard;
use uuid::Uuid;

type LockMap = HashMap<Uuid, Arc<tokio::sync::Mutex<()>>>;

#[derive(Debug, Clone, Default)]
pub struct OrderLocks {
    inner: Arc<Mutex<LockMap>>,
}

/// Exclusive right to settle one order. Released on drop.
#[derive(Debug)]
pub struct OrderGuard {
    order_id: Uuid,
    locks: OrderLocks,
    _guard: OwnedMutexGuard<()>,
}

impl OrderLocks {
    pub fn new() -> Self {
        Self::default()
    }

    fn map(&self) -> std::sync::MutexGuard<'_, LockMap> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Wait for exclusive access to `order_id`.
    pub async fn lock(&self, order_id: Uuid) -> OrderGuard {
        let mutex = Arc::clone(self.map().entry(order_id).or_default());
        let guard = mutex.lock_owned().await;
        OrderGuard {
            order_id,
            locks: self.clone(),
            _guard: guard,
        }
    }

    /// Number of orders currently locked or waited on.
    pub fn active(&self) -> usize {
        self.map().len()
    }
}

impl OrderGuard {
    pub fn order_id(&self) -> Uuid {
        self.order_id
    }
}

impl Drop for OrderGuard {
    fn drop(&mut self) {
        let mut map = self.locks.map();
        // the map and this guard hold the only references: no waiters
        if map
            .get(&self.order_id)
            .is_some_and(|m| Arc::strong_count(m) <= 2)
        {
            map.remove(&self.order_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_same_order_is_serialized() {
        let locks = OrderLocks::new();
        let order_id = Uuid::now_v7();
        let inside = Arc::new(AtomicUsize::new(0));
        let max_inside = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let locks = locks.clone();
            let inside = inside.clone();
            let max_inside = max_inside.clone();
            handles.push(tokio::spawn(async move {
                let _guard = locks.lock(order_id).await;
                let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                max_inside.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(2)).await;
                inside.fetch_sub(1, Ordering::SeqCst);
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(max_inside.load(Ordering::SeqCst), 1);
        assert_eq!(locks.active(), 0);
    }

    #[tokio::test]
    async fn test_different_orders_do_not_block() {
        let locks = OrderLocks::new();
        let _a = locks.lock(Uuid::now_v7()).await;
        let b = tokio::time::timeout(Duration::from_millis(100), locks.lock(Uuid::now_v7())).await;
        assert!(b.is_ok());
        assert_eq!(locks.active(), 2);
        drop(b);
        assert_eq!(locks.active(), 1);
    }
}
