//! Event channel factory and the registry of unresolved orders.

use super::types::SettlementEvent;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use uuid::Uuid;

/// Default buffer size for event channels.
pub const DEFAULT_CHANNEL_BUFFER: usize = 256;

pub type SettlementEventSender = mpsc::Sender<SettlementEvent>;
pub type SettlementEventReceiver = mpsc::Receiver<SettlementEvent>;

pub fn settlement_event_channel() -> (SettlementEventSender, SettlementEventReceiver) {
    mpsc::channel(DEFAULT_CHANNEL_BUFFER)
}

/// Orders with a settlement the watcher has not resolved yet.
///
/// New attempts for these orders are refused until the watcher clears them.
#[derive(Debug, Clone, Default)]
pub struct InDoubtRegistry {
    inner: Arc<Mutex<HashSet<Uuid>>>,
}

impl InDoubtRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn set(&self) -> std::sync::MutexGuard<'_, HashSet<Uuid>> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn insert(&self, order_id: Uuid) -> bool {
        self.set().insert(order_id)
    }

    pub fn remove(&self, order_id: Uuid) -> bool {
        self.set().remove(&order_id)
    }

    pub fn contains(&self, order_id: Uuid) -> bool {
        self.set().contains(&order_id)
    }

    pub fn len(&self) -> usize {
        self.set().len()
    }

    pub fn is_empty(&self) -> bool {
        self.set().is_empty()
    }
}
