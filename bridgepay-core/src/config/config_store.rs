//! Versioned shared value with change notification.
//!
//! Used for settings that may change while the server runs (the exchange
//! rate). Readers take a snapshot; writers bump the version and wake every
//! [`ConfigWatcher`].

use std::sync::Arc;
use tokio::sync::{RwLock, watch};

pub struct ConfigStore<T> {
    inner: Arc<Inner<T>>,
}

struct Inner<T> {
    data: RwLock<T>,
    version_tx: watch::Sender<u64>,
}

/// Waits for the next [`ConfigStore`] update.
pub struct ConfigWatcher {
    version_rx: watch::Receiver<u64>,
}

impl<T: Clone> ConfigStore<T> {
    pub fn new(initial: T) -> Self {
        let (version_tx, _) = watch::channel(0u64);
        Self {
            inner: Arc::new(Inner {
                data: RwLock::new(initial),
                version_tx,
            }),
        }
    }

    /// Replace the value and notify watchers. Returns the new version.
    pub async fn update(&self, value: T) -> u64 {
        let mut guard = self.inner.data.write().await;
        *guard = value;
        let mut version = 0;
        self.inner.version_tx.send_modify(|v| {
            *v += 1;
            version = *v;
        });
        version
    }

    /// Copy of the current value.
    pub async fn snapshot(&self) -> T {
        self.inner.data.read().await.clone()
    }

    pub fn version(&self) -> u64 {
        *self.inner.version_tx.borrow()
    }

    pub fn subscribe(&self) -> ConfigWatcher {
        ConfigWatcher {
            version_rx: self.inner.version_tx.subscribe(),
        }
    }
}

impl<T> Clone for ConfigStore<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl ConfigWatcher {
    /// Resolves with the new version, or `Err` once the store is gone.
    pub async fn changed(&mut self) -> Result<u64, watch::error::RecvError> {
        self.version_rx.changed().await?;
        Ok(*self.version_rx.borrow_and_update())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_update_bumps_version_and_wakes_watchers() {
        let store = ConfigStore::new(1u32);
        let mut watcher = store.subscribe();
        assert_eq!(store.version(), 0);

        let writer = store.clone();
        let handle = tokio::spawn(async move { watcher.changed().await });
        assert_eq!(writer.update(2).await, 1);

        assert_eq!(handle.await.unwrap().unwrap(), 1);
        assert_eq!(store.snapshot().await, 2);
    }
}
