//! One-shot, multi-waiter completion signal.

use std::sync::Arc;
use tokio::sync::watch;

/// A value that is set at most once and can be awaited by any number of
/// waiters, including ones that subscribe after it was set.
pub struct Signal<T> {
    tx: Arc<watch::Sender<Option<T>>>,
}

impl<T> Clone for Signal<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

impl<T: Clone> Default for Signal<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone> Signal<T> {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(None);
        Self { tx: Arc::new(tx) }
    }

    /// Set the value. Returns false if it was already set.
    pub fn fire(&self, value: T) -> bool {
        let mut value = Some(value);
        self.tx.send_if_modified(|slot| {
            if slot.is_some() {
                return false;
            }
            *slot = value.take();
            true
        })
    }

    pub fn is_fired(&self) -> bool {
        self.tx.borrow().is_some()
    }

    /// The value, if already set.
    pub fn get(&self) -> Option<T> {
        self.tx.borrow().clone()
    }

    /// Wait until the value is set.
    pub async fn wait(&self) -> T {
        let mut rx = self.tx.subscribe();
        loop {
            if let Some(value) = rx.borrow_and_update().clone() {
                return value;
            }
            if rx.changed().await.is_err() {
                // The sender lives in `self`, so this cannot happen while we wait.
                std::future::pending::<()>().await;
            }
        }
    }
}
