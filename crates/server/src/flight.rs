//! Single-flight coordination.
//!
//! Collapses concurrent duplicate operations on the same key into one
//! execution. The first caller starts the work; everyone who arrives
//! while it runs subscribes to the same completion channel. When the
//! work finishes, the slot clears and a later call runs it again.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;

/// Per-key at-most-once-in-flight executor.
pub struct Flight<T: Clone + Send + 'static> {
    inflight: Arc<Mutex<HashMap<String, broadcast::Sender<T>>>>,
}

impl<T: Clone + Send + 'static> Default for Flight<T> {
    fn default() -> Self {
        Self {
            inflight: Arc::new(Mutex::new(HashMap::new())),
        }
    }
}

impl<T: Clone + Send + 'static> Flight<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `work` for `key` unless a run is already in flight, and
    /// return a channel that delivers the single completion value to
    /// every waiter.
    ///
    /// The value is sent and the slot cleared under the same lock that
    /// guards subscription, so a receiver handed out here never misses
    /// the delivery.
    pub fn do_chan<F>(&self, key: &str, work: F) -> broadcast::Receiver<T>
    where
        F: Future<Output = T> + Send + 'static,
    {
        let mut inflight = self.inflight.lock().unwrap();
        if let Some(tx) = inflight.get(key) {
            return tx.subscribe();
        }

        let (tx, rx) = broadcast::channel(1);
        inflight.insert(key.to_string(), tx.clone());

        let slots = self.inflight.clone();
        let key = key.to_string();
        tokio::spawn(async move {
            let value = work.await;
            let mut slots = slots.lock().unwrap();
            let _ = tx.send(value);
            slots.remove(&key);
        });

        rx
    }

    /// Whether a run is currently in flight for `key`.
    pub fn contains(&self, key: &str) -> bool {
        self.inflight.lock().unwrap().contains_key(key)
    }
}
