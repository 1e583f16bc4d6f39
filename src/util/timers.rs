//! Timers owned by a session task.
//!
//! A fired timer does not touch session state itself: it posts its event back
//! onto the owning session's channel, where it is handled between client
//! messages. Dropping the set aborts every timer that has not fired yet.

use std::collections::HashMap;
use std::hash::Hash;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Keyed set of one-shot timers
pub struct TimerSet<K: Eq + Hash> {
    handles: HashMap<K, JoinHandle<()>>,
}

impl<K: Eq + Hash + Clone> TimerSet<K> {
    pub fn new() -> Self {
        Self {
            handles: HashMap::new(),
        }
    }

    /// Deliver `event` on `tx` after `delay`. Replaces a pending timer with the same key.
    pub fn schedule<T>(&mut self, key: K, delay: Duration, tx: mpsc::UnboundedSender<T>, event: T)
    where
        T: Send + 'static,
    {
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send(event);
        });

        if let Some(previous) = self.handles.insert(key, handle) {
            previous.abort();
        }
    }

    /// Abort a pending timer. Returns false if none was pending.
    pub fn cancel(&mut self, key: &K) -> bool {
        match self.handles.remove(key) {
            Some(handle) => {
                handle.abort();
                true
            }
            None => false,
        }
    }

    /// Forget a timer whose event has been received.
    pub fn complete(&mut self, key: &K) {
        self.handles.remove(key);
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }
}

impl<K: Eq + Hash + Clone> Default for TimerSet<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Eq + Hash> Drop for TimerSet<K> {
    fn drop(&mut self) {
        for (_, handle) in self.handles.drain() {
            handle.abort();
        }
    }
}
