// src/exec/broadcast.rs

//! Fan-out of process output lines to interested observers.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};

use tokio::sync::mpsc;
use tracing::trace;

pub type SubscriberId = u64;

/// Registry of subscribers for one output stream of a task.
///
/// Every mutation and every publish holds the same lock, so a subscriber
/// that is registered for the whole duration of a `publish` call receives
/// that line. Queues are unbounded: a slow subscriber never causes a line to
/// be dropped, it only grows its own queue.
pub struct OutputBroadcaster {
    next_id: AtomicU64,
    subscribers: Mutex<HashMap<SubscriberId, mpsc::UnboundedSender<String>>>,
}

impl Default for OutputBroadcaster {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for OutputBroadcaster {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OutputBroadcaster")
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}

impl OutputBroadcaster {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            subscribers: Mutex::new(HashMap::new()),
        }
    }

    /// Allocate an id for use with [`register`](Self::register).
    pub fn next_subscriber_id(&self) -> SubscriberId {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Register `queue` under `id`. Registering an id again replaces the
    /// previous queue.
    pub fn register(&self, id: SubscriberId, queue: mpsc::UnboundedSender<String>) {
        self.lock().insert(id, queue);
        trace!(subscriber = id, "output subscriber registered");
    }

    /// Remove the subscriber `id`. Unknown ids are ignored.
    pub fn unregister(&self, id: SubscriberId) {
        if self.lock().remove(&id).is_some() {
            trace!(subscriber = id, "output subscriber unregistered");
        }
    }

    /// Register a fresh queue and return a handle that unregisters itself
    /// when dropped.
    pub fn subscribe(&self) -> Subscription<'_> {
        let id = self.next_subscriber_id();
        let (tx, rx) = mpsc::unbounded_channel();
        self.register(id, tx);
        Subscription {
            id,
            rx,
            broadcaster: self,
        }
    }

    /// Deliver `line` to every registered subscriber and return how many
    /// received it.
    ///
    /// Subscribers whose receiving side is gone are pruned.
    pub fn publish(&self, line: &str) -> usize {
        let mut subscribers = self.lock();
        let mut delivered = 0;

        subscribers.retain(|_, queue| {
            if queue.send(line.to_string()).is_ok() {
                delivered += 1;
                true
            } else {
                false
            }
        });

        delivered
    }

    pub fn subscriber_count(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<SubscriberId, mpsc::UnboundedSender<String>>> {
        // A poisoned map is still a consistent map; every critical section is
        // a single insert/remove/retain.
        self.subscribers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// A registered subscriber queue.
///
/// Dropping the subscription unregisters it, so an observer that is
/// cancelled mid-wait never leaves a dangling queue behind.
pub struct Subscription<'a> {
    id: SubscriberId,
    rx: mpsc::UnboundedReceiver<String>,
    broadcaster: &'a OutputBroadcaster,
}

impl Subscription<'_> {
    pub fn id(&self) -> SubscriberId {
        self.id
    }

    /// Wait for the next line.
    ///
    /// Returns `None` once the subscription has been removed from the
    /// broadcaster and every queued line has been consumed.
    pub async fn recv(&mut self) -> Option<String> {
        self.rx.recv().await
    }

    /// Take the next queued line without waiting.
    pub fn try_recv(&mut self) -> Option<String> {
        self.rx.try_recv().ok()
    }
}

impl Drop for Subscription<'_> {
    fn drop(&mut self) {
        self.broadcaster.unregister(self.id);
    }
}
