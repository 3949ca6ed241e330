// observer.rs: Synchronous publish/subscribe plumbing between components.
//
// A `Channel<T>` is a cheap cloneable handle to one shared subscriber list.
// `publish` snapshots the list and releases the lock before calling anything,
// so a handler may subscribe, unsubscribe or publish again without
// deadlocking.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

/// Handle returned by [`Channel::subscribe`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Handler<T> = Arc<dyn Fn(&T) + Send + Sync>;

struct Subscribers<T> {
    next_id: AtomicU64,
    handlers: Mutex<Vec<(SubscriptionId, Handler<T>)>>,
}

pub struct Channel<T> {
    inner: Arc<Subscribers<T>>,
}

impl<T> Channel<T> {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Subscribers {
                next_id: AtomicU64::new(1),
                handlers: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn subscribe<F>(&self, handler: F) -> SubscriptionId
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
        match self.inner.handlers.lock() {
            Ok(mut handlers) => handlers.push((id, Arc::new(handler))),
            Err(_) => log::error!("subscriber list poisoned; handler {:?} dropped", id),
        }
        id
    }

    /// Returns whether `id` was subscribed.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let Ok(mut handlers) = self.inner.handlers.lock() else {
            return false;
        };
        let before = handlers.len();
        handlers.retain(|(sid, _)| *sid != id);
        handlers.len() != before
    }

    /// Delivers `value` to every subscriber, in registration order, on the
    /// calling thread.
    pub fn publish(&self, value: &T) {
        let snapshot: Vec<Handler<T>> = match self.inner.handlers.lock() {
            Ok(handlers) => handlers.iter().map(|(_, h)| Arc::clone(h)).collect(),
            Err(_) => {
                log::error!("subscriber list poisoned; publish skipped");
                return;
            }
        };
        for handler in snapshot {
            handler(value);
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.handlers.lock().map(|h| h.len()).unwrap_or(0)
    }
}

impl<T> Clone for Channel<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> Default for Channel<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Start/stop lifecycle shared by the runtime components. Both calls are
/// idempotent.
pub trait Emitter {
    fn start(&mut self) -> std::io::Result<()>;

    fn stop(&mut self);

    fn is_running(&self) -> bool;
}
