//! Process-wide, lazily constructed client handle
//!
//! Construction is single-flight: concurrent callers wait on the same guard
//! and only the first one runs the initializer. A failed initialization leaves
//! the cache empty so the next caller retries. The handle is never dropped on
//! its own; callers call [`ClientCache::invalidate_if`] when the backend
//! rejects the credentials it was built with.

use std::future::Future;

use tokio::sync::Mutex;
use tracing::{debug, info};

/// Lazily initialized, explicitly invalidated client handle
pub struct ClientCache<T> {
    name: &'static str,
    slot: Mutex<Option<T>>,
}

impl<T: Clone> ClientCache<T> {
    /// Create an empty cache. `name` is only used for logging.
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            slot: Mutex::new(None),
        }
    }

    /// Return the cached client, constructing it with `init` if the cache is empty
    ///
    /// The guard is held across `init`, which is the only lock in Shardline
    /// held across I/O.
    pub async fn get_or_try_init<F, Fut, E>(&self, init: F) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let mut slot = self.slot.lock().await;
        if let Some(client) = slot.as_ref() {
            return Ok(client.clone());
        }

        debug!(cache = self.name, "constructing client");
        let client = init().await?;
        *slot = Some(client.clone());
        info!(cache = self.name, "client constructed");
        Ok(client)
    }

    /// Drop the cached client if `stale` matches it, so the next caller
    /// constructs a fresh one
    ///
    /// A client that replaced the stale one in the meantime is kept.
    pub async fn invalidate_if<F>(&self, stale: F) -> bool
    where
        F: FnOnce(&T) -> bool,
    {
        let mut slot = self.slot.lock().await;
        if !slot.as_ref().is_some_and(stale) {
            return false;
        }
        slot.take();
        info!(cache = self.name, "client invalidated");
        true
    }
}
