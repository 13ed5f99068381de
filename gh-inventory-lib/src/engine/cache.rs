//! In-memory read-through cache shared by concurrently running reports.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tokio::sync::OnceCell;

const LOG_TARGET: &str = "     cache";

type Slot<V> = Arc<OnceCell<Arc<V>>>;

/// A keyed set of immutable listing snapshots.
///
/// Each key is written at most once per run: the first writer wins and the value is
/// never replaced, evicted or invalidated afterwards. Readers only ever see complete values.
pub struct SharedCache<V> {
    name: &'static str,
    slots: RwLock<HashMap<String, Slot<V>>>,
}

impl<V: Send + Sync> core::fmt::Debug for SharedCache<V> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("SharedCache")
            .field("name", &self.name)
            .field("len", &self.len())
            .finish()
    }
}

impl<V: Send + Sync> SharedCache<V> {
    #[must_use]
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            slots: RwLock::new(HashMap::new()),
        }
    }

    /// The value stored under `key`, if any.
    #[must_use]
    pub fn get_or_nil(&self, key: &str) -> Option<Arc<V>> {
        self.slots.read().expect("lock poisoned").get(key).and_then(|slot| slot.get().cloned())
    }

    /// Store `value` under `key` unless a value is already present or being fetched.
    ///
    /// Returns whether the value was stored.
    pub fn set(&self, key: &str, value: V) -> bool {
        let stored = self.slot(key).set(Arc::new(value)).is_ok();
        if !stored {
            log::trace!(target: LOG_TARGET, "{}: keeping existing value for '{key}'", self.name);
        }
        stored
    }

    /// Return the value under `key`, running `fetch` to populate it on a miss.
    ///
    /// Concurrent misses on the same key share a single in-flight fetch. A failed fetch
    /// leaves the key unset, so a later caller fetches again.
    pub async fn get_or_fetch<F, Fut, E>(&self, key: &str, fetch: F) -> Result<Arc<V>, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
    {
        let slot = self.slot(key);
        if let Some(value) = slot.get() {
            log::trace!(target: LOG_TARGET, "{}: hit for '{key}'", self.name);
            return Ok(Arc::clone(value));
        }

        log::debug!(target: LOG_TARGET, "{}: miss for '{key}'", self.name);
        slot.get_or_try_init(|| async move { fetch().await.map(Arc::new) })
            .await
            .map(Arc::clone)
    }

    /// Number of keys holding a value.
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots
            .read()
            .expect("lock poisoned")
            .values()
            .filter(|slot| slot.initialized())
            .count()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn slot(&self, key: &str) -> Slot<V> {
        if let Some(slot) = self.slots.read().expect("lock poisoned").get(key) {
            return Arc::clone(slot);
        }

        Arc::clone(self.slots.write().expect("lock poisoned").entry(key.to_string()).or_default())
    }
}
