//! Request coalescing.
//!
//! Many search branches ask for the same leg at the same time (a destination
//! is usually reachable from several paths). The coalescer keeps one shared
//! in-flight future per key so the underlying work runs once and every caller
//! observes the same result.
//!
//! The work is spawned onto the runtime and owns its registration: when it
//! finishes, fails, panics or is dropped with the runtime, the registration is
//! removed, so a call issued afterwards always starts fresh work.

use std::{
    collections::HashMap,
    future::Future,
    hash::Hash,
    sync::{
        atomic::{AtomicU64, AtomicUsize, Ordering},
        Arc,
    },
};

use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;

type SharedResult<V> = Shared<BoxFuture<'static, V>>;

struct InFlight<V: Clone> {
    id: u64,
    result: SharedResult<V>,
}

type Registry<K, V> = Arc<Mutex<HashMap<K, InFlight<V>>>>;

// Removes the registration of exactly the work that created it
struct Registration<K: Eq + Hash, V: Clone> {
    registry: Registry<K, V>,
    key: K,
    id: u64,
}

impl<K: Eq + Hash, V: Clone> Drop for Registration<K, V> {
    fn drop(&mut self) {
        let mut registry = self.registry.lock();
        if registry.get(&self.key).is_some_and(|entry| entry.id == self.id) {
            registry.remove(&self.key);
        }
    }
}

/// Whether a caller started the work or joined work already in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoalesceRole {
    Leader,
    Follower,
}

#[derive(Debug, Default)]
pub struct CoalescerStats {
    pub started: AtomicUsize,
    pub coalesced: AtomicUsize,
}

pub struct RequestCoalescer<K, V: Clone> {
    in_flight: Registry<K, V>,
    next_id: AtomicU64,
    stats: CoalescerStats,
}

impl<K, V> Default for RequestCoalescer<K, V>
where
    K: Eq + Hash + Clone + Send + 'static,
    V: Clone + Default + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> RequestCoalescer<K, V>
where
    K: Eq + Hash + Clone + Send + 'static,
    V: Clone + Default + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self {
            in_flight: Arc::new(Mutex::new(HashMap::new())),
            next_id: AtomicU64::new(0),
            stats: CoalescerStats::default(),
        }
    }

    /// Returns the result of the in-flight work for `key`, starting it with
    /// `factory` when none exists. `factory` runs at most once per unit of
    /// work; a panicking or aborted unit resolves to `V::default()`.
    pub async fn get_or_create<F, Fut>(&self, key: K, factory: F) -> (V, CoalesceRole)
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = V> + Send + 'static,
    {
        let (result, role) = {
            let mut in_flight = self.in_flight.lock();
            match in_flight.get(&key) {
                Some(existing) => {
                    self.stats.coalesced.fetch_add(1, Ordering::Relaxed);
                    (existing.result.clone(), CoalesceRole::Follower)
                }
                None => {
                    let id = self.next_id.fetch_add(1, Ordering::Relaxed);
                    let registration = Registration {
                        registry: Arc::clone(&self.in_flight),
                        key: key.clone(),
                        id,
                    };
                    let work = factory();
                    let handle = tokio::spawn(async move {
                        let _registration = registration;
                        work.await
                    });
                    let result = handle
                        .map(|joined| joined.unwrap_or_default())
                        .boxed()
                        .shared();
                    in_flight.insert(
                        key,
                        InFlight {
                            id,
                            result: result.clone(),
                        },
                    );
                    self.stats.started.fetch_add(1, Ordering::Relaxed);
                    (result, CoalesceRole::Leader)
                }
            }
        };

        (result.await, role)
    }

    pub fn in_flight_count(&self) -> usize {
        self.in_flight.lock().len()
    }

    pub fn is_in_flight(&self, key: &K) -> bool {
        self.in_flight.lock().contains_key(key)
    }

    pub fn stats(&self) -> &CoalescerStats {
        &self.stats
    }
}
