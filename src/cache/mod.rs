//! Result cache for normalized batches
//!
//! Entries are keyed by (marketplace, store, dataset, query signature) and
//! expire after a ttl. Concurrent misses on one key share a single in-flight
//! producer, so a burst of identical requests costs one upstream fetch.
//!
//! A caller that gives up (its future is dropped, e.g. on a deadline)
//! leaves the fetch to the remaining waiters. When the last waiter goes, the
//! producer is dropped with it and the next caller starts a fresh one.
//!
//! A failed refresh never evicts the previous value. Whether that expired
//! value is served (flagged stale) or the error is returned is chosen per
//! call through [`StalePolicy`].

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::domain::MarketplaceId;
use crate::providers::MarketplaceResult;

// =================================================================
// Keys and policies
// =================================================================

/// What kind of records an entry holds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Dataset {
    Stock,
    SellerStock,
    Prices,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub marketplace: MarketplaceId,
    pub store_id: String,
    pub dataset: Dataset,
    pub signature: String,
}

impl CacheKey {
    pub fn new(marketplace: MarketplaceId, store_id: &str, dataset: Dataset, signature: String) -> Self {
        CacheKey {
            marketplace,
            store_id: store_id.to_string(),
            dataset,
            signature,
        }
    }
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}:{}:{:?}:{}",
            self.marketplace, self.store_id, self.dataset, self.signature
        )
    }
}

/// What to do when a refresh fails
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StalePolicy {
    /// Return the error
    #[default]
    Propagate,
    /// Return the expired value, flagged stale, if there is one
    ServeStale,
}

/// A cache answer
#[derive(Debug, Clone)]
pub struct Cached<V> {
    pub value: V,
    /// Expired entry served after a failed refresh
    pub stale: bool,
    /// Served without running the producer
    pub hit: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub entries: usize,
    pub fresh: usize,
    pub expired: usize,
    pub in_flight: usize,
}

// =================================================================
// Slots
// =================================================================

type SharedFetch<V> = Shared<BoxFuture<'static, MarketplaceResult<V>>>;

#[derive(Debug, Clone)]
struct CacheEntry<V> {
    value: V,
    stored_at: Instant,
    ttl: Duration,
}

impl<V> CacheEntry<V> {
    fn is_expired(&self, now: Instant) -> bool {
        now.duration_since(self.stored_at) >= self.ttl
    }
}

struct InFlight<V> {
    generation: u64,
    fetch: SharedFetch<V>,
    waiters: usize,
}

struct Slot<V> {
    entry: Option<CacheEntry<V>>,
    in_flight: Option<InFlight<V>>,
}

impl<V> Slot<V> {
    fn in_flight_mut(&mut self, generation: u64) -> Option<&mut InFlight<V>> {
        self.in_flight.as_mut().filter(|flight| flight.generation == generation)
    }
}

impl<V> Default for Slot<V> {
    fn default() -> Self {
        Slot {
            entry: None,
            in_flight: None,
        }
    }
}

/// Registration of one caller on an in-flight fetch.
///
/// Dropping it before the fetch settled removes the caller; the last one
/// out drops the producer.
struct Waiter<'a, V> {
    slots: &'a Mutex<HashMap<CacheKey, Slot<V>>>,
    key: &'a CacheKey,
    generation: u64,
}

impl<V> Drop for Waiter<'_, V> {
    fn drop(&mut self) {
        let mut slots = self.slots.lock();
        let Some(slot) = slots.get_mut(self.key) else {
            return;
        };
        let Some(flight) = slot.in_flight_mut(self.generation) else {
            return;
        };
        flight.waiters -= 1;
        if flight.waiters == 0 {
            debug!(key = %self.key, "Last waiter gone, abandoning fetch");
            slot.in_flight = None;
        }
    }
}

// =================================================================
// Cache
// =================================================================

/// In-memory ttl cache with single-flight refresh
pub struct RecordCache<V> {
    slots: Mutex<HashMap<CacheKey, Slot<V>>>,
    generation: AtomicU64,
}

impl<V> Default for RecordCache<V> {
    fn default() -> Self {
        RecordCache {
            slots: Mutex::new(HashMap::new()),
            generation: AtomicU64::new(0),
        }
    }
}

impl<V> RecordCache<V>
where
    V: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Return a fresh entry, or run `producer` (at most once per key at a
    /// time) and store its result.
    pub async fn get_or_fetch<F, Fut>(
        &self,
        key: &CacheKey,
        ttl: Duration,
        policy: StalePolicy,
        producer: F,
    ) -> MarketplaceResult<Cached<V>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = MarketplaceResult<V>> + Send + 'static,
    {
        let (generation, fetch) = {
            let mut slots = self.slots.lock();
            let slot = slots.entry(key.clone()).or_default();

            if let Some(entry) = slot.entry.as_ref().filter(|e| !e.is_expired(Instant::now())) {
                debug!(key = %key, "Cache hit");
                return Ok(Cached {
                    value: entry.value.clone(),
                    stale: false,
                    hit: true,
                });
            }

            match slot.in_flight.as_mut() {
                Some(flight) => {
                    debug!(key = %key, "Joining in-flight fetch");
                    flight.waiters += 1;
                    (flight.generation, flight.fetch.clone())
                }
                None => {
                    debug!(key = %key, "Cache miss");
                    let generation = self.generation.fetch_add(1, Ordering::Relaxed);
                    let fetch = producer().boxed().shared();
                    slot.in_flight = Some(InFlight {
                        generation,
                        fetch: fetch.clone(),
                        waiters: 1,
                    });
                    (generation, fetch)
                }
            }
        };

        // Declared before the lock below so it is released after it
        let _waiter = Waiter {
            slots: &self.slots,
            key,
            generation,
        };

        let result = fetch.await;

        let mut slots = self.slots.lock();
        let slot = slots.entry(key.clone()).or_default();

        // First waiter to finish settles the slot
        if slot.in_flight_mut(generation).is_some() {
            slot.in_flight = None;
            if let Ok(value) = &result {
                slot.entry = Some(CacheEntry {
                    value: value.clone(),
                    stored_at: Instant::now(),
                    ttl,
                });
            }
        }

        match result {
            Ok(value) => Ok(Cached {
                value,
                stale: false,
                hit: false,
            }),
            Err(error) => match (policy, slot.entry.as_ref()) {
                (StalePolicy::ServeStale, Some(entry)) => {
                    warn!(key = %key, error = %error, "Refresh failed, serving stale entry");
                    Ok(Cached {
                        value: entry.value.clone(),
                        stale: true,
                        hit: true,
                    })
                }
                _ => Err(error),
            },
        }
    }

    /// Drop one entry. Returns whether it existed.
    pub fn invalidate(&self, key: &CacheKey) -> bool {
        self.slots
            .lock()
            .get_mut(key)
            .and_then(|slot| slot.entry.take())
            .is_some()
    }

    /// Drop every entry of one store
    pub fn invalidate_store(&self, marketplace: MarketplaceId, store_id: &str) -> usize {
        let mut slots = self.slots.lock();
        slots
            .iter_mut()
            .filter(|(key, _)| key.marketplace == marketplace && key.store_id == store_id)
            .filter_map(|(_, slot)| slot.entry.take())
            .count()
    }

    pub fn clear(&self) {
        let mut slots = self.slots.lock();
        slots.retain(|_, slot| slot.in_flight.is_some());
        slots.values_mut().for_each(|slot| slot.entry = None);
    }

    /// Remove expired entries that have no fetch running. Returns how many.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut slots = self.slots.lock();
        let before = slots.len();
        slots.retain(|_, slot| {
            slot.in_flight.is_some() || slot.entry.as_ref().is_some_and(|e| !e.is_expired(now))
        });
        let purged = before - slots.len();
        if purged > 0 {
            debug!(purged, "Purged expired cache entries");
        }
        purged
    }

    pub fn stats(&self) -> CacheStats {
        let now = Instant::now();
        let slots = self.slots.lock();
        slots.values().fold(CacheStats::default(), |mut stats, slot| {
            if let Some(entry) = &slot.entry {
                stats.entries += 1;
                if entry.is_expired(now) {
                    stats.expired += 1;
                } else {
                    stats.fresh += 1;
                }
            }
            if slot.in_flight.is_some() {
                stats.in_flight += 1;
            }
            stats
        })
    }
}
