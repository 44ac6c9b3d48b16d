//! Bounded-lifetime cache with an injected clock.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, Utc};

use placelink_common::Clock;

/// A TTL cache whose notion of "now" comes from the caller's [`Clock`], so
/// expiry is deterministic under test. Entries never outlive the TTL; reads
/// past expiry behave exactly like misses.
pub struct TtlCache<K, V> {
    entries: Mutex<HashMap<K, (DateTime<Utc>, V)>>,
    ttl: Duration,
    clock: Arc<dyn Clock>,
}

impl<K: Eq + Hash, V: Clone> TtlCache<K, V> {
    pub fn new(ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            ttl,
            clock,
        }
    }

    pub fn get(&self, key: &K) -> Option<V> {
        let now = self.clock.now();
        let mut entries = self.entries.lock().unwrap();
        match entries.get(key) {
            Some((expires, value)) if *expires > now => Some(value.clone()),
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        }
    }

    pub fn insert(&self, key: K, value: V) {
        let expires = self.clock.now() + self.ttl;
        self.entries.lock().unwrap().insert(key, (expires, value));
    }

    pub fn contains(&self, key: &K) -> bool {
        self.get(key).is_some()
    }

    /// Drop every expired entry. Callers with long-lived caches run this
    /// between passes to keep the map bounded.
    pub fn purge_expired(&self) {
        let now = self.clock.now();
        self.entries
            .lock()
            .unwrap()
            .retain(|_, (expires, _)| *expires > now);
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
