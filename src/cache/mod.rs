use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::hash::Hash;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use parking_lot::{Mutex, MutexGuard};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::errors::Result;

/// A value together with the instant it was computed.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Stamped<V> {
    pub value: V,
    pub stamped_at: DateTime<Utc>,
}

#[derive(Serialize, Deserialize)]
struct SnapshotEntry<K, V> {
    key: K,
    value: V,
    stamped_at: DateTime<Utc>,
}

/// Memoization of one costly call, keyed by its argument tuple, with TTL.
///
/// A `CachedResult` on its own is not synchronized: every instance lives
/// inside a [`Vault`] whose single mutex covers all caches of one adapter.
/// Because the computation runs while that lock is held, concurrent `get`s
/// for the same key invoke the underlying function at most once and the
/// vault can always deliver a consistent cross-entry snapshot.
pub struct CachedResult<K, V> {
    ttl: TimeDelta,
    entries: HashMap<K, Stamped<V>>,
}

impl<K: Eq + Hash, V> CachedResult<K, V> {
    pub fn new(ttl: Duration) -> Self {
        CachedResult {
            ttl: TimeDelta::from_std(ttl).unwrap_or(TimeDelta::MAX),
            entries: HashMap::new(),
        }
    }

    fn is_fresh(&self, stamped_at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        now.signed_duration_since(stamped_at) < self.ttl
    }

    /// Returns the stored value when fresh, otherwise computes, stores and
    /// returns it.
    pub fn get_with(&mut self, key: K, compute: impl FnOnce() -> Result<V>) -> Result<&V> {
        let now = Utc::now();
        let ttl = self.ttl;
        match self.entries.entry(key) {
            Entry::Occupied(mut occupied) => {
                if now.signed_duration_since(occupied.get().stamped_at) >= ttl {
                    occupied.insert(Stamped {
                        value: compute()?,
                        stamped_at: now,
                    });
                }
                Ok(&occupied.into_mut().value)
            }
            Entry::Vacant(vacant) => {
                let stamped = Stamped {
                    value: compute()?,
                    stamped_at: now,
                };
                Ok(&vacant.insert(stamped).value)
            }
        }
    }

    /// Peeks at the stored value without triggering recomputation.
    pub fn retrieve(&self, key: &K) -> Option<(&V, DateTime<Utc>)> {
        self.entries
            .get(key)
            .map(|stamped| (&stamped.value, stamped.stamped_at))
    }

    /// Stores a value computed by other means, stamped now.
    pub fn insert(&mut self, key: K, value: V) {
        self.entries.insert(
            key,
            Stamped {
                value,
                stamped_at: Utc::now(),
            },
        );
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

impl<K: Eq + Hash + Serialize, V: Serialize> CachedResult<K, V> {
    /// Serializes every entry with its timestamp.
    pub fn dump(&self) -> serde_json::Value {
        let entries: Vec<SnapshotEntry<&K, &V>> = self
            .entries
            .iter()
            .map(|(key, stamped)| SnapshotEntry {
                key,
                value: &stamped.value,
                stamped_at: stamped.stamped_at,
            })
            .collect();
        serde_json::to_value(entries).unwrap_or(serde_json::Value::Null)
    }
}

impl<K: Eq + Hash + DeserializeOwned, V: DeserializeOwned> CachedResult<K, V> {
    /// Restores entries from a previous [`Self::dump`]. A malformed
    /// snapshot is discarded, not an error: the cache will simply refill.
    pub fn load(&mut self, snapshot: &serde_json::Value) {
        match serde_json::from_value::<Vec<SnapshotEntry<K, V>>>(snapshot.clone()) {
            Ok(entries) => {
                for entry in entries {
                    self.entries.insert(
                        entry.key,
                        Stamped {
                            value: entry.value,
                            stamped_at: entry.stamped_at,
                        },
                    );
                }
            }
            Err(err) => warn!("ignoring malformed cache snapshot: {err}"),
        }
    }
}

/// Convenience accessors for nullary cached calls.
impl<V> CachedResult<(), V> {
    pub fn get(&mut self, compute: impl FnOnce() -> Result<V>) -> Result<&V> {
        self.get_with((), compute)
    }

    pub fn peek(&self) -> Option<(&V, DateTime<Utc>)> {
        self.retrieve(&())
    }

    pub fn set(&mut self, value: V) {
        self.insert((), value)
    }
}

/// Lock domain grouping every cache (and the HTTP handles) of one adapter.
///
/// Holding the guard while computing gives single-flight semantics for free
/// and guarantees that a snapshot taken under the lock is consistent across
/// entries.
pub struct Vault<S> {
    inner: Mutex<S>,
}

impl<S> Vault<S> {
    pub fn new(state: S) -> Self {
        Vault {
            inner: Mutex::new(state),
        }
    }

    pub fn lock(&self) -> MutexGuard<'_, S> {
        self.inner.lock()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn caches_within_ttl() {
        let mut cache: CachedResult<(), u32> = CachedResult::new(Duration::from_secs(3600));
        let calls = AtomicUsize::new(0);
        let compute = || {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(7u32)
        };
        assert_eq!(*cache.get(compute).unwrap(), 7);
        assert_eq!(*cache.get(compute).unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn zero_ttl_always_recomputes() {
        let mut cache: CachedResult<(), u32> = CachedResult::new(Duration::ZERO);
        let calls = AtomicUsize::new(0);
        let compute = || Ok(calls.fetch_add(1, Ordering::SeqCst) as u32);
        assert_eq!(*cache.get(compute).unwrap(), 0);
        assert_eq!(*cache.get(compute).unwrap(), 1);
    }

    #[test]
    fn retrieve_does_not_compute() {
        let mut cache: CachedResult<u32, String> = CachedResult::new(Duration::from_secs(10));
        assert!(cache.retrieve(&1).is_none());
        cache.insert(1, "one".into());
        let (value, _) = cache.retrieve(&1).unwrap();
        assert_eq!(value, "one");
    }

    #[test]
    fn failed_computation_is_not_stored() {
        let mut cache: CachedResult<(), u32> = CachedResult::new(Duration::from_secs(10));
        let result = cache.get(|| Err(crate::errors::ExchangeError::NotFound("nope".into())));
        assert!(result.is_err());
        assert!(cache.peek().is_none());
    }

    #[test]
    fn snapshot_round_trip() {
        let mut cache: CachedResult<String, u64> = CachedResult::new(Duration::from_secs(10));
        cache.insert("a".into(), 1);
        cache.insert("b".into(), 2);
        let snapshot = cache.dump();

        let mut restored: CachedResult<String, u64> = CachedResult::new(Duration::from_secs(10));
        restored.load(&snapshot);
        assert_eq!(restored.retrieve(&"a".into()).map(|(v, _)| *v), Some(1));
        assert_eq!(restored.retrieve(&"b".into()).map(|(v, _)| *v), Some(2));
    }

    #[test]
    fn vault_single_flight() {
        let vault = Arc::new(Vault::new(CachedResult::<(), u32>::new(Duration::from_secs(
            3600,
        ))));
        let calls = Arc::new(AtomicUsize::new(0));
        let mut handles = Vec::new();
        for _ in 0..4 {
            let vault = Arc::clone(&vault);
            let calls = Arc::clone(&calls);
            handles.push(std::thread::spawn(move || {
                let mut state = vault.lock();
                let value = *state
                    .get(|| {
                        calls.fetch_add(1, Ordering::SeqCst);
                        std::thread::sleep(Duration::from_millis(5));
                        Ok(42u32)
                    })
                    .unwrap();
                value
            }));
        }
        for handle in handles {
            assert_eq!(handle.join().unwrap(), 42);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
