//! Key-value cache with single-flight computation.
//!
//! Reads take a shared lock on the entry map only. A miss acquires a mutex
//! that belongs to that key alone, re-checks the map, and only then runs the
//! computation, so concurrent callers asking for the same key share one
//! computation while unrelated keys proceed in parallel. Per-key mutexes are
//! removed from the lock map as soon as nobody holds or waits on them.

use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use chrono::{DateTime, Utc};

/// A stored value together with the key it was computed for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry<K, V> {
    pub key: K,
    pub value: V,
    pub computed_at: DateTime<Utc>,
}

type KeyLock = Arc<tokio::sync::Mutex<()>>;

#[derive(Debug)]
struct Inner<K, V> {
    entries: RwLock<HashMap<K, CacheEntry<K, V>>>,
    locks: Mutex<HashMap<K, KeyLock>>,
    // bumped by every invalidation; a computation that started under an older
    // generation does not store its result
    generation: AtomicU64,
}

#[derive(Debug)]
pub struct SingleFlightCache<K, V> {
    inner: Arc<Inner<K, V>>,
}

impl<K, V> Clone for SingleFlightCache<K, V> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<K, V> Default for SingleFlightCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> SingleFlightCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                entries: RwLock::new(HashMap::new()),
                locks: Mutex::new(HashMap::new()),
                generation: AtomicU64::new(0),
            }),
        }
    }

    /// Returns the cached value without computing anything.
    #[must_use]
    pub fn peek(&self, key: &K) -> Option<V> {
        self.read_entries().get(key).map(|entry| entry.value.clone())
    }

    #[must_use]
    pub fn entry(&self, key: &K) -> Option<CacheEntry<K, V>> {
        self.read_entries().get(key).cloned()
    }

    #[must_use]
    pub fn contains(&self, key: &K) -> bool {
        self.read_entries().contains_key(key)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.read_entries().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.read_entries().is_empty()
    }

    #[must_use]
    pub fn keys(&self) -> Vec<K> {
        self.read_entries().keys().cloned().collect()
    }

    /// Number of per-key locks currently alive.
    #[must_use]
    pub fn lock_count(&self) -> usize {
        self.inner
            .locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn invalidate(&self, key: &K) {
        let mut entries = self.write_entries();
        self.inner.generation.fetch_add(1, Ordering::SeqCst);
        entries.remove(key);
    }

    pub fn invalidate_all(&self) {
        let mut entries = self.write_entries();
        self.inner.generation.fetch_add(1, Ordering::SeqCst);
        entries.clear();
    }

    /// Returns the cached value or computes and stores it. For any number of
    /// concurrent callers with the same key, `compute` runs once.
    pub async fn get<F, Fut>(&self, key: K, compute: F) -> V
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = V>,
    {
        self.single_flight(
            key,
            None,
            compute,
            |value: &V| Some(value.clone()),
            |value| value,
        )
        .await
    }

    /// Like [`SingleFlightCache::get`], but a cached value that fails
    /// `is_valid` is recomputed.
    pub async fn get_validated<F, Fut, C>(&self, key: K, compute: F, is_valid: C) -> V
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = V>,
        C: Fn(&V) -> bool + Sync,
    {
        self.single_flight(
            key,
            Some(&is_valid),
            compute,
            |value: &V| Some(value.clone()),
            |value| value,
        )
        .await
    }

    /// Single-flight computation where only successes are stored; every
    /// caller that waited on a failed computation retries it in turn.
    pub async fn try_get<E, F, Fut>(&self, key: K, compute: F) -> Result<V, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
    {
        self.single_flight(
            key,
            None,
            compute,
            |result: &Result<V, E>| result.as_ref().ok().cloned(),
            Ok,
        )
        .await
    }

    async fn single_flight<R, F, Fut>(
        &self,
        key: K,
        is_valid: Option<&(dyn Fn(&V) -> bool + Sync)>,
        compute: F,
        to_store: impl FnOnce(&R) -> Option<V>,
        from_cached: impl Fn(V) -> R,
    ) -> R
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = R>,
    {
        if let Some(value) = self.lookup(&key, is_valid) {
            return from_cached(value);
        }

        let lease = self.lease(&key);
        let _guard = lease.lock.lock().await;

        if let Some(value) = self.lookup(&key, is_valid) {
            return from_cached(value);
        }

        let generation = self.inner.generation.load(Ordering::SeqCst);
        let result = compute().await;
        if let Some(value) = to_store(&result) {
            self.store(key, value, generation);
        }
        result
    }

    fn lookup(&self, key: &K, is_valid: Option<&(dyn Fn(&V) -> bool + Sync)>) -> Option<V> {
        let entries = self.read_entries();
        let entry = entries.get(key)?;
        match is_valid {
            Some(check) if !check(&entry.value) => None,
            _ => Some(entry.value.clone()),
        }
    }

    fn store(&self, key: K, value: V, generation: u64) {
        let mut entries = self.write_entries();
        if self.inner.generation.load(Ordering::SeqCst) != generation {
            return;
        }
        entries.insert(
            key.clone(),
            CacheEntry {
                key,
                value,
                computed_at: Utc::now(),
            },
        );
    }

    fn lease(&self, key: &K) -> KeyLease<'_, K, V> {
        let mut locks = self
            .inner
            .locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let lock = Arc::clone(locks.entry(key.clone()).or_default());
        KeyLease {
            inner: &self.inner,
            key: key.clone(),
            lock,
        }
    }

    fn read_entries(&self) -> std::sync::RwLockReadGuard<'_, HashMap<K, CacheEntry<K, V>>> {
        self.inner
            .entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn write_entries(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<K, CacheEntry<K, V>>> {
        self.inner
            .entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

/// Shared handle on a per-key mutex. Dropping the last lease removes the
/// mutex from the lock map, including when the waiting future is cancelled.
struct KeyLease<'a, K: Eq + Hash, V> {
    inner: &'a Inner<K, V>,
    key: K,
    lock: KeyLock,
}

impl<K: Eq + Hash, V> Drop for KeyLease<'_, K, V> {
    fn drop(&mut self) {
        let mut locks = self
            .inner
            .locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        // one reference lives in the map, one in this lease
        if Arc::strong_count(&self.lock) == 2 {
            locks.remove(&self.key);
        }
    }
}
