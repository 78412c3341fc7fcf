use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::NaiveDate;
use futures::future::{self, BoxFuture, FutureExt, Shared};

use crate::error::StoreError;
use crate::models::{Cohort, Participant};
use crate::store::MembershipStore;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Key/value cache with a per-entry time to live. Expired entries are
/// dropped on the read that finds them.
pub struct TtlCache<K, V> {
    entries: Mutex<HashMap<K, (V, Instant)>>,
}

impl<K: Eq + Hash, V: Clone> TtlCache<K, V> {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn get(&self, key: &K) -> Option<V> {
        let mut entries = lock(&self.entries);
        match entries.get(key) {
            Some((value, expires_at)) if Instant::now() < *expires_at => Some(value.clone()),
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        }
    }

    pub fn set(&self, key: K, value: V, ttl: Duration) {
        lock(&self.entries).insert(key, (value, Instant::now() + ttl));
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        lock(&self.entries).len()
    }
}

impl<K: Eq + Hash, V: Clone> Default for TtlCache<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

type SharedFetch<V> = Shared<BoxFuture<'static, Result<V, StoreError>>>;

/// Collapses concurrent fetches of the same key into one in-flight request.
pub struct RequestCoalescer<K, V: Clone> {
    in_flight: Mutex<HashMap<K, SharedFetch<V>>>,
}

impl<K, V> RequestCoalescer<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self {
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    pub async fn run<F, Fut>(&self, key: K, fetch: F) -> Result<V, StoreError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, StoreError>> + Send + 'static,
    {
        let shared = {
            let mut in_flight = lock(&self.in_flight);
            match in_flight.get(&key) {
                Some(existing) => existing.clone(),
                None => {
                    let started = fetch().boxed().shared();
                    in_flight.insert(key.clone(), started.clone());
                    started
                }
            }
        };

        let result = shared.clone().await;

        // A newer request may already own the slot.
        let mut in_flight = lock(&self.in_flight);
        if in_flight
            .get(&key)
            .is_some_and(|current| current.ptr_eq(&shared))
        {
            in_flight.remove(&key);
        }
        result
    }

    #[cfg(test)]
    pub fn in_flight(&self) -> usize {
        lock(&self.in_flight).len()
    }
}

impl<K, V> Default for RequestCoalescer<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

/// Membership loader that caches participants per cohort.
pub struct CachedMembership {
    inner: Arc<dyn MembershipStore>,
    participants: TtlCache<String, Vec<Participant>>,
    coalescer: RequestCoalescer<String, Vec<Participant>>,
    ttl: Duration,
}

impl CachedMembership {
    pub fn new(inner: Arc<dyn MembershipStore>, ttl: Duration) -> Self {
        Self {
            inner,
            participants: TtlCache::new(),
            coalescer: RequestCoalescer::new(),
            ttl,
        }
    }

    async fn cohort_participants(&self, cohort_name: &str) -> Result<Vec<Participant>, StoreError> {
        let key = cohort_name.to_string();
        if let Some(cached) = self.participants.get(&key) {
            return Ok(cached);
        }

        let inner = Arc::clone(&self.inner);
        let names = vec![key.clone()];
        let fetched = self
            .coalescer
            .run(key.clone(), move || async move { inner.list_participants(&names).await })
            .await?;

        self.participants.set(key, fetched.clone(), self.ttl);
        Ok(fetched)
    }
}

#[async_trait]
impl MembershipStore for CachedMembership {
    async fn list_active_cohorts(&self, as_of: NaiveDate) -> Result<Vec<Cohort>, StoreError> {
        self.inner.list_active_cohorts(as_of).await
    }

    async fn list_participants(
        &self,
        cohort_names: &[String],
    ) -> Result<Vec<Participant>, StoreError> {
        let per_cohort = future::try_join_all(
            cohort_names
                .iter()
                .map(|name| self.cohort_participants(name)),
        )
        .await?;

        Ok(per_cohort.into_iter().flatten().collect())
    }
}
