//! TTL memoization in front of the repositories.
//!
//! Entries are never the source of truth: a miss always falls back to the
//! store, and every mutation that could make an entry stale evicts it.

use std::future::Future;
use std::hash::Hash;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;

use corral_core::policy::{Policy, PolicyKey};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CacheError {
    #[error("cache unavailable: {0}")]
    Unavailable(String),
}

pub trait PolicyCache: Send + Sync {
    fn get(
        &self,
        key: &PolicyKey,
    ) -> impl Future<Output = Result<Option<Policy>, CacheError>> + Send;

    fn put(&self, policy: &Policy) -> impl Future<Output = Result<(), CacheError>> + Send;

    fn remove(&self, key: &PolicyKey) -> impl Future<Output = Result<(), CacheError>> + Send;
}

/// Device key to device id.
pub trait ThingCache: Send + Sync {
    fn id_for_key(
        &self,
        key: &str,
    ) -> impl Future<Output = Result<Option<String>, CacheError>> + Send;

    fn save(&self, key: &str, thing_id: &str)
    -> impl Future<Output = Result<(), CacheError>> + Send;

    fn remove(&self, key: &str) -> impl Future<Output = Result<(), CacheError>> + Send;
}

/// Channel/device connectivity marks.
pub trait ChannelCache: Send + Sync {
    fn has_thing(
        &self,
        channel_id: &str,
        thing_id: &str,
    ) -> impl Future<Output = Result<bool, CacheError>> + Send;

    fn connect(
        &self,
        channel_id: &str,
        thing_id: &str,
    ) -> impl Future<Output = Result<(), CacheError>> + Send;

    fn disconnect(
        &self,
        channel_id: &str,
        thing_id: &str,
    ) -> impl Future<Output = Result<(), CacheError>> + Send;

    /// Drops every mark held by `thing_id`, whatever the channel.
    fn remove_thing(&self, thing_id: &str) -> impl Future<Output = Result<(), CacheError>> + Send;
}

#[derive(Clone)]
struct CachedEntry<V> {
    value: V,
    expires_at: Instant,
}

#[derive(Clone)]
struct TtlMap<K, V>
where
    K: Eq + Hash,
{
    entries: Arc<DashMap<K, CachedEntry<V>>>,
    ttl: Duration,
}

impl<K, V> TtlMap<K, V>
where
    K: Eq + Hash,
    V: Clone,
{
    fn new(ttl: Duration) -> Self {
        Self {
            entries: Arc::new(DashMap::new()),
            ttl,
        }
    }

    fn get(&self, key: &K) -> Option<V> {
        let live = self.entries.get(key).and_then(|entry| {
            if entry.expires_at > Instant::now() {
                Some(entry.value.clone())
            } else {
                None
            }
        });
        if live.is_none() {
            self.entries
                .remove_if(key, |_, entry| entry.expires_at <= Instant::now());
        }
        live
    }

    fn insert(&self, key: K, value: V) {
        self.entries.insert(
            key,
            CachedEntry {
                value,
                expires_at: Instant::now() + self.ttl,
            },
        );
    }

    fn remove(&self, key: &K) {
        self.entries.remove(key);
    }

    fn remove_where(&self, mut stale: impl FnMut(&K) -> bool) {
        self.entries.retain(|key, _| !stale(key));
    }
}

#[derive(Clone)]
pub struct InMemoryPolicyCache {
    entries: TtlMap<PolicyKey, Policy>,
}

impl InMemoryPolicyCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: TtlMap::new(ttl),
        }
    }
}

impl PolicyCache for InMemoryPolicyCache {
    async fn get(&self, key: &PolicyKey) -> Result<Option<Policy>, CacheError> {
        Ok(self.entries.get(key))
    }

    async fn put(&self, policy: &Policy) -> Result<(), CacheError> {
        self.entries.insert(policy.key(), policy.clone());
        Ok(())
    }

    async fn remove(&self, key: &PolicyKey) -> Result<(), CacheError> {
        self.entries.remove(key);
        Ok(())
    }
}

#[derive(Clone)]
pub struct InMemoryThingCache {
    ids: TtlMap<String, String>,
}

impl InMemoryThingCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ids: TtlMap::new(ttl),
        }
    }
}

impl ThingCache for InMemoryThingCache {
    async fn id_for_key(&self, key: &str) -> Result<Option<String>, CacheError> {
        Ok(self.ids.get(&key.to_string()))
    }

    async fn save(&self, key: &str, thing_id: &str) -> Result<(), CacheError> {
        self.ids.insert(key.to_string(), thing_id.to_string());
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), CacheError> {
        self.ids.remove(&key.to_string());
        Ok(())
    }
}

#[derive(Clone)]
pub struct InMemoryChannelCache {
    marks: TtlMap<(String, String), ()>,
}

impl InMemoryChannelCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            marks: TtlMap::new(ttl),
        }
    }
}

fn mark(channel_id: &str, thing_id: &str) -> (String, String) {
    (channel_id.to_string(), thing_id.to_string())
}

impl ChannelCache for InMemoryChannelCache {
    async fn has_thing(&self, channel_id: &str, thing_id: &str) -> Result<bool, CacheError> {
        Ok(self.marks.get(&mark(channel_id, thing_id)).is_some())
    }

    async fn connect(&self, channel_id: &str, thing_id: &str) -> Result<(), CacheError> {
        self.marks.insert(mark(channel_id, thing_id), ());
        Ok(())
    }

    async fn disconnect(&self, channel_id: &str, thing_id: &str) -> Result<(), CacheError> {
        self.marks.remove(&mark(channel_id, thing_id));
        Ok(())
    }

    async fn remove_thing(&self, thing_id: &str) -> Result<(), CacheError> {
        self.marks.remove_where(|(_, thing)| thing == thing_id);
        Ok(())
    }
}
