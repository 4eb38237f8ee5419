//! In-process TTL map.
//!
//! Always available, so it doubles as the fallback when the networked
//! backend is unreachable. Expiry is lazy: an expired entry is dropped the
//! next time it is read, and every write sweeps the whole map once the
//! earliest known deadline has passed, so keys that are never read again
//! cannot pile up.

use crate::backend::CacheBackend;
use crate::error::CacheError;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

#[derive(Debug)]
struct Entry {
    value: Vec<u8>,
    expires_at: Instant,
}

#[derive(Debug, Default)]
struct Entries {
    map: HashMap<String, Entry>,
    /// Earliest `expires_at` among stored entries, if any
    next_expiry: Option<Instant>,
}

impl Entries {
    fn sweep(&mut self, now: Instant) {
        self.map.retain(|_, entry| entry.expires_at > now);
        self.next_expiry = self.map.values().map(|entry| entry.expires_at).min();
    }
}

/// Thread-safe in-memory cache with per-entry expiry.
#[derive(Debug, Default)]
pub struct LocalTtlCache {
    entries: Mutex<Entries>,
}

impl LocalTtlCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Entries> {
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn get_now(&self, key: &str) -> Option<Vec<u8>> {
        let mut entries = self.lock();
        match entries.map.get(key) {
            Some(entry) if entry.expires_at > Instant::now() => Some(entry.value.clone()),
            Some(_) => {
                entries.map.remove(key);
                None
            }
            None => None,
        }
    }

    pub fn set_now(&self, key: &str, value: &[u8], ttl: Duration) {
        let now = Instant::now();
        let mut entries = self.lock();
        if entries.next_expiry.is_some_and(|deadline| deadline <= now) {
            entries.sweep(now);
        }
        if ttl.is_zero() {
            entries.map.remove(key);
            return;
        }

        let expires_at = now + ttl;
        entries.next_expiry = Some(entries.next_expiry.map_or(expires_at, |t| t.min(expires_at)));
        entries.map.insert(
            key.to_string(),
            Entry {
                value: value.to_vec(),
                expires_at,
            },
        );
    }

    pub fn delete_now(&self, key: &str) {
        self.lock().map.remove(key);
    }

    /// Number of stored entries, including expired ones not yet swept
    pub fn len(&self) -> usize {
        self.lock().map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl CacheBackend for LocalTtlCache {
    fn name(&self) -> &str {
        "local"
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        Ok(self.get_now(key))
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> Result<(), CacheError> {
        self.set_now(key, value, ttl);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        self.delete_now(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_then_get() {
        let cache = LocalTtlCache::new();
        cache.set_now("k", b"value", Duration::from_secs(60));
        assert_eq!(cache.get_now("k"), Some(b"value".to_vec()));
        assert_eq!(cache.get_now("other"), None);
    }

    #[test]
    fn test_entries_expire_and_are_evicted_on_read() {
        let cache = LocalTtlCache::new();
        cache.set_now("k", b"value", Duration::from_millis(20));
        std::thread::sleep(Duration::from_millis(40));

        assert_eq!(cache.len(), 1, "expired entry stays until read");
        assert_eq!(cache.get_now("k"), None);
        assert!(cache.is_empty(), "read evicts the expired entry");
    }

    #[test]
    fn test_writes_sweep_expired_entries_that_are_never_read() {
        let cache = LocalTtlCache::new();
        for i in 0..1000 {
            cache.set_now(&format!("stale-{i}"), b"value", Duration::from_millis(1));
        }
        std::thread::sleep(Duration::from_millis(20));

        for i in 0..10 {
            let key = format!("live-{i}");
            cache.set_now(&key, b"value", Duration::from_secs(60));
            assert_eq!(cache.get_now(&key), Some(b"value".to_vec()));
        }
        assert_eq!(cache.len(), 10, "stale keys are swept on write, not kept until read");
    }

    #[test]
    fn test_sweep_keeps_live_entries() {
        let cache = LocalTtlCache::new();
        cache.set_now("long", b"kept", Duration::from_secs(60));
        cache.set_now("short", b"gone", Duration::from_millis(5));
        std::thread::sleep(Duration::from_millis(20));

        cache.set_now("new", b"value", Duration::from_secs(60));
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get_now("long"), Some(b"kept".to_vec()));
    }

    #[test]
    fn test_set_overwrites_and_refreshes_ttl() {
        let cache = LocalTtlCache::new();
        cache.set_now("k", b"old", Duration::from_millis(10));
        cache.set_now("k", b"new", Duration::from_secs(60));
        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(cache.get_now("k"), Some(b"new".to_vec()));
    }

    #[test]
    fn test_zero_ttl_stores_nothing() {
        let cache = LocalTtlCache::new();
        cache.set_now("k", b"value", Duration::ZERO);
        assert!(cache.get_now("k").is_none());
    }

    #[tokio::test]
    async fn test_delete_through_trait() {
        let cache = LocalTtlCache::new();
        cache.set("k", b"value", Duration::from_secs(60)).await.unwrap();
        cache.delete("k").await.unwrap();
        assert_eq!(cache.get("k").await.unwrap(), None);
    }
}
