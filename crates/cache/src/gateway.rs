//! Cache gateway: one get/set/delete surface over a pluggable backend.
//!
//! ## Degradation
//! When a networked backend is configured the gateway uses it until the
//! first failure (at startup or mid-operation). From then on every call is
//! served by the in-process [`LocalTtlCache`] until [`CacheGateway::recheck`]
//! finds the backend healthy again. The switch is logged once per degrade
//! event and is never visible to callers: no method here returns an error.

use crate::backend::CacheBackend;
use crate::error::CacheError;
use crate::local::LocalTtlCache;
use crate::remote::RedisBackend;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Uniform cache access with a guaranteed in-process fallback.
pub struct CacheGateway {
    remote: Option<Arc<dyn CacheBackend>>,
    local: LocalTtlCache,
    degraded: AtomicBool,
}

impl CacheGateway {
    /// Gateway backed only by the in-process map
    pub fn local_only() -> Self {
        Self {
            remote: None,
            local: LocalTtlCache::new(),
            degraded: AtomicBool::new(false),
        }
    }

    /// Gateway in front of an already-constructed backend.
    ///
    /// No liveness check is made; the first failing call degrades.
    pub fn with_backend(remote: Arc<dyn CacheBackend>) -> Self {
        Self {
            remote: Some(remote),
            local: LocalTtlCache::new(),
            degraded: AtomicBool::new(false),
        }
    }

    /// Build the gateway from configuration and ping the backend once.
    ///
    /// `None` selects the in-process map. An invalid URL or a failed ping
    /// degrades immediately; startup never fails because of the cache.
    pub async fn connect(url: Option<&str>, io_timeout: Duration) -> Self {
        let Some(url) = url else {
            info!("No cache backend configured, using in-process cache");
            return Self::local_only();
        };

        let backend = match RedisBackend::new(url, io_timeout) {
            Ok(backend) => backend,
            Err(e) => {
                warn!("Cache backend unusable ({}), using in-process cache", e);
                return Self::local_only();
            }
        };

        let address = backend.address();
        let gateway = Self::with_backend(Arc::new(backend));
        match gateway.remote_ping().await {
            Ok(()) => info!("Connected to cache backend at {}", address),
            Err(e) => gateway.degrade(&e),
        }
        gateway
    }

    /// Whether calls are currently served by the in-process fallback
    pub fn is_degraded(&self) -> bool {
        self.degraded.load(Ordering::SeqCst)
    }

    /// Name of the backend currently serving calls
    pub fn active_backend(&self) -> &str {
        match self.healthy_remote() {
            Some(remote) => remote.name(),
            None => self.local.name(),
        }
    }

    fn healthy_remote(&self) -> Option<&Arc<dyn CacheBackend>> {
        self.remote.as_ref().filter(|_| !self.is_degraded())
    }

    async fn remote_ping(&self) -> Result<(), CacheError> {
        match &self.remote {
            Some(remote) => remote.ping().await,
            None => Ok(()),
        }
    }

    fn degrade(&self, cause: &CacheError) {
        if !self.degraded.swap(true, Ordering::SeqCst) {
            warn!(
                "Cache backend unavailable ({}); falling back to in-process cache",
                cause
            );
        }
    }

    /// Ping the backend again and resume using it if healthy.
    ///
    /// Returns whether the networked backend is in use afterwards.
    pub async fn recheck(&self) -> bool {
        if self.remote.is_none() {
            return false;
        }
        match self.remote_ping().await {
            Ok(()) => {
                if self.degraded.swap(false, Ordering::SeqCst) {
                    info!("Cache backend reachable again, leaving in-process fallback");
                }
                true
            }
            Err(e) => {
                debug!("Cache backend recheck failed: {}", e);
                self.degraded.store(true, Ordering::SeqCst);
                false
            }
        }
    }

    pub async fn get(&self, key: &str) -> Option<Vec<u8>> {
        if let Some(remote) = self.healthy_remote() {
            match remote.get(key).await {
                Ok(value) => return value,
                Err(e) => self.degrade(&e),
            }
        }
        self.local.get_now(key)
    }

    pub async fn set(&self, key: &str, value: &[u8], ttl: Duration) {
        if let Some(remote) = self.healthy_remote() {
            match remote.set(key, value, ttl).await {
                Ok(()) => return,
                Err(e) => self.degrade(&e),
            }
        }
        self.local.set_now(key, value, ttl);
    }

    pub async fn delete(&self, key: &str) {
        if let Some(remote) = self.healthy_remote() {
            if let Err(e) = remote.delete(key).await {
                self.degrade(&e);
            }
        }
        self.local.delete_now(key);
    }

    /// Read and decode a JSON value.
    ///
    /// An entry that no longer decodes is deleted and reported as absent.
    pub async fn get_json<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let bytes = self.get(key).await?;
        match serde_json::from_slice(&bytes) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!("Dropping undecodable cache entry {}: {}", key, e);
                self.delete(key).await;
                None
            }
        }
    }

    /// Encode and store a JSON value. Encoding failures are logged and skipped.
    pub async fn set_json<T: Serialize>(&self, key: &str, value: &T, ttl: Duration) {
        match serde_json::to_vec(value) {
            Ok(bytes) => self.set(key, &bytes, ttl).await,
            Err(e) => warn!("Not caching {}: {}", key, e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;

    /// Backend whose health can be toggled; counts every call it receives
    #[derive(Default)]
    struct FlakyBackend {
        down: AtomicBool,
        calls: AtomicUsize,
        inner: LocalTtlCache,
    }

    impl FlakyBackend {
        fn check(&self) -> Result<(), CacheError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.down.load(Ordering::SeqCst) {
                Err(CacheError::Unavailable("flaky backend is down".to_string()))
            } else {
                Ok(())
            }
        }
    }

    #[async_trait]
    impl CacheBackend for FlakyBackend {
        fn name(&self) -> &str {
            "flaky"
        }
        async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
            self.check()?;
            Ok(self.inner.get_now(key))
        }
        async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> Result<(), CacheError> {
            self.check()?;
            self.inner.set_now(key, value, ttl);
            Ok(())
        }
        async fn delete(&self, key: &str) -> Result<(), CacheError> {
            self.check()?;
            self.inner.delete_now(key);
            Ok(())
        }
        async fn ping(&self) -> Result<(), CacheError> {
            self.check()
        }
    }

    #[tokio::test]
    async fn test_local_only_round_trip() {
        let gateway = CacheGateway::local_only();
        gateway.set("k", b"v", Duration::from_secs(60)).await;
        assert_eq!(gateway.get("k").await, Some(b"v".to_vec()));
        gateway.delete("k").await;
        assert_eq!(gateway.get("k").await, None);
        assert_eq!(gateway.active_backend(), "local");
        assert!(!gateway.is_degraded());
    }

    #[tokio::test]
    async fn test_healthy_backend_is_used() {
        let backend = Arc::new(FlakyBackend::default());
        let gateway = CacheGateway::with_backend(backend.clone());

        gateway.set("k", b"v", Duration::from_secs(60)).await;
        assert_eq!(backend.inner.get_now("k"), Some(b"v".to_vec()));
        assert_eq!(gateway.active_backend(), "flaky");
    }

    #[tokio::test]
    async fn test_mid_operation_failure_degrades_permanently() {
        let backend = Arc::new(FlakyBackend::default());
        let gateway = CacheGateway::with_backend(backend.clone());
        backend.down.store(true, Ordering::SeqCst);

        gateway.set("k", b"v", Duration::from_secs(60)).await;
        assert!(gateway.is_degraded());
        assert_eq!(gateway.get("k").await, Some(b"v".to_vec()), "served from local fallback");

        // Backend recovers, but the gateway stays degraded until rechecked
        backend.down.store(false, Ordering::SeqCst);
        gateway.get("k").await;
        assert_eq!(backend.calls.load(Ordering::SeqCst), 1, "no calls after degrading");
        assert_eq!(gateway.active_backend(), "local");
    }

    #[tokio::test]
    async fn test_recheck_restores_backend() {
        let backend = Arc::new(FlakyBackend::default());
        let gateway = CacheGateway::with_backend(backend.clone());
        backend.down.store(true, Ordering::SeqCst);
        gateway.get("k").await;
        assert!(gateway.is_degraded());

        assert!(!gateway.recheck().await, "still down");
        backend.down.store(false, Ordering::SeqCst);
        assert!(gateway.recheck().await);
        assert!(!gateway.is_degraded());
        assert_eq!(gateway.active_backend(), "flaky");
    }

    #[tokio::test]
    async fn test_connect_to_unreachable_backend_degrades_at_startup() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        drop(listener);

        let gateway = CacheGateway::connect(Some(&addr), Duration::from_millis(300)).await;
        assert!(gateway.is_degraded());

        gateway.set("k", b"v", Duration::from_secs(60)).await;
        assert_eq!(gateway.get("k").await, Some(b"v".to_vec()));
    }

    #[tokio::test]
    async fn test_invalid_url_falls_back_to_local() {
        let gateway = CacheGateway::connect(Some("http://cache:6379"), Duration::from_millis(300)).await;

        assert_eq!(gateway.active_backend(), "local");
        gateway.set_json("books", &vec!["a", "b"], Duration::from_secs(60)).await;
        let books: Option<Vec<String>> = gateway.get_json("books").await;
        assert_eq!(books, Some(vec!["a".to_string(), "b".to_string()]));
    }

    #[tokio::test]
    async fn test_json_round_trip_through_backend() {
        let backend = Arc::new(FlakyBackend::default());
        let gateway = CacheGateway::with_backend(backend.clone());

        gateway.set_json("books", &vec!["a", "b"], Duration::from_secs(60)).await;
        assert_eq!(backend.inner.get_now("books"), Some(br#"["a","b"]"#.to_vec()));
        let books: Option<Vec<String>> = gateway.get_json("books").await;
        assert_eq!(books, Some(vec!["a".to_string(), "b".to_string()]));
        assert!(!gateway.is_degraded());
    }

    #[tokio::test]
    async fn test_undecodable_entry_is_dropped() {
        let gateway = CacheGateway::local_only();
        gateway.set("k", b"not json", Duration::from_secs(60)).await;

        let value: Option<Vec<String>> = gateway.get_json("k").await;
        assert!(value.is_none());
        assert!(gateway.get("k").await.is_none(), "bad entry deleted");
    }

    #[tokio::test]
    async fn test_gateway_honours_ttl() {
        let gateway = CacheGateway::local_only();
        gateway.set("k", b"v", Duration::from_millis(20)).await;
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(gateway.get("k").await.is_none());
    }
}
