//! Redis cache backend.
//!
//! Wraps a [`redis::aio::ConnectionManager`], which multiplexes requests
//! over one connection and reconnects on its own after a drop. The manager
//! is created lazily on first use so that building the backend never does
//! network I/O. Every call is bounded by the configured I/O timeout.

use crate::backend::CacheBackend;
use crate::error::CacheError;
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{Client, RedisResult};
use std::future::Future;
use std::time::Duration;
use tokio::sync::OnceCell;
use tokio::time::timeout;

pub struct RedisBackend {
    client: Client,
    io_timeout: Duration,
    manager: OnceCell<ConnectionManager>,
}

impl RedisBackend {
    /// Parse `url` (`redis://host:port/db`, or a bare `host:port`).
    pub fn new(url: &str, io_timeout: Duration) -> Result<Self, CacheError> {
        let url = url.trim();
        let url = if url.contains("://") {
            url.to_string()
        } else {
            format!("redis://{url}")
        };
        let client = Client::open(url.as_str()).map_err(|e| CacheError::InvalidUrl(format!("{url} ({e})")))?;

        Ok(Self {
            client,
            io_timeout,
            manager: OnceCell::new(),
        })
    }

    /// Host and port this backend talks to
    pub fn address(&self) -> String {
        self.client.get_connection_info().addr.to_string()
    }

    async fn connection(&self) -> Result<ConnectionManager, CacheError> {
        let manager = self
            .manager
            .get_or_try_init(|| async {
                match timeout(self.io_timeout, ConnectionManager::new(self.client.clone())).await {
                    Ok(result) => result.map_err(CacheError::from),
                    Err(_) => Err(CacheError::Timeout(self.io_timeout)),
                }
            })
            .await?;
        Ok(manager.clone())
    }

    async fn bounded<T>(&self, request: impl Future<Output = RedisResult<T>>) -> Result<T, CacheError> {
        match timeout(self.io_timeout, request).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(CacheError::Timeout(self.io_timeout)),
        }
    }
}

/// Clamp a TTL to whole milliseconds for `SET ... PX`; zero is not accepted by the server.
fn ttl_millis(ttl: Duration) -> u64 {
    u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1)
}

#[async_trait]
impl CacheBackend for RedisBackend {
    fn name(&self) -> &str {
        "redis"
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        let mut conn = self.connection().await?;
        let value: Option<Vec<u8>> = self.bounded(redis::cmd("GET").arg(key).query_async(&mut conn)).await?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> Result<(), CacheError> {
        let mut conn = self.connection().await?;
        let () = self
            .bounded(
                redis::cmd("SET")
                    .arg(key)
                    .arg(value)
                    .arg("PX")
                    .arg(ttl_millis(ttl))
                    .query_async(&mut conn),
            )
            .await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        let mut conn = self.connection().await?;
        let _removed: i64 = self.bounded(redis::cmd("DEL").arg(key).query_async(&mut conn)).await?;
        Ok(())
    }

    async fn ping(&self) -> Result<(), CacheError> {
        let mut conn = self.connection().await?;
        let _pong: String = self.bounded(redis::cmd("PING").query_async(&mut conn)).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[test]
    fn test_bare_host_port_gets_a_scheme() {
        let backend = RedisBackend::new("cache:6380", Duration::from_secs(1)).unwrap();
        assert_eq!(backend.address(), "cache:6380");

        let backend = RedisBackend::new("redis://user:pw@cache:6381/2", Duration::from_secs(1)).unwrap();
        assert_eq!(backend.address(), "cache:6381");
        assert_eq!(backend.name(), "redis");
    }

    #[test]
    fn test_unsupported_scheme_is_rejected() {
        let result = RedisBackend::new("http://cache:6379", Duration::from_secs(1));
        assert!(matches!(result, Err(CacheError::InvalidUrl(_))));
    }

    #[test]
    fn test_ttl_is_clamped_to_at_least_one_millisecond() {
        assert_eq!(ttl_millis(Duration::ZERO), 1);
        assert_eq!(ttl_millis(Duration::from_micros(1500)), 1);
        assert_eq!(ttl_millis(Duration::from_secs(3)), 3000);
    }

    #[tokio::test]
    async fn test_unreachable_server_is_an_error() {
        // Bind then drop to obtain a port nobody listens on
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        drop(listener);

        let backend = RedisBackend::new(&addr, Duration::from_millis(500)).unwrap();
        assert!(backend.ping().await.is_err());
        assert!(backend.get("k").await.is_err(), "no connection is cached after a failure");
    }
}
