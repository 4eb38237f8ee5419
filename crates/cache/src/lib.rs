//! # Cache Crate
//!
//! Key-value caching for recommendation payloads.
//!
//! - **backend**: the [`CacheBackend`] trait
//! - **local**: [`LocalTtlCache`], an in-process TTL map
//! - **remote**: [`RedisBackend`], a Redis client on a connection manager
//! - **gateway**: [`CacheGateway`], which falls back to the local map when the
//!   networked backend fails

pub mod backend;
pub mod error;
pub mod gateway;
pub mod local;
pub mod remote;

pub use backend::CacheBackend;
pub use error::CacheError;
pub use gateway::CacheGateway;
pub use local::LocalTtlCache;
pub use remote::RedisBackend;
