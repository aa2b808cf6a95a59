//! Typed wrapper over an external key-value store (spec §4.A).
//!
//! The rest of the gateway is written against the [`KVStore`] trait object,
//! never against a concrete backend, so that a single-replica deployment can
//! run on [`InMemoryStore`] and a horizontally-scaled one on [`RedisStore`]
//! without either touching the rate limiter or the connection registry.
//!
//! Narrowing the contract down to this trait (rather than re-exporting
//! `redis::AsyncCommands` directly) is grounded on
//! `ws-connection::core::manager::ConnectionStore`, which wraps a concrete
//! store behind a small `#[async_trait]` trait for the same reason: callers
//! should depend on a handful of named operations, not on a client library.

mod error;
mod memory_store;
mod redis_store;

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;

pub use error::KvError;
pub use memory_store::InMemoryStore;
pub use redis_store::RedisStore;

/// A single command queued inside a [`Transaction`].
#[derive(Debug, Clone)]
pub enum TxnCommand {
	Incr(String),
	Decr(String),
	Set(String, Vec<u8>),
	Delete(String),
}

/// An optimistic `Watch -> Multi -> Commands -> Exec` transaction (spec §4.A,
/// §9 "Pipelines/watch"). `exec` returns `Ok(None)` exactly when one of the
/// watched keys changed between `begin` and `exec` — the caller re-reads and
/// retries rather than treating it as a hard error.
#[async_trait]
pub trait Transaction: Send {
	fn queue(&mut self, cmd: TxnCommand);

	/// Commits the queued commands. `Ok(None)` signals a watch conflict;
	/// `Ok(Some(replies))` gives one integer reply per queued command, in
	/// order (deletes reply with the number of keys removed).
	async fn exec(self: Box<Self>) -> Result<Option<Vec<i64>>, KvError>;
}

#[async_trait]
pub trait KVStore: Send + Sync {
	async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, KvError>;
	async fn set(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> Result<(), KvError>;
	async fn incr(&self, key: &str) -> Result<i64, KvError>;
	async fn decr(&self, key: &str) -> Result<i64, KvError>;
	async fn expire(&self, key: &str, ttl: Duration) -> Result<(), KvError>;
	async fn ttl(&self, key: &str) -> Result<Option<Duration>, KvError>;

	async fn hget(&self, key: &str, field: &str) -> Result<Option<Vec<u8>>, KvError>;
	async fn hset(&self, key: &str, field: &str, value: Vec<u8>) -> Result<(), KvError>;
	async fn hincrby(&self, key: &str, field: &str, delta: i64) -> Result<i64, KvError>;
	async fn hgetall(&self, key: &str) -> Result<HashMap<String, Vec<u8>>, KvError>;

	async fn lpush(&self, key: &str, value: Vec<u8>) -> Result<(), KvError>;
	async fn lrange(&self, key: &str, start: isize, stop: isize) -> Result<Vec<Vec<u8>>, KvError>;
	async fn ltrim(&self, key: &str, start: isize, stop: isize) -> Result<(), KvError>;

	async fn delete(&self, keys: &[&str]) -> Result<u64, KvError>;
	async fn keys(&self, pattern: &str) -> Result<Vec<String>, KvError>;

	/// Increments `key`, and sets its TTL to `ttl` only when the resulting
	/// count is `1` (i.e. this call started a fresh window), mirroring the
	/// `INCR` + conditional `EXPIRE` pairing the rate limiter needs for its
	/// window counters (spec §4.B) without resetting the TTL on every hit.
	async fn incr_with_window(&self, key: &str, ttl: Duration) -> Result<i64, KvError>;

	/// Decrements `key` but never below zero; a missing key stays absent
	/// (spec §3: "decrement is forbidden on message windows"; this helper is
	/// for the *connection* counters, which are allowed to decrement but
	/// never go negative).
	async fn decr_clamped(&self, key: &str) -> Result<i64, KvError>;

	/// Opens an optimistic transaction watching `keys`.
	async fn begin(&self, watch_keys: &[&str]) -> Result<Box<dyn Transaction>, KvError>;
}
