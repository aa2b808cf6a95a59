use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::Mutex;

use crate::{KVStore, KvError, Transaction, TxnCommand};

#[derive(Clone)]
struct Entry {
	value: Vec<u8>,
	expires_at: Option<Instant>,
	version: u64,
}

impl Entry {
	fn fresh(value: Vec<u8>, ttl: Option<Duration>) -> Self {
		Self {
			value,
			expires_at: ttl.map(|ttl| Instant::now() + ttl),
			version: 0,
		}
	}

	fn is_live(&self) -> bool {
		self.expires_at.map(|at| at > Instant::now()).unwrap_or(true)
	}
}

/// Single-process [`KVStore`] double backed by [`DashMap`], grounded on
/// `ws-connection`'s pervasive use of `DashMap` for concurrent in-process
/// state. Used by the test suite and by deployments that intentionally run
/// as a single gateway replica with no external store.
#[derive(Default)]
struct Inner {
	entries: DashMap<String, Entry>,
	hashes: DashMap<String, HashMap<String, Vec<u8>>>,
	lists: DashMap<String, Vec<Vec<u8>>>,
	txn_lock: Mutex<()>,
}

#[derive(Default, Clone)]
pub struct InMemoryStore(Arc<Inner>);

impl InMemoryStore {
	pub fn new() -> Self {
		Self::default()
	}

	fn get_live(&self, key: &str) -> Option<Vec<u8>> {
		self.0.get_live(key)
	}

	fn incr_by(&self, key: &str, delta: i64) -> i64 {
		self.0.incr_by(key, delta)
	}
}

impl Inner {
	fn get_live(&self, key: &str) -> Option<Vec<u8>> {
		match self.entries.get(key) {
			Some(entry) if entry.is_live() => Some(entry.value.clone()),
			Some(_) => {
				self.entries.remove(key);
				None
			}
			None => None,
		}
	}

	fn incr_by(&self, key: &str, delta: i64) -> i64 {
		let mut entry = self.entries.entry(key.to_string()).or_insert_with(|| Entry::fresh(b"0".to_vec(), None));
		if !entry.is_live() {
			*entry = Entry::fresh(b"0".to_vec(), None);
		}
		let current: i64 = std::str::from_utf8(&entry.value).ok().and_then(|s| s.parse().ok()).unwrap_or(0);
		let next = current + delta;
		entry.value = next.to_string().into_bytes();
		entry.version += 1;
		next
	}
}

#[async_trait]
impl KVStore for InMemoryStore {
	async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, KvError> {
		Ok(self.get_live(key))
	}

	async fn set(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> Result<(), KvError> {
		self.0.entries.insert(key.to_string(), Entry::fresh(value, ttl));
		Ok(())
	}

	async fn incr(&self, key: &str) -> Result<i64, KvError> {
		Ok(self.incr_by(key, 1))
	}

	async fn decr(&self, key: &str) -> Result<i64, KvError> {
		Ok(self.incr_by(key, -1))
	}

	async fn expire(&self, key: &str, ttl: Duration) -> Result<(), KvError> {
		if let Some(mut entry) = self.0.entries.get_mut(key) {
			entry.expires_at = Some(Instant::now() + ttl);
		}
		Ok(())
	}

	async fn ttl(&self, key: &str) -> Result<Option<Duration>, KvError> {
		Ok(self.0.entries.get(key).and_then(|entry| entry.expires_at).and_then(|at| at.checked_duration_since(Instant::now())))
	}

	async fn hget(&self, key: &str, field: &str) -> Result<Option<Vec<u8>>, KvError> {
		Ok(self.0.hashes.get(key).and_then(|h| h.get(field).cloned()))
	}

	async fn hset(&self, key: &str, field: &str, value: Vec<u8>) -> Result<(), KvError> {
		self.0.hashes.entry(key.to_string()).or_default().insert(field.to_string(), value);
		Ok(())
	}

	async fn hincrby(&self, key: &str, field: &str, delta: i64) -> Result<i64, KvError> {
		let mut hash = self.0.hashes.entry(key.to_string()).or_default();
		let current: i64 = hash.get(field).and_then(|v| std::str::from_utf8(v).ok()).and_then(|s| s.parse().ok()).unwrap_or(0);
		let next = current + delta;
		hash.insert(field.to_string(), next.to_string().into_bytes());
		Ok(next)
	}

	async fn hgetall(&self, key: &str) -> Result<HashMap<String, Vec<u8>>, KvError> {
		Ok(self.0.hashes.get(key).map(|h| h.clone()).unwrap_or_default())
	}

	async fn lpush(&self, key: &str, value: Vec<u8>) -> Result<(), KvError> {
		self.0.lists.entry(key.to_string()).or_default().insert(0, value);
		Ok(())
	}

	async fn lrange(&self, key: &str, start: isize, stop: isize) -> Result<Vec<Vec<u8>>, KvError> {
		let list = self.0.lists.get(key).map(|l| l.clone()).unwrap_or_default();
		Ok(slice_range(&list, start, stop))
	}

	async fn ltrim(&self, key: &str, start: isize, stop: isize) -> Result<(), KvError> {
		if let Some(mut list) = self.0.lists.get_mut(key) {
			*list = slice_range(&list, start, stop);
		}
		Ok(())
	}

	async fn delete(&self, keys: &[&str]) -> Result<u64, KvError> {
		let mut removed = 0u64;
		for key in keys {
			if self.0.entries.remove(*key).is_some() {
				removed += 1;
			}
			self.0.hashes.remove(*key);
			self.0.lists.remove(*key);
		}
		Ok(removed)
	}

	async fn keys(&self, pattern: &str) -> Result<Vec<String>, KvError> {
		let prefix = pattern.trim_end_matches('*');
		Ok(self.0.entries.iter().map(|e| e.key().clone()).filter(|k| k.starts_with(prefix)).collect())
	}

	async fn incr_with_window(&self, key: &str, ttl: Duration) -> Result<i64, KvError> {
		let value = self.incr_by(key, 1);
		if value == 1 {
			self.expire(key, ttl).await?;
		}
		Ok(value)
	}

	async fn decr_clamped(&self, key: &str) -> Result<i64, KvError> {
		let mut entry = self.0.entries.entry(key.to_string()).or_insert_with(|| Entry::fresh(b"0".to_vec(), None));
		let current: i64 = std::str::from_utf8(&entry.value).ok().and_then(|s| s.parse().ok()).unwrap_or(0);
		let next = (current - 1).max(0);
		entry.value = next.to_string().into_bytes();
		entry.version += 1;
		Ok(next)
	}

	async fn begin(&self, watch_keys: &[&str]) -> Result<Box<dyn Transaction>, KvError> {
		let versions = watch_keys
			.iter()
			.map(|k| (k.to_string(), self.0.entries.get(*k).map(|e| e.version).unwrap_or(0)))
			.collect();
		Ok(Box::new(InMemoryTransaction {
			store: self.0.clone(),
			versions,
			queued: Vec::new(),
		}))
	}
}

fn slice_range(list: &[Vec<u8>], start: isize, stop: isize) -> Vec<Vec<u8>> {
	let len = list.len() as isize;
	let normalize = |i: isize| if i < 0 { (len + i).max(0) } else { i.min(len) };
	let start = normalize(start) as usize;
	let stop = normalize(stop + 1).max(0) as usize;
	if start >= stop || start >= list.len() {
		Vec::new()
	} else {
		list[start..stop.min(list.len())].to_vec()
	}
}

struct InMemoryTransaction {
	store: Arc<Inner>,
	versions: Vec<(String, u64)>,
	queued: Vec<TxnCommand>,
}

#[async_trait]
impl Transaction for InMemoryTransaction {
	fn queue(&mut self, cmd: TxnCommand) {
		self.queued.push(cmd);
	}

	async fn exec(self: Box<Self>) -> Result<Option<Vec<i64>>, KvError> {
		let store = &*self.store;
		let _guard = store.txn_lock.lock().await;

		for (key, version) in &self.versions {
			let current = store.entries.get(key).map(|e| e.version).unwrap_or(0);
			if current != *version {
				return Ok(None);
			}
		}

		let mut replies = Vec::with_capacity(self.queued.len());
		for cmd in &self.queued {
			let reply = match cmd {
				TxnCommand::Incr(key) => store.incr_by(key, 1),
				TxnCommand::Decr(key) => store.incr_by(key, -1),
				TxnCommand::Set(key, value) => {
					store.entries.insert(key.clone(), Entry::fresh(value.clone(), None));
					0
				}
				TxnCommand::Delete(key) => {
					store.entries.remove(key);
					0
				}
			};
			replies.push(reply);
		}
		Ok(Some(replies))
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[tokio::test]
	async fn incr_with_window_sets_ttl_only_once() {
		let store = InMemoryStore::new();
		let ttl = Duration::from_secs(60);
		assert_eq!(store.incr_with_window("k", ttl).await.unwrap(), 1);
		assert_eq!(store.incr_with_window("k", ttl).await.unwrap(), 2);
		let remaining = store.ttl("k").await.unwrap().unwrap();
		assert!(remaining <= ttl);
	}

	#[tokio::test]
	async fn decr_clamped_never_goes_negative() {
		let store = InMemoryStore::new();
		assert_eq!(store.decr_clamped("k").await.unwrap(), 0);
		store.incr("k").await.unwrap();
		assert_eq!(store.decr_clamped("k").await.unwrap(), 0);
	}

	#[tokio::test]
	async fn transaction_conflict_is_detected() {
		let store = InMemoryStore::new();
		store.set("k", b"1".to_vec(), None).await.unwrap();

		let mut txn = store.begin(&["k"]).await.unwrap();
		txn.queue(TxnCommand::Incr("k".to_string()));

		// A concurrent writer bumps the version before exec.
		store.incr("k").await.unwrap();

		assert!(txn.exec().await.unwrap().is_none());
	}

	#[tokio::test]
	async fn expired_entry_reads_as_absent() {
		let store = InMemoryStore::new();
		store.set("k", b"v".to_vec(), Some(Duration::from_millis(1))).await.unwrap();
		tokio::time::sleep(Duration::from_millis(20)).await;
		assert_eq!(store.get("k").await.unwrap(), None);
	}
}
