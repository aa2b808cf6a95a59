use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::{AsyncCommands, Script};
use tracing::warn;

use crate::{KVStore, KvError, Transaction, TxnCommand};

/// Clamps a counter at zero on decrement: `DECR` then re-`SET 0` if it went
/// negative, done as one script so no other client observes the negative
/// intermediate value. Mirrors the clamp the Python reference implementation
/// performs in its in-memory fallback path.
const DECR_CLAMPED_SCRIPT: &str = r"
local v = redis.call('DECR', KEYS[1])
if v < 0 then
  redis.call('SET', KEYS[1], 0)
  v = 0
end
return v
";

/// Production [`KVStore`] backed by the real `redis` client crate, grounded
/// on the `redis` dependency `apps/servers/file_host` declares (and models
/// errors around, via `FileHostError::RedisError`) but never itself calls
/// into — this is the first concrete usage of that dependency's async API.
pub struct RedisStore {
	client: redis::Client,
	conn: MultiplexedConnection,
}

impl RedisStore {
	pub async fn connect(url: &str) -> Result<Self, KvError> {
		let client = redis::Client::open(url).map_err(KvError::Transient)?;
		let conn = client.get_multiplexed_async_connection().await.map_err(KvError::Transient)?;
		Ok(Self { client, conn })
	}

	fn conn(&self) -> MultiplexedConnection {
		self.conn.clone()
	}
}

#[async_trait]
impl KVStore for RedisStore {
	async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, KvError> {
		Ok(self.conn().get(key).await?)
	}

	async fn set(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> Result<(), KvError> {
		let mut conn = self.conn();
		match ttl {
			Some(ttl) => conn.set_ex::<_, _, ()>(key, value, ttl.as_secs().max(1)).await?,
			None => conn.set(key, value).await?,
		};
		Ok(())
	}

	async fn incr(&self, key: &str) -> Result<i64, KvError> {
		Ok(self.conn().incr(key, 1).await?)
	}

	async fn decr(&self, key: &str) -> Result<i64, KvError> {
		Ok(self.conn().decr(key, 1).await?)
	}

	async fn expire(&self, key: &str, ttl: Duration) -> Result<(), KvError> {
		self.conn().expire::<_, ()>(key, ttl.as_secs().max(1) as i64).await?;
		Ok(())
	}

	async fn ttl(&self, key: &str) -> Result<Option<Duration>, KvError> {
		let secs: i64 = self.conn().ttl(key).await?;
		Ok(if secs > 0 { Some(Duration::from_secs(secs as u64)) } else { None })
	}

	async fn hget(&self, key: &str, field: &str) -> Result<Option<Vec<u8>>, KvError> {
		Ok(self.conn().hget(key, field).await?)
	}

	async fn hset(&self, key: &str, field: &str, value: Vec<u8>) -> Result<(), KvError> {
		self.conn().hset::<_, _, _, ()>(key, field, value).await?;
		Ok(())
	}

	async fn hincrby(&self, key: &str, field: &str, delta: i64) -> Result<i64, KvError> {
		Ok(self.conn().hincr(key, field, delta).await?)
	}

	async fn hgetall(&self, key: &str) -> Result<HashMap<String, Vec<u8>>, KvError> {
		Ok(self.conn().hgetall(key).await?)
	}

	async fn lpush(&self, key: &str, value: Vec<u8>) -> Result<(), KvError> {
		self.conn().lpush::<_, _, ()>(key, value).await?;
		Ok(())
	}

	async fn lrange(&self, key: &str, start: isize, stop: isize) -> Result<Vec<Vec<u8>>, KvError> {
		Ok(self.conn().lrange(key, start, stop).await?)
	}

	async fn ltrim(&self, key: &str, start: isize, stop: isize) -> Result<(), KvError> {
		self.conn().ltrim::<_, ()>(key, start, stop).await?;
		Ok(())
	}

	async fn delete(&self, keys: &[&str]) -> Result<u64, KvError> {
		if keys.is_empty() {
			return Ok(0);
		}
		Ok(self.conn().del(keys).await?)
	}

	async fn keys(&self, pattern: &str) -> Result<Vec<String>, KvError> {
		Ok(self.conn().keys(pattern).await?)
	}

	async fn incr_with_window(&self, key: &str, ttl: Duration) -> Result<i64, KvError> {
		let mut conn = self.conn();
		let value: i64 = conn.incr(key, 1).await?;
		if value == 1 {
			conn.expire::<_, ()>(key, ttl.as_secs().max(1) as i64).await?;
		}
		Ok(value)
	}

	async fn decr_clamped(&self, key: &str) -> Result<i64, KvError> {
		let script = Script::new(DECR_CLAMPED_SCRIPT);
		Ok(script.key(key).invoke_async(&mut self.conn()).await?)
	}

	async fn begin(&self, watch_keys: &[&str]) -> Result<Box<dyn Transaction>, KvError> {
		let mut conn = self
			.client
			.get_multiplexed_async_connection()
			.await
			.map_err(KvError::Transient)?;
		if !watch_keys.is_empty() {
			redis::cmd("WATCH").arg(watch_keys).query_async::<()>(&mut conn).await?;
		}
		Ok(Box::new(RedisTransaction { conn, queued: Vec::new() }))
	}
}

struct RedisTransaction {
	conn: MultiplexedConnection,
	queued: Vec<TxnCommand>,
}

#[async_trait]
impl Transaction for RedisTransaction {
	fn queue(&mut self, cmd: TxnCommand) {
		self.queued.push(cmd);
	}

	async fn exec(mut self: Box<Self>) -> Result<Option<Vec<i64>>, KvError> {
		let mut pipe = redis::pipe();
		pipe.atomic();
		for cmd in &self.queued {
			match cmd {
				TxnCommand::Incr(key) => {
					pipe.incr(key, 1);
				}
				TxnCommand::Decr(key) => {
					pipe.decr(key, 1);
				}
				TxnCommand::Set(key, value) => {
					pipe.set(key, value.clone()).ignore();
				}
				TxnCommand::Delete(key) => {
					pipe.del(key);
				}
			}
		}
		let result: Option<Vec<i64>> = pipe.query_async(&mut self.conn).await.inspect_err(|err| {
			warn!(error = %err, "transaction exec failed");
		})?;
		Ok(result)
	}
}
