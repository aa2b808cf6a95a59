use thiserror::Error;

/// Failure modes of the KVStore adapter (spec §4.A): a transient network
/// error the caller may retry or degrade on, a protocol error that is fatal
/// for the operation, and a watch-conflict the caller re-reads and retries.
#[derive(Debug, Error)]
pub enum KvError {
	#[error("kv store transient error: {0}")]
	Transient(#[from] redis::RedisError),
	#[error("kv store unavailable: {0}")]
	Unavailable(String),
	#[error("watch conflict on key")]
	WatchConflict,
	#[error("value was not valid utf-8/integer: {0}")]
	Decode(String),
}

impl KvError {
	/// Transient/unavailable errors are candidates for the rate limiter's
	/// fail-open degradation path; protocol-level decode errors are not.
	pub fn is_transient(&self) -> bool {
		matches!(self, Self::Transient(_) | Self::Unavailable(_))
	}
}
