use thiserror::Error;

/// Failures from the rate limiter's own plumbing. Store errors surfaced
/// during an admission check are not routed through this type — they are
/// resolved in-place by the configured [`crate::RateLimiterDegradation`]
/// instead, so a store hiccup never turns into an unhandled error at the
/// call site (spec §7: downstream KVStore failures degrade rather than
/// propagate).
#[derive(Debug, Error)]
pub enum RateLimitError {
	#[error("rate limiter store error: {0}")]
	Store(#[from] kv_store::KvError),
}
