use std::fmt;
use std::net::IpAddr;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Opaque client-supplied identifier. Non-empty, unique across the live set.
///
/// Cheap to clone: backed by `Arc<str>` like the connection crate this is
/// grounded on, since it is threaded through every index and log line.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClientId(std::sync::Arc<str>);

impl ClientId {
	pub fn new(id: impl Into<std::sync::Arc<str>>) -> Self {
		Self(id.into())
	}

	pub fn as_str(&self) -> &str {
		&self.0
	}

	pub fn is_empty(&self) -> bool {
		self.0.is_empty()
	}
}

impl fmt::Display for ClientId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.0)
	}
}

impl From<&str> for ClientId {
	fn from(value: &str) -> Self {
		Self::new(value)
	}
}

impl From<String> for ClientId {
	fn from(value: String) -> Self {
		Self::new(value)
	}
}

/// Identity returned by the injected `TokenVerifier`. One user may hold
/// connections up to the configured per-user cap.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(std::sync::Arc<str>);

impl UserId {
	pub fn new(id: impl Into<std::sync::Arc<str>>) -> Self {
		Self(id.into())
	}

	pub fn as_str(&self) -> &str {
		&self.0
	}
}

impl fmt::Display for UserId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.0)
	}
}

/// Peer address after trusted-proxy header resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IpAddress(pub IpAddr);

impl fmt::Display for IpAddress {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		fmt::Display::fmt(&self.0, f)
	}
}

impl From<IpAddr> for IpAddress {
	fn from(value: IpAddr) -> Self {
		Self(value)
	}
}

/// Server-assigned identifier for a single live WebSocket connection,
/// distinct from the client-supplied `ClientId`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
	pub fn new() -> Self {
		Self(Uuid::new_v4())
	}
}

impl Default for ConnectionId {
	fn default() -> Self {
		Self::new()
	}
}

impl fmt::Display for ConnectionId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		fmt::Display::fmt(&self.0, f)
	}
}

/// Monotonic, process-unique identifier for a delivered frame. Used as
/// `last_message_id` for reconnect replay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(u64);

impl MessageId {
	pub fn next() -> Self {
		static COUNTER: AtomicU64 = AtomicU64::new(1);
		Self(COUNTER.fetch_add(1, Ordering::Relaxed))
	}

	pub fn value(self) -> u64 {
		self.0
	}
}

impl fmt::Display for MessageId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "msg-{}", self.0)
	}
}
