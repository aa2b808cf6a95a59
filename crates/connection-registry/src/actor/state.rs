use std::time::Instant;

use chat_protocol::ConnectionState as Lifecycle;
use tokio_util::sync::CancellationToken;

/// Actor-owned mutable state, never shared outside the actor loop.
#[derive(Debug)]
pub struct ActorState {
	pub lifecycle: Lifecycle,
	pub last_pong: Instant,
	pub active_stream: Option<CancellationToken>,
}

impl ActorState {
	pub fn new() -> Self {
		Self {
			lifecycle: Lifecycle::Connecting,
			last_pong: Instant::now(),
			active_stream: None,
		}
	}
}

impl Default for ActorState {
	fn default() -> Self {
		Self::new()
	}
}
