//! Dedicated per-connection ping/pong task (spec §4.D). Grounded on
//! `ws-connection`'s pattern of giving liveness tracking its own task that
//! talks back to the owning actor through the same command channel the
//! receive loop uses, rather than touching registry state directly.

use std::time::Duration;

use chat_protocol::{CloseCode, OutboundFrame};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::actor::ConnectionHandle;

pub struct HeartbeatConfig {
	pub ping_interval: Duration,
	pub ping_timeout: Duration,
}

impl Default for HeartbeatConfig {
	fn default() -> Self {
		Self {
			ping_interval: Duration::from_secs(20),
			ping_timeout: Duration::from_secs(10),
		}
	}
}

/// Runs until `token` is cancelled or a pong isn't observed within
/// `ping_timeout` of the most recent ping, in which case it disconnects the
/// connection with a policy-violation close and returns.
pub async fn run(handle: ConnectionHandle, config: HeartbeatConfig, token: CancellationToken) {
	loop {
		let sent_at = std::time::Instant::now();
		let ping = OutboundFrame::Ping { timestamp: chrono::Utc::now() };
		match handle.send(ping).await {
			Ok(true) => {}
			_ => {
				debug!(connection_id = %handle.connection_id, "heartbeat send failed, stopping");
				return;
			}
		}

		tokio::select! {
			_ = token.cancelled() => return,
			_ = tokio::time::sleep(config.ping_timeout) => {}
		}

		match handle.last_pong().await {
			Ok(last_pong) if last_pong >= sent_at => {}
			_ => {
				debug!(connection_id = %handle.connection_id, "pong timeout, disconnecting");
				handle.disconnect(CloseCode::PolicyViolation, "heartbeat timeout").await;
				return;
			}
		}

		let remaining = config.ping_interval.saturating_sub(config.ping_timeout);
		if !remaining.is_zero() {
			tokio::select! {
				_ = token.cancelled() => return,
				_ = tokio::time::sleep(remaining) => {}
			}
		}
	}
}

#[cfg(test)]
mod tests {
	use std::sync::{Arc, Mutex};

	use async_trait::async_trait;
	use chat_protocol::{ClientId, IpAddress, UserId};

	use super::*;
	use crate::sink::{ConnectionSink, SinkError};

	#[derive(Default)]
	struct CountingSink {
		pings: Arc<Mutex<u32>>,
	}

	#[async_trait]
	impl ConnectionSink for CountingSink {
		async fn send(&mut self, frame: &OutboundFrame) -> Result<(), SinkError> {
			if matches!(frame, OutboundFrame::Ping { .. }) {
				*self.pings.lock().unwrap() += 1;
			}
			Ok(())
		}
		async fn close(&mut self, _code: CloseCode, _reason: &str) {}
	}

	#[tokio::test(start_paused = true)]
	async fn disconnects_after_missed_pong() {
		let pings = Arc::new(Mutex::new(0));
		let root = CancellationToken::new();
		let (handle, actor, _) = ConnectionHandle::new(
			chat_protocol::ConnectionId::new(),
			ClientId::from("c1"),
			UserId::new("u1"),
			IpAddress::from("127.0.0.1".parse::<std::net::IpAddr>().unwrap()),
			Box::new(CountingSink { pings: pings.clone() }),
			8,
			&root,
		);
		tokio::spawn(actor.run());

		let config = HeartbeatConfig {
			ping_interval: Duration::from_secs(20),
			ping_timeout: Duration::from_secs(5),
		};
		let token = root.child_token();
		let join = tokio::spawn(run(handle.clone(), config, token));

		tokio::time::advance(Duration::from_secs(6)).await;
		join.await.unwrap();

		assert_eq!(*pings.lock().unwrap(), 1);
		// The actor's command channel is closed once it exits on disconnect.
		assert!(handle.get_state().await.is_err());
	}
}
