use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use chat_protocol::{ClientId, CloseCode, ConnectionId, ConnectionState as Lifecycle, IpAddress, MessageId, OutboundFrame, UserId};
use dashmap::DashMap;
use rate_limiter::RateLimiter;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::actor::ConnectionHandle;
use crate::error::RegistryError;
use crate::sink::ConnectionSink;

#[derive(Clone)]
struct HistoryEntry {
	message_id: MessageId,
	frame: Arc<OutboundFrame>,
}

#[derive(Debug, Clone, Copy)]
pub struct RegistryStats {
	pub active_connections: usize,
	pub message_history_length: usize,
}

/// Tracks every live connection by three independent indices, plus a bounded
/// replay buffer, and owns the single `Disconnect` path that also releases
/// the rate limiter's connection accounting (spec §4.C). Grounded on
/// `ws-connection::core::manager::ConnectionManager`'s `DashMap`-backed
/// indices fronting per-connection actors.
pub struct ConnectionRegistry {
	by_client: DashMap<ClientId, ConnectionHandle>,
	by_user: DashMap<UserId, HashSet<ClientId>>,
	by_ip: DashMap<IpAddress, HashSet<ClientId>>,
	history: Mutex<VecDeque<HistoryEntry>>,
	history_capacity: usize,
	rate_limiter: Arc<RateLimiter>,
	root_token: CancellationToken,
}

impl ConnectionRegistry {
	pub fn new(rate_limiter: Arc<RateLimiter>, history_capacity: usize) -> Self {
		Self {
			by_client: DashMap::new(),
			by_user: DashMap::new(),
			by_ip: DashMap::new(),
			history: Mutex::new(VecDeque::with_capacity(history_capacity.min(4096))),
			history_capacity,
			rate_limiter,
			root_token: CancellationToken::new(),
		}
	}

	pub fn root_token(&self) -> &CancellationToken {
		&self.root_token
	}

	pub fn get(&self, client_id: &ClientId) -> Option<ConnectionHandle> {
		self.by_client.get(client_id).map(|entry| entry.value().clone())
	}

	/// `Connect`: rejects a duplicate `client_id` outright (the caller should
	/// have already closed the old socket via `Reconnect` if that was the
	/// intent). Caller is responsible for having already called
	/// `CheckConnectionLimit`/`IncrementConnectionCount` on the rate limiter.
	pub fn connect(
		&self,
		client_id: ClientId,
		user_id: UserId,
		ip: IpAddress,
		sink: Box<dyn ConnectionSink>,
		command_buffer: usize,
	) -> Result<(ConnectionHandle, crate::actor::ConnectionActor, CancellationToken), RegistryError> {
		if self.by_client.contains_key(&client_id) {
			return Err(RegistryError::AlreadyConnected(client_id.to_string()));
		}
		let connection_id = ConnectionId::new();
		let (handle, actor, token) = ConnectionHandle::new(connection_id, client_id.clone(), user_id.clone(), ip, sink, command_buffer, &self.root_token);

		self.by_client.insert(client_id.clone(), handle.clone());
		self.by_user.entry(user_id).or_default().insert(client_id.clone());
		self.by_ip.entry(ip).or_default().insert(client_id);

		info!(connection_id = %connection_id, "connection registered");
		Ok((handle, actor, token))
	}

	/// `Disconnect`: idempotent. The only place `ReleaseConnection` is called
	/// from (spec §9 open question resolution, see DESIGN.md).
	pub async fn disconnect(&self, client_id: &ClientId, code: CloseCode, reason: &str) {
		let Some((_, handle)) = self.by_client.remove(client_id) else {
			return;
		};
		if let Some(mut set) = self.by_user.get_mut(&handle.user_id) {
			set.remove(client_id);
		}
		if let Some(mut set) = self.by_ip.get_mut(&handle.ip) {
			set.remove(client_id);
		}
		handle.disconnect(code, reason.to_string()).await;

		if let Err(err) = self.rate_limiter.release_connection(client_id.as_str(), handle.user_id.as_str(), &handle.ip.to_string()).await {
			warn!(error = %err, client_id = %client_id, "failed to release connection accounting");
		}
		info!(client_id = %client_id, %reason, "connection disconnected");
	}

	/// `SendMessage`: on write failure, schedules a disconnect instead of
	/// propagating the error, since a dead socket is this connection's
	/// problem alone.
	pub async fn send_message(&self, client_id: &ClientId, frame: OutboundFrame) -> bool {
		let Some(handle) = self.get(client_id) else {
			return false;
		};
		match handle.send(frame.clone()).await {
			Ok(true) => {
				self.record_history(frame).await;
				true
			}
			_ => {
				self.disconnect(client_id, CloseCode::Abnormal, "write failed").await;
				false
			}
		}
	}

	async fn record_history(&self, frame: OutboundFrame) {
		if !frame.is_replayable() {
			return;
		}
		let mut history = self.history.lock().await;
		history.push_back(HistoryEntry {
			message_id: MessageId::next(),
			frame: Arc::new(frame),
		});
		while history.len() > self.history_capacity {
			history.pop_front();
		}
	}

	/// `Broadcast`: a snapshot of live handles is taken up front so a
	/// concurrent connect/disconnect never observes a torn iteration;
	/// per-client failures do not abort the rest.
	pub async fn broadcast(&self, frame: OutboundFrame, exclude: Option<&ClientId>) {
		let targets: Vec<ConnectionHandle> = self
			.by_client
			.iter()
			.filter(|entry| exclude.map_or(true, |excluded| entry.key() != excluded))
			.map(|entry| entry.value().clone())
			.collect();

		for handle in targets {
			let ok = handle.send(frame.clone()).await.unwrap_or(false);
			if !ok {
				self.disconnect(&handle.client_id.clone(), CloseCode::Abnormal, "broadcast write failed").await;
			}
		}
		self.record_history(frame).await;
	}

	/// `Reconnect`: validates the user id against the existing connection,
	/// swaps the socket in place, and replays any history strictly newer
	/// than `last_message_id`. A `last_message_id` outside the retained
	/// window replays nothing, to avoid gaps presenting as contiguous.
	pub async fn reconnect(&self, client_id: &ClientId, user_id: &UserId, sink: Box<dyn ConnectionSink>, last_message_id: Option<MessageId>) -> Result<(), RegistryError> {
		let handle = self.get(client_id).ok_or_else(|| RegistryError::NotConnected(client_id.to_string()))?;
		if &handle.user_id != user_id {
			return Err(RegistryError::UserMismatch);
		}
		handle.set_state(Lifecycle::Connecting).await;
		handle.swap_sink(sink).await?;
		handle.set_state(Lifecycle::Connected).await;

		let replay = self.replay_since(last_message_id).await;
		for frame in replay {
			let _ = handle.send((*frame).clone()).await;
		}
		Ok(())
	}

	async fn replay_since(&self, last_message_id: Option<MessageId>) -> Vec<Arc<OutboundFrame>> {
		let history = self.history.lock().await;
		match last_message_id {
			None => history.iter().map(|entry| entry.frame.clone()).collect(),
			Some(last) => {
				if !history.iter().any(|entry| entry.message_id == last) {
					return Vec::new();
				}
				history.iter().filter(|entry| entry.message_id > last).map(|entry| entry.frame.clone()).collect()
			}
		}
	}

	/// Actively tears down every live connection through the normal
	/// `Disconnect` path (process shutdown, spec §10 supplement), rather than
	/// waiting for clients to close on their own. Snapshot-then-iterate for
	/// the same reason as `broadcast`: a concurrent connect must not be able
	/// to race past this and be left dangling.
	pub async fn disconnect_all(&self, code: CloseCode, reason: &str) {
		let client_ids: Vec<ClientId> = self.by_client.iter().map(|entry| entry.key().clone()).collect();
		for client_id in client_ids {
			self.disconnect(&client_id, code, reason).await;
		}
	}

	/// `Stats`: a point-in-time snapshot (spec §4.C / `/ws/status`).
	pub async fn stats(&self) -> RegistryStats {
		RegistryStats {
			active_connections: self.by_client.len(),
			message_history_length: self.history.lock().await.len(),
		}
	}
}
