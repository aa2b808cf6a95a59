use chat_protocol::{ClientId, CloseCode, ConnectionId, ConnectionState as Lifecycle, IpAddress, OutboundFrame, UserId};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use super::command::ConnectionCommand;
use super::ConnectionActor;
use crate::error::RegistryError;
use crate::sink::ConnectionSink;

/// Cheaply-cloneable reference to a running connection actor. Grounded on
/// `ws-connection/src/actor/handle.rs`'s `ConnectionHandle`.
#[derive(Clone, Debug)]
pub struct ConnectionHandle {
	pub connection_id: ConnectionId,
	pub client_id: ClientId,
	pub user_id: UserId,
	pub ip: IpAddress,
	sender: mpsc::Sender<ConnectionCommand>,
	cancel_token: CancellationToken,
}

impl ConnectionHandle {
	pub fn new(
		connection_id: ConnectionId,
		client_id: ClientId,
		user_id: UserId,
		ip: IpAddress,
		sink: Box<dyn ConnectionSink>,
		buffer_size: usize,
		parent_token: &CancellationToken,
	) -> (Self, ConnectionActor, CancellationToken) {
		let (sender, receiver) = mpsc::channel(buffer_size);
		let token = parent_token.child_token();
		let handle = Self {
			connection_id,
			client_id,
			user_id,
			ip,
			sender,
			cancel_token: token.clone(),
		};
		let actor = ConnectionActor::new(connection_id, sink, receiver);
		(handle, actor, token)
	}

	pub fn cancellation_token(&self) -> &CancellationToken {
		&self.cancel_token
	}

	pub async fn send(&self, frame: OutboundFrame) -> Result<bool, RegistryError> {
		let (reply, rx) = oneshot::channel();
		self
			.sender
			.send(ConnectionCommand::Send { frame, reply })
			.await
			.map_err(|_| RegistryError::ActorUnavailable)?;
		rx.await.map_err(|_| RegistryError::ActorUnavailable)
	}

	pub async fn disconnect(&self, code: CloseCode, reason: impl Into<String>) {
		let _ = self
			.sender
			.send(ConnectionCommand::Disconnect {
				code,
				reason: reason.into(),
			})
			.await;
		self.cancel_token.cancel();
	}

	pub async fn swap_sink(&self, sink: Box<dyn ConnectionSink>) -> Result<(), RegistryError> {
		let (reply, rx) = oneshot::channel();
		self
			.sender
			.send(ConnectionCommand::SwapSink { sink, reply })
			.await
			.map_err(|_| RegistryError::ActorUnavailable)?;
		rx.await.map_err(|_| RegistryError::ActorUnavailable)
	}

	pub async fn record_pong(&self) {
		let _ = self.sender.send(ConnectionCommand::RecordPong).await;
	}

	pub async fn last_pong(&self) -> Result<std::time::Instant, RegistryError> {
		let (reply, rx) = oneshot::channel();
		self.sender.send(ConnectionCommand::LastPong { reply }).await.map_err(|_| RegistryError::ActorUnavailable)?;
		rx.await.map_err(|_| RegistryError::ActorUnavailable)
	}

	pub async fn set_state(&self, state: Lifecycle) {
		let _ = self.sender.send(ConnectionCommand::SetState { state }).await;
	}

	pub async fn get_state(&self) -> Result<Lifecycle, RegistryError> {
		let (reply, rx) = oneshot::channel();
		self.sender.send(ConnectionCommand::GetState { reply }).await.map_err(|_| RegistryError::ActorUnavailable)?;
		rx.await.map_err(|_| RegistryError::ActorUnavailable)
	}

	/// Returns `false` without replacing anything if a stream is already
	/// active; the check-and-set is atomic because it is serialized through
	/// the actor's single command queue.
	pub async fn try_begin_stream(&self, token: CancellationToken) -> Result<bool, RegistryError> {
		let (reply, rx) = oneshot::channel();
		self
			.sender
			.send(ConnectionCommand::TryBeginStream { token, reply })
			.await
			.map_err(|_| RegistryError::ActorUnavailable)?;
		rx.await.map_err(|_| RegistryError::ActorUnavailable)
	}

	pub async fn end_stream(&self) {
		let _ = self.sender.send(ConnectionCommand::EndStream).await;
	}

	pub async fn active_stream_token(&self) -> Result<Option<CancellationToken>, RegistryError> {
		let (reply, rx) = oneshot::channel();
		self
			.sender
			.send(ConnectionCommand::ActiveStreamToken { reply })
			.await
			.map_err(|_| RegistryError::ActorUnavailable)?;
		rx.await.map_err(|_| RegistryError::ActorUnavailable)
	}
}
