pub mod command;
pub mod handle;
pub mod state;

pub use command::ConnectionCommand;
pub use handle::ConnectionHandle;
pub use state::ActorState;

use chat_protocol::ConnectionId;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::sink::ConnectionSink;

/// The per-connection actor (spec §4.C): owns the socket sink and all
/// mutable per-connection state, driven by a single mpsc queue. Grounded on
/// `ws-connection/src/actor.rs`'s `ConnectionActor`.
pub struct ConnectionActor {
	connection_id: ConnectionId,
	sink: Box<dyn ConnectionSink>,
	commands: mpsc::Receiver<ConnectionCommand>,
	state: ActorState,
}

impl std::fmt::Debug for ConnectionActor {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("ConnectionActor")
			.field("connection_id", &self.connection_id)
			.field("commands", &self.commands)
			.field("state", &self.state)
			.finish_non_exhaustive()
	}
}

impl ConnectionActor {
	pub fn new(connection_id: ConnectionId, sink: Box<dyn ConnectionSink>, commands: mpsc::Receiver<ConnectionCommand>) -> Self {
		Self {
			connection_id,
			sink,
			commands,
			state: ActorState::new(),
		}
	}

	pub async fn run(mut self) {
		while let Some(cmd) = self.commands.recv().await {
			match cmd {
				ConnectionCommand::Send { frame, reply } => {
					let ok = self.sink.send(&frame).await.is_ok();
					if !ok {
						warn!(connection_id = %self.connection_id, "write failed, connection will be dropped");
					}
					let _ = reply.send(ok);
				}
				ConnectionCommand::Disconnect { code, reason } => {
					self.sink.close(code, &reason).await;
					self.state.lifecycle = chat_protocol::ConnectionState::Disconnected;
					debug!(connection_id = %self.connection_id, %reason, "connection actor exiting");
					break;
				}
				ConnectionCommand::SwapSink { sink, reply } => {
					self.sink = sink;
					self.state.lifecycle = chat_protocol::ConnectionState::Connected;
					let _ = reply.send(());
				}
				ConnectionCommand::RecordPong => {
					self.state.last_pong = std::time::Instant::now();
				}
				ConnectionCommand::LastPong { reply } => {
					let _ = reply.send(self.state.last_pong);
				}
				ConnectionCommand::SetState { state } => {
					self.state.lifecycle = state;
				}
				ConnectionCommand::GetState { reply } => {
					let _ = reply.send(self.state.lifecycle);
				}
				ConnectionCommand::TryBeginStream { token, reply } => {
					if self.state.active_stream.is_some() {
						let _ = reply.send(false);
					} else {
						self.state.active_stream = Some(token);
						self.state.lifecycle = chat_protocol::ConnectionState::Streaming;
						let _ = reply.send(true);
					}
				}
				ConnectionCommand::EndStream => {
					self.state.active_stream = None;
					if self.state.lifecycle == chat_protocol::ConnectionState::Streaming {
						self.state.lifecycle = chat_protocol::ConnectionState::Connected;
					}
				}
				ConnectionCommand::ActiveStreamToken { reply } => {
					let _ = reply.send(self.state.active_stream.clone());
				}
			}
		}
	}
}
