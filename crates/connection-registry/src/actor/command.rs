use chat_protocol::{CloseCode, OutboundFrame};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use chat_protocol::ConnectionState as Lifecycle;

use crate::sink::ConnectionSink;

/// Commands accepted by a connection actor's single mpsc queue. Every
/// mutation to a connection's state goes through here, so the actor never
/// needs its own lock (spec §4.C: "all mutations are guarded by ... a
/// single owning task per connection").
pub enum ConnectionCommand {
	/// `SendMessage`: writes a frame, replies whether the write succeeded.
	Send { frame: OutboundFrame, reply: oneshot::Sender<bool> },

	/// Marks the connection for disconnect with the given reason and close
	/// code, then exits the actor loop. Idempotent: a second `Disconnect`
	/// sent after the loop has already exited is simply dropped by the
	/// channel.
	Disconnect { code: CloseCode, reason: String },

	/// Hot-swaps the sink and resets the lifecycle to `Connected`, used by
	/// `Reconnect`.
	SwapSink { sink: Box<dyn ConnectionSink>, reply: oneshot::Sender<()> },

	RecordPong,

	SetState { state: Lifecycle },
	GetState { reply: oneshot::Sender<Lifecycle> },

	/// Atomic check-and-set: begins a stream only if none is active.
	TryBeginStream { token: CancellationToken, reply: oneshot::Sender<bool> },
	EndStream,
	ActiveStreamToken { reply: oneshot::Sender<Option<CancellationToken>> },

	LastPong { reply: oneshot::Sender<std::time::Instant> },
}
