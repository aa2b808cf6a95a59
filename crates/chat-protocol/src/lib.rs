//! Shared wire types for the chat gateway: connection identifiers, the frame
//! envelope, and the canonical close-code/error taxonomy.
//!
//! Every other crate in this workspace depends on `chat-protocol` rather than
//! on `serde_json::Value` directly, so that the frame schema has exactly one
//! place of truth.

mod error;
mod frame;
mod types;

pub use error::{CloseCode, ProtocolError};
pub use frame::{ChatAlias, InboundEnvelope, OutboundFrame};
pub use types::{ClientId, ConnectionId, IpAddress, MessageId, UserId};

/// Connection lifecycle state, shared by the registry and the dispatcher.
///
/// Transitions follow §3 of the design: CONNECTING -> CONNECTED -> STREAMING
/// -> CONNECTED (loop), and any of those -> DISCONNECTING -> DISCONNECTED.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
	Connecting,
	Connected,
	Streaming,
	Disconnecting,
	Disconnected,
}

impl ConnectionState {
	/// Whether a connection in this state may have inbound frames routed to it.
	pub fn accepts_frames(self) -> bool {
		matches!(self, Self::Connected | Self::Streaming)
	}
}

impl std::fmt::Display for ConnectionState {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		let s = match self {
			Self::Connecting => "CONNECTING",
			Self::Connected => "CONNECTED",
			Self::Streaming => "STREAMING",
			Self::Disconnecting => "DISCONNECTING",
			Self::Disconnected => "DISCONNECTED",
		};
		f.write_str(s)
	}
}
