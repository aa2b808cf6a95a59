use async_trait::async_trait;
use chat_protocol::{CloseCode, OutboundFrame};

/// The write half of a connection, abstracted away from any particular
/// transport. Grounded on `ws-connection`'s split between the actor (owns
/// state, never touches I/O directly) and the socket it was handed at
/// construction; `apps/gateway` supplies the concrete implementation that
/// wraps an Axum `WebSocket` sink, and tests supply an in-memory double.
#[async_trait]
pub trait ConnectionSink: Send + Sync {
	async fn send(&mut self, frame: &OutboundFrame) -> Result<(), SinkError>;
	async fn close(&mut self, code: CloseCode, reason: &str);
}

#[derive(Debug, thiserror::Error)]
#[error("failed to write to connection socket: {0}")]
pub struct SinkError(pub String);
