use std::sync::Arc;

use async_trait::async_trait;
use chat_protocol::{ClientId, OutboundFrame};
use connection_registry::ConnectionRegistry;
use stream_engine::FrameEmitter;

/// Adapts a `ConnectionRegistry` lookup to `stream-engine`'s transport-agnostic
/// `FrameEmitter`, so that crate never has to depend on `connection-registry`.
///
/// Goes through `ConnectionRegistry::send_message` rather than writing to a
/// `ConnectionHandle` directly, so a dead socket discovered mid-stream
/// disconnects and releases its rate-limiter accounting immediately instead
/// of waiting for the receive loop to notice independently (the same
/// single-disconnect-path rule every other emit path already follows).
pub struct HandleEmitter {
	registry: Arc<ConnectionRegistry>,
	client_id: ClientId,
}

impl HandleEmitter {
	pub fn new(registry: Arc<ConnectionRegistry>, client_id: ClientId) -> Self {
		Self { registry, client_id }
	}
}

#[async_trait]
impl FrameEmitter for HandleEmitter {
	async fn emit(&self, frame: OutboundFrame) -> bool {
		self.registry.send_message(&self.client_id, frame).await
	}
}
