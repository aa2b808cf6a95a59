//! Validation pipeline and type-routing table for inbound frames (spec
//! §4.E). Grounded on
//! `apps/servers/file_host/src/websocket/message/handlers.rs`'s
//! `handle_websocket_message`, generalized from a fixed `Message` variant
//! match to the spec's `type`-string routing table.

mod config;
mod emitter;

use std::sync::Arc;

use chat_protocol::{ChatAlias, ClientId, ConnectionState, InboundEnvelope, IpAddress, MessageId, OutboundFrame, UserId};
use connection_registry::ConnectionRegistry;
use rate_limiter::RateLimiter;
use stream_engine::StreamEngine;
use tracing::warn;

pub use config::DispatcherConfig;
use emitter::HandleEmitter;

pub struct MessageDispatcher {
	registry: Arc<ConnectionRegistry>,
	rate_limiter: Arc<RateLimiter>,
	stream_engine: Arc<StreamEngine>,
	config: DispatcherConfig,
}

impl MessageDispatcher {
	pub fn new(registry: Arc<ConnectionRegistry>, rate_limiter: Arc<RateLimiter>, stream_engine: Arc<StreamEngine>, config: DispatcherConfig) -> Self {
		Self {
			registry,
			rate_limiter,
			stream_engine,
			config,
		}
	}

	/// Runs the full validation pipeline over one inbound text frame and
	/// routes it, per spec §4.E's five steps. Never closes the connection on
	/// its own; callers (the receive loop) close on a transport-level error,
	/// not on anything this function decides.
	pub async fn dispatch(&self, client_id: &ClientId, class: &str, raw: &str) {
		let Some(handle) = self.registry.get(client_id) else {
			return;
		};

		let envelope: InboundEnvelope = match serde_json::from_str(raw) {
			Ok(envelope) => envelope,
			Err(err) => {
				warn!(client_id = %client_id, error = %err, "invalid JSON frame");
				self.registry.send_message(client_id, OutboundFrame::error("invalid JSON")).await;
				return;
			}
		};

		if envelope.kind.trim().is_empty() {
			self.registry.send_message(client_id, OutboundFrame::error("missing message type")).await;
			return;
		}

		match handle.get_state().await {
			Ok(state) if state.accepts_frames() => {}
			_ => {
				self.registry.send_message(client_id, OutboundFrame::error("connection is not ready to accept messages")).await;
				return;
			}
		}

		let is_system = envelope.kind == "system";
		let decision = self.rate_limiter.check_message_limit(client_id.as_str(), handle.user_id.as_str(), &handle.ip.to_string(), class, is_system).await;
		if !decision.allow {
			let reason = decision.reason.unwrap_or_else(|| "rate limit exceeded".to_string());
			self.registry.send_message(client_id, OutboundFrame::error(reason)).await;
			return;
		}
		if let Err(err) = self.rate_limiter.increment_message_count(client_id.as_str(), handle.user_id.as_str(), &handle.ip.to_string()).await {
			warn!(error = %err, "failed to increment message count");
		}

		self.route(&handle, client_id, &handle.user_id.clone(), &handle.ip, &envelope).await;
	}

	async fn route(&self, handle: &connection_registry::actor::ConnectionHandle, client_id: &ClientId, user_id: &UserId, _ip: &IpAddress, envelope: &InboundEnvelope) {
		match envelope.kind.as_str() {
			"ping" => {
				self.registry.send_message(client_id, OutboundFrame::Pong { timestamp: chrono::Utc::now() }).await;
			}
			"pong" => {
				handle.record_pong().await;
			}
			"chat" | "chat_message" => {
				let alias = ChatAlias::from_wire_type(&envelope.kind).expect("matched above");
				let content = envelope.content_as_str().unwrap_or_default();
				if content.is_empty() {
					self.registry.send_message(client_id, OutboundFrame::error("message content must not be empty")).await;
					return;
				}
				if content.len() > self.config.max_message_length {
					self.registry.send_message(client_id, OutboundFrame::error("message size exceeds limit")).await;
					return;
				}
				let frame = OutboundFrame::Chat {
					alias,
					content: content.to_string(),
					user_id: Some(user_id.to_string()),
					client_id: Some(client_id.to_string()),
					message_id: Some(MessageId::next()),
					metadata: envelope.metadata.clone(),
					timestamp: chrono::Utc::now(),
				};
				self.registry.broadcast(frame, None).await;
			}
			"typing" => {
				let content = envelope.content_as_str().unwrap_or_default().to_string();
				self.registry.send_message(client_id, OutboundFrame::Typing { content, metadata: envelope.metadata.clone() }).await;
			}
			"system" => {
				self
					.registry
					.send_message(client_id, OutboundFrame::System { content: serde_json::json!("ok"), metadata: envelope.metadata.clone() })
					.await;
			}
			"stream_start" => self.handle_stream_start(handle, client_id, envelope).await,
			"stream" => {
				match handle.get_state().await {
					Ok(ConnectionState::Streaming) => {
						let text = envelope.content_as_str().unwrap_or_default().to_string();
						self.registry.broadcast(OutboundFrame::Stream { text, metadata: envelope.metadata.clone() }, None).await;
					}
					_ => {
						self.registry.send_message(client_id, OutboundFrame::error("stream relay is only valid while streaming")).await;
					}
				}
			}
			"stream_end" => {
				if let Ok(Some(token)) = handle.active_stream_token().await {
					token.cancel();
				}
				handle.end_stream().await;
			}
			other => {
				warn!(client_id = %client_id, kind = other, "unknown message type");
				self.registry.send_message(client_id, OutboundFrame::error("unknown message type")).await;
			}
		}
	}

	async fn handle_stream_start(&self, handle: &connection_registry::actor::ConnectionHandle, client_id: &ClientId, envelope: &InboundEnvelope) {
		let content = envelope.content_as_str().unwrap_or_default();
		if content.is_empty() {
			self.registry.send_message(client_id, OutboundFrame::error("stream_start requires non-empty content")).await;
			return;
		}

		let token = handle.cancellation_token().child_token();
		match handle.try_begin_stream(token.clone()).await {
			Ok(true) => {}
			_ => {
				self.registry.send_message(client_id, OutboundFrame::error("active stream already in progress")).await;
				return;
			}
		}

		let engine = self.stream_engine.clone();
		let emitter = HandleEmitter::new(self.registry.clone(), client_id.clone());
		let prompt = content.to_string();
		let metadata = envelope.metadata.clone();
		let handle_for_cleanup = handle.clone();
		tokio::spawn(async move {
			engine.run(&emitter, prompt, metadata, token).await;
			handle_for_cleanup.end_stream().await;
		});
	}
}

#[cfg(test)]
mod tests {
	use std::sync::{Arc, Mutex};
	use std::time::Duration;

	use async_trait::async_trait;
	use chat_protocol::CloseCode;
	use connection_registry::{ConnectionSink, SinkError};
	use kv_store::InMemoryStore;
	use rate_limiter::RateLimiterConfig;
	use stream_engine::{StreamConfig, SyntheticModelClient};

	use super::*;

	#[derive(Default)]
	struct RecordingSink {
		frames: Arc<Mutex<Vec<OutboundFrame>>>,
	}

	#[async_trait]
	impl ConnectionSink for RecordingSink {
		async fn send(&mut self, frame: &OutboundFrame) -> Result<(), SinkError> {
			self.frames.lock().unwrap().push(frame.clone());
			Ok(())
		}
		async fn close(&mut self, _code: CloseCode, _reason: &str) {}
	}

	#[derive(Default)]
	struct DeadSink;

	#[async_trait]
	impl ConnectionSink for DeadSink {
		async fn send(&mut self, _frame: &OutboundFrame) -> Result<(), SinkError> {
			Err(SinkError("connection reset".into()))
		}
		async fn close(&mut self, _code: CloseCode, _reason: &str) {}
	}

	fn dispatcher() -> (MessageDispatcher, Arc<ConnectionRegistry>) {
		let store = Arc::new(InMemoryStore::new());
		let limiter = Arc::new(RateLimiter::new(store, RateLimiterConfig::default()));
		let registry = Arc::new(ConnectionRegistry::new(limiter.clone(), 100));
		let engine = Arc::new(StreamEngine::new(Arc::new(SyntheticModelClient::new(4)), StreamConfig { chunk_delay: Duration::from_millis(1) }));
		let dispatcher = MessageDispatcher::new(registry.clone(), limiter, engine, DispatcherConfig::default());
		(dispatcher, registry)
	}

	async fn connect(registry: &ConnectionRegistry, client_id: &str) -> (ClientId, Arc<Mutex<Vec<OutboundFrame>>>) {
		let id = ClientId::from(client_id);
		let frames = Arc::new(Mutex::new(Vec::new()));
		let sink = RecordingSink { frames: frames.clone() };
		let ip = IpAddress::from("127.0.0.1".parse::<std::net::IpAddr>().unwrap());
		let (handle, actor, _) = registry.connect(id.clone(), UserId::new("u1"), ip, Box::new(sink), 16).unwrap();
		handle.set_state(ConnectionState::Connected).await;
		tokio::spawn(actor.run());
		(id, frames)
	}

	#[tokio::test]
	async fn ping_receives_pong() {
		let (dispatcher, registry) = dispatcher();
		let (client, frames) = connect(&registry, "c1").await;

		dispatcher.dispatch(&client, "authenticated", r#"{"type":"ping"}"#).await;

		assert!(matches!(frames.lock().unwrap().last(), Some(OutboundFrame::Pong { .. })));
	}

	#[tokio::test]
	async fn unknown_type_sends_error_without_closing() {
		let (dispatcher, registry) = dispatcher();
		let (client, frames) = connect(&registry, "c1").await;

		dispatcher.dispatch(&client, "authenticated", r#"{"type":"frobnicate"}"#).await;

		assert!(matches!(frames.lock().unwrap().last(), Some(OutboundFrame::Error { .. })));
		assert!(registry.get(&client).is_some());
	}

	#[tokio::test]
	async fn chat_is_broadcast_to_all_including_sender() {
		let (dispatcher, registry) = dispatcher();
		let (client_a, frames_a) = connect(&registry, "a").await;
		let (_client_b, frames_b) = connect(&registry, "b").await;

		dispatcher.dispatch(&client_a, "authenticated", r#"{"type":"chat","content":"hello"}"#).await;

		let has_chat = |frames: &[OutboundFrame]| frames.iter().any(|f| matches!(f, OutboundFrame::Chat { content, .. } if content == "hello"));
		assert!(has_chat(&frames_a.lock().unwrap()));
		assert!(has_chat(&frames_b.lock().unwrap()));
	}

	#[tokio::test]
	async fn chat_message_synonym_echoes_under_its_own_tag() {
		let (dispatcher, registry) = dispatcher();
		let (client, frames) = connect(&registry, "c1").await;

		dispatcher.dispatch(&client, "authenticated", r#"{"type":"chat_message","content":"hi"}"#).await;

		let json = serde_json::to_value(frames.lock().unwrap().last().unwrap()).unwrap();
		assert_eq!(json["type"], "chat_message");
	}

	#[tokio::test]
	async fn oversized_chat_content_is_rejected() {
		let (dispatcher, registry) = dispatcher();
		let (client, frames) = connect(&registry, "c1").await;
		let oversized = "a".repeat(DispatcherConfig::default().max_message_length + 1);

		dispatcher.dispatch(&client, "authenticated", &serde_json::json!({"type": "chat", "content": oversized}).to_string()).await;

		match frames.lock().unwrap().last() {
			Some(OutboundFrame::Error { content, .. }) => assert_eq!(content, "message size exceeds limit"),
			other => panic!("expected an error frame, got {other:?}"),
		};
	}

	#[tokio::test]
	async fn invalid_json_sends_error() {
		let (dispatcher, registry) = dispatcher();
		let (client, frames) = connect(&registry, "c1").await;

		dispatcher.dispatch(&client, "authenticated", "not json").await;

		assert!(matches!(frames.lock().unwrap().last(), Some(OutboundFrame::Error { .. })));
	}

	#[tokio::test]
	async fn second_stream_start_while_streaming_is_rejected() {
		let (dispatcher, registry) = dispatcher();
		let (client, frames) = connect(&registry, "c1").await;

		dispatcher.dispatch(&client, "authenticated", r#"{"type":"stream_start","content":"tell me a story"}"#).await;
		dispatcher.dispatch(&client, "authenticated", r#"{"type":"stream_start","content":"another one"}"#).await;

		tokio::time::sleep(Duration::from_millis(20)).await;
		let snapshot = frames.lock().unwrap().clone();
		let rejections = snapshot.iter().filter(|f| matches!(f, OutboundFrame::Error { content, .. } if content.contains("already in progress"))).count();
		assert_eq!(rejections, 1);
	}

	#[tokio::test]
	async fn stream_write_failure_disconnects_the_connection() {
		let (dispatcher, registry) = dispatcher();
		let id = ClientId::from("c1");
		let ip = IpAddress::from("127.0.0.1".parse::<std::net::IpAddr>().unwrap());
		let (handle, actor, _) = registry.connect(id.clone(), UserId::new("u1"), ip, Box::new(DeadSink), 16).unwrap();
		handle.set_state(ConnectionState::Connected).await;
		tokio::spawn(actor.run());

		dispatcher.dispatch(&id, "authenticated", r#"{"type":"stream_start","content":"tell me a story"}"#).await;

		tokio::time::sleep(Duration::from_millis(20)).await;
		assert!(registry.get(&id).is_none());
	}
}
