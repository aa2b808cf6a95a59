//! Drives the `stream_start` / `stream` / `stream_end` sequence against an
//! injected [`ModelClient`] (spec §4.F).
//!
//! Grounded on `ws-events/src/stream_orch/tick.rs`'s `TickEngine`: a
//! `tokio::select!` loop over a ticker, a command channel, and a
//! cancellation token, driving an external sink via `watch`/callbacks rather
//! than owning the sink itself. Here the "tick" is "the next chunk is ready"
//! and the "command channel" collapses to a single cancellation token, since
//! a stream accepts no commands once started other than `stream_end`/drop.

mod error;
mod synthetic;

use std::time::Duration;

use async_trait::async_trait;
use chat_protocol::OutboundFrame;
use futures::stream::BoxStream;
use futures::StreamExt;
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

pub use error::StreamError;
pub use synthetic::SyntheticModelClient;

/// A single text chunk, or the terminal error that ended the stream early.
pub type ChunkResult = Result<String, StreamError>;

/// Deliberately narrow: one method producing a boxed async stream of chunks
/// for a prompt, so a production HTTP-backed client and
/// [`SyntheticModelClient`] are interchangeable (spec §4.F).
#[async_trait]
pub trait ModelClient: Send + Sync {
	async fn stream(&self, prompt: &str) -> Result<BoxStream<'static, ChunkResult>, StreamError>;
}

/// The write side `StreamEngine` emits frames through. Deliberately its own
/// trait rather than a dependency on `connection-registry`'s `ConnectionSink`,
/// so this crate has no knowledge of how (or whether) a socket is involved;
/// `message-dispatcher` adapts a `ConnectionHandle` to this trait.
#[async_trait]
pub trait FrameEmitter: Send + Sync {
	/// Returns `false` if the frame could not be delivered (e.g. the
	/// connection has gone away); the stream loop treats that the same as a
	/// cancellation, just without sending any further frames.
	async fn emit(&self, frame: OutboundFrame) -> bool;
}

#[derive(Debug, Clone)]
pub struct StreamConfig {
	/// Delay between emitted chunks, to approximate natural streaming and
	/// give pongs/cancellation a chance to interleave (spec §4.F: "~50ms").
	pub chunk_delay: Duration,
}

impl Default for StreamConfig {
	fn default() -> Self {
		Self { chunk_delay: Duration::from_millis(50) }
	}
}

pub struct StreamEngine {
	model: std::sync::Arc<dyn ModelClient>,
	config: StreamConfig,
}

impl StreamEngine {
	pub fn new(model: std::sync::Arc<dyn ModelClient>, config: StreamConfig) -> Self {
		Self { model, config }
	}

	/// Runs one full stream to completion or cancellation. The caller is
	/// responsible for having already reserved the single-flight slot (spec
	/// §4.F: a connection registry's `TryBeginStream` does that, atomically,
	/// before this is called) and for releasing it once this returns.
	pub async fn run(&self, emitter: &dyn FrameEmitter, prompt: String, metadata: Map<String, Value>, cancel: CancellationToken) {
		if !emitter.emit(OutboundFrame::StreamStart { metadata: metadata.clone() }).await {
			return;
		}

		let mut chunks = match self.model.stream(&prompt).await {
			Ok(chunks) => chunks,
			Err(err) => {
				warn!(error = %err, "model client failed to start stream");
				emitter.emit(OutboundFrame::error_typed(err.to_string(), "stream_error")).await;
				return;
			}
		};

		loop {
			let next = tokio::select! {
				_ = cancel.cancelled() => {
					debug!("stream cancelled");
					return;
				}
				chunk = chunks.next() => chunk,
			};

			let Some(chunk) = next else {
				// Stream exhausted normally.
				emitter.emit(OutboundFrame::StreamEnd).await;
				return;
			};

			match chunk {
				Ok(text) => {
					if !emitter.emit(OutboundFrame::Stream { text, metadata: metadata.clone() }).await {
						debug!("stream write failed, stopping without stream_end");
						return;
					}
				}
				Err(err) => {
					warn!(error = %err, "model stream errored mid-stream");
					emitter.emit(OutboundFrame::error_typed(err.to_string(), "stream_error")).await;
					return;
				}
			}

			tokio::select! {
				_ = cancel.cancelled() => return,
				_ = tokio::time::sleep(self.config.chunk_delay) => {}
			}
		}
	}
}

#[cfg(test)]
mod tests {
	use std::sync::{Arc, Mutex};

	use super::*;

	#[derive(Default)]
	struct RecordingEmitter {
		frames: Arc<Mutex<Vec<OutboundFrame>>>,
	}

	#[async_trait]
	impl FrameEmitter for RecordingEmitter {
		async fn emit(&self, frame: OutboundFrame) -> bool {
			self.frames.lock().unwrap().push(frame);
			true
		}
	}

	fn texts(frames: &[OutboundFrame]) -> Vec<String> {
		frames
			.iter()
			.filter_map(|f| match f {
				OutboundFrame::Stream { text, .. } => Some(text.clone()),
				_ => None,
			})
			.collect()
	}

	#[tokio::test(start_paused = true)]
	async fn emits_start_chunks_then_end_on_normal_completion() {
		let engine = StreamEngine::new(Arc::new(SyntheticModelClient::new(3)), StreamConfig { chunk_delay: Duration::from_millis(10) });
		let emitter = RecordingEmitter::default();
		let frames = emitter.frames.clone();

		engine.run(&emitter, "hello world".into(), Map::new(), CancellationToken::new()).await;

		let collected = frames.lock().unwrap().clone();
		assert!(matches!(collected.first(), Some(OutboundFrame::StreamStart { .. })));
		assert!(matches!(collected.last(), Some(OutboundFrame::StreamEnd)));
		assert_eq!(texts(&collected).concat(), "hello world");
	}

	#[tokio::test(start_paused = true)]
	async fn cancellation_stops_without_stream_end() {
		let engine = StreamEngine::new(Arc::new(SyntheticModelClient::new(2)), StreamConfig { chunk_delay: Duration::from_millis(100) });
		let emitter = RecordingEmitter::default();
		let frames = emitter.frames.clone();
		let cancel = CancellationToken::new();

		let cancel_clone = cancel.clone();
		let handle = tokio::spawn(async move {
			engine.run(&emitter, "abcdef".into(), Map::new(), cancel_clone).await;
		});

		tokio::time::advance(Duration::from_millis(5)).await;
		cancel.cancel();
		handle.await.unwrap();

		let collected = frames.lock().unwrap().clone();
		assert!(!matches!(collected.last(), Some(OutboundFrame::StreamEnd)));
	}
}
