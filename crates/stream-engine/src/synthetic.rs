use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::{ChunkResult, ModelClient, StreamError};

/// Test/demo double: chunks the request's own content by a fixed size
/// instead of calling out to a real model backend (spec §4.F).
pub struct SyntheticModelClient {
	chunk_size: usize,
}

impl SyntheticModelClient {
	pub fn new(chunk_size: usize) -> Self {
		Self { chunk_size: chunk_size.max(1) }
	}
}

impl Default for SyntheticModelClient {
	fn default() -> Self {
		Self::new(8)
	}
}

#[async_trait]
impl ModelClient for SyntheticModelClient {
	async fn stream(&self, prompt: &str) -> Result<BoxStream<'static, ChunkResult>, StreamError> {
		let chunks: Vec<ChunkResult> = prompt.chars().collect::<Vec<_>>().chunks(self.chunk_size).map(|slice| Ok(slice.iter().collect::<String>())).collect();
		Ok(Box::pin(tokio_stream::iter(chunks)))
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use futures::StreamExt;

	#[tokio::test]
	async fn chunks_content_by_fixed_size() {
		let client = SyntheticModelClient::new(3);
		let chunks: Vec<_> = client.stream("hello world").await.unwrap().map(|c| c.unwrap()).collect().await;
		assert_eq!(chunks, vec!["hel", "lo ", "wor", "ld"]);
	}

	#[tokio::test]
	async fn empty_prompt_yields_no_chunks() {
		let client = SyntheticModelClient::default();
		let chunks: Vec<_> = client.stream("").await.unwrap().collect().await;
		assert!(chunks.is_empty());
	}
}
