use thiserror::Error;

#[derive(Debug, Error)]
pub enum StreamError {
	#[error("model client failed: {0}")]
	Model(String),

	#[error("failed to write stream chunk to the connection")]
	WriteFailed,
}
