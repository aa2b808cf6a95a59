#[derive(Debug, Clone, Copy)]
pub struct DispatcherConfig {
	/// Inclusive upper bound on chat/typing content length (spec §4.E).
	pub max_message_length: usize,
}

impl Default for DispatcherConfig {
	fn default() -> Self {
		Self { max_message_length: 1_048_576 }
	}
}
