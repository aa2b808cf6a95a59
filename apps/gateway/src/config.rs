use std::time::Duration;

use clap::Parser;

/// Every knob in this struct is read once at process start and carried
/// behind an `Arc` for the rest of the process lifetime (spec §6/§10).
#[derive(Parser, Clone, Debug)]
#[command(author, version, about, long_about = None)]
pub struct GatewayConfig {
	/// Address the HTTP/WebSocket listener binds to.
	#[arg(long, env = "WS_BIND_ADDR", default_value = "0.0.0.0:8080")]
	pub bind_addr: String,

	/// Redis connection string; only consulted when `kv_backend` is "redis".
	#[arg(long, env = "REDIS_URL")]
	pub redis_url: Option<String>,

	/// Which `KVStore` implementation to wire up.
	#[arg(long, env = "KV_BACKEND", default_value = "memory")]
	pub kv_backend: KvBackend,

	#[arg(long, env = "WS_MAX_CONNECTIONS_PER_USER", default_value = "5")]
	pub max_connections_per_user: u32,

	#[arg(long, env = "WS_PING_INTERVAL", default_value = "20")]
	pub ping_interval_secs: u64,

	#[arg(long, env = "WS_PING_TIMEOUT", default_value = "20")]
	pub ping_timeout_secs: u64,

	#[arg(long, env = "WS_MAX_HISTORY_SIZE", default_value = "100")]
	pub max_history_size: usize,

	#[arg(long, env = "WS_MAX_MESSAGE_LENGTH", default_value = "1048576")]
	pub max_message_length: usize,

	#[arg(long, env = "CHUNK_SIZE", default_value = "8")]
	pub chunk_size: usize,

	#[arg(long, env = "STREAM_CHUNK_DELAY_MS", default_value = "50")]
	pub stream_chunk_delay_ms: u64,

	#[arg(long, env = "BACKOFF_BASE_SECS", default_value = "2")]
	pub backoff_base_secs: u64,

	#[arg(long, env = "BACKOFF_MAX_SECS", default_value = "300")]
	pub backoff_max_secs: u64,

	#[arg(long, env = "BACKOFF_RESET_SECS", default_value = "600")]
	pub backoff_reset_secs: u64,

	/// Trusted proxy addresses allowed to set `x-forwarded-for`.
	#[arg(long, env = "TRUSTED_PROXIES", value_delimiter = ',', default_value = "")]
	pub trusted_proxies: Vec<String>,

	/// Use JSON formatting for tracing output.
	#[arg(long, env = "LOG_JSON", default_value = "false")]
	pub log_json: bool,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum KvBackend {
	Memory,
	Redis,
}

impl GatewayConfig {
	pub fn parse_args() -> Self {
		Self::parse()
	}

	pub fn ping_interval(&self) -> Duration {
		Duration::from_secs(self.ping_interval_secs)
	}

	pub fn ping_timeout(&self) -> Duration {
		Duration::from_secs(self.ping_timeout_secs)
	}

	pub fn stream_chunk_delay(&self) -> Duration {
		Duration::from_millis(self.stream_chunk_delay_ms)
	}

	pub fn backoff_base(&self) -> Duration {
		Duration::from_secs(self.backoff_base_secs)
	}

	pub fn backoff_max(&self) -> Duration {
		Duration::from_secs(self.backoff_max_secs)
	}

	pub fn backoff_reset(&self) -> Duration {
		Duration::from_secs(self.backoff_reset_secs)
	}
}
