use chat_protocol::CloseCode;
use thiserror::Error;

use crate::auth::VerifyError;

/// Aggregates every per-crate failure the upgrade path can hit into a single
/// type carrying its own close code and wire reason, so component H's
/// error-to-frame mapping never pattern-matches on a formatted string
/// (spec §7/§10). Grounded on `FileHostError`'s `#[from]`-aggregation
/// convention.
#[derive(Debug, Error)]
pub enum GatewayError {
	#[error("Missing client_id")]
	MissingClientId,

	#[error("Missing token")]
	MissingToken,

	#[error("{0}")]
	Auth(&'static str),

	#[error("Connection limit exceeded")]
	ConnectionLimitExceeded,

	#[error("Client ID already in use")]
	DuplicateClient,

	#[error(transparent)]
	Registry(#[from] connection_registry::RegistryError),

	#[error(transparent)]
	RateLimit(#[from] rate_limiter::RateLimitError),

	#[error(transparent)]
	Kv(#[from] kv_store::KvError),
}

impl GatewayError {
	/// Every variant that reaches this point closes the socket with 1008
	/// (spec §4.G/§4.H); only internal/unexpected failures would warrant
	/// 1011, and those never construct this type — they panic/log instead,
	/// matching the teacher's "uncaught exceptions close 1011" handling at
	/// the task boundary rather than as a typed variant here.
	pub fn close_code(&self) -> CloseCode {
		CloseCode::PolicyViolation
	}

	pub fn wire_reason(&self) -> String {
		self.to_string()
	}
}

impl From<VerifyError> for GatewayError {
	fn from(err: VerifyError) -> Self {
		Self::Auth(err.reason())
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn every_variant_closes_with_policy_violation() {
		assert_eq!(GatewayError::MissingClientId.close_code(), CloseCode::PolicyViolation);
		assert_eq!(GatewayError::from(VerifyError::Expired).wire_reason(), "Token has expired");
	}
}
