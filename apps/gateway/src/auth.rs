use async_trait::async_trait;
use chat_protocol::UserId;

/// Outcome of verifying a bearer token (spec §4.G step 4).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerifyError {
	Invalid,
	Expired,
	MissingSubject,
}

impl VerifyError {
	pub fn reason(&self) -> &'static str {
		match self {
			Self::Invalid | Self::MissingSubject => "Invalid token",
			Self::Expired => "Token has expired",
		}
	}
}

/// Authentication is out of scope (spec §1); the gateway consumes this
/// interface rather than minting or parsing tokens itself.
#[async_trait]
pub trait TokenVerifier: Send + Sync {
	async fn verify(&self, token: &str) -> Result<UserId, VerifyError>;
}

/// Test double accepting any non-empty token that doesn't start with a
/// sentinel prefix, returning the token itself as the user id.
pub struct StaticTokenVerifier;

#[async_trait]
impl TokenVerifier for StaticTokenVerifier {
	async fn verify(&self, token: &str) -> Result<UserId, VerifyError> {
		if token.is_empty() {
			return Err(VerifyError::Invalid);
		}
		if let Some(rest) = token.strip_prefix("expired:") {
			if rest.is_empty() {
				return Err(VerifyError::MissingSubject);
			}
			return Err(VerifyError::Expired);
		}
		if token == "invalid" {
			return Err(VerifyError::Invalid);
		}
		Ok(UserId::new(token.to_string()))
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[tokio::test]
	async fn empty_token_is_invalid() {
		assert_eq!(StaticTokenVerifier.verify("").await, Err(VerifyError::Invalid));
	}

	#[tokio::test]
	async fn expired_prefix_yields_expired() {
		assert_eq!(StaticTokenVerifier.verify("expired:u1").await, Err(VerifyError::Expired));
	}

	#[tokio::test]
	async fn ordinary_token_yields_its_own_user_id() {
		let user = StaticTokenVerifier.verify("alice").await.unwrap();
		assert_eq!(user.as_str(), "alice");
	}
}
