use thiserror::Error;

#[derive(Debug, Error)]
pub enum RegistryError {
	#[error("connection actor is no longer available")]
	ActorUnavailable,

	#[error("client id {0:?} is already connected")]
	AlreadyConnected(String),

	#[error("client id {0:?} is not connected")]
	NotConnected(String),

	#[error("reconnect user id does not match the existing connection")]
	UserMismatch,
}
