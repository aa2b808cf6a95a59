use thiserror::Error;

/// Canonical WebSocket close codes used by the gateway (spec §4.H).
///
/// `Abnormal` is never sent by this server; it is only ever observed on the
/// client side of a dropped TCP connection, but it is named here so other
/// crates can log/compare against it uniformly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseCode {
	Normal,
	UnsupportedData,
	Abnormal,
	PolicyViolation,
	InternalError,
}

impl CloseCode {
	pub fn as_u16(self) -> u16 {
		match self {
			Self::Normal => 1000,
			Self::UnsupportedData => 1003,
			Self::Abnormal => 1006,
			Self::PolicyViolation => 1008,
			Self::InternalError => 1011,
		}
	}
}

impl std::fmt::Display for CloseCode {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(f, "{}", self.as_u16())
	}
}

/// Errors that arise purely from malformed wire data, shared by the
/// dispatcher and the gateway upgrade handler.
#[derive(Debug, Error)]
pub enum ProtocolError {
	#[error("invalid JSON: {0}")]
	InvalidJson(#[from] serde_json::Error),
	#[error("missing required field: {0}")]
	MissingField(&'static str),
	#[error("unknown message type: {0}")]
	UnknownType(String),
}

impl ProtocolError {
	/// Protocol errors are always recoverable: they produce an error frame
	/// and keep the socket open (spec §7, "Protocol" row).
	pub fn close_code(&self) -> Option<CloseCode> {
		None
	}
}
