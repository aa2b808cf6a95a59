use chrono::{DateTime, Utc};
use serde::de::Error as _;
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};

use crate::types::MessageId;

/// The inbound frame as received off the wire, parsed generically.
///
/// Spec §9 calls for "a closed variant with a dispatcher; avoid
/// reflection-based routing" for the *outbound* side, where the full set of
/// frame shapes the server emits is known and closed (see [`OutboundFrame`]).
/// The inbound side is deliberately looser: a client frame only needs to
/// expose its `type` tag and a free-form `content`/`metadata` before the
/// dispatcher decides, per-type, how to interpret the rest — mirroring how
/// the validation pipeline in §4.E inspects `type` before anything else.
#[derive(Debug, Clone, Deserialize)]
pub struct InboundEnvelope {
	#[serde(rename = "type")]
	pub kind: String,
	#[serde(default)]
	pub content: Option<Value>,
	#[serde(default)]
	pub metadata: Map<String, Value>,
}

impl InboundEnvelope {
	/// `content` coerced to a string, for frame types whose content is text
	/// (`chat`, `chat_message`, `typing`, `stream_start`). Returns `None` for
	/// a missing or non-string content value.
	pub fn content_as_str(&self) -> Option<&str> {
		self.content.as_ref().and_then(Value::as_str)
	}
}

/// Distinguishes the two synonymous spellings of a chat frame so that the
/// server can echo a message back under the tag the sender used (spec §9
/// open question: "this spec accepts both as synonyms and emits the one
/// received by the sender on echo").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatAlias {
	Chat,
	ChatMessage,
}

impl ChatAlias {
	pub fn from_wire_type(kind: &str) -> Option<Self> {
		match kind {
			"chat" => Some(Self::Chat),
			"chat_message" => Some(Self::ChatMessage),
			_ => None,
		}
	}

	fn wire_tag(self) -> &'static str {
		match self {
			Self::Chat => "chat",
			Self::ChatMessage => "chat_message",
		}
	}
}

/// The closed set of frames the server ever emits (component H / §6).
///
/// `Serialize` is implemented by hand rather than derived because the `Chat`
/// variant's wire tag is chosen at runtime from [`ChatAlias`] rather than
/// fixed by the Rust variant name — the one frame shape that cannot use a
/// plain `#[serde(tag = "type")]` enum.
#[derive(Debug, Clone)]
pub enum OutboundFrame {
	Welcome {
		client_id: String,
		user_id: String,
		timestamp: DateTime<Utc>,
	},
	Ping {
		timestamp: DateTime<Utc>,
	},
	Pong {
		timestamp: DateTime<Utc>,
	},
	Chat {
		alias: ChatAlias,
		content: String,
		user_id: Option<String>,
		client_id: Option<String>,
		message_id: Option<MessageId>,
		metadata: Map<String, Value>,
		timestamp: DateTime<Utc>,
	},
	Typing {
		content: String,
		metadata: Map<String, Value>,
	},
	System {
		content: Value,
		metadata: Map<String, Value>,
	},
	StreamStart {
		metadata: Map<String, Value>,
	},
	Stream {
		text: String,
		metadata: Map<String, Value>,
	},
	StreamEnd,
	Error {
		content: String,
		error_type: Option<&'static str>,
		timestamp: DateTime<Utc>,
	},
}

impl OutboundFrame {
	pub fn error(content: impl Into<String>) -> Self {
		Self::Error {
			content: content.into(),
			error_type: None,
			timestamp: Utc::now(),
		}
	}

	pub fn error_typed(content: impl Into<String>, error_type: &'static str) -> Self {
		Self::Error {
			content: content.into(),
			error_type: Some(error_type),
			timestamp: Utc::now(),
		}
	}

	pub fn to_json_string(&self) -> String {
		serde_json::to_string(self).expect("OutboundFrame serialization never fails")
	}

	/// Whether this frame belongs in the replay history (spec §4.C:
	/// "Appends non-control frames to `messageHistory`"). Pings, pongs, and
	/// stream chunks are liveness/transport noise, not conversation state.
	pub fn is_replayable(&self) -> bool {
		matches!(self, Self::Chat { .. } | Self::Typing { .. } | Self::System { .. })
	}
}

impl Serialize for OutboundFrame {
	fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
	where
		S: Serializer,
	{
		match self {
			Self::Welcome { client_id, user_id, timestamp } => {
				let mut map = serializer.serialize_map(Some(4))?;
				map.serialize_entry("type", "welcome")?;
				map.serialize_entry("client_id", client_id)?;
				map.serialize_entry("user_id", user_id)?;
				map.serialize_entry("timestamp", timestamp)?;
				map.end()
			}
			Self::Ping { timestamp } => {
				let mut map = serializer.serialize_map(Some(2))?;
				map.serialize_entry("type", "ping")?;
				map.serialize_entry("timestamp", timestamp)?;
				map.end()
			}
			Self::Pong { timestamp } => {
				let mut map = serializer.serialize_map(Some(2))?;
				map.serialize_entry("type", "pong")?;
				map.serialize_entry("timestamp", timestamp)?;
				map.end()
			}
			Self::Chat {
				alias,
				content,
				user_id,
				client_id,
				message_id,
				metadata,
				timestamp,
			} => {
				let mut map = serializer.serialize_map(None)?;
				map.serialize_entry("type", alias.wire_tag())?;
				map.serialize_entry("content", content)?;
				if let Some(user_id) = user_id {
					map.serialize_entry("user_id", user_id)?;
				}
				if let Some(client_id) = client_id {
					map.serialize_entry("client_id", client_id)?;
				}
				if let Some(message_id) = message_id {
					map.serialize_entry("message_id", &message_id.to_string())?;
				}
				map.serialize_entry("metadata", metadata)?;
				map.serialize_entry("timestamp", timestamp)?;
				map.end()
			}
			Self::Typing { content, metadata } => {
				let mut map = serializer.serialize_map(Some(3))?;
				map.serialize_entry("type", "typing")?;
				map.serialize_entry("content", content)?;
				map.serialize_entry("metadata", metadata)?;
				map.end()
			}
			Self::System { content, metadata } => {
				let mut map = serializer.serialize_map(Some(3))?;
				map.serialize_entry("type", "system")?;
				map.serialize_entry("content", content)?;
				map.serialize_entry("metadata", metadata)?;
				map.end()
			}
			Self::StreamStart { metadata } => {
				let mut map = serializer.serialize_map(Some(3))?;
				map.serialize_entry("type", "stream_start")?;
				map.serialize_entry("content", "")?;
				map.serialize_entry("metadata", metadata)?;
				map.end()
			}
			Self::Stream { text, metadata } => {
				let mut map = serializer.serialize_map(Some(3))?;
				map.serialize_entry("type", "stream")?;
				map.serialize_entry(
					"content",
					&serde_json::json!({
						"content_block_delta": { "type": "text", "text": text }
					}),
				)?;
				map.serialize_entry("metadata", metadata)?;
				map.end()
			}
			Self::StreamEnd => {
				let mut map = serializer.serialize_map(Some(2))?;
				map.serialize_entry("type", "stream_end")?;
				map.serialize_entry("content", "")?;
				map.end()
			}
			Self::Error { content, error_type, timestamp } => {
				let mut map = serializer.serialize_map(Some(4))?;
				map.serialize_entry("type", "error")?;
				map.serialize_entry("content", content)?;
				let mut metadata = Map::new();
				if let Some(error_type) = error_type {
					metadata.insert("error_type".to_string(), Value::String((*error_type).to_string()));
				}
				map.serialize_entry("metadata", &metadata)?;
				map.serialize_entry("timestamp", timestamp)?;
				map.end()
			}
		}
	}
}

// Round-trip support for tests: deserializing an `OutboundFrame` back from
// JSON is only needed in test code that asserts on what the server sent, so
// this goes through the generic envelope rather than a derived Deserialize.
impl<'de> Deserialize<'de> for OutboundFrame {
	fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
	where
		D: Deserializer<'de>,
	{
		let value = Value::deserialize(deserializer)?;
		let kind = value.get("type").and_then(Value::as_str).ok_or_else(|| D::Error::missing_field("type"))?.to_string();
		let timestamp = value
			.get("timestamp")
			.and_then(Value::as_str)
			.and_then(|s| DateTime::parse_from_rfc3339(s).ok())
			.map(|dt| dt.with_timezone(&Utc))
			.unwrap_or_else(Utc::now);
		let metadata = value.get("metadata").and_then(Value::as_object).cloned().unwrap_or_default();

		match kind.as_str() {
			"welcome" => Ok(Self::Welcome {
				client_id: value.get("client_id").and_then(Value::as_str).unwrap_or_default().to_string(),
				user_id: value.get("user_id").and_then(Value::as_str).unwrap_or_default().to_string(),
				timestamp,
			}),
			"ping" => Ok(Self::Ping { timestamp }),
			"pong" => Ok(Self::Pong { timestamp }),
			"chat" | "chat_message" => Ok(Self::Chat {
				alias: ChatAlias::from_wire_type(&kind).expect("matched above"),
				content: value.get("content").and_then(Value::as_str).unwrap_or_default().to_string(),
				user_id: value.get("user_id").and_then(Value::as_str).map(str::to_string),
				client_id: value.get("client_id").and_then(Value::as_str).map(str::to_string),
				message_id: None,
				metadata,
				timestamp,
			}),
			"typing" => Ok(Self::Typing {
				content: value.get("content").and_then(Value::as_str).unwrap_or_default().to_string(),
				metadata,
			}),
			"system" => Ok(Self::System {
				content: value.get("content").cloned().unwrap_or(Value::Null),
				metadata,
			}),
			"stream_start" => Ok(Self::StreamStart { metadata }),
			"stream" => {
				let text = value
					.get("content")
					.and_then(|c| c.get("content_block_delta"))
					.and_then(|c| c.get("text"))
					.and_then(Value::as_str)
					.unwrap_or_default()
					.to_string();
				Ok(Self::Stream { text, metadata })
			}
			"stream_end" => Ok(Self::StreamEnd),
			"error" => Ok(Self::Error {
				content: value.get("content").and_then(Value::as_str).unwrap_or_default().to_string(),
				error_type: None,
				timestamp,
			}),
			other => Err(D::Error::custom(format!("unknown frame type: {other}"))),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn chat_echoes_under_received_tag() {
		let frame = OutboundFrame::Chat {
			alias: ChatAlias::ChatMessage,
			content: "hi".into(),
			user_id: Some("u1".into()),
			client_id: None,
			message_id: Some(MessageId::next()),
			metadata: Map::new(),
			timestamp: Utc::now(),
		};
		let json = serde_json::to_value(&frame).unwrap();
		assert_eq!(json["type"], "chat_message");
		assert_eq!(json["content"], "hi");
	}

	#[test]
	fn inbound_envelope_parses_minimal_frame() {
		let raw = r#"{"type":"ping"}"#;
		let envelope: InboundEnvelope = serde_json::from_str(raw).unwrap();
		assert_eq!(envelope.kind, "ping");
		assert!(envelope.content.is_none());
	}

	#[test]
	fn stream_frame_nests_content_block_delta() {
		let frame = OutboundFrame::Stream {
			text: "Par".into(),
			metadata: Map::new(),
		};
		let json = serde_json::to_value(&frame).unwrap();
		assert_eq!(json["content"]["content_block_delta"]["text"], "Par");
	}
}
