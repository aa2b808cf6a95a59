//! Upgrade handler, socket sink adapter, and receive loop (spec §4.G).
//! Grounded on `apps/servers/file_host/src/websocket.rs`'s
//! `websocket_handler`/`handle_socket` shape, adapted from a NATS-backed
//! event bridge to this gateway's registry/dispatcher pipeline.

use std::net::SocketAddr;

use async_trait::async_trait;
use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::{ConnectInfo, Query, State};
use axum::http::HeaderMap;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use chat_protocol::{ClientId, CloseCode, ConnectionState, IpAddress, OutboundFrame, UserId};
use connection_registry::{ConnectionSink, SinkError};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tracing::{info, warn};

use crate::error::GatewayError;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
	Router::new().route("/ws", get(upgrade_handler)).route("/ws/status", get(status_handler))
}

#[derive(Debug, Deserialize)]
struct UpgradeQuery {
	#[serde(default)]
	token: Option<String>,
	#[serde(default)]
	client_id: Option<String>,
}

async fn status_handler(State(state): State<AppState>) -> impl IntoResponse {
	let stats = state.registry.stats().await;
	Json(serde_json::json!({
		"active_connections": stats.active_connections,
		"message_history_length": stats.message_history_length,
	}))
}

async fn upgrade_handler(
	ws: WebSocketUpgrade,
	State(state): State<AppState>,
	ConnectInfo(addr): ConnectInfo<SocketAddr>,
	headers: HeaderMap,
	Query(query): Query<UpgradeQuery>,
) -> impl IntoResponse {
	match admit(&state, &headers, &query, addr).await {
		Ok((client_id, user_id, ip)) => ws.on_upgrade(move |socket| handle_socket(socket, state, client_id, user_id, ip)),
		Err(err) => {
			warn!(error = %err, "rejecting websocket upgrade");
			(axum::http::StatusCode::from_u16(err.close_code().as_u16()).unwrap_or(axum::http::StatusCode::BAD_REQUEST), err.wire_reason()).into_response()
		}
	}
}

/// Steps 1-5 of spec §4.G: extract token/client_id, verify, reject an
/// already-live `client_id`, then check admission. Kept as a free function
/// returning `Result` so it is testable without a live socket.
async fn admit(state: &AppState, headers: &HeaderMap, query: &UpgradeQuery, peer: SocketAddr) -> Result<(ClientId, UserId, IpAddress), GatewayError> {
	let client_id_raw = query.client_id.as_deref().unwrap_or_default();
	let Some(client_id) = connection_registry::client_id::validate_client_id(client_id_raw) else {
		return Err(GatewayError::MissingClientId);
	};
	let client_id = ClientId::from(client_id);

	let token = extract_token(headers, query).ok_or(GatewayError::MissingToken)?;
	let user_id = state.token_verifier.verify(&token).await?;

	// Checked before any rate-limiter accounting is touched: incrementing
	// first and releasing on this error would delete the shared
	// `ws:conn:{user}:{ip}:{client}` tuple key belonging to the connection
	// already using this `client_id`.
	if state.registry.get(&client_id).is_some() {
		return Err(GatewayError::DuplicateClient);
	}

	let ip = resolve_ip(state, headers, peer.ip());

	let decision = state.rate_limiter.check_connection_limit(client_id.as_str(), user_id.as_str(), &ip.to_string()).await;
	if !decision.allow {
		return Err(GatewayError::ConnectionLimitExceeded);
	}
	state.rate_limiter.increment_connection_count(client_id.as_str(), user_id.as_str(), &ip.to_string()).await?;

	Ok((client_id, user_id, ip))
}

fn extract_token(headers: &HeaderMap, query: &UpgradeQuery) -> Option<String> {
	if let Some(token) = query.token.as_ref().filter(|t| !t.is_empty()) {
		return Some(token.clone());
	}
	headers.get(axum::http::header::AUTHORIZATION).and_then(|v| v.to_str().ok()).and_then(|v| v.strip_prefix("Bearer ")).filter(|t| !t.is_empty()).map(str::to_string)
}

fn resolve_ip(state: &AppState, headers: &HeaderMap, direct_peer: std::net::IpAddr) -> IpAddress {
	let forwarded = headers.get("x-forwarded-for").and_then(|v| v.to_str().ok());
	let trusted: Vec<std::net::IpAddr> = state.config.trusted_proxies.iter().filter_map(|s| s.parse().ok()).collect();
	connection_registry::client_id::resolve_ip(direct_peer, forwarded, &trusted)
}

async fn handle_socket(socket: WebSocket, state: AppState, client_id: ClientId, user_id: UserId, ip: IpAddress) {
	let (sender, mut receiver) = socket.split();
	let sink: Box<dyn ConnectionSink> = Box::new(AxumSink { sender });

	let (handle, actor, token) = match state.registry.connect(client_id.clone(), user_id.clone(), ip, sink, 64) {
		Ok(parts) => parts,
		Err(err) => {
			// `admit` already rejects a live `client_id` with 1008; this only
			// fires for the narrow race where two admits both pass before
			// either reaches `connect`.
			warn!(error = %err, client_id = %client_id, "duplicate client_id rejected at connect");
			let _ = state.rate_limiter.release_connection(client_id.as_str(), user_id.as_str(), &ip.to_string()).await;
			return;
		}
	};
	tokio::spawn(actor.run());

	handle.set_state(ConnectionState::Connected).await;
	let _ = state.registry.send_message(&client_id, OutboundFrame::Welcome {
		client_id: client_id.to_string(),
		user_id: user_id.to_string(),
		timestamp: chrono::Utc::now(),
	}).await;

	let heartbeat_config = connection_registry::heartbeat::HeartbeatConfig {
		ping_interval: state.config.ping_interval(),
		ping_timeout: state.config.ping_timeout(),
	};
	let heartbeat_handle = handle.clone();
	let heartbeat_token = token.child_token();
	tokio::spawn(connection_registry::heartbeat::run(heartbeat_handle, heartbeat_config, heartbeat_token));

	let class = "authenticated";
	info!(client_id = %client_id, user_id = %user_id, "connection established");

	loop {
		tokio::select! {
			frame = receiver.next() => {
				match frame {
					Some(Ok(Message::Text(text))) => {
						state.dispatcher.dispatch(&client_id, class, &text).await;
					}
					Some(Ok(Message::Close(_))) | None => break,
					Some(Ok(_)) => {}
					Some(Err(err)) => {
						warn!(error = %err, client_id = %client_id, "websocket read error");
						break;
					}
				}
			}
			() = token.cancelled() => break,
		}
	}

	state.registry.disconnect(&client_id, CloseCode::Normal, "receive loop ended").await;
}

/// Adapts an Axum `WebSocket`'s write half to `ConnectionSink`.
struct AxumSink {
	sender: futures::stream::SplitSink<WebSocket, Message>,
}

#[async_trait]
impl ConnectionSink for AxumSink {
	async fn send(&mut self, frame: &OutboundFrame) -> Result<(), SinkError> {
		self.sender.send(Message::Text(frame.to_json_string())).await.map_err(|err| SinkError(err.to_string()))
	}

	async fn close(&mut self, code: CloseCode, reason: &str) {
		let _ = self
			.sender
			.send(Message::Close(Some(CloseFrame {
				code: code.as_u16(),
				reason: reason.to_string().into(),
			})))
			.await;
	}
}

#[cfg(test)]
mod tests {
	use std::sync::Arc;

	use tokio_util::sync::CancellationToken;

	use super::*;
	use crate::config::GatewayConfig;
	use crate::state::{default_token_verifier, synthetic_model_client};

	async fn test_state() -> AppState {
		let config = Arc::new(GatewayConfig {
			bind_addr: "127.0.0.1:0".into(),
			redis_url: None,
			kv_backend: crate::config::KvBackend::Memory,
			max_connections_per_user: 5,
			ping_interval_secs: 20,
			ping_timeout_secs: 20,
			max_history_size: 100,
			max_message_length: 1_048_576,
			chunk_size: 8,
			stream_chunk_delay_ms: 1,
			backoff_base_secs: 2,
			backoff_max_secs: 300,
			backoff_reset_secs: 600,
			trusted_proxies: vec![],
			log_json: false,
		});
		AppState::build(config, default_token_verifier(), synthetic_model_client(8), CancellationToken::new()).await.unwrap()
	}

	fn peer() -> SocketAddr {
		"203.0.113.7:9000".parse().unwrap()
	}

	#[derive(Default)]
	struct NoopSink;

	#[async_trait]
	impl ConnectionSink for NoopSink {
		async fn send(&mut self, _frame: &OutboundFrame) -> Result<(), SinkError> {
			Ok(())
		}
		async fn close(&mut self, _code: CloseCode, _reason: &str) {}
	}

	#[tokio::test]
	async fn missing_client_id_is_rejected() {
		let state = test_state().await;
		let query = UpgradeQuery { token: Some("alice".into()), client_id: None };
		let err = admit(&state, &HeaderMap::new(), &query, peer()).await.unwrap_err();
		assert!(matches!(err, GatewayError::MissingClientId));
	}

	#[tokio::test]
	async fn missing_token_is_rejected() {
		let state = test_state().await;
		let query = UpgradeQuery { token: None, client_id: Some("c1".into()) };
		let err = admit(&state, &HeaderMap::new(), &query, peer()).await.unwrap_err();
		assert!(matches!(err, GatewayError::MissingToken));
	}

	#[tokio::test]
	async fn invalid_token_is_rejected() {
		let state = test_state().await;
		let query = UpgradeQuery { token: Some("invalid".into()), client_id: Some("c1".into()) };
		let err = admit(&state, &HeaderMap::new(), &query, peer()).await.unwrap_err();
		assert!(matches!(err, GatewayError::Auth(_)));
	}

	#[tokio::test]
	async fn bearer_header_is_accepted_when_query_token_absent() {
		let mut headers = HeaderMap::new();
		headers.insert(axum::http::header::AUTHORIZATION, "Bearer alice".parse().unwrap());
		let state = test_state().await;
		let query = UpgradeQuery { token: None, client_id: Some("c1".into()) };
		let (client_id, user_id, _ip) = admit(&state, &headers, &query, peer()).await.unwrap();
		assert_eq!(client_id.as_str(), "c1");
		assert_eq!(user_id.as_str(), "alice");
	}

	#[tokio::test]
	async fn connection_limit_is_enforced_per_user() {
		let state = test_state().await;
		for i in 0..5 {
			let query = UpgradeQuery { token: Some("alice".into()), client_id: Some(format!("c{i}")) };
			admit(&state, &HeaderMap::new(), &query, peer()).await.unwrap();
		}
		let query = UpgradeQuery { token: Some("alice".into()), client_id: Some("c5".into()) };
		let err = admit(&state, &HeaderMap::new(), &query, peer()).await.unwrap_err();
		assert!(matches!(err, GatewayError::ConnectionLimitExceeded));
	}

	#[tokio::test]
	async fn duplicate_client_id_is_rejected_before_upgrade() {
		let state = test_state().await;
		let query = UpgradeQuery { token: Some("alice".into()), client_id: Some("c1".into()) };
		let (client_id, user_id, ip) = admit(&state, &HeaderMap::new(), &query, peer()).await.unwrap();
		let sink: Box<dyn ConnectionSink> = Box::new(NoopSink);
		let (_, actor, _) = state.registry.connect(client_id, user_id, ip, sink, 8).unwrap();
		tokio::spawn(actor.run());

		let query = UpgradeQuery { token: Some("bob".into()), client_id: Some("c1".into()) };
		let err = admit(&state, &HeaderMap::new(), &query, peer()).await.unwrap_err();
		assert!(matches!(err, GatewayError::DuplicateClient));
		assert_eq!(err.close_code(), CloseCode::PolicyViolation);
		assert_eq!(err.wire_reason(), "Client ID already in use");
	}

	#[tokio::test]
	async fn resolve_ip_uses_direct_peer_when_not_proxied() {
		let state = test_state().await;
		let ip = resolve_ip(&state, &HeaderMap::new(), peer().ip());
		assert_eq!(ip, IpAddress::from(peer().ip()));
	}

	#[tokio::test]
	async fn status_handler_reports_zero_connections_initially() {
		let state = test_state().await;
		let response = status_handler(State(state)).await.into_response();
		assert_eq!(response.status(), axum::http::StatusCode::OK);
	}
}
