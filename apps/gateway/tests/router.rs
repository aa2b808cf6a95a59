//! Drives the real axum router end-to-end (spec §10), including a genuine
//! WebSocket handshake over a real `TcpListener`, rather than unit-testing
//! `admit`/`status_handler` in isolation as `src/websocket.rs`'s in-module
//! tests do. No WebSocket client crate is pulled in: the handshake request
//! is assembled by hand (a fixed `Sec-WebSocket-Key`, matching the example
//! from RFC 6455) and the response status line is read off the raw socket.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use gateway::config::{GatewayConfig, KvBackend};
use gateway::state::{default_token_verifier, synthetic_model_client, AppState};
use http_body_util::BodyExt;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;

fn test_config() -> Arc<GatewayConfig> {
	Arc::new(GatewayConfig {
		bind_addr: "127.0.0.1:0".into(),
		redis_url: None,
		kv_backend: KvBackend::Memory,
		max_connections_per_user: 2,
		ping_interval_secs: 20,
		ping_timeout_secs: 20,
		max_history_size: 50,
		max_message_length: 1_048_576,
		chunk_size: 8,
		stream_chunk_delay_ms: 1,
		backoff_base_secs: 2,
		backoff_max_secs: 300,
		backoff_reset_secs: 600,
		trusted_proxies: vec![],
		log_json: false,
	})
}

async fn test_router(state: AppState) -> Router {
	Router::new().merge(gateway::websocket::router()).with_state(state)
}

/// Binds a real listener and serves the router in the background, returning
/// its address. The server task is detached; it lives for the test process.
async fn spawn_server(state: AppState) -> SocketAddr {
	let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
	let addr = listener.local_addr().unwrap();
	let app = test_router(state).await;
	tokio::spawn(async move {
		axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>()).await.ok();
	});
	addr
}

/// Sends a hand-assembled WebSocket handshake request and returns the HTTP
/// status code together with the still-open socket, so callers can decide
/// whether to hold the connection open (to keep a rate-limiter slot
/// occupied) or drop it immediately.
async fn send_upgrade_request(addr: SocketAddr, path_and_query: &str) -> (u16, TcpStream) {
	let mut stream = TcpStream::connect(addr).await.unwrap();
	let request = format!(
		"GET {path_and_query} HTTP/1.1\r\n\
		 Host: {addr}\r\n\
		 Connection: Upgrade\r\n\
		 Upgrade: websocket\r\n\
		 Sec-WebSocket-Version: 13\r\n\
		 Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n\
		 \r\n"
	);
	stream.write_all(request.as_bytes()).await.unwrap();

	let mut buf = Vec::new();
	let mut chunk = [0u8; 512];
	loop {
		let n = stream.read(&mut chunk).await.unwrap();
		buf.extend_from_slice(&chunk[..n]);
		if buf.windows(4).any(|w| w == b"\r\n\r\n") || n == 0 {
			break;
		}
	}
	let head = String::from_utf8_lossy(&buf);
	let status_line = head.lines().next().unwrap_or_default();
	let status = status_line.split_whitespace().nth(1).and_then(|s| s.parse().ok()).unwrap_or(0);
	(status, stream)
}

#[tokio::test]
async fn status_endpoint_reports_empty_registry() {
	let state = AppState::build(test_config(), default_token_verifier(), synthetic_model_client(8), CancellationToken::new()).await.unwrap();
	let app = test_router(state).await;
	let response = app.oneshot(Request::builder().uri("/ws/status").body(Body::empty()).unwrap()).await.unwrap();
	assert_eq!(response.status(), StatusCode::OK);

	let bytes = response.into_body().collect().await.unwrap().to_bytes();
	let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
	assert_eq!(body["active_connections"], 0);
	assert_eq!(body["message_history_length"], 0);
}

#[tokio::test]
async fn valid_handshake_switches_protocols() {
	let state = AppState::build(test_config(), default_token_verifier(), synthetic_model_client(8), CancellationToken::new()).await.unwrap();
	let addr = spawn_server(state).await;
	let (status, _stream) = send_upgrade_request(addr, "/ws?client_id=c1&token=alice").await;
	assert_eq!(status, 101);
}

#[tokio::test]
async fn handshake_without_client_id_is_rejected() {
	let state = AppState::build(test_config(), default_token_verifier(), synthetic_model_client(8), CancellationToken::new()).await.unwrap();
	let addr = spawn_server(state).await;
	let (status, _stream) = send_upgrade_request(addr, "/ws?token=alice").await;
	assert_eq!(status, 400);
}

#[tokio::test]
async fn handshake_without_token_is_rejected() {
	let state = AppState::build(test_config(), default_token_verifier(), synthetic_model_client(8), CancellationToken::new()).await.unwrap();
	let addr = spawn_server(state).await;
	let (status, _stream) = send_upgrade_request(addr, "/ws?client_id=c1").await;
	assert_eq!(status, 400);
}

#[tokio::test]
async fn handshake_with_invalid_token_is_rejected() {
	let state = AppState::build(test_config(), default_token_verifier(), synthetic_model_client(8), CancellationToken::new()).await.unwrap();
	let addr = spawn_server(state).await;
	let (status, _stream) = send_upgrade_request(addr, "/ws?client_id=c1&token=invalid").await;
	assert_eq!(status, 400);
}

#[tokio::test]
async fn connection_limit_is_enforced_across_real_handshakes() {
	let state = AppState::build(test_config(), default_token_verifier(), synthetic_model_client(8), CancellationToken::new()).await.unwrap();
	let addr = spawn_server(state).await;

	// Hold both slots open; `max_connections_per_user` is 2 in `test_config`.
	let mut held = Vec::new();
	for i in 0..2 {
		let (status, stream) = send_upgrade_request(addr, &format!("/ws?client_id=c{i}&token=alice")).await;
		assert_eq!(status, 101);
		held.push(stream);
	}

	let (status, _stream) = send_upgrade_request(addr, "/ws?client_id=c2&token=alice").await;
	assert_eq!(status, 400);
}
