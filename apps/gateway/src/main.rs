use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use chat_protocol::CloseCode;
use gateway::config::GatewayConfig;
use gateway::state::{default_token_verifier, synthetic_model_client, AppState};
use gateway::websocket;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::Layer;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
	dotenv::dotenv().ok();
	let config = Arc::new(GatewayConfig::parse_args());

	init_tracing(&config);

	let shutdown_token = CancellationToken::new();
	let chunk_size = config.chunk_size;
	let state = AppState::build(config.clone(), default_token_verifier(), synthetic_model_client(chunk_size), shutdown_token.clone()).await?;

	let app = Router::new().merge(websocket::router()).layer(TraceLayer::new_for_http()).with_state(state.clone());

	let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
	tracing::info!(addr = %config.bind_addr, "listening");

	let signal_token = shutdown_token.clone();
	tokio::spawn(async move {
		tokio::signal::ctrl_c().await.ok();
		tracing::info!("received Ctrl+C, starting graceful shutdown");
		signal_token.cancel();
	});

	let server_token = shutdown_token.clone();
	axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
		.with_graceful_shutdown(async move { server_token.cancelled().await })
		.await?;

	tracing::info!("stopped accepting new connections, draining live ones");
	drain(&state, Duration::from_secs(5)).await;
	tracing::info!("shutdown complete");
	Ok(())
}

/// Actively disconnects every live connection through the registry's normal
/// cleanup path (spec §10: graceful shutdown releases rate-limiter counters
/// rather than dropping the process out from under them), bounded so a
/// stuck actor cannot hang the process indefinitely.
async fn drain(state: &AppState, timeout: Duration) {
	state.shutdown.cancel();
	let _ = tokio::time::timeout(timeout, state.registry.disconnect_all(CloseCode::Normal, "server shutting down")).await;
}

fn init_tracing(config: &GatewayConfig) {
	let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

	let registry = tracing_subscriber::registry();
	if config.log_json {
		registry.with(tracing_subscriber::fmt::layer().json().flatten_event(true).with_filter(filter)).init();
	} else {
		registry.with(tracing_subscriber::fmt::layer().pretty().with_filter(filter)).init();
	}
}
