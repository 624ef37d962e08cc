//! HTTP server: routing, bearer authentication and startup
//!
//! Every route except `/health` sits behind [`require_bearer`]. The bulk
//! routes (`/publish`, `/install`) stream tar bodies through [`crate::pipe`]
//! so neither side holds a whole archive in memory.

use axum::extract::{DefaultBodyLimit, Request, State};
use axum::http::header;
use axum::middleware::{from_fn_with_state, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use axum::Router;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use subtle::ConstantTimeEq;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::trace::TraceLayer;

pub mod error;
pub mod handlers;
pub mod shutdown;

pub use error::{ApiError, ErrorBody, ErrorDetail};
pub use shutdown::shutdown_signal;

use crate::config::Config;
use crate::error::SyncError;
use crate::logging::*;
use crate::meta::MetaStore;
use crate::storage::{Backend, StorageBackend, META_FILE};

/// Shared handler state
#[derive(Clone)]
pub struct AppState {
	pub backend: Arc<dyn Backend>,
	pub meta: Arc<MetaStore>,
	pub auth_token: Arc<str>,
	pub request_timeout: Duration,
	pub pipe_capacity: usize,
}

impl AppState {
	pub fn new(backend: Arc<dyn Backend>, meta: Arc<MetaStore>, config: &Config) -> Self {
		AppState {
			backend,
			meta,
			auth_token: Arc::from(config.auth_token.as_str()),
			request_timeout: Duration::from_secs(config.server.request_timeout_secs),
			pipe_capacity: config.transfer.pipe_capacity,
		}
	}
}

/// Build the application router
pub fn router(state: AppState, max_json_bytes: usize) -> Router {
	let api = Router::new()
		.route("/compare", post(handlers::compare))
		.route("/upload", put(handlers::upload))
		.route("/download", get(handlers::download))
		.route("/publish", post(handlers::publish))
		.route("/install", post(handlers::install))
		.route("/prune", post(handlers::prune))
		.route("/status", get(handlers::status))
		.route_layer(from_fn_with_state(state.clone(), require_bearer));

	Router::new()
		.route("/health", get(handlers::health))
		.merge(api)
		.layer(DefaultBodyLimit::max(max_json_bytes))
		.layer(TraceLayer::new_for_http().make_span_with(|req: &Request| {
			tracing::info_span!(
				"request",
				method = %req.method(),
				path = %req.uri().path(),
				request_id = %uuid::Uuid::new_v4(),
			)
		}))
		.layer(CatchPanicLayer::new())
		.with_state(state)
}

/// Reject requests without the configured bearer token.
///
/// An empty configured token disables the API rather than opening it.
pub async fn require_bearer(State(state): State<AppState>, request: Request, next: Next) -> Response {
	if state.auth_token.is_empty() {
		warn!("request rejected: no authToken configured");
		return ApiError::Unauthorized("auth disabled".to_string()).into_response();
	}

	let provided = request
		.headers()
		.get(header::AUTHORIZATION)
		.and_then(|v| v.to_str().ok())
		.and_then(|v| v.strip_prefix("Bearer "));

	match provided {
		Some(token) if token_eq(token.trim(), &state.auth_token) => next.run(request).await,
		Some(_) => {
			warn!("authentication failed: invalid bearer token");
			ApiError::Unauthorized("invalid token".to_string()).into_response()
		}
		None => {
			warn!("authentication failed: missing bearer token");
			ApiError::Unauthorized("missing bearer token".to_string()).into_response()
		}
	}
}

/// Compare fixed-length digests so neither content nor length shows in timing
fn token_eq(provided: &str, expected: &str) -> bool {
	let provided = blake3::hash(provided.as_bytes());
	let expected = blake3::hash(expected.as_bytes());
	provided.as_bytes()[..].ct_eq(&expected.as_bytes()[..]).into()
}

/// Open storage and serve until SIGINT/SIGTERM
pub async fn serve(config: &Config) -> Result<(), SyncError> {
	let backend = StorageBackend::from_config(config).await?;

	let data_dir = PathBuf::from(&config.server.data_dir);
	tokio::fs::create_dir_all(&data_dir).await?;
	let meta = MetaStore::open(data_dir.join(META_FILE)).await;

	if config.auth_token.is_empty() {
		warn!("authToken is empty: every API request will be rejected");
	}

	let state = AppState::new(Arc::new(backend), Arc::new(meta), config);
	let app = router(state, config.server.max_json_bytes);

	let addr = config.listen_addr();
	let listener = tokio::net::TcpListener::bind(&addr).await?;
	info!("dotsync server listening on {}", listener.local_addr()?);

	axum::serve(listener, app).with_graceful_shutdown(shutdown_signal()).await?;
	info!("Server stopped");
	Ok(())
}


// vim: ts=4
