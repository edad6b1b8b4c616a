//! HTTP route definitions

use std::net::SocketAddr;

use axum::{
    extract::{ConnectInfo, State},
    http::{header, Method, StatusCode},
    middleware,
    response::{IntoResponse, Json},
    routing::{get, post},
    Router,
};
use axum_extra::{headers::UserAgent, TypedHeader};
use serde::{Deserialize, Serialize};
use tower_http::{
    compression::CompressionLayer,
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use crate::app::AppState;
use crate::error::RelayError;
use crate::http::middleware::require_upstream_token;
use crate::net::MetricsSnapshot;
use crate::session::{Session, SessionError};
use crate::util::time::uptime_secs;
use crate::ws::handler::ws_handler;
use crate::ws::upstream::upstream_handler;

/// Build the application router
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .merge(public_routes())
        .merge(upstream_routes(state.clone()))
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http())
        .layer(cors_layer(&state.config.client_origin))
        .with_state(state)
}

fn public_routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .route("/ws", get(ws_handler))
        .route("/session/heartbeat", post(heartbeat_handler))
        .route("/session/reconnect", post(reconnect_handler))
}

fn upstream_routes(state: AppState) -> Router<AppState> {
    Router::new()
        .route("/server", get(upstream_handler))
        .layer(middleware::from_fn_with_state(state, require_upstream_token))
}

/// CORS for the configured origins; `*` allows any origin without credentials
fn cors_layer(client_origin: &str) -> CorsLayer {
    let base = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE]);

    if client_origin.trim() == "*" {
        return base.allow_origin(Any);
    }

    // Multiple origins are comma-separated
    let allowed_origins: Vec<header::HeaderValue> = client_origin
        .split(',')
        .filter_map(|s| s.trim().parse::<header::HeaderValue>().ok())
        .collect();

    base.allow_origin(allowed_origins).allow_credentials(true)
}

// ============================================================================
// Health and metrics
// ============================================================================

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub uptime_secs: u64,
    pub connections: usize,
    pub players: usize,
    pub upstream_connected: bool,
    pub tick_hz: u32,
}

async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    let relay = &state.relay;
    Json(HealthResponse {
        status: "ok".to_string(),
        uptime_secs: uptime_secs(),
        connections: relay.connection_count(),
        players: relay.player_count(),
        upstream_connected: relay.upstream().is_connected(),
        tick_hz: relay.tick().current_hz(),
    })
}

async fn metrics_handler(State(state): State<AppState>) -> Json<MetricsSnapshot> {
    Json(state.relay.metrics_snapshot())
}

// ============================================================================
// Session endpoints
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct SessionTokenRequest {
    pub token: String,
}

impl SessionTokenRequest {
    fn token(&self) -> Result<&str, AppError> {
        let token = self.token.trim();
        if token.is_empty() {
            return Err(AppError::BadRequest("token is required".to_string()));
        }
        Ok(token)
    }
}

async fn heartbeat_handler(
    State(state): State<AppState>,
    Json(req): Json<SessionTokenRequest>,
) -> Result<StatusCode, AppError> {
    state.sessions.update_heartbeat(req.token()?).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn reconnect_handler(
    State(state): State<AppState>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    user_agent: Option<TypedHeader<UserAgent>>,
    Json(req): Json<SessionTokenRequest>,
) -> Result<Json<Session>, AppError> {
    let ip = connect_info.map(|ConnectInfo(addr)| addr.ip());
    let user_agent = user_agent.map(|TypedHeader(ua)| ua.as_str().to_owned());

    let session = state
        .sessions
        .reconnect_session(req.token()?, ip, user_agent.as_deref())
        .await?;

    Ok(Json(session))
}

// ============================================================================
// Error handling
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Unauthorized")]
    Unauthorized,

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<SessionError> for AppError {
    fn from(e: SessionError) -> Self {
        match e {
            SessionError::NotFound => AppError::NotFound(e.to_string()),
            SessionError::Backend(msg) => AppError::Internal(msg),
        }
    }
}

impl From<RelayError> for AppError {
    fn from(e: RelayError) -> Self {
        match e {
            RelayError::Unauthorized => AppError::Unauthorized,
            RelayError::UpstreamConnected => AppError::Conflict(e.to_string()),
            RelayError::Session(e) => e.into(),
            other => AppError::Internal(other.to_string()),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let (status, message) = match &self {
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            AppError::Unauthorized => (StatusCode::UNAUTHORIZED, "Unauthorized".to_string()),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, msg.clone()),
            AppError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg.clone()),
        };

        let body = serde_json::json!({
            "error": message
        });

        (status, Json(body)).into_response()
    }
}
