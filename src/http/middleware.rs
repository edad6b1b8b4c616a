//! Upstream authentication middleware

use axum::{
    extract::{Query, Request, State},
    http::{header, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use tracing::warn;

use crate::app::AppState;

/// Extract a token from an Authorization header value
pub fn extract_bearer_token(auth_header: &str) -> Option<&str> {
    auth_header.strip_prefix("Bearer ")
}

#[derive(Debug, Default, Deserialize)]
struct TokenQuery {
    token: Option<String>,
}

/// Token from the `token` query parameter, falling back to a Bearer header
pub fn request_token(request: &Request) -> Option<String> {
    let from_query = Query::<TokenQuery>::try_from_uri(request.uri())
        .ok()
        .and_then(|Query(q)| q.token)
        .filter(|t| !t.is_empty());

    from_query.or_else(|| {
        request
            .headers()
            .get(header::AUTHORIZATION)
            .and_then(|h| h.to_str().ok())
            .and_then(extract_bearer_token)
            .map(str::to_owned)
    })
}

/// Authentication error types
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("Missing upstream token")]
    MissingToken,

    #[error("Invalid upstream token")]
    InvalidToken,
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        (StatusCode::UNAUTHORIZED, self.to_string()).into_response()
    }
}

/// Middleware guarding `/server` when `UPSTREAM_TOKEN` is configured
pub async fn require_upstream_token(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, AuthError> {
    let Some(expected) = state.config.upstream_token.as_deref() else {
        return Ok(next.run(request).await);
    };

    match request_token(&request) {
        None => {
            warn!("Upstream connection without token");
            Err(AuthError::MissingToken)
        }
        Some(token) if token == expected => Ok(next.run(request).await),
        Some(_) => {
            warn!("Upstream connection with wrong token");
            Err(AuthError::InvalidToken)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;

    #[test]
    fn test_extract_bearer_token() {
        assert_eq!(extract_bearer_token("Bearer abc"), Some("abc"));
        assert_eq!(extract_bearer_token("Basic abc"), None);
    }

    #[test]
    fn test_query_token_wins_over_header() {
        let request = Request::builder()
            .uri("/server?token=from-query")
            .header(header::AUTHORIZATION, "Bearer from-header")
            .body(Body::empty())
            .unwrap();
        assert_eq!(request_token(&request).as_deref(), Some("from-query"));

        let request = Request::builder()
            .uri("/server")
            .header(header::AUTHORIZATION, "Bearer from-header")
            .body(Body::empty())
            .unwrap();
        assert_eq!(request_token(&request).as_deref(), Some("from-header"));
    }
}
