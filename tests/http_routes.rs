//! HTTP surface exercised through the router without a listener

use axum::{
    body::{to_bytes, Body},
    http::{header, Request, StatusCode},
    Router,
};
use serde_json::{json, Value};
use tower::ServiceExt;

use relay_server::app::AppState;
use relay_server::config::Config;
use relay_server::http::build_router;

fn app_with(config: Config) -> (AppState, Router) {
    let state = AppState::new(config);
    let router = build_router(state.clone());
    (state, router)
}

fn app() -> (AppState, Router) {
    app_with(Config::default())
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = to_bytes(response.into_body(), 64 * 1024).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

#[tokio::test]
async fn test_health_reports_relay_state() {
    let (_state, router) = app();

    let response = router
        .oneshot(Request::get("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    assert_eq!(body["status"], "ok");
    assert_eq!(body["connections"], 0);
    assert_eq!(body["upstream_connected"], false);
    assert!(body["tick_hz"].as_u64().unwrap() >= 20);
}

#[tokio::test]
async fn test_metrics_snapshot() {
    let (_state, router) = app();

    let response = router
        .oneshot(Request::get("/metrics").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    assert_eq!(body["messages"]["inputs"], 0);
    assert_eq!(body["broadcast"]["broadcasts"], 0);
}

#[tokio::test]
async fn test_session_heartbeat() {
    let (state, router) = app();
    let session = state.sessions.create_session("p1", None, None).await.unwrap();

    let response = router
        .clone()
        .oneshot(post_json("/session/heartbeat", json!({ "token": session.token })))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let response = router
        .oneshot(post_json("/session/heartbeat", json!({ "token": "nope" })))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_session_endpoints_reject_blank_token() {
    let (_state, router) = app();

    for uri in ["/session/heartbeat", "/session/reconnect"] {
        let response = router
            .clone()
            .oneshot(post_json(uri, json!({ "token": "  " })))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}

#[tokio::test]
async fn test_session_reconnect() {
    let (state, router) = app();
    let session = state.sessions.create_session("p1", None, None).await.unwrap();
    state.sessions.disconnect_session(&session.token).await.unwrap();

    let request = Request::builder()
        .method("POST")
        .uri("/session/reconnect")
        .header(header::CONTENT_TYPE, "application/json")
        .header(header::USER_AGENT, "client/2")
        .body(Body::from(json!({ "token": session.token }).to_string()))
        .unwrap();
    let response = router.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    assert_eq!(body["player_id"], "p1");
    assert_eq!(body["connected"], true);
    assert_eq!(body["reconnect_count"], 1);
    assert_eq!(body["user_agent"], "client/2");

    let response = router
        .oneshot(post_json("/session/reconnect", json!({ "token": "nope" })))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_upstream_requires_configured_token() {
    let (_state, router) = app_with(Config {
        upstream_token: Some("secret".to_string()),
        ..Config::default()
    });

    let response = router
        .clone()
        .oneshot(Request::get("/server").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = router
        .clone()
        .oneshot(Request::get("/server?token=wrong").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    // Right token passes the guard; a plain GET then fails the upgrade itself
    let response = router
        .oneshot(
            Request::get("/server")
                .header(header::AUTHORIZATION, "Bearer secret")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_ne!(response.status(), StatusCode::UNAUTHORIZED);
}
