//! `/server`: the authoritative game server's socket
//!
//! Exactly one upstream may be attached. Binary frames carry
//! `ServerMessage`s; game states are handed to the relay, which coalesces
//! them until the next tick.

use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        ConnectInfo, State,
    },
    response::Response,
};
use futures::StreamExt;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::app::AppState;
use crate::error::RelayError;
use crate::http::AppError;
use crate::net::{Counter, Relay};
use crate::wire::{decode_server, ServerMessage};
use crate::ws::sink::WsSink;

const HEX_DUMP_LIMIT: usize = 32;

/// Upgrade handler; token checks happen in middleware
pub async fn upstream_handler(
    ws: WebSocketUpgrade,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    State(state): State<AppState>,
) -> Result<Response, AppError> {
    if state.relay.upstream().is_connected() {
        return Err(RelayError::UpstreamConnected.into());
    }

    let remote = connect_info
        .map(|ConnectInfo(addr)| addr)
        .unwrap_or_else(|| SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0)));

    let relay = state.relay;
    Ok(ws.on_upgrade(move |socket| {
        let upstream_loop = handle_upstream(socket, remote, relay.clone());
        relay.track(upstream_loop)
    }))
}

async fn handle_upstream(socket: WebSocket, remote: SocketAddr, relay: Arc<Relay>) {
    let id = Uuid::new_v4();
    let (sink, mut stream) = socket.split();

    // Another upstream may have won the race since the pre-upgrade check
    if let Err(e) = relay
        .upstream()
        .try_register(id, Box::new(WsSink::new(sink)))
        .await
    {
        warn!(remote = %remote, error = %e, "Upstream refused after upgrade");
        return;
    }
    info!(upstream_id = %id, remote = %remote, "Upstream connected");

    let shutdown = relay.shutdown_token().clone();
    loop {
        let next = tokio::select! {
            _ = shutdown.cancelled() => break,
            next = stream.next() => next,
        };

        match next {
            Some(Ok(Message::Binary(data))) => handle_server_bytes(&relay, remote, &data),
            Some(Ok(Message::Text(_))) => debug!(upstream_id = %id, "Ignoring upstream text frame"),
            Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => {}
            Some(Ok(Message::Close(_))) | None => break,
            Some(Err(e)) => {
                warn!(upstream_id = %id, error = %e, "Upstream read error");
                break;
            }
        }
    }

    if relay.upstream().unregister(id).await {
        info!(upstream_id = %id, "Upstream disconnected");
    }
}

fn handle_server_bytes(relay: &Relay, remote: SocketAddr, data: &[u8]) {
    match decode_server(data) {
        Ok(ServerMessage::GameState(snapshot)) => relay.submit_snapshot(snapshot),
        Ok(other) => debug!(message = ?other, "Ignoring upstream message"),
        Err(e) => {
            relay.metrics().incr(Counter::DecodeError);
            warn!(
                remote = %remote,
                bytes = data.len(),
                error = %e,
                head = %hex::encode(&data[..data.len().min(HEX_DUMP_LIMIT)]),
                "Failed to decode upstream message"
            );
        }
    }
}
