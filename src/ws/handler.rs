//! WebSocket upgrade handler for game clients

use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        ConnectInfo, Query, State,
    },
    response::{IntoResponse, Response},
};
use axum_extra::{
    headers::{authorization::Bearer, Authorization, UserAgent},
    TypedHeader,
};
use bytes::Bytes;
use futures::stream::SplitStream;
use futures::StreamExt;
use serde::Deserialize;
use tokio::time::{interval_at, Instant};
use tracing::{debug, error, info, warn};

use crate::app::AppState;
use crate::http::AppError;
use crate::net::{Admission, Connection, DisconnectReason, Outbound, Relay, TransportKind};
use crate::util::time::unix_millis;
use crate::ws::protocol::{ControlMsg, ControlReply};
use crate::ws::sink::WsSink;

/// Query parameters for WebSocket connection
#[derive(Debug, Default, Deserialize)]
pub struct WsQuery {
    /// Session token
    pub token: Option<String>,
    /// Player to bind when connecting without a token
    pub player_id: Option<String>,
}

/// WebSocket upgrade handler
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(query): Query<WsQuery>,
    bearer: Option<TypedHeader<Authorization<Bearer>>>,
    user_agent: Option<TypedHeader<UserAgent>>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    State(state): State<AppState>,
) -> Response {
    let token = query
        .token
        .filter(|t| !t.is_empty())
        .or_else(|| bearer.map(|TypedHeader(auth)| auth.token().to_owned()));
    let remote = connect_info
        .map(|ConnectInfo(addr)| addr)
        .unwrap_or_else(|| SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0)));
    let user_agent = user_agent.map(|TypedHeader(ua)| ua.as_str().to_owned());

    // Check the session before upgrading
    let admission = state
        .relay
        .admit(
            token.as_deref(),
            query.player_id.as_deref(),
            Some(remote.ip()),
            user_agent.as_deref(),
        )
        .await;

    match admission {
        Ok(admission) => {
            info!(remote = %remote, player_id = ?admission.player_id, "WebSocket upgrade");
            let relay = state.relay;
            // Tracked so relay shutdown waits for this socket's teardown
            ws.on_upgrade(move |socket| {
                let socket_loop = handle_socket(socket, remote, admission, relay.clone());
                relay.track(socket_loop)
            })
        }
        Err(e) => {
            warn!(remote = %remote, error = %e, "WebSocket admission refused");
            AppError::from(e).into_response()
        }
    }
}

/// Handle the upgraded WebSocket connection
async fn handle_socket(
    socket: WebSocket,
    remote: SocketAddr,
    admission: Admission,
    relay: Arc<Relay>,
) {
    let (ws_sink, mut ws_stream) = socket.split();
    let conn = relay.register_admitted(
        TransportKind::WebSocket,
        remote,
        Box::new(WsSink::new(ws_sink)),
        &admission,
    );

    let welcome = ControlReply::Welcome {
        connection_id: conn.id,
        player_id: conn.player_id(),
        session_token: conn.session_token(),
        tick_hz: relay.tick().current_hz(),
        server_time: unix_millis(),
    };
    if let Err(e) = conn
        .send(Outbound::Text(welcome.to_json()), relay.tick().write_deadline())
        .await
    {
        error!(conn_id = %conn.id, error = %e, "Failed to send welcome");
        relay.remove_connection(conn.id, DisconnectReason::WriteFailed).await;
        return;
    }
    conn.activate();

    relay.spawn(heartbeat_loop(
        relay.clone(),
        conn.clone(),
        relay.config().heartbeat_interval,
    ));

    let reason = read_loop(&relay, &conn, &mut ws_stream).await;
    relay.remove_connection(conn.id, reason).await;
}

/// Read frames until the peer goes away or the connection is cancelled
async fn read_loop(
    relay: &Arc<Relay>,
    conn: &Arc<Connection>,
    stream: &mut SplitStream<WebSocket>,
) -> DisconnectReason {
    loop {
        let next = tokio::select! {
            _ = conn.cancel_token().cancelled() => return DisconnectReason::Shutdown,
            next = stream.next() => next,
        };

        match next {
            Some(Ok(Message::Binary(data))) => {
                relay.handle_client_bytes(conn, Bytes::from(data)).await;
            }
            Some(Ok(Message::Text(text))) => {
                conn.touch();
                handle_text(relay, conn, text).await;
            }
            Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => conn.touch(),
            Some(Ok(Message::Close(_))) | None => {
                debug!(conn_id = %conn.id, "Client closed connection");
                return DisconnectReason::ClientClosed;
            }
            Some(Err(e)) => {
                debug!(conn_id = %conn.id, error = %e, "WebSocket read error");
                return DisconnectReason::ReadError;
            }
        }
    }
}

/// Text frames: JSON pings get a pong, anything else is echoed back
async fn handle_text(relay: &Arc<Relay>, conn: &Arc<Connection>, text: String) {
    let reply = match serde_json::from_str::<ControlMsg>(&text) {
        Ok(ControlMsg::Ping { t }) => ControlReply::Pong {
            t,
            server_time: unix_millis(),
        }
        .to_json(),
        Err(_) => text,
    };

    if let Err(e) = conn
        .send(Outbound::Text(reply), relay.tick().write_deadline())
        .await
    {
        debug!(conn_id = %conn.id, error = %e, "Text reply failed");
        relay.schedule_removal(conn.id, DisconnectReason::WriteFailed);
    }
}

/// Periodic protocol pings so intermediaries keep the socket open
async fn heartbeat_loop(relay: Arc<Relay>, conn: Arc<Connection>, every: Duration) {
    let mut ticker = interval_at(Instant::now() + every, every);

    loop {
        tokio::select! {
            _ = conn.cancel_token().cancelled() => break,
            _ = ticker.tick() => {}
        }

        if let Err(e) = conn
            .send(Outbound::Ping(Bytes::new()), relay.tick().write_deadline())
            .await
        {
            debug!(conn_id = %conn.id, error = %e, "Heartbeat ping failed");
            relay.schedule_removal(conn.id, DisconnectReason::WriteFailed);
            break;
        }
    }
}
