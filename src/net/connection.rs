//! Per-peer connection handle shared by the WebSocket and UDP transports

use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::{mpsc, Mutex, MutexGuard};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::util::rate_limit::PlayerRateLimiter;
use crate::util::time::unix_millis;

pub type ConnectionId = Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportKind {
    WebSocket,
    Udp,
}

impl TransportKind {
    pub fn as_str(self) -> &'static str {
        match self {
            TransportKind::WebSocket => "websocket",
            TransportKind::Udp => "udp",
        }
    }
}

/// Lifecycle of a connection; transitions only move forward
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum ConnectionState {
    Connecting = 0,
    Active = 1,
    Closing = 2,
    Closed = 3,
}

impl ConnectionState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => ConnectionState::Connecting,
            1 => ConnectionState::Active,
            2 => ConnectionState::Closing,
            _ => ConnectionState::Closed,
        }
    }
}

/// Why a connection was torn down
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    ClientClosed,
    ReadError,
    WriteFailed,
    IdleTimeout,
    Shutdown,
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            DisconnectReason::ClientClosed => "client_closed",
            DisconnectReason::ReadError => "read_error",
            DisconnectReason::WriteFailed => "write_failed",
            DisconnectReason::IdleTimeout => "idle_timeout",
            DisconnectReason::Shutdown => "shutdown",
        })
    }
}

/// Frame handed to a [`PeerSink`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    Binary(Bytes),
    Text(String),
    Ping(Bytes),
}

impl Outbound {
    pub fn len(&self) -> usize {
        match self {
            Outbound::Binary(b) | Outbound::Ping(b) => b.len(),
            Outbound::Text(t) => t.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("connection closed")]
    Closed,

    #[error("write timed out after {0:?}")]
    Timeout(Duration),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("websocket error: {0}")]
    WebSocket(String),
}

/// Write half of a peer
#[async_trait]
pub trait PeerSink: Send {
    async fn send(&mut self, frame: Outbound) -> Result<(), TransportError>;

    /// Best-effort close notification
    async fn close(&mut self);
}

/// Sink that forwards frames into a channel, for in-process peers
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<Outbound>,
}

impl ChannelSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Outbound>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

#[async_trait]
impl PeerSink for ChannelSink {
    async fn send(&mut self, frame: Outbound) -> Result<(), TransportError> {
        self.tx.send(frame).map_err(|_| TransportError::Closed)
    }

    async fn close(&mut self) {}
}

/// Outcome of binding a player id to a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayerBinding {
    /// First input: the id is now bound
    Bound,
    /// Id matches the bound one
    Matched,
    /// Id differs from the bound one
    Mismatch,
}

/// One client (or the upstream) attached to the relay
pub struct Connection {
    pub id: ConnectionId,
    pub kind: TransportKind,
    pub remote: SocketAddr,
    player_id: RwLock<Option<String>>,
    session_token: RwLock<Option<String>>,
    state: AtomicU8,
    last_seen_ms: AtomicU64,
    sink: Mutex<Box<dyn PeerSink>>,
    cancel: CancellationToken,
    limiter: PlayerRateLimiter,
}

impl Connection {
    pub fn new(
        kind: TransportKind,
        remote: SocketAddr,
        sink: Box<dyn PeerSink>,
        parent: &CancellationToken,
        inputs_per_second: u32,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            remote,
            player_id: RwLock::new(None),
            session_token: RwLock::new(None),
            state: AtomicU8::new(ConnectionState::Connecting as u8),
            last_seen_ms: AtomicU64::new(unix_millis()),
            sink: Mutex::new(sink),
            cancel: parent.child_token(),
            limiter: PlayerRateLimiter::new(inputs_per_second),
        }
    }

    pub fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn is_active(&self) -> bool {
        self.state() == ConnectionState::Active
    }

    /// Connecting -> Active; false if already past Connecting
    pub fn activate(&self) -> bool {
        self.state
            .compare_exchange(
                ConnectionState::Connecting as u8,
                ConnectionState::Active as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    /// Move to Closing; only the first caller gets `true`
    pub fn begin_close(&self) -> bool {
        let mut current = self.state.load(Ordering::Acquire);
        loop {
            if current >= ConnectionState::Closing as u8 {
                return false;
            }
            match self.state.compare_exchange(
                current,
                ConnectionState::Closing as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return true,
                Err(actual) => current = actual,
            }
        }
    }

    pub fn mark_closed(&self) {
        self.state
            .store(ConnectionState::Closed as u8, Ordering::Release);
    }

    pub fn touch(&self) {
        self.last_seen_ms.store(unix_millis(), Ordering::Relaxed);
    }

    pub fn idle_for(&self, now_ms: u64) -> Duration {
        let last = self.last_seen_ms.load(Ordering::Relaxed);
        Duration::from_millis(now_ms.saturating_sub(last))
    }

    pub fn player_id(&self) -> Option<String> {
        self.player_id.read().clone()
    }

    pub fn bind_player(&self, player_id: &str) -> PlayerBinding {
        let mut bound = self.player_id.write();
        match bound.as_deref() {
            None => {
                *bound = Some(player_id.to_owned());
                PlayerBinding::Bound
            }
            Some(existing) if existing == player_id => PlayerBinding::Matched,
            Some(_) => PlayerBinding::Mismatch,
        }
    }

    pub fn session_token(&self) -> Option<String> {
        self.session_token.read().clone()
    }

    pub fn set_session_token(&self, token: impl Into<String>) {
        *self.session_token.write() = Some(token.into());
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn check_input_rate(&self) -> bool {
        self.limiter.check_input()
    }

    /// Take the write lock
    pub async fn lock_sink(&self) -> MutexGuard<'_, Box<dyn PeerSink>> {
        self.sink.lock().await
    }

    /// Write one frame under the write lock, bounded by `deadline`
    pub async fn send(&self, frame: Outbound, deadline: Duration) -> Result<(), TransportError> {
        let mut sink = self.sink.lock().await;
        if self.state() >= ConnectionState::Closing {
            return Err(TransportError::Closed);
        }
        match tokio::time::timeout(deadline, sink.send(frame)).await {
            Ok(result) => result,
            Err(_) => Err(TransportError::Timeout(deadline)),
        }
    }

    /// Send a close notification, giving up after `deadline`
    pub async fn close_sink(&self, deadline: Duration) {
        let _ = tokio::time::timeout(deadline, async {
            self.sink.lock().await.close().await;
        })
        .await;
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("remote", &self.remote)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}
