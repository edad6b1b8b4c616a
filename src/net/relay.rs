//! Relay core: connection tables, client message handling and the tick loop
//!
//! Each table has its own lock and no code path holds two of them at once.
//! Table locks are `parking_lot` and are never held across an `.await`; the
//! per-connection write lock and the upstream slot are async mutexes.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use bytes::Bytes;
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use tokio::time::{interval, interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tokio_util::task::task_tracker::TrackedFuture;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::error::{RelayError, RelayResult};
use crate::game::{
    BufferPool, DatagramPool, PlayerState, Position, SnapshotPool, SpatialIndex,
    TickController,
};
use crate::session::{Session, SessionStore};
use crate::util::compress::Compressor;
use crate::util::time::{rtt_estimate_ms, unix_millis};
use crate::wire::quantize::meters;
use crate::wire::{
    decode_client, encode_server, ClientFrame, ClientMessage, GameStateSnapshot, HeartbeatAck,
    PlayerInput, ServerMessage, WireError,
};

use super::broadcast::{broadcast, BroadcastReport};
use super::connection::{
    Connection, ConnectionId, DisconnectReason, Outbound, PeerSink, PlayerBinding, TransportKind,
};
use super::metrics::{Counter, MetricsSnapshot, RelayMetrics};
use super::upstream::{Forward, UpstreamLink};

/// Prefix of player ids handed to anonymous sessions
pub const ANONYMOUS_PREFIX: &str = "anon-";

/// Bytes of a malformed packet included in the warning log
const HEX_DUMP_LIMIT: usize = 32;

pub fn anonymous_player_id() -> String {
    let id = Uuid::new_v4().simple().to_string();
    format!("{ANONYMOUS_PREFIX}{}", &id[..12])
}

pub fn is_anonymous(player_id: &str) -> bool {
    player_id.starts_with(ANONYMOUS_PREFIX)
}

/// Last snapshot successfully written to one connection
#[derive(Debug, Default)]
pub struct ClientDeltaState {
    pub last_sent: Option<GameStateSnapshot>,
}

#[derive(Default)]
struct ConnectionTable {
    by_id: HashMap<ConnectionId, Arc<Connection>>,
    by_udp_addr: HashMap<SocketAddr, ConnectionId>,
}

/// Result of checking a peer's credentials
#[derive(Debug, Clone)]
pub struct Admission {
    pub session: Option<Session>,
    /// Player id to bind before the first input, when known
    pub player_id: Option<String>,
}

pub struct Relay {
    config: Arc<Config>,
    connections: RwLock<ConnectionTable>,
    delta_states: RwLock<HashMap<ConnectionId, Arc<Mutex<ClientDeltaState>>>>,
    spatial: SpatialIndex,
    players: DashMap<String, PlayerState>,
    /// Entity ids present in the last authoritative snapshot
    known_entities: Mutex<HashSet<String>>,
    pending: Mutex<Option<Arc<GameStateSnapshot>>>,
    tick: TickController,
    snapshots: SnapshotPool,
    buffers: BufferPool,
    datagrams: DatagramPool,
    compressor: Option<Compressor>,
    interest_radius: Option<i32>,
    upstream: UpstreamLink,
    metrics: RelayMetrics,
    sessions: Arc<dyn SessionStore>,
    shutdown: CancellationToken,
    tracker: TaskTracker,
}

impl Relay {
    pub fn new(config: Arc<Config>, sessions: Arc<dyn SessionStore>) -> Self {
        let interest_radius =
            (config.interest_radius_m > 0.0).then(|| meters(config.interest_radius_m));
        let compressor = config
            .compress_broadcasts
            .then(|| Compressor::new(config.compression_threshold));
        let tick = TickController::new();

        let relay = Self {
            connections: RwLock::new(ConnectionTable::default()),
            delta_states: RwLock::new(HashMap::new()),
            spatial: SpatialIndex::new(meters(config.spatial_cell_m)),
            players: DashMap::new(),
            known_entities: Mutex::new(HashSet::new()),
            pending: Mutex::new(None),
            snapshots: SnapshotPool::new(config.snapshot_pool_size),
            buffers: BufferPool::new(config.broadcast_workers * 2),
            datagrams: DatagramPool::new(64),
            compressor,
            interest_radius,
            upstream: UpstreamLink::new(),
            metrics: RelayMetrics::new(),
            sessions,
            shutdown: CancellationToken::new(),
            tracker: TaskTracker::new(),
            tick,
            config,
        };
        relay.metrics.set_tick_hz(relay.tick.current_hz());
        relay
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn metrics(&self) -> &RelayMetrics {
        &self.metrics
    }

    pub fn tick(&self) -> &TickController {
        &self.tick
    }

    pub fn upstream(&self) -> &UpstreamLink {
        &self.upstream
    }

    pub fn sessions(&self) -> &Arc<dyn SessionStore> {
        &self.sessions
    }

    pub fn spatial(&self) -> &SpatialIndex {
        &self.spatial
    }

    pub fn snapshot_pool(&self) -> &SnapshotPool {
        &self.snapshots
    }

    pub fn buffer_pool(&self) -> &BufferPool {
        &self.buffers
    }

    pub fn datagram_pool(&self) -> &DatagramPool {
        &self.datagrams
    }

    pub fn compressor(&self) -> Option<&Compressor> {
        self.compressor.as_ref()
    }

    /// Interest radius in fixed-point units, `None` when filtering is off
    pub fn interest_radius(&self) -> Option<i32> {
        self.interest_radius
    }

    pub fn shutdown_token(&self) -> &CancellationToken {
        &self.shutdown
    }

    pub fn metrics_snapshot(&self) -> MetricsSnapshot {
        self.metrics.snapshot(self.snapshots.stats(), self.buffers.stats())
    }

    /// Run `task` on the relay's tracker so shutdown waits for it
    pub fn spawn<F>(&self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.tracker.spawn(task);
    }

    /// Wrap a future driven elsewhere (an upgraded socket) so shutdown waits for it
    pub fn track<F: Future>(&self, task: F) -> TrackedFuture<F> {
        self.tracker.track_future(task)
    }

    // ========================================================================
    // Connection table
    // ========================================================================

    pub fn connection_count(&self) -> usize {
        self.connections.read().by_id.len()
    }

    pub fn connection(&self, id: ConnectionId) -> Option<Arc<Connection>> {
        self.connections.read().by_id.get(&id).cloned()
    }

    pub fn connection_by_addr(&self, addr: SocketAddr) -> Option<Arc<Connection>> {
        let table = self.connections.read();
        let id = table.by_udp_addr.get(&addr)?;
        table.by_id.get(id).cloned()
    }

    /// Point-in-time copy of the connection set
    pub fn connections(&self) -> Vec<Arc<Connection>> {
        self.connections.read().by_id.values().cloned().collect()
    }

    pub fn delta_state(&self, id: ConnectionId) -> Option<Arc<Mutex<ClientDeltaState>>> {
        self.delta_states.read().get(&id).cloned()
    }

    pub fn player(&self, player_id: &str) -> Option<PlayerState> {
        self.players.get(player_id).map(|p| p.clone())
    }

    pub fn player_count(&self) -> usize {
        self.players.len()
    }

    pub fn register_connection(
        &self,
        kind: TransportKind,
        remote: SocketAddr,
        sink: Box<dyn PeerSink>,
    ) -> Arc<Connection> {
        let conn = Arc::new(Connection::new(
            kind,
            remote,
            sink,
            &self.shutdown,
            self.config.input_rate_limit,
        ));

        self.delta_states
            .write()
            .insert(conn.id, Arc::new(Mutex::new(ClientDeltaState::default())));
        {
            let mut table = self.connections.write();
            if kind == TransportKind::Udp {
                table.by_udp_addr.insert(remote, conn.id);
            }
            table.by_id.insert(conn.id, conn.clone());
        }

        self.metrics.connection_opened(kind);
        info!(
            conn_id = %conn.id,
            transport = kind.as_str(),
            remote = %remote,
            "Connection registered"
        );
        conn
    }

    /// Register a connection and apply its admission
    pub fn register_admitted(
        &self,
        kind: TransportKind,
        remote: SocketAddr,
        sink: Box<dyn PeerSink>,
        admission: &Admission,
    ) -> Arc<Connection> {
        let conn = self.register_connection(kind, remote, sink);
        if let Some(session) = &admission.session {
            conn.set_session_token(session.token.clone());
        }
        if let Some(player_id) = &admission.player_id {
            conn.bind_player(player_id);
        }
        conn
    }

    /// Check a peer's token, creating a session when anonymous access is allowed
    pub async fn admit(
        &self,
        token: Option<&str>,
        player_hint: Option<&str>,
        ip: Option<IpAddr>,
        user_agent: Option<&str>,
    ) -> RelayResult<Admission> {
        if let Some(token) = token.filter(|t| !t.is_empty()) {
            let session = self
                .sessions
                .get_session_by_token(token)
                .await?
                .ok_or(RelayError::Unauthorized)?;
            let player_id = (!is_anonymous(&session.player_id)).then(|| session.player_id.clone());
            return Ok(Admission {
                session: Some(session),
                player_id,
            });
        }

        if self.config.require_session {
            return Err(RelayError::Unauthorized);
        }

        if let Some(player_id) = player_hint.filter(|p| !p.is_empty()) {
            // A live session for this player must be resumed with its token
            if self
                .sessions
                .get_session_by_player_id(player_id)
                .await?
                .is_some()
            {
                warn!(player_id, "Player hint for an existing session without its token");
                return Err(RelayError::Unauthorized);
            }
            let session = self
                .sessions
                .create_session(player_id, ip, user_agent)
                .await?;
            return Ok(Admission {
                session: Some(session),
                player_id: Some(player_id.to_owned()),
            });
        }

        let session = self
            .sessions
            .create_session(&anonymous_player_id(), ip, user_agent)
            .await?;
        Ok(Admission {
            session: Some(session),
            player_id: None,
        })
    }

    /// Tear a connection down; only the first call for an id does any work
    pub async fn remove_connection(&self, id: ConnectionId, reason: DisconnectReason) -> bool {
        let Some(conn) = self.connection(id) else {
            return false;
        };
        if !conn.begin_close() {
            return false;
        }

        conn.close_sink(self.tick.write_deadline()).await;

        {
            let mut table = self.connections.write();
            table.by_id.remove(&id);
            if conn.kind == TransportKind::Udp && table.by_udp_addr.get(&conn.remote) == Some(&id) {
                table.by_udp_addr.remove(&conn.remote);
            }
        }

        let state = self.delta_states.write().remove(&id);
        if let Some(state) = state {
            let last = state.lock().last_sent.take();
            if let Some(last) = last {
                self.snapshots.release(last);
            }
        }

        if let Some(player_id) = conn.player_id() {
            self.spatial.remove(&player_id);
            self.players.remove(&player_id);
        }

        conn.cancel_token().cancel();
        conn.mark_closed();

        if let Some(token) = conn.session_token() {
            if let Err(e) = self.sessions.disconnect_session(&token).await {
                debug!(conn_id = %id, error = %e, "Session disconnect failed");
            }
        }

        self.metrics.connection_closed(conn.kind);
        info!(
            conn_id = %id,
            transport = conn.kind.as_str(),
            reason = %reason,
            "Connection closed"
        );
        true
    }

    /// Tear a connection down in the background
    pub fn schedule_removal(self: &Arc<Self>, id: ConnectionId, reason: DisconnectReason) {
        let relay = Arc::clone(self);
        self.tracker.spawn(async move {
            relay.remove_connection(id, reason).await;
        });
    }

    // ========================================================================
    // Client messages
    // ========================================================================

    /// Decode and handle one client frame
    pub async fn handle_client_bytes(self: &Arc<Self>, conn: &Arc<Connection>, data: Bytes) {
        conn.touch();
        match decode_client(&data) {
            Ok(frame) => self.handle_client_frame(conn, frame, data).await,
            Err(e) => self.record_decode_error(Some(conn.id), conn.remote, &data, &e),
        }
    }

    pub fn record_decode_error(
        &self,
        conn_id: Option<ConnectionId>,
        remote: SocketAddr,
        data: &[u8],
        error: &WireError,
    ) {
        self.metrics.incr(Counter::DecodeError);
        let head = hex::encode(&data[..data.len().min(HEX_DUMP_LIMIT)]);
        warn!(
            conn_id = ?conn_id,
            remote = %remote,
            bytes = data.len(),
            error = %error,
            head = %head,
            "Failed to decode client message"
        );
    }

    /// Handle an already-decoded frame; `raw` is forwarded upstream for inputs
    pub async fn handle_client_frame(
        self: &Arc<Self>,
        conn: &Arc<Connection>,
        frame: ClientFrame,
        raw: Bytes,
    ) {
        conn.touch();
        if conn.activate() {
            debug!(conn_id = %conn.id, "Connection active");
        }

        match frame.message {
            ClientMessage::Heartbeat(hb) => {
                self.metrics.incr(Counter::Heartbeat);
                if let Some(token) = conn.session_token() {
                    if let Err(e) = self.sessions.update_heartbeat(&token).await {
                        debug!(conn_id = %conn.id, error = %e, "Session heartbeat failed");
                    }
                }
                let now = unix_millis();
                let ack = ServerMessage::HeartbeatAck(HeartbeatAck {
                    server_time_ms: now as i64,
                    rtt_estimate_ms: rtt_estimate_ms(hb.client_time_ms, now),
                });
                self.reply(conn, &ack).await;
            }
            ClientMessage::Echo(payload) => {
                self.metrics.incr(Counter::Echo);
                self.reply(conn, &ServerMessage::Echo(payload)).await;
            }
            ClientMessage::PlayerInput(input) => self.handle_input(conn, input, raw).await,
        }
    }

    async fn handle_input(
        self: &Arc<Self>,
        conn: &Arc<Connection>,
        input: PlayerInput,
        raw: Bytes,
    ) {
        self.metrics.incr(Counter::Input);

        if !conn.check_input_rate() {
            self.metrics.incr(Counter::RateLimited);
            debug!(conn_id = %conn.id, "Rate limited input message");
            return;
        }

        let player_id = if input.player_id.is_empty() {
            match conn.player_id() {
                Some(bound) => bound,
                None => {
                    self.metrics.incr(Counter::Dropped);
                    debug!(conn_id = %conn.id, "Input without player id on unbound connection");
                    return;
                }
            }
        } else {
            match conn.bind_player(&input.player_id) {
                PlayerBinding::Mismatch => {
                    self.metrics.incr(Counter::PlayerMismatch);
                    warn!(
                        conn_id = %conn.id,
                        player_id = %input.player_id,
                        bound = ?conn.player_id(),
                        "Input for a different player dropped"
                    );
                    return;
                }
                PlayerBinding::Bound => {
                    info!(conn_id = %conn.id, player_id = %input.player_id, "Player bound");
                    input.player_id.clone()
                }
                PlayerBinding::Matched => input.player_id.clone(),
            }
        };

        let position = {
            let mut player = self
                .players
                .entry(player_id.clone())
                .or_insert_with(|| PlayerState::new(player_id.clone()));
            player.apply_input(&input);
            player.position()
        };
        self.spatial.update(&player_id, position);

        match self.upstream.forward(raw, self.tick.write_deadline()).await {
            Ok(Forward::Sent) => self.metrics.incr(Counter::Forwarded),
            Ok(Forward::NoUpstream) => self.metrics.incr(Counter::Dropped),
            Err(e) => {
                self.metrics.incr(Counter::Dropped);
                debug!(conn_id = %conn.id, error = %e, "Input forward failed");
            }
        }
    }

    async fn reply(self: &Arc<Self>, conn: &Arc<Connection>, message: &ServerMessage) {
        let mut buf = self.buffers.acquire();
        encode_server(message, &mut buf);
        let payload = Bytes::copy_from_slice(&buf);
        self.buffers.release(buf);

        if let Err(e) = conn
            .send(Outbound::Binary(payload), self.tick.write_deadline())
            .await
        {
            debug!(conn_id = %conn.id, error = %e, "Reply failed");
            self.schedule_removal(conn.id, DisconnectReason::WriteFailed);
        }
    }

    // ========================================================================
    // Snapshots
    // ========================================================================

    /// Store an authoritative snapshot for the next tick; a newer one replaces it
    pub fn submit_snapshot(&self, snapshot: GameStateSnapshot) {
        self.metrics.incr(Counter::SnapshotReceived);

        let mut seen = HashSet::with_capacity(snapshot.entities.len());
        for entity in &snapshot.entities {
            if entity.is_removal() {
                continue;
            }
            self.spatial
                .update(&entity.id, Position::new(entity.x, entity.y, entity.z));
            if let Some(mut player) = self.players.get_mut(&entity.id) {
                player.reconcile(entity);
            }
            seen.insert(entity.id.clone());
        }

        let gone: Vec<String> = {
            let mut known = self.known_entities.lock();
            let gone = known.difference(&seen).cloned().collect();
            *known = seen;
            gone
        };
        for id in gone {
            if !self.players.contains_key(&id) {
                self.spatial.remove(&id);
            }
        }

        let replaced = self.pending.lock().replace(Arc::new(snapshot));
        if replaced.is_some() {
            self.metrics.incr(Counter::SnapshotCoalesced);
        }
    }

    pub fn take_pending(&self) -> Option<Arc<GameStateSnapshot>> {
        self.pending.lock().take()
    }

    /// Broadcast the pending snapshot, if any
    pub async fn broadcast_pending(self: &Arc<Self>) -> Option<BroadcastReport> {
        let snapshot = self.take_pending()?;
        Some(broadcast(self, snapshot).await)
    }

    // ========================================================================
    // Background loops
    // ========================================================================

    /// Spawn the tick and idle-sweep loops
    pub fn start(self: &Arc<Self>) {
        self.tracker.spawn(Arc::clone(self).run_tick_loop());
        self.tracker.spawn(Arc::clone(self).run_sweep_loop());
    }

    async fn run_tick_loop(self: Arc<Self>) {
        let mut hz = self.tick.update(self.connection_count());
        self.metrics.set_tick_hz(hz);
        let mut ticker = interval(self.tick.current_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!(hz, "Tick loop started");

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let next = self.tick.update(self.connection_count());
            if next != hz {
                info!(from = hz, to = next, "Tick rate changed");
                hz = next;
                self.metrics.set_tick_hz(hz);
                let period = self.tick.current_interval();
                ticker = interval_at(Instant::now() + period, period);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            }

            if let Some(report) = self.broadcast_pending().await {
                if report.failed > 0 {
                    debug!(
                        failed = report.failed,
                        recipients = report.recipients,
                        "Broadcast had failures"
                    );
                }
            }
        }

        debug!("Tick loop stopped");
    }

    async fn run_sweep_loop(self: Arc<Self>) {
        let mut ticker = interval(self.config.sweep_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let removed = self.sweep_idle().await;
            if removed > 0 {
                info!(removed, "Idle connections removed");
            }

            match self.sessions.cleanup_stale(self.config.session_ttl).await {
                Ok(0) => {}
                Ok(n) => debug!(removed = n, "Stale sessions cleaned up"),
                Err(e) => warn!(error = %e, "Session cleanup failed"),
            }
        }

        debug!("Sweep loop stopped");
    }

    /// Remove every connection silent for longer than the idle timeout
    pub async fn sweep_idle(&self) -> usize {
        let now = unix_millis();
        let idle: Vec<ConnectionId> = self
            .connections()
            .into_iter()
            .filter(|c| c.idle_for(now) > self.config.idle_timeout)
            .map(|c| c.id)
            .collect();

        let mut removed = 0;
        for id in idle {
            if self.remove_connection(id, DisconnectReason::IdleTimeout).await {
                removed += 1;
            }
        }
        removed
    }

    /// Cancel every task, close every connection and wait for the tracker
    pub async fn shutdown(&self) {
        info!(connections = self.connection_count(), "Relay shutting down");
        self.shutdown.cancel();

        for conn in self.connections() {
            self.remove_connection(conn.id, DisconnectReason::Shutdown).await;
        }
        self.upstream.close().await;

        self.tracker.close();
        self.tracker.wait().await;
        info!("Relay stopped");
    }
}
