//! Fan-out of one authoritative snapshot to every connection
//!
//! The connection set is copied once and split into chunks, one per worker on
//! a `JoinSet`. A worker holds a connection's write lock for the whole
//! delta/encode/write sequence, so per-connection writes never interleave.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use serde::Serialize;
use tokio::task::JoinSet;
use tracing::{debug, warn};

use crate::game::{compute_delta, Position};
use crate::util::compress::PayloadClass;
use crate::util::time::Timer;
use crate::wire::{encode_snapshot, GameStateSnapshot};

use super::connection::{Connection, ConnectionState, DisconnectReason, Outbound, TransportKind};
use super::relay::Relay;

/// Counts from one broadcast
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BroadcastReport {
    pub recipients: usize,
    pub delivered: usize,
    /// Nothing changed for the recipient, nothing was sent
    pub unchanged: usize,
    /// Connection was not active or had no delta state
    pub skipped: usize,
    pub failed: usize,
    pub bytes: u64,
}

#[derive(Default)]
struct Tally {
    delivered: AtomicUsize,
    unchanged: AtomicUsize,
    skipped: AtomicUsize,
    failed: AtomicUsize,
    bytes: AtomicU64,
}

enum Delivery {
    Sent(usize),
    Unchanged,
    Skipped,
    Failed,
}

/// Send `snapshot` to every connection and wait for all workers
pub async fn broadcast(relay: &Arc<Relay>, snapshot: Arc<GameStateSnapshot>) -> BroadcastReport {
    let timer = Timer::new();
    let targets = relay.connections();
    let recipients = targets.len();
    if recipients == 0 {
        return BroadcastReport::default();
    }

    let workers = relay.config().broadcast_workers.clamp(1, recipients);
    let chunk_size = recipients.div_ceil(workers);
    let tally = Arc::new(Tally::default());

    let mut set = JoinSet::new();
    for chunk in targets.chunks(chunk_size) {
        let chunk = chunk.to_vec();
        let relay = Arc::clone(relay);
        let snapshot = Arc::clone(&snapshot);
        let tally = Arc::clone(&tally);

        set.spawn(async move {
            for conn in chunk {
                match deliver(&relay, &conn, &snapshot).await {
                    Delivery::Sent(bytes) => {
                        tally.delivered.fetch_add(1, Ordering::Relaxed);
                        tally.bytes.fetch_add(bytes as u64, Ordering::Relaxed);
                    }
                    Delivery::Unchanged => {
                        tally.unchanged.fetch_add(1, Ordering::Relaxed);
                    }
                    Delivery::Skipped => {
                        tally.skipped.fetch_add(1, Ordering::Relaxed);
                    }
                    Delivery::Failed => {
                        tally.failed.fetch_add(1, Ordering::Relaxed);
                        relay.schedule_removal(conn.id, DisconnectReason::WriteFailed);
                    }
                }
            }
        });
    }

    while let Some(joined) = set.join_next().await {
        if let Err(e) = joined {
            warn!(error = %e, "Broadcast worker panicked");
        }
    }

    let report = BroadcastReport {
        recipients,
        delivered: tally.delivered.load(Ordering::Relaxed),
        unchanged: tally.unchanged.load(Ordering::Relaxed),
        skipped: tally.skipped.load(Ordering::Relaxed),
        failed: tally.failed.load(Ordering::Relaxed),
        bytes: tally.bytes.load(Ordering::Relaxed),
    };

    let elapsed_us = timer.elapsed_micros();
    relay
        .metrics()
        .record_broadcast(&report, std::time::Duration::from_micros(elapsed_us));
    debug!(
        tick = snapshot.tick,
        recipients,
        delivered = report.delivered,
        unchanged = report.unchanged,
        failed = report.failed,
        bytes = report.bytes,
        elapsed_us,
        "Broadcast complete"
    );
    report
}

async fn deliver(relay: &Relay, conn: &Connection, snapshot: &GameStateSnapshot) -> Delivery {
    let mut sink = conn.lock_sink().await;
    if conn.state() != ConnectionState::Active {
        return Delivery::Skipped;
    }
    let Some(state) = relay.delta_state(conn.id) else {
        return Delivery::Skipped;
    };

    let pool = relay.snapshot_pool();
    let view = build_view(relay, conn, snapshot);
    let delta = {
        let state = state.lock();
        compute_delta(state.last_sent.as_ref(), &view, pool)
    };
    let Some(delta) = delta else {
        pool.release(view);
        return Delivery::Unchanged;
    };

    let mut buf = relay.buffer_pool().acquire();
    encode_snapshot(&delta, &mut buf);
    pool.release(delta);
    let mut payload = Bytes::copy_from_slice(&buf);
    relay.buffer_pool().release(buf);
    relay.metrics().record_payload(payload.len());

    if let Some(compressor) = relay.compressor() {
        match compressor.compress(payload.clone(), PayloadClass::Realtime) {
            Ok((compressed, _)) => payload = compressed,
            Err(e) => debug!(conn_id = %conn.id, error = %e, "Compression failed, sending raw"),
        }
    }

    let bytes = payload.len();
    let deadline = relay.tick().write_deadline();
    let written = tokio::time::timeout(deadline, sink.send(Outbound::Binary(payload))).await;

    match written {
        Ok(Ok(())) => {
            let previous = state.lock().last_sent.replace(view);
            if let Some(previous) = previous {
                pool.release(previous);
            }
            Delivery::Sent(bytes)
        }
        Ok(Err(e)) => {
            debug!(conn_id = %conn.id, error = %e, "Broadcast write failed");
            pool.release(view);
            Delivery::Failed
        }
        Err(_) => {
            debug!(conn_id = %conn.id, ?deadline, "Broadcast write timed out");
            pool.release(view);
            Delivery::Failed
        }
    }
}

/// Entities this recipient should see, copied into a pooled snapshot
///
/// UDP recipients with a known position get only the entities near them plus
/// their own; everyone else gets the whole snapshot.
fn build_view(
    relay: &Relay,
    conn: &Connection,
    snapshot: &GameStateSnapshot,
) -> GameStateSnapshot {
    let mut view = relay.snapshot_pool().acquire();

    let interest = match (conn.kind, relay.interest_radius()) {
        (TransportKind::Udp, Some(radius)) => conn.player_id().and_then(|player_id| {
            let pos = recipient_position(relay, &player_id, snapshot)?;
            Some((player_id, pos, radius))
        }),
        _ => None,
    };

    match interest {
        Some((player_id, pos, radius)) => {
            let mut visible: HashSet<String> =
                relay.spatial().nearby(pos, radius).into_iter().collect();
            visible.insert(player_id);
            view.tick = snapshot.tick;
            view.entities.extend(
                snapshot
                    .entities
                    .iter()
                    .filter(|e| visible.contains(&e.id))
                    .cloned(),
            );
        }
        None => view.copy_from(snapshot),
    }

    view
}

fn recipient_position(
    relay: &Relay,
    player_id: &str,
    snapshot: &GameStateSnapshot,
) -> Option<Position> {
    if let Some(player) = relay.player(player_id) {
        return Some(player.position());
    }
    snapshot
        .entity(player_id)
        .map(|e| Position::new(e.x, e.y, e.z))
}
