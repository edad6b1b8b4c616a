//! Relay counters and gauges
//!
//! Everything is a relaxed atomic; `/metrics` reads a [`MetricsSnapshot`].

use std::sync::atomic::{AtomicI64, AtomicU32, AtomicU64, Ordering};
use std::time::Duration;

use serde::Serialize;

use crate::game::PoolStats;

use super::broadcast::BroadcastReport;
use super::connection::TransportKind;

#[derive(Debug, Default)]
pub struct RelayMetrics {
    ws_connections: AtomicI64,
    udp_connections: AtomicI64,
    connections_total: AtomicU64,

    inputs: AtomicU64,
    heartbeats: AtomicU64,
    echoes: AtomicU64,
    decode_errors: AtomicU64,
    rate_limited: AtomicU64,
    player_mismatches: AtomicU64,
    forwarded: AtomicU64,
    dropped: AtomicU64,

    snapshots_received: AtomicU64,
    snapshots_coalesced: AtomicU64,

    broadcasts: AtomicU64,
    deliveries_ok: AtomicU64,
    deliveries_unchanged: AtomicU64,
    deliveries_skipped: AtomicU64,
    deliveries_failed: AtomicU64,
    bytes_sent: AtomicU64,
    last_broadcast_us: AtomicU64,
    max_broadcast_us: AtomicU64,
    last_payload_bytes: AtomicU64,
    max_payload_bytes: AtomicU64,

    tick_hz: AtomicU32,
}

/// Counter categories bumped by message handling
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Counter {
    Input,
    Heartbeat,
    Echo,
    DecodeError,
    RateLimited,
    PlayerMismatch,
    Forwarded,
    Dropped,
    SnapshotReceived,
    SnapshotCoalesced,
}

impl RelayMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    fn gauge(&self, kind: TransportKind) -> &AtomicI64 {
        match kind {
            TransportKind::WebSocket => &self.ws_connections,
            TransportKind::Udp => &self.udp_connections,
        }
    }

    pub fn connection_opened(&self, kind: TransportKind) {
        self.gauge(kind).fetch_add(1, Ordering::Relaxed);
        self.connections_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_closed(&self, kind: TransportKind) {
        self.gauge(kind).fetch_sub(1, Ordering::Relaxed);
    }

    fn counter(&self, counter: Counter) -> &AtomicU64 {
        match counter {
            Counter::Input => &self.inputs,
            Counter::Heartbeat => &self.heartbeats,
            Counter::Echo => &self.echoes,
            Counter::DecodeError => &self.decode_errors,
            Counter::RateLimited => &self.rate_limited,
            Counter::PlayerMismatch => &self.player_mismatches,
            Counter::Forwarded => &self.forwarded,
            Counter::Dropped => &self.dropped,
            Counter::SnapshotReceived => &self.snapshots_received,
            Counter::SnapshotCoalesced => &self.snapshots_coalesced,
        }
    }

    pub fn incr(&self, counter: Counter) {
        self.counter(counter).fetch_add(1, Ordering::Relaxed);
    }

    pub fn get(&self, counter: Counter) -> u64 {
        self.counter(counter).load(Ordering::Relaxed)
    }

    pub fn record_broadcast(&self, report: &BroadcastReport, elapsed: Duration) {
        let micros = elapsed.as_micros() as u64;
        self.broadcasts.fetch_add(1, Ordering::Relaxed);
        self.deliveries_ok
            .fetch_add(report.delivered as u64, Ordering::Relaxed);
        self.deliveries_unchanged
            .fetch_add(report.unchanged as u64, Ordering::Relaxed);
        self.deliveries_skipped
            .fetch_add(report.skipped as u64, Ordering::Relaxed);
        self.deliveries_failed
            .fetch_add(report.failed as u64, Ordering::Relaxed);
        self.bytes_sent.fetch_add(report.bytes, Ordering::Relaxed);
        self.last_broadcast_us.store(micros, Ordering::Relaxed);
        self.max_broadcast_us.fetch_max(micros, Ordering::Relaxed);
    }

    pub fn record_payload(&self, bytes: usize) {
        self.last_payload_bytes
            .store(bytes as u64, Ordering::Relaxed);
        self.max_payload_bytes
            .fetch_max(bytes as u64, Ordering::Relaxed);
    }

    pub fn set_tick_hz(&self, hz: u32) {
        self.tick_hz.store(hz, Ordering::Relaxed);
    }

    pub fn snapshot(&self, snapshot_pool: PoolStats, buffer_pool: PoolStats) -> MetricsSnapshot {
        let load = |a: &AtomicU64| a.load(Ordering::Relaxed);
        MetricsSnapshot {
            connections: ConnectionGauges {
                websocket: self.ws_connections.load(Ordering::Relaxed).max(0) as u64,
                udp: self.udp_connections.load(Ordering::Relaxed).max(0) as u64,
                total_accepted: load(&self.connections_total),
            },
            messages: MessageCounters {
                inputs: load(&self.inputs),
                heartbeats: load(&self.heartbeats),
                echoes: load(&self.echoes),
                decode_errors: load(&self.decode_errors),
                rate_limited: load(&self.rate_limited),
                player_mismatches: load(&self.player_mismatches),
                forwarded: load(&self.forwarded),
                dropped: load(&self.dropped),
            },
            snapshots: SnapshotCounters {
                received: load(&self.snapshots_received),
                coalesced: load(&self.snapshots_coalesced),
            },
            broadcast: BroadcastCounters {
                broadcasts: load(&self.broadcasts),
                delivered: load(&self.deliveries_ok),
                unchanged: load(&self.deliveries_unchanged),
                skipped: load(&self.deliveries_skipped),
                failed: load(&self.deliveries_failed),
                bytes_sent: load(&self.bytes_sent),
                last_duration_us: load(&self.last_broadcast_us),
                max_duration_us: load(&self.max_broadcast_us),
                last_payload_bytes: load(&self.last_payload_bytes),
                max_payload_bytes: load(&self.max_payload_bytes),
            },
            tick_hz: self.tick_hz.load(Ordering::Relaxed),
            snapshot_pool,
            buffer_pool,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub connections: ConnectionGauges,
    pub messages: MessageCounters,
    pub snapshots: SnapshotCounters,
    pub broadcast: BroadcastCounters,
    pub tick_hz: u32,
    pub snapshot_pool: PoolStats,
    pub buffer_pool: PoolStats,
}

#[derive(Debug, Clone, Serialize)]
pub struct ConnectionGauges {
    pub websocket: u64,
    pub udp: u64,
    pub total_accepted: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct MessageCounters {
    pub inputs: u64,
    pub heartbeats: u64,
    pub echoes: u64,
    pub decode_errors: u64,
    pub rate_limited: u64,
    pub player_mismatches: u64,
    pub forwarded: u64,
    pub dropped: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct SnapshotCounters {
    pub received: u64,
    pub coalesced: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct BroadcastCounters {
    pub broadcasts: u64,
    pub delivered: u64,
    pub unchanged: u64,
    pub skipped: u64,
    pub failed: u64,
    pub bytes_sent: u64,
    pub last_duration_us: u64,
    pub max_duration_us: u64,
    pub last_payload_bytes: u64,
    pub max_payload_bytes: u64,
}
