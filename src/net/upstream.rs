//! Single slot for the authoritative dedicated-server connection

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::Mutex;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::RelayError;

use super::connection::{Outbound, PeerSink, TransportError};

struct UpstreamPeer {
    id: Uuid,
    sink: Box<dyn PeerSink>,
}

/// Outcome of forwarding client input
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Forward {
    Sent,
    /// No upstream connected; the input is dropped
    NoUpstream,
}

/// Holds at most one upstream; a second registration is refused
#[derive(Default)]
pub struct UpstreamLink {
    slot: Mutex<Option<UpstreamPeer>>,
    connected: AtomicBool,
}

impl UpstreamLink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Lock-free check used before accepting an upgrade
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    pub async fn try_register(&self, id: Uuid, sink: Box<dyn PeerSink>) -> Result<(), RelayError> {
        let mut slot = self.slot.lock().await;
        if slot.is_some() {
            return Err(RelayError::UpstreamConnected);
        }
        *slot = Some(UpstreamPeer { id, sink });
        self.connected.store(true, Ordering::Release);
        info!(upstream_id = %id, "Upstream registered");
        Ok(())
    }

    /// Clear the slot if it still belongs to `id`
    pub async fn unregister(&self, id: Uuid) -> bool {
        let mut slot = self.slot.lock().await;
        match slot.as_ref() {
            Some(peer) if peer.id == id => {
                *slot = None;
                self.connected.store(false, Ordering::Release);
                info!(upstream_id = %id, "Upstream unregistered");
                true
            }
            _ => false,
        }
    }

    /// Send raw client bytes to the upstream within `deadline`
    ///
    /// A failed write clears the slot so a replacement can register.
    pub async fn forward(
        &self,
        payload: Bytes,
        deadline: Duration,
    ) -> Result<Forward, TransportError> {
        let mut slot = self.slot.lock().await;
        let Some(peer) = slot.as_mut() else {
            return Ok(Forward::NoUpstream);
        };

        let write = peer.sink.send(Outbound::Binary(payload));
        let result = match tokio::time::timeout(deadline, write).await {
            Ok(result) => result,
            Err(_) => Err(TransportError::Timeout(deadline)),
        };

        match result {
            Ok(()) => Ok(Forward::Sent),
            Err(e) => {
                warn!(
                    upstream_id = %peer.id,
                    error = %e,
                    "Upstream write failed, dropping upstream"
                );
                if let Some(mut peer) = slot.take() {
                    peer.sink.close().await;
                }
                self.connected.store(false, Ordering::Release);
                Err(e)
            }
        }
    }

    /// Close and clear the current upstream, if any
    pub async fn close(&self) {
        let mut slot = self.slot.lock().await;
        if let Some(mut peer) = slot.take() {
            peer.sink.close().await;
        }
        self.connected.store(false, Ordering::Release);
    }
}
