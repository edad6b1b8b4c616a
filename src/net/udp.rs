//! UDP transport: socket setup, read loop and the per-peer sink

use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;
use tracing::{debug, info, warn};

use crate::wire::{decode_client, ClientMessage};

use super::connection::{Outbound, PeerSink, TransportError, TransportKind};
use super::relay::Relay;

/// Bind a non-blocking UDP socket with address reuse and enlarged buffers
pub fn bind_udp(addr: SocketAddr, buffer_bytes: usize) -> std::io::Result<UdpSocket> {
    let socket = Socket::new(Domain::for_address(addr), Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_reuse_address(true)?;
    if let Err(e) = socket.set_recv_buffer_size(buffer_bytes) {
        warn!(error = %e, buffer_bytes, "Could not set UDP receive buffer");
    }
    if let Err(e) = socket.set_send_buffer_size(buffer_bytes) {
        warn!(error = %e, buffer_bytes, "Could not set UDP send buffer");
    }
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    UdpSocket::from_std(socket.into())
}

/// Write half for one UDP peer; all peers share the socket
pub struct UdpPeer {
    socket: Arc<UdpSocket>,
    addr: SocketAddr,
}

impl UdpPeer {
    pub fn new(socket: Arc<UdpSocket>, addr: SocketAddr) -> Self {
        Self { socket, addr }
    }
}

#[async_trait]
impl PeerSink for UdpPeer {
    async fn send(&mut self, frame: Outbound) -> Result<(), TransportError> {
        match frame {
            Outbound::Binary(bytes) => {
                self.socket.send_to(&bytes, self.addr).await?;
            }
            Outbound::Text(text) => {
                self.socket.send_to(text.as_bytes(), self.addr).await?;
            }
            // no keepalive frames on UDP; clients send heartbeats
            Outbound::Ping(_) => {}
        }
        Ok(())
    }

    async fn close(&mut self) {}
}

/// Receive datagrams until the relay shuts down
pub async fn run_udp_server(relay: Arc<Relay>, socket: Arc<UdpSocket>) {
    match socket.local_addr() {
        Ok(addr) => info!("UDP listening on {}", addr),
        Err(e) => warn!(error = %e, "UDP socket has no local address"),
    }

    let shutdown = relay.shutdown_token().clone();
    loop {
        let mut buf = relay.datagram_pool().acquire();
        let received = tokio::select! {
            _ = shutdown.cancelled() => None,
            received = socket.recv_from(&mut buf) => Some(received),
        };
        let Some(received) = received else {
            relay.datagram_pool().release(buf);
            break;
        };

        let (len, addr) = match received {
            Ok(received) => received,
            Err(e) => {
                relay.datagram_pool().release(buf);
                // ICMP port-unreachable surfaces here on some platforms
                debug!(error = %e, "UDP receive error");
                continue;
            }
        };

        let data = Bytes::copy_from_slice(&buf[..len]);
        relay.datagram_pool().release(buf);
        handle_datagram(&relay, &socket, addr, data).await;
    }

    info!("UDP server stopped");
}

/// Route one datagram, registering the sender on its first valid message
pub async fn handle_datagram(
    relay: &Arc<Relay>,
    socket: &Arc<UdpSocket>,
    addr: SocketAddr,
    data: Bytes,
) {
    if let Some(conn) = relay.connection_by_addr(addr) {
        relay.handle_client_bytes(&conn, data).await;
        return;
    }

    let frame = match decode_client(&data) {
        Ok(frame) => frame,
        Err(e) => {
            relay.record_decode_error(None, addr, &data, &e);
            return;
        }
    };

    let player_hint = match &frame.message {
        ClientMessage::PlayerInput(input) => Some(input.player_id.as_str()),
        _ => None,
    };
    let admission = match relay
        .admit(frame.token.as_deref(), player_hint, Some(addr.ip()), None)
        .await
    {
        Ok(admission) => admission,
        Err(e) => {
            warn!(remote = %addr, error = %e, "UDP peer rejected");
            return;
        }
    };

    let peer = UdpPeer::new(Arc::clone(socket), addr);
    let conn = relay.register_admitted(TransportKind::Udp, addr, Box::new(peer), &admission);
    relay.handle_client_frame(&conn, frame, data).await;
}
