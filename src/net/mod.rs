//! Transport layer: connections, the relay core, broadcast and UDP

pub mod broadcast;
pub mod connection;
pub mod metrics;
pub mod relay;
pub mod udp;
pub mod upstream;

pub use broadcast::{broadcast, BroadcastReport};
pub use connection::{
    ChannelSink, Connection, ConnectionId, ConnectionState, DisconnectReason, Outbound, PeerSink,
    PlayerBinding, TransportError, TransportKind,
};
pub use metrics::{Counter, MetricsSnapshot, RelayMetrics};
pub use relay::{Admission, ClientDeltaState, Relay};
pub use udp::{bind_udp, run_udp_server, UdpPeer};
pub use upstream::{Forward, UpstreamLink};
