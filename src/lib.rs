//! Realtime relay between game clients and an authoritative game server
//!
//! Clients connect over WebSocket (`/ws`) or UDP and send compact binary
//! inputs; the dedicated server attaches on `/server`, receives those inputs
//! and pushes world snapshots back. The relay turns each snapshot into
//! per-client deltas and fans them out on an adaptive tick.

pub mod app;
pub mod config;
pub mod error;
pub mod game;
pub mod http;
pub mod net;
pub mod session;
pub mod util;
pub mod wire;
pub mod ws;

pub use app::AppState;
pub use config::Config;
pub use error::{RelayError, RelayResult};
