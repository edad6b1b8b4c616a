//! Session lookup used by the transport layer
//!
//! Session issuance belongs to an external service; the relay only needs the
//! capability below. [`InMemorySessionStore`] backs tests and single-node runs.

pub mod memory;

use std::net::IpAddr;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

pub use memory::InMemorySessionStore;

/// A player session
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Session {
    pub token: String,
    pub player_id: String,
    pub ip: Option<IpAddr>,
    pub user_agent: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_heartbeat: DateTime<Utc>,
    pub connected: bool,
    pub reconnect_count: u32,
}

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("session not found")]
    NotFound,

    #[error("session backend error: {0}")]
    Backend(String),
}

pub type SessionResult<T> = Result<T, SessionError>;

#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn create_session(
        &self,
        player_id: &str,
        ip: Option<IpAddr>,
        user_agent: Option<&str>,
    ) -> SessionResult<Session>;

    async fn get_session_by_token(&self, token: &str) -> SessionResult<Option<Session>>;

    async fn get_session_by_player_id(&self, player_id: &str) -> SessionResult<Option<Session>>;

    /// Refresh the heartbeat; fails with [`SessionError::NotFound`] for unknown tokens
    async fn update_heartbeat(&self, token: &str) -> SessionResult<()>;

    async fn disconnect_session(&self, token: &str) -> SessionResult<()>;

    /// Mark a disconnected session live again from a new address
    async fn reconnect_session(
        &self,
        token: &str,
        ip: Option<IpAddr>,
        user_agent: Option<&str>,
    ) -> SessionResult<Session>;

    /// Drop sessions idle for longer than `max_idle`, returning how many went
    async fn cleanup_stale(&self, max_idle: Duration) -> SessionResult<usize>;
}
