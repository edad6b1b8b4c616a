//! Application state shared across routes

use std::sync::Arc;

use crate::config::Config;
use crate::net::Relay;
use crate::session::{InMemorySessionStore, SessionStore};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub relay: Arc<Relay>,
    pub sessions: Arc<dyn SessionStore>,
}

impl AppState {
    /// State backed by the bundled in-memory session store
    pub fn new(config: Config) -> Self {
        Self::with_sessions(config, Arc::new(InMemorySessionStore::new()))
    }

    pub fn with_sessions(config: Config, sessions: Arc<dyn SessionStore>) -> Self {
        let config = Arc::new(config);

        // The relay owns every connection table; routes only hold a handle
        let relay = Arc::new(Relay::new(config.clone(), sessions.clone()));

        Self {
            config,
            relay,
            sessions,
        }
    }
}
