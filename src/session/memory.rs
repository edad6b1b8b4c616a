//! DashMap-backed session store

use std::net::IpAddr;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use tracing::debug;
use uuid::Uuid;

use super::{Session, SessionError, SessionResult, SessionStore};

#[derive(Default)]
pub struct InMemorySessionStore {
    by_token: DashMap<String, Session>,
    /// player_id -> token
    by_player: DashMap<String, String>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.by_token.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_token.is_empty()
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn create_session(
        &self,
        player_id: &str,
        ip: Option<IpAddr>,
        user_agent: Option<&str>,
    ) -> SessionResult<Session> {
        let now = Utc::now();
        let session = Session {
            token: Uuid::new_v4().simple().to_string(),
            player_id: player_id.to_owned(),
            ip,
            user_agent: user_agent.map(str::to_owned),
            created_at: now,
            last_heartbeat: now,
            connected: true,
            reconnect_count: 0,
        };

        // a player holds one session at a time
        if let Some(old) = self
            .by_player
            .insert(player_id.to_owned(), session.token.clone())
        {
            self.by_token.remove(&old);
        }
        self.by_token.insert(session.token.clone(), session.clone());

        debug!(player_id, "Session created");
        Ok(session)
    }

    async fn get_session_by_token(&self, token: &str) -> SessionResult<Option<Session>> {
        Ok(self.by_token.get(token).map(|s| s.clone()))
    }

    async fn get_session_by_player_id(&self, player_id: &str) -> SessionResult<Option<Session>> {
        let Some(token) = self.by_player.get(player_id).map(|t| t.clone()) else {
            return Ok(None);
        };
        Ok(self.by_token.get(&token).map(|s| s.clone()))
    }

    async fn update_heartbeat(&self, token: &str) -> SessionResult<()> {
        let mut session = self.by_token.get_mut(token).ok_or(SessionError::NotFound)?;
        session.last_heartbeat = Utc::now();
        Ok(())
    }

    async fn disconnect_session(&self, token: &str) -> SessionResult<()> {
        let mut session = self.by_token.get_mut(token).ok_or(SessionError::NotFound)?;
        session.connected = false;
        Ok(())
    }

    async fn reconnect_session(
        &self,
        token: &str,
        ip: Option<IpAddr>,
        user_agent: Option<&str>,
    ) -> SessionResult<Session> {
        let mut session = self.by_token.get_mut(token).ok_or(SessionError::NotFound)?;
        session.connected = true;
        session.last_heartbeat = Utc::now();
        session.reconnect_count += 1;
        if ip.is_some() {
            session.ip = ip;
        }
        if let Some(agent) = user_agent {
            session.user_agent = Some(agent.to_owned());
        }
        Ok(session.clone())
    }

    async fn cleanup_stale(&self, max_idle: Duration) -> SessionResult<usize> {
        let max_idle = chrono::Duration::from_std(max_idle)
            .map_err(|e| SessionError::Backend(e.to_string()))?;
        let cutoff = Utc::now() - max_idle;

        let stale: Vec<(String, String)> = self
            .by_token
            .iter()
            .filter(|s| s.last_heartbeat <= cutoff)
            .map(|s| (s.token.clone(), s.player_id.clone()))
            .collect();

        for (token, player_id) in &stale {
            self.by_token.remove(token);
            self.by_player.remove_if(player_id, |_, t| t == token);
        }

        if !stale.is_empty() {
            debug!(removed = stale.len(), "Stale sessions removed");
        }
        Ok(stale.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_create_and_lookup() {
        let store = InMemorySessionStore::new();
        let session = store.create_session("p1", None, Some("ua")).await.unwrap();

        let by_token = store.get_session_by_token(&session.token).await.unwrap();
        assert_eq!(by_token.as_ref(), Some(&session));
        let by_player = store.get_session_by_player_id("p1").await.unwrap();
        assert_eq!(by_player, Some(session));
        assert!(store.get_session_by_token("nope").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_new_session_replaces_old_for_player() {
        let store = InMemorySessionStore::new();
        let first = store.create_session("p1", None, None).await.unwrap();
        let second = store.create_session("p1", None, None).await.unwrap();
        assert!(store.get_session_by_token(&first.token).await.unwrap().is_none());
        assert!(store.get_session_by_token(&second.token).await.unwrap().is_some());
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_disconnect_then_reconnect() {
        let store = InMemorySessionStore::new();
        let session = store.create_session("p1", None, None).await.unwrap();
        store.disconnect_session(&session.token).await.unwrap();
        assert!(!store
            .get_session_by_token(&session.token)
            .await
            .unwrap()
            .unwrap()
            .connected);

        let ip: IpAddr = "10.0.0.7".parse().unwrap();
        let back = store
            .reconnect_session(&session.token, Some(ip), Some("client/2"))
            .await
            .unwrap();
        assert!(back.connected);
        assert_eq!(back.reconnect_count, 1);
        assert_eq!(back.ip, Some(ip));
        assert_eq!(back.user_agent.as_deref(), Some("client/2"));
    }

    #[tokio::test]
    async fn test_unknown_token_is_not_found() {
        let store = InMemorySessionStore::new();
        assert!(matches!(
            store.update_heartbeat("missing").await,
            Err(SessionError::NotFound)
        ));
    }

    #[tokio::test]
    async fn test_cleanup_stale_removes_idle_sessions() {
        let store = InMemorySessionStore::new();
        store.create_session("p1", None, None).await.unwrap();
        assert_eq!(store.cleanup_stale(Duration::from_secs(60)).await.unwrap(), 0);
        assert_eq!(store.cleanup_stale(Duration::ZERO).await.unwrap(), 1);
        assert!(store.is_empty());
        assert!(store.get_session_by_player_id("p1").await.unwrap().is_none());
    }
}
