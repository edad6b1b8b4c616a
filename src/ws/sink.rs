//! WebSocket write half as a [`PeerSink`]

use async_trait::async_trait;
use axum::extract::ws::{Message, WebSocket};
use futures::stream::SplitSink;
use futures::SinkExt;

use crate::net::{Outbound, PeerSink, TransportError};

pub struct WsSink {
    inner: SplitSink<WebSocket, Message>,
}

impl WsSink {
    pub fn new(inner: SplitSink<WebSocket, Message>) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl PeerSink for WsSink {
    async fn send(&mut self, frame: Outbound) -> Result<(), TransportError> {
        let message = match frame {
            Outbound::Binary(bytes) => Message::Binary(bytes.to_vec()),
            Outbound::Text(text) => Message::Text(text),
            Outbound::Ping(bytes) => Message::Ping(bytes.to_vec()),
        };
        self.inner
            .send(message)
            .await
            .map_err(|e| TransportError::WebSocket(e.to_string()))
    }

    async fn close(&mut self) {
        let _ = self.inner.send(Message::Close(None)).await;
        let _ = self.inner.close().await;
    }
}
