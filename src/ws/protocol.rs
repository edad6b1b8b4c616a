//! JSON control messages carried in WebSocket text frames
//!
//! Game traffic uses binary frames; text frames are a small control channel.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Messages sent from client to server as text
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlMsg {
    /// Ping for latency measurement
    Ping {
        /// Client timestamp
        t: u64,
    },
}

/// Messages sent from server to client as text
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlReply {
    /// Welcome message after connection
    Welcome {
        connection_id: Uuid,
        player_id: Option<String>,
        session_token: Option<String>,
        tick_hz: u32,
        server_time: u64,
    },

    /// Pong response
    Pong {
        /// Echo back client timestamp
        t: u64,
        server_time: u64,
    },
}

impl ControlReply {
    pub fn to_json(&self) -> String {
        // serializing these variants cannot fail: no maps with non-string keys
        serde_json::to_string(self).unwrap_or_else(|_| String::from("{}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ping_parses() {
        let msg: ControlMsg = serde_json::from_str(r#"{"type":"ping","t":42}"#).unwrap();
        assert_eq!(msg, ControlMsg::Ping { t: 42 });
    }

    #[test]
    fn test_unknown_text_does_not_parse() {
        assert!(serde_json::from_str::<ControlMsg>("hello").is_err());
        assert!(serde_json::from_str::<ControlMsg>(r#"{"type":"dance"}"#).is_err());
    }

    #[test]
    fn test_pong_shape() {
        let json = ControlReply::Pong {
            t: 7,
            server_time: 9,
        }
        .to_json();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["type"], "pong");
        assert_eq!(value["t"], 7);
        assert_eq!(value["server_time"], 9);
    }
}
