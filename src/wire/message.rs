//! Message types carried by the wire codec
//!
//! Poses are fixed-point integers (see [`super::quantize`]) so equality checks
//! during delta computation are exact.

use bitflags::bitflags;
use bytes::Bytes;

/// Maximum encoded length of a player id
pub const MAX_PLAYER_ID_LEN: usize = 20;

bitflags! {
    /// Which fields of an [`EntityState`] carry meaning
    ///
    /// An empty mask is a full record. Field bits mark a partial update and
    /// `REMOVED` marks an entity that left the snapshot.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ChangeMask: u32 {
        const X = 1 << 0;
        const Y = 1 << 1;
        const Z = 1 << 2;
        const VX = 1 << 3;
        const VY = 1 << 4;
        const VZ = 1 << 5;
        const YAW = 1 << 6;
        const REMOVED = 1 << 7;
    }
}

/// One simulated actor's pose at a tick
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct EntityState {
    pub id: String,
    pub x: i32,
    pub y: i32,
    pub z: i32,
    pub vx: i32,
    pub vy: i32,
    pub vz: i32,
    pub yaw: i32,
    pub mask: ChangeMask,
}

impl EntityState {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Self::default()
        }
    }

    pub fn at(id: impl Into<String>, x: i32, y: i32, z: i32) -> Self {
        Self {
            id: id.into(),
            x,
            y,
            z,
            ..Self::default()
        }
    }

    /// Removal record: id only, every field zero
    pub fn removal(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            mask: ChangeMask::REMOVED,
            ..Self::default()
        }
    }

    #[inline]
    pub fn is_removal(&self) -> bool {
        self.mask.contains(ChangeMask::REMOVED)
    }

    /// True when both records describe the same pose, ignoring the mask
    pub fn same_pose(&self, other: &EntityState) -> bool {
        self.x == other.x
            && self.y == other.y
            && self.z == other.z
            && self.vx == other.vx
            && self.vy == other.vy
            && self.vz == other.vz
            && self.yaw == other.yaw
    }
}

/// One authoritative world snapshot
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct GameStateSnapshot {
    pub tick: i64,
    pub entities: Vec<EntityState>,
}

impl GameStateSnapshot {
    pub fn new(tick: i64) -> Self {
        Self {
            tick,
            entities: Vec::new(),
        }
    }

    pub fn with_entities(tick: i64, entities: Vec<EntityState>) -> Self {
        Self { tick, entities }
    }

    pub fn entity(&self, id: &str) -> Option<&EntityState> {
        self.entities.iter().find(|e| e.id == id)
    }

    /// Overwrite `self` with the contents of `other`, reusing allocations
    pub fn copy_from(&mut self, other: &GameStateSnapshot) {
        self.tick = other.tick;
        self.entities.clear();
        self.entities.extend(other.entities.iter().cloned());
    }
}

/// One client's intent for a tick
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PlayerInput {
    pub player_id: String,
    pub tick: i64,
    pub move_x: i32,
    pub move_y: i32,
    pub aim_x: i32,
    pub aim_y: i32,
    pub shoot: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Heartbeat {
    pub client_time_ms: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HeartbeatAck {
    pub server_time_ms: i64,
    pub rtt_estimate_ms: i64,
}

/// Messages sent by game clients
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientMessage {
    Heartbeat(Heartbeat),
    Echo(Bytes),
    PlayerInput(PlayerInput),
}

impl ClientMessage {
    pub fn kind(&self) -> &'static str {
        match self {
            ClientMessage::Heartbeat(_) => "heartbeat",
            ClientMessage::Echo(_) => "echo",
            ClientMessage::PlayerInput(_) => "player_input",
        }
    }
}

/// A decoded client datagram or frame, with the optional session token
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientFrame {
    pub token: Option<String>,
    pub message: ClientMessage,
}

impl ClientFrame {
    pub fn new(message: ClientMessage) -> Self {
        Self {
            token: None,
            message,
        }
    }

    pub fn with_token(token: impl Into<String>, message: ClientMessage) -> Self {
        Self {
            token: Some(token.into()),
            message,
        }
    }
}

/// Messages sent by the relay to clients, and by the dedicated server to the relay
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerMessage {
    HeartbeatAck(HeartbeatAck),
    Echo(Bytes),
    GameState(GameStateSnapshot),
}
