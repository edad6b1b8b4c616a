//! Binary wire protocol shared by game clients and the dedicated server

pub mod codec;
pub mod error;
pub mod message;
pub mod quantize;
pub mod varint;

pub use codec::{
    decode_client, decode_server, encode_client, encode_input, encode_server, encode_snapshot,
};
pub use error::{WireError, WireResult};
pub use message::{
    ChangeMask, ClientFrame, ClientMessage, EntityState, GameStateSnapshot, Heartbeat,
    HeartbeatAck, PlayerInput, ServerMessage, MAX_PLAYER_ID_LEN,
};
pub use quantize::{dequantize, quantize, SCALE};
