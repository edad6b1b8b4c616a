//! Binary encoder/decoder for client and server messages
//!
//! Encoding computes nested lengths up front so every message is written in
//! a single pass into the caller's buffer. Zero-valued numeric fields and
//! empty strings are omitted; decoders default missing fields to zero.

use bytes::{BufMut, Bytes, BytesMut};

use super::error::{WireError, WireResult};
use super::message::{
    ChangeMask, ClientFrame, ClientMessage, EntityState, GameStateSnapshot, Heartbeat,
    HeartbeatAck, PlayerInput, ServerMessage, MAX_PLAYER_ID_LEN,
};
use super::varint::{put_tag, put_varint, varint_len, zigzag_encode, Reader, WireType};

// Top-level envelope fields
const FIELD_TOKEN: u32 = 1;
const FIELD_HEARTBEAT: u32 = 10;
const FIELD_ECHO: u32 = 11;
const FIELD_PAYLOAD: u32 = 12;

// Nested fields
const FIELD_GAME_STATE_SNAPSHOT: u32 = 1;
const FIELD_SNAPSHOT_TICK: u32 = 1;
const FIELD_SNAPSHOT_ENTITY: u32 = 2;
const FIELD_ENTITY_MASK: u32 = 9;

const WT_VARINT: u8 = 0;
const WT_LEN: u8 = 2;

// ============================================================================
// Field size helpers
// ============================================================================

#[inline]
fn tag_len(field: u32) -> usize {
    varint_len(u64::from(field) << 3)
}

#[inline]
fn sint32_len(field: u32, value: i32) -> usize {
    if value == 0 {
        0
    } else {
        tag_len(field) + varint_len(u64::from(zigzag_encode(value)))
    }
}

#[inline]
fn uint32_len(field: u32, value: u32) -> usize {
    if value == 0 {
        0
    } else {
        tag_len(field) + varint_len(u64::from(value))
    }
}

#[inline]
fn int64_len(field: u32, value: i64) -> usize {
    if value == 0 {
        0
    } else {
        tag_len(field) + varint_len(value as u64)
    }
}

#[inline]
fn bool_len(field: u32, value: bool) -> usize {
    if value {
        tag_len(field) + 1
    } else {
        0
    }
}

#[inline]
fn bytes_len(field: u32, value: &[u8]) -> usize {
    if value.is_empty() {
        0
    } else {
        nested_len(field, value.len())
    }
}

/// Size of a length-delimited field whose body is `body` bytes
#[inline]
fn nested_len(field: u32, body: usize) -> usize {
    tag_len(field) + varint_len(body as u64) + body
}

// ============================================================================
// Field writers
// ============================================================================

fn put_sint32(buf: &mut BytesMut, field: u32, value: i32) {
    if value != 0 {
        put_tag(buf, field, WireType::Varint);
        put_varint(buf, u64::from(zigzag_encode(value)));
    }
}

fn put_uint32(buf: &mut BytesMut, field: u32, value: u32) {
    if value != 0 {
        put_tag(buf, field, WireType::Varint);
        put_varint(buf, u64::from(value));
    }
}

fn put_int64(buf: &mut BytesMut, field: u32, value: i64) {
    if value != 0 {
        put_tag(buf, field, WireType::Varint);
        put_varint(buf, value as u64);
    }
}

fn put_bool(buf: &mut BytesMut, field: u32, value: bool) {
    if value {
        put_tag(buf, field, WireType::Varint);
        buf.put_u8(1);
    }
}

fn put_bytes(buf: &mut BytesMut, field: u32, value: &[u8]) {
    if !value.is_empty() {
        put_tag(buf, field, WireType::LengthDelimited);
        put_varint(buf, value.len() as u64);
        buf.put_slice(value);
    }
}

fn put_nested_header(buf: &mut BytesMut, field: u32, body: usize) {
    put_tag(buf, field, WireType::LengthDelimited);
    put_varint(buf, body as u64);
}

// ============================================================================
// Entity / snapshot
// ============================================================================

fn entity_body_len(entity: &EntityState) -> usize {
    bytes_len(1, entity.id.as_bytes())
        + sint32_len(2, entity.x)
        + sint32_len(3, entity.y)
        + sint32_len(4, entity.z)
        + sint32_len(5, entity.vx)
        + sint32_len(6, entity.vy)
        + sint32_len(7, entity.vz)
        + sint32_len(8, entity.yaw)
        + uint32_len(FIELD_ENTITY_MASK, entity.mask.bits())
}

fn put_entity_body(buf: &mut BytesMut, entity: &EntityState) {
    put_bytes(buf, 1, entity.id.as_bytes());
    put_sint32(buf, 2, entity.x);
    put_sint32(buf, 3, entity.y);
    put_sint32(buf, 4, entity.z);
    put_sint32(buf, 5, entity.vx);
    put_sint32(buf, 6, entity.vy);
    put_sint32(buf, 7, entity.vz);
    put_sint32(buf, 8, entity.yaw);
    put_uint32(buf, FIELD_ENTITY_MASK, entity.mask.bits());
}

fn snapshot_body_len(snapshot: &GameStateSnapshot) -> usize {
    int64_len(FIELD_SNAPSHOT_TICK, snapshot.tick)
        + snapshot
            .entities
            .iter()
            .map(|e| nested_len(FIELD_SNAPSHOT_ENTITY, entity_body_len(e)))
            .sum::<usize>()
}

/// Encode a snapshot as a complete `ServerMessage::GameState`
pub fn encode_snapshot(snapshot: &GameStateSnapshot, buf: &mut BytesMut) {
    let snapshot_len = snapshot_body_len(snapshot);
    let game_state_len = nested_len(FIELD_GAME_STATE_SNAPSHOT, snapshot_len);
    buf.reserve(nested_len(FIELD_PAYLOAD, game_state_len));

    put_nested_header(buf, FIELD_PAYLOAD, game_state_len);
    put_nested_header(buf, FIELD_GAME_STATE_SNAPSHOT, snapshot_len);
    put_int64(buf, FIELD_SNAPSHOT_TICK, snapshot.tick);
    for entity in &snapshot.entities {
        put_nested_header(buf, FIELD_SNAPSHOT_ENTITY, entity_body_len(entity));
        put_entity_body(buf, entity);
    }
}

// ============================================================================
// Client messages
// ============================================================================

fn input_body_len(input: &PlayerInput) -> usize {
    bytes_len(1, input.player_id.as_bytes())
        + int64_len(2, input.tick)
        + sint32_len(3, input.move_x)
        + sint32_len(4, input.move_y)
        + bool_len(5, input.shoot)
        + sint32_len(6, input.aim_x)
        + sint32_len(7, input.aim_y)
}

fn put_input_body(buf: &mut BytesMut, input: &PlayerInput) {
    put_bytes(buf, 1, input.player_id.as_bytes());
    put_int64(buf, 2, input.tick);
    put_sint32(buf, 3, input.move_x);
    put_sint32(buf, 4, input.move_y);
    put_bool(buf, 5, input.shoot);
    put_sint32(buf, 6, input.aim_x);
    put_sint32(buf, 7, input.aim_y);
}

/// Encode an input as a complete `ClientMessage` with no token
pub fn encode_input(input: &PlayerInput, buf: &mut BytesMut) {
    let body = input_body_len(input);
    buf.reserve(nested_len(FIELD_PAYLOAD, body));
    put_nested_header(buf, FIELD_PAYLOAD, body);
    put_input_body(buf, input);
}

pub fn encode_client(frame: &ClientFrame, buf: &mut BytesMut) {
    if let Some(token) = frame.token.as_deref() {
        put_bytes(buf, FIELD_TOKEN, token.as_bytes());
    }

    match &frame.message {
        ClientMessage::Heartbeat(hb) => {
            put_nested_header(buf, FIELD_HEARTBEAT, int64_len(1, hb.client_time_ms));
            put_int64(buf, 1, hb.client_time_ms);
        }
        ClientMessage::Echo(payload) => {
            put_nested_header(buf, FIELD_ECHO, bytes_len(1, payload));
            put_bytes(buf, 1, payload);
        }
        ClientMessage::PlayerInput(input) => encode_input(input, buf),
    }
}

pub fn encode_server(message: &ServerMessage, buf: &mut BytesMut) {
    match message {
        ServerMessage::HeartbeatAck(ack) => {
            let body = int64_len(1, ack.server_time_ms) + int64_len(2, ack.rtt_estimate_ms);
            put_nested_header(buf, FIELD_HEARTBEAT, body);
            put_int64(buf, 1, ack.server_time_ms);
            put_int64(buf, 2, ack.rtt_estimate_ms);
        }
        ServerMessage::Echo(payload) => {
            put_nested_header(buf, FIELD_ECHO, bytes_len(1, payload));
            put_bytes(buf, 1, payload);
        }
        ServerMessage::GameState(snapshot) => encode_snapshot(snapshot, buf),
    }
}

// ============================================================================
// Decoding
// ============================================================================

fn decode_heartbeat(data: &[u8]) -> WireResult<Heartbeat> {
    let mut reader = Reader::new(data);
    let mut hb = Heartbeat::default();
    while !reader.is_empty() {
        match reader.read_tag()? {
            (1, WT_VARINT) => hb.client_time_ms = reader.read_int64()?,
            (field, wt) => reader.skip(field, wt)?,
        }
    }
    Ok(hb)
}

fn decode_heartbeat_ack(data: &[u8]) -> WireResult<HeartbeatAck> {
    let mut reader = Reader::new(data);
    let mut ack = HeartbeatAck::default();
    while !reader.is_empty() {
        match reader.read_tag()? {
            (1, WT_VARINT) => ack.server_time_ms = reader.read_int64()?,
            (2, WT_VARINT) => ack.rtt_estimate_ms = reader.read_int64()?,
            (field, wt) => reader.skip(field, wt)?,
        }
    }
    Ok(ack)
}

fn decode_echo(data: &[u8]) -> WireResult<Bytes> {
    let mut reader = Reader::new(data);
    let mut payload = Bytes::new();
    while !reader.is_empty() {
        match reader.read_tag()? {
            (1, WT_LEN) => payload = Bytes::copy_from_slice(reader.read_length_delimited()?),
            (field, wt) => reader.skip(field, wt)?,
        }
    }
    Ok(payload)
}

fn decode_input(data: &[u8]) -> WireResult<PlayerInput> {
    let mut reader = Reader::new(data);
    let mut input = PlayerInput::default();
    while !reader.is_empty() {
        match reader.read_tag()? {
            (1, WT_LEN) => {
                let raw = reader.read_length_delimited()?;
                if raw.len() > MAX_PLAYER_ID_LEN {
                    return Err(WireError::PlayerIdTooLong {
                        len: raw.len(),
                        limit: MAX_PLAYER_ID_LEN,
                    });
                }
                input.player_id = std::str::from_utf8(raw)
                    .map_err(|_| WireError::InvalidUtf8 { field: 1 })?
                    .to_owned();
            }
            (2, WT_VARINT) => input.tick = reader.read_int64()?,
            (3, WT_VARINT) => input.move_x = reader.read_sint32(3)?,
            (4, WT_VARINT) => input.move_y = reader.read_sint32(4)?,
            (5, WT_VARINT) => input.shoot = reader.read_bool()?,
            (6, WT_VARINT) => input.aim_x = reader.read_sint32(6)?,
            (7, WT_VARINT) => input.aim_y = reader.read_sint32(7)?,
            (field, wt) => reader.skip(field, wt)?,
        }
    }
    Ok(input)
}

fn decode_entity(data: &[u8]) -> WireResult<EntityState> {
    let mut reader = Reader::new(data);
    let mut entity = EntityState::default();
    while !reader.is_empty() {
        match reader.read_tag()? {
            (1, WT_LEN) => entity.id = reader.read_string(1)?.to_owned(),
            (2, WT_VARINT) => entity.x = reader.read_sint32(2)?,
            (3, WT_VARINT) => entity.y = reader.read_sint32(3)?,
            (4, WT_VARINT) => entity.z = reader.read_sint32(4)?,
            (5, WT_VARINT) => entity.vx = reader.read_sint32(5)?,
            (6, WT_VARINT) => entity.vy = reader.read_sint32(6)?,
            (7, WT_VARINT) => entity.vz = reader.read_sint32(7)?,
            (8, WT_VARINT) => entity.yaw = reader.read_sint32(8)?,
            (FIELD_ENTITY_MASK, WT_VARINT) => {
                let bits = reader.read_uint32(FIELD_ENTITY_MASK)?;
                entity.mask = ChangeMask::from_bits_retain(bits);
            }
            (field, wt) => reader.skip(field, wt)?,
        }
    }
    Ok(entity)
}

fn decode_snapshot(data: &[u8]) -> WireResult<GameStateSnapshot> {
    let mut reader = Reader::new(data);
    let mut snapshot = GameStateSnapshot::default();
    while !reader.is_empty() {
        match reader.read_tag()? {
            (FIELD_SNAPSHOT_TICK, WT_VARINT) => snapshot.tick = reader.read_int64()?,
            (FIELD_SNAPSHOT_ENTITY, WT_LEN) => {
                let body = reader.read_length_delimited()?;
                snapshot.entities.push(decode_entity(body)?);
            }
            (field, wt) => reader.skip(field, wt)?,
        }
    }
    Ok(snapshot)
}

fn decode_game_state(data: &[u8]) -> WireResult<GameStateSnapshot> {
    let mut reader = Reader::new(data);
    let mut snapshot = GameStateSnapshot::default();
    while !reader.is_empty() {
        match reader.read_tag()? {
            (FIELD_GAME_STATE_SNAPSHOT, WT_LEN) => {
                snapshot = decode_snapshot(reader.read_length_delimited()?)?;
            }
            (field, wt) => reader.skip(field, wt)?,
        }
    }
    Ok(snapshot)
}

/// Decode a message sent by a game client
pub fn decode_client(data: &[u8]) -> WireResult<ClientFrame> {
    let mut reader = Reader::new(data);
    let mut token = None;
    let mut message = None;

    while !reader.is_empty() {
        match reader.read_tag()? {
            (FIELD_TOKEN, WT_LEN) => token = Some(reader.read_string(FIELD_TOKEN)?.to_owned()),
            (FIELD_HEARTBEAT, WT_LEN) => {
                let hb = decode_heartbeat(reader.read_length_delimited()?)?;
                message = Some(ClientMessage::Heartbeat(hb));
            }
            (FIELD_ECHO, WT_LEN) => {
                let payload = decode_echo(reader.read_length_delimited()?)?;
                message = Some(ClientMessage::Echo(payload));
            }
            (FIELD_PAYLOAD, WT_LEN) => {
                let input = decode_input(reader.read_length_delimited()?)?;
                message = Some(ClientMessage::PlayerInput(input));
            }
            (field, wt) => reader.skip(field, wt)?,
        }
    }

    let message = message.ok_or(WireError::NoMessage)?;
    Ok(ClientFrame { token, message })
}

/// Decode a message sent by the relay or the dedicated server
pub fn decode_server(data: &[u8]) -> WireResult<ServerMessage> {
    let mut reader = Reader::new(data);
    let mut message = None;

    while !reader.is_empty() {
        match reader.read_tag()? {
            (FIELD_HEARTBEAT, WT_LEN) => {
                let ack = decode_heartbeat_ack(reader.read_length_delimited()?)?;
                message = Some(ServerMessage::HeartbeatAck(ack));
            }
            (FIELD_ECHO, WT_LEN) => {
                let payload = decode_echo(reader.read_length_delimited()?)?;
                message = Some(ServerMessage::Echo(payload));
            }
            (FIELD_PAYLOAD, WT_LEN) => {
                let snapshot = decode_game_state(reader.read_length_delimited()?)?;
                message = Some(ServerMessage::GameState(snapshot));
            }
            (field, wt) => reader.skip(field, wt)?,
        }
    }

    message.ok_or(WireError::NoMessage)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode_client_bytes(frame: &ClientFrame) -> BytesMut {
        let mut buf = BytesMut::new();
        encode_client(frame, &mut buf);
        buf
    }

    fn sample_input() -> PlayerInput {
        PlayerInput {
            player_id: "p-17".to_string(),
            tick: 4_200,
            move_x: -10,
            move_y: 10,
            aim_x: 3,
            aim_y: -7,
            shoot: true,
        }
    }

    #[test]
    fn test_input_round_trip_with_token() {
        let frame = ClientFrame::with_token("tok", ClientMessage::PlayerInput(sample_input()));
        let buf = encode_client_bytes(&frame);
        assert_eq!(decode_client(&buf).unwrap(), frame);
    }

    #[test]
    fn test_zero_fields_are_omitted() {
        let input = PlayerInput {
            player_id: "a".to_string(),
            ..PlayerInput::default()
        };
        let buf = encode_client_bytes(&ClientFrame::new(ClientMessage::PlayerInput(input.clone())));
        // envelope tag + len + (id tag + len + 'a')
        assert_eq!(buf.len(), 2 + 3);
        let decoded = decode_client(&buf).unwrap();
        assert_eq!(decoded.message, ClientMessage::PlayerInput(input));
    }

    #[test]
    fn test_snapshot_round_trip() {
        let mut moved = EntityState::at("a", 1000, -5, 0);
        moved.yaw = 900;
        moved.vx = -3;
        let snapshot =
            GameStateSnapshot::with_entities(77, vec![moved, EntityState::removal("gone")]);
        let mut buf = BytesMut::new();
        encode_snapshot(&snapshot, &mut buf);
        assert_eq!(
            decode_server(&buf).unwrap(),
            ServerMessage::GameState(snapshot)
        );
    }

    #[test]
    fn test_empty_snapshot_is_still_a_message() {
        let mut buf = BytesMut::new();
        encode_snapshot(&GameStateSnapshot::default(), &mut buf);
        assert!(!buf.is_empty());
        assert_eq!(
            decode_server(&buf).unwrap(),
            ServerMessage::GameState(GameStateSnapshot::default())
        );
    }

    #[test]
    fn test_heartbeat_ack_and_echo_round_trip() {
        for message in [
            ServerMessage::HeartbeatAck(HeartbeatAck {
                server_time_ms: 1_700_000_000_000,
                rtt_estimate_ms: 42,
            }),
            ServerMessage::Echo(Bytes::from_static(b"ping")),
        ] {
            let mut buf = BytesMut::new();
            encode_server(&message, &mut buf);
            assert_eq!(decode_server(&buf).unwrap(), message);
        }
    }

    #[test]
    fn test_unknown_fields_are_skipped() {
        let mut buf = BytesMut::new();
        // unknown top-level varint, fixed32, fixed64 and length-delimited fields
        put_tag(&mut buf, 3, WireType::Varint);
        put_varint(&mut buf, 99);
        put_tag(&mut buf, 4, WireType::Fixed32);
        buf.put_slice(&[1, 2, 3, 4]);
        put_tag(&mut buf, 5, WireType::Fixed64);
        buf.put_slice(&[0; 8]);
        put_tag(&mut buf, 6, WireType::LengthDelimited);
        put_varint(&mut buf, 2);
        buf.put_slice(&[0xAA, 0xBB]);

        // heartbeat with an unknown nested field
        let mut inner = BytesMut::new();
        put_tag(&mut inner, 1, WireType::Varint);
        put_varint(&mut inner, 5);
        put_tag(&mut inner, 15, WireType::LengthDelimited);
        put_varint(&mut inner, 1);
        inner.put_u8(0);
        put_tag(&mut buf, FIELD_HEARTBEAT, WireType::LengthDelimited);
        put_varint(&mut buf, inner.len() as u64);
        buf.put_slice(&inner);

        let frame = decode_client(&buf).unwrap();
        assert_eq!(
            frame.message,
            ClientMessage::Heartbeat(Heartbeat { client_time_ms: 5 })
        );
    }

    #[test]
    fn test_no_message_found() {
        assert_eq!(decode_client(&[]), Err(WireError::NoMessage));

        let mut buf = BytesMut::new();
        put_bytes(&mut buf, FIELD_TOKEN, b"only-a-token");
        assert_eq!(decode_client(&buf), Err(WireError::NoMessage));
        assert_eq!(decode_server(&buf), Err(WireError::NoMessage));
    }

    #[test]
    fn test_truncated_payload_fails() {
        let frame = ClientFrame::new(ClientMessage::PlayerInput(sample_input()));
        let buf = encode_client_bytes(&frame);
        for cut in 1..buf.len() {
            assert!(
                decode_client(&buf[..cut]).is_err(),
                "prefix of {cut} bytes decoded"
            );
        }
    }

    #[test]
    fn test_player_id_over_limit_fails() {
        let input = PlayerInput {
            player_id: "x".repeat(MAX_PLAYER_ID_LEN + 1),
            ..PlayerInput::default()
        };
        let buf = encode_client_bytes(&ClientFrame::new(ClientMessage::PlayerInput(input)));
        assert_eq!(
            decode_client(&buf),
            Err(WireError::PlayerIdTooLong {
                len: MAX_PLAYER_ID_LEN + 1,
                limit: MAX_PLAYER_ID_LEN
            })
        );
    }

    #[test]
    fn test_player_id_at_limit_is_accepted() {
        let input = PlayerInput {
            player_id: "x".repeat(MAX_PLAYER_ID_LEN),
            tick: 1,
            ..PlayerInput::default()
        };
        let frame = ClientFrame::new(ClientMessage::PlayerInput(input));
        let buf = encode_client_bytes(&frame);
        assert_eq!(decode_client(&buf).unwrap(), frame);
    }

    #[test]
    fn test_last_payload_wins() {
        let mut buf = encode_client_bytes(&ClientFrame::new(ClientMessage::Heartbeat(Heartbeat {
            client_time_ms: 1,
        })));
        encode_client(
            &ClientFrame::new(ClientMessage::Echo(Bytes::from_static(b"x"))),
            &mut buf,
        );
        assert_eq!(
            decode_client(&buf).unwrap().message,
            ClientMessage::Echo(Bytes::from_static(b"x"))
        );
    }
}
