//! Property tests for the wire codec and delta reconstruction

use std::collections::BTreeMap;

use bytes::BytesMut;
use proptest::prelude::*;

use relay_server::game::{apply_delta, compute_delta, SnapshotPool};
use relay_server::wire::{
    decode_client, decode_server, dequantize, encode_client, encode_server, quantize, ChangeMask,
    ClientFrame, ClientMessage, EntityState, GameStateSnapshot, PlayerInput, ServerMessage,
};

fn entity_fields() -> impl Strategy<Value = (i32, i32, i32, i32, i32, i32, i32)> {
    (
        any::<i32>(),
        any::<i32>(),
        any::<i32>(),
        -500..500i32,
        -500..500i32,
        -500..500i32,
        -1800..1800i32,
    )
}

fn entity(id: String, f: (i32, i32, i32, i32, i32, i32, i32)) -> EntityState {
    EntityState {
        id,
        x: f.0,
        y: f.1,
        z: f.2,
        vx: f.3,
        vy: f.4,
        vz: f.5,
        yaw: f.6,
        mask: ChangeMask::empty(),
    }
}

fn snapshot() -> impl Strategy<Value = GameStateSnapshot> {
    (
        0..10_000i64,
        prop::collection::btree_map("[a-z]{1,6}", entity_fields(), 0..12),
    )
        .prop_map(|(tick, entities): (i64, BTreeMap<String, _>)| {
            GameStateSnapshot::with_entities(
                tick,
                entities.into_iter().map(|(id, f)| entity(id, f)).collect(),
            )
        })
}

/// Small coordinates so consecutive snapshots share some poses
fn nearby_snapshot() -> impl Strategy<Value = GameStateSnapshot> {
    (
        0..4i64,
        prop::collection::btree_map("[a-e]", (0..3i32, 0..3i32, 0..2i32), 0..5),
    )
        .prop_map(|(tick, entities)| {
            GameStateSnapshot::with_entities(
                tick,
                entities
                    .into_iter()
                    .map(|(id, (x, y, yaw))| EntityState {
                        yaw,
                        ..EntityState::at(id, x, y, 0)
                    })
                    .collect(),
            )
        })
}

fn sorted(mut snapshot: GameStateSnapshot) -> GameStateSnapshot {
    snapshot.entities.sort_by(|a, b| a.id.cmp(&b.id));
    snapshot
}

proptest! {
    #[test]
    fn game_state_survives_encoding(snapshot in snapshot()) {
        let message = ServerMessage::GameState(snapshot);
        let mut buf = BytesMut::new();
        encode_server(&message, &mut buf);
        prop_assert_eq!(decode_server(&buf).unwrap(), message);
    }

    #[test]
    fn player_input_survives_encoding(
        player_id in "[a-zA-Z0-9_-]{0,20}",
        tick in any::<i64>(),
        move_x in any::<i32>(),
        move_y in any::<i32>(),
        aim_x in any::<i32>(),
        aim_y in any::<i32>(),
        shoot in any::<bool>(),
        token in prop::option::of("[a-f0-9]{8,32}"),
    ) {
        let frame = ClientFrame {
            token,
            message: ClientMessage::PlayerInput(PlayerInput {
                player_id, tick, move_x, move_y, aim_x, aim_y, shoot,
            }),
        };
        let mut buf = BytesMut::new();
        encode_client(&frame, &mut buf);
        prop_assert_eq!(decode_client(&buf).unwrap(), frame);
    }

    #[test]
    fn decoding_arbitrary_bytes_never_panics(data in prop::collection::vec(any::<u8>(), 0..256)) {
        let _ = decode_client(&data);
        let _ = decode_server(&data);
    }

    #[test]
    fn quantization_error_is_bounded(value in -10_000.0f32..10_000.0f32) {
        let restored = dequantize(quantize(value));
        prop_assert!((restored - value).abs() <= 0.052, "{} -> {}", value, restored);
    }

    #[test]
    fn delta_reconstructs_next_snapshot(old in nearby_snapshot(), new in nearby_snapshot()) {
        let pool = SnapshotPool::new(8);
        let mut rebuilt = old.clone();
        match compute_delta(Some(&old), &new, &pool) {
            Some(delta) => {
                prop_assert_eq!(delta.tick, new.tick);
                apply_delta(&mut rebuilt, &delta);
                pool.release(delta);
            }
            None => prop_assert_eq!(old.tick, new.tick),
        }
        prop_assert_eq!(sorted(rebuilt).entities, sorted(new).entities);
    }

    #[test]
    fn first_delta_is_the_full_snapshot(new in snapshot()) {
        let pool = SnapshotPool::new(8);
        let delta = compute_delta(None, &new, &pool).unwrap();
        prop_assert_eq!(&delta, &new);
    }
}
