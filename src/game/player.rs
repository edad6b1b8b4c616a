//! Predicted player state kept by the relay between authoritative snapshots

use crate::game::spatial::Position;
use crate::wire::{EntityState, PlayerInput, SCALE};

/// Fixed-point distance a full-deflection input moves a player
pub const PLAYER_STEP: i32 = 5;

/// Relay-side prediction of a client-controlled player
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PlayerState {
    pub player_id: String,

    // Position
    pub x: i32,
    pub y: i32,
    pub z: i32,

    // Input tracking
    pub aim_x: i32,
    pub aim_y: i32,
    pub shooting: bool,
    pub last_input_tick: i64,
}

impl PlayerState {
    pub fn new(player_id: impl Into<String>) -> Self {
        Self {
            player_id: player_id.into(),
            ..Self::default()
        }
    }

    pub fn position(&self) -> Position {
        Position::new(self.x, self.y, self.z)
    }

    /// Advance the prediction by one input
    ///
    /// Inputs older than the last applied tick are ignored.
    pub fn apply_input(&mut self, input: &PlayerInput) -> bool {
        if input.tick != 0 && input.tick < self.last_input_tick {
            return false;
        }

        self.x = step(self.x, input.move_x);
        self.y = step(self.y, input.move_y);
        self.aim_x = input.aim_x;
        self.aim_y = input.aim_y;
        self.shooting = input.shoot;
        self.last_input_tick = self.last_input_tick.max(input.tick);
        true
    }

    /// Snap to the authoritative pose
    pub fn reconcile(&mut self, entity: &EntityState) {
        self.x = entity.x;
        self.y = entity.y;
        self.z = entity.z;
    }
}

fn step(pos: i32, movement: i32) -> i32 {
    let delta = i64::from(movement) * i64::from(PLAYER_STEP) / SCALE as i64;
    (i64::from(pos) + delta).clamp(i64::from(i32::MIN), i64::from(i32::MAX)) as i32
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input(tick: i64, move_x: i32, move_y: i32) -> PlayerInput {
        PlayerInput {
            player_id: "p1".to_string(),
            tick,
            move_x,
            move_y,
            ..PlayerInput::default()
        }
    }

    #[test]
    fn test_full_deflection_moves_one_step() {
        let mut player = PlayerState::new("p1");
        assert!(player.apply_input(&input(1, 10, -10)));
        assert_eq!((player.x, player.y), (PLAYER_STEP, -PLAYER_STEP));
        assert_eq!(player.last_input_tick, 1);
    }

    #[test]
    fn test_stale_input_is_ignored() {
        let mut player = PlayerState::new("p1");
        player.apply_input(&input(5, 10, 0));
        assert!(!player.apply_input(&input(4, 10, 0)));
        assert_eq!(player.x, PLAYER_STEP);
    }

    #[test]
    fn test_reconcile_snaps_to_entity() {
        let mut player = PlayerState::new("p1");
        player.apply_input(&input(1, 10, 10));
        player.reconcile(&EntityState::at("p1", 100, 200, 300));
        assert_eq!(player.position(), Position::new(100, 200, 300));
    }
}
