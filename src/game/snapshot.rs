//! Per-recipient delta computation
//!
//! A delta carries new entities in full, changed entities as partial records
//! flagged by [`ChangeMask`], and removals as id-only records appended after
//! the updates in the previous snapshot's order.

use std::collections::{HashMap, HashSet};

use crate::wire::{ChangeMask, EntityState, GameStateSnapshot};

use super::pool::SnapshotPool;

/// Compute the changes from `old` to `new`
///
/// Returns `None` when nothing changed and the tick did not advance. The
/// returned snapshot comes from `pool`; release it once it is serialized.
pub fn compute_delta(
    old: Option<&GameStateSnapshot>,
    new: &GameStateSnapshot,
    pool: &SnapshotPool,
) -> Option<GameStateSnapshot> {
    let mut delta = pool.acquire();

    let Some(old) = old else {
        delta.copy_from(new);
        return Some(delta);
    };

    delta.tick = new.tick;

    let previous: HashMap<&str, &EntityState> =
        old.entities.iter().map(|e| (e.id.as_str(), e)).collect();

    for entity in &new.entities {
        match previous.get(entity.id.as_str()) {
            None => {
                let mut full = entity.clone();
                full.mask = ChangeMask::empty();
                delta.entities.push(full);
            }
            Some(prev) => {
                if let Some(partial) = diff_entity(prev, entity) {
                    delta.entities.push(partial);
                }
            }
        }
    }

    let current: HashSet<&str> = new.entities.iter().map(|e| e.id.as_str()).collect();
    for entity in &old.entities {
        if !current.contains(entity.id.as_str()) {
            delta.entities.push(EntityState::removal(entity.id.clone()));
        }
    }

    if delta.entities.is_empty() && new.tick == old.tick {
        pool.release(delta);
        return None;
    }

    Some(delta)
}

/// Partial record holding only the fields that differ, or `None` if equal
fn diff_entity(prev: &EntityState, next: &EntityState) -> Option<EntityState> {
    let mut out = EntityState::new(next.id.clone());

    macro_rules! diff_field {
        ($field:ident, $flag:expr) => {
            if prev.$field != next.$field {
                out.$field = next.$field;
                out.mask |= $flag;
            }
        };
    }

    diff_field!(x, ChangeMask::X);
    diff_field!(y, ChangeMask::Y);
    diff_field!(z, ChangeMask::Z);
    diff_field!(vx, ChangeMask::VX);
    diff_field!(vy, ChangeMask::VY);
    diff_field!(vz, ChangeMask::VZ);
    diff_field!(yaw, ChangeMask::YAW);

    if out.mask.is_empty() {
        None
    } else {
        Some(out)
    }
}

/// Reconstruct the next snapshot by applying `delta` onto `base`
///
/// This is the client-side inverse of [`compute_delta`].
pub fn apply_delta(base: &mut GameStateSnapshot, delta: &GameStateSnapshot) {
    base.tick = delta.tick;

    for record in &delta.entities {
        if record.is_removal() {
            base.entities.retain(|e| e.id != record.id);
            continue;
        }

        let existing = base.entities.iter_mut().find(|e| e.id == record.id);
        match existing {
            Some(target) if !record.mask.is_empty() => apply_partial(target, record),
            Some(target) => {
                *target = record.clone();
            }
            None => {
                let mut full = record.clone();
                full.mask = ChangeMask::empty();
                base.entities.push(full);
            }
        }
    }
}

fn apply_partial(target: &mut EntityState, record: &EntityState) {
    let mask = record.mask;
    if mask.contains(ChangeMask::X) {
        target.x = record.x;
    }
    if mask.contains(ChangeMask::Y) {
        target.y = record.y;
    }
    if mask.contains(ChangeMask::Z) {
        target.z = record.z;
    }
    if mask.contains(ChangeMask::VX) {
        target.vx = record.vx;
    }
    if mask.contains(ChangeMask::VY) {
        target.vy = record.vy;
    }
    if mask.contains(ChangeMask::VZ) {
        target.vz = record.vz;
    }
    if mask.contains(ChangeMask::YAW) {
        target.yaw = record.yaw;
    }
}
