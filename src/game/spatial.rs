//! Uniform grid for proximity queries
//!
//! Positions are fixed-point. Each id lives in exactly one cell; a move to a
//! different cell is a remove plus insert under the same write lock.

use std::collections::{HashMap, HashSet};

use parking_lot::RwLock;

pub type CellKey = (i32, i32, i32);

/// Fixed-point position
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Position {
    pub x: i32,
    pub y: i32,
    pub z: i32,
}

impl Position {
    pub const fn new(x: i32, y: i32, z: i32) -> Self {
        Self { x, y, z }
    }
}

#[derive(Default)]
struct Grid {
    cells: HashMap<CellKey, HashSet<String>>,
    entity_cells: HashMap<String, CellKey>,
}

impl Grid {
    fn remove(&mut self, id: &str) -> Option<CellKey> {
        let key = self.entity_cells.remove(id)?;
        if let Some(members) = self.cells.get_mut(&key) {
            members.remove(id);
            if members.is_empty() {
                self.cells.remove(&key);
            }
        }
        Some(key)
    }

    fn insert(&mut self, id: &str, key: CellKey) {
        self.cells.entry(key).or_default().insert(id.to_owned());
        self.entity_cells.insert(id.to_owned(), key);
    }
}

/// Grid of cubic cells mapping cell keys to entity ids
pub struct SpatialIndex {
    cell_size: i32,
    grid: RwLock<Grid>,
}

impl SpatialIndex {
    /// `cell_size` is in fixed-point units and is clamped to at least 1
    pub fn new(cell_size: i32) -> Self {
        Self {
            cell_size: cell_size.max(1),
            grid: RwLock::new(Grid::default()),
        }
    }

    pub fn cell_size(&self) -> i32 {
        self.cell_size
    }

    /// Cell containing `pos`, flooring toward negative infinity
    pub fn key_for(&self, pos: Position) -> CellKey {
        (
            pos.x.div_euclid(self.cell_size),
            pos.y.div_euclid(self.cell_size),
            pos.z.div_euclid(self.cell_size),
        )
    }

    pub fn add(&self, id: &str, pos: Position) {
        self.update(id, pos);
    }

    /// Insert or move `id`; a move within the same cell leaves membership alone
    pub fn update(&self, id: &str, pos: Position) {
        let key = self.key_for(pos);
        let mut grid = self.grid.write();
        if grid.entity_cells.get(id) == Some(&key) {
            return;
        }
        grid.remove(id);
        grid.insert(id, key);
    }

    pub fn remove(&self, id: &str) -> bool {
        self.grid.write().remove(id).is_some()
    }

    /// Ids in every cell of the cube that covers `radius` around `pos`
    ///
    /// This is a superset of the ids within `radius`; no exact distance check
    /// is applied.
    pub fn nearby(&self, pos: Position, radius: i32) -> Vec<String> {
        let cell = i64::from(self.cell_size);
        let reach = ((i64::from(radius.max(0)) + cell - 1) / cell) as i32;
        let (cx, cy, cz) = self.key_for(pos);
        let grid = self.grid.read();

        let mut out = Vec::new();
        for dx in -reach..=reach {
            for dy in -reach..=reach {
                for dz in -reach..=reach {
                    let key = (
                        cx.saturating_add(dx),
                        cy.saturating_add(dy),
                        cz.saturating_add(dz),
                    );
                    if let Some(members) = grid.cells.get(&key) {
                        out.extend(members.iter().cloned());
                    }
                }
            }
        }
        out
    }

    pub fn cell_of(&self, id: &str) -> Option<CellKey> {
        self.grid.read().entity_cells.get(id).copied()
    }

    pub fn len(&self) -> usize {
        self.grid.read().entity_cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of occupied cells
    pub fn cell_count(&self) -> usize {
        self.grid.read().cells.len()
    }

    /// Number of cells listing `id`, for consistency checks
    pub fn membership_count(&self, id: &str) -> usize {
        self.grid
            .read()
            .cells
            .values()
            .filter(|members| members.contains(id))
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_negative_coordinates_floor() {
        let index = SpatialIndex::new(100);
        assert_eq!(index.key_for(Position::new(-1, 0, 99)), (-1, 0, 0));
        assert_eq!(index.key_for(Position::new(-100, -101, 100)), (-1, -2, 1));
    }

    #[test]
    fn test_nearby_contains_entities_within_radius() {
        let index = SpatialIndex::new(100);
        index.add("a", Position::new(0, 0, 0));
        index.add("b", Position::new(250, 0, 0));
        index.add("far", Position::new(10_000, 0, 0));

        let found = index.nearby(Position::new(0, 0, 0), 300);
        assert!(found.contains(&"a".to_string()));
        assert!(found.contains(&"b".to_string()));
        assert!(!found.contains(&"far".to_string()));
    }

    #[test]
    fn test_move_keeps_single_membership() {
        let index = SpatialIndex::new(100);
        index.add("a", Position::new(0, 0, 0));
        index.update("a", Position::new(50, 50, 50));
        assert_eq!(index.cell_of("a"), Some((0, 0, 0)));
        index.update("a", Position::new(500, 0, 0));
        assert_eq!(index.cell_of("a"), Some((5, 0, 0)));
        assert_eq!(index.membership_count("a"), 1);
        assert_eq!(index.cell_count(), 1);
    }

    #[test]
    fn test_remove_clears_entity() {
        let index = SpatialIndex::new(100);
        index.add("a", Position::new(0, 0, 0));
        assert!(index.remove("a"));
        assert!(!index.remove("a"));
        assert!(index.nearby(Position::new(0, 0, 0), 1_000).is_empty());
        assert_eq!(index.len(), 0);
        assert_eq!(index.cell_count(), 0);
    }
}
