use crate::{Coord, GameConfig};
use std::collections::HashSet;

/// Grid rules every node evaluates independently.
pub trait Geometry: Send + Sync {
    /// True when `coord` is inside the grid and not a wall.
    fn is_valid_move(&self, coord: Coord) -> bool;

    /// True when `to` is reachable from `from` in at most one unit step.
    fn is_not_teleporting(&self, from: Coord, to: Coord) -> bool;
}

/// Rectangular grid with optional wall cells.
#[derive(Debug, Clone)]
pub struct GridManager {
    width: i32,
    height: i32,
    walls: HashSet<Coord>,
}

impl GridManager {
    pub fn new(width: i32, height: i32, walls: impl IntoIterator<Item = Coord>) -> Self {
        Self {
            width,
            height,
            walls: walls.into_iter().collect(),
        }
    }

    pub fn from_config(config: &GameConfig) -> Self {
        Self::new(config.width, config.height, config.walls.iter().copied())
    }
}

impl Geometry for GridManager {
    fn is_valid_move(&self, coord: Coord) -> bool {
        let in_bounds = coord.x >= 0 && coord.y >= 0 && coord.x < self.width && coord.y < self.height;
        in_bounds && !self.walls.contains(&coord)
    }

    fn is_not_teleporting(&self, from: Coord, to: Coord) -> bool {
        from.manhattan_distance(&to) <= 1
    }
}
