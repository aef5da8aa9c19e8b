//! Destructible terrain: brick and steel grids plus the stage loader

use serde::Serialize;
use tracing::error;

use super::physics::{PhysicsSystem, Rect, BLOCK_SIZE, FIELD_SIZE, TANK_SIZE, WALL_TOLERANCE};
use super::combat::STEEL_BREAKING_POWER;

pub const BRICK_SIZE: f64 = 4.0;
pub const STEEL_SIZE: f64 = 8.0;
/// 52 brick cells per row, 52 rows
pub const BRICKS_PER_ROW: usize = (FIELD_SIZE / BRICK_SIZE) as usize;
/// 26 steel cells per row, 26 rows
pub const STEELS_PER_ROW: usize = (FIELD_SIZE / STEEL_SIZE) as usize;

const BLOCKS_PER_ROW: usize = (FIELD_SIZE / BLOCK_SIZE) as usize;

/// Stage 1, one token per 16x16 block.
///
/// `X` empty, `E` eagle, `B<mask>` brick, `T<mask>` steel. The hex mask picks
/// quadrants: bit 0 top-left, bit 1 top-right, bit 2 bottom-left, bit 3
/// bottom-right.
pub const STAGE_ONE: [&str; 13] = [
    "X  X  X  X  X  X  X  X  X  X  X  X  X",
    "X  Bf X  Bf X  Bf X  Bf X  Bf X  Bf X",
    "X  Bf X  Bf X  Bf X  Bf X  Bf X  Bf X",
    "X  Bf X  Bf X  Bf Tf Bf X  Bf X  Bf X",
    "X  Bf X  Bf X  B3 X  B3 X  Bf X  Bf X",
    "X  B3 X  B3 X  Bc X  Bc X  B3 X  B3 X",
    "Bc X  Bc Bc X  B3 X  B3 X  Bc Bc X  Bc",
    "T3 X  B3 B3 X  Bc X  Bc X  B3 B3 X  T3",
    "X  Bc X  Bc X  Bf Bf Bf X  Bc X  Bc X",
    "X  Bf X  Bf X  Bf X  Bf X  Bf X  Bf X",
    "X  Bf X  Bf X  B3 X  B3 X  Bf X  Bf X",
    "X  Bf X  Bf X  B8 Bc B4 X  Bf X  Bf X",
    "X  X  X  X  X  Ba E  B5 X  X  X  X  X",
];

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StageError {
    #[error("stage has {0} rows, expected 13")]
    RowCount(usize),

    #[error("row {row} has {found} blocks, expected 13")]
    ColumnCount { row: usize, found: usize },

    #[error("unknown token {token:?} at row {row}, column {col}")]
    UnknownToken { row: usize, col: usize, token: String },
}

/// Terrain state, row-major
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MapState {
    pub bricks: Vec<bool>,
    pub steels: Vec<bool>,
    pub eagle_broken: bool,
}

impl MapState {
    pub fn empty() -> Self {
        Self {
            bricks: vec![false; BRICKS_PER_ROW * BRICKS_PER_ROW],
            steels: vec![false; STEELS_PER_ROW * STEELS_PER_ROW],
            eagle_broken: false,
        }
    }

    /// Stage 1 terrain; an empty field if the layout fails to parse
    pub fn stage_one() -> Self {
        Self::from_layout(&STAGE_ONE).unwrap_or_else(|e| {
            error!(error = %e, "Failed to parse stage 1 layout");
            Self::empty()
        })
    }

    pub fn from_layout(rows: &[&str]) -> Result<Self, StageError> {
        if rows.len() != BLOCKS_PER_ROW {
            return Err(StageError::RowCount(rows.len()));
        }

        let mut map = Self::empty();
        for (row, line) in rows.iter().enumerate() {
            let tokens: Vec<&str> = line.split_whitespace().collect();
            if tokens.len() != BLOCKS_PER_ROW {
                return Err(StageError::ColumnCount {
                    row,
                    found: tokens.len(),
                });
            }

            for (col, token) in tokens.into_iter().enumerate() {
                let unknown = || StageError::UnknownToken {
                    row,
                    col,
                    token: token.to_string(),
                };

                match token {
                    "X" | "E" => {}
                    _ if token.len() == 2 && token.is_ascii() => {
                        let mask = u8::from_str_radix(&token[1..], 16).map_err(|_| unknown())?;
                        match &token[..1] {
                            "B" => map.fill_bricks(col, row, mask),
                            "T" => map.fill_steels(col, row, mask),
                            _ => return Err(unknown()),
                        }
                    }
                    _ => return Err(unknown()),
                }
            }
        }

        Ok(map)
    }

    fn fill_bricks(&mut self, block_col: usize, block_row: usize, mask: u8) {
        for (qx, qy) in quadrants(mask) {
            for dy in 0..2 {
                for dx in 0..2 {
                    self.set_brick(block_col * 4 + qx * 2 + dx, block_row * 4 + qy * 2 + dy, true);
                }
            }
        }
    }

    fn fill_steels(&mut self, block_col: usize, block_row: usize, mask: u8) {
        for (qx, qy) in quadrants(mask) {
            self.set_steel(block_col * 2 + qx, block_row * 2 + qy, true);
        }
    }

    pub fn brick(&self, col: usize, row: usize) -> bool {
        self.bricks[row * BRICKS_PER_ROW + col]
    }

    pub fn set_brick(&mut self, col: usize, row: usize, intact: bool) {
        self.bricks[row * BRICKS_PER_ROW + col] = intact;
    }

    pub fn steel(&self, col: usize, row: usize) -> bool {
        self.steels[row * STEELS_PER_ROW + col]
    }

    pub fn set_steel(&mut self, col: usize, row: usize, intact: bool) {
        self.steels[row * STEELS_PER_ROW + col] = intact;
    }

    /// Whether a tank at `(x, y)` would overlap any intact cell
    pub fn collides_with_tank(&self, x: f64, y: f64) -> bool {
        let tank = Rect::tank(x, y);

        let hits = |cells: &[bool], per_row: usize, size: f64| {
            let cols = candidate_range(x, size, per_row);
            let rows = candidate_range(y, size, per_row);
            rows.into_iter().any(|row| {
                cols.clone().any(|col| {
                    cells[row * per_row + col] && {
                        let cell = Rect::new(col as f64 * size, row as f64 * size, size, size);
                        PhysicsSystem::test_collision(&tank, &cell, WALL_TOLERANCE)
                    }
                })
            })
        };

        hits(&self.bricks, BRICKS_PER_ROW, BRICK_SIZE) || hits(&self.steels, STEELS_PER_ROW, STEEL_SIZE)
    }

    /// Apply a bullet's swept box to the terrain.
    ///
    /// Every intact brick under `swept` is destroyed. Steel only breaks at
    /// [`STEEL_BREAKING_POWER`] but still stops the bullet. Returns whether
    /// anything was hit.
    pub fn absorb_bullet(&mut self, swept: &Rect, power: u32) -> bool {
        let mut hit = false;

        for (col, row) in cells_under(swept, BRICK_SIZE, BRICKS_PER_ROW) {
            if self.brick(col, row) {
                self.set_brick(col, row, false);
                hit = true;
            }
        }

        for (col, row) in cells_under(swept, STEEL_SIZE, STEELS_PER_ROW) {
            if self.steel(col, row) {
                hit = true;
                if power >= STEEL_BREAKING_POWER {
                    self.set_steel(col, row, false);
                }
            }
        }

        hit
    }

    #[cfg(test)]
    pub fn intact_bricks(&self) -> usize {
        self.bricks.iter().filter(|b| **b).count()
    }

    #[cfg(test)]
    pub fn intact_steels(&self) -> usize {
        self.steels.iter().filter(|s| **s).count()
    }
}

impl Default for MapState {
    fn default() -> Self {
        Self::stage_one()
    }
}

/// Quadrant offsets `(qx, qy)` selected by a mask
fn quadrants(mask: u8) -> impl Iterator<Item = (usize, usize)> {
    (0..4usize)
        .filter(move |bit| mask & (1 << bit) != 0)
        .map(|bit| (bit % 2, bit / 2))
}

/// Cells a tank at `pos` could possibly touch along one axis
fn candidate_range(pos: f64, size: f64, per_row: usize) -> std::ops::RangeInclusive<usize> {
    let first = ((pos - size) / size).floor().max(0.0) as usize;
    let last = ((pos + TANK_SIZE) / size).ceil().max(0.0) as usize;
    first.min(per_row - 1)..=last.min(per_row - 1)
}

/// Grid cells whose index range covers `rect`
fn cells_under(rect: &Rect, size: f64, per_row: usize) -> Vec<(usize, usize)> {
    let max = (per_row - 1) as f64;
    let index = |v: f64| (v / size).floor().clamp(0.0, max) as usize;

    let (col1, col2) = (index(rect.x), index(rect.x + rect.width));
    let (row1, row2) = (index(rect.y), index(rect.y + rect.height));

    let mut cells = Vec::with_capacity((col2 + 1 - col1) * (row2 + 1 - row1));
    for row in row1..=row2 {
        for col in col1..=col2 {
            cells.push((col, row));
        }
    }
    cells
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grid_dimensions() {
        let map = MapState::empty();
        assert_eq!(BRICKS_PER_ROW, 52);
        assert_eq!(STEELS_PER_ROW, 26);
        assert_eq!(map.bricks.len(), 2704);
        assert_eq!(map.steels.len(), 676);
        assert!(!map.eagle_broken);
    }

    #[test]
    fn stage_one_parses() {
        let map = MapState::from_layout(&STAGE_ONE).unwrap();
        assert!(map.intact_bricks() > 0);
        // one full steel block and two half blocks
        assert_eq!(map.intact_steels(), 4 + 2 + 2);
        assert_eq!(map, MapState::stage_one());
    }

    #[test]
    fn quadrant_masks_fill_the_right_cells() {
        let mut rows = vec!["X X X X X X X X X X X X X"; 13];
        rows[0] = "B1 T8 X X X X X X X X X X X";
        let map = MapState::from_layout(&rows).unwrap();

        // B1: top-left 2x2 bricks of block (0, 0)
        assert!(map.brick(0, 0) && map.brick(1, 1));
        assert!(!map.brick(2, 0) && !map.brick(0, 2));
        assert_eq!(map.intact_bricks(), 4);

        // T8: bottom-right steel of block (1, 0)
        assert!(map.steel(3, 1));
        assert_eq!(map.intact_steels(), 1);
    }

    #[test]
    fn malformed_layouts_are_rejected() {
        assert_eq!(MapState::from_layout(&["X"]), Err(StageError::RowCount(1)));

        let mut rows = vec!["X X X X X X X X X X X X X"; 13];
        rows[2] = "X X X";
        assert_eq!(
            MapState::from_layout(&rows),
            Err(StageError::ColumnCount { row: 2, found: 3 })
        );

        rows[2] = "X X X Q7 X X X X X X X X X";
        assert!(matches!(
            MapState::from_layout(&rows),
            Err(StageError::UnknownToken { row: 2, col: 3, .. })
        ));
    }

    #[test]
    fn spawn_points_are_clear_on_stage_one() {
        let map = MapState::stage_one();
        for (x, y) in [(64.0, 192.0), (128.0, 192.0), (0.0, 0.0), (96.0, 0.0), (192.0, 0.0)] {
            assert!(!map.collides_with_tank(x, y), "spawn ({x}, {y}) is blocked");
        }
    }

    #[test]
    fn tank_wall_collision_uses_slight_overlap() {
        let mut map = MapState::empty();
        map.set_brick(16, 20, true); // x 64..68, y 80..84

        assert!(map.collides_with_tank(64.0, 80.0));
        assert!(!map.collides_with_tank(64.0, 84.0));
        assert!(!map.collides_with_tank(64.0, 84.5));
        assert!(map.collides_with_tank(64.0, 83.9));
        assert!(!map.collides_with_tank(48.0, 80.0));
        assert!(map.collides_with_tank(48.1, 80.0));

        let mut map = MapState::empty();
        map.set_steel(10, 10, true); // x 80..88, y 80..88
        assert!(map.collides_with_tank(70.0, 75.0));
        assert!(!map.collides_with_tank(88.0, 75.0));
    }

    #[test]
    fn bullets_chip_every_brick_under_the_swept_box() {
        let mut map = MapState::empty();
        map.set_brick(10, 10, true);
        map.set_brick(12, 10, true);
        map.set_brick(8, 10, true);

        let swept = Rect::new(36.99, 40.99, 11.02, 12.01);
        assert!(map.absorb_bullet(&swept, 1));
        assert!(!map.brick(10, 10));
        assert!(!map.brick(12, 10));
        assert!(map.brick(8, 10));

        // nothing left in the way
        assert!(!map.absorb_bullet(&swept, 1));
    }

    #[test]
    fn steel_stops_bullets_but_needs_power_to_break() {
        let mut map = MapState::empty();
        map.set_steel(5, 5, true);
        let swept = Rect::new(36.99, 40.99, 11.02, 12.01);

        assert!(map.absorb_bullet(&swept, 1));
        assert!(map.steel(5, 5));

        assert!(map.absorb_bullet(&swept, 3));
        assert!(!map.steel(5, 5));
    }

    #[test]
    fn swept_box_is_clamped_to_the_grid() {
        let mut map = MapState::empty();
        map.set_brick(0, 0, true);
        map.set_brick(51, 51, true);

        assert!(map.absorb_bullet(&Rect::new(-5.0, -5.0, 6.0, 6.0), 1));
        assert!(map.absorb_bullet(&Rect::new(205.0, 205.0, 10.0, 10.0), 1));
        assert_eq!(map.intact_bricks(), 0);
    }
}
