use std::fmt;
use std::ops::{Add, Sub};

use glam::Vec3;
use serde::{Deserialize, Serialize};

/// Extra samples stored on every side of a chunk's height texture.
pub const BORDER: u32 = 1;

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GridCoord {
    pub x: i32,
    pub y: i32,
}

impl GridCoord {
    pub const ORIGIN: GridCoord = GridCoord { x: 0, y: 0 };

    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

impl fmt::Display for GridCoord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.x, self.y)
    }
}

impl Add for GridCoord {
    type Output = GridCoord;

    fn add(self, rhs: Self) -> Self::Output {
        GridCoord {
            x: self.x + rhs.x,
            y: self.y + rhs.y,
        }
    }
}

impl Sub for GridCoord {
    type Output = GridCoord;

    fn sub(self, rhs: Self) -> Self::Output {
        GridCoord {
            x: self.x - rhs.x,
            y: self.y - rhs.y,
        }
    }
}

/// Logical chunk size. One sample per world unit, so this is both the sample
/// resolution of a chunk and its footprint in world space.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkDims {
    pub width: u32,
    pub height: u32,
}

impl ChunkDims {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn texture_width(self) -> u32 {
        self.width + 2 * BORDER
    }

    pub fn texture_height(self) -> u32 {
        self.height + 2 * BORDER
    }

    pub fn texture_len(self) -> usize {
        self.texture_width() as usize * self.texture_height() as usize
    }

    /// Grid cell containing a world position. Uses the x/z plane.
    pub fn world_to_grid(self, position: Vec3) -> GridCoord {
        GridCoord {
            x: (position.x / self.width as f32).round() as i32,
            y: (position.z / self.height as f32).round() as i32,
        }
    }

    pub fn grid_origin(self, coord: GridCoord) -> Vec3 {
        Vec3::new(
            coord.x as f32 * self.width as f32,
            0.0,
            coord.y as f32 * self.height as f32,
        )
    }
}

/// Every coordinate within `radius` of `center`, row by row. Cells that would
/// fall outside the `i32` grid are left out.
pub fn square_window(center: GridCoord, radius: i32) -> impl Iterator<Item = GridCoord> {
    let radius = radius.max(0);
    (-radius..=radius)
        .filter_map(move |dy| center.y.checked_add(dy))
        .flat_map(move |y| {
            (-radius..=radius)
                .filter_map(move |dx| center.x.checked_add(dx))
                .map(move |x| GridCoord { x, y })
        })
}

/// Same set as [`square_window`], ordered so cells closest to `center` come first.
pub fn square_window_nearest_first(center: GridCoord, radius: i32) -> Vec<GridCoord> {
    let mut coords: Vec<GridCoord> = square_window(center, radius).collect();
    coords.sort_by_key(|coord| {
        let dx = i64::from(coord.x) - i64::from(center.x);
        let dy = i64::from(coord.y) - i64::from(center.y);
        (dx * dx + dy * dy, coord.y, coord.x)
    });
    coords
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use glam::Vec3;

    use super::{square_window, square_window_nearest_first, ChunkDims, GridCoord};

    #[test]
    fn world_to_grid_rounds_to_nearest_cell() {
        let dims = ChunkDims::new(256, 128);

        assert_eq!(dims.world_to_grid(Vec3::ZERO), GridCoord::ORIGIN);
        assert_eq!(dims.world_to_grid(Vec3::new(127.0, 40.0, 63.0)), GridCoord::new(0, 0));
        assert_eq!(dims.world_to_grid(Vec3::new(129.0, 0.0, 65.0)), GridCoord::new(1, 1));
        assert_eq!(
            dims.world_to_grid(Vec3::new(-300.0, 0.0, -200.0)),
            GridCoord::new(-1, -2)
        );
    }

    #[test]
    fn grid_origin_scales_by_chunk_size() {
        let dims = ChunkDims::new(256, 128);
        assert_eq!(
            dims.grid_origin(GridCoord::new(-2, 3)),
            Vec3::new(-512.0, 0.0, 384.0)
        );
        assert_eq!(dims.texture_width(), 258);
        assert_eq!(dims.texture_height(), 130);
        assert_eq!(dims.texture_len(), 258 * 130);
    }

    #[test]
    fn square_window_covers_every_cell_once() {
        let center = GridCoord::new(4, -7);
        let cells: Vec<GridCoord> = square_window(center, 3).collect();
        let unique: HashSet<GridCoord> = cells.iter().copied().collect();

        assert_eq!(cells.len(), 49);
        assert_eq!(unique.len(), 49);
        assert!(cells
            .iter()
            .all(|cell| (cell.x - center.x).abs() <= 3 && (cell.y - center.y).abs() <= 3));
        assert_eq!(square_window(center, 0).collect::<Vec<_>>(), vec![center]);
    }

    #[test]
    fn nearest_first_starts_at_center_and_never_moves_outward_early() {
        let center = GridCoord::new(-1, 2);
        let ordered = square_window_nearest_first(center, 2);

        assert_eq!(ordered.len(), 25);
        assert_eq!(ordered[0], center);
        let distances: Vec<i64> = ordered
            .iter()
            .map(|cell| {
                let dx = i64::from(cell.x - center.x);
                let dy = i64::from(cell.y - center.y);
                dx * dx + dy * dy
            })
            .collect();
        assert!(distances.windows(2).all(|pair| pair[0] <= pair[1]));
    }

    #[test]
    fn window_at_grid_edge_drops_cells_past_i32_range() {
        let corner = GridCoord::new(i32::MAX, i32::MIN);
        let cells = square_window_nearest_first(corner, 1);

        assert_eq!(cells.len(), 4);
        assert_eq!(cells[0], corner);
        assert!(cells.contains(&GridCoord::new(i32::MAX - 1, i32::MIN + 1)));

        let far = ChunkDims::new(16, 16).world_to_grid(Vec3::new(1.0e30, 0.0, -1.0e30));
        assert_eq!(far, corner);
    }

    #[test]
    fn grid_coord_arithmetic_is_component_wise() {
        let a = GridCoord::new(3, -4);
        let b = GridCoord::new(-1, 6);
        assert_eq!(a + b, GridCoord::new(2, 2));
        assert_eq!(a - b, GridCoord::new(4, -10));
        assert_eq!(a.to_string(), "(3, -4)");
    }
}
