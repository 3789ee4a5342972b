//! Bounded-memory storage for an unbounded grid.

use crate::{coord::floor_mod, Point};


/// An unbounded 2D array backed by a fixed amount of memory.
///
/// Coordinates wrap around a fixed-size cell grid by modulo of each axis, so
/// two different logical coordinates can collide on the same cell. Each cell
/// holds up to `max_overlap` entries to absorb those collisions; exceeding
/// that capacity means the grid is sized too small for the working set and is
/// treated as an unrecoverable configuration error.
///
/// Lookup is O(1) amortized. The grid itself is not synchronized; layers
/// guard structural mutation with their own lock.
#[derive(Debug)]
pub struct RollingGrid<T> {
    size: Point,
    max_overlap: usize,
    cells: Vec<Vec<(Point, T)>>,
    len: usize,
}

impl<T> RollingGrid<T> {
    pub fn new(size_x: i32, size_y: i32, max_overlap: usize) -> Self {
        assert!(size_x > 0 && size_y > 0, "rolling grid size must be positive");
        assert!(max_overlap > 0, "rolling grid max overlap must be positive");
        let cell_count = size_x as usize * size_y as usize;
        RollingGrid {
            size: Point::new(size_x, size_y),
            max_overlap,
            cells: (0..cell_count).map(|_| Vec::with_capacity(max_overlap)).collect(),
            len: 0,
        }
    }

    fn cell_index(&self, point: Point) -> usize {
        let x = floor_mod(point.x, self.size.x) as usize;
        let y = floor_mod(point.y, self.size.y) as usize;
        y * self.size.x as usize + x
    }

    pub fn get(&self, point: Point) -> Option<&T> {
        self.cells[self.cell_index(point)]
            .iter()
            .find(|(p, _)| *p == point)
            .map(|(_, value)| value)
    }

    /// Store a value at a coordinate that must not already be occupied.
    ///
    /// Panics if the coordinate is already present, or if the cell it wraps
    /// to is full. The latter means the grid dimensions or overlap factor
    /// must be enlarged to fit the working set.
    pub fn insert(&mut self, point: Point, value: T) {
        let max_overlap = self.max_overlap;
        let cell_index = self.cell_index(point);
        let cell = &mut self.cells[cell_index];
        assert!(
            cell.iter().all(|(p, _)| *p != point),
            "rolling grid coordinate {:?} already occupied",
            point,
        );
        assert!(
            cell.len() < max_overlap,
            "rolling grid max overlap {} exceeded at {:?}; \
             enlarge the grid dimensions or overlap factor",
            max_overlap,
            point,
        );
        cell.push((point, value));
        self.len += 1;
    }

    /// Remove and return the value at a coordinate, compacting the cell.
    pub fn remove(&mut self, point: Point) -> Option<T> {
        let cell_index = self.cell_index(point);
        let cell = &mut self.cells[cell_index];
        let entry_index = cell.iter().position(|(p, _)| *p == point)?;
        let (_, value) = cell.swap_remove(entry_index);
        self.len -= 1;
        Some(value)
    }

    /// Iterate all occupied coordinates and their values, in no particular
    /// order.
    pub fn iter(&self) -> impl Iterator<Item = (Point, &T)> {
        self.cells
            .iter()
            .flat_map(|cell| cell.iter().map(|(p, value)| (*p, value)))
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}
