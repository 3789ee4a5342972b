//! Axis-aligned rectangles of integer coordinates.

use crate::{
    coord::{ceil_div, floor_div},
    Point,
};


/// Axis-aligned rectangle on the integer grid. `min` is inclusive, `max` is
/// exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct GridBounds {
    pub min: Point,
    pub max: Point,
}

impl GridBounds {
    /// Construct from the min corner and a size.
    pub fn new(min: Point, size: Point) -> Self {
        GridBounds { min, max: min + size }
    }

    /// Construct from both corners.
    pub fn min_max(min: Point, max: Point) -> Self {
        GridBounds { min, max }
    }

    /// Whether the rectangle covers no points at all.
    pub fn is_empty(&self) -> bool {
        self.max.x <= self.min.x || self.max.y <= self.min.y
    }

    pub fn size(&self) -> Point {
        self.max - self.min
    }

    /// Center point, rounding down on odd sizes.
    pub fn center(&self) -> Point {
        Point::new(
            floor_div(self.min.x + self.max.x, 2),
            floor_div(self.min.y + self.max.y, 2),
        )
    }

    pub fn contains(&self, point: Point) -> bool {
        self.min.x <= point.x
            && self.min.y <= point.y
            && self.max.x > point.x
            && self.max.y > point.y
    }

    pub fn overlaps(&self, other: GridBounds) -> bool {
        self.min.x < other.max.x
            && self.min.y < other.max.y
            && self.max.x > other.min.x
            && self.max.y > other.min.y
    }

    /// Grow by `h` on the left and right edges and `v` on the bottom and top
    /// edges. Negative values shrink.
    pub fn expanded(&self, h: i32, v: i32) -> GridBounds {
        GridBounds {
            min: self.min - Point::new(h, v),
            max: self.max + Point::new(h, v),
        }
    }

    /// The inclusive-exclusive range of cells of size `cell_size` this
    /// rectangle overlaps, rounding outward. This is how world-space bounds
    /// convert to the chunk indices they touch.
    pub fn divided(&self, cell_size: Point) -> GridBounds {
        GridBounds {
            min: Point::new(
                floor_div(self.min.x, cell_size.x),
                floor_div(self.min.y, cell_size.y),
            ),
            max: Point::new(
                ceil_div(self.max.x, cell_size.x),
                ceil_div(self.max.y, cell_size.y),
            ),
        }
    }

    /// Iterate all points in the rectangle, x-major.
    pub fn iter(&self) -> impl Iterator<Item = Point> {
        let b = *self;
        (b.min.x..b.max.x).flat_map(move |x| (b.min.y..b.max.y).map(move |y| Point::new(x, y)))
    }
}
