//! Integer chunk-space primitives.
//!
//! Provides the coordinate math, rectangle type, and rolling grid spatial
//! index used by layers to address an unbounded 2D world with bounded memory.

pub mod bounds;
pub mod coord;
pub mod rolling_grid;

pub use self::{
    bounds::GridBounds,
    coord::{ceil_div, floor_div, floor_mod},
    rolling_grid::RollingGrid,
};

use vek::*;


/// 2D integer coordinate. Used for world positions, chunk indices, and sizes.
pub type Point = Vec2<i32>;
