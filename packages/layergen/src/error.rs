//! Error taxonomy.
//!
//! Configuration errors are unrecoverable and surface at setup time (or as
//! panics at the point of violation). Generation errors are invariant
//! violations: they indicate a missing or incorrect dependency declaration,
//! not corrupted core state, so they are logged at the nearest batch boundary
//! and processing continues best-effort.

use crate::registry::LayerId;
use grid_data::Point;
use thiserror::Error;


/// Unrecoverable setup error.
#[derive(Debug, Clone, Error)]
pub enum ConfigError {
    #[error("layer {0} registered twice")]
    DuplicateLayer(LayerId),
    #[error("layer {layer}: {reason}")]
    InvalidLayer { layer: LayerId, reason: String },
    #[error("layer {layer} level {level} depends on unregistered layer {target}")]
    UnknownDependency {
        layer: LayerId,
        level: i32,
        target: LayerId,
    },
    #[error(
        "layer {layer} level {level} depends on {target} level {target_level}, \
         but {target} has {target_levels} levels"
    )]
    InvalidDependencyLevel {
        layer: LayerId,
        level: i32,
        target: LayerId,
        target_level: i32,
        target_levels: i32,
    },
    #[error("dependency cycle between layers: {path}")]
    DependencyCycle { path: String },
}

/// Invariant violation during generation or teardown.
#[derive(Debug, Clone, Error)]
pub enum GenError {
    #[error(
        "{layer} chunk {index:?}: cannot raise level from {from} to {to}, \
         levels raise exactly one at a time"
    )]
    SkippedLevel {
        layer: LayerId,
        index: Point,
        from: i32,
        to: i32,
    },
    #[error("{layer} chunk {index:?}: tearing down level {level} while chunk is at level {at}")]
    OutOfOrderTeardown {
        layer: LayerId,
        index: Point,
        level: i32,
        at: i32,
    },
    #[error("{layer} chunk {index:?} has no record for level {level}")]
    MissingLevelRecord {
        layer: LayerId,
        index: Point,
        level: i32,
    },
    #[error("{layer} chunk {index:?} user count for level {level} went negative")]
    NegativeUserCount {
        layer: LayerId,
        index: Point,
        level: i32,
    },
    #[error("{layer} chunk {index:?} is absent")]
    ChunkAbsent { layer: LayerId, index: Point },
    #[error("layer {0} is not registered")]
    UnknownLayer(LayerId),
}
