//! Lazy, dependency-driven chunk generation for unbounded 2D worlds.
//!
//! A world is a set of [`Layer`]s, each an infinite grid of fixed-size
//! chunks generated in one or more ordered levels. Layers declare what they
//! depend on — lower levels of themselves, or other layers within padded
//! bounds — and one or more moving [`TopDependency`] regions drive all
//! generation: whenever a chunk's generation hook runs, everything it is
//! declared to depend on is already generated and retained, and chunks are
//! torn down deterministically once nothing still depends on them.
//!
//! The [`LayerManager`] resolves changed top dependencies on a background
//! thread, optionally fanning independent chunks out across worker threads.
//! Effects that must run on one specific thread go through the
//! [`ActionQueue`].

#[macro_use]
extern crate tracing;

pub mod action_queue;
pub mod chunk;
pub mod error;
pub mod layer;
pub mod logging;
pub mod manager;
pub mod pool;
pub mod registry;
pub mod top_dependency;
pub mod work_tracker;

pub use self::{
    action_queue::{ActionQueue, QueuedAction},
    chunk::{Chunk, ChunkPayload, LevelRecord, PayloadCtx, Provider},
    error::{ConfigError, GenError},
    layer::{DynLayer, Layer, LayerConfig, LayerDependency, LayerPoolStats, Requester},
    manager::{AbortFlag, GenContext, LayerManager},
    pool::{ObjectPool, Poolable, PoolStats},
    registry::{LayerId, LayerRegistry, RegistryBuilder},
    top_dependency::TopDependency,
    work_tracker::WorkTracker,
};
