//! Chunks and their per-level bookkeeping.

use crate::{
    action_queue::ActionQueue,
    layer::Requester,
    pool::Poolable,
    registry::{LayerId, LayerRegistry},
};
use grid_data::{GridBounds, Point};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicI32, Ordering};


/// A (chunk, level) pair that another (chunk, level) or a top dependency
/// retains. Stored as a stable key into the owning layer's chunk arena,
/// never as a direct reference, so a recycled chunk cannot be reached
/// through a stale pointer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Provider {
    pub layer: LayerId,
    pub index: Point,
    pub level: i32,
}

/// Bookkeeping attached to one generated level of one chunk, or held by a
/// top dependency as its root usage.
///
/// Tracks what this level depends on (`providers`) and how many other
/// (chunk, level) pairs or top dependencies depend on it (`user_count`).
/// A level's record exists exactly while the chunk is generated to that
/// level; the user count dropping to zero triggers the level's teardown.
#[derive(Debug, Default)]
pub struct LevelRecord {
    pub(crate) providers: Vec<Provider>,
    pub(crate) user_count: i32,
}

impl LevelRecord {
    pub fn providers(&self) -> &[Provider] {
        &self.providers
    }

    pub fn user_count(&self) -> i32 {
        self.user_count
    }
}

impl Poolable for LevelRecord {
    fn reset(&mut self) {
        self.providers.clear();
        self.user_count = 0;
    }
}

/// Context handed to payload hooks, identifying the chunk being generated or
/// destroyed and giving access to the rest of the world.
pub struct PayloadCtx<'a> {
    /// Layer the chunk belongs to.
    pub layer: LayerId,
    /// The chunk's index.
    pub index: Point,
    /// The chunk's bounds in world units.
    pub bounds: GridBounds,
    /// Registry for querying other layers' generated data.
    pub registry: &'a LayerRegistry,
    /// Queue for effects that must run on the designated thread.
    pub actions: &'a ActionQueue,
}

impl PayloadCtx<'_> {
    /// Identify this chunk as the requester of a cross-layer query, so a
    /// query outside declared dependencies produces a useful diagnostic.
    pub fn requester(&self) -> Requester {
        Requester { layer: self.layer, bounds: self.bounds }
    }
}

/// The data a layer's client code stores per chunk, generated and destroyed
/// level by level.
///
/// `create` runs on generation threads while other chunks read previously
/// published levels, so the payload owns the interior mutability of whatever
/// it stores (per-level cells or locks). The framework guarantees ordering:
/// when a consumer observes a chunk at level `L`, every `create` call up to
/// `L` has fully completed, and data of a published level is never mutated
/// again until that level is destroyed.
pub trait ChunkPayload: Send + Sync + 'static {
    /// Generate (`destroy == false`) or release (`destroy == true`) the data
    /// of one level of this chunk. Everything the level is declared to
    /// depend on is generated and retained for the duration of the call.
    fn create(&self, ctx: &PayloadCtx<'_>, level: i32, destroy: bool);

    /// Called when the chunk is recycled into the pool.
    fn reset(&mut self) {}
}

/// One cell of a layer's grid.
///
/// Holds the payload plus per-level bookkeeping: the highest completed level,
/// one record per generated level, and one generation lock per level to
/// serialize concurrent attempts on the same (chunk, level).
pub struct Chunk<P> {
    index: Point,
    level: AtomicI32,
    level_locks: Box<[Mutex<()>]>,
    records: Mutex<Box<[Option<LevelRecord>]>>,
    payload: P,
}

impl<P: ChunkPayload> Chunk<P> {
    pub(crate) fn new(level_count: i32, payload: P) -> Self {
        Chunk {
            index: Point::new(0, 0),
            level: AtomicI32::new(-1),
            level_locks: (0..level_count).map(|_| Mutex::new(())).collect(),
            records: Mutex::new((0..level_count).map(|_| None).collect()),
            payload,
        }
    }

    /// Assign the coordinate for this activation. Only called while the
    /// chunk is exclusively owned, before it is shared into the grid.
    pub(crate) fn activate(&mut self, index: Point) {
        self.index = index;
    }

    /// The chunk's index: a 2D coordinate where consecutive chunks have
    /// consecutive indices and the chunk with its lower-left corner at the
    /// world origin has index (0, 0).
    pub fn index(&self) -> Point {
        self.index
    }

    /// The level the chunk is currently generated up to, or -1.
    ///
    /// Not updated until the level's `create` call has finished, so payload
    /// code must use the level parameter it was passed instead.
    pub fn level(&self) -> i32 {
        self.level.load(Ordering::Acquire)
    }

    pub fn payload(&self) -> &P {
        &self.payload
    }

    pub(crate) fn level_lock(&self, level: i32) -> &Mutex<()> {
        &self.level_locks[level as usize]
    }

    /// Publish a freshly generated level together with its record.
    pub(crate) fn publish_level(&self, level: i32, record: LevelRecord) {
        let mut records = self.records.lock();
        debug_assert!(records[level as usize].is_none(), "level record already present");
        records[level as usize] = Some(record);
        self.level.store(level, Ordering::Release);
    }

    pub(crate) fn set_level(&self, level: i32) {
        self.level.store(level, Ordering::Release);
    }

    pub(crate) fn take_record(&self, level: i32) -> Option<LevelRecord> {
        self.records.lock()[level as usize].take()
    }

    /// Returns false if the level has no record to count against.
    pub(crate) fn increment_user_count(&self, level: i32) -> bool {
        let mut records = self.records.lock();
        match records[level as usize].as_mut() {
            Some(record) => {
                record.user_count += 1;
                true
            }
            None => false,
        }
    }

    /// Returns the new count, or None if the level has no record.
    pub(crate) fn decrement_user_count(&self, level: i32) -> Option<i32> {
        let mut records = self.records.lock();
        records[level as usize].as_mut().map(|record| {
            record.user_count -= 1;
            record.user_count
        })
    }
}

impl<P: ChunkPayload> Poolable for Chunk<P> {
    fn reset(&mut self) {
        *self.level.get_mut() = -1;
        for slot in self.records.get_mut().iter_mut() {
            *slot = None;
        }
        self.payload.reset();
    }
}
