//! Chunk-based data layers and the dependency resolution that drives them.
//!
//! A layer owns a rolling grid of chunks, a level count, and declarative
//! dependencies per level. Resolution walks the dependency graph recursively:
//! guaranteeing a layer at a level across some bounds first guarantees
//! everything those chunks depend on, then generates them closest-first
//! (optionally in parallel), then records a reference to every retained
//! (chunk, level) into the caller's record. Teardown is the mirror image,
//! driven by user counts reaching zero.

use crate::{
    chunk::{Chunk, ChunkPayload, LevelRecord, PayloadCtx, Provider},
    error::{ConfigError, GenError},
    manager::GenContext,
    pool::{ObjectPool, PoolStats},
    registry::{LayerId, LayerRegistry},
    top_dependency::TopDependency,
};
use backtrace::Backtrace;
use grid_data::{floor_div, GridBounds, Point, RollingGrid};
use parking_lot::Mutex;
use rayon::prelude::*;
use std::{
    any::Any,
    sync::Arc,
};


/// A layer's declared dependency on another layer: generating a chunk of the
/// owning layer at the owning level requires `layer` generated to `level`
/// across the chunk's world bounds expanded by the padding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LayerDependency {
    pub layer: LayerId,
    pub level: i32,
    pub h_padding: i32,
    pub v_padding: i32,
}

impl LayerDependency {
    pub fn new(layer: LayerId, level: i32, h_padding: i32, v_padding: i32) -> Self {
        LayerDependency { layer, level, h_padding, v_padding }
    }
}

/// Identifies the consumer asking a layer for data, so a request that falls
/// outside any declared dependency's padding produces an actionable
/// diagnostic.
#[derive(Debug, Clone, Copy)]
pub struct Requester {
    pub layer: LayerId,
    pub bounds: GridBounds,
}

/// Configuration for constructing a [`Layer`].
pub struct LayerConfig {
    pub id: LayerId,
    pub chunk_size: Point,
    pub level_count: i32,
    /// Pairs of (own level, dependency).
    pub dependencies: Vec<(i32, LayerDependency)>,
    pub grid_size: Point,
    pub grid_max_overlap: usize,
}

impl LayerConfig {
    pub fn new(id: LayerId, chunk_w: i32, chunk_h: i32) -> Self {
        LayerConfig {
            id,
            chunk_size: Point::new(chunk_w, chunk_h),
            level_count: 1,
            dependencies: Vec::new(),
            grid_size: Point::new(32, 32),
            grid_max_overlap: 3,
        }
    }

    pub fn with_level_count(mut self, level_count: i32) -> Self {
        self.level_count = level_count;
        self
    }

    pub fn with_dependency(mut self, own_level: i32, dependency: LayerDependency) -> Self {
        self.dependencies.push((own_level, dependency));
        self
    }

    pub fn with_grid(mut self, size_x: i32, size_y: i32, max_overlap: usize) -> Self {
        self.grid_size = Point::new(size_x, size_y);
        self.grid_max_overlap = max_overlap;
        self
    }
}

/// Pool occupancy of one layer, for scheduler stats logging.
#[derive(Debug, Clone, Copy)]
pub struct LayerPoolStats {
    pub chunks: PoolStats,
    pub records: PoolStats,
}

/// Object-safe surface of a layer, used for cross-layer dispatch through the
/// registry regardless of payload type.
pub trait DynLayer: Send + Sync + 'static {
    fn id(&self) -> LayerId;
    fn chunk_size(&self) -> Point;
    fn level_count(&self) -> i32;
    fn level_dependencies(&self, level: i32) -> &[LayerDependency];

    /// Guarantee the layer is generated to at least `level` across `bounds`,
    /// recording a reference to every retained (chunk, level) into `record`.
    fn ensure_loaded_in_bounds(
        &self,
        cx: &GenContext<'_>,
        bounds: GridBounds,
        level: i32,
        record: &mut LevelRecord,
    );

    /// Resolve one changed top dependency: retain its new working set, then
    /// release the previous one, so the two overlap in memory during the
    /// transition.
    fn process_top_dependency(&self, cx: &GenContext<'_>, dep: &TopDependency);

    /// Drop one user reference to (index, level), tearing the level down if
    /// it was the last.
    fn decrement_user_count(
        &self,
        cx: &GenContext<'_>,
        index: Point,
        level: i32,
    ) -> Result<(), GenError>;

    /// True if the layer is generated to at least `level` at the world
    /// position.
    fn is_loaded_at_position(&self, position: Point, level: i32) -> bool;

    fn pool_stats(&self) -> LayerPoolStats;

    fn as_any_arc(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
}

/// A grid of same-sized chunks with its own level count and dependency
/// declarations, generic over the payload its chunks carry.
pub struct Layer<P: ChunkPayload> {
    id: LayerId,
    chunk_size: Point,
    level_count: i32,
    dependencies: Vec<Vec<LayerDependency>>,
    chunks: Mutex<RollingGrid<Arc<Chunk<P>>>>,
    chunk_pool: ObjectPool<Chunk<P>>,
    record_pool: ObjectPool<LevelRecord>,
}

impl<P: ChunkPayload> Layer<P> {
    /// Construct a layer whose chunks carry payloads built by
    /// `payload_factory`.
    pub fn new<F>(config: LayerConfig, payload_factory: F) -> Result<Arc<Self>, ConfigError>
    where
        F: Fn() -> P + Send + Sync + 'static,
    {
        let id = config.id;
        let invalid = move |reason: String| ConfigError::InvalidLayer { layer: id, reason };
        if config.chunk_size.x < 1 || config.chunk_size.y < 1 {
            return Err(invalid(format!("chunk size {:?} must be positive", config.chunk_size)));
        }
        if config.level_count < 1 {
            return Err(invalid(format!("level count {} must be at least 1", config.level_count)));
        }
        if config.grid_size.x < 1 || config.grid_size.y < 1 || config.grid_max_overlap < 1 {
            return Err(invalid(format!(
                "grid size {:?} and overlap {} must be positive",
                config.grid_size, config.grid_max_overlap,
            )));
        }

        let mut dependencies = vec![Vec::new(); config.level_count as usize];
        for (own_level, dependency) in config.dependencies {
            if own_level < 0 || own_level >= config.level_count {
                return Err(invalid(format!(
                    "dependency declared for level {} of {} levels",
                    own_level, config.level_count,
                )));
            }
            if dependency.h_padding < 0 || dependency.v_padding < 0 {
                return Err(invalid(format!(
                    "dependency on {} has negative padding",
                    dependency.layer,
                )));
            }
            dependencies[own_level as usize].push(dependency);
        }

        let level_count = config.level_count;
        Ok(Arc::new(Layer {
            id: config.id,
            chunk_size: config.chunk_size,
            level_count,
            dependencies,
            chunks: Mutex::new(RollingGrid::new(
                config.grid_size.x,
                config.grid_size.y,
                config.grid_max_overlap,
            )),
            chunk_pool: ObjectPool::new(move || Chunk::new(level_count, payload_factory())),
            record_pool: ObjectPool::new(LevelRecord::default),
        }))
    }

    /// The chunk's bounds in world units, based on index and chunk size.
    pub fn chunk_bounds(&self, index: Point) -> GridBounds {
        GridBounds::new(index * self.chunk_size, self.chunk_size)
    }

    /// The chunk at `index`, if present and generated to at least level 0.
    pub fn try_get_chunk(&self, index: Point) -> Option<Arc<Chunk<P>>> {
        let chunk = self.chunk_at(index)?;
        (chunk.level() >= 0).then_some(chunk)
    }

    /// Call `func` for every chunk overlapping `world_bounds` that is
    /// generated to at least `min_level`. Chunks missing from the range
    /// produce the missing-dependency diagnostic for `requester` — data is
    /// never generated on demand here.
    pub fn handle_chunks_in_bounds(
        &self,
        requester: Option<&Requester>,
        world_bounds: GridBounds,
        min_level: i32,
        mut func: impl FnMut(&Chunk<P>),
    ) {
        let indices = world_bounds.divided(self.chunk_size);
        let mut found = Vec::new();
        let mut missing_any = false;
        {
            let chunks = self.chunks.lock();
            for index in indices.iter() {
                match chunks.get(index) {
                    Some(chunk) if chunk.level() >= min_level => found.push(Arc::clone(chunk)),
                    _ => missing_any = true,
                }
            }
        }
        for chunk in &found {
            func(chunk);
        }
        if missing_any {
            if let Some(requester) = requester {
                self.warn_missing_dependency(requester, world_bounds);
            }
        }
    }

    /// For an infinite grid with `points_per_chunk` points per chunk,
    /// resolve the chunk containing `point` and the point's local coordinate
    /// within it.
    pub fn get_chunk_of_grid_point(
        &self,
        requester: Option<&Requester>,
        point: Point,
        points_per_chunk: Point,
    ) -> Option<(Arc<Chunk<P>>, Point)> {
        let index = Point::new(
            floor_div(point.x, points_per_chunk.x),
            floor_div(point.y, points_per_chunk.y),
        );
        if let Some(chunk) = self.try_get_chunk(index) {
            let local = point - index * points_per_chunk;
            return Some((chunk, local));
        }
        if let Some(requester) = requester {
            let cell_size = self.chunk_size / points_per_chunk;
            let requested = GridBounds::new(point * cell_size, cell_size);
            self.warn_missing_dependency(requester, requested);
        }
        None
    }

    fn chunk_at(&self, index: Point) -> Option<Arc<Chunk<P>>> {
        self.chunks.lock().get(index).cloned()
    }

    /// Steps 1-3 and 6 of resolution: map bounds to chunk indices, create
    /// missing chunks, generate the ones below `level` closest-first, then
    /// retain every chunk in range on behalf of `record`.
    fn ensure_loaded(
        &self,
        cx: &GenContext<'_>,
        bounds: GridBounds,
        level: i32,
        record: &mut LevelRecord,
    ) {
        if cx.is_aborting() {
            return;
        }
        debug_assert!(level >= 0 && level < self.level_count, "level out of range");

        let indices = bounds.divided(self.chunk_size);
        let mut create_indices = Vec::new();
        {
            let mut chunks = self.chunks.lock();
            for index in indices.iter() {
                let existing_level = chunks.get(index).map(|chunk| chunk.level());
                let level_now = match existing_level {
                    Some(level_now) => level_now,
                    None => {
                        let mut chunk = self.chunk_pool.get();
                        chunk.activate(index);
                        chunks.insert(index, Arc::new(chunk));
                        -1
                    }
                };
                if level_now < level {
                    create_indices.push(index);
                }
            }
        }
        cx.work.add_needed(create_indices.len() as f32, self.id);

        // closest-first, so a moving focus sees nearby chunks appear sooner
        let center = bounds.center();
        create_indices.sort_by_key(|index| {
            let dx = (index.x * self.chunk_size.x - center.x) as i64;
            let dy = (index.y * self.chunk_size.y - center.y) as i64;
            dx * dx + dy * dy
        });

        if cx.parallel {
            create_indices.par_iter().for_each(|&index| {
                if cx.is_aborting() {
                    return;
                }
                if let Err(e) = self.create_chunk_level(cx, index, level) {
                    error!("{}", e);
                }
                cx.work.add_done(1.0, self.id);
            });
        } else {
            for &index in &create_indices {
                if cx.is_aborting() {
                    break;
                }
                if let Err(e) = self.create_chunk_level(cx, index, level) {
                    error!("{}", e);
                }
                cx.work.add_done(1.0, self.id);
            }
        }

        if cx.is_aborting() {
            return;
        }

        for index in indices.iter() {
            let Some(chunk) = self.chunk_at(index) else {
                error!("{}", GenError::ChunkAbsent { layer: self.id, index });
                continue;
            };
            if chunk.increment_user_count(level) {
                record.providers.push(Provider { layer: self.id, index, level });
            } else {
                // the chunk failed to reach the level; its error was already
                // logged where it happened
                error!("{}", GenError::MissingLevelRecord { layer: self.id, index, level });
            }
        }
    }

    /// Steps 4-5 of resolution: raise one chunk to `level` by exactly one
    /// step, resolving its prerequisites first.
    ///
    /// Prerequisites are resolved before the per-level lock is taken, so
    /// recursive resolution never runs under a held lock and a thread can
    /// never re-enter a lock it already holds. A worker that loses the
    /// publish race releases the references its attempt acquired.
    fn create_chunk_level(
        &self,
        cx: &GenContext<'_>,
        index: Point,
        level: i32,
    ) -> Result<(), GenError> {
        let chunk = self
            .chunk_at(index)
            .ok_or(GenError::ChunkAbsent { layer: self.id, index })?;
        if chunk.level() >= level {
            return Ok(());
        }

        let mut record = self.record_pool.get();
        self.ensure_providers(cx, index, level, &mut record);

        if cx.is_aborting() {
            drop(chunk);
            self.release_record(cx, record);
            return Ok(());
        }

        {
            let _level_guard = chunk.level_lock(level).lock();
            let level_now = chunk.level();
            if level_now == level - 1 {
                let ctx = self.payload_ctx(cx, index);
                chunk.payload().create(&ctx, level, false);
                chunk.publish_level(level, record);
                return Ok(());
            }
        }

        // raced with another worker, or the level sequence is broken; either
        // way this attempt's references are surplus. the chunk handle must
        // not outlive this frame: releasing can cascade into teardown, which
        // reclaims chunks through the pool only when nothing else holds them
        let level_now = chunk.level();
        drop(chunk);
        self.release_record(cx, record);
        if level_now >= level {
            Ok(())
        } else {
            Err(GenError::SkippedLevel { layer: self.id, index, from: level_now, to: level })
        }
    }

    /// Step 4: recursively guarantee everything (index, level) depends on.
    fn ensure_providers(
        &self,
        cx: &GenContext<'_>,
        index: Point,
        level: i32,
        record: &mut LevelRecord,
    ) {
        let chunk_bounds = self.chunk_bounds(index);

        // the lower level of the own layer, one chunk ring around this one
        if level > 0 {
            let internal_bounds = chunk_bounds.expanded(self.chunk_size.x, self.chunk_size.y);
            self.ensure_loaded(cx, internal_bounds, level - 1, record);
        }

        // declared external dependencies
        for dependency in &self.dependencies[level as usize] {
            let required_bounds = chunk_bounds.expanded(dependency.h_padding, dependency.v_padding);
            match cx.registry.get(dependency.layer) {
                Some(layer) => {
                    layer.ensure_loaded_in_bounds(cx, required_bounds, dependency.level, record);
                }
                None => error!("{}", GenError::UnknownLayer(dependency.layer)),
            }
        }
    }

    /// Tear down one generated level of one chunk. Only valid once the
    /// level's user count has reached zero.
    fn remove_chunk_level(
        &self,
        cx: &GenContext<'_>,
        index: Point,
        level: i32,
    ) -> Result<(), GenError> {
        let chunk = self
            .chunk_at(index)
            .ok_or(GenError::ChunkAbsent { layer: self.id, index })?;

        let level_now = chunk.level();
        if level_now != level {
            return Err(GenError::OutOfOrderTeardown {
                layer: self.id,
                index,
                level,
                at: level_now,
            });
        }
        let record = chunk
            .take_record(level)
            .ok_or(GenError::MissingLevelRecord { layer: self.id, index, level })?;

        if level == 0 {
            self.chunks.lock().remove(index);
        }
        chunk.set_level(level - 1);

        {
            let ctx = self.payload_ctx(cx, index);
            chunk.payload().create(&ctx, level, true);
        }

        if level == 0 {
            // a level-0 record only references other layers, so the cascade
            // cannot reach back to this chunk; with the grid entry gone, the
            // handle here is the last one and the chunk can be recycled
            self.release_record(cx, record);
            match Arc::try_unwrap(chunk) {
                Ok(chunk) => self.chunk_pool.recycle(chunk),
                Err(chunk) => warn!(
                    "{} chunk {:?} still referenced at teardown, dropped without recycling",
                    self.id,
                    chunk.index(),
                ),
            }
        } else {
            // the record references this chunk's own lower level; drop the
            // handle before cascading so a full teardown can reclaim it
            drop(chunk);
            self.release_record(cx, record);
        }
        Ok(())
    }

    /// Drop every reference a record holds (cascading teardown of providers
    /// whose count reaches zero), then recycle the record.
    fn release_record(&self, cx: &GenContext<'_>, mut record: LevelRecord) {
        for provider in record.providers.drain(..) {
            let result = match cx.registry.get(provider.layer) {
                Some(layer) => layer.decrement_user_count(cx, provider.index, provider.level),
                None => Err(GenError::UnknownLayer(provider.layer)),
            };
            if let Err(e) = result {
                error!("{}", e);
            }
        }
        self.record_pool.recycle(record);
    }

    fn payload_ctx<'a>(&self, cx: &GenContext<'a>, index: Point) -> PayloadCtx<'a> {
        PayloadCtx {
            layer: self.id,
            index,
            bounds: self.chunk_bounds(index),
            registry: cx.registry,
            actions: cx.actions,
        }
    }

    /// Log which dependency padding would have covered `requested`. The fix
    /// is always an explicit declaration: silently expanding dependencies
    /// would hide real bugs and degrade performance unpredictably.
    fn warn_missing_dependency(&self, requester: &Requester, requested: GridBounds) {
        let (h_padding, v_padding) = missing_dependency_padding(requester.bounds, requested);
        error!(
            "layer {} requires chunks from {} that are not available.\n\
             it needs a dependency with padding {},{}.\n\
             requested bounds: {:?}, bounds of requester chunk: {:?}\n\
             {:?}",
            requester.layer,
            self.id,
            h_padding,
            v_padding,
            requested,
            requester.bounds,
            Backtrace::new(),
        );
    }
}

/// The minimal dependency padding that would have covered `requested` from a
/// chunk with `requester` bounds.
fn missing_dependency_padding(requester: GridBounds, requested: GridBounds) -> (i32, i32) {
    let top = (requested.max.y - requester.max.y).max(0);
    let bottom = (requested.min.y - requester.min.y).min(0);
    let right = (requested.max.x - requester.max.x).max(0);
    let left = (requested.min.x - requester.min.x).min(0);
    ((-left).max(right), top.max(-bottom))
}

impl<P: ChunkPayload> DynLayer for Layer<P> {
    fn id(&self) -> LayerId {
        self.id
    }

    fn chunk_size(&self) -> Point {
        self.chunk_size
    }

    fn level_count(&self) -> i32 {
        self.level_count
    }

    fn level_dependencies(&self, level: i32) -> &[LayerDependency] {
        self.dependencies
            .get(level as usize)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    fn ensure_loaded_in_bounds(
        &self,
        cx: &GenContext<'_>,
        bounds: GridBounds,
        level: i32,
        record: &mut LevelRecord,
    ) {
        self.ensure_loaded(cx, bounds, level, record);
    }

    fn process_top_dependency(&self, cx: &GenContext<'_>, dep: &TopDependency) {
        let pending = dep.take_pending();

        let new_usage = if pending.active {
            let mut record = self.record_pool.get();
            self.ensure_loaded(cx, pending.bounds, pending.level, &mut record);
            Some(record)
        } else {
            None
        };

        // install the new working set before releasing the old one, so a
        // moving focus never evicts and immediately regenerates a chunk
        let old_usage = dep.swap_root_usage(new_usage);
        if let Some(old_usage) = old_usage {
            self.release_record(cx, old_usage);
        }
    }

    fn decrement_user_count(
        &self,
        cx: &GenContext<'_>,
        index: Point,
        level: i32,
    ) -> Result<(), GenError> {
        let chunk = self
            .chunk_at(index)
            .ok_or(GenError::ChunkAbsent { layer: self.id, index })?;
        let count = chunk.decrement_user_count(level);
        // drop the handle before a possible teardown, which reclaims the
        // chunk through the pool only when nothing else holds it
        drop(chunk);
        match count {
            None => Err(GenError::MissingLevelRecord { layer: self.id, index, level }),
            Some(0) => self.remove_chunk_level(cx, index, level),
            Some(count) if count < 0 => {
                Err(GenError::NegativeUserCount { layer: self.id, index, level })
            }
            Some(_) => Ok(()),
        }
    }

    fn is_loaded_at_position(&self, position: Point, level: i32) -> bool {
        let index = Point::new(
            floor_div(position.x, self.chunk_size.x),
            floor_div(position.y, self.chunk_size.y),
        );
        self.try_get_chunk(index)
            .map(|chunk| chunk.level() >= level)
            .unwrap_or(false)
    }

    fn pool_stats(&self) -> LayerPoolStats {
        LayerPoolStats {
            chunks: self.chunk_pool.stats(),
            records: self.record_pool.stats(),
        }
    }

    fn as_any_arc(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_padding_covers_the_request() {
        let requester = GridBounds::min_max(Point::new(0, 0), Point::new(10, 10));
        let requested = GridBounds::min_max(Point::new(-4, -4), Point::new(14, 14));
        assert_eq!(missing_dependency_padding(requester, requested), (4, 4));
    }

    #[test]
    fn minimal_padding_is_zero_for_covered_requests() {
        let requester = GridBounds::min_max(Point::new(0, 0), Point::new(10, 10));
        let requested = GridBounds::min_max(Point::new(2, 2), Point::new(8, 8));
        assert_eq!(missing_dependency_padding(requester, requested), (0, 0));
    }

    #[test]
    fn minimal_padding_handles_one_sided_overhang() {
        let requester = GridBounds::min_max(Point::new(0, 0), Point::new(10, 10));
        let requested = GridBounds::min_max(Point::new(0, 0), Point::new(17, 10));
        assert_eq!(missing_dependency_padding(requester, requested), (7, 0));
    }
}
