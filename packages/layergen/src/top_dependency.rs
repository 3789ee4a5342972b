//! Top dependencies: the root consumers that seed all generation.

use crate::{
    chunk::LevelRecord,
    layer::DynLayer,
    registry::LayerId,
};
use grid_data::{GridBounds, Point};
use parking_lot::Mutex;


/// A root, externally driven region of interest: an axis-aligned rectangle
/// of `size` centered on `focus`, requiring its layer generated to `level`
/// wherever the rectangle reaches.
///
/// Moving the focus or resizing marks the dependency changed; the scheduler
/// consumes the flag and re-resolves. Change is detected at chunk-index
/// granularity, so focus motion within the same set of covered chunks costs
/// nothing.
pub struct TopDependency {
    layer: LayerId,
    level: i32,
    chunk_size: Point,
    state: Mutex<State>,
    root_usage: Mutex<Option<LevelRecord>>,
}

#[derive(Debug, Clone, Copy)]
struct State {
    focus: Point,
    size: Point,
    chunk_indices: GridBounds,
    active: bool,
    changed: bool,
}

/// Snapshot the scheduler consumes when processing a changed dependency.
pub(crate) struct PendingBounds {
    pub bounds: GridBounds,
    pub level: i32,
    pub active: bool,
}

impl TopDependency {
    /// Construct inactive, with no focus yet. The first `set_focus` call
    /// activates the dependency.
    pub fn new(layer: &dyn DynLayer, size: Point, level: i32) -> Self {
        TopDependency {
            layer: layer.id(),
            level,
            chunk_size: layer.chunk_size(),
            state: Mutex::new(State {
                focus: Point::new(0, 0),
                size,
                chunk_indices: GridBounds::default(),
                active: false,
                changed: false,
            }),
            root_usage: Mutex::new(None),
        }
    }

    /// Like `new`, requiring the layer's highest level.
    pub fn new_top_level(layer: &dyn DynLayer, size: Point) -> Self {
        let level = layer.level_count() - 1;
        Self::new(layer, size, level)
    }

    pub fn layer(&self) -> LayerId {
        self.layer
    }

    pub fn level(&self) -> i32 {
        self.level
    }

    /// Move the center of the required bounds. Activates the dependency if
    /// it was inactive.
    pub fn set_focus(&self, focus: Point) {
        let mut state = self.state.lock();
        if state.active && state.focus == focus {
            return;
        }
        state.focus = focus;
        Self::update_chunk_indices(&mut state, self.chunk_size);
    }

    /// Resize the required bounds. Activates the dependency if it was
    /// inactive.
    pub fn set_size(&self, size: Point) {
        let mut state = self.state.lock();
        if state.active && state.size == size {
            return;
        }
        state.size = size;
        Self::update_chunk_indices(&mut state, self.chunk_size);
    }

    /// Activate or deactivate. Deactivating releases the whole working set
    /// once the scheduler processes the change.
    pub fn set_active(&self, active: bool) {
        let mut state = self.state.lock();
        if state.active != active {
            state.active = active;
            state.changed = true;
        }
    }

    pub fn is_active(&self) -> bool {
        self.state.lock().active
    }

    pub fn is_changed(&self) -> bool {
        self.state.lock().changed
    }

    /// The current required bounds in world units.
    pub fn bounds(&self) -> GridBounds {
        let state = self.state.lock();
        GridBounds::new(state.focus - state.size / 2, state.size)
    }

    fn update_chunk_indices(state: &mut State, chunk_size: Point) {
        let old_indices = state.chunk_indices;
        let bounds = GridBounds::new(state.focus - state.size / 2, state.size);
        state.chunk_indices = bounds.divided(chunk_size);
        if state.chunk_indices != old_indices || !state.active {
            state.changed = true;
        }
        state.active = true;
    }

    /// Consume the changed flag and return what to resolve.
    pub(crate) fn take_pending(&self) -> PendingBounds {
        let mut state = self.state.lock();
        state.changed = false;
        PendingBounds {
            bounds: GridBounds::new(state.focus - state.size / 2, state.size),
            level: self.level,
            active: state.active,
        }
    }

    /// Install the new root usage, returning the previous one for release.
    pub(crate) fn swap_root_usage(&self, new: Option<LevelRecord>) -> Option<LevelRecord> {
        std::mem::replace(&mut *self.root_usage.lock(), new)
    }
}
