//! Shared fixtures for layergen integration tests.
#![allow(dead_code)]

use grid_data::Point;
use layergen::*;
use parking_lot::Mutex;
use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
};


/// One payload hook invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    Created { layer: LayerId, index: Point, level: i32 },
    Destroyed { layer: LayerId, index: Point, level: i32 },
}

/// Thread-safe record of every payload hook invocation, in order.
#[derive(Clone, Default)]
pub struct EventLog(Arc<Mutex<Vec<Event>>>);

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, event: Event) {
        self.0.lock().push(event);
    }

    pub fn events(&self) -> Vec<Event> {
        self.0.lock().clone()
    }

    pub fn created_indices(&self, layer: LayerId, level: i32) -> HashSet<Point> {
        self.events()
            .iter()
            .filter_map(|event| match *event {
                Event::Created { layer: l, index, level: v } if l == layer && v == level => {
                    Some(index)
                }
                _ => None,
            })
            .collect()
    }

    pub fn destroyed_indices(&self, layer: LayerId, level: i32) -> HashSet<Point> {
        self.events()
            .iter()
            .filter_map(|event| match *event {
                Event::Destroyed { layer: l, index, level: v } if l == layer && v == level => {
                    Some(index)
                }
                _ => None,
            })
            .collect()
    }

    pub fn created_count(&self, layer: LayerId, index: Point, level: i32) -> usize {
        self.events()
            .iter()
            .filter(|event| {
                matches!(
                    **event,
                    Event::Created { layer: l, index: i, level: v }
                        if l == layer && i == index && v == level,
                )
            })
            .count()
    }

    /// Levels of `Created` events for one chunk, in log order.
    pub fn levels_created(&self, layer: LayerId, index: Point) -> Vec<i32> {
        self.events()
            .iter()
            .filter_map(|event| match *event {
                Event::Created { layer: l, index: i, level } if l == layer && i == index => {
                    Some(level)
                }
                _ => None,
            })
            .collect()
    }

    /// Levels of `Destroyed` events for one chunk, in log order.
    pub fn levels_destroyed(&self, layer: LayerId, index: Point) -> Vec<i32> {
        self.events()
            .iter()
            .filter_map(|event| match *event {
                Event::Destroyed { layer: l, index: i, level } if l == layer && i == index => {
                    Some(level)
                }
                _ => None,
            })
            .collect()
    }

    /// Replay every chunk's history and assert the level sequence is legal:
    /// creation raises the level by exactly one from -1 upward, destruction
    /// lowers it by exactly one, and no transition is skipped or repeated.
    /// Returns the final level per chunk.
    pub fn assert_legal_history(&self) -> HashMap<(LayerId, Point), i32> {
        let mut levels: HashMap<(LayerId, Point), i32> = HashMap::new();
        for event in self.events() {
            match event {
                Event::Created { layer, index, level } => {
                    let current = levels.entry((layer, index)).or_insert(-1);
                    assert_eq!(
                        level,
                        *current + 1,
                        "{layer} chunk {index:?} created level {level} while at {current}",
                    );
                    *current = level;
                }
                Event::Destroyed { layer, index, level } => {
                    let current = levels.entry((layer, index)).or_insert(-1);
                    assert_eq!(
                        level, *current,
                        "{layer} chunk {index:?} destroyed level {level} while at {current}",
                    );
                    *current = level - 1;
                }
            }
        }
        levels
    }

    /// Like `assert_legal_history`, additionally asserting every chunk ended
    /// fully torn down.
    pub fn assert_all_torn_down(&self) {
        for ((layer, index), level) in self.assert_legal_history() {
            assert_eq!(level, -1, "{layer} chunk {index:?} left at level {level}");
        }
    }
}

/// Payload that records every create/destroy call into an [`EventLog`].
pub struct RecordingPayload {
    log: EventLog,
}

impl ChunkPayload for RecordingPayload {
    fn create(&self, ctx: &PayloadCtx<'_>, level: i32, destroy: bool) {
        let event = if destroy {
            Event::Destroyed { layer: ctx.layer, index: ctx.index, level }
        } else {
            Event::Created { layer: ctx.layer, index: ctx.index, level }
        };
        self.log.record(event);
    }
}

pub fn recording_layer(log: &EventLog, config: LayerConfig) -> Arc<Layer<RecordingPayload>> {
    let log = log.clone();
    Layer::new(config, move || RecordingPayload { log: log.clone() }).expect("layer config")
}

/// Owns the context a synchronous resolution pass needs, in place of a
/// running [`LayerManager`].
pub struct Harness {
    pub registry: Arc<LayerRegistry>,
    pub work: Arc<WorkTracker>,
    pub actions: Arc<ActionQueue>,
    pub abort: AbortFlag,
}

impl Harness {
    pub fn new(registry: LayerRegistry) -> Self {
        let work = Arc::new(WorkTracker::new());
        let actions = Arc::new(ActionQueue::new(Arc::clone(&work)));
        Harness {
            registry: Arc::new(registry),
            work,
            actions,
            abort: AbortFlag::new(),
        }
    }

    pub fn cx(&self, parallel: bool) -> GenContext<'_> {
        GenContext {
            registry: &self.registry,
            work: &self.work,
            actions: &self.actions,
            abort: &self.abort,
            parallel,
        }
    }
}

pub fn points(pairs: &[(i32, i32)]) -> HashSet<Point> {
    pairs.iter().map(|&(x, y)| Point::new(x, y)).collect()
}

/// All points in the inclusive square index range, e.g. `(-1..=1)²`.
pub fn square(min: i32, max: i32) -> HashSet<Point> {
    let mut set = HashSet::new();
    for x in min..=max {
        for y in min..=max {
            set.insert(Point::new(x, y));
        }
    }
    set
}
