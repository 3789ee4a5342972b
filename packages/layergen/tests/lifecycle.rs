//! Retention and teardown: reference counting, eviction cascades, pooled
//! reuse, and the legality of every chunk's level history.

mod common;

use common::*;
use grid_data::Point;
use layergen::*;
use rand::{Rng, SeedableRng};
use rand_pcg::Pcg32;
use std::sync::Arc;

const GROUND: LayerId = LayerId("ground");
const TOWNS: LayerId = LayerId("towns");


#[test]
fn deactivation_tears_the_whole_working_set_down() {
    let log = EventLog::new();
    let ground = recording_layer(
        &log,
        LayerConfig::new(GROUND, 8, 8).with_level_count(2),
    );
    let harness = Harness::new(
        RegistryBuilder::new().register(ground.clone()).build().unwrap(),
    );

    let dep = TopDependency::new(&*ground, Point::new(8, 8), 1);
    dep.set_focus(Point::new(4, 4));
    ground.process_top_dependency(&harness.cx(false), &dep);
    let created = log.created_indices(GROUND, 0);
    assert!(!created.is_empty());

    dep.set_active(false);
    ground.process_top_dependency(&harness.cx(false), &dep);

    log.assert_all_torn_down();
    for index in created {
        assert!(ground.try_get_chunk(index).is_none());
    }
    let stats = ground.pool_stats();
    assert_eq!(stats.chunks.active, 0);
    assert_eq!(stats.records.active, 0);
    assert_eq!(stats.chunks.gets, stats.chunks.recycles);
    assert_eq!(stats.records.gets, stats.records.recycles);
}

#[test]
fn teardown_cascades_one_level_at_a_time() {
    let log = EventLog::new();
    let ground = recording_layer(
        &log,
        LayerConfig::new(GROUND, 8, 8).with_level_count(2),
    );
    let harness = Harness::new(
        RegistryBuilder::new().register(ground.clone()).build().unwrap(),
    );

    let dep = TopDependency::new(&*ground, Point::new(8, 8), 1);
    dep.set_focus(Point::new(4, 4));
    ground.process_top_dependency(&harness.cx(false), &dep);
    dep.set_active(false);
    ground.process_top_dependency(&harness.cx(false), &dep);

    // the center chunk came down level by level, never skipping
    assert_eq!(log.levels_destroyed(GROUND, Point::new(0, 0)), vec![1, 0]);
    // the ring only ever existed at level 0
    for index in square(-1, 1) {
        if index != Point::new(0, 0) {
            assert_eq!(log.levels_destroyed(GROUND, index), vec![0]);
        }
    }

    // destroying the center's level 1 released its providers before any of
    // the ring could go away
    let events = log.events();
    let center_down = events
        .iter()
        .position(|e| {
            *e == Event::Destroyed { layer: GROUND, index: Point::new(0, 0), level: 1 }
        })
        .expect("center level 1 destroyed");
    let first_ring_down = events
        .iter()
        .position(|e| matches!(*e, Event::Destroyed { level: 0, .. }))
        .expect("ring destroyed");
    assert!(center_down < first_ring_down);
}

#[test]
fn moving_the_focus_keeps_the_overlap_resident() {
    let log = EventLog::new();
    let ground = recording_layer(&log, LayerConfig::new(GROUND, 8, 8));
    let harness = Harness::new(
        RegistryBuilder::new().register(ground.clone()).build().unwrap(),
    );

    let dep = TopDependency::new(&*ground, Point::new(32, 32), 0);
    dep.set_focus(Point::new(16, 16));
    ground.process_top_dependency(&harness.cx(false), &dep);
    assert_eq!(ground.pool_stats().chunks.gets, 16);

    // move by a quarter of the size: old (0,0)..(32,32), new (8,0)..(40,32)
    dep.set_focus(Point::new(24, 16));
    ground.process_top_dependency(&harness.cx(false), &dep);

    let stats = ground.pool_stats().chunks;
    // only the uncovered column churned: 4 new gets, 4 recycles
    assert_eq!(stats.gets, 20);
    assert_eq!(stats.recycles, 4);
    let destroyed = log.destroyed_indices(GROUND, 0);
    assert_eq!(destroyed, points(&[(0, 0), (0, 1), (0, 2), (0, 3)]));
    for x in 1..5 {
        for y in 0..4 {
            let index = Point::new(x, y);
            assert!(ground.try_get_chunk(index).is_some(), "chunk {index:?} evicted");
            assert_eq!(log.created_count(GROUND, index, 0), 1);
        }
    }
}

#[test]
fn focus_motion_within_the_same_chunks_is_free() {
    let log = EventLog::new();
    let ground = recording_layer(&log, LayerConfig::new(GROUND, 8, 8));
    let harness = Harness::new(
        RegistryBuilder::new().register(ground.clone()).build().unwrap(),
    );

    let dep = TopDependency::new(&*ground, Point::new(30, 30), 0);
    dep.set_focus(Point::new(16, 16));
    ground.process_top_dependency(&harness.cx(false), &dep);

    // bounds (2,2)..(32,32) overlap the same chunk indices as (1,1)..(31,31)
    dep.set_focus(Point::new(17, 17));
    assert!(!dep.is_changed());
}

#[test]
fn releasing_one_dependency_keeps_chunks_the_other_needs() {
    let log = EventLog::new();
    let ground = recording_layer(&log, LayerConfig::new(GROUND, 8, 8));
    let harness = Harness::new(
        RegistryBuilder::new().register(ground.clone()).build().unwrap(),
    );

    let west = TopDependency::new(&*ground, Point::new(16, 16), 0);
    west.set_focus(Point::new(8, 8));
    ground.process_top_dependency(&harness.cx(false), &west);

    let east = TopDependency::new(&*ground, Point::new(16, 16), 0);
    east.set_focus(Point::new(16, 8));
    ground.process_top_dependency(&harness.cx(false), &east);

    // west covers x 0..2, east covers x 1..3; column 1 is shared
    west.set_active(false);
    ground.process_top_dependency(&harness.cx(false), &west);

    assert_eq!(log.destroyed_indices(GROUND, 0), points(&[(0, 0), (0, 1)]));
    for index in points(&[(1, 0), (1, 1), (2, 0), (2, 1)]) {
        assert!(ground.try_get_chunk(index).is_some(), "chunk {index:?} evicted");
    }

    east.set_active(false);
    ground.process_top_dependency(&harness.cx(false), &east);
    log.assert_all_torn_down();
    assert_eq!(ground.pool_stats().chunks.active, 0);
}

fn focus_walk(parallel: bool, seed: u64) {
    let log = EventLog::new();
    let ground = recording_layer(&log, LayerConfig::new(GROUND, 8, 8));
    let towns = recording_layer(
        &log,
        LayerConfig::new(TOWNS, 12, 12)
            .with_level_count(2)
            .with_dependency(0, LayerDependency::new(GROUND, 0, 6, 6))
            .with_dependency(1, LayerDependency::new(GROUND, 0, 10, 10)),
    );
    let harness = Harness::new(
        RegistryBuilder::new()
            .register(ground.clone())
            .register(towns.clone())
            .build()
            .unwrap(),
    );

    let dep = Arc::new(TopDependency::new(&*towns, Point::new(24, 24), 1));
    let mut rng = Pcg32::seed_from_u64(seed);
    let mut focus = Point::new(0, 0);
    for _ in 0..12 {
        focus += Point::new(rng.gen_range(-12..=12), rng.gen_range(-12..=12));
        dep.set_focus(focus);
        if dep.is_changed() {
            towns.process_top_dependency(&harness.cx(parallel), &dep);
        }
        log.assert_legal_history();
    }

    dep.set_active(false);
    towns.process_top_dependency(&harness.cx(parallel), &dep);

    // no legitimate execution path raises or lowers a level out of order,
    // and a full release leaves nothing behind
    log.assert_all_torn_down();
    for layer in [&ground, &towns] {
        let stats = layer.pool_stats();
        assert_eq!(stats.chunks.active, 0);
        assert_eq!(stats.records.active, 0);
        assert_eq!(stats.chunks.gets, stats.chunks.recycles);
        assert_eq!(stats.records.gets, stats.records.recycles);
    }
}

#[test]
fn serial_focus_walk_never_breaks_level_ordering() {
    focus_walk(false, 0x5eed);
}

#[test]
fn parallel_focus_walk_never_breaks_level_ordering() {
    focus_walk(true, 0xfaceb00c);
}
