//! Progress reporting for background generation.

use crate::registry::LayerId;
use parking_lot::Mutex;
use std::collections::HashMap;


/// Aggregates estimated versus completed generation units per layer, for
/// progress reporting while a working set is being built.
///
/// Estimates exist because the true amount of work is only discovered as the
/// dependency graph is walked: a changed top dependency contributes a coarse
/// estimate up front, which is replaced by the exact needed count once its
/// resolution pass completes.
#[derive(Default)]
pub struct WorkTracker {
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    tracking: bool,
    estimated: HashMap<LayerId, f32>,
    needed: HashMap<LayerId, f32>,
    done: HashMap<LayerId, f32>,
}

impl WorkTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_estimated(&self, work: f32, key: LayerId) {
        let mut inner = self.inner.lock();
        if inner.tracking {
            *inner.estimated.entry(key).or_default() += work;
        }
    }

    pub fn add_needed(&self, work: f32, key: LayerId) {
        let mut inner = self.inner.lock();
        if inner.tracking {
            *inner.needed.entry(key).or_default() += work;
        }
    }

    pub fn add_done(&self, work: f32, key: LayerId) {
        let mut inner = self.inner.lock();
        if inner.tracking {
            *inner.done.entry(key).or_default() += work;
        }
    }

    /// The true amount of work for `key` is now discovered: drop its estimate
    /// in favor of the needed count.
    pub fn work_is_known(&self, key: LayerId) {
        let mut inner = self.inner.lock();
        if inner.tracking {
            let needed = inner.needed.get(&key).copied().unwrap_or(0.0);
            inner.estimated.insert(key, needed);
        }
    }

    /// Clear all tallies and begin tracking.
    pub fn start_tracking(&self) {
        let mut inner = self.inner.lock();
        inner.estimated.clear();
        inner.needed.clear();
        inner.done.clear();
        inner.tracking = true;
    }

    /// Stop tracking and log the final tallies.
    pub fn stop_tracking(&self) {
        let results = {
            let mut inner = self.inner.lock();
            inner.tracking = false;
            Self::format_results(&inner)
        };
        info!("{}", results);
    }

    /// Fraction of tracked work completed, in `0.0..=1.0`.
    pub fn progress(&self) -> f32 {
        let inner = self.inner.lock();
        let mut needed_total = 0.0f32;
        let mut done_total = 0.0f32;
        for (key, &estimated) in &inner.estimated {
            let needed = inner.needed.get(key).copied().unwrap_or(0.0);
            needed_total += estimated.max(needed);
            done_total += inner.done.get(key).copied().unwrap_or(0.0);
        }
        if needed_total == 0.0 {
            0.0
        } else {
            done_total / needed_total
        }
    }

    pub fn results(&self) -> String {
        Self::format_results(&self.inner.lock())
    }

    fn format_results(inner: &Inner) -> String {
        let mut str = String::from("work tracker results\n");
        let mut keys: Vec<&LayerId> = inner.estimated.keys().collect();
        keys.sort();
        for key in keys {
            let estimated = inner.estimated.get(key).copied().unwrap_or(0.0);
            let needed = inner.needed.get(key).copied().unwrap_or(0.0);
            let done = inner.done.get(key).copied().unwrap_or(0.0);
            str += &format!("   {key} : estimated: {estimated}  needed: {needed}  done: {done}\n");
        }
        str
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    const KEY: LayerId = LayerId("test-layer");

    #[test]
    fn untracked_work_is_ignored() {
        let tracker = WorkTracker::new();
        tracker.add_needed(5.0, KEY);
        tracker.add_done(5.0, KEY);
        assert_eq!(tracker.progress(), 0.0);
    }

    #[test]
    fn progress_uses_the_larger_of_estimated_and_needed() {
        let tracker = WorkTracker::new();
        tracker.start_tracking();
        tracker.add_estimated(100.0, KEY);
        tracker.add_needed(10.0, KEY);
        tracker.add_done(10.0, KEY);
        // estimate still dominates until the work is known
        assert!(tracker.progress() < 0.2);
        tracker.work_is_known(KEY);
        assert_eq!(tracker.progress(), 1.0);
    }

    #[test]
    fn needed_can_exceed_estimate() {
        let tracker = WorkTracker::new();
        tracker.start_tracking();
        tracker.add_estimated(4.0, KEY);
        tracker.add_needed(8.0, KEY);
        tracker.add_done(4.0, KEY);
        assert_eq!(tracker.progress(), 0.5);
    }

    #[test]
    fn start_tracking_clears_previous_tallies() {
        let tracker = WorkTracker::new();
        tracker.start_tracking();
        tracker.add_estimated(4.0, KEY);
        tracker.add_needed(4.0, KEY);
        tracker.start_tracking();
        assert_eq!(tracker.progress(), 0.0);
        assert!(!tracker.results().contains("4"));
    }
}
