//! Cross-thread action queue.
//!
//! Generation runs on background threads, but some side effects must execute
//! on one specific thread (anything touching a resource that is not thread
//! safe). Chunk code enqueues those effects here; the designated thread
//! drains them once per tick under a time budget.

use crate::{
    registry::LayerId,
    work_tracker::WorkTracker,
};
use parking_lot::Mutex;
use std::{
    collections::VecDeque,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};


/// Work tracker key under which queued actions are tallied.
pub const ACTION_WORK_KEY: LayerId = LayerId("queued-actions");

/// An effect deferred to the designated thread.
pub trait QueuedAction: Send {
    fn process(self: Box<Self>);
}

impl<F: FnOnce() + Send> QueuedAction for F {
    fn process(self: Box<Self>) {
        (*self)()
    }
}

/// Three FIFO queues drained once per designated-thread tick.
///
/// Next-frame actions are always fully processed at the next drain. After
/// them, fast-track actions and then regular actions are processed while the
/// per-tick budget lasts; anything left over carries to the following tick.
pub struct ActionQueue {
    regular: Mutex<VecDeque<Box<dyn QueuedAction>>>,
    fast_track: Mutex<VecDeque<Box<dyn QueuedAction>>>,
    next_frame: Mutex<VecDeque<Box<dyn QueuedAction>>>,
    budget_per_frame_ms: AtomicU64,
    work: Arc<WorkTracker>,
}

impl ActionQueue {
    pub fn new(work: Arc<WorkTracker>) -> Self {
        ActionQueue {
            regular: Mutex::new(VecDeque::new()),
            fast_track: Mutex::new(VecDeque::new()),
            next_frame: Mutex::new(VecDeque::new()),
            budget_per_frame_ms: AtomicU64::new(1),
            work,
        }
    }

    /// Budget in milliseconds per `process_queue` call. Actions are processed
    /// as long as budget remains, so the last one will likely overshoot it
    /// slightly.
    pub fn set_budget_per_frame(&self, ms: u64) {
        self.budget_per_frame_ms.store(ms, Ordering::Relaxed);
    }

    pub fn budget_per_frame(&self) -> u64 {
        self.budget_per_frame_ms.load(Ordering::Relaxed)
    }

    /// Enqueue on the regular queue.
    pub fn enqueue(&self, action: impl QueuedAction + 'static) {
        self.regular.lock().push_back(Box::new(action));
        self.work.add_needed(1.0, ACTION_WORK_KEY);
    }

    /// Enqueue ahead of the regular queue.
    pub fn enqueue_fast_track(&self, action: impl QueuedAction + 'static) {
        self.fast_track.lock().push_back(Box::new(action));
        self.work.add_needed(1.0, ACTION_WORK_KEY);
    }

    /// Enqueue to run unconditionally at the next drain.
    pub fn enqueue_next_frame(&self, action: impl QueuedAction + 'static) {
        self.next_frame.lock().push_back(Box::new(action));
        self.work.add_needed(1.0, ACTION_WORK_KEY);
    }

    /// Total queued actions across all three queues.
    pub fn queue_count(&self) -> usize {
        self.regular.lock().len() + self.fast_track.lock().len() + self.next_frame.lock().len()
    }

    pub fn idle(&self) -> bool {
        self.queue_count() == 0
    }

    /// Drain the queues. Must be called once per tick on the designated
    /// thread. No queue lock is held while an action runs, so actions may
    /// themselves enqueue.
    pub fn process_queue(&self) {
        // next-frame actions run regardless of budget; actions they enqueue
        // for next frame land in the following tick
        let promoted: Vec<Box<dyn QueuedAction>> = self.next_frame.lock().drain(..).collect();
        for action in promoted {
            action.process();
            self.work.add_done(1.0, ACTION_WORK_KEY);
        }

        let budget = Duration::from_millis(self.budget_per_frame_ms.load(Ordering::Relaxed));
        let start = Instant::now();
        self.drain_budgeted(&self.fast_track, start, budget);
        self.drain_budgeted(&self.regular, start, budget);
    }

    fn drain_budgeted(
        &self,
        queue: &Mutex<VecDeque<Box<dyn QueuedAction>>>,
        start: Instant,
        budget: Duration,
    ) {
        loop {
            let action = {
                let mut queue = queue.lock();
                if queue.is_empty() || start.elapsed() >= budget {
                    break;
                }
                queue.pop_front()
            };
            if let Some(action) = action {
                action.process();
                self.work.add_done(1.0, ACTION_WORK_KEY);
            }
        }
    }
}
