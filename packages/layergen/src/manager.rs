//! The layer manager: the background scheduler that turns changed top
//! dependencies into generation and teardown work.

use crate::{
    action_queue::ActionQueue,
    registry::LayerRegistry,
    top_dependency::TopDependency,
    work_tracker::WorkTracker,
};
use parking_lot::Mutex;
use std::{
    any::Any,
    panic::{self, AssertUnwindSafe},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread,
    time::Duration,
};


/// Cooperative cancellation flag shared by the scheduler and its workers.
/// Checked at the top of every recursive resolution step; once set, no
/// further generation hooks run.
#[derive(Debug, Clone, Default)]
pub struct AbortFlag(Arc<AtomicBool>);

impl AbortFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn abort(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_aborted(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Everything a resolution pass needs, passed by reference through every
/// recursive step rather than reached through globals.
pub struct GenContext<'a> {
    pub registry: &'a LayerRegistry,
    pub work: &'a WorkTracker,
    pub actions: &'a ActionQueue,
    pub abort: &'a AbortFlag,
    /// Fan independent chunks of a batch out across worker threads.
    pub parallel: bool,
}

impl GenContext<'_> {
    pub fn is_aborting(&self) -> bool {
        self.abort.is_aborted()
    }
}

const IDLE_SLEEP: Duration = Duration::from_millis(5);

/// Owns the background generation thread.
///
/// The thread loops until aborted: top dependencies whose required bounds
/// changed are re-resolved (releasing what the previous working set no
/// longer needs), deactivated ones are released and dropped, and when
/// nothing changed the thread sleeps briefly. Dropping the manager aborts
/// in-flight work and joins the thread.
pub struct LayerManager {
    shared: Arc<Shared>,
    thread: Option<thread::JoinHandle<()>>,
}

struct Shared {
    registry: Arc<LayerRegistry>,
    top_dependencies: Mutex<Vec<Arc<TopDependency>>>,
    work: Arc<WorkTracker>,
    actions: Arc<ActionQueue>,
    abort: AbortFlag,
    generating: AtomicBool,
    parallel: bool,
}

impl LayerManager {
    /// Construct and start the background thread. `parallel` enables
    /// data-parallel generation within each resolution batch.
    pub fn new(registry: Arc<LayerRegistry>, parallel: bool) -> Self {
        let work = Arc::new(WorkTracker::new());
        let actions = Arc::new(ActionQueue::new(Arc::clone(&work)));
        let shared = Arc::new(Shared {
            registry,
            top_dependencies: Mutex::new(Vec::new()),
            work,
            actions,
            abort: AbortFlag::new(),
            generating: AtomicBool::new(false),
            parallel,
        });
        let thread = {
            let shared = Arc::clone(&shared);
            thread::Builder::new()
                .name("layer-update".to_owned())
                .spawn(move || update_loop(&shared))
                .expect("unable to spawn layer update thread")
        };
        LayerManager { shared, thread: Some(thread) }
    }

    pub fn registry(&self) -> &Arc<LayerRegistry> {
        &self.shared.registry
    }

    pub fn work_tracker(&self) -> &Arc<WorkTracker> {
        &self.shared.work
    }

    /// The action queue drained by the designated thread. The host must call
    /// `process_queue` on it once per tick.
    pub fn actions(&self) -> &Arc<ActionQueue> {
        &self.shared.actions
    }

    /// Register a top dependency so the background thread starts serving it.
    ///
    /// Panics if the dependency targets an unregistered layer or a level the
    /// layer does not have; both are unrecoverable configuration errors.
    pub fn add_top_dependency(&self, dep: Arc<TopDependency>) {
        let layer = self
            .shared
            .registry
            .get(dep.layer())
            .unwrap_or_else(|| panic!("top dependency targets unregistered layer {}", dep.layer()));
        assert!(
            dep.level() >= 0 && dep.level() < layer.level_count(),
            "top dependency level {} out of range for layer {}",
            dep.level(),
            dep.layer(),
        );
        let mut deps = self.shared.top_dependencies.lock();
        if !deps.iter().any(|d| Arc::ptr_eq(d, &dep)) {
            deps.push(dep);
        }
    }

    /// Whether the background thread is currently resolving dependencies.
    pub fn is_generating_in_background(&self) -> bool {
        self.shared.generating.load(Ordering::SeqCst)
    }

    /// Whether generation is running or deferred actions are still queued.
    /// External callers poll this to know when a save or scene transition is
    /// safe.
    pub fn building(&self) -> bool {
        self.is_generating_in_background() || !self.shared.actions.idle()
    }

    /// Deactivate every top dependency, wait for the background thread to
    /// release their working sets, then stop the thread.
    ///
    /// Queued actions are not drained here; the designated thread keeps
    /// calling `process_queue` for that.
    pub fn shutdown(&mut self) {
        let deps: Vec<Arc<TopDependency>> = self.shared.top_dependencies.lock().clone();
        for dep in deps {
            dep.set_active(false);
        }
        while !self.shared.top_dependencies.lock().is_empty() {
            thread::sleep(IDLE_SLEEP);
        }
        self.stop_thread();
    }

    fn stop_thread(&mut self) {
        self.shared.abort.abort();
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for LayerManager {
    fn drop(&mut self) {
        self.stop_thread();
    }
}

fn update_loop(shared: &Shared) {
    while !shared.abort.is_aborted() {
        let changed: Vec<Arc<TopDependency>> = shared
            .top_dependencies
            .lock()
            .iter()
            .filter(|dep| dep.is_changed())
            .cloned()
            .collect();

        if changed.is_empty() {
            shared.generating.store(false, Ordering::SeqCst);
            if !shared.abort.is_aborted() {
                thread::sleep(IDLE_SLEEP);
            }
            continue;
        }

        shared.generating.store(true, Ordering::SeqCst);
        for dep in changed {
            shared.work.add_estimated(100.0, dep.layer());

            // a broken generator must not take the scheduler down with it
            let result = panic::catch_unwind(AssertUnwindSafe(|| process_dependency(shared, &dep)));
            if let Err(payload) = result {
                error!("layer update thread: {}", panic_message(&payload));
            }

            shared.work.work_is_known(dep.layer());

            if !dep.is_active() {
                shared.top_dependencies.lock().retain(|d| !Arc::ptr_eq(d, &dep));
            }
        }
        log_pool_stats(shared);
    }
    shared.generating.store(false, Ordering::SeqCst);
}

fn process_dependency(shared: &Shared, dep: &Arc<TopDependency>) {
    let Some(layer) = shared.registry.get(dep.layer()) else {
        // add_top_dependency validated this; consume the change anyway so a
        // broken dependency cannot spin the loop
        error!("top dependency targets unregistered layer {}", dep.layer());
        dep.set_active(false);
        return;
    };
    let cx = GenContext {
        registry: &shared.registry,
        work: &shared.work,
        actions: &shared.actions,
        abort: &shared.abort,
        parallel: shared.parallel,
    };
    layer.process_top_dependency(&cx, dep);
}

fn log_pool_stats(shared: &Shared) {
    for layer in shared.registry.iter() {
        let stats = layer.pool_stats();
        trace!(
            "pool {}: chunks {} active / {} total, records {} active / {} total",
            layer.id(),
            stats.chunks.active,
            stats.chunks.total,
            stats.records.active,
            stats.records.total,
        );
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message
    } else {
        "unknown panic payload"
    }
}
