//! Task scheduler for concurrent execution
//!
//! [`Scheduler`] runs closures on a pool of worker threads. Each core worker
//! owns a local queue; tasks spawned from outside the pool go to a global
//! queue, and idle workers steal from their peers.
//!
//! Tasks may block inside channel operations. When a task parks, its worker
//! reports the block through [`enter_blocking`]; if fewer than `num_workers`
//! threads are left to run other tasks, a helper worker is started so queued
//! tasks keep making progress. Helpers retire once they are surplus and idle.
//! The total number of threads never exceeds `max_threads`.
//!
//! The free functions [`spawn`], [`yield_now`] and [`current_task`] use a
//! process-wide scheduler that is created on first use from the environment
//! (see [`RuntimeConfig::from_env`](crate::util::config::RuntimeConfig::from_env)).

mod handle;
pub mod queue;
pub mod task;
pub mod work_stealer;

pub use handle::JoinHandle;
pub use handle::JoinError;
pub use queue::TaskQueue;
pub use task::{Task, TaskBuilder, TaskId, TaskIdGenerator, TaskState};
pub use work_stealer::{StealStats, StealStrategy, WorkStealer};

use std::cell::RefCell;
use std::io;
use std::mem;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use once_cell::sync::Lazy;
use parking_lot::{Condvar, Mutex, RwLock};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, error, trace, warn};

use self::handle::Completion;
use self::task::catch_panic;
use crate::util::config::RuntimeConfig;

/// Ids are unique across every scheduler in the process.
static TASK_IDS: TaskIdGenerator = TaskIdGenerator::new();

/// Scheduler configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Number of core worker threads.
    pub num_workers: usize,
    /// Upper bound on core plus helper threads.
    pub max_threads: usize,
    /// How long an idle worker sleeps before looking for work again, and how
    /// long a surplus helper stays idle before it retires.
    #[serde(rename = "idle_timeout_ms", with = "millis")]
    pub idle_timeout: Duration,
    /// Work stealing batch size.
    pub steal_batch: usize,
    /// Which end of a victim's queue to steal from.
    pub steal_strategy: StealStrategy,
    /// Worker threads are named `{prefix}-{index}`.
    pub thread_name_prefix: String,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        let num_cpus = thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(4);

        Self {
            num_workers: num_cpus,
            max_threads: 256,
            idle_timeout: Duration::from_millis(10),
            steal_batch: 4,
            steal_strategy: StealStrategy::Back,
            thread_name_prefix: "conduit-worker".to_string(),
        }
    }
}

impl SchedulerConfig {
    /// Check the invariants `Scheduler::with_config` relies on.
    pub fn validate(&self) -> Result<(), SchedulerError> {
        if self.num_workers == 0 {
            return Err(SchedulerError::InvalidConfig(
                "num_workers must be at least 1".to_string(),
            ));
        }
        if self.max_threads < self.num_workers {
            return Err(SchedulerError::InvalidConfig(format!(
                "max_threads ({}) is below num_workers ({})",
                self.max_threads, self.num_workers
            )));
        }
        if self.steal_batch == 0 {
            return Err(SchedulerError::InvalidConfig(
                "steal_batch must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        duration: &Duration,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

/// Errors raised while starting a scheduler.
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("invalid scheduler configuration: {0}")]
    InvalidConfig(String),
    #[error("failed to start worker thread: {0}")]
    Spawn(#[from] io::Error),
}

/// Scheduler statistics.
#[derive(Debug, Default)]
pub struct SchedulerStats {
    /// Total tasks accepted.
    pub tasks_scheduled: AtomicUsize,
    /// Tasks that returned normally.
    pub tasks_completed: AtomicUsize,
    /// Tasks that panicked.
    pub tasks_failed: AtomicUsize,
    /// Tasks dropped without running at shutdown.
    pub tasks_cancelled: AtomicUsize,
    /// Times a running task parked in a channel operation.
    pub blocking_events: AtomicUsize,
    /// Helper workers started to replace blocked ones.
    pub helpers_started: AtomicUsize,
    /// Peak number of live worker threads.
    pub peak_threads: AtomicUsize,
}

impl SchedulerStats {
    #[inline]
    pub fn record_scheduled(&self) {
        self.tasks_scheduled.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_completed(&self) {
        self.tasks_completed.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_failed(&self) {
        self.tasks_failed.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_cancelled(&self) {
        self.tasks_cancelled.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_blocking(&self) {
        self.blocking_events.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_helper(&self) {
        self.helpers_started.fetch_add(1, Ordering::Relaxed);
    }

    /// Raise the thread peak to `current` if it is higher.
    #[inline]
    pub fn update_peak_threads(
        &self,
        current: usize,
    ) {
        self.peak_threads.fetch_max(current, Ordering::Relaxed);
    }
}

/// State shared by the scheduler handle and every worker thread.
#[derive(Debug)]
struct Shared {
    config: SchedulerConfig,
    stealer: WorkStealer,
    running: AtomicBool,
    /// Held shared by `spawn` from its running check through the push, and
    /// exclusively by `shutdown` while it clears `running`.
    spawn_gate: RwLock<()>,
    stats: SchedulerStats,
    /// Live worker threads, core and helper.
    threads: AtomicUsize,
    /// Threads whose task is parked in a channel operation.
    blocked: AtomicUsize,
    next_helper: AtomicUsize,
    cap_warned: AtomicBool,
    helpers: Mutex<Vec<thread::JoinHandle<()>>>,
    /// Idle workers sleep here.
    sleep: Mutex<()>,
    wake: Condvar,
    /// Tasks accepted but not yet finished.
    outstanding: Mutex<usize>,
    idle: Condvar,
}

/// What a worker thread knows about itself.
struct WorkerContext {
    shared: Arc<Shared>,
    /// Local queue index; `None` for helpers.
    index: Option<usize>,
    task: Option<Arc<Task>>,
}

thread_local! {
    static CURRENT: RefCell<Option<WorkerContext>> = const { RefCell::new(None) };
}

/// Accounting for a task parked in a channel operation.
///
/// Created by [`enter_blocking`]; the block ends when the guard drops.
#[derive(Debug)]
pub struct BlockingGuard {
    shared: Arc<Shared>,
    task: Option<Arc<Task>>,
}

impl Drop for BlockingGuard {
    fn drop(&mut self) {
        self.shared.blocked.fetch_sub(1, Ordering::SeqCst);
        if let Some(task) = &self.task {
            task.set_state(TaskState::Running);
        }
    }
}

/// Report that the current thread is about to park.
///
/// Returns `None` outside worker threads. On a worker, marks the current task
/// as blocked and starts a helper worker if too few threads are left running.
pub fn enter_blocking() -> Option<BlockingGuard> {
    let (shared, task) = CURRENT
        .try_with(|current| {
            current
                .borrow()
                .as_ref()
                .map(|ctx| (ctx.shared.clone(), ctx.task.clone()))
        })
        .ok()
        .flatten()?;

    if let Some(task) = &task {
        task.set_state(TaskState::Blocked);
        trace!(task = %task.id(), "task blocked");
    }
    shared.blocked.fetch_add(1, Ordering::SeqCst);
    shared.stats.record_blocking();
    Shared::compensate(&shared);
    Some(BlockingGuard { shared, task })
}

/// The id of the task running on this thread, if any.
pub fn current_task() -> Option<TaskId> {
    CURRENT
        .try_with(|current| {
            current
                .borrow()
                .as_ref()
                .and_then(|ctx| ctx.task.as_ref().map(|task| task.id()))
        })
        .ok()
        .flatten()
}

/// Let other threads run before continuing.
#[inline]
pub fn yield_now() {
    thread::yield_now();
}

impl Shared {
    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    fn notify_one(&self) {
        let _guard = self.sleep.lock();
        self.wake.notify_one();
    }

    fn notify_all(&self) {
        let _guard = self.sleep.lock();
        self.wake.notify_all();
    }

    /// Count one accepted task as finished.
    fn finish_one(&self) {
        let mut outstanding = self.outstanding.lock();
        *outstanding = outstanding.saturating_sub(1);
        if *outstanding == 0 {
            self.idle.notify_all();
        }
    }

    /// Start a helper if fewer than `num_workers` threads can run tasks.
    fn compensate(shared: &Arc<Shared>) {
        if !shared.is_running() {
            return;
        }
        let num_workers = shared.config.num_workers;
        let max_threads = shared.config.max_threads;

        let mut threads = shared.threads.load(Ordering::SeqCst);
        loop {
            let blocked = shared.blocked.load(Ordering::SeqCst);
            if threads.saturating_sub(blocked) >= num_workers {
                return;
            }
            if threads >= max_threads {
                if !shared.cap_warned.swap(true, Ordering::Relaxed) {
                    warn!(
                        max_threads,
                        blocked, "thread cap reached; blocked tasks keep their workers"
                    );
                }
                return;
            }
            match shared.threads.compare_exchange(
                threads,
                threads + 1,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => break,
                Err(actual) => threads = actual,
            }
        }

        let helper = shared.next_helper.fetch_add(1, Ordering::Relaxed);
        let name = format!("{}-helper-{}", shared.config.thread_name_prefix, helper);
        let worker_shared = shared.clone();
        match thread::Builder::new()
            .name(name)
            .spawn(move || worker_loop(worker_shared, None))
        {
            Ok(join) => {
                shared.stats.record_helper();
                shared.stats.update_peak_threads(threads + 1);
                debug!(helper, threads = threads + 1, "helper worker started");
                let mut helpers = shared.helpers.lock();
                helpers.retain(|join| !join.is_finished());
                helpers.push(join);
            }
            Err(err) => {
                shared.threads.fetch_sub(1, Ordering::SeqCst);
                error!(%err, "failed to start helper worker");
            }
        }
    }

    /// Give up a helper thread's slot if the pool has more than it needs.
    fn try_retire(&self) -> bool {
        let mut threads = self.threads.load(Ordering::SeqCst);
        loop {
            let blocked = self.blocked.load(Ordering::SeqCst);
            if threads.saturating_sub(blocked) <= self.config.num_workers {
                return false;
            }
            match self.threads.compare_exchange(
                threads,
                threads - 1,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => {
                    self.cap_warned.store(false, Ordering::Relaxed);
                    return true;
                }
                Err(actual) => threads = actual,
            }
        }
    }
}

/// Worker thread main loop.
fn worker_loop(
    shared: Arc<Shared>,
    index: Option<usize>,
) {
    CURRENT.with(|current| {
        *current.borrow_mut() = Some(WorkerContext {
            shared: shared.clone(),
            index,
            task: None,
        });
    });
    debug!(worker = ?index, "worker started");

    let batch = shared.config.steal_batch;
    let mut retired = false;
    loop {
        // Read before looking for work: once it is false, every accepted task is queued.
        let stopping = !shared.is_running();

        // 1. Local queue, global queue, then stealing
        if let Some(task) = shared.stealer.next_task(index, batch) {
            run_task(&shared, task);
            continue;
        }

        // 2. Drain before exiting on shutdown
        if stopping {
            break;
        }

        // 3. No work available, wait
        let mut guard = shared.sleep.lock();
        if shared.stealer.has_work() || !shared.is_running() {
            continue;
        }
        let timed_out = shared
            .wake
            .wait_for(&mut guard, shared.config.idle_timeout)
            .timed_out();
        drop(guard);

        if index.is_none() && timed_out && shared.try_retire() {
            retired = true;
            break;
        }
    }

    if !retired {
        shared.threads.fetch_sub(1, Ordering::SeqCst);
    }
    debug!(worker = ?index, retired, "worker exited");
    CURRENT.with(|current| current.borrow_mut().take());
}

/// Execute a task on the current worker.
fn run_task(
    shared: &Shared,
    task: Arc<Task>,
) {
    CURRENT.with(|current| {
        if let Some(ctx) = current.borrow_mut().as_mut() {
            ctx.task = Some(task.clone());
        }
    });

    trace!(task = %task.id(), name = task.name(), "task started");
    let start = Instant::now();
    match task.run() {
        Ok(()) => {
            shared.stats.record_completed();
            trace!(task = %task.id(), elapsed_us = start.elapsed().as_micros() as u64, "task finished");
        }
        Err(message) => {
            shared.stats.record_failed();
            error!(task = %task.id(), name = task.name(), %message, "task panicked");
        }
    }

    CURRENT.with(|current| {
        if let Some(ctx) = current.borrow_mut().as_mut() {
            ctx.task = None;
        }
    });
    shared.finish_one();
}

/// A pool of worker threads that runs spawned tasks.
#[derive(Debug)]
pub struct Scheduler {
    shared: Arc<Shared>,
    workers: Mutex<Vec<thread::JoinHandle<()>>>,
}

impl Scheduler {
    /// Create a scheduler with the default configuration.
    #[inline]
    pub fn new() -> Result<Self, SchedulerError> {
        Self::with_config(SchedulerConfig::default())
    }

    /// Create a scheduler and start its core workers.
    pub fn with_config(config: SchedulerConfig) -> Result<Self, SchedulerError> {
        config.validate()?;
        let num_workers = config.num_workers;

        let shared = Arc::new(Shared {
            stealer: WorkStealer::new(num_workers, config.steal_strategy),
            running: AtomicBool::new(true),
            spawn_gate: RwLock::new(()),
            stats: SchedulerStats::default(),
            threads: AtomicUsize::new(0),
            blocked: AtomicUsize::new(0),
            next_helper: AtomicUsize::new(0),
            cap_warned: AtomicBool::new(false),
            helpers: Mutex::new(Vec::new()),
            sleep: Mutex::new(()),
            wake: Condvar::new(),
            outstanding: Mutex::new(0),
            idle: Condvar::new(),
            config,
        });

        let scheduler = Self {
            shared,
            workers: Mutex::new(Vec::with_capacity(num_workers)),
        };

        // Dropping `scheduler` on error joins the workers started so far.
        for worker_id in 0..num_workers {
            let shared = scheduler.shared.clone();
            shared.threads.fetch_add(1, Ordering::SeqCst);
            let spawned = thread::Builder::new()
                .name(format!("{}-{}", shared.config.thread_name_prefix, worker_id))
                .spawn({
                    let shared = shared.clone();
                    move || worker_loop(shared, Some(worker_id))
                });
            match spawned {
                Ok(join) => scheduler.workers.lock().push(join),
                Err(err) => {
                    shared.threads.fetch_sub(1, Ordering::SeqCst);
                    return Err(err.into());
                }
            }
        }
        scheduler.shared.stats.update_peak_threads(num_workers);

        debug!(
            workers = num_workers,
            max_threads = scheduler.shared.config.max_threads,
            "scheduler started"
        );
        Ok(scheduler)
    }

    /// Spawn a task and return a handle to its result.
    ///
    /// Captured values are moved into the task now. Returns immediately; the
    /// task runs on some worker later. After [`shutdown`](Scheduler::shutdown)
    /// the returned handle yields [`JoinError::Rejected`].
    pub fn spawn<F, T>(
        &self,
        work: F,
    ) -> JoinHandle<T>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        self.spawn_with(TaskBuilder::new(), work)
    }

    /// Spawn a task configured by `builder`.
    pub fn spawn_with<F, T>(
        &self,
        mut builder: TaskBuilder,
        work: F,
    ) -> JoinHandle<T>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let id = TASK_IDS.next();
        let _gate = self.shared.spawn_gate.read();
        if !self.is_running() {
            debug!(task = %id, "spawn after shutdown rejected");
            return JoinHandle::rejected(id);
        }

        let (handle, completion) = JoinHandle::new(id);
        let task = Arc::new(Task::from_work(id, builder.take_name(id), move || {
            run_to_completion(work, completion)
        }));

        *self.shared.outstanding.lock() += 1;
        self.shared.stats.record_scheduled();

        match self.local_index() {
            Some(worker_id) => self.shared.stealer.push_local(worker_id, task),
            None => self.shared.stealer.push_global(task),
        }
        self.shared.notify_one();
        handle
    }

    /// Local queue index of the calling thread, if it is a core worker of this scheduler.
    fn local_index(&self) -> Option<usize> {
        CURRENT
            .try_with(|current| {
                current.borrow().as_ref().and_then(|ctx| {
                    if Arc::ptr_eq(&ctx.shared, &self.shared) {
                        ctx.index
                    } else {
                        None
                    }
                })
            })
            .ok()
            .flatten()
    }

    /// Whether the calling thread is one of this scheduler's workers.
    fn on_worker(&self) -> bool {
        CURRENT
            .try_with(|current| {
                current
                    .borrow()
                    .as_ref()
                    .is_some_and(|ctx| Arc::ptr_eq(&ctx.shared, &self.shared))
            })
            .unwrap_or(false)
    }

    /// Block until no task is queued or running.
    ///
    /// Called from inside one of this scheduler's tasks, waits for every other task.
    pub fn wait_idle(&self) {
        let own = usize::from(self.on_worker() && current_task().is_some());
        let _blocking = enter_blocking();
        let mut outstanding = self.shared.outstanding.lock();
        while *outstanding > own {
            self.shared.idle.wait(&mut outstanding);
        }
    }

    /// Like [`wait_idle`](Scheduler::wait_idle), giving up after `timeout`.
    ///
    /// Returns `true` if the scheduler became idle in time.
    pub fn wait_idle_timeout(
        &self,
        timeout: Duration,
    ) -> bool {
        let own = usize::from(self.on_worker() && current_task().is_some());
        let deadline = Instant::now() + timeout;
        let _blocking = enter_blocking();
        let mut outstanding = self.shared.outstanding.lock();
        while *outstanding > own {
            if self
                .shared
                .idle
                .wait_until(&mut outstanding, deadline)
                .timed_out()
            {
                return *outstanding <= own;
            }
        }
        true
    }

    /// Stop accepting tasks, let workers drain the queues and join them.
    ///
    /// Idempotent. When called from one of this scheduler's own tasks the
    /// workers are signalled but not joined.
    pub fn shutdown(&self) {
        {
            let _gate = self.shared.spawn_gate.write();
            if !self.shared.running.swap(false, Ordering::SeqCst) {
                return;
            }
        }
        debug!(queued = self.shared.stealer.queued(), "scheduler shutting down");
        self.shared.notify_all();

        if self.on_worker() {
            debug!("shutdown requested from a worker; not joining");
            return;
        }

        let workers = mem::take(&mut *self.workers.lock());
        for worker in workers {
            if worker.join().is_err() {
                error!("worker thread panicked");
            }
        }
        loop {
            let helpers = mem::take(&mut *self.shared.helpers.lock());
            if helpers.is_empty() {
                break;
            }
            for helper in helpers {
                if helper.join().is_err() {
                    error!("helper thread panicked");
                }
            }
        }

        // Tasks queued after the workers left are dropped; their handles report `Cancelled`.
        let leftover = self.shared.stealer.drain();
        for task in leftover {
            drop(task);
            self.shared.stats.record_cancelled();
            self.shared.finish_one();
        }
        debug!("scheduler stopped");
    }

    /// Check if the scheduler is accepting tasks.
    #[inline]
    pub fn is_running(&self) -> bool {
        self.shared.is_running()
    }

    /// Get the number of core workers.
    #[inline]
    pub fn num_workers(&self) -> usize {
        self.shared.config.num_workers
    }

    #[inline]
    pub fn config(&self) -> &SchedulerConfig {
        &self.shared.config
    }

    /// Get statistics.
    #[inline]
    pub fn stats(&self) -> &SchedulerStats {
        &self.shared.stats
    }

    /// Get work stealing statistics.
    #[inline]
    pub fn steal_stats(&self) -> &StealStats {
        self.shared.stealer.stats()
    }

    /// Live worker threads, core and helper.
    pub fn live_threads(&self) -> usize {
        self.shared.threads.load(Ordering::SeqCst)
    }

    /// Tasks accepted but not yet finished.
    pub fn pending_tasks(&self) -> usize {
        *self.shared.outstanding.lock()
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Run a spawned closure and publish its outcome through `completion`.
fn run_to_completion<F, T>(
    work: F,
    completion: Completion<T>,
) -> Result<(), String>
where
    F: FnOnce() -> T,
{
    match catch_panic(work) {
        Ok(value) => {
            completion.complete(Ok(value));
            Ok(())
        }
        Err(message) => {
            completion.complete(Err(JoinError::Panicked(message.clone())));
            Err(message)
        }
    }
}

static GLOBAL: Lazy<Option<Scheduler>> = Lazy::new(|| {
    let config = RuntimeConfig::from_env().unwrap_or_else(|err| {
        warn!(%err, "ignoring invalid runtime configuration");
        RuntimeConfig::default()
    });
    match Scheduler::with_config(config.scheduler) {
        Ok(scheduler) => Some(scheduler),
        Err(err) => {
            error!(%err, "failed to start the global scheduler");
            None
        }
    }
});

/// The process-wide scheduler, if it could be started.
pub fn global() -> Option<&'static Scheduler> {
    GLOBAL.as_ref()
}

/// Spawn a task on the process-wide scheduler.
pub fn spawn<F, T>(work: F) -> JoinHandle<T>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    match global() {
        Some(scheduler) => scheduler.spawn(work),
        None => JoinHandle::rejected(TASK_IDS.next()),
    }
}

#[cfg(test)]
mod tests;
