//! Work stealing for load balancing across worker threads.
//!
//! Every core worker owns a local queue. Tasks submitted from outside the pool
//! land in a shared global queue. An idle worker looks at its own queue, then
//! the global queue, then steals from a random peer.

use std::str::FromStr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use rand::Rng;
use serde::{Deserialize, Serialize};

use super::queue::TaskQueue;
use super::task::Task;

/// Statistics about work stealing operations.
#[derive(Debug, Default)]
pub struct StealStats {
    /// Number of successful steals.
    pub steal_successes: AtomicUsize,
    /// Number of failed steal attempts.
    pub steal_failures: AtomicUsize,
    /// Total number of steal attempts.
    pub total_attempts: AtomicUsize,
    /// Total tasks stolen.
    pub tasks_stolen: AtomicUsize,
}

impl StealStats {
    /// Record a successful steal.
    #[inline]
    pub fn record_success(
        &self,
        count: usize,
    ) {
        self.steal_successes.fetch_add(1, Ordering::Relaxed);
        self.tasks_stolen.fetch_add(count, Ordering::Relaxed);
        self.total_attempts.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a failed steal attempt.
    #[inline]
    pub fn record_failure(&self) {
        self.steal_failures.fetch_add(1, Ordering::Relaxed);
        self.total_attempts.fetch_add(1, Ordering::Relaxed);
    }

    /// Get success rate as a fraction in `0.0..=1.0`.
    pub fn success_rate(&self) -> f64 {
        let total = self.total_attempts.load(Ordering::Relaxed);
        if total == 0 {
            return 1.0;
        }
        let successes = self.steal_successes.load(Ordering::Relaxed);
        successes as f64 / total as f64
    }
}

/// Strategy for stealing tasks from other workers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StealStrategy {
    /// Steal from the back of victim's queue (reduces contention).
    #[default]
    Back,
    /// Steal from the front of victim's queue (FIFO).
    Front,
    /// Randomly choose between front and back.
    Random,
}

impl FromStr for StealStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "back" => Ok(StealStrategy::Back),
            "front" => Ok(StealStrategy::Front),
            "random" => Ok(StealStrategy::Random),
            other => Err(format!("unknown steal strategy `{other}`")),
        }
    }
}

/// Local queues, the global queue and the stealing policy between them.
#[derive(Debug)]
pub struct WorkStealer {
    /// One queue per core worker.
    queues: Vec<Arc<TaskQueue>>,
    /// Tasks submitted from outside the pool.
    global: TaskQueue,
    /// Stealing strategy.
    strategy: StealStrategy,
    /// Statistics.
    stats: StealStats,
}

impl WorkStealer {
    /// Create a new work stealer with the given number of workers.
    pub fn new(
        num_workers: usize,
        strategy: StealStrategy,
    ) -> Self {
        Self {
            queues: (0..num_workers).map(|_| Arc::new(TaskQueue::new())).collect(),
            global: TaskQueue::new(),
            strategy,
            stats: StealStats::default(),
        }
    }

    #[inline]
    fn num_workers(&self) -> usize {
        self.queues.len()
    }

    /// Queue a task on a worker's local queue, or globally for unknown workers.
    pub fn push_local(
        &self,
        worker_id: usize,
        task: Arc<Task>,
    ) {
        match self.queues.get(worker_id) {
            Some(queue) => queue.push(task),
            None => self.global.push(task),
        }
    }

    /// Queue a task on the global queue.
    #[inline]
    pub fn push_global(
        &self,
        task: Arc<Task>,
    ) {
        self.global.push(task);
    }

    /// Find the next task for `worker_id`; `None` stands for a helper thread
    /// that has no local queue.
    ///
    /// Order: local queue, global queue (moving up to `batch` tasks to the
    /// local queue), then stealing up to `batch` tasks from one peer.
    pub fn next_task(
        &self,
        worker_id: Option<usize>,
        batch: usize,
    ) -> Option<Arc<Task>> {
        let local = worker_id.and_then(|id| self.queues.get(id));

        if let Some(task) = local.and_then(|queue| queue.pop_front()) {
            return Some(task);
        }

        if let Some(task) = self.global.pop_front() {
            if let Some(queue) = local {
                let mut extra = Vec::new();
                self.global.drain_front(batch.saturating_sub(1), &mut extra);
                for task in extra {
                    queue.push(task);
                }
            }
            return Some(task);
        }

        self.steal(worker_id, batch)
    }

    /// Steal a batch of tasks from a random peer.
    pub fn steal(
        &self,
        thief: Option<usize>,
        batch: usize,
    ) -> Option<Arc<Task>> {
        let num_workers = self.num_workers();
        if num_workers == 0 {
            return None;
        }

        let mut rng = rand::rng();
        let start = rng.random_range(0..num_workers);
        for offset in 0..num_workers {
            let victim = (start + offset) % num_workers;
            if Some(victim) == thief {
                continue;
            }

            let Some(first) = self.steal_from(victim, &mut rng) else {
                continue;
            };

            let mut count = 1;
            if let Some(queue) = thief.and_then(|id| self.queues.get(id)) {
                while count < batch.max(1) {
                    match self.steal_from(victim, &mut rng) {
                        Some(task) => queue.push(task),
                        None => break,
                    }
                    count += 1;
                }
            }
            self.stats.record_success(count);
            return Some(first);
        }

        self.stats.record_failure();
        None
    }

    /// Steal from a specific victim's queue.
    fn steal_from(
        &self,
        victim_id: usize,
        rng: &mut impl Rng,
    ) -> Option<Arc<Task>> {
        let queue = self.queues.get(victim_id)?;
        match self.strategy {
            StealStrategy::Back => queue.pop_back(),
            StealStrategy::Front => queue.pop_front(),
            StealStrategy::Random => {
                if rng.random_bool(0.5) {
                    queue.pop_back()
                } else {
                    queue.pop_front()
                }
            }
        }
    }

    /// Total number of queued tasks across all queues.
    pub fn queued(&self) -> usize {
        self.global.len() + self.queues.iter().map(|queue| queue.len()).sum::<usize>()
    }

    /// Whether any queue holds a task.
    pub fn has_work(&self) -> bool {
        !self.global.is_empty() || self.queues.iter().any(|queue| !queue.is_empty())
    }

    /// Remove every queued task.
    pub fn drain(&self) -> Vec<Arc<Task>> {
        let mut tasks = self.global.clear();
        for queue in &self.queues {
            tasks.extend(queue.clear());
        }
        tasks
    }

    /// Get steal statistics.
    #[inline]
    pub fn stats(&self) -> &StealStats {
        &self.stats
    }
}
