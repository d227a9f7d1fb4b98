//! Task definitions for the scheduler.
//!
//! A task is a boxed closure plus an id, a name and an atomic lifecycle state.
//! The scheduler owns tasks once they are submitted; the closure is dropped
//! when it returns or unwinds.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};

use parking_lot::Mutex;

/// Unique task identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(pub usize);

impl TaskId {
    /// Get the inner value.
    #[inline]
    pub fn inner(&self) -> usize {
        self.0
    }
}

impl From<usize> for TaskId {
    fn from(val: usize) -> Self {
        Self(val)
    }
}

impl From<TaskId> for usize {
    fn from(val: TaskId) -> Self {
        val.0
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        write!(f, "Task({})", self.0)
    }
}

/// Task lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum TaskState {
    /// Queued and waiting for a worker.
    Runnable = 0,
    /// Executing on a worker.
    Running = 1,
    /// Parked inside a channel operation.
    Blocked = 2,
    /// Returned normally.
    Completed = 3,
    /// Panicked.
    Failed = 4,
}

impl TaskState {
    /// Convert from u8 (for atomic storage).
    #[inline]
    pub fn from_u8(val: u8) -> Self {
        match val {
            1 => TaskState::Running,
            2 => TaskState::Blocked,
            3 => TaskState::Completed,
            4 => TaskState::Failed,
            _ => TaskState::Runnable,
        }
    }

    /// Convert to u8 (for atomic storage).
    #[inline]
    pub fn as_u8(&self) -> u8 {
        *self as u8
    }

    /// Whether the task has stopped for good.
    #[inline]
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskState::Completed | TaskState::Failed)
    }
}

type Work = Box<dyn FnOnce() -> Result<(), String> + Send>;

/// A task that can be scheduled for execution.
pub struct Task {
    /// Unique task ID.
    id: TaskId,
    /// Task name for logs.
    name: String,
    /// Current state (atomic for thread-safe access).
    state: AtomicU8,
    /// The work to execute; `Err` carries a panic message.
    work: Mutex<Option<Work>>,
}

impl std::fmt::Debug for Task {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("state", &self.state())
            .finish()
    }
}

impl Task {
    /// Create a task from work that reports its own panics.
    pub(crate) fn from_work<F>(
        id: TaskId,
        name: String,
        work: F,
    ) -> Self
    where
        F: FnOnce() -> Result<(), String> + Send + 'static,
    {
        Self {
            id,
            name,
            state: AtomicU8::new(TaskState::Runnable.as_u8()),
            work: Mutex::new(Some(Box::new(work))),
        }
    }

    /// Get the task ID.
    #[inline]
    pub fn id(&self) -> TaskId {
        self.id
    }

    /// Get the task name.
    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get the current state.
    #[inline]
    pub fn state(&self) -> TaskState {
        TaskState::from_u8(self.state.load(Ordering::SeqCst))
    }

    /// Set the task state.
    #[inline]
    pub fn set_state(
        &self,
        state: TaskState,
    ) {
        self.state.store(state.as_u8(), Ordering::SeqCst);
    }

    #[inline]
    pub fn is_runnable(&self) -> bool {
        self.state() == TaskState::Runnable
    }

    #[inline]
    pub fn is_finished(&self) -> bool {
        self.state().is_terminal()
    }

    /// Run the task to completion on the calling thread.
    ///
    /// Returns the panic message if the task panicked. Running a task twice
    /// does nothing the second time.
    pub fn run(&self) -> Result<(), String> {
        let Some(work) = self.work.lock().take() else {
            return Ok(());
        };
        self.set_state(TaskState::Running);
        let result = work();
        self.set_state(if result.is_ok() {
            TaskState::Completed
        } else {
            TaskState::Failed
        });
        result
    }
}

/// Run `f`, converting a panic into its message.
pub(crate) fn catch_panic<T>(f: impl FnOnce() -> T) -> Result<T, String> {
    panic::catch_unwind(AssertUnwindSafe(f)).map_err(|payload| panic_message(payload.as_ref()))
}

/// Extract a readable message from a panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Task builder for constructing tasks with various options.
#[derive(Debug, Default)]
pub struct TaskBuilder {
    name: Option<String>,
}

impl TaskBuilder {
    /// Create a new task builder.
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the task name.
    #[inline]
    pub fn name(
        mut self,
        name: impl Into<String>,
    ) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Build the task with the given ID and executor.
    ///
    /// A panic inside `executor` makes [`Task::run`] return its message.
    pub fn build<F>(
        self,
        id: TaskId,
        executor: F,
    ) -> Task
    where
        F: FnOnce() + Send + 'static,
    {
        let name = self.name.unwrap_or_else(|| id.to_string());
        Task::from_work(id, name, move || catch_panic(executor))
    }

    /// Take the configured name, falling back to the task id.
    pub(crate) fn take_name(
        &mut self,
        id: TaskId,
    ) -> String {
        self.name.take().unwrap_or_else(|| id.to_string())
    }
}

/// Generator of unique, increasing task IDs. Safe to share between threads.
#[derive(Debug)]
pub struct TaskIdGenerator {
    next_id: AtomicUsize,
}

impl TaskIdGenerator {
    /// Create a new task ID generator.
    #[inline]
    pub const fn new() -> Self {
        Self {
            next_id: AtomicUsize::new(0),
        }
    }

    /// Generate the next task ID.
    #[inline]
    #[allow(clippy::should_implement_trait)]
    pub fn next(&self) -> TaskId {
        TaskId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for TaskIdGenerator {
    fn default() -> Self {
        Self::new()
    }
}
