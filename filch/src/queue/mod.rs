//! The task-queue interface the steal protocol consumes.
//!
//! The scheduler core never assumes a concrete container: it talks to each
//! worker's queue through [`TaskQueue`], and backends are swappable at
//! construction time through the config's queue factory. [`ThreadQueue`] is
//! the default backend.

use crate::error::TaskError;
use crate::task::{Task, TaskId, TaskState};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

mod thread_queue;
pub use thread_queue::ThreadQueue;

/// Tuning knobs handed to a queue backend at construction.
#[derive(Debug, Clone)]
pub struct QueueInitParams {
    /// Upper bound on staged tasks promoted to pending per maintenance tick.
    pub max_add_new_count: usize,

    /// Upper bound on terminated tasks reclaimed per cleanup call (ignored
    /// when `delete_all` is passed).
    pub max_delete_count: usize,

    /// Stamp tasks on enqueue and aggregate dequeue latency.
    pub record_wait_times: bool,
}

impl Default for QueueInitParams {
    fn default() -> Self {
        Self {
            max_add_new_count: 64,
            max_delete_count: 64,
            record_wait_times: false,
        }
    }
}

/// Per-worker container of runnable tasks.
///
/// The owning worker performs `pop` and drives the maintenance hooks; any
/// worker may `push` (task routing) and the owner drains its own queue via
/// `bulk_steal` when answering a steal request. Implementations must make
/// all operations safe under that sharing.
pub trait TaskQueue: Send + Sync {
    /// Admit a freshly created task. `Pending` + `run_now` goes straight to
    /// the pending sub-queue; everything else lands in staged and waits for
    /// the next maintenance tick.
    fn create_task(&self, task: Task, initial_state: TaskState, run_now: bool) -> TaskId;

    /// Enqueue a runnable task. `at_front` makes it the next task popped.
    fn push(&self, task: Task, at_front: bool);

    /// Dequeue one task for local execution.
    fn pop(&self) -> Option<Task>;

    /// Remove up to `limit` tasks intended for transfer to another worker.
    /// With `steal_flag` set, only steal-eligible tasks are surrendered and
    /// the `stolen_from_pending` counter is bumped per task.
    fn bulk_steal(&self, limit: usize, steal_flag: bool) -> Vec<Task>;

    /// Number of tasks ready to run (excludes staged and terminated).
    fn pending_length(&self) -> usize;

    /// Pending plus staged work.
    fn queue_length(&self) -> usize;

    /// Tasks currently in `state`; `TaskState::Unknown` counts everything.
    fn task_count(&self, state: TaskState) -> usize;

    /// Staged-to-pending replenishment. Adds the number of promoted tasks to
    /// `added` and returns `true` when the staged sub-queue is drained, i.e.
    /// a caller that is shutting down may exit.
    fn wait_or_add_new(&self, running: bool, added: &mut usize, enable_stealing: bool) -> bool;

    /// Park a task that is blocked on something outside the scheduler.
    fn suspend(&self, task: Task);

    /// Abort every suspended task, moving it to the terminated sub-queue.
    fn abort_all_suspended(&self);

    /// Hand a finished task over for terminated accounting.
    fn terminate(&self, task: Task);

    /// Reclaim terminated tasks. Returns `true` when the terminated
    /// sub-queue is empty afterwards.
    fn cleanup_terminated(&self, delete_all: bool) -> bool;

    /// Visit the id of every task in `state` until `f` returns `false`.
    /// Returns `false` if the visitor stopped early.
    fn enumerate_tasks(&self, state: TaskState, f: &mut dyn FnMut(TaskId) -> bool) -> bool;

    /// Mean pending-queue residence time, zero unless wait-time recording is
    /// enabled.
    fn average_task_wait_time(&self) -> Duration;

    fn counters(&self) -> &QueueCounters;

    fn on_start(&self, worker: usize);
    fn on_stop(&self, worker: usize);
    fn on_error(&self, worker: usize, error: &TaskError);
}

/// Lifecycle counters every backend maintains. All increments are relaxed;
/// accessors are reset-on-read when asked.
#[derive(Debug, Default)]
pub struct QueueCounters {
    pending_misses: AtomicU64,
    pending_accesses: AtomicU64,
    stolen_from_pending: AtomicU64,
    stolen_to_pending: AtomicU64,
    stolen_from_staged: AtomicU64,
    stolen_to_staged: AtomicU64,
}

fn read(counter: &AtomicU64, reset: bool) -> u64 {
    if reset {
        counter.swap(0, Ordering::Relaxed)
    } else {
        counter.load(Ordering::Relaxed)
    }
}

impl QueueCounters {
    pub fn increment_pending_misses(&self) {
        self.pending_misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_pending_accesses(&self) {
        self.pending_accesses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_stolen_from_pending(&self, n: u64) {
        self.stolen_from_pending.fetch_add(n, Ordering::Relaxed);
    }

    pub fn increment_stolen_to_pending(&self, n: u64) {
        self.stolen_to_pending.fetch_add(n, Ordering::Relaxed);
    }

    pub fn increment_stolen_from_staged(&self, n: u64) {
        self.stolen_from_staged.fetch_add(n, Ordering::Relaxed);
    }

    pub fn increment_stolen_to_staged(&self, n: u64) {
        self.stolen_to_staged.fetch_add(n, Ordering::Relaxed);
    }

    pub fn pending_misses(&self, reset: bool) -> u64 {
        read(&self.pending_misses, reset)
    }

    pub fn pending_accesses(&self, reset: bool) -> u64 {
        read(&self.pending_accesses, reset)
    }

    pub fn stolen_from_pending(&self, reset: bool) -> u64 {
        read(&self.stolen_from_pending, reset)
    }

    pub fn stolen_to_pending(&self, reset: bool) -> u64 {
        read(&self.stolen_to_pending, reset)
    }

    pub fn stolen_from_staged(&self, reset: bool) -> u64 {
        read(&self.stolen_from_staged, reset)
    }

    pub fn stolen_to_staged(&self, reset: bool) -> u64 {
        read(&self.stolen_to_staged, reset)
    }
}
