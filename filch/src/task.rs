use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Globally unique task identifier, assigned at creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(u64);

impl TaskId {
    pub(crate) fn next() -> Self {
        static NEXT_ID: AtomicU64 = AtomicU64::new(1);
        TaskId(NEXT_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle states a task moves through inside a queue.
///
/// `Unknown` doubles as the wildcard selector in telemetry queries: counting
/// tasks in state `Unknown` counts every task the queue holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Unknown,
    Pending,
    Staged,
    Suspended,
    Terminated,
}

/// Coarse priority buckets.
///
/// The scheduler routes and counts tasks without ordering them by priority;
/// the buckets exist so the embedding runtime can tag work and query counts.
/// `Unknown` is a hard error when used as a telemetry selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Priority {
    #[default]
    Default,
    Low,
    Normal,
    High,
    Unknown,
}

type TaskFn = Box<dyn FnOnce() + Send + 'static>;

/// A user-level unit of execution.
///
/// Opaque to the steal protocol: requests and batches move `Task` values
/// without looking inside. The only field the protocol reads is
/// `stealable` — a task tied to a specific OS thread is never surrendered
/// by `bulk_steal`.
pub struct Task {
    id: TaskId,
    priority: Priority,
    stealable: bool,
    payload: Option<TaskFn>,

    /// Stamped on enqueue when wait-time aggregation is enabled.
    pub(crate) enqueued_at: Option<Instant>,
}

impl Task {
    pub(crate) fn new(priority: Priority, stealable: bool, payload: TaskFn) -> Self {
        Self {
            id: TaskId::next(),
            priority,
            stealable,
            payload: Some(payload),
            enqueued_at: None,
        }
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn priority(&self) -> Priority {
        self.priority
    }

    pub fn is_stealable(&self) -> bool {
        self.stealable
    }

    /// Execute the task's payload. Running a task consumes it; the embedding
    /// runtime hands the spent task back via `TaskQueue::terminate` so the
    /// terminated sub-queue can account for it.
    pub fn run(&mut self) {
        if let Some(payload) = self.payload.take() {
            payload();
        }
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.id)
            .field("priority", &self.priority)
            .field("stealable", &self.stealable)
            .finish_non_exhaustive()
    }
}

/// Everything needed to create a task through the facade.
pub struct TaskInit {
    pub(crate) hint: Option<usize>,
    pub(crate) priority: Priority,
    pub(crate) stealable: bool,
    pub(crate) payload: Option<TaskFn>,
}

impl TaskInit {
    pub fn new(payload: impl FnOnce() + Send + 'static) -> Self {
        Self {
            hint: None,
            priority: Priority::Default,
            stealable: true,
            payload: Some(Box::new(payload)),
        }
    }

    /// Pin the task to a specific worker (taken modulo the worker count).
    pub fn with_hint(mut self, worker: usize) -> Self {
        self.hint = Some(worker);
        self
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// A non-stealable task stays on the worker it was routed to.
    pub fn pinned(mut self) -> Self {
        self.stealable = false;
        self
    }

    pub(crate) fn into_task(mut self) -> Task {
        let payload = self.payload.take().unwrap_or_else(|| Box::new(|| {}));
        Task::new(self.priority, self.stealable, payload)
    }
}

impl fmt::Debug for TaskInit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskInit")
            .field("hint", &self.hint)
            .field("priority", &self.priority)
            .field("stealable", &self.stealable)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use static_assertions::assert_impl_all;
    use std::sync::Arc;
    use std::sync::atomic::AtomicBool;

    assert_impl_all!(Task: Send);
    assert_impl_all!(TaskId: Send, Sync, Copy);

    #[test]
    fn ids_are_unique_and_increasing() {
        let a = TaskId::next();
        let b = TaskId::next();
        assert!(b > a);
    }

    #[test]
    fn run_consumes_payload_once() {
        let ran = Arc::new(AtomicBool::new(false));
        let flag = ran.clone();

        let mut task = TaskInit::new(move || flag.store(true, Ordering::Relaxed)).into_task();
        task.run();
        assert!(ran.load(Ordering::Relaxed));

        // Second run is a no-op.
        task.run();
    }

    #[test]
    fn init_carries_routing_metadata() {
        let init = TaskInit::new(|| {}).with_hint(7).with_priority(Priority::High).pinned();
        assert_eq!(init.hint, Some(7));
        assert_eq!(init.priority, Priority::High);

        let task = init.into_task();
        assert!(!task.is_stealable());
        assert_eq!(task.priority(), Priority::High);
    }
}
