use crate::error::TaskError;
use crate::queue::{QueueCounters, QueueInitParams, TaskQueue};
use crate::task::{Task, TaskId, TaskState};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

/// Default queue backend: a mutex-protected pending deque plus staged,
/// suspended, and terminated side containers.
///
/// The pending deque is double-ended on purpose: the owner pops from the
/// front, `at_front` pushes land there, and `bulk_steal` drains from the
/// back so transferred work is the oldest backlog.
pub struct ThreadQueue {
    params: QueueInitParams,

    pending: Mutex<VecDeque<Task>>,
    staged: Mutex<VecDeque<Task>>,
    suspended: Mutex<Vec<Task>>,
    terminated: Mutex<Vec<Task>>,

    // Relaxed mirrors of the container lengths so hot-path length reads
    // (e.g. `pending_length` inside the steal handler) skip the locks.
    pending_count: AtomicUsize,
    staged_count: AtomicUsize,
    suspended_count: AtomicUsize,
    terminated_count: AtomicUsize,

    counters: QueueCounters,
    errors: AtomicU64,

    wait_time_ns: AtomicU64,
    dequeue_count: AtomicU64,
}

impl ThreadQueue {
    pub fn new(params: QueueInitParams) -> Self {
        Self {
            params,
            pending: Mutex::new(VecDeque::new()),
            staged: Mutex::new(VecDeque::new()),
            suspended: Mutex::new(Vec::new()),
            terminated: Mutex::new(Vec::new()),
            pending_count: AtomicUsize::new(0),
            staged_count: AtomicUsize::new(0),
            suspended_count: AtomicUsize::new(0),
            terminated_count: AtomicUsize::new(0),
            counters: QueueCounters::default(),
            errors: AtomicU64::new(0),
            wait_time_ns: AtomicU64::new(0),
            dequeue_count: AtomicU64::new(0),
        }
    }

    /// Task-execution errors forwarded through `on_error` so far.
    pub fn error_count(&self) -> u64 {
        self.errors.load(Ordering::Relaxed)
    }

    fn stamp(&self, task: &mut Task) {
        if self.params.record_wait_times {
            task.enqueued_at = Some(Instant::now());
        }
    }

    fn record_wait(&self, task: &Task) {
        if let Some(enqueued_at) = task.enqueued_at {
            let waited = enqueued_at.elapsed();
            self.wait_time_ns
                .fetch_add(waited.as_nanos() as u64, Ordering::Relaxed);
            self.dequeue_count.fetch_add(1, Ordering::Relaxed);
        }
    }
}

impl TaskQueue for ThreadQueue {
    fn create_task(&self, mut task: Task, initial_state: TaskState, run_now: bool) -> TaskId {
        debug_assert!(
            matches!(initial_state, TaskState::Pending | TaskState::Staged),
            "tasks are created pending or staged, got {initial_state:?}"
        );

        let id = task.id();
        if initial_state == TaskState::Pending && run_now {
            self.push(task, false);
        } else {
            self.stamp(&mut task);
            self.staged.lock().push_back(task);
            self.staged_count.fetch_add(1, Ordering::Relaxed);
        }
        id
    }

    fn push(&self, mut task: Task, at_front: bool) {
        self.stamp(&mut task);

        let mut pending = self.pending.lock();
        if at_front {
            pending.push_front(task);
        } else {
            pending.push_back(task);
        }
        self.pending_count.fetch_add(1, Ordering::Relaxed);
    }

    fn pop(&self) -> Option<Task> {
        let task = self.pending.lock().pop_front()?;
        self.pending_count.fetch_sub(1, Ordering::Relaxed);
        self.record_wait(&task);
        Some(task)
    }

    fn bulk_steal(&self, limit: usize, steal_flag: bool) -> Vec<Task> {
        let mut out = Vec::with_capacity(limit);
        let mut kept = Vec::new();

        let mut pending = self.pending.lock();
        while out.len() < limit {
            match pending.pop_back() {
                None => break,
                Some(task) if steal_flag && !task.is_stealable() => kept.push(task),
                Some(task) => out.push(task),
            }
        }
        // Skipped tasks go back in their original order.
        while let Some(task) = kept.pop() {
            pending.push_back(task);
        }
        drop(pending);

        self.pending_count.fetch_sub(out.len(), Ordering::Relaxed);
        if steal_flag {
            self.counters.increment_stolen_from_pending(out.len() as u64);
        }
        out
    }

    fn pending_length(&self) -> usize {
        self.pending_count.load(Ordering::Relaxed)
    }

    fn queue_length(&self) -> usize {
        self.pending_length() + self.staged_count.load(Ordering::Relaxed)
    }

    fn task_count(&self, state: TaskState) -> usize {
        match state {
            TaskState::Pending => self.pending_count.load(Ordering::Relaxed),
            TaskState::Staged => self.staged_count.load(Ordering::Relaxed),
            TaskState::Suspended => self.suspended_count.load(Ordering::Relaxed),
            TaskState::Terminated => self.terminated_count.load(Ordering::Relaxed),
            TaskState::Unknown => {
                self.pending_count.load(Ordering::Relaxed)
                    + self.staged_count.load(Ordering::Relaxed)
                    + self.suspended_count.load(Ordering::Relaxed)
                    + self.terminated_count.load(Ordering::Relaxed)
            }
        }
    }

    fn wait_or_add_new(&self, _running: bool, added: &mut usize, _enable_stealing: bool) -> bool {
        let mut promoted = 0;
        {
            let mut staged = self.staged.lock();
            let mut pending = self.pending.lock();
            while promoted < self.params.max_add_new_count {
                match staged.pop_front() {
                    None => break,
                    Some(task) => {
                        pending.push_back(task);
                        promoted += 1;
                    }
                }
            }
        }

        if promoted > 0 {
            self.staged_count.fetch_sub(promoted, Ordering::Relaxed);
            self.pending_count.fetch_add(promoted, Ordering::Relaxed);
            *added += promoted;
        }

        self.staged_count.load(Ordering::Relaxed) == 0
    }

    fn suspend(&self, task: Task) {
        self.suspended.lock().push(task);
        self.suspended_count.fetch_add(1, Ordering::Relaxed);
    }

    fn abort_all_suspended(&self) {
        let aborted: Vec<Task> = self.suspended.lock().drain(..).collect();
        if aborted.is_empty() {
            return;
        }
        self.suspended_count.fetch_sub(aborted.len(), Ordering::Relaxed);

        let mut terminated = self.terminated.lock();
        self.terminated_count
            .fetch_add(aborted.len(), Ordering::Relaxed);
        terminated.extend(aborted);
    }

    fn terminate(&self, task: Task) {
        self.terminated.lock().push(task);
        self.terminated_count.fetch_add(1, Ordering::Relaxed);
    }

    fn cleanup_terminated(&self, delete_all: bool) -> bool {
        let mut terminated = self.terminated.lock();
        let reclaim = if delete_all {
            terminated.len()
        } else {
            terminated.len().min(self.params.max_delete_count)
        };

        terminated.drain(..reclaim);
        self.terminated_count.fetch_sub(reclaim, Ordering::Relaxed);
        terminated.is_empty()
    }

    fn enumerate_tasks(&self, state: TaskState, f: &mut dyn FnMut(TaskId) -> bool) -> bool {
        let visit = |tasks: &[TaskId], f: &mut dyn FnMut(TaskId) -> bool| -> bool {
            tasks.iter().all(|&id| f(id))
        };

        let ids_of = |state: TaskState| -> Vec<TaskId> {
            match state {
                TaskState::Pending => self.pending.lock().iter().map(Task::id).collect(),
                TaskState::Staged => self.staged.lock().iter().map(Task::id).collect(),
                TaskState::Suspended => self.suspended.lock().iter().map(Task::id).collect(),
                TaskState::Terminated => self.terminated.lock().iter().map(Task::id).collect(),
                TaskState::Unknown => unreachable!(),
            }
        };

        match state {
            TaskState::Unknown => [
                TaskState::Pending,
                TaskState::Staged,
                TaskState::Suspended,
                TaskState::Terminated,
            ]
            .into_iter()
            .all(|s| visit(&ids_of(s), f)),
            other => visit(&ids_of(other), f),
        }
    }

    fn average_task_wait_time(&self) -> Duration {
        let dequeues = self.dequeue_count.load(Ordering::Relaxed);
        if dequeues == 0 {
            return Duration::ZERO;
        }
        Duration::from_nanos(self.wait_time_ns.load(Ordering::Relaxed) / dequeues)
    }

    fn counters(&self) -> &QueueCounters {
        &self.counters
    }

    fn on_start(&self, _worker: usize) {}

    fn on_stop(&self, _worker: usize) {}

    fn on_error(&self, worker: usize, _error: &TaskError) {
        self.errors.fetch_add(1, Ordering::Relaxed);
        tracing::warn!(worker, "task error forwarded to queue");
    }
}
