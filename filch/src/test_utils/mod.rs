#![allow(unused)]

use crate::config::{Builder, QueueFactory};
use crate::error::TaskError;
use crate::queue::{QueueCounters, QueueInitParams, TaskQueue, ThreadQueue};
use crate::stealing::Scheduler;
use crate::task::{Task, TaskId, TaskInit, TaskState};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// Build a scheduler and start every worker, the state all protocol-level
/// tests assume.
pub(crate) fn started_scheduler(num_workers: usize) -> Scheduler {
    started_scheduler_with(Builder::new().num_workers(num_workers))
}

pub(crate) fn started_scheduler_with(builder: Builder) -> Scheduler {
    let scheduler = builder.try_build().expect("failed to build scheduler");
    for worker in 0..scheduler.num_workers() {
        scheduler.on_start(worker);
    }
    scheduler
}

pub(crate) fn noop() -> TaskInit {
    TaskInit::new(|| {})
}

/// Put `count` ready tasks on one worker's pending queue.
pub(crate) fn preload(scheduler: &Scheduler, worker: usize, count: usize) {
    for _ in 0..count {
        scheduler
            .create_task(noop().with_hint(worker), TaskState::Pending, true)
            .expect("create_task failed");
    }
}

#[derive(Debug, Default)]
pub(crate) struct SpyState {
    pub(crate) bulk_steals: AtomicUsize,
    pub(crate) last_limit: AtomicUsize,
}

/// Queue backend that records `bulk_steal` calls before delegating to the
/// default backend. Lets tests assert on the exact transfer limits the
/// protocol asked for.
pub(crate) struct SpyQueue {
    inner: ThreadQueue,
    state: Arc<SpyState>,
}

/// Returns a factory installing a [`SpyQueue`] per worker plus a shared map
/// through which tests reach each worker's spy state.
pub(crate) fn spy_factory() -> (QueueFactory, Arc<Mutex<HashMap<usize, Arc<SpyState>>>>) {
    let states: Arc<Mutex<HashMap<usize, Arc<SpyState>>>> = Arc::new(Mutex::new(HashMap::new()));

    let shared = states.clone();
    let factory = QueueFactory::new(move |worker, params| {
        let state = Arc::new(SpyState::default());
        shared.lock().insert(worker, state.clone());
        Box::new(SpyQueue {
            inner: ThreadQueue::new(params.clone()),
            state,
        })
    });

    (factory, states)
}

impl TaskQueue for SpyQueue {
    fn create_task(&self, task: Task, initial_state: TaskState, run_now: bool) -> TaskId {
        self.inner.create_task(task, initial_state, run_now)
    }

    fn push(&self, task: Task, at_front: bool) {
        self.inner.push(task, at_front)
    }

    fn pop(&self) -> Option<Task> {
        self.inner.pop()
    }

    fn bulk_steal(&self, limit: usize, steal_flag: bool) -> Vec<Task> {
        self.state.bulk_steals.fetch_add(1, Ordering::Relaxed);
        self.state.last_limit.store(limit, Ordering::Relaxed);
        self.inner.bulk_steal(limit, steal_flag)
    }

    fn pending_length(&self) -> usize {
        self.inner.pending_length()
    }

    fn queue_length(&self) -> usize {
        self.inner.queue_length()
    }

    fn task_count(&self, state: TaskState) -> usize {
        self.inner.task_count(state)
    }

    fn wait_or_add_new(&self, running: bool, added: &mut usize, enable_stealing: bool) -> bool {
        self.inner.wait_or_add_new(running, added, enable_stealing)
    }

    fn suspend(&self, task: Task) {
        self.inner.suspend(task)
    }

    fn abort_all_suspended(&self) {
        self.inner.abort_all_suspended()
    }

    fn terminate(&self, task: Task) {
        self.inner.terminate(task)
    }

    fn cleanup_terminated(&self, delete_all: bool) -> bool {
        self.inner.cleanup_terminated(delete_all)
    }

    fn enumerate_tasks(&self, state: TaskState, f: &mut dyn FnMut(TaskId) -> bool) -> bool {
        self.inner.enumerate_tasks(state, f)
    }

    fn average_task_wait_time(&self) -> Duration {
        self.inner.average_task_wait_time()
    }

    fn counters(&self) -> &QueueCounters {
        self.inner.counters()
    }

    fn on_start(&self, worker: usize) {
        self.inner.on_start(worker)
    }

    fn on_stop(&self, worker: usize) {
        self.inner.on_stop(worker)
    }

    fn on_error(&self, worker: usize, error: &TaskError) {
        self.inner.on_error(worker, error)
    }
}
