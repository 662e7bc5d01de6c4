use crate::config::{SchedulerConfig, SchedulerFlags};
use crate::error::{SchedulerError, TaskError};
use crate::stealing::SCHEDULER_NAME;
use crate::stealing::data::{WorkerCore, WorkerData};
use crate::stealing::request::{RequestState, StealRequest, TaskBatch};
use crate::stealing::victim::next_victim;
use crate::task::{Priority, Task, TaskId, TaskInit, TaskState};
use crate::utils::CachePadded;
#[allow(unused)]
use crate::utils::tracker::{Call, Method, Tracker};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use tracing::{error, trace};

/// Idle iterations before the deadlock diagnostic may fire.
const DEADLOCK_IDLE_THRESHOLD: i64 = 1000;

/// The work-stealing scheduler facade.
///
/// One record per worker; the facade multiplexes every operation onto them.
/// The scheduler is passive: the embedding runtime owns the OS threads and
/// calls [`next_task`](Self::next_task) /
/// [`wait_or_add_new`](Self::wait_or_add_new) from each worker's loop,
/// passing that worker's own index. Worker records must be initialized —
/// either eagerly (`deferred_init(false)`) or via
/// [`on_start`](Self::on_start) — before any task is routed to them, and
/// every worker must be started before steal traffic begins.
pub struct Scheduler {
    pub(crate) cfg: SchedulerConfig,

    data: Vec<CachePadded<WorkerData>>,

    /// Round-robin cursor for unhinted task placement.
    curr_queue: AtomicUsize,

    /// The deadlock diagnostic is one-shot.
    deadlock_warned: AtomicBool,

    #[cfg(test)]
    pub(crate) tracker: Tracker,
}

impl Scheduler {
    pub(crate) fn new(cfg: SchedulerConfig) -> Self {
        let data: Vec<CachePadded<WorkerData>> = (0..cfg.num_workers)
            .map(|_| CachePadded::new(WorkerData::default()))
            .collect();

        let scheduler = Self {
            data,
            curr_queue: AtomicUsize::new(0),
            deadlock_warned: AtomicBool::new(false),
            cfg,

            #[cfg(test)]
            tracker: Tracker::new(),
        };

        if !scheduler.cfg.deferred_init {
            for num_thread in 0..scheduler.data.len() {
                scheduler.data[num_thread].init(num_thread, &scheduler.cfg);
            }
        }

        scheduler
    }

    pub fn name(&self) -> &'static str {
        SCHEDULER_NAME
    }

    pub fn description(&self) -> &str {
        &self.cfg.description
    }

    pub fn num_workers(&self) -> usize {
        self.data.len()
    }

    #[track_caller]
    pub(crate) fn core(&self, num_thread: usize) -> &WorkerCore {
        self.data[num_thread].core()
    }

    fn use_last_victim(&self) -> bool {
        self.cfg.flags.contains(SchedulerFlags::LAST_VICTIM_HINT)
    }

    // Introspection on facade calls during tests. No-op in release builds.
    #[allow(unused)]
    #[inline(always)]
    fn track(&self, method: Method, call: Call) {
        #[cfg(test)]
        self.tracker.record(method, call);
    }
}

// ---------------------------------------------------------------------------
// Task routing
// ---------------------------------------------------------------------------

impl Scheduler {
    /// Create a task and admit it to a worker's queue: the hinted worker
    /// (modulo the worker count) when the init carries a hint, otherwise the
    /// next worker in round-robin order.
    pub fn create_task(
        &self,
        init: TaskInit,
        initial_state: TaskState,
        run_now: bool,
    ) -> Result<TaskId, SchedulerError> {
        let num_thread = self.route(init.hint)?;

        let task = init.into_task();
        let id = self
            .core(num_thread)
            .queue
            .create_task(task, initial_state, run_now);

        self.track(Method::CreateTask, Call::CreateTask { id, worker: num_thread });
        Ok(id)
    }

    /// Enqueue an already-created task at the tail of the routed worker's
    /// pending queue.
    pub fn schedule_task(
        &self,
        task: Task,
        hint: Option<usize>,
        allow_fallback: bool,
        priority: Priority,
    ) -> Result<(), SchedulerError> {
        let num_thread = self.route_hinted(hint, allow_fallback)?;

        self.track(
            Method::ScheduleTask,
            Call::ScheduleTask { worker: num_thread, priority, last: false },
        );

        self.core(num_thread).queue.push(task, false);
        Ok(())
    }

    /// Like [`schedule_task`](Self::schedule_task), but the task is
    /// guaranteed to run after everything currently enqueued. Workers pop
    /// from the front, so the tail slot already is the last to run.
    pub fn schedule_task_last(
        &self,
        task: Task,
        hint: Option<usize>,
        allow_fallback: bool,
        priority: Priority,
    ) -> Result<(), SchedulerError> {
        let num_thread = self.route_hinted(hint, allow_fallback)?;
        debug_assert!(num_thread < self.data.len());

        self.track(
            Method::ScheduleTaskLast,
            Call::ScheduleTask { worker: num_thread, priority, last: true },
        );

        self.core(num_thread).queue.push(task, false);
        Ok(())
    }

    /// Restart round-robin placement from worker 0.
    pub fn reset_task_distribution(&self) {
        self.curr_queue.store(0, Ordering::Relaxed);
    }

    fn route(&self, hint: Option<usize>) -> Result<usize, SchedulerError> {
        // Task creation must land somewhere, so fallback is always allowed.
        self.route_hinted(hint, true)
    }

    fn route_hinted(
        &self,
        hint: Option<usize>,
        allow_fallback: bool,
    ) -> Result<usize, SchedulerError> {
        let num_workers = self.data.len();

        // The no-fallback option only exists for hinted schedules; an
        // unhinted task has nowhere specific to be, so it may go anywhere.
        let (num_thread, allow_fallback) = match hint {
            Some(hint) => (hint % num_workers, allow_fallback),
            None => (
                self.curr_queue.fetch_add(1, Ordering::Relaxed) % num_workers,
                true,
            ),
        };

        self.cfg.affinity.select_active_pu(num_thread, allow_fallback)
    }
}

// ---------------------------------------------------------------------------
// Worker loop entry points
// ---------------------------------------------------------------------------

impl Scheduler {
    /// Pop the next task for worker `num_thread` to execute.
    ///
    /// On a hit with stealing enabled, inbound steal requests are serviced
    /// opportunistically first — there is spare work to hand out — until the
    /// inbox drains or a request cannot be satisfied (that one is declined
    /// or forwarded and servicing stops).
    pub fn next_task(
        &self,
        num_thread: usize,
        _running: bool,
        enable_stealing: bool,
    ) -> Option<Task> {
        assert!(num_thread < self.data.len(), "worker index out of range");

        let d = self.core(num_thread);
        let result = d.queue.pop();
        d.queue.counters().increment_pending_accesses();

        self.track(
            Method::NextTask,
            Call::NextTask { worker: num_thread, found: result.is_some() },
        );

        match result {
            Some(task) => {
                if enable_stealing {
                    while let Some(req) = self.try_receiving_steal_request(d) {
                        if !self.handle_steal_request(d, req) {
                            break;
                        }
                    }
                }
                Some(task)
            }
            None => {
                d.queue.counters().increment_pending_misses();
                None
            }
        }
    }

    /// The idle/maintenance tick, called by a worker that found no local
    /// work. Returns `true` when the caller has nothing left to pick up —
    /// the embedding runtime combines that with its own shutdown state to
    /// decide whether the OS thread exits (a `false` `running` makes the
    /// answer unconditionally `true`).
    ///
    /// Order: promote staged work; bail out on shutdown; skip the steal path
    /// when it is disabled or pointless (single worker); otherwise solicit
    /// work from a peer, collect any response, and keep the request network
    /// flowing by declining or forwarding everything in the inbox.
    pub fn wait_or_add_new(
        &self,
        num_thread: usize,
        running: bool,
        idle_loop_count: i64,
        enable_stealing: bool,
        added: &mut usize,
        next_task_slot: Option<&mut Option<Task>>,
    ) -> bool {
        assert!(num_thread < self.data.len(), "worker index out of range");

        *added = 0;

        let d = self.core(num_thread);
        let result = d.queue.wait_or_add_new(running, added, enable_stealing);

        'steal: {
            // Work was available locally.
            if *added != 0 {
                break 'steal;
            }

            // We have been disabled.
            if !running {
                self.track(
                    Method::WaitOrAddNew,
                    Call::WaitOrAddNew { worker: num_thread, added: *added, terminate: true },
                );
                return true;
            }

            // No stealing requested, or nobody to steal from.
            if self.data.len() == 1 || !enable_stealing {
                break 'steal;
            }

            self.send_steal_request(d, true);
            debug_assert!(d.has_outstanding_request());

            // Collect a response if one already arrived; otherwise keep the
            // request network flowing while we wait.
            if !self.try_receiving_tasks(d, added, next_task_slot) {
                self.decline_or_forward_all_steal_requests(d);
            }
        }

        if self
            .cfg
            .flags
            .contains(SchedulerFlags::MINIMAL_DEADLOCK_DETECTION)
            && idle_loop_count > DEADLOCK_IDLE_THRESHOLD
        {
            self.maybe_report_deadlock(num_thread, running);
        }

        self.track(
            Method::WaitOrAddNew,
            Call::WaitOrAddNew { worker: num_thread, added: *added, terminate: result },
        );

        result
    }

    /// No runnable work anywhere and suspended tasks exist: something out of
    /// the scheduler's hands has to wake them. Worth telling the operator
    /// about, once.
    #[cold]
    fn maybe_report_deadlock(&self, num_thread: usize, running: bool) {
        let mut any_suspended = false;
        let suspended_only = self.data.iter().filter_map(|d| d.get()).all(|core| {
            any_suspended |= core.queue.task_count(TaskState::Suspended) > 0;
            core.queue.pending_length() == 0 && core.queue.task_count(TaskState::Staged) == 0
        });

        if running
            && suspended_only
            && any_suspended
            && !self.deadlock_warned.swap(true, Ordering::Relaxed)
        {
            error!(
                worker = num_thread,
                "no new work available, are we deadlocked?"
            );
        }
    }
}

// ---------------------------------------------------------------------------
// Steal protocol engine
// ---------------------------------------------------------------------------

impl Scheduler {
    /// Issue a steal request on behalf of `d`, unless one is already in
    /// flight. `idle` distinguishes reactive stealing (nothing to run) from
    /// anticipatory stealing (running low).
    pub(crate) fn send_steal_request(&self, d: &WorkerCore, idle: bool) {
        if d.has_outstanding_request() {
            return;
        }

        let req = StealRequest::new(d.num_thread, d.victims.clone(), idle);
        let victim = next_victim(d, &req, self.data.len(), self.use_last_victim());

        d.begin_request();
        trace!(
            origin = d.num_thread,
            victim,
            idle,
            "sending steal request"
        );
        self.core(victim).requests.send(req);
        d.count_sent();
    }

    /// Retrieve the next viable steal request from `d`'s inbox. `Failed`
    /// requests are retired on the spot, on their origin's behalf.
    pub(crate) fn try_receiving_steal_request(&self, d: &WorkerCore) -> Option<StealRequest> {
        while let Some(req) = d.requests.try_recv() {
            if req.state == RequestState::Failed {
                self.core(req.origin).end_request();
                continue;
            }
            return Some(req);
        }
        None
    }

    /// Handle a steal request by answering with tasks or passing it on.
    /// Returns `true` if the request was satisfied.
    pub(crate) fn handle_steal_request(&self, d: &WorkerCore, req: StealRequest) -> bool {
        d.count_received();

        if req.origin == d.num_thread {
            // Our own request came back; decline_or_forward decides whether
            // it dies here or circulates again.
            debug_assert!(req.state != RequestState::Failed);
            self.decline_or_forward_steal_request(d, req);
            return false;
        }

        // Surrender at most half of the available tasks, capped.
        let limit = (d.queue.pending_length() / 2).min(self.cfg.max_stolen_tasks);
        if limit != 0 {
            let tasks = d.queue.bulk_steal(limit, true);
            if !tasks.is_empty() {
                trace!(
                    victim = d.num_thread,
                    origin = req.origin,
                    count = tasks.len(),
                    "answering steal request with a task batch"
                );
                self.core(req.origin).tasks.send(TaskBatch {
                    victim: d.num_thread,
                    tasks: tasks.into(),
                });
                return true;
            }
        }

        // Nothing to spare: pass the request on to a different worker.
        self.decline_or_forward_steal_request(d, req);
        false
    }

    /// Pass a steal request on to another worker, or — when it is our own,
    /// back home — discard or recycle it. Returns `true` if the request was
    /// our own.
    pub(crate) fn decline_or_forward_steal_request(
        &self,
        d: &WorkerCore,
        mut req: StealRequest,
    ) -> bool {
        debug_assert!((req.attempt as usize) < self.data.len());

        if req.origin == d.num_thread {
            if d.queue.pending_length() > 0 || req.state == RequestState::Idle {
                // Either we have work again, or we already chased every peer
                // while idle; circulating further would only re-chase them.
                d.count_discarded();
                d.end_request();
            } else {
                // Still busy but running dry: recycle the request for an
                // idle round with a fresh mask.
                req.attempt = 0;
                req.state = RequestState::Idle;
                req.visited = d.victims.clone();

                let victim = next_victim(d, &req, self.data.len(), self.use_last_victim());
                self.core(victim).requests.send(req);
                d.count_sent();
            }
            return true;
        }

        // Don't ask a worker twice on the same round trip.
        req.attempt += 1;
        req.visited.set(d.num_thread);

        let victim = next_victim(d, &req, self.data.len(), self.use_last_victim());
        self.core(victim).requests.send(req);
        d.count_sent();
        false
    }

    /// Relay every pending steal request. Only called when `d` has nothing
    /// else to do, so requests will almost always be forwarded onward.
    pub(crate) fn decline_or_forward_all_steal_requests(&self, d: &WorkerCore) {
        while let Some(req) = self.try_receiving_steal_request(d) {
            d.count_received();
            self.decline_or_forward_steal_request(d, req);
        }
    }

    /// Collect the batch answering our outstanding request, if it arrived.
    ///
    /// All but the last task are enqueued (counted in `added`); the last one
    /// is deposited in `next_task_slot` to be run immediately, or enqueued
    /// like the rest when no slot was provided.
    pub(crate) fn try_receiving_tasks(
        &self,
        d: &WorkerCore,
        added: &mut usize,
        next_task_slot: Option<&mut Option<Task>>,
    ) -> bool {
        let Some(mut batch) = d.tasks.try_recv() else {
            return false;
        };

        d.end_request();

        let Some(last) = batch.tasks.pop() else {
            // A peer never sends an empty batch.
            debug_assert!(false, "received an empty task batch");
            return false;
        };

        trace!(
            origin = d.num_thread,
            victim = batch.victim,
            count = batch.tasks.len() + 1,
            "received stolen tasks"
        );

        for task in batch.tasks.drain(..) {
            d.queue.push(task, true);
            d.queue.counters().increment_stolen_to_pending(1);
            *added += 1;
        }

        if self.use_last_victim() {
            // Remember where the work came from for the next steal.
            d.set_last_victim(batch.victim);
        }

        match next_task_slot {
            Some(slot) => *slot = Some(last),
            None => d.queue.push(last, true),
        }
        d.queue.counters().increment_stolen_to_pending(1);

        true
    }
}

// ---------------------------------------------------------------------------
// Lifecycle
// ---------------------------------------------------------------------------

impl Scheduler {
    /// Initialize worker `num_thread`'s record (idempotent) and notify its
    /// queue. Must run on each worker before tasks are routed to it.
    pub fn on_start(&self, num_thread: usize) {
        assert!(num_thread < self.data.len(), "worker index out of range");

        let core = self.data[num_thread].init(num_thread, &self.cfg);
        core.queue.on_start(num_thread);
    }

    pub fn on_stop(&self, num_thread: usize) {
        self.core(num_thread).queue.on_stop(num_thread);
    }

    /// Forward an error that escaped a user task to the owning queue.
    pub fn on_error(&self, num_thread: usize, error: &TaskError) {
        self.core(num_thread).queue.on_error(num_thread, error);
    }

    pub fn abort_all_suspended(&self) {
        for core in self.data.iter().filter_map(|d| d.get()) {
            core.queue.abort_all_suspended();
        }
    }

    /// Reclaim terminated tasks on every queue. Returns `true` when all
    /// terminated sub-queues are empty afterwards.
    pub fn cleanup_terminated(&self, delete_all: bool) -> bool {
        self.data
            .iter()
            .filter_map(|d| d.get())
            .fold(true, |empty, core| {
                core.queue.cleanup_terminated(delete_all) && empty
            })
    }

    pub fn cleanup_terminated_on(&self, num_thread: usize, delete_all: bool) -> bool {
        self.core(num_thread).queue.cleanup_terminated(delete_all)
    }
}

// ---------------------------------------------------------------------------
// Telemetry
// ---------------------------------------------------------------------------

impl Scheduler {
    /// Current length (pending + staged) of one queue, or all of them.
    pub fn queue_length(&self, worker: Option<usize>) -> usize {
        match worker {
            Some(w) => self.data[w].get().map_or(0, |core| core.queue.queue_length()),
            None => self
                .data
                .iter()
                .filter_map(|d| d.get())
                .map(|core| core.queue.queue_length())
                .sum(),
        }
    }

    /// Count tasks in `state` on one worker or summed over all of them.
    /// Priorities are coarse buckets this scheduler does not order by; the
    /// selector is validated and `Priority::Unknown` is a hard error.
    pub fn task_count(
        &self,
        state: TaskState,
        priority: Priority,
        worker: Option<usize>,
    ) -> Result<usize, SchedulerError> {
        if priority == Priority::Unknown {
            return Err(SchedulerError::UnknownPriority);
        }

        if let Some(w) = worker {
            if w >= self.data.len() {
                return Err(SchedulerError::WorkerOutOfRange {
                    worker: w,
                    num_workers: self.data.len(),
                });
            }
            return Ok(self.data[w].get().map_or(0, |core| core.queue.task_count(state)));
        }

        Ok(self
            .data
            .iter()
            .filter_map(|d| d.get())
            .map(|core| core.queue.task_count(state))
            .sum())
    }

    /// Visit the id of every task in `state` across all queues until the
    /// visitor returns `false`.
    pub fn enumerate_tasks(
        &self,
        state: TaskState,
        mut f: impl FnMut(TaskId) -> bool,
    ) -> bool {
        self.data
            .iter()
            .filter_map(|d| d.get())
            .all(|core| core.queue.enumerate_tasks(state, &mut f))
    }

    /// Mean pending-queue residence time, averaged over the selected queues.
    /// Zero unless `QUEUE_WAIT_TIME` is enabled.
    pub fn average_task_wait_time(&self, worker: Option<usize>) -> Duration {
        if !self.cfg.flags.contains(SchedulerFlags::QUEUE_WAIT_TIME) {
            return Duration::ZERO;
        }

        match worker {
            Some(w) => self.data[w]
                .get()
                .map_or(Duration::ZERO, |core| core.queue.average_task_wait_time()),
            None => {
                let times: Vec<Duration> = self
                    .data
                    .iter()
                    .filter_map(|d| d.get())
                    .map(|core| core.queue.average_task_wait_time())
                    .collect();
                if times.is_empty() {
                    return Duration::ZERO;
                }
                times.iter().sum::<Duration>() / times.len() as u32
            }
        }
    }

    pub fn pending_misses(&self, worker: Option<usize>, reset: bool) -> u64 {
        self.sum_queue_counters(worker, |core| core.queue.counters().pending_misses(reset))
    }

    pub fn pending_accesses(&self, worker: Option<usize>, reset: bool) -> u64 {
        self.sum_queue_counters(worker, |core| core.queue.counters().pending_accesses(reset))
    }

    pub fn stolen_from_pending(&self, worker: Option<usize>, reset: bool) -> u64 {
        self.sum_queue_counters(worker, |core| {
            core.queue.counters().stolen_from_pending(reset)
        })
    }

    pub fn stolen_to_pending(&self, worker: Option<usize>, reset: bool) -> u64 {
        self.sum_queue_counters(worker, |core| core.queue.counters().stolen_to_pending(reset))
    }

    pub fn stolen_from_staged(&self, worker: Option<usize>, reset: bool) -> u64 {
        self.sum_queue_counters(worker, |core| {
            core.queue.counters().stolen_from_staged(reset)
        })
    }

    pub fn stolen_to_staged(&self, worker: Option<usize>, reset: bool) -> u64 {
        self.sum_queue_counters(worker, |core| core.queue.counters().stolen_to_staged(reset))
    }

    pub fn steal_requests_sent(&self, worker: Option<usize>, reset: bool) -> u64 {
        self.sum_queue_counters(worker, |core| core.requests_sent(reset))
    }

    pub fn steal_requests_received(&self, worker: Option<usize>, reset: bool) -> u64 {
        self.sum_queue_counters(worker, |core| core.requests_received(reset))
    }

    pub fn steal_requests_discarded(&self, worker: Option<usize>, reset: bool) -> u64 {
        self.sum_queue_counters(worker, |core| core.requests_discarded(reset))
    }

    fn sum_queue_counters(
        &self,
        worker: Option<usize>,
        f: impl Fn(&WorkerCore) -> u64,
    ) -> u64 {
        if !self.cfg.flags.contains(SchedulerFlags::STEALING_COUNTS) {
            return 0;
        }

        match worker {
            Some(w) => self.data[w].get().map_or(0, f),
            None => self.data.iter().filter_map(|d| d.get()).map(f).sum(),
        }
    }
}

#[cfg(test)]
impl Scheduler {
    pub(crate) fn deadlock_reported(&self) -> bool {
        self.deadlock_warned.load(Ordering::Relaxed)
    }
}
