use crate::channel::{RequestChannel, ResponseChannel};
use crate::config::SchedulerConfig;
use crate::mask::WorkerMask;
use crate::queue::TaskQueue;
use std::sync::OnceLock;
use std::sync::atomic::{AtomicU8, AtomicU64, AtomicUsize, Ordering};

const NO_VICTIM: usize = usize::MAX;

/// Per-worker record slot, lazily filled at `on_start` when deferred
/// initialization is configured. Re-initialization is a no-op.
#[derive(Default)]
pub(crate) struct WorkerData {
    core: OnceLock<WorkerCore>,
}

impl WorkerData {
    pub(crate) fn init(&self, num_thread: usize, cfg: &SchedulerConfig) -> &WorkerCore {
        self.core
            .get_or_init(|| WorkerCore::new(num_thread, cfg))
    }

    #[track_caller]
    pub(crate) fn core(&self) -> &WorkerCore {
        self.core
            .get()
            .expect("worker not initialized: call on_start first")
    }

    pub(crate) fn get(&self) -> Option<&WorkerCore> {
        self.core.get()
    }
}

/// The state one worker owns.
///
/// Peers only ever touch the two channels (and, for `Failed`-request
/// retirement, the outstanding counter); everything else is mutated by the
/// owning worker alone, which is why relaxed atomics are all the
/// synchronization the scalars need.
pub(crate) struct WorkerCore {
    pub(crate) num_thread: usize,

    /// This worker's queue of runnable tasks.
    pub(crate) queue: Box<dyn TaskQueue>,

    /// Inbox for steal requests from any peer.
    pub(crate) requests: RequestChannel,

    /// Slot a peer fills to answer this worker's outstanding request.
    pub(crate) tasks: ResponseChannel,

    /// Initial victim mask: every request this worker issues starts from a
    /// copy of it, with the worker's own bit preset.
    pub(crate) victims: WorkerMask,

    /// Outstanding steal requests, always 0 or 1.
    requested: AtomicU8,

    /// Worker the last batch arrived from, `NO_VICTIM` when unset.
    last_victim: AtomicUsize,

    steal_requests_sent: AtomicU64,
    steal_requests_received: AtomicU64,
    steal_requests_discarded: AtomicU64,
}

impl WorkerCore {
    fn new(num_thread: usize, cfg: &SchedulerConfig) -> Self {
        let mut victims = WorkerMask::new(cfg.num_workers);
        victims.set(num_thread);

        Self {
            num_thread,
            queue: cfg.queue_factory.build(num_thread, &cfg.queue_init),
            requests: RequestChannel::new(cfg.num_workers),
            tasks: ResponseChannel::new(),
            victims,
            requested: AtomicU8::new(0),
            last_victim: AtomicUsize::new(NO_VICTIM),
            steal_requests_sent: AtomicU64::new(0),
            steal_requests_received: AtomicU64::new(0),
            steal_requests_discarded: AtomicU64::new(0),
        }
    }

    pub(crate) fn has_outstanding_request(&self) -> bool {
        self.requested.load(Ordering::Relaxed) != 0
    }

    #[track_caller]
    pub(crate) fn begin_request(&self) {
        let prev = self.requested.fetch_add(1, Ordering::Relaxed);
        debug_assert_eq!(prev, 0, "more than one outstanding steal request");
    }

    #[track_caller]
    pub(crate) fn end_request(&self) {
        let prev = self.requested.fetch_sub(1, Ordering::Relaxed);
        debug_assert_eq!(prev, 1, "retired a steal request that was not outstanding");
    }

    pub(crate) fn last_victim(&self) -> Option<usize> {
        match self.last_victim.load(Ordering::Relaxed) {
            NO_VICTIM => None,
            victim => Some(victim),
        }
    }

    #[track_caller]
    pub(crate) fn set_last_victim(&self, victim: usize) {
        debug_assert_ne!(victim, self.num_thread, "last victim cannot be self");
        self.last_victim.store(victim, Ordering::Relaxed);
    }

    pub(crate) fn count_sent(&self) {
        self.steal_requests_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn count_received(&self) {
        self.steal_requests_received.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn count_discarded(&self) {
        self.steal_requests_discarded.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn requests_sent(&self, reset: bool) -> u64 {
        read(&self.steal_requests_sent, reset)
    }

    pub(crate) fn requests_received(&self, reset: bool) -> u64 {
        read(&self.steal_requests_received, reset)
    }

    pub(crate) fn requests_discarded(&self, reset: bool) -> u64 {
        read(&self.steal_requests_discarded, reset)
    }
}

fn read(counter: &AtomicU64, reset: bool) -> u64 {
    if reset {
        counter.swap(0, Ordering::Relaxed)
    } else {
        counter.load(Ordering::Relaxed)
    }
}
