use crate::affinity::AffinityData;
use crate::queue::{QueueInitParams, TaskQueue, ThreadQueue};
use crate::stealing::{SCHEDULER_NAME, Scheduler};
use anyhow::{Result, anyhow};
use bitflags::bitflags;
use std::fmt;
use std::sync::Arc;
use std::thread;

/// Default cap on tasks transferred per satisfied steal request.
const MAX_STOLEN_TASKS: usize = 32;

bitflags! {
    /// Feature toggles. The protocol itself is always on; these gate the
    /// optional heuristics and telemetry around it.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct SchedulerFlags: u32 {
        /// Aggregate per-worker stealing counters through the facade.
        const STEALING_COUNTS = 1;

        /// Remember the worker a batch last arrived from and try it first.
        const LAST_VICTIM_HINT = 1 << 1;

        /// Emit a one-shot diagnostic when every queue reports only
        /// suspended work for a sustained stretch of idle iterations.
        const MINIMAL_DEADLOCK_DETECTION = 1 << 2;

        /// Stamp tasks on enqueue and aggregate dequeue latency.
        const QUEUE_WAIT_TIME = 1 << 3;
    }
}

impl Default for SchedulerFlags {
    fn default() -> Self {
        SchedulerFlags::STEALING_COUNTS | SchedulerFlags::LAST_VICTIM_HINT
    }
}

/// Constructor for a worker's queue backend, invoked once per worker at
/// `on_start` (or eagerly when deferred initialization is off).
#[derive(Clone)]
pub struct QueueFactory(Arc<dyn Fn(usize, &QueueInitParams) -> Box<dyn TaskQueue> + Send + Sync>);

impl QueueFactory {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(usize, &QueueInitParams) -> Box<dyn TaskQueue> + Send + Sync + 'static,
    {
        Self(Arc::new(f))
    }

    pub(crate) fn build(&self, worker: usize, params: &QueueInitParams) -> Box<dyn TaskQueue> {
        (self.0)(worker, params)
    }
}

impl Default for QueueFactory {
    fn default() -> Self {
        Self::new(|_worker, params| Box::new(ThreadQueue::new(params.clone())))
    }
}

impl fmt::Debug for QueueFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("QueueFactory").field(&"<function>").finish()
    }
}

/// Builder for a [`Scheduler`].
#[derive(Debug)]
pub struct Builder {
    /// Number of workers. Defaults to one per available core.
    num_workers: Option<usize>,

    description: String,

    queue_init: QueueInitParams,

    affinity: Option<AffinityData>,

    /// Initialize worker records lazily at `on_start` instead of at
    /// construction. Useful when fewer workers will actually run than the
    /// scheduler is sized for.
    deferred_init: bool,

    flags: SchedulerFlags,

    max_stolen_tasks: usize,

    queue_factory: QueueFactory,
}

impl Builder {
    pub fn new() -> Self {
        Self {
            num_workers: None,
            description: SCHEDULER_NAME.to_owned(),
            queue_init: QueueInitParams::default(),
            affinity: None,
            deferred_init: true,
            flags: SchedulerFlags::default(),
            max_stolen_tasks: MAX_STOLEN_TASKS,
            queue_factory: QueueFactory::default(),
        }
    }

    #[track_caller]
    pub fn num_workers(mut self, val: usize) -> Self {
        assert!(val > 0, "num_workers cannot be set to 0");
        self.num_workers = Some(val);
        self
    }

    pub fn description(mut self, val: impl Into<String>) -> Self {
        self.description = val.into();
        self
    }

    pub fn queue_init(mut self, val: QueueInitParams) -> Self {
        self.queue_init = val;
        self
    }

    pub fn affinity(mut self, val: AffinityData) -> Self {
        self.affinity = Some(val);
        self
    }

    pub fn deferred_init(mut self, val: bool) -> Self {
        self.deferred_init = val;
        self
    }

    pub fn flags(mut self, val: SchedulerFlags) -> Self {
        self.flags = val;
        self
    }

    /// Cap on tasks transferred per satisfied steal request (the protocol
    /// additionally never takes more than half of the victim's pending
    /// queue).
    #[track_caller]
    pub fn max_stolen_tasks(mut self, val: usize) -> Self {
        assert!(val > 0, "max_stolen_tasks cannot be set to 0");
        self.max_stolen_tasks = val;
        self
    }

    pub fn queue_factory(mut self, val: QueueFactory) -> Self {
        self.queue_factory = val;
        self
    }

    /// Creates the configured [`Scheduler`].
    pub fn try_build(self) -> Result<Scheduler> {
        let cfg: SchedulerConfig = self.try_into()?;
        Ok(Scheduler::new(cfg))
    }
}

impl Default for Builder {
    fn default() -> Self {
        Self::new()
    }
}

/// Validated scheduler configuration, consumed by [`Scheduler::new`].
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub num_workers: usize,
    pub description: String,
    pub queue_init: QueueInitParams,
    pub affinity: AffinityData,
    pub deferred_init: bool,
    pub flags: SchedulerFlags,
    pub max_stolen_tasks: usize,
    pub queue_factory: QueueFactory,
}

impl SchedulerConfig {
    fn validate(&self) -> Result<()> {
        if self.num_workers == 0 {
            return Err(anyhow!("num_workers must be greater than 0"));
        }

        if self.affinity.num_workers() != self.num_workers {
            return Err(anyhow!(
                "affinity data covers {} workers, scheduler has {}",
                self.affinity.num_workers(),
                self.num_workers
            ));
        }

        if self.affinity.num_active() == 0 {
            return Err(anyhow!("affinity data has no active PU"));
        }

        Ok(())
    }
}

impl TryFrom<Builder> for SchedulerConfig {
    type Error = anyhow::Error;

    fn try_from(builder: Builder) -> Result<Self> {
        let num_workers = match builder.num_workers {
            Some(n) => n,
            None => thread::available_parallelism()?.get(),
        };

        let mut queue_init = builder.queue_init;
        queue_init.record_wait_times = builder.flags.contains(SchedulerFlags::QUEUE_WAIT_TIME);

        let cfg = SchedulerConfig {
            num_workers,
            description: builder.description,
            queue_init,
            affinity: builder
                .affinity
                .unwrap_or_else(|| AffinityData::all_active(num_workers)),
            deferred_init: builder.deferred_init,
            flags: builder.flags,
            max_stolen_tasks: builder.max_stolen_tasks,
            queue_factory: builder.queue_factory,
        };

        cfg.validate()?;

        Ok(cfg)
    }
}
