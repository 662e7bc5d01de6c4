use crate::error::SchedulerError;

/// Static worker-to-processing-unit assignment consumed by the scheduler.
///
/// The scheduler never interprets PU numbers; all it needs is which workers
/// are bound to active PUs when routing tasks. Discovery and OS-thread
/// binding are the embedding runtime's business.
#[derive(Debug, Clone)]
pub struct AffinityData {
    pu_nums: Vec<usize>,
    active: Vec<bool>,
}

impl AffinityData {
    pub fn new(pu_nums: Vec<usize>, active: Vec<bool>) -> Self {
        assert_eq!(
            pu_nums.len(),
            active.len(),
            "PU map and active mask must cover the same workers"
        );
        Self { pu_nums, active }
    }

    /// Identity mapping with every PU active.
    pub fn all_active(num_workers: usize) -> Self {
        Self {
            pu_nums: (0..num_workers).collect(),
            active: vec![true; num_workers],
        }
    }

    pub fn num_workers(&self) -> usize {
        self.pu_nums.len()
    }

    pub fn pu_num(&self, worker: usize) -> usize {
        self.pu_nums[worker]
    }

    pub fn is_active(&self, worker: usize) -> bool {
        self.active[worker]
    }

    pub fn num_active(&self) -> usize {
        self.active.iter().filter(|&&a| a).count()
    }

    /// Remap `worker` to one bound to an active PU. Returns `worker`
    /// unchanged when it is active; otherwise scans forward (wrapping) for
    /// the nearest active worker, or errors when fallback is disallowed.
    pub(crate) fn select_active_pu(
        &self,
        worker: usize,
        allow_fallback: bool,
    ) -> Result<usize, SchedulerError> {
        if self.active[worker] {
            return Ok(worker);
        }
        if !allow_fallback {
            return Err(SchedulerError::InactivePu { worker });
        }

        let n = self.active.len();
        (1..n)
            .map(|offset| (worker + offset) % n)
            .find(|&candidate| self.active[candidate])
            .ok_or(SchedulerError::InactivePu { worker })
    }
}
