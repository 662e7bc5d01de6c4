use crate::mask::WorkerMask;
use crate::task::Task;
use smallvec::SmallVec;

/// State a steal request is in while it circulates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RequestState {
    /// The origin still has tasks but anticipates starvation.
    Working,

    /// The origin is starved right now.
    Idle,

    /// Sentinel: whoever receives this retires it on the origin's behalf.
    Failed,
}

/// A request for work, hopping between workers until a peer answers it with
/// a batch or it circulates back home.
///
/// A plain value moved across channels — the channel transfer is the only
/// synchronization its fields need. The origin index doubles as the address
/// of the response slot the satisfying peer writes to.
#[derive(Debug)]
pub(crate) struct StealRequest {
    /// Worker that issued the request and will consume the response.
    pub(crate) origin: usize,

    /// Forward hops taken so far; forced home at `num_workers - 1`.
    pub(crate) attempt: u16,

    pub(crate) state: RequestState,

    /// Workers this request has already passed through; reset when the
    /// request is recycled at home.
    pub(crate) visited: WorkerMask,
}

impl StealRequest {
    pub(crate) fn new(origin: usize, visited: WorkerMask, idle: bool) -> Self {
        debug_assert!(visited.test(origin), "origin must pre-mark itself visited");
        Self {
            origin,
            attempt: 0,
            state: if idle {
                RequestState::Idle
            } else {
                RequestState::Working
            },
            visited,
        }
    }
}

/// A batch of stolen tasks on their way back to the requesting worker.
#[derive(Debug)]
pub(crate) struct TaskBatch {
    /// Worker the tasks came from; becomes the recipient's last-victim hint.
    pub(crate) victim: usize,

    /// Non-empty by construction: a peer only answers when it has at least
    /// one task to spare.
    pub(crate) tasks: SmallVec<[Task; 8]>,
}
