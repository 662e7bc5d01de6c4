use std::any::Any;

/// Opaque payload of an error that escaped a user task. The scheduler never
/// inspects it; it is forwarded to the owning queue's `on_error` hook.
pub type TaskError = Box<dyn Any + Send + 'static>;

/// Contract violations surfaced to the embedding runtime.
///
/// Everything here denotes a precondition the caller broke, not a state the
/// scheduler can recover from on its behalf. Transient conditions (no viable
/// victim, empty queues) are handled inside the steal protocol and never
/// surface as errors.
#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum SchedulerError {
    /// The wildcard `Priority::Unknown` selector was passed to a telemetry
    /// query.
    #[error("unknown task priority value (Priority::Unknown)")]
    UnknownPriority,

    /// A worker index outside `[0, num_workers)` was passed to the facade.
    #[error("worker index {worker} out of range (num_workers = {num_workers})")]
    WorkerOutOfRange { worker: usize, num_workers: usize },

    /// A hinted schedule targeted a worker bound to an inactive PU and
    /// fallback was disallowed.
    #[error("worker {worker} is bound to an inactive PU and fallback is disallowed")]
    InactivePu { worker: usize },
}
