//! A per-node work-stealing task scheduler with explicit steal-request
//! channels.
//!
//! Each worker owns a private queue of runnable tasks. Instead of probing
//! victim queues directly, an idle worker posts a steal request into a peer's
//! inbox; the peer either answers with a batch of tasks over the requester's
//! response channel, forwards the request to another peer, or sends it back
//! home. The scheduler itself is passive: the embedding runtime owns the OS
//! threads and drives each worker through [`Scheduler::next_task`] and
//! [`Scheduler::wait_or_add_new`].

pub mod affinity;
pub mod config;
pub mod error;
pub mod mask;
pub mod queue;
pub mod stealing;
pub mod task;

pub(crate) mod channel;
pub(crate) mod utils;

#[cfg(test)]
pub(crate) mod test_utils;

pub use affinity::AffinityData;
pub use config::{Builder, QueueFactory, SchedulerConfig, SchedulerFlags};
pub use error::{SchedulerError, TaskError};
pub use stealing::{SCHEDULER_NAME, Scheduler};
pub use task::{Priority, Task, TaskId, TaskInit, TaskState};
