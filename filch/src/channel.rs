use crate::stealing::request::{StealRequest, TaskBatch};
use crossbeam_queue::ArrayQueue;

/// Multi-producer inbox of steal requests, one per worker.
///
/// Capacity is the worker count: with at most one outstanding request per
/// worker the channel cannot overflow, so a failed push is a broken
/// invariant in the caller, not a condition to handle.
#[derive(Debug)]
pub(crate) struct RequestChannel {
    inner: ArrayQueue<StealRequest>,
}

impl RequestChannel {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            inner: ArrayQueue::new(capacity.max(1)),
        }
    }

    #[track_caller]
    pub(crate) fn send(&self, req: StealRequest) {
        if self.inner.push(req).is_err() {
            panic!("steal-request inbox overflow: more in-flight requests than workers");
        }
    }

    pub(crate) fn try_recv(&self) -> Option<StealRequest> {
        self.inner.pop()
    }
}

/// Single-producer response slot holding at most one task batch.
///
/// The producer is whichever peer satisfies the owner's outstanding steal
/// request; the owner is the only consumer. One outstanding request means at
/// most one batch in flight, hence capacity 1.
#[derive(Debug)]
pub(crate) struct ResponseChannel {
    inner: ArrayQueue<TaskBatch>,
}

impl ResponseChannel {
    pub(crate) fn new() -> Self {
        Self {
            inner: ArrayQueue::new(1),
        }
    }

    #[track_caller]
    pub(crate) fn send(&self, batch: TaskBatch) {
        if self.inner.push(batch).is_err() {
            panic!("response slot occupied: a second peer answered the same steal request");
        }
    }

    pub(crate) fn try_recv(&self) -> Option<TaskBatch> {
        self.inner.pop()
    }
}
