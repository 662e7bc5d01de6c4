#![allow(unused)]

use crate::task::{Priority, TaskId};
use dashmap::DashMap;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum Method {
    CreateTask,
    ScheduleTask,
    ScheduleTaskLast,
    NextTask,
    WaitOrAddNew,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Call {
    CreateTask {
        id: TaskId,
        worker: usize,
    },
    ScheduleTask {
        worker: usize,
        priority: Priority,
        last: bool,
    },
    NextTask {
        worker: usize,
        found: bool,
    },
    WaitOrAddNew {
        worker: usize,
        added: usize,
        terminate: bool,
    },
}

/// Records every facade call during tests so expectations can assert on the
/// exact routing decisions, not just their side effects. No-op in release
/// builds (the field carrying it is test-only).
#[derive(Debug, Clone)]
pub(crate) struct Tracker {
    calls: Arc<DashMap<Method, Vec<Call>>>,
}

impl Tracker {
    pub(crate) fn new() -> Self {
        let map = DashMap::new();
        map.insert(Method::CreateTask, Vec::new());
        map.insert(Method::ScheduleTask, Vec::new());
        map.insert(Method::ScheduleTaskLast, Vec::new());
        map.insert(Method::NextTask, Vec::new());
        map.insert(Method::WaitOrAddNew, Vec::new());

        Self {
            calls: Arc::new(map),
        }
    }

    pub(crate) fn record(&self, method: Method, call: Call) {
        self.calls
            .get_mut(&method)
            .expect("method not found")
            .push(call)
    }

    pub(crate) fn get_calls(&self, method: &Method) -> Vec<Call> {
        self.calls
            .get(method)
            .expect("method not found")
            .value()
            .clone()
    }

    pub(crate) fn num_calls(&self, method: &Method) -> usize {
        self.calls.get(method).map_or(0, |calls| calls.len())
    }
}
