// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::runtime::scheduler::waiter::NO_WAITER;
use ::futures::future::LocalBoxFuture;
use ::std::{
    fmt,
    task::Waker,
};

//======================================================================================================================
// Structures
//======================================================================================================================

/// Identifies a Worker within one core's scheduler. Ids are slab indices and are recycled once a Worker exits.
#[derive(Clone, Copy, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub struct WorkerId(u32);

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum WorkerState {
    /// Parked on the unassigned pool, waiting for a task.
    Unassigned,
    /// On the ready queue.
    Ready,
    /// Being polled right now. At most one per core.
    Running,
    /// Off every queue; only an explicit wake brings it back.
    Suspended,
    /// On the periodic queue.
    Periodic,
    /// Finished; the slot is about to be released.
    Exited,
}

/// Task Workers pull user work from the task manager; system Workers run runtime services such as message polling.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum WorkerKind {
    Task,
    System,
}

/// Everything the scheduler keeps about one Worker.
pub struct WorkerSlot {
    pub name: &'static str,
    pub kind: WorkerKind,
    pub state: WorkerState,
    /// Raw link to the next waiter; shared by every queue and waiter list the Worker can be on.
    pub next: u64,
    /// Set while the Worker is a member of any queue or waiter list.
    pub linked: bool,
    /// Distinguishes this occupant of the slot from earlier ones, so stale wakers are ignored.
    pub generation: u32,
    /// Taken out while the Worker is polled.
    pub coroutine: Option<LocalBoxFuture<'static, ()>>,
    pub waker: Waker,
}

//======================================================================================================================
// Associate Functions
//======================================================================================================================

impl WorkerSlot {
    pub fn new(
        name: &'static str,
        kind: WorkerKind,
        state: WorkerState,
        generation: u32,
        coroutine: LocalBoxFuture<'static, ()>,
        waker: Waker,
    ) -> Self {
        Self {
            name,
            kind,
            state,
            next: NO_WAITER,
            linked: false,
            generation,
            coroutine: Some(coroutine),
            waker,
        }
    }
}

//======================================================================================================================
// Trait Implementations
//======================================================================================================================

impl From<usize> for WorkerId {
    fn from(index: usize) -> Self {
        Self(index as u32)
    }
}

impl From<WorkerId> for usize {
    fn from(id: WorkerId) -> Self {
        id.0 as usize
    }
}

impl fmt::Debug for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "worker#{}", self.0)
    }
}
