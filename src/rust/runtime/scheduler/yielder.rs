// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::runtime::scheduler::scheduler::TaskingScheduler;
use ::std::{
    future::Future,
    pin::Pin,
    task::{
        Context,
        Poll,
    },
};

//======================================================================================================================
// Structures
//======================================================================================================================

/// Puts the running Worker back on the ready (or periodic) queue. Resolves to whether the same Worker was the very
/// next one dispatched, i.e. nobody else made progress in between.
pub struct Yield {
    periodic: bool,
    /// Dispatch count when the Worker yielded.
    mark: Option<u64>,
}

/// Takes the running Worker off every queue until someone calls `thread_wake` on it.
pub struct Suspend {
    suspended: bool,
}

/// Parks the running Worker on the unassigned pool. Resolves to false right away when the Worker is the last
/// task Worker that is not idle.
pub struct Idle {
    parked: bool,
}

//======================================================================================================================
// Associate Functions
//======================================================================================================================

impl Yield {
    pub fn new(periodic: bool) -> Self {
        Self { periodic, mark: None }
    }
}

impl Suspend {
    pub fn new() -> Self {
        Self { suspended: false }
    }
}

impl Idle {
    pub fn new() -> Self {
        Self { parked: false }
    }
}

//======================================================================================================================
// Trait Implementations
//======================================================================================================================

impl Future for Yield {
    type Output = bool;

    fn poll(self: Pin<&mut Self>, _context: &mut Context) -> Poll<Self::Output> {
        let self_: &mut Self = self.get_mut();
        match self_.mark {
            None => {
                let periodic: bool = self_.periodic;
                self_.mark = Some(TaskingScheduler::with(|s| s.yield_current(periodic)));
                Poll::Pending
            },
            Some(mark) => Poll::Ready(TaskingScheduler::with(|s| s.dispatches()) == mark + 1),
        }
    }
}

impl Future for Suspend {
    type Output = ();

    fn poll(self: Pin<&mut Self>, _context: &mut Context) -> Poll<Self::Output> {
        let self_: &mut Self = self.get_mut();
        if self_.suspended {
            Poll::Ready(())
        } else {
            TaskingScheduler::with(|s| s.suspend_current());
            self_.suspended = true;
            Poll::Pending
        }
    }
}

impl Future for Idle {
    type Output = bool;

    fn poll(self: Pin<&mut Self>, _context: &mut Context) -> Poll<Self::Output> {
        let self_: &mut Self = self.get_mut();
        if self_.parked {
            return Poll::Ready(true);
        }
        if TaskingScheduler::with(|s| s.park_current_idle()) {
            self_.parked = true;
            Poll::Pending
        } else {
            Poll::Ready(false)
        }
    }
}
