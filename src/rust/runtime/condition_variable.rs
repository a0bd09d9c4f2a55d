// Copyright (c) Microsoft Corporation. All rights reserved.
// Licensed under the MIT license.

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::runtime::scheduler::{
    thread_suspend,
    waiter::{
        Waiter,
        NO_WAITER,
    },
    TaskingScheduler,
};
use ::std::cell::Cell;

//======================================================================================================================
// Structures
//======================================================================================================================

/// Core-local condition variable. It is a single word holding the head of an intrusive waiter list, so thousands of
/// them can be embedded in per-destination tables. Waiters are woken most recent first.
pub struct ConditionVariable {
    waiters: Cell<u64>,
}

//======================================================================================================================
// Associate Functions
//======================================================================================================================

impl ConditionVariable {
    pub fn new() -> Self {
        Self {
            waiters: Cell::new(NO_WAITER),
        }
    }

    /// Suspends the calling Worker until it is signalled.
    pub async fn wait(&self) {
        TaskingScheduler::with(|s| {
            let waiter: Waiter = s.current_waiter();
            self.waiters.set(s.push_waiter(self.waiters.get(), waiter));
        });
        thread_suspend().await;
    }

    /// Parks a closure on the waiter list. Signalling runs it inline instead of scheduling a Worker.
    pub fn add_delegate(&self, callback: Box<dyn FnOnce()>) {
        TaskingScheduler::with(|s| {
            let waiter: Waiter = s.new_delegate(callback);
            self.waiters.set(s.push_waiter(self.waiters.get(), waiter));
        });
    }

    /// Wakes one waiter. Returns false when there was nobody to wake.
    pub fn signal(&self) -> bool {
        if self.waiters.get() == NO_WAITER {
            return false;
        }
        TaskingScheduler::with(|s| match s.pop_waiter(self.waiters.get()) {
            Some((waiter, rest)) => {
                self.waiters.set(rest);
                s.wake_waiter(waiter);
                true
            },
            None => false,
        })
    }

    /// Wakes every waiter registered so far. Waiters added while waking wait for the next signal. Returns how many
    /// were woken.
    pub fn broadcast(&self) -> usize {
        let mut head: u64 = self.waiters.replace(NO_WAITER);
        if head == NO_WAITER {
            return 0;
        }
        let mut woken: usize = 0;
        TaskingScheduler::with(|s| {
            while let Some((waiter, rest)) = s.pop_waiter(head) {
                head = rest;
                s.wake_waiter(waiter);
                woken += 1;
            }
        });
        woken
    }

    pub fn has_waiters(&self) -> bool {
        self.waiters.get() != NO_WAITER
    }
}

//======================================================================================================================
// Trait Implementations
//======================================================================================================================

impl Default for ConditionVariable {
    fn default() -> Self {
        Self::new()
    }
}

//======================================================================================================================
// Unit Tests
//======================================================================================================================
