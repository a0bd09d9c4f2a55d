// Copyright (c) Microsoft Corporation.
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
// Constants
//======================================================================================================================

const PENDING_BITS: u32 = 16;
const PENDING_MASK: u64 = (1 << PENDING_BITS) - 1;

//======================================================================================================================
// Structures
//======================================================================================================================

/// Condition variable that remembers signals nobody was waiting for. A later [CountConditionVariable::wait] consumes
/// one of them instead of suspending. Packed in one word: the pending count and the waiter list head.
pub struct CountConditionVariable {
    word: Cell<u64>,
}

//======================================================================================================================
// Associate Functions
//======================================================================================================================

impl CountConditionVariable {
    pub fn new() -> Self {
        Self {
            word: Cell::new(0),
        }
    }

    pub fn pending(&self) -> u16 {
        (self.word.get() & PENDING_MASK) as u16
    }

    fn set_pending(&self, pending: u16) {
        self.word.set((self.word.get() & !PENDING_MASK) | pending as u64);
    }

    fn waiters(&self) -> u64 {
        self.word.get() >> PENDING_BITS
    }

    fn set_waiters(&self, head: u64) {
        self.word.set((head << PENDING_BITS) | (self.word.get() & PENDING_MASK));
    }

    pub async fn wait(&self) {
        let pending: u16 = self.pending();
        if pending > 0 {
            self.set_pending(pending - 1);
            return;
        }
        TaskingScheduler::with(|s| {
            let waiter: Waiter = s.current_waiter();
            self.set_waiters(s.push_waiter(self.waiters(), waiter));
        });
        thread_suspend().await;
    }

    /// Wakes one waiter, or records the signal when there is none.
    pub fn signal(&self) {
        let head: u64 = self.waiters();
        if head == NO_WAITER {
            let pending: u16 = match self.pending().checked_add(1) {
                Some(pending) => pending,
                None => panic!("signal(): too many pending signals"),
            };
            self.set_pending(pending);
            return;
        }
        TaskingScheduler::with(|s| {
            if let Some((waiter, rest)) = s.pop_waiter(head) {
                self.set_waiters(rest);
                s.wake_waiter(waiter);
            }
        });
    }

    /// Wakes every current waiter. Nothing is recorded for future waiters.
    pub fn broadcast(&self) {
        let mut head: u64 = self.waiters();
        if head == NO_WAITER {
            return;
        }
        self.set_waiters(NO_WAITER);
        TaskingScheduler::with(|s| {
            while let Some((waiter, rest)) = s.pop_waiter(head) {
                head = rest;
                s.wake_waiter(waiter);
            }
        });
    }
}

//======================================================================================================================
// Trait Implementations
//======================================================================================================================

impl Default for CountConditionVariable {
    fn default() -> Self {
        Self::new()
    }
}

//======================================================================================================================
// Unit Tests
//======================================================================================================================
