// Copyright (c) Microsoft Corporation. All rights reserved.
// Licensed under the MIT license.

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::runtime::{
    fail::Fail,
    scheduler::{
        thread_suspend,
        waiter::{
            Waiter,
            NO_WAITER,
        },
        TaskingScheduler,
    },
};
use ::std::cell::Cell;

//======================================================================================================================
// Constants
//======================================================================================================================

const LOCK_BIT: u64 = 1;

//======================================================================================================================
// Structures
//======================================================================================================================

/// Core-local mutex packed in one word: the lock bit and the head of the waiter list. Contenders suspend instead of
/// spinning and unlock hands the mutex to one of them.
pub struct Mutex {
    word: Cell<u64>,
}

//======================================================================================================================
// Associate Functions
//======================================================================================================================

impl Mutex {
    pub fn new() -> Self {
        Self {
            word: Cell::new(0),
        }
    }

    /// Acquire this lock. While it is held by someone else, the calling Worker waits on the mutex's waiter list.
    pub async fn lock(&self) {
        while !self.try_lock() {
            TaskingScheduler::with(|s| {
                let waiter: Waiter = s.current_waiter();
                let head: u64 = s.push_waiter(self.word.get() >> 1, waiter);
                self.word.set((head << 1) | LOCK_BIT);
            });
            thread_suspend().await;
        }
    }

    /// Try to acquire this lock. Return [true] if successful
    pub fn try_lock(&self) -> bool {
        let word: u64 = self.word.get();
        if word & LOCK_BIT != 0 {
            return false;
        }
        self.word.set(word | LOCK_BIT);
        true
    }

    pub fn is_locked(&self) -> bool {
        self.word.get() & LOCK_BIT != 0
    }

    /// Release this lock and wake the most recent waiter, if any.
    pub fn unlock(&self) -> Result<(), Fail> {
        let word: u64 = self.word.get();
        if word & LOCK_BIT == 0 {
            let cause: String = String::from("mutex was not locked");
            error!("unlock(): {}", &cause);
            return Err(Fail::new(libc::EPERM, &cause));
        }

        let head: u64 = word >> 1;
        if head == NO_WAITER {
            self.word.set(0);
            return Ok(());
        }
        TaskingScheduler::with(|s| match s.pop_waiter(head) {
            Some((waiter, rest)) => {
                self.word.set(rest << 1);
                s.wake_waiter(waiter);
            },
            None => self.word.set(0),
        });
        Ok(())
    }
}

//======================================================================================================================
// Trait Implementations
//======================================================================================================================

impl Default for Mutex {
    fn default() -> Self {
        Self::new()
    }
}

//======================================================================================================================
// Tests
//======================================================================================================================
