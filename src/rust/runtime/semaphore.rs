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

const COUNT_BITS: u32 = 16;
const COUNT_MASK: u64 = (1 << COUNT_BITS) - 1;

//======================================================================================================================
// Structures
//======================================================================================================================

/// Core-local counting semaphore packed in one word: a signed 16-bit count and the head of the waiter list.
/// Counts outside of ±2^15 are a fatal error.
pub struct CountingSemaphore {
    word: Cell<u64>,
}

//======================================================================================================================
// Associate Functions
//======================================================================================================================

impl CountingSemaphore {
    pub fn new(initial: i64) -> Self {
        let semaphore: Self = Self { word: Cell::new(0) };
        semaphore.set_count(initial);
        semaphore
    }

    pub fn value(&self) -> i64 {
        (self.word.get() & COUNT_MASK) as u16 as i16 as i64
    }

    fn set_count(&self, count: i64) {
        assert!(
            count >= i16::MIN as i64 && count <= i16::MAX as i64,
            "set_count(): semaphore count {} is out of range",
            count
        );
        self.word.set((self.word.get() & !COUNT_MASK) | (count as i16 as u16 as u64));
    }

    fn waiters(&self) -> u64 {
        self.word.get() >> COUNT_BITS
    }

    fn set_waiters(&self, head: u64) {
        self.word.set((head << COUNT_BITS) | (self.word.get() & COUNT_MASK));
    }

    /// Takes `decr` units if that leaves the count non-negative.
    pub fn try_decrement(&self, decr: i64) -> bool {
        let count: i64 = self.value();
        if count - decr < 0 {
            return false;
        }
        self.set_count(count - decr);
        true
    }

    /// Takes `decr` units, suspending the calling Worker until that leaves the count non-negative.
    pub async fn decrement(&self, decr: i64) {
        while !self.try_decrement(decr) {
            TaskingScheduler::with(|s| {
                let waiter: Waiter = s.current_waiter();
                self.set_waiters(s.push_waiter(self.waiters(), waiter));
            });
            thread_suspend().await;
        }
    }

    /// Returns `incr` units and wakes every waiter. Each of them rechecks whether its own decrement now fits.
    pub fn increment(&self, incr: i64) {
        self.set_count(self.value() + incr);
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
// Unit Tests
//======================================================================================================================

#[cfg(test)]
mod tests {
    use super::CountingSemaphore;
    use crate::runtime::scheduler::{
        scheduler::tests::{
            install_scheduler,
            run_scheduler,
        },
        thread_yield,
        TaskingScheduler,
    };
    use ::anyhow::Result;
    use ::futures::FutureExt;
    use ::std::{
        cell::RefCell,
        mem,
        rc::Rc,
    };

    #[test]
    fn semaphore_counts() -> Result<()> {
        let semaphore: CountingSemaphore = CountingSemaphore::new(3);
        crate::ensure_eq!(mem::size_of::<CountingSemaphore>(), 8);
        crate::ensure_eq!(semaphore.try_decrement(2), true);
        crate::ensure_eq!(semaphore.try_decrement(2), false);
        crate::ensure_eq!(semaphore.value(), 1);
        semaphore.increment(5);
        crate::ensure_eq!(semaphore.value(), 6);
        let negative: CountingSemaphore = CountingSemaphore::new(-4);
        crate::ensure_eq!(negative.value(), -4);
        negative.increment(4);
        crate::ensure_eq!(negative.value(), 0);
        Ok(())
    }

    #[test]
    #[should_panic(expected = "out of range")]
    fn semaphore_overflow_is_fatal() {
        let semaphore: CountingSemaphore = CountingSemaphore::new(i16::MAX as i64);
        semaphore.increment(1);
    }

    #[test]
    fn decrement_blocks_until_enough_units() -> Result<()> {
        let scheduler: Rc<TaskingScheduler> = install_scheduler(0);
        let semaphore: Rc<CountingSemaphore> = Rc::new(CountingSemaphore::new(0));
        let trace: Rc<RefCell<Vec<(&'static str, i64)>>> = Rc::new(RefCell::new(Vec::new()));

        let sem: Rc<CountingSemaphore> = semaphore.clone();
        let log: Rc<RefCell<Vec<(&'static str, i64)>>> = trace.clone();
        scheduler.spawn(
            "consumer",
            async move {
                sem.decrement(3).await;
                log.borrow_mut().push(("took", sem.value()));
            }
            .boxed_local(),
        );
        let sem: Rc<CountingSemaphore> = semaphore.clone();
        let log: Rc<RefCell<Vec<(&'static str, i64)>>> = trace.clone();
        scheduler.spawn(
            "producer",
            async move {
                for _ in 0..4 {
                    sem.increment(1);
                    log.borrow_mut().push(("gave", sem.value()));
                    thread_yield().await;
                }
            }
            .boxed_local(),
        );
        run_scheduler(scheduler);

        // The consumer never returns while fewer than three units are available.
        crate::ensure_eq!(
            *trace.borrow(),
            vec![("gave", 1), ("gave", 2), ("gave", 3), ("took", 0), ("gave", 1)]
        );
        Ok(())
    }
}
