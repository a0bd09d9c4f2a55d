// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::runtime::condition_variable::ConditionVariable;
use ::std::cell::Cell;

//======================================================================================================================
// Structures
//======================================================================================================================

/// Counts outstanding pieces of work on one core. Waiters are released once the count drops to zero.
pub struct CompletionEvent {
    count: Cell<i64>,
    cv: ConditionVariable,
}

//======================================================================================================================
// Associate Functions
//======================================================================================================================

impl CompletionEvent {
    pub fn new(initial: i64) -> Self {
        assert!(initial >= 0, "new(): negative completion count {}", initial);
        Self {
            count: Cell::new(initial),
            cv: ConditionVariable::new(),
        }
    }

    pub fn enroll(&self, n: i64) {
        self.count.set(self.count.get() + n);
    }

    pub fn complete(&self, n: i64) {
        let count: i64 = self.count.get();
        assert!(count >= n, "complete(): completing {} with only {} outstanding", n, count);
        self.count.set(count - n);
        if count == n {
            self.cv.broadcast();
        }
    }

    pub fn outstanding(&self) -> i64 {
        self.count.get()
    }

    pub async fn wait(&self) {
        while self.count.get() > 0 {
            self.cv.wait().await;
        }
    }
}

//======================================================================================================================
// Trait Implementations
//======================================================================================================================

impl Default for CompletionEvent {
    fn default() -> Self {
        Self::new(0)
    }
}

//======================================================================================================================
// Unit Tests
//======================================================================================================================

#[cfg(test)]
mod tests {
    use super::CompletionEvent;
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
        cell::Cell,
        rc::Rc,
    };

    #[test]
    fn wait_returns_once_everything_completed() -> Result<()> {
        let scheduler: Rc<TaskingScheduler> = install_scheduler(0);
        let event: Rc<CompletionEvent> = Rc::new(CompletionEvent::new(0));
        event.enroll(3);
        let released: Rc<Cell<bool>> = Rc::new(Cell::new(false));

        for _ in 0..2 {
            let event: Rc<CompletionEvent> = event.clone();
            let released: Rc<Cell<bool>> = released.clone();
            scheduler.spawn(
                "waiter",
                async move {
                    event.wait().await;
                    released.set(true);
                }
                .boxed_local(),
            );
        }
        let worker_event: Rc<CompletionEvent> = event.clone();
        let early: Rc<Cell<bool>> = released.clone();
        scheduler.spawn(
            "completer",
            async move {
                for _ in 0..3 {
                    if early.get() {
                        panic!("waiter released early");
                    }
                    worker_event.complete(1);
                    thread_yield().await;
                }
            }
            .boxed_local(),
        );
        run_scheduler(scheduler);

        crate::ensure_eq!(released.get(), true);
        crate::ensure_eq!(event.outstanding(), 0);
        Ok(())
    }

    #[test]
    #[should_panic(expected = "complete()")]
    fn over_completion_is_fatal() {
        let event: CompletionEvent = CompletionEvent::new(1);
        event.complete(2);
    }
}
