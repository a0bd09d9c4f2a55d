// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

mod queue;
mod waker;
mod yielder;

//==============================================================================
// Exports
//==============================================================================

pub mod mutex;
pub mod scheduler;
pub mod waiter;
pub mod worker;

pub use self::{
    scheduler::{
        TaskingScheduler,
        WorkSource,
    },
    waiter::Waiter,
    worker::{
        WorkerId,
        WorkerKind,
        WorkerState,
    },
};

//==============================================================================
// Imports
//==============================================================================

use self::yielder::{
    Idle,
    Suspend,
    Yield,
};

//==============================================================================
// Standalone Functions
//==============================================================================

/// Lets other Workers run. Returns true when the caller was rescheduled right away because nothing else was
/// runnable.
pub async fn thread_yield() -> bool {
    Yield::new(false).await
}

/// Like [thread_yield], but the caller comes back only when the periodic throttle allows.
pub async fn thread_yield_periodic() -> bool {
    Yield::new(true).await
}

/// Blocks the caller until another Worker passes its id to [thread_wake].
pub async fn thread_suspend() {
    Suspend::new().await
}

/// Parks the calling task Worker until the scheduler hands it new work. Returns false immediately if every other task
/// Worker is already idle.
pub async fn thread_idle() -> bool {
    Idle::new().await
}

/// Makes a suspended Worker runnable. The Worker must not be running or on any queue.
pub fn thread_wake(id: WorkerId) {
    TaskingScheduler::with(|s| s.thread_wake(id))
}

/// The Worker being run by this core.
pub fn current_worker() -> Option<WorkerId> {
    TaskingScheduler::current().and_then(|s| s.current_worker())
}
