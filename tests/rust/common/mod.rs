// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//==============================================================================
// Imports
//==============================================================================

use ::pgas::{
    thread_yield,
    RuntimeConfig,
};
use ::std::sync::atomic::{
    AtomicUsize,
    Ordering,
};

//==============================================================================
// Constants
//==============================================================================

/// Buffer size used by tests. Small enough that a handful of messages fill a buffer.
pub const TEST_BUFFER_SIZE: usize = 1 << 16;

//==============================================================================
// Standalone Functions
//==============================================================================

/// Configuration of a run with `locales` locales of `locale_cores` cores each.
#[allow(dead_code)]
pub fn test_config(locales: usize, locale_cores: usize) -> RuntimeConfig {
    RuntimeConfig {
        locales,
        locale_cores,
        buffer_size: TEST_BUFFER_SIZE,
        rdma_buffers: 4,
        num_starting_workers: 2,
        steal_queue_capacity: 1 << 12,
        ..Default::default()
    }
}

/// A counter that message bodies can capture. Message bodies must be `Copy`, so they hold a plain reference to it.
#[allow(dead_code)]
pub fn counter() -> &'static AtomicUsize {
    Box::leak(Box::new(AtomicUsize::new(0)))
}

/// One counter per core of a run.
#[allow(dead_code)]
pub fn counters(n: usize) -> &'static [AtomicUsize] {
    Box::leak((0..n).map(|_| AtomicUsize::new(0)).collect::<Vec<AtomicUsize>>().into_boxed_slice())
}

/// Yields until `counter` reaches `target`.
#[allow(dead_code)]
pub async fn wait_for(counter: &AtomicUsize, target: usize) {
    while counter.load(Ordering::Acquire) < target {
        thread_yield().await;
    }
}
