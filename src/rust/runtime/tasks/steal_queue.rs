// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//======================================================================================================================
// Imports
//======================================================================================================================

use ::crossbeam_deque::{
    Steal,
    Stealer,
    Worker,
};

//======================================================================================================================
// Structures
//======================================================================================================================

/// Owner end of a core's bounded queue of public tasks. The owning core pushes and pops at the back; thieves hold a
/// [Stealer] and take from the front, so they get the oldest work.
pub struct StealQueue<T> {
    capacity: usize,
    local: Worker<T>,
}

//======================================================================================================================
// Associate Functions
//======================================================================================================================

impl<T> StealQueue<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            local: Worker::new_lifo(),
        }
    }

    /// Handle other cores steal from this queue with.
    pub fn stealer(&self) -> Stealer<T> {
        self.local.stealer()
    }

    /// Adds `item` at the back. Overflowing the queue is a fatal error.
    pub fn push(&self, item: T) {
        assert!(
            self.local.len() < self.capacity,
            "push(): steal queue of {} tasks is full",
            self.capacity
        );
        self.local.push(item);
    }

    /// Takes the most recently pushed item.
    pub fn pop(&self) -> Option<T> {
        self.local.pop()
    }

    /// Takes up to `max` of the oldest items of `victim`, and never more than half of what it holds (rounded up).
    pub fn steal(victim: &Stealer<T>, max: usize) -> Vec<T> {
        if max == 0 || victim.is_empty() {
            return Vec::new();
        }
        let batch: Worker<T> = Worker::new_fifo();
        loop {
            match victim.steal_batch_with_limit(&batch, max) {
                Steal::Retry => continue,
                Steal::Success(()) | Steal::Empty => break,
            }
        }
        let mut stolen: Vec<T> = Vec::with_capacity(batch.len());
        while let Some(item) = batch.pop() {
            stolen.push(item);
        }
        stolen
    }

    pub fn len(&self) -> usize {
        self.local.len()
    }

    pub fn is_empty(&self) -> bool {
        self.local.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Room left before the queue is full.
    pub fn room(&self) -> usize {
        self.capacity.saturating_sub(self.local.len())
    }
}

//======================================================================================================================
// Unit Tests
//======================================================================================================================
