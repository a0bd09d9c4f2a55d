// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::runtime::semaphore::CountingSemaphore;
use ::arrayvec::ArrayVec;
use ::std::cell::RefCell;

//======================================================================================================================
// Structures
//======================================================================================================================

/// Fixed-capacity core-local pool of reusable objects. A counting semaphore tracks what is available, so
/// [ReusePool::block_until_pop] suspends the caller while the pool is empty.
pub struct ReusePool<T, const N: usize> {
    items: RefCell<ArrayVec<Box<T>, N>>,
    available: CountingSemaphore,
}

//======================================================================================================================
// Associate Functions
//======================================================================================================================

impl<T, const N: usize> ReusePool<T, N> {
    pub fn new() -> Self {
        Self {
            items: RefCell::new(ArrayVec::new()),
            available: CountingSemaphore::new(0),
        }
    }

    /// Returns an object to the pool. Pushing past capacity is a fatal error.
    pub fn push(&self, item: Box<T>) {
        if self.items.borrow_mut().try_push(item).is_err() {
            panic!("push(): pool is full (capacity={})", N);
        }
        self.available.increment(1);
    }

    pub fn try_pop(&self) -> Option<Box<T>> {
        if !self.available.try_decrement(1) {
            return None;
        }
        self.items.borrow_mut().pop()
    }

    pub async fn block_until_pop(&self) -> Box<T> {
        self.available.decrement(1).await;
        match self.items.borrow_mut().pop() {
            Some(item) => item,
            None => panic!("block_until_pop(): pool count is out of sync"),
        }
    }

    pub fn len(&self) -> usize {
        self.items.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.borrow().is_empty()
    }

    pub const fn capacity(&self) -> usize {
        N
    }
}

//======================================================================================================================
// Trait Implementations
//======================================================================================================================

impl<T, const N: usize> Default for ReusePool<T, N> {
    fn default() -> Self {
        Self::new()
    }
}

//======================================================================================================================
// Unit Tests
//======================================================================================================================
