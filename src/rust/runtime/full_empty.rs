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

/// Core-local cell with a full/empty bit. Readers and writers wait on the bit instead of polling it.
pub struct FullEmpty<T: Copy> {
    value: Cell<Option<T>>,
    cv: ConditionVariable,
}

//======================================================================================================================
// Associate Functions
//======================================================================================================================

impl<T: Copy> FullEmpty<T> {
    pub fn new() -> Self {
        Self {
            value: Cell::new(None),
            cv: ConditionVariable::new(),
        }
    }

    pub fn full(value: T) -> Self {
        Self {
            value: Cell::new(Some(value)),
            cv: ConditionVariable::new(),
        }
    }

    pub fn is_full(&self) -> bool {
        self.value.get().is_some()
    }

    /// Waits for empty, writes, and sets full.
    pub async fn write_ef(&self, value: T) {
        while self.is_full() {
            self.cv.wait().await;
        }
        self.value.set(Some(value));
        self.cv.broadcast();
    }

    /// Waits for full, reads, and sets empty.
    pub async fn read_fe(&self) -> T {
        loop {
            if let Some(value) = self.value.take() {
                self.cv.broadcast();
                return value;
            }
            self.cv.wait().await;
        }
    }

    /// Waits for full and reads, leaving the cell full.
    pub async fn read_ff(&self) -> T {
        loop {
            if let Some(value) = self.value.get() {
                return value;
            }
            self.cv.wait().await;
        }
    }

    /// Writes regardless of the bit and sets full.
    pub fn write_xf(&self, value: T) {
        self.value.set(Some(value));
        self.cv.broadcast();
    }

    pub fn reset(&self) {
        self.value.set(None);
        self.cv.broadcast();
    }
}

//======================================================================================================================
// Trait Implementations
//======================================================================================================================

impl<T: Copy> Default for FullEmpty<T> {
    fn default() -> Self {
        Self::new()
    }
}

//======================================================================================================================
// Unit Tests
//======================================================================================================================
