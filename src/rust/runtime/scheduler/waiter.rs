// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! Waiters are what the core-local sync primitives link into their one-word waiter lists: either a suspended
//! Worker or a delegate closure that runs inline when signalled. A waiter packs into 33 bits so a primitive can
//! keep a lock bit or a count next to its list head.

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::runtime::scheduler::worker::WorkerId;

//======================================================================================================================
// Constants
//======================================================================================================================

/// Raw value of an empty waiter link.
pub const NO_WAITER: u64 = 0;

/// Width of a raw waiter.
pub const WAITER_BITS: u32 = 33;

const DELEGATE_BIT: u64 = 1 << 32;
const INDEX_MASK: u64 = DELEGATE_BIT - 1;

//======================================================================================================================
// Structures
//======================================================================================================================

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub struct DelegateId(u32);

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Waiter {
    Worker(WorkerId),
    Delegate(DelegateId),
}

/// A closure parked on a waiter list.
pub struct DelegateSlot {
    pub next: u64,
    pub callback: Box<dyn FnOnce()>,
}

//======================================================================================================================
// Associate Functions
//======================================================================================================================

impl Waiter {
    /// Never returns [NO_WAITER]: indices are stored off by one.
    pub fn into_raw(self) -> u64 {
        match self {
            Waiter::Worker(id) => usize::from(id) as u64 + 1,
            Waiter::Delegate(DelegateId(index)) => (index as u64 + 1) | DELEGATE_BIT,
        }
    }

    pub fn from_raw(raw: u64) -> Option<Self> {
        if raw == NO_WAITER {
            return None;
        }
        let index: usize = ((raw & INDEX_MASK) - 1) as usize;
        if raw & DELEGATE_BIT != 0 {
            Some(Waiter::Delegate(DelegateId::from(index)))
        } else {
            Some(Waiter::Worker(WorkerId::from(index)))
        }
    }
}

//======================================================================================================================
// Trait Implementations
//======================================================================================================================

impl From<usize> for DelegateId {
    fn from(index: usize) -> Self {
        Self(index as u32)
    }
}

impl From<DelegateId> for usize {
    fn from(id: DelegateId) -> Self {
        id.0 as usize
    }
}

//======================================================================================================================
// Unit Tests
//======================================================================================================================
