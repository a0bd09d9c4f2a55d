// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::runtime::scheduler::{
    waiter::{
        Waiter,
        NO_WAITER,
    },
    worker::{
        WorkerId,
        WorkerSlot,
    },
};
use ::slab::Slab;

//======================================================================================================================
// Structures
//======================================================================================================================

/// FIFO of Workers threaded through the `next` link of their slots, so a Worker on this queue cannot be on any
/// other queue or waiter list at the same time.
#[derive(Debug, Default)]
pub struct ThreadQueue {
    front: Option<WorkerId>,
    back: Option<WorkerId>,
    len: usize,
}

//======================================================================================================================
// Associate Functions
//======================================================================================================================

impl ThreadQueue {
    pub fn is_empty(&self) -> bool {
        self.front.is_none()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn enqueue(&mut self, workers: &mut Slab<WorkerSlot>, id: WorkerId) {
        let slot: &mut WorkerSlot = &mut workers[usize::from(id)];
        assert!(
            !slot.linked,
            "enqueue(): {:?} ({}) is already on a queue or waiter list",
            id,
            slot.name
        );
        slot.linked = true;
        slot.next = NO_WAITER;

        match self.back {
            Some(back) => workers[usize::from(back)].next = Waiter::Worker(id).into_raw(),
            None => self.front = Some(id),
        }
        self.back = Some(id);
        self.len += 1;
    }

    pub fn dequeue(&mut self, workers: &mut Slab<WorkerSlot>) -> Option<WorkerId> {
        let id: WorkerId = self.front?;
        let slot: &mut WorkerSlot = &mut workers[usize::from(id)];
        self.front = match Waiter::from_raw(slot.next) {
            Some(Waiter::Worker(next)) => Some(next),
            Some(Waiter::Delegate(_)) => panic!("dequeue(): delegate linked into a thread queue"),
            None => None,
        };
        slot.next = NO_WAITER;
        slot.linked = false;
        if self.front.is_none() {
            self.back = None;
        }
        self.len -= 1;
        Some(id)
    }

    /// Number of times `id` appears on this queue.
    pub fn count(&self, workers: &Slab<WorkerSlot>, id: WorkerId) -> usize {
        let mut count: usize = 0;
        let mut cursor: Option<WorkerId> = self.front;
        while let Some(current) = cursor {
            if current == id {
                count += 1;
            }
            cursor = match Waiter::from_raw(workers[usize::from(current)].next) {
                Some(Waiter::Worker(next)) => Some(next),
                _ => None,
            };
        }
        count
    }
}
