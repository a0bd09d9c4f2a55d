// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::runtime::scheduler::worker::WorkerId;
use ::crossbeam_channel::Sender;
use ::std::{
    sync::Arc,
    task::{
        Wake,
        Waker,
    },
};

//======================================================================================================================
// Structures
//======================================================================================================================

/// A wake request posted to a scheduler's mailbox.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct WakeRequest {
    pub id: WorkerId,
    pub generation: u32,
}

/// Waker handed to futures that are not scheduler primitives. Wakers must be `Send`, but Workers never leave their
/// core, so waking only posts the Worker's identity and the owning scheduler acts on it at its next decision point.
pub struct WorkerWaker {
    request: WakeRequest,
    mailbox: Sender<WakeRequest>,
}

//======================================================================================================================
// Associate Functions
//======================================================================================================================

impl WorkerWaker {
    pub fn new_waker(id: WorkerId, generation: u32, mailbox: Sender<WakeRequest>) -> Waker {
        Waker::from(Arc::new(Self {
            request: WakeRequest { id, generation },
            mailbox,
        }))
    }
}

//======================================================================================================================
// Trait Implementations
//======================================================================================================================

impl Wake for WorkerWaker {
    fn wake(self: Arc<Self>) {
        self.wake_by_ref();
    }

    fn wake_by_ref(self: &Arc<Self>) {
        // The scheduler may be gone already; nothing left to wake then.
        if self.mailbox.send(self.request).is_err() {
            trace!("wake_by_ref(): scheduler is gone ({:?})", self.request.id);
        }
    }
}
