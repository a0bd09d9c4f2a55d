// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! Communicator contract between cores. Aggregated buffers travel whole and come back to their owner once
//! delivered; small immediate sends go out in pre-allocated send contexts.

//======================================================================================================================
// Exports
//======================================================================================================================

pub mod fabric;

pub use self::fabric::InProcessFabric;

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::runtime::{
    memory::RDMABuffer,
    Core,
};
use ::std::mem::MaybeUninit;

//======================================================================================================================
// Structures
//======================================================================================================================

/// Pre-allocated space for one immediate send. Contexts belong to their source core and go back to it once the
/// destination has delivered what they carry.
pub struct SendContext {
    source: Core,
    destination: Core,
    data: Box<[MaybeUninit<u8>]>,
    len: usize,
}

/// Something a communicator handed to a core.
pub enum Arrival {
    /// An aggregated buffer for this core to deaggregate.
    Buffer(Box<RDMABuffer>),
    /// One of this core's buffers, back from its trip.
    Returned(Box<RDMABuffer>),
    /// Messages sent without aggregation.
    Immediate(SendContext),
}

//======================================================================================================================
// Traits
//======================================================================================================================

/// Moves bytes between cores.
pub trait Communicator: Send + Sync {
    /// Takes a free send context of `source`, if any. Never blocks.
    fn try_get_send_context(&self, source: Core) -> Option<SendContext>;

    /// Ships a filled send context to its destination.
    fn post_send(&self, context: SendContext);

    /// Gives a delivered send context back to its source core.
    fn release_send_context(&self, context: SendContext);

    /// Ships a buffer to `buffer.destination()`.
    fn post_buffer(&self, buffer: Box<RDMABuffer>);

    /// Sends a fully delivered buffer back to `buffer.owner()`.
    fn return_buffer(&self, buffer: Box<RDMABuffer>);

    /// Hands arrivals for `core` to `handler`. Returns how many were handled.
    fn poll(&self, core: Core, handler: &mut dyn FnMut(Arrival)) -> usize;

    /// Buffers and send contexts posted but not yet picked up.
    fn in_flight(&self) -> usize;
}

//======================================================================================================================
// Associate Functions
//======================================================================================================================

impl SendContext {
    pub fn new(source: Core, capacity: usize) -> Self {
        Self {
            source,
            destination: source,
            data: vec![MaybeUninit::uninit(); capacity].into_boxed_slice(),
            len: 0,
        }
    }

    pub fn source(&self) -> Core {
        self.source
    }

    pub fn destination(&self) -> Core {
        self.destination
    }

    /// Readies the context for a send to `destination`.
    pub fn prepare(&mut self, destination: Core) {
        self.destination = destination;
        self.len = 0;
    }

    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    /// Writable space after the bytes committed so far.
    pub fn tail(&mut self) -> &mut [MaybeUninit<u8>] {
        &mut self.data[self.len..]
    }

    pub fn commit(&mut self, bytes: usize) {
        assert!(
            self.len + bytes <= self.data.len(),
            "commit(): {} bytes overrun the send context",
            bytes
        );
        self.len += bytes;
    }

    /// Committed bytes.
    pub fn payload(&self) -> &[MaybeUninit<u8>] {
        &self.data[..self.len]
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}
