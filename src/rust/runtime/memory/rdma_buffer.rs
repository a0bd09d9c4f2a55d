// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::runtime::{
    collections::intrusive::IntrusivelyQueueable,
    limits::MAX_LOCALE_CORES,
    Core,
    Locale,
};
use ::arrayvec::ArrayVec;
use ::std::{
    cell::Cell,
    mem::MaybeUninit,
    ptr::NonNull,
    sync::atomic::{
        AtomicUsize,
        Ordering,
    },
};

//======================================================================================================================
// Structures
//======================================================================================================================

/// Lifecycle of an aggregation buffer.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum BufferState {
    /// On its owner's free list.
    Free,
    /// Being filled by a sender.
    Filling,
    /// Posted to the communicator.
    InFlight,
    /// On a receiver's received list.
    Received,
    /// Sections are being delivered.
    Delivering,
    /// On its way back to its owner.
    Returning,
}

/// Counts buffers in each lifecycle state across the whole run.
pub struct BufferCensus {
    counts: [AtomicUsize; BufferState::COUNT],
    allocated: AtomicUsize,
}

/// Census counts taken at one point in time.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct CensusSnapshot {
    counts: [usize; BufferState::COUNT],
    allocated: usize,
}

/// Token for one in-flight buffer to one locale. It rides inside the buffer and goes back to the sender's pool
/// when the buffer returns.
#[derive(Debug)]
pub struct SendSlot {
    locale: Locale,
    sends: u64,
}

/// Fixed-size block that carries serialized messages to the cores of one locale. The payload is split into one
/// section per destination core, laid out in local-core order; the header records each section's byte count.
pub struct RDMABuffer {
    next: Cell<Option<NonNull<RDMABuffer>>>,
    owner: Core,
    source: Core,
    destination: Core,
    counts: ArrayVec<u32, MAX_LOCALE_CORES>,
    current_section: Option<usize>,
    used: usize,
    pending_sections: AtomicUsize,
    ack: Option<Box<SendSlot>>,
    payload: Box<[MaybeUninit<u8>]>,
}

//======================================================================================================================
// Associate Functions
//======================================================================================================================

impl BufferState {
    const COUNT: usize = 6;

    const ALL: [BufferState; BufferState::COUNT] = [
        BufferState::Free,
        BufferState::Filling,
        BufferState::InFlight,
        BufferState::Received,
        BufferState::Delivering,
        BufferState::Returning,
    ];

    fn index(self) -> usize {
        self as usize
    }
}

impl BufferCensus {
    pub fn new() -> Self {
        Self {
            counts: Default::default(),
            allocated: AtomicUsize::new(0),
        }
    }

    /// Registers `n` new buffers as free.
    pub fn allocate(&self, n: usize) {
        self.allocated.fetch_add(n, Ordering::AcqRel);
        self.counts[BufferState::Free.index()].fetch_add(n, Ordering::AcqRel);
    }

    pub fn transition(&self, from: BufferState, to: BufferState) {
        // Count the buffer in its new state before leaving the old one, so sums never come up short.
        self.counts[to.index()].fetch_add(1, Ordering::AcqRel);
        let previous: usize = self.counts[from.index()].fetch_sub(1, Ordering::AcqRel);
        assert!(previous > 0, "transition(): no buffer was {:?}", from);
    }

    pub fn count(&self, state: BufferState) -> usize {
        self.counts[state.index()].load(Ordering::Acquire)
    }

    /// Buffers across all states. Equals [BufferCensus::allocated] whenever no transition is in progress.
    pub fn total(&self) -> usize {
        BufferState::ALL.iter().map(|state| self.count(*state)).sum()
    }

    pub fn allocated(&self) -> usize {
        self.allocated.load(Ordering::Acquire)
    }

    pub fn snapshot(&self) -> CensusSnapshot {
        let mut counts: [usize; BufferState::COUNT] = [0; BufferState::COUNT];
        for state in BufferState::ALL {
            counts[state.index()] = self.count(state);
        }
        CensusSnapshot {
            counts,
            allocated: self.allocated(),
        }
    }
}

impl CensusSnapshot {
    pub fn count(&self, state: BufferState) -> usize {
        self.counts[state.index()]
    }

    pub fn total(&self) -> usize {
        self.counts.iter().sum()
    }

    pub fn allocated(&self) -> usize {
        self.allocated
    }
}

impl SendSlot {
    pub fn new(locale: Locale) -> Box<Self> {
        Box::new(Self { locale, sends: 0 })
    }

    pub fn locale(&self) -> Locale {
        self.locale
    }

    /// How many buffers this slot has travelled with.
    pub fn sends(&self) -> u64 {
        self.sends
    }
}

impl RDMABuffer {
    pub fn new(owner: Core, capacity: usize) -> Box<Self> {
        Box::new(Self {
            next: Cell::new(None),
            owner,
            source: owner,
            destination: owner,
            counts: ArrayVec::new(),
            current_section: None,
            used: 0,
            pending_sections: AtomicUsize::new(0),
            ack: None,
            payload: vec![MaybeUninit::uninit(); capacity].into_boxed_slice(),
        })
    }

    /// Prepares the buffer for a new trip to `destination`, with one empty section per core of that locale.
    pub fn reset(&mut self, destination: Core, locale_cores: usize) {
        assert!(
            locale_cores <= MAX_LOCALE_CORES,
            "reset(): {} sections do not fit the header",
            locale_cores
        );
        self.source = self.owner;
        self.destination = destination;
        self.counts.clear();
        self.counts.extend((0..locale_cores).map(|_| 0));
        self.current_section = None;
        self.used = 0;
        self.pending_sections.store(0, Ordering::Release);
    }

    /// Starts appending to section `index`. Sections are filled in increasing order.
    pub fn begin_section(&mut self, index: usize) {
        assert!(index < self.counts.len(), "begin_section(): no section {}", index);
        if let Some(current) = self.current_section {
            assert!(index >= current, "begin_section(): section {} after section {}", index, current);
        }
        self.current_section = Some(index);
    }

    pub fn capacity(&self) -> usize {
        self.payload.len()
    }

    pub fn used(&self) -> usize {
        self.used
    }

    pub fn remaining(&self) -> usize {
        self.payload.len() - self.used
    }

    pub fn is_empty(&self) -> bool {
        self.used == 0
    }

    /// Writable space after everything serialized so far.
    pub fn tail(&mut self) -> &mut [MaybeUninit<u8>] {
        &mut self.payload[self.used..]
    }

    /// Accounts `bytes` written at the tail to the current section.
    pub fn commit(&mut self, bytes: usize) {
        let section: usize = match self.current_section {
            Some(section) => section,
            None => panic!("commit(): no section was begun"),
        };
        assert!(bytes <= self.remaining(), "commit(): {} bytes overrun the buffer", bytes);
        self.used += bytes;
        self.counts[section] += bytes as u32;
    }

    pub fn section_len(&self, index: usize) -> usize {
        self.counts[index] as usize
    }

    /// Bytes of section `index`.
    pub fn section(&self, index: usize) -> &[MaybeUninit<u8>] {
        let start: usize = self.counts[..index].iter().map(|count| *count as usize).sum();
        &self.payload[start..start + self.counts[index] as usize]
    }

    /// Bit `i` is set when section `i` holds data.
    pub fn sections_mask(&self) -> u64 {
        self.counts
            .iter()
            .enumerate()
            .filter(|(_, count)| **count > 0)
            .fold(0, |mask, (i, _)| mask | (1 << i))
    }

    pub fn set_pending(&self, sections: usize) {
        self.pending_sections.store(sections, Ordering::Release);
    }

    /// Marks one section as delivered. Returns true for the last one.
    pub fn complete_section(&self) -> bool {
        let previous: usize = self.pending_sections.fetch_sub(1, Ordering::AcqRel);
        assert!(previous > 0, "complete_section(): no section was pending");
        previous == 1
    }

    pub fn attach_ack(&mut self, mut slot: Box<SendSlot>) {
        assert!(self.ack.is_none(), "attach_ack(): buffer already carries a send slot");
        slot.sends += 1;
        self.ack = Some(slot);
    }

    pub fn take_ack(&mut self) -> Option<Box<SendSlot>> {
        self.ack.take()
    }

    pub fn owner(&self) -> Core {
        self.owner
    }

    pub fn source(&self) -> Core {
        self.source
    }

    pub fn destination(&self) -> Core {
        self.destination
    }
}

//======================================================================================================================
// Trait Implementations
//======================================================================================================================

impl Default for BufferCensus {
    fn default() -> Self {
        Self::new()
    }
}

impl IntrusivelyQueueable for RDMABuffer {
    fn get_queue_next(&self) -> Option<NonNull<Self>> {
        self.next.get()
    }

    fn set_queue_next(&self, element: Option<NonNull<Self>>) {
        self.next.set(element);
    }
}

/// The list link is only touched by the core that currently holds the buffer on one of its lists. While sections
/// are delivered on several cores at once, only the pending counter is written.
unsafe impl Send for RDMABuffer {}
unsafe impl Sync for RDMABuffer {}

//======================================================================================================================
// Unit Tests
//======================================================================================================================
