// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! Per-destination pending-message lists.
//!
//! A list head is one atomic word packing a 16-bit count with a 48-bit message pointer, so pushing is a single CAS and
//! draining is a single swap. Whoever swaps a head to empty owns every message that was on it.

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::runtime::{
    limits::PREFETCH_DIST,
    message::MessageBase,
    Core,
    Locale,
    Topology,
};
use ::std::{
    ptr,
    sync::atomic::{
        AtomicBool,
        AtomicU64,
        Ordering,
    },
};

//======================================================================================================================
// Constants
//======================================================================================================================

const POINTER_BITS: u32 = 48;
const POINTER_MASK: u64 = (1 << POINTER_BITS) - 1;

/// Rolling sizes are kept in units of the message alignment so 16 bits cover a whole buffer.
const SIZE_UNIT: usize = 8;

//======================================================================================================================
// Structures
//======================================================================================================================

/// Snapshot of a list head.
#[derive(Clone, Copy, Default, Eq, PartialEq)]
pub struct MessageList(u64);

/// Atomic list head.
pub struct MessageListHead(AtomicU64);

/// Everything the runtime keeps for one (destination core, enqueuing core) pair.
pub struct CoreData {
    messages: MessageListHead,
    /// Ring of {rolling size, message} for the most recent pushes.
    prefetch_queue: [AtomicU64; PREFETCH_DIST],
    last_sent: AtomicU64,
}

/// The lists of one locale: one per (enqueuing local core, destination core), plus one shared by the whole locale per
/// destination core.
pub struct CoreDataTable {
    cores: usize,
    locale_cores: usize,
    entries: Vec<CoreData>,
    /// One per destination locale: set when some core of this locale asks for that locale to be sent to now.
    flush_requests: Vec<AtomicBool>,
}

/// An owned, FIFO run of messages taken off one or more lists.
pub struct MessageChain {
    head: *mut MessageBase,
    tail: *mut MessageBase,
    len: usize,
}

//======================================================================================================================
// Standalone Functions
//======================================================================================================================

/// Hints the CPU to pull `address` into cache.
#[inline]
pub fn prefetch(address: usize) {
    if address == 0 {
        return;
    }
    cfg_if::cfg_if! {
        if #[cfg(target_arch = "x86_64")] {
            // Safety: prefetching never faults, whatever the address.
            unsafe {
                ::std::arch::x86_64::_mm_prefetch::<{ ::std::arch::x86_64::_MM_HINT_T0 }>(address as *const i8)
            }
        }
    }
}

fn pack(high: u16, pointer: *mut MessageBase) -> u64 {
    let address: u64 = pointer as usize as u64;
    assert!(
        address & !POINTER_MASK == 0,
        "pack(): message pointer {:p} does not fit in {} bits",
        pointer,
        POINTER_BITS
    );
    ((high as u64) << POINTER_BITS) | address
}

fn unpack_pointer(word: u64) -> *mut MessageBase {
    (word & POINTER_MASK) as usize as *mut MessageBase
}

fn unpack_high(word: u64) -> u16 {
    (word >> POINTER_BITS) as u16
}

//======================================================================================================================
// Associate Functions
//======================================================================================================================

impl MessageList {
    pub const EMPTY: MessageList = MessageList(0);

    pub fn new(count: u16, head: *mut MessageBase) -> Self {
        Self(pack(count, head))
    }

    /// Number of messages, saturating at `u16::MAX`.
    pub fn count(self) -> u16 {
        unpack_high(self.0)
    }

    pub fn head(self) -> *mut MessageBase {
        unpack_pointer(self.0)
    }

    pub fn is_empty(self) -> bool {
        self.head().is_null()
    }
}

impl MessageListHead {
    pub fn new() -> Self {
        Self(AtomicU64::new(0))
    }

    /// Pushes `message` in front of the list and returns the new head.
    ///
    /// # Safety
    ///
    /// `message` must be live and on no other list.
    pub unsafe fn push(&self, message: *mut MessageBase) -> MessageList {
        let mut current: u64 = self.0.load(Ordering::Acquire);
        loop {
            let old: MessageList = MessageList(current);
            (*message).set_next(old.head());
            let new: MessageList = MessageList::new(old.count().saturating_add(1), message);
            match self
                .0
                .compare_exchange_weak(current, new.0, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => return new,
                Err(actual) => current = actual,
            }
        }
    }

    /// Takes the whole list, leaving it empty.
    pub fn grab(&self) -> MessageList {
        MessageList(self.0.swap(0, Ordering::AcqRel))
    }

    pub fn peek(&self) -> MessageList {
        MessageList(self.0.load(Ordering::Acquire))
    }
}

impl CoreData {
    pub fn new() -> Self {
        Self {
            messages: MessageListHead::new(),
            prefetch_queue: Default::default(),
            last_sent: AtomicU64::new(0),
        }
    }

    /// Pushes `message` and returns the rolling estimate of how many bytes the list would serialize to.
    ///
    /// # Safety
    ///
    /// `message` must be live and on no other list.
    pub unsafe fn push(&self, message: *mut MessageBase) -> usize {
        let size: usize = (*message).serialized_size();
        let mut current: u64 = self.messages.0.load(Ordering::Acquire);
        loop {
            let old: MessageList = MessageList(current);
            let count: u16 = old.count().saturating_add(1);
            let slot: usize = count as usize % PREFETCH_DIST;
            let previous_slot: usize = (slot + PREFETCH_DIST - 1) % PREFETCH_DIST;

            // Chain to the old head; hint at the message pushed a ring-length ago.
            (*message).set_next(old.head());
            (*message).set_prefetch(unpack_pointer(self.prefetch_queue[slot].load(Ordering::Relaxed)) as usize);
            let previous_units: u16 = if old.is_empty() {
                0
            } else {
                unpack_high(self.prefetch_queue[previous_slot].load(Ordering::Relaxed))
            };
            let units: u16 = previous_units.saturating_add(((size + SIZE_UNIT - 1) / SIZE_UNIT) as u16);

            let new: MessageList = MessageList::new(count, message);
            match self
                .messages
                .0
                .compare_exchange_weak(current, new.0, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => {
                    self.prefetch_queue[slot].store(pack(units, message), Ordering::Relaxed);
                    return units as usize * SIZE_UNIT;
                },
                Err(actual) => current = actual,
            }
        }
    }

    pub fn grab(&self) -> MessageList {
        self.messages.grab()
    }

    pub fn pending(&self) -> MessageList {
        self.messages.peek()
    }

    pub fn last_sent(&self) -> u64 {
        self.last_sent.load(Ordering::Acquire)
    }

    pub fn set_last_sent(&self, ts: u64) {
        self.last_sent.store(ts, Ordering::Release);
    }
}

impl CoreDataTable {
    pub fn new(topology: &Topology) -> Self {
        let cores: usize = topology.cores();
        let locale_cores: usize = topology.locale_cores();
        Self {
            cores,
            locale_cores,
            entries: (0..(locale_cores + 1) * cores).map(|_| CoreData::new()).collect(),
            flush_requests: (0..topology.locales()).map(|_| AtomicBool::new(false)).collect(),
        }
    }

    /// List for messages to `destination` enqueued by the local core with index `local_index`.
    pub fn core_data(&self, destination: Core, local_index: usize) -> &CoreData {
        debug_assert!(local_index < self.locale_cores);
        &self.entries[local_index * self.cores + destination as usize]
    }

    /// List for messages to `destination` that any core of the locale may enqueue.
    pub fn locale_core_data(&self, destination: Core) -> &CoreData {
        &self.entries[self.locale_cores * self.cores + destination as usize]
    }

    /// Every list holding messages to `destination`, enqueuing cores first, then the shared one.
    pub fn lists_for(&self, destination: Core) -> impl Iterator<Item = &CoreData> {
        (0..=self.locale_cores).map(move |i| &self.entries[i * self.cores + destination as usize])
    }

    /// Messages sitting on any list of this locale.
    pub fn pending(&self) -> usize {
        self.entries.iter().map(|data| data.pending().count() as usize).sum()
    }

    /// Asks the sender of this locale to ship what is pending for `locale` at its next poll.
    pub fn request_flush(&self, locale: Locale) {
        self.flush_requests[locale as usize].store(true, Ordering::Release);
    }

    pub fn flush_requested(&self, locale: Locale) -> bool {
        self.flush_requests[locale as usize].load(Ordering::Acquire)
    }

    /// Clears the request for `locale`. Returns whether there was one.
    pub fn take_flush_request(&self, locale: Locale) -> bool {
        self.flush_requests[locale as usize].swap(false, Ordering::AcqRel)
    }
}

impl MessageChain {
    pub fn new() -> Self {
        Self {
            head: ptr::null_mut(),
            tail: ptr::null_mut(),
            len: 0,
        }
    }

    /// Takes ownership of a grabbed list, reversing it into enqueue order and pointing every message's prefetch hint
    /// a ring-length ahead.
    ///
    /// # Safety
    ///
    /// `list` must have been grabbed by the caller and not handed to anyone else.
    pub unsafe fn from_list(list: MessageList) -> Self {
        let mut chain: Self = Self::new();
        let mut cursor: *mut MessageBase = list.head();
        let mut reversed: *mut MessageBase = ptr::null_mut();
        if !cursor.is_null() {
            chain.tail = cursor;
        }
        while !cursor.is_null() {
            let next: *mut MessageBase = (*cursor).next();
            (*cursor).set_next(reversed);
            reversed = cursor;
            cursor = next;
            chain.len += 1;
        }
        chain.head = reversed;

        let mut ring: [*mut MessageBase; PREFETCH_DIST] = [ptr::null_mut(); PREFETCH_DIST];
        let mut i: usize = 0;
        let mut cursor: *mut MessageBase = chain.head;
        while !cursor.is_null() {
            let slot: usize = i % PREFETCH_DIST;
            if !ring[slot].is_null() {
                (*ring[slot]).set_prefetch(cursor as usize);
            }
            (*cursor).set_prefetch(0);
            ring[slot] = cursor;
            cursor = (*cursor).next();
            i += 1;
        }
        chain
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.head.is_null()
    }

    pub fn front(&self) -> *mut MessageBase {
        self.head
    }

    /// Links `other` after this chain.
    pub fn append(&mut self, other: MessageChain) {
        if other.is_empty() {
            return;
        }
        if self.is_empty() {
            *self = other;
            return;
        }
        // Safety: the tail is owned by this chain.
        unsafe { (*self.tail).set_next(other.head) };
        self.tail = other.tail;
        self.len += other.len;
    }

    pub fn pop_front(&mut self) -> Option<*mut MessageBase> {
        if self.head.is_null() {
            return None;
        }
        let message: *mut MessageBase = self.head;
        // Safety: the head is owned by this chain.
        unsafe {
            self.head = (*message).next();
            (*message).set_next(ptr::null_mut());
            prefetch((*message).prefetch());
        }
        if self.head.is_null() {
            self.tail = ptr::null_mut();
        }
        self.len -= 1;
        Some(message)
    }
}

//======================================================================================================================
// Trait Implementations
//======================================================================================================================

impl Default for MessageListHead {
    fn default() -> Self {
        Self::new()
    }
}

impl Default for CoreData {
    fn default() -> Self {
        Self::new()
    }
}

impl Default for MessageChain {
    fn default() -> Self {
        Self::new()
    }
}

impl ::std::fmt::Debug for MessageList {
    fn fmt(&self, f: &mut ::std::fmt::Formatter<'_>) -> ::std::fmt::Result {
        write!(f, "MessageList {{ count: {}, head: {:p} }}", self.count(), self.head())
    }
}

//======================================================================================================================
// Unit Tests
//======================================================================================================================
