// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! Active messages: a destination core plus a closure to run there.
//!
//! Every message starts with a [MessageBase], which links it into the aggregator's per-destination lists and
//! dispatches through a static table of type-specific operations. On the wire a message is a 16-byte header (address
//! of a monomorphic deserializer, body length, source core, two reserved bytes) followed by the closure's bytes,
//! padded to 8. Deserializer addresses only make sense between cores running the same program image.

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::runtime::{
    collections::intrusive::IntrusivelyQueueable,
    context,
    limits::{
        MAX_MESSAGE_BODY,
        MESSAGE_ALIGNMENT,
        MESSAGE_HEADER_BYTES,
    },
    memory::ReuseList,
    Core,
};
use ::std::{
    cell::Cell,
    mem::{
        self,
        MaybeUninit,
    },
    ptr::{
        self,
        NonNull,
    },
    rc::Rc,
    sync::atomic::{
        AtomicU8,
        Ordering,
    },
};

//======================================================================================================================
// Structures
//======================================================================================================================

#[derive(Clone, Copy, Debug, Eq, PartialEq, PartialOrd, Ord)]
#[repr(u8)]
pub enum MessageState {
    Unsent = 0,
    Enqueued = 1,
    Sent = 2,
    Delivered = 3,
}

/// Type-specific operations of a message.
pub struct MessageVTable {
    /// Bytes the message takes on the wire, header included.
    pub serialized_size: unsafe fn(*const MessageBase) -> usize,
    /// Writes the wire entry into the given space and returns its length.
    pub serialize_to: unsafe fn(*const MessageBase, &mut [MaybeUninit<u8>]) -> usize,
    /// Runs the closure on the calling core and releases the message. Returns how many messages were delivered.
    pub deliver_locally: unsafe fn(*mut MessageBase) -> usize,
    /// Releases a message whose bytes have been copied out.
    pub mark_sent: unsafe fn(*mut MessageBase),
    /// Takes back a message returned to its home core.
    pub recycle: unsafe fn(*mut MessageBase),
}

/// Common head of every message. Messages are handed to the aggregator as raw pointers to this head.
#[repr(C)]
pub struct MessageBase {
    next: Cell<*mut MessageBase>,
    prefetch: Cell<usize>,
    source: Cell<Core>,
    destination: Cell<Core>,
    state: AtomicU8,
    vtable: &'static MessageVTable,
}

/// A one-shot heap message. The runtime owns it from enqueue on and frees it once it is sent or delivered.
#[repr(C)]
pub struct Message<T: FnOnce() + Copy + Send + 'static> {
    base: MessageBase,
    body: T,
}

/// A message that goes back to its home core's pool once sent, instead of being freed.
#[repr(C)]
pub struct ReuseMessage<T: FnOnce() + Copy + Send + 'static> {
    base: MessageBase,
    body: Cell<Option<T>>,
    pool_next: Cell<Option<NonNull<ReuseMessage<T>>>>,
    home: Core,
    pool: *const ReusePoolInner<T>,
}

struct ReusePoolInner<T: FnOnce() + Copy + Send + 'static> {
    free: ReuseList<ReuseMessage<T>>,
    outstanding: Cell<usize>,
    total: usize,
}

/// Per-core pool of reusable messages. Sending blocks while every message is out, which bounds how much one sender
/// can have in flight.
pub struct ReuseMessagePool<T: FnOnce() + Copy + Send + 'static> {
    inner: Rc<ReusePoolInner<T>>,
}

//======================================================================================================================
// Standalone Functions
//======================================================================================================================

/// Wire length of a message with a body of `body` bytes.
pub const fn entry_len(body: usize) -> usize {
    MESSAGE_HEADER_BYTES + ((body + MESSAGE_ALIGNMENT - 1) & !(MESSAGE_ALIGNMENT - 1))
}

/// Reads a `T` from the wire and calls it.
unsafe fn deserialize_and_call<T: FnOnce() + Copy + Send + 'static>(body: *const u8) {
    let closure: T = ptr::read_unaligned(body as *const T);
    closure();
}

/// Writes one wire entry for `body`.
unsafe fn write_entry<T: FnOnce() + Copy + Send + 'static>(
    out: &mut [MaybeUninit<u8>],
    source: Core,
    body: &T,
) -> usize {
    let len: usize = entry_len(mem::size_of::<T>());
    assert!(out.len() >= len, "write_entry(): {} bytes do not fit in {}", len, out.len());
    let base: *mut u8 = out.as_mut_ptr() as *mut u8;
    let deserializer: unsafe fn(*const u8) = deserialize_and_call::<T>;
    ptr::write_unaligned(base as *mut u64, deserializer as usize as u64);
    ptr::write_unaligned(base.add(8) as *mut u32, mem::size_of::<T>() as u32);
    ptr::write_unaligned(base.add(12) as *mut u16, source);
    ptr::write_unaligned(base.add(14) as *mut u16, 0);
    ptr::copy_nonoverlapping(body as *const T as *const u8, base.add(MESSAGE_HEADER_BYTES), mem::size_of::<T>());
    len
}

/// Runs every message serialized in `bytes`, in order. Returns how many ran.
///
/// # Safety
///
/// `bytes` must hold whole entries written by this program image.
pub unsafe fn deliver_entries(bytes: &[MaybeUninit<u8>]) -> usize {
    let mut offset: usize = 0;
    let mut delivered: usize = 0;
    while offset < bytes.len() {
        assert!(
            bytes.len() - offset >= MESSAGE_HEADER_BYTES,
            "deliver_entries(): truncated header at {}",
            offset
        );
        let entry: *const u8 = bytes.as_ptr().add(offset) as *const u8;
        let address: u64 = ptr::read_unaligned(entry as *const u64);
        let body_len: usize = ptr::read_unaligned(entry.add(8) as *const u32) as usize;
        let len: usize = entry_len(body_len);
        assert!(bytes.len() - offset >= len, "deliver_entries(): truncated body at {}", offset);
        let deserializer: unsafe fn(*const u8) = mem::transmute::<usize, unsafe fn(*const u8)>(address as usize);
        deserializer(entry.add(MESSAGE_HEADER_BYTES));
        offset += len;
        delivered += 1;
    }
    delivered
}

/// Source core of the entry at the start of `bytes`.
pub fn entry_source(bytes: &[MaybeUninit<u8>]) -> Option<Core> {
    if bytes.len() < MESSAGE_HEADER_BYTES {
        return None;
    }
    // Safety: the header is in bounds.
    Some(unsafe { ptr::read_unaligned(bytes.as_ptr().add(12) as *const u16) })
}

//======================================================================================================================
// Associate Functions
//======================================================================================================================

impl MessageState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => MessageState::Unsent,
            1 => MessageState::Enqueued,
            2 => MessageState::Sent,
            _ => MessageState::Delivered,
        }
    }
}

impl MessageBase {
    pub(crate) fn new(destination: Core, vtable: &'static MessageVTable) -> Self {
        Self {
            next: Cell::new(ptr::null_mut()),
            prefetch: Cell::new(0),
            source: Cell::new(0),
            destination: Cell::new(destination),
            state: AtomicU8::new(MessageState::Unsent as u8),
            vtable,
        }
    }

    pub fn source(&self) -> Core {
        self.source.get()
    }

    pub fn destination(&self) -> Core {
        self.destination.get()
    }

    pub fn state(&self) -> MessageState {
        MessageState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Moves the message forward in its lifecycle. Going backwards is a fatal error.
    pub fn advance(&self, state: MessageState) {
        let previous: MessageState = MessageState::from_u8(self.state.swap(state as u8, Ordering::AcqRel));
        assert!(
            previous < state,
            "advance(): message to core {} went from {:?} to {:?}",
            self.destination(),
            previous,
            state
        );
    }

    /// Stamps the sender and marks the message enqueued.
    pub fn set_enqueued(&self, source: Core) {
        self.source.set(source);
        self.advance(MessageState::Enqueued);
    }

    pub fn next(&self) -> *mut MessageBase {
        self.next.get()
    }

    pub fn set_next(&self, next: *mut MessageBase) {
        self.next.set(next);
    }

    /// Address of a message a few links further down the list, for prefetching.
    pub fn prefetch(&self) -> usize {
        self.prefetch.get()
    }

    pub fn set_prefetch(&self, hint: usize) {
        self.prefetch.set(hint);
    }

    pub fn serialized_size(&self) -> usize {
        // Safety: the table matches the concrete type this head is embedded in.
        unsafe { (self.vtable.serialized_size)(self) }
    }

    pub fn serialize_to(&self, out: &mut [MaybeUninit<u8>]) -> usize {
        // Safety: the table matches the concrete type this head is embedded in.
        unsafe { (self.vtable.serialize_to)(self, out) }
    }

    /// # Safety
    ///
    /// `this` must be a live message owned by the caller. It may be freed on return.
    pub unsafe fn deliver_locally(this: *mut MessageBase) -> usize {
        ((*this).vtable.deliver_locally)(this)
    }

    /// # Safety
    ///
    /// `this` must be a live message owned by the caller. It may be freed on return.
    pub unsafe fn mark_sent(this: *mut MessageBase) {
        ((*this).vtable.mark_sent)(this)
    }

    /// # Safety
    ///
    /// `this` must be a sent message whose home is the calling core.
    pub unsafe fn recycle(this: *mut MessageBase) {
        ((*this).vtable.recycle)(this)
    }
}

impl<T: FnOnce() + Copy + Send + 'static> Message<T> {
    const VTABLE: &'static MessageVTable = &MessageVTable {
        serialized_size: Self::serialized_size,
        serialize_to: Self::serialize_to,
        deliver_locally: Self::deliver_locally,
        mark_sent: Self::mark_sent,
        recycle: Self::recycle,
    };

    /// Builds a message. Bodies larger than [MAX_MESSAGE_BODY] are a fatal error.
    pub fn new(destination: Core, body: T) -> Box<Self> {
        assert!(
            mem::size_of::<T>() <= MAX_MESSAGE_BODY,
            "new(): message body of {} bytes exceeds {}",
            mem::size_of::<T>(),
            MAX_MESSAGE_BODY
        );
        Box::new(Self {
            base: MessageBase::new(destination, Self::VTABLE),
            body,
        })
    }

    pub fn base(&self) -> &MessageBase {
        &self.base
    }

    /// Hands the message to the runtime.
    pub fn into_raw(self: Box<Self>) -> *mut MessageBase {
        Box::into_raw(self) as *mut MessageBase
    }

    /// Aggregates the message towards its destination core. Returns true when the caller should yield soon.
    pub fn enqueue(self: Box<Self>) -> bool {
        context::enqueue_message(self.into_raw(), false)
    }

    /// Aggregates the message on the list shared by the destination's whole locale.
    pub fn locale_enqueue(self: Box<Self>) -> bool {
        context::enqueue_message(self.into_raw(), true)
    }

    unsafe fn serialized_size(_this: *const MessageBase) -> usize {
        entry_len(mem::size_of::<T>())
    }

    unsafe fn serialize_to(this: *const MessageBase, out: &mut [MaybeUninit<u8>]) -> usize {
        let this: *const Self = this as *const Self;
        write_entry(out, (*this).base.source(), &(*this).body)
    }

    unsafe fn deliver_locally(this: *mut MessageBase) -> usize {
        let message: Box<Self> = Box::from_raw(this as *mut Self);
        message.base.advance(MessageState::Delivered);
        let body: T = message.body;
        drop(message);
        body();
        1
    }

    unsafe fn mark_sent(this: *mut MessageBase) {
        let message: Box<Self> = Box::from_raw(this as *mut Self);
        message.base.advance(MessageState::Sent);
    }

    unsafe fn recycle(_this: *mut MessageBase) {
        panic!("recycle(): one-shot messages have no home pool");
    }
}

impl<T: FnOnce() + Copy + Send + 'static> ReuseMessage<T> {
    const VTABLE: &'static MessageVTable = &MessageVTable {
        serialized_size: Self::serialized_size,
        serialize_to: Self::serialize_to,
        deliver_locally: Self::deliver_locally,
        mark_sent: Self::mark_sent,
        recycle: Self::recycle,
    };

    fn new(home: Core, pool: *const ReusePoolInner<T>) -> Box<Self> {
        assert!(
            mem::size_of::<T>() <= MAX_MESSAGE_BODY,
            "new(): message body of {} bytes exceeds {}",
            mem::size_of::<T>(),
            MAX_MESSAGE_BODY
        );
        Box::new(Self {
            base: MessageBase::new(home, Self::VTABLE),
            body: Cell::new(None),
            pool_next: Cell::new(None),
            home,
            pool,
        })
    }

    fn prepare(&self, destination: Core, body: T) {
        self.base.destination.set(destination);
        self.base.state.store(MessageState::Unsent as u8, Ordering::Release);
        self.base.next.set(ptr::null_mut());
        self.body.set(Some(body));
    }

    fn body(&self) -> T {
        match self.body.get() {
            Some(body) => body,
            None => panic!("body(): message was never prepared"),
        }
    }

    /// Sends the message home, or straight back into its pool when already there.
    unsafe fn release(this: *mut Self) {
        let home: Core = (*this).home;
        if context::mycore() == home {
            Self::recycle(this as *mut MessageBase);
        } else {
            context::return_message(home, this as *mut MessageBase);
        }
    }

    unsafe fn serialized_size(_this: *const MessageBase) -> usize {
        entry_len(mem::size_of::<T>())
    }

    unsafe fn serialize_to(this: *const MessageBase, out: &mut [MaybeUninit<u8>]) -> usize {
        let this: *const Self = this as *const Self;
        write_entry(out, (*this).base.source(), &(*this).body())
    }

    unsafe fn deliver_locally(this: *mut MessageBase) -> usize {
        let message: *mut Self = this as *mut Self;
        let body: T = (*message).body();
        (*message).base.advance(MessageState::Delivered);
        Self::release(message);
        body();
        1
    }

    unsafe fn mark_sent(this: *mut MessageBase) {
        let message: *mut Self = this as *mut Self;
        (*message).base.advance(MessageState::Sent);
        Self::release(message);
    }

    unsafe fn recycle(this: *mut MessageBase) {
        let message: Box<Self> = Box::from_raw(this as *mut Self);
        let pool: &ReusePoolInner<T> = &*message.pool;
        message.body.set(None);
        pool.outstanding.set(pool.outstanding.get() - 1);
        pool.free.push(message);
    }
}

impl<T: FnOnce() + Copy + Send + 'static> ReuseMessagePool<T> {
    /// Creates `count` messages whose home is `home`. The pool must only be used on that core.
    pub fn new(home: Core, count: usize) -> Self {
        let inner: Rc<ReusePoolInner<T>> = Rc::new(ReusePoolInner {
            free: ReuseList::new(),
            outstanding: Cell::new(0),
            total: count,
        });
        for _ in 0..count {
            inner.free.push(ReuseMessage::new(home, Rc::as_ptr(&inner)));
        }
        Self { inner }
    }

    /// Creates `count` messages on the calling core.
    pub fn local(count: usize) -> Self {
        Self::new(context::mycore(), count)
    }

    /// Sends `body` to `destination`, waiting for a message to come back if all of them are out.
    pub async fn send(&self, destination: Core, body: T) -> bool {
        let message: Box<ReuseMessage<T>> = self.inner.free.block_until_pop().await;
        self.dispatch(message, destination, body)
    }

    /// Sends `body` to `destination` if a message is available.
    pub fn try_send(&self, destination: Core, body: T) -> Option<bool> {
        let message: Box<ReuseMessage<T>> = self.inner.free.try_pop()?;
        Some(self.dispatch(message, destination, body))
    }

    fn dispatch(&self, message: Box<ReuseMessage<T>>, destination: Core, body: T) -> bool {
        message.prepare(destination, body);
        self.inner.outstanding.set(self.inner.outstanding.get() + 1);
        context::enqueue_message(Box::into_raw(message) as *mut MessageBase, false)
    }

    pub fn available(&self) -> usize {
        self.inner.free.len()
    }

    pub fn outstanding(&self) -> usize {
        self.inner.outstanding.get()
    }

    pub fn total(&self) -> usize {
        self.inner.total
    }

    /// Waits until every message is back in the pool.
    pub async fn drain(&self) {
        while self.outstanding() > 0 {
            crate::runtime::scheduler::thread_yield().await;
        }
    }
}

//======================================================================================================================
// Trait Implementations
//======================================================================================================================

impl<T: FnOnce() + Copy + Send + 'static> IntrusivelyQueueable for ReuseMessage<T> {
    fn get_queue_next(&self) -> Option<NonNull<Self>> {
        self.pool_next.get()
    }

    fn set_queue_next(&self, element: Option<NonNull<Self>>) {
        self.pool_next.set(element);
    }
}

impl<T: FnOnce() + Copy + Send + 'static> Drop for ReuseMessagePool<T> {
    fn drop(&mut self) {
        let outstanding: usize = self.outstanding();
        if outstanding > 0 {
            // Messages still in flight point at the pool, so it must outlive them.
            warn!("drop(): {} messages are still outstanding, leaking their pool", outstanding);
            mem::forget(self.inner.clone());
        }
    }
}

//======================================================================================================================
// Unit Tests
//======================================================================================================================
