// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! Active message aggregation.
//!
//! Enqueuing a message pushes it on a lock-free list keyed by its destination core. Messages between cores of one
//! locale are picked up by the destination itself. Messages for another locale L are drained by the one core of this
//! locale that sends to L, serialized into a buffer with one section per core of L, and shipped to the one core of L
//! that receives from this locale. That core delivers its own section and forwards every other section to its target
//! core. The buffer returns to its owner once every section has been delivered.

//======================================================================================================================
// Exports
//======================================================================================================================

pub mod core_data;
pub mod stats;

pub use self::{
    core_data::{
        CoreData,
        CoreDataTable,
        MessageChain,
        MessageList,
        MessageListHead,
    },
    stats::{
        AggregatorSnapshot,
        AggregatorStats,
    },
};

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::{
    pgas::config::RuntimeConfig,
    runtime::{
        condition_variable::ConditionVariable,
        context::RuntimeShared,
        limits::{
            MAX_IN_FLIGHT_PER_LOCALE,
            YIELD_WAIT,
        },
        memory::{
            BufferState,
            RDMABuffer,
            ReuseList,
            ReusePool,
            SendSlot,
        },
        message::{
            deliver_entries,
            MessageBase,
            MessageState,
            MessageVTable,
        },
        network::{
            Arrival,
            Communicator,
            SendContext,
        },
        scheduler::{
            thread_yield,
            thread_yield_periodic,
            TaskingScheduler,
        },
        timer::TickClock,
        Core,
        Locale,
        Topology,
    },
};
use ::bit_iter::BitIter;
use ::futures::FutureExt;
use ::std::{
    cell::Cell,
    mem::{
        self,
        MaybeUninit,
    },
    rc::Rc,
    sync::Arc,
};

//======================================================================================================================
// Structures
//======================================================================================================================

/// Core-local message aggregator.
pub struct RDMAAggregator {
    shared: Arc<RuntimeShared>,
    mycore: Core,
    mylocale: Locale,
    local_index: usize,
    clock: Rc<TickClock>,
    target_size: usize,
    size_flush: bool,
    autoflush_ticks: u64,
    enable_aggregation: bool,
    flush_on_idle: bool,
    free_buffers: ReuseList<RDMABuffer>,
    received_buffers: ReuseList<RDMABuffer>,
    flush_cv: ConditionVariable,
    /// One per locale; only those this core sends to have a Worker waiting.
    send_cvs: Vec<ConditionVariable>,
    in_flight_slots: Vec<ReusePool<SendSlot, MAX_IN_FLIGHT_PER_LOCALE>>,
    enqueue_counter: Cell<u32>,
    shutting_down: Cell<bool>,
}

/// A section of a received buffer, forwarded to the core it is for.
#[repr(C)]
struct SectionMessage {
    base: MessageBase,
    shared: Arc<RuntimeShared>,
    buffer: *mut RDMABuffer,
    index: usize,
}

//======================================================================================================================
// Standalone Functions
//======================================================================================================================

/// Runs the messages of section `index` and returns the buffer to its owner after its last section.
///
/// # Safety
///
/// `buffer` must come from [Box::into_raw] on a buffer whose pending count includes this section.
unsafe fn deliver_section(shared: &RuntimeShared, buffer: *mut RDMABuffer, index: usize) -> usize {
    let delivered: usize = deliver_entries((*buffer).section(index));
    if (*buffer).complete_section() {
        let buffer: Box<RDMABuffer> = Box::from_raw(buffer);
        trace!(
            "deliver_section(): buffer of core {} fully delivered",
            buffer.owner()
        );
        shared.census.transition(BufferState::Delivering, BufferState::Returning);
        shared.communicator.return_buffer(buffer);
    }
    delivered
}

//======================================================================================================================
// Associate Functions
//======================================================================================================================

impl SectionMessage {
    const VTABLE: &'static MessageVTable = &MessageVTable {
        serialized_size: Self::serialized_size,
        serialize_to: Self::serialize_to,
        deliver_locally: Self::deliver_locally,
        mark_sent: Self::mark_sent,
        recycle: Self::recycle,
    };

    fn new(destination: Core, shared: Arc<RuntimeShared>, buffer: *mut RDMABuffer, index: usize) -> Box<Self> {
        Box::new(Self {
            base: MessageBase::new(destination, Self::VTABLE),
            shared,
            buffer,
            index,
        })
    }

    unsafe fn serialized_size(this: *const MessageBase) -> usize {
        let this: *const Self = this as *const Self;
        (*(*this).buffer).section_len((*this).index)
    }

    unsafe fn serialize_to(_this: *const MessageBase, _out: &mut [MaybeUninit<u8>]) -> usize {
        panic!("serialize_to(): forwarded sections never leave their locale");
    }

    unsafe fn deliver_locally(this: *mut MessageBase) -> usize {
        let message: Box<Self> = Box::from_raw(this as *mut Self);
        message.base.advance(MessageState::Delivered);
        deliver_section(&message.shared, message.buffer, message.index)
    }

    unsafe fn mark_sent(_this: *mut MessageBase) {
        panic!("mark_sent(): forwarded sections are never serialized");
    }

    unsafe fn recycle(_this: *mut MessageBase) {
        panic!("recycle(): forwarded sections have no home pool");
    }
}

impl RDMAAggregator {
    pub fn new(shared: Arc<RuntimeShared>, mycore: Core, clock: Rc<TickClock>) -> Rc<Self> {
        let topology: Topology = shared.topology;
        let config: &RuntimeConfig = &shared.config;
        let mylocale: Locale = topology.locale_of(mycore);

        let free_buffers: ReuseList<RDMABuffer> = ReuseList::new();
        for _ in 0..config.rdma_buffers {
            free_buffers.push(RDMABuffer::new(mycore, config.buffer_size));
        }
        shared.census.allocate(config.rdma_buffers);

        let in_flight_slots: Vec<ReusePool<SendSlot, MAX_IN_FLIGHT_PER_LOCALE>> = (0..topology.locales())
            .map(|locale| {
                let pool: ReusePool<SendSlot, MAX_IN_FLIGHT_PER_LOCALE> = ReusePool::new();
                if locale != mylocale as usize {
                    for _ in 0..config.in_flight_per_locale {
                        pool.push(SendSlot::new(locale as Locale));
                    }
                }
                pool
            })
            .collect();

        Rc::new(Self {
            mycore,
            mylocale,
            local_index: topology.local_index(mycore),
            clock,
            target_size: config.target_size,
            size_flush: config.size_flush,
            autoflush_ticks: config.autoflush_ticks,
            enable_aggregation: config.enable_aggregation,
            flush_on_idle: config.flush_on_idle,
            free_buffers,
            received_buffers: ReuseList::new(),
            flush_cv: ConditionVariable::new(),
            send_cvs: (0..topology.locales()).map(|_| ConditionVariable::new()).collect(),
            in_flight_slots,
            enqueue_counter: Cell::new(0),
            shutting_down: Cell::new(false),
            shared,
        })
    }

    fn topology(&self) -> &Topology {
        &self.shared.topology
    }

    fn stats(&self) -> &AggregatorStats {
        &self.shared.stats[self.mycore as usize]
    }

    /// Lists of this core's locale.
    fn table(&self) -> &CoreDataTable {
        &self.shared.core_data[self.mylocale as usize]
    }

    /// Locales this core drains and ships messages to.
    fn sending_locales(&self) -> impl Iterator<Item = Locale> + '_ {
        (0..self.topology().locales() as Locale).filter(move |locale| {
            *locale != self.mylocale && self.topology().sender_for(self.mylocale, *locale) == self.mycore
        })
    }

    //==================================================================================================================
    // Enqueue
    //==================================================================================================================

    /// Takes ownership of `message` and queues it towards its destination. `locale_enqueue` puts it on the list the
    /// destination's whole locale shares instead of this core's own. Returns true when the caller should yield.
    ///
    /// # Safety
    ///
    /// `message` must be a live, unsent message that nobody else holds.
    pub unsafe fn enqueue(&self, message: *mut MessageBase, locale_enqueue: bool) -> bool {
        let destination: Core = (*message).destination();
        assert!(
            (destination as usize) < self.topology().cores(),
            "enqueue(): no core {} in a run of {}",
            destination,
            self.topology().cores()
        );
        (*message).set_enqueued(self.mycore);
        self.stats().record_enqueue();
        trace!("enqueue(): core {} -> core {}", self.mycore, destination);

        let remote: bool = self.topology().locale_of(destination) != self.mylocale;
        if remote && !self.enable_aggregation && self.send_immediate(message) {
            return self.yield_hint();
        }

        let data: &CoreData = if locale_enqueue {
            self.table().locale_core_data(destination)
        } else {
            self.table().core_data(destination, self.local_index)
        };
        let pending: usize = data.push(message);
        if self.size_flush && pending >= self.target_size {
            self.flush(destination);
        }
        self.yield_hint()
    }

    fn yield_hint(&self) -> bool {
        let count: u32 = self.enqueue_counter.get().wrapping_add(1);
        self.enqueue_counter.set(count);
        count % YIELD_WAIT == 0
    }

    /// Ships one message in a send context of its own. Returns false, leaving the message untouched, when no context
    /// is free or the message does not fit one.
    unsafe fn send_immediate(&self, message: *mut MessageBase) -> bool {
        let communicator: &Arc<dyn Communicator> = &self.shared.communicator;
        let mut context: SendContext = match communicator.try_get_send_context(self.mycore) {
            Some(context) => context,
            None => return false,
        };
        if (*message).serialized_size() > context.capacity() {
            communicator.release_send_context(context);
            return false;
        }
        context.prepare((*message).destination());
        let written: usize = (*message).serialize_to(context.tail());
        context.commit(written);
        MessageBase::mark_sent(message);
        communicator.post_send(context);
        self.stats().record_immediate();
        self.stats().record_serialized(written);
        true
    }

    /// Asks for messages to `core` to go out soon.
    pub fn flush(&self, core: Core) {
        let locale: Locale = self.topology().locale_of(core);
        if locale == self.mylocale {
            // The destination picks them up at its next poll.
            return;
        }
        if self.topology().sender_for(self.mylocale, locale) == self.mycore {
            self.send_cvs[locale as usize].signal();
        } else {
            // The designated sender honors the request at its next poll.
            self.table().request_flush(locale);
        }
    }

    //==================================================================================================================
    // Send Path
    //==================================================================================================================

    /// Drains every list bound for `locale` and ships the messages in as many buffers as they take.
    async fn send_locale(&self, locale: Locale) {
        self.stats().record_flush();
        let topology: Topology = *self.topology();
        let receiver: Core = topology.receiver_for(self.mylocale, locale);
        let now: u64 = self.clock.tick();
        // Everything pushed before a pending request is drained below.
        self.table().take_flush_request(locale);

        let mut sections: Vec<MessageChain> = Vec::with_capacity(topology.locale_cores());
        for destination in topology.cores_of(locale) {
            self.table().locale_core_data(destination).set_last_sent(now);
            let mut chain: MessageChain = MessageChain::new();
            for data in self.table().lists_for(destination) {
                // Safety: the lists for this locale are only drained here.
                chain.append(unsafe { MessageChain::from_list(data.grab()) });
            }
            sections.push(chain);
        }
        let messages: usize = sections.iter().map(MessageChain::len).sum();
        if messages == 0 {
            return;
        }
        debug!(
            "send_locale(): core {} ships {} messages to locale {}",
            self.mycore, messages, locale
        );

        let mut index: usize = 0;
        loop {
            while index < sections.len() && sections[index].is_empty() {
                index += 1;
            }
            if index == sections.len() {
                break;
            }
            let mut buffer: Box<RDMABuffer> = self.acquire_buffer(locale, receiver).await;
            while index < sections.len() {
                buffer.begin_section(index);
                self.aggregate_to_buffer(&mut buffer, &mut sections[index]);
                if !sections[index].is_empty() {
                    // Full.
                    break;
                }
                index += 1;
            }
            self.send_rdma(buffer);
        }
    }

    /// Takes an in-flight slot for `locale` and a free buffer, waiting for either as needed.
    async fn acquire_buffer(&self, locale: Locale, receiver: Core) -> Box<RDMABuffer> {
        let slot: Box<SendSlot> = self.in_flight_slots[locale as usize].block_until_pop().await;
        let mut buffer: Box<RDMABuffer> = self.free_buffers.block_until_pop().await;
        self.shared.census.transition(BufferState::Free, BufferState::Filling);
        buffer.reset(receiver, self.topology().locale_cores());
        buffer.attach_ack(slot);
        buffer
    }

    /// Serializes messages off the front of `chain` into the current section until the buffer is full.
    fn aggregate_to_buffer(&self, buffer: &mut RDMABuffer, chain: &mut MessageChain) {
        while !chain.is_empty() {
            let message: *mut MessageBase = chain.front();
            // Safety: the chain owns its messages.
            let size: usize = unsafe { (*message).serialized_size() };
            if size > buffer.remaining() {
                assert!(
                    !buffer.is_empty(),
                    "aggregate_to_buffer(): a {} byte message does not fit an empty buffer of {}",
                    size,
                    buffer.capacity()
                );
                return;
            }
            if let Some(message) = chain.pop_front() {
                unsafe {
                    let written: usize = (*message).serialize_to(buffer.tail());
                    buffer.commit(written);
                    MessageBase::mark_sent(message);
                    self.stats().record_serialized(written);
                }
            }
        }
    }

    fn send_rdma(&self, buffer: Box<RDMABuffer>) {
        self.shared.census.transition(BufferState::Filling, BufferState::InFlight);
        self.stats().record_buffer_sent();
        trace!(
            "send_rdma(): {} bytes from core {} to core {}",
            buffer.used(),
            self.mycore,
            buffer.destination()
        );
        self.shared.communicator.post_buffer(buffer);
    }

    /// Whether some destination in `locale` has pending messages and was last sent to more than `timeout` ago.
    fn check_for_work_on(&self, locale: Locale, now: u64, timeout: u64) -> bool {
        self.topology().cores_of(locale).any(|destination| {
            let last_sent: u64 = self.table().locale_core_data(destination).last_sent();
            now.saturating_sub(last_sent) > timeout
                && self
                    .table()
                    .lists_for(destination)
                    .any(|data| !data.pending().is_empty())
        })
    }

    //==================================================================================================================
    // Receive Path
    //==================================================================================================================

    fn handle_arrival(&self, arrival: Arrival) {
        match arrival {
            Arrival::Buffer(buffer) => {
                self.shared.census.transition(BufferState::InFlight, BufferState::Received);
                self.received_buffers.push(buffer);
            },
            Arrival::Returned(mut buffer) => {
                self.shared.census.transition(BufferState::Returning, BufferState::Free);
                if let Some(slot) = buffer.take_ack() {
                    self.in_flight_slots[slot.locale() as usize].push(slot);
                }
                self.free_buffers.push(buffer);
            },
            Arrival::Immediate(context) => {
                // Safety: contexts carry whole entries written by this program.
                let delivered: usize = unsafe { deliver_entries(context.payload()) };
                self.stats().record_delivered(delivered);
                self.shared.communicator.release_send_context(context);
            },
        }
    }

    /// Delivers this core's section of `buffer` and forwards the others to their cores.
    fn receive_buffer(&self, buffer: Box<RDMABuffer>) {
        self.shared.census.transition(BufferState::Received, BufferState::Delivering);
        self.stats().record_buffer_received();
        let mask: u64 = buffer.sections_mask();
        if mask == 0 {
            self.shared.census.transition(BufferState::Delivering, BufferState::Returning);
            self.shared.communicator.return_buffer(buffer);
            return;
        }
        buffer.set_pending(mask.count_ones() as usize);
        let raw: *mut RDMABuffer = Box::into_raw(buffer);
        let first: Core = self.topology().first_core(self.mylocale);

        for index in BitIter::from(mask).filter(|index| *index != self.local_index) {
            let destination: Core = first + index as Core;
            let section: Box<SectionMessage> = SectionMessage::new(destination, self.shared.clone(), raw, index);
            section.base.set_enqueued(self.mycore);
            // Safety: the section message is fresh and owned by nobody else.
            unsafe {
                self.table()
                    .core_data(destination, self.local_index)
                    .push(Box::into_raw(section) as *mut MessageBase)
            };
        }
        if mask & (1 << self.local_index) != 0 {
            // Safety: this section is still pending, so the buffer is alive.
            let delivered: usize = unsafe { deliver_section(&self.shared, raw, self.local_index) };
            self.stats().record_delivered(delivered);
        }
    }

    /// Takes back returned messages and delivers everything queued for this core. Returns how much it handled.
    fn receive_poll(&self) -> usize {
        let mut handled: usize = 0;
        // Safety: only this core drains its returned list.
        let mut returned: MessageChain =
            unsafe { MessageChain::from_list(self.shared.returned[self.mycore as usize].grab()) };
        while let Some(message) = returned.pop_front() {
            unsafe { MessageBase::recycle(message) };
            handled += 1;
        }

        let mut chain: MessageChain = MessageChain::new();
        for data in self.table().lists_for(self.mycore) {
            // Safety: only this core drains the lists bound for it.
            chain.append(unsafe { MessageChain::from_list(data.grab()) });
        }
        let mut delivered: usize = 0;
        while let Some(message) = chain.pop_front() {
            delivered += unsafe { MessageBase::deliver_locally(message) };
        }
        if delivered > 0 {
            self.stats().record_delivered(delivered);
        }
        handled + delivered
    }

    /// Wakes the send Worker of every locale that has overdue messages or a flush request. Returns whether it woke
    /// any.
    fn send_poll(&self) -> bool {
        let now: u64 = self.clock.now();
        let mut woken: bool = false;
        for locale in self.sending_locales() {
            if self.table().flush_requested(locale) || self.check_for_work_on(locale, now, self.autoflush_ticks) {
                woken |= self.send_cvs[locale as usize].signal();
            }
        }
        woken
    }

    /// One round of communication: arrivals, local delivery, send timeouts. Returns whether it did anything.
    pub fn poll(&self) -> bool {
        self.clock.tick();
        let arrived: usize = self.shared.communicator.poll(self.mycore, &mut |arrival| self.handle_arrival(arrival));
        let handled: usize = self.receive_poll();
        let woken: bool = self.send_poll();
        arrived > 0 || handled > 0 || woken
    }

    /// Idle hook: wakes the idle flusher when there is anything bound for another locale.
    pub fn idle_flush(&self) -> bool {
        if !self.flush_on_idle || self.shutting_down.get() || !self.flush_cv.has_waiters() {
            return false;
        }
        let now: u64 = self.clock.now();
        let pending: bool = (0..self.topology().locales() as Locale)
            .filter(|locale| *locale != self.mylocale)
            .any(|locale| self.check_for_work_on(locale, now, 0));
        pending && self.flush_cv.signal()
    }

    /// Sends everything pending for other locales right away.
    fn flush_all(&self) {
        let now: u64 = self.clock.tick();
        for locale in 0..self.topology().locales() as Locale {
            if locale == self.mylocale || !self.check_for_work_on(locale, now, 0) {
                continue;
            }
            if self.topology().sender_for(self.mylocale, locale) == self.mycore {
                self.send_cvs[locale as usize].signal();
            } else {
                self.table().request_flush(locale);
            }
        }
    }

    //==================================================================================================================
    // Workers
    //==================================================================================================================

    /// Spawns the message system Workers of this core.
    pub fn spawn_workers(self: &Rc<Self>, scheduler: &TaskingScheduler) {
        let this: Rc<Self> = self.clone();
        scheduler.spawn_periodic(
            "aggregator-poller",
            async move {
                while !this.shutting_down.get() {
                    this.poll();
                    thread_yield_periodic().await;
                }
            }
            .boxed_local(),
        );

        let this: Rc<Self> = self.clone();
        scheduler.spawn(
            "aggregator-receiver",
            async move {
                loop {
                    this.received_buffers.wait_nonempty().await;
                    if this.shutting_down.get() {
                        break;
                    }
                    while let Some(buffer) = this.received_buffers.try_pop() {
                        this.receive_buffer(buffer);
                        thread_yield().await;
                    }
                }
            }
            .boxed_local(),
        );

        let this: Rc<Self> = self.clone();
        scheduler.spawn(
            "aggregator-idle-flusher",
            async move {
                loop {
                    this.flush_cv.wait().await;
                    if this.shutting_down.get() {
                        break;
                    }
                    this.stats().record_idle_flush();
                    this.flush_all();
                }
            }
            .boxed_local(),
        );

        let locales: Vec<Locale> = self.sending_locales().collect();
        for locale in locales {
            let this: Rc<Self> = self.clone();
            scheduler.spawn(
                "aggregator-sender",
                async move {
                    loop {
                        this.send_cvs[locale as usize].wait().await;
                        if this.shutting_down.get() {
                            break;
                        }
                        this.send_locale(locale).await;
                    }
                }
                .boxed_local(),
            );
        }
    }

    /// Releases every message system Worker so it can exit.
    pub fn shutdown(&self) {
        if self.shutting_down.replace(true) {
            return;
        }
        info!("shutdown(): aggregator of core {} stops", self.mycore);
        self.flush_cv.broadcast();
        for cv in &self.send_cvs {
            cv.broadcast();
        }
        self.received_buffers.wake_all();
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.get()
    }

    pub fn free_buffers(&self) -> usize {
        self.free_buffers.len()
    }

    pub fn free_slots(&self, locale: Locale) -> usize {
        self.in_flight_slots[locale as usize].len()
    }

    //==================================================================================================================
    // Footprint
    //==================================================================================================================

    /// Bytes the aggregator of one core will allocate.
    pub fn estimate_footprint(config: &RuntimeConfig) -> usize {
        config.rdma_buffers * (config.buffer_size + mem::size_of::<RDMABuffer>())
            + config.send_contexts * config.send_context_size
    }

    /// Halves the buffer count, down to two, until the footprint fits `target`. Returns the new estimate.
    pub fn adjust_footprint(config: &mut RuntimeConfig, target: usize) -> usize {
        while Self::estimate_footprint(config) > target && config.rdma_buffers / 2 >= 2 {
            config.rdma_buffers /= 2;
        }
        Self::estimate_footprint(config)
    }
}

//======================================================================================================================
// Unit Tests
//======================================================================================================================
