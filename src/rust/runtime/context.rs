// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! State of the running core, and the free functions user code calls into the runtime with.

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::{
    pgas::config::RuntimeConfig,
    runtime::{
        aggregator::{
            AggregatorSnapshot,
            AggregatorStats,
            CoreDataTable,
            MessageListHead,
            RDMAAggregator,
        },
        memory::BufferCensus,
        message::{
            Message,
            MessageBase,
        },
        network::Communicator,
        scheduler::{
            thread_yield,
            TaskingScheduler,
        },
        tasks::{
            Task,
            TaskManager,
        },
        Core,
        Locale,
        Topology,
    },
};
use ::crossbeam_deque::Stealer;
use ::futures::{
    future::LocalBoxFuture,
    FutureExt,
};
use ::std::{
    cell::RefCell,
    future::Future,
    rc::Rc,
    sync::{
        atomic::AtomicBool,
        Arc,
    },
    time::Instant,
};

//======================================================================================================================
// Thread Locals
//======================================================================================================================

thread_local! {
    /// The core this thread runs, if any.
    static CORE_CONTEXT: RefCell<Option<Rc<CoreContext>>> = RefCell::new(None);
}

//======================================================================================================================
// Structures
//======================================================================================================================

/// State every core of a run shares.
pub struct RuntimeShared {
    pub config: RuntimeConfig,
    pub topology: Topology,
    /// Message lists, one table per locale.
    pub core_data: Vec<CoreDataTable>,
    /// Reusable messages on their way home, one list per core.
    pub returned: Vec<MessageListHead>,
    /// Thief ends of the public task queues, one per core.
    pub stealers: Arc<[Stealer<Task>]>,
    pub work_done: Arc<AtomicBool>,
    pub communicator: Arc<dyn Communicator>,
    pub census: BufferCensus,
    /// Aggregator counters, one set per core.
    pub stats: Vec<AggregatorStats>,
    /// Time zero of every core's clock.
    pub epoch: Instant,
}

/// Everything one core runs.
pub struct CoreContext {
    pub mycore: Core,
    pub shared: Arc<RuntimeShared>,
    pub scheduler: Rc<TaskingScheduler>,
    pub tasks: Rc<TaskManager>,
    pub aggregator: Rc<RDMAAggregator>,
}

//======================================================================================================================
// Associate Functions
//======================================================================================================================

impl RuntimeShared {
    /// `stealers` holds the thief end of every core's public task queue, in core order.
    pub fn new(
        config: RuntimeConfig,
        topology: Topology,
        communicator: Arc<dyn Communicator>,
        stealers: Arc<[Stealer<Task>]>,
    ) -> Self {
        let cores: usize = topology.cores();
        Self {
            core_data: (0..topology.locales()).map(|_| CoreDataTable::new(&topology)).collect(),
            returned: (0..cores).map(|_| MessageListHead::new()).collect(),
            stealers,
            work_done: Arc::new(AtomicBool::new(false)),
            communicator,
            census: BufferCensus::new(),
            stats: (0..cores).map(|_| AggregatorStats::new()).collect(),
            epoch: Instant::now(),
            config,
            topology,
        }
    }

    /// Counters of every core, added up.
    pub fn total_stats(&self) -> AggregatorSnapshot {
        self.stats.iter().map(AggregatorStats::snapshot).sum()
    }
}

impl CoreContext {
    /// Makes `context` the core of the current thread.
    pub fn install(context: Rc<CoreContext>) {
        CORE_CONTEXT.with(|current| {
            let mut current = current.borrow_mut();
            assert!(current.is_none(), "install(): this thread already runs a core");
            *current = Some(context);
        });
    }

    pub fn uninstall() -> Option<Rc<CoreContext>> {
        CORE_CONTEXT.with(|current| current.borrow_mut().take())
    }

    pub fn current() -> Option<Rc<CoreContext>> {
        CORE_CONTEXT.with(|current| current.borrow().clone())
    }
}

//======================================================================================================================
// Standalone Functions
//======================================================================================================================

/// Runs `f` against the current core. Calling into the runtime from a thread that runs no core is a fatal error.
fn with_core<R>(operation: &str, f: impl FnOnce(&CoreContext) -> R) -> R {
    match CoreContext::current() {
        Some(context) => f(&context),
        None => panic!("{}(): not called from a runtime core", operation),
    }
}

pub fn mycore() -> Core {
    with_core("mycore", |c| c.mycore)
}

pub fn mylocale() -> Locale {
    with_core("mylocale", |c| c.shared.topology.locale_of(c.mycore))
}

pub fn cores() -> usize {
    with_core("cores", |c| c.shared.topology.cores())
}

pub fn locales() -> usize {
    with_core("locales", |c| c.shared.topology.locales())
}

pub fn locale_cores() -> usize {
    with_core("locale_cores", |c| c.shared.topology.locale_cores())
}

pub fn locale_of(core: Core) -> Locale {
    with_core("locale_of", |c| c.shared.topology.locale_of(core))
}

/// Runs `task` on this core.
pub fn spawn<F: Future<Output = ()> + 'static>(task: F) {
    with_core("spawn", |c| c.tasks.spawn_private(task.boxed_local()))
}

/// Runs the future `task` builds on some core of this locale.
pub fn spawn_public<F, T>(task: T)
where
    F: Future<Output = ()> + 'static,
    T: FnOnce() -> F + Send + 'static,
{
    let task: Task = Box::new(move || -> LocalBoxFuture<'static, ()> { task().boxed_local() });
    with_core("spawn_public", |c| c.tasks.spawn_public(task))
}

/// Runs `body` on `destination`. Returns true when the caller should yield soon.
pub fn send_message<T: FnOnce() + Copy + Send + 'static>(destination: Core, body: T) -> bool {
    Message::new(destination, body).enqueue()
}

/// Like [send_message], yielding when the aggregator asks for it.
pub async fn send_message_async<T: FnOnce() + Copy + Send + 'static>(destination: Core, body: T) {
    if send_message(destination, body) {
        thread_yield().await;
    }
}

/// Asks for messages to `core` to be sent soon.
pub fn flush(core: Core) {
    with_core("flush", |c| c.aggregator.flush(core))
}

/// Ends the run. Every core winds down once its Workers are done.
pub fn signal_termination() {
    with_core("signal_termination", |c| c.tasks.signal_termination())
}

/// Aggregator counters of this core.
pub fn aggregator_stats() -> AggregatorSnapshot {
    with_core("aggregator_stats", |c| c.shared.stats[c.mycore as usize].snapshot())
}

/// Aggregator counters of every core in the run, added up.
pub fn total_aggregator_stats() -> AggregatorSnapshot {
    with_core("total_aggregator_stats", |c| c.shared.total_stats())
}

/// Messages enqueued anywhere in the run and not yet taken off their lists.
pub fn pending_messages() -> usize {
    with_core("pending_messages", |c| c.shared.core_data.iter().map(CoreDataTable::pending).sum())
}

/// Looks at the run's buffer census.
pub fn census<R>(f: impl FnOnce(&BufferCensus) -> R) -> R {
    with_core("census", |c| f(&c.shared.census))
}

/// Hands `message` to this core's aggregator.
pub(crate) fn enqueue_message(message: *mut MessageBase, locale_enqueue: bool) -> bool {
    let aggregator: Rc<RDMAAggregator> = with_core("enqueue_message", |c| c.aggregator.clone());
    // Safety: messages come in straight from their owner.
    unsafe { aggregator.enqueue(message, locale_enqueue) }
}

/// Sends a reusable message back to its home core's returned list.
pub(crate) fn return_message(home: Core, message: *mut MessageBase) {
    with_core("return_message", |c| {
        // Safety: the message was released by the core holding it and is on no other list.
        unsafe { c.shared.returned[home as usize].push(message) };
    })
}
