// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! Cooperative, single-threaded Worker scheduler. One runs on every core.
//!
//! Workers are boxed futures kept in a slab. A Worker gives up the core only at the suspension points this module
//! hands out ([Yield], [Suspend], [Idle] and the sync primitives built on them); the scheduler then picks the next
//! Worker in this order: a due periodic Worker, the ready queue, a fresh or recycled task Worker (subject to the
//! active-worker cap), and otherwise it idles.

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::runtime::{
    scheduler::{
        queue::ThreadQueue,
        waiter::{
            DelegateSlot,
            Waiter,
            NO_WAITER,
        },
        waker::{
            WakeRequest,
            WorkerWaker,
        },
        worker::{
            WorkerId,
            WorkerKind,
            WorkerSlot,
            WorkerState,
        },
    },
    timer::TickClock,
};
use ::crossbeam_channel::{
    Receiver,
    Sender,
};
use ::futures::future::LocalBoxFuture;
use ::slab::Slab;
use ::std::{
    cell::{
        Cell,
        RefCell,
    },
    mem,
    rc::Rc,
    task::{
        Context,
        Poll,
        Waker,
    },
    thread,
    time::Duration,
};

//======================================================================================================================
// Thread Locals
//======================================================================================================================

thread_local! {
    /// The scheduler driving the current thread, if any.
    static THREAD_SCHEDULER: RefCell<Option<Rc<TaskingScheduler>>> = RefCell::new(None);
}

//======================================================================================================================
// Constants
//======================================================================================================================

/// How long a core with nothing to do and no idle hook sleeps before looking again.
const IDLE_SLEEP: Duration = Duration::from_micros(1);

//======================================================================================================================
// Structures
//======================================================================================================================

/// Supplier of task Workers. The task manager implements this.
pub trait WorkSource {
    /// Whether there is local work a fresh or parked task Worker could pick up.
    fn available(&self) -> bool;
    /// Whether the run is over. Parked task Workers are released so they can exit.
    fn is_done(&self) -> bool;
    /// Body of a new task Worker.
    fn new_worker(&self) -> LocalBoxFuture<'static, ()>;
}

struct SchedulerState {
    workers: Slab<WorkerSlot>,
    delegates: Slab<DelegateSlot>,
    ready_q: ThreadQueue,
    periodic_q: ThreadQueue,
    unassigned_q: ThreadQueue,
    current: Option<WorkerId>,
    num_task_workers: usize,
    num_idle: usize,
    num_active_tasks: usize,
    dispatches: u64,
    next_generation: u32,
    previous_periodic_ts: u64,
}

pub struct TaskingScheduler {
    state: RefCell<SchedulerState>,
    clock: Rc<TickClock>,
    periodic_poll_ticks: u64,
    max_allowed_active_workers: usize,
    mailbox_tx: Sender<WakeRequest>,
    mailbox_rx: Receiver<WakeRequest>,
    work_source: RefCell<Option<Rc<dyn WorkSource>>>,
    idle_hook: RefCell<Option<Rc<dyn Fn() -> bool>>>,
    shutdown_hook: RefCell<Option<Box<dyn FnOnce()>>>,
    shutdown_started: Cell<bool>,
}

//======================================================================================================================
// Associate Functions
//======================================================================================================================

impl TaskingScheduler {
    pub fn new(clock: Rc<TickClock>, periodic_poll_ticks: u64, max_allowed_active_workers: usize) -> Rc<Self> {
        let (mailbox_tx, mailbox_rx): (Sender<WakeRequest>, Receiver<WakeRequest>) = ::crossbeam_channel::unbounded();
        Rc::new(Self {
            state: RefCell::new(SchedulerState {
                workers: Slab::new(),
                delegates: Slab::new(),
                ready_q: ThreadQueue::default(),
                periodic_q: ThreadQueue::default(),
                unassigned_q: ThreadQueue::default(),
                current: None,
                num_task_workers: 0,
                num_idle: 0,
                num_active_tasks: 0,
                dispatches: 0,
                next_generation: 0,
                previous_periodic_ts: 0,
            }),
            clock,
            periodic_poll_ticks,
            max_allowed_active_workers,
            mailbox_tx,
            mailbox_rx,
            work_source: RefCell::new(None),
            idle_hook: RefCell::new(None),
            shutdown_hook: RefCell::new(None),
            shutdown_started: Cell::new(false),
        })
    }

    /// Makes this the scheduler of the current thread.
    pub fn install(self: &Rc<Self>) {
        THREAD_SCHEDULER.with(|current| {
            let mut current = current.borrow_mut();
            assert!(current.is_none(), "install(): this thread already runs a scheduler");
            *current = Some(self.clone());
        });
    }

    pub fn uninstall() -> Option<Rc<Self>> {
        THREAD_SCHEDULER.with(|current| current.borrow_mut().take())
    }

    pub fn current() -> Option<Rc<Self>> {
        THREAD_SCHEDULER.with(|current| current.borrow().clone())
    }

    /// Runs `f` against the scheduler of the current thread. Using a scheduler primitive on a thread without one is
    /// a fatal error.
    pub fn with<R>(f: impl FnOnce(&TaskingScheduler) -> R) -> R {
        match Self::current() {
            Some(scheduler) => f(&scheduler),
            None => panic!("with(): no scheduler runs on this thread"),
        }
    }

    pub fn set_work_source(&self, source: Rc<dyn WorkSource>) {
        *self.work_source.borrow_mut() = Some(source);
    }

    /// Installs what the core does when nothing is runnable. The hook reports whether it found useful work.
    pub fn set_idle_hook(&self, hook: Rc<dyn Fn() -> bool>) {
        *self.idle_hook.borrow_mut() = Some(hook);
    }

    /// Installs what runs once the work source reports the run is over.
    pub fn set_shutdown_hook(&self, hook: Box<dyn FnOnce()>) {
        *self.shutdown_hook.borrow_mut() = Some(hook);
    }

    /// Drops every hook and the work source.
    pub fn detach(&self) {
        self.work_source.borrow_mut().take();
        self.idle_hook.borrow_mut().take();
        self.shutdown_hook.borrow_mut().take();
    }

    /// Adds a system Worker to the ready queue.
    pub fn spawn(&self, name: &'static str, coroutine: LocalBoxFuture<'static, ()>) -> WorkerId {
        let id: WorkerId = self.insert_worker(name, WorkerKind::System, WorkerState::Ready, coroutine);
        let mut state = self.state.borrow_mut();
        let state: &mut SchedulerState = &mut *state;
        state.ready_q.enqueue(&mut state.workers, id);
        id
    }

    /// Adds a system Worker to the periodic queue.
    pub fn spawn_periodic(&self, name: &'static str, coroutine: LocalBoxFuture<'static, ()>) -> WorkerId {
        let id: WorkerId = self.insert_worker(name, WorkerKind::System, WorkerState::Periodic, coroutine);
        let mut state = self.state.borrow_mut();
        let state: &mut SchedulerState = &mut *state;
        state.periodic_q.enqueue(&mut state.workers, id);
        id
    }

    /// Creates `count` task Workers and parks them on the unassigned pool.
    pub fn create_task_workers(&self, count: usize) {
        let source: Rc<dyn WorkSource> = match self.work_source.borrow().clone() {
            Some(source) => source,
            None => panic!("create_task_workers(): no work source"),
        };
        for _ in 0..count {
            let id: WorkerId =
                self.insert_worker("task", WorkerKind::Task, WorkerState::Unassigned, source.new_worker());
            let mut state = self.state.borrow_mut();
            let state: &mut SchedulerState = &mut *state;
            state.unassigned_q.enqueue(&mut state.workers, id);
            state.num_idle += 1;
        }
    }

    fn insert_worker(
        &self,
        name: &'static str,
        kind: WorkerKind,
        worker_state: WorkerState,
        coroutine: LocalBoxFuture<'static, ()>,
    ) -> WorkerId {
        let mut state = self.state.borrow_mut();
        let generation: u32 = state.next_generation;
        state.next_generation = state.next_generation.wrapping_add(1);
        if kind == WorkerKind::Task {
            state.num_task_workers += 1;
        }
        let entry = state.workers.vacant_entry();
        let id: WorkerId = WorkerId::from(entry.key());
        let waker: Waker = WorkerWaker::new_waker(id, generation, self.mailbox_tx.clone());
        entry.insert(WorkerSlot::new(name, kind, worker_state, generation, coroutine, waker));
        trace!("insert_worker(): {:?} ({}, {:?})", id, name, kind);
        id
    }

    /// Dispatches Workers until every one of them has exited or, once the run is over, until every Worker left is
    /// blocked with nothing queued that could wake it.
    pub fn run(&self) {
        while let Some(id) = self.next_coroutine(false) {
            self.dispatch(id);
        }
        let stranded: usize = self.num_workers();
        if stranded > 0 {
            debug!("run(): {} workers are still blocked after shutdown", stranded);
        }
    }

    /// Drops every remaining Worker and delegate without running them. Returns how many Workers were dropped.
    pub fn abandon(&self) -> usize {
        let (workers, delegates): (Slab<WorkerSlot>, Slab<DelegateSlot>) = {
            let mut state = self.state.borrow_mut();
            state.ready_q = ThreadQueue::default();
            state.periodic_q = ThreadQueue::default();
            state.unassigned_q = ThreadQueue::default();
            state.num_task_workers = 0;
            state.num_idle = 0;
            (mem::take(&mut state.workers), mem::take(&mut state.delegates))
        };
        let dropped: usize = workers.len();
        // Coroutine destructors may call back into the scheduler.
        drop(workers);
        drop(delegates);
        dropped
    }

    /// Picks the next Worker to run. A blocking call idles until one is available; a non-blocking call gives up
    /// once no Worker is left at all.
    pub fn next_coroutine(&self, is_blocking: bool) -> Option<WorkerId> {
        loop {
            self.drain_mailbox();
            self.maybe_begin_shutdown();
            let now: u64 = self.clock.tick();
            {
                let mut state = self.state.borrow_mut();
                let state: &mut SchedulerState = &mut *state;
                let periodic_due: bool = now.saturating_sub(state.previous_periodic_ts) > self.periodic_poll_ticks;
                if periodic_due && !state.periodic_q.is_empty() {
                    if let Some(id) = state.periodic_q.dequeue(&mut state.workers) {
                        state.previous_periodic_ts = now;
                        return Some(id);
                    }
                }
                if let Some(id) = state.ready_q.dequeue(&mut state.workers) {
                    return Some(id);
                }
            }
            if let Some(id) = self.get_worker() {
                return Some(id);
            }
            if !is_blocking && self.queues_finished() {
                return None;
            }
            self.idle();
        }
    }

    /// Hands out a parked task Worker, or a new one, when there is work and room under the active-worker cap.
    /// Once the run is over, parked Workers are handed out regardless so they can exit.
    fn get_worker(&self) -> Option<WorkerId> {
        let source: Rc<dyn WorkSource> = self.work_source.borrow().clone()?;
        let done: bool = source.is_done();
        let available: bool = source.available();
        {
            let mut state = self.state.borrow_mut();
            let state: &mut SchedulerState = &mut *state;
            if !done && (!available || state.num_active_tasks >= self.max_allowed_active_workers) {
                return None;
            }
            if let Some(id) = state.unassigned_q.dequeue(&mut state.workers) {
                state.num_idle -= 1;
                return Some(id);
            }
            if done || state.num_task_workers >= self.max_allowed_active_workers {
                return None;
            }
        }
        Some(self.insert_worker("task", WorkerKind::Task, WorkerState::Ready, source.new_worker()))
    }

    /// Runs the idle hook once, or sleeps briefly when there is none.
    pub(crate) fn idle(&self) {
        let hook: Option<Rc<dyn Fn() -> bool>> = self.idle_hook.borrow().clone();
        match hook {
            Some(hook) => {
                if !hook() {
                    thread::yield_now();
                }
            },
            None => thread::sleep(IDLE_SLEEP),
        }
    }

    fn maybe_begin_shutdown(&self) {
        let done: bool = match self.work_source.borrow().as_ref() {
            Some(source) => source.is_done(),
            None => return,
        };
        if done {
            self.shutdown_started.set(true);
            let hook: Option<Box<dyn FnOnce()>> = self.shutdown_hook.borrow_mut().take();
            if let Some(hook) = hook {
                debug!("maybe_begin_shutdown(): work is done, winding down");
                hook();
            }
        }
    }

    /// Whether nothing can ever run again: no Workers at all, or the run is over and every Worker left waits on
    /// something that nobody queued.
    pub fn queues_finished(&self) -> bool {
        let state = self.state.borrow();
        if state.workers.is_empty() {
            return true;
        }
        self.shutdown_started.get()
            && state.ready_q.is_empty()
            && state.periodic_q.is_empty()
            && state.unassigned_q.is_empty()
            && self.mailbox_rx.is_empty()
    }

    pub fn shutdown_started(&self) -> bool {
        self.shutdown_started.get()
    }

    fn dispatch(&self, id: WorkerId) {
        let (mut coroutine, waker): (LocalBoxFuture<'static, ()>, Waker) = {
            let mut state = self.state.borrow_mut();
            state.dispatches += 1;
            state.current = Some(id);
            let slot: &mut WorkerSlot = &mut state.workers[usize::from(id)];
            debug_assert!(!slot.linked, "dispatch(): {:?} is still linked", id);
            slot.state = WorkerState::Running;
            match slot.coroutine.take() {
                Some(coroutine) => (coroutine, slot.waker.clone()),
                None => panic!("dispatch(): {:?} ({}) is already being polled", id, slot.name),
            }
        };

        let mut context: Context = Context::from_waker(&waker);
        let poll: Poll<()> = coroutine.as_mut().poll(&mut context);

        // Release finished coroutines outside of the borrow: their destructors may call back into the scheduler.
        let finished: Option<(LocalBoxFuture<'static, ()>, WorkerSlot)> = {
            let mut state = self.state.borrow_mut();
            state.current = None;
            match poll {
                Poll::Ready(()) => {
                    let mut slot: WorkerSlot = state.workers.remove(usize::from(id));
                    assert!(!slot.linked, "dispatch(): {:?} ({}) exited while linked", id, slot.name);
                    slot.state = WorkerState::Exited;
                    if slot.kind == WorkerKind::Task {
                        state.num_task_workers -= 1;
                    }
                    trace!("dispatch(): {:?} ({}) exited", id, slot.name);
                    Some((coroutine, slot))
                },
                Poll::Pending => {
                    let slot: &mut WorkerSlot = &mut state.workers[usize::from(id)];
                    // Pending without one of our primitives: it waits on its waker.
                    if slot.state == WorkerState::Running {
                        slot.state = WorkerState::Suspended;
                    }
                    slot.coroutine = Some(coroutine);
                    None
                },
            }
        };
        drop(finished);
    }

    fn drain_mailbox(&self) {
        while let Ok(request) = self.mailbox_rx.try_recv() {
            self.wake_if_suspended(request);
        }
    }

    /// Mailbox wakes are hints: only a suspended Worker that sits on no list and is still the same occupant of its
    /// slot is made ready.
    fn wake_if_suspended(&self, request: WakeRequest) {
        let mut state = self.state.borrow_mut();
        let state: &mut SchedulerState = &mut *state;
        let index: usize = usize::from(request.id);
        let wakeable: bool = match state.workers.get(index) {
            Some(slot) => {
                slot.generation == request.generation && slot.state == WorkerState::Suspended && !slot.linked
            },
            None => false,
        };
        if wakeable {
            state.workers[index].state = WorkerState::Ready;
            state.ready_q.enqueue(&mut state.workers, request.id);
        }
    }

    fn current_or_panic(state: &SchedulerState, operation: &str) -> WorkerId {
        match state.current {
            Some(id) => id,
            None => panic!("{}(): not called from a Worker", operation),
        }
    }

    /// Moves the running Worker to the ready or periodic queue and returns the dispatch count at that moment.
    pub(crate) fn yield_current(&self, periodic: bool) -> u64 {
        let mut state = self.state.borrow_mut();
        let state: &mut SchedulerState = &mut *state;
        let id: WorkerId = Self::current_or_panic(state, "thread_yield");
        if periodic {
            state.workers[usize::from(id)].state = WorkerState::Periodic;
            state.periodic_q.enqueue(&mut state.workers, id);
        } else {
            state.workers[usize::from(id)].state = WorkerState::Ready;
            state.ready_q.enqueue(&mut state.workers, id);
        }
        state.dispatches
    }

    pub(crate) fn suspend_current(&self) {
        let mut state = self.state.borrow_mut();
        let id: WorkerId = Self::current_or_panic(&state, "thread_suspend");
        state.workers[usize::from(id)].state = WorkerState::Suspended;
    }

    /// Parks the running task Worker on the unassigned pool, unless it is the last one not parked.
    pub(crate) fn park_current_idle(&self) -> bool {
        let mut state = self.state.borrow_mut();
        let state: &mut SchedulerState = &mut *state;
        let id: WorkerId = Self::current_or_panic(state, "thread_idle");
        assert!(
            state.workers[usize::from(id)].kind == WorkerKind::Task,
            "thread_idle(): {:?} is not a task worker",
            id
        );
        if state.num_idle + 1 >= state.num_task_workers {
            return false;
        }
        state.num_idle += 1;
        state.workers[usize::from(id)].state = WorkerState::Unassigned;
        state.unassigned_q.enqueue(&mut state.workers, id);
        true
    }

    /// Makes a suspended Worker ready. Waking a Worker that is running or on any list is a fatal error.
    pub fn thread_wake(&self, id: WorkerId) {
        let mut state = self.state.borrow_mut();
        let state: &mut SchedulerState = &mut *state;
        let slot: &mut WorkerSlot = match state.workers.get_mut(usize::from(id)) {
            Some(slot) => slot,
            None => panic!("thread_wake(): {:?} does not exist", id),
        };
        assert!(
            slot.state == WorkerState::Suspended && !slot.linked,
            "thread_wake(): {:?} ({}) is {:?}{}",
            id,
            slot.name,
            slot.state,
            if slot.linked { " and linked" } else { "" }
        );
        slot.state = WorkerState::Ready;
        state.ready_q.enqueue(&mut state.workers, id);
    }

    pub fn current_worker(&self) -> Option<WorkerId> {
        self.state.borrow().current
    }

    pub fn dispatches(&self) -> u64 {
        self.state.borrow().dispatches
    }

    pub fn task_started(&self) {
        self.state.borrow_mut().num_active_tasks += 1;
    }

    pub fn task_finished(&self) {
        self.state.borrow_mut().num_active_tasks -= 1;
    }

    //==================================================================================================================
    // Waiter Lists
    //==================================================================================================================

    /// The running Worker as a waiter. Blocking outside of a Worker is a fatal error.
    pub fn current_waiter(&self) -> Waiter {
        Waiter::Worker(Self::current_or_panic(&self.state.borrow(), "wait"))
    }

    /// Links `waiter` in front of the list starting at `head` and returns the new head.
    pub fn push_waiter(&self, head: u64, waiter: Waiter) -> u64 {
        let mut state = self.state.borrow_mut();
        match waiter {
            Waiter::Worker(id) => {
                let slot: &mut WorkerSlot = &mut state.workers[usize::from(id)];
                assert!(!slot.linked, "push_waiter(): {:?} ({}) is already linked", id, slot.name);
                slot.linked = true;
                slot.next = head;
            },
            Waiter::Delegate(id) => state.delegates[usize::from(id)].next = head,
        }
        waiter.into_raw()
    }

    /// Unlinks the first waiter of the list starting at `head`. Returns it with the rest of the list.
    pub fn pop_waiter(&self, head: u64) -> Option<(Waiter, u64)> {
        let waiter: Waiter = Waiter::from_raw(head)?;
        let mut state = self.state.borrow_mut();
        let rest: u64 = match waiter {
            Waiter::Worker(id) => {
                let slot: &mut WorkerSlot = &mut state.workers[usize::from(id)];
                slot.linked = false;
                mem::replace(&mut slot.next, NO_WAITER)
            },
            Waiter::Delegate(id) => mem::replace(&mut state.delegates[usize::from(id)].next, NO_WAITER),
        };
        Some((waiter, rest))
    }

    /// Wakes an unlinked waiter. Delegates run right here instead of being scheduled.
    pub fn wake_waiter(&self, waiter: Waiter) {
        match waiter {
            Waiter::Worker(id) => self.thread_wake(id),
            Waiter::Delegate(id) => {
                let slot: DelegateSlot = self.state.borrow_mut().delegates.remove(usize::from(id));
                (slot.callback)();
            },
        }
    }

    pub fn new_delegate(&self, callback: Box<dyn FnOnce()>) -> Waiter {
        let index: usize = self.state.borrow_mut().delegates.insert(DelegateSlot {
            next: NO_WAITER,
            callback,
        });
        Waiter::Delegate(index.into())
    }

    //==================================================================================================================
    // Instrumentation
    //==================================================================================================================

    pub fn num_workers(&self) -> usize {
        self.state.borrow().workers.len()
    }

    pub fn num_task_workers(&self) -> usize {
        self.state.borrow().num_task_workers
    }

    pub fn num_idle(&self) -> usize {
        self.state.borrow().num_idle
    }

    /// Workers waiting on the ready and periodic queues.
    pub fn num_runnable(&self) -> usize {
        let state = self.state.borrow();
        state.ready_q.len() + state.periodic_q.len()
    }

    pub fn running_workers(&self) -> usize {
        self.state
            .borrow()
            .workers
            .iter()
            .filter(|(_, slot)| slot.state == WorkerState::Running)
            .count()
    }

    pub fn worker_state(&self, id: WorkerId) -> Option<WorkerState> {
        self.state.borrow().workers.get(usize::from(id)).map(|slot| slot.state)
    }

    /// How many queues or waiter lists `id` is on right now.
    pub fn queue_memberships(&self, id: WorkerId) -> usize {
        let state = self.state.borrow();
        let queued: usize = state.ready_q.count(&state.workers, id)
            + state.periodic_q.count(&state.workers, id)
            + state.unassigned_q.count(&state.workers, id);
        match state.workers.get(usize::from(id)) {
            Some(slot) if slot.linked && queued == 0 => 1,
            _ => queued,
        }
    }
}

//======================================================================================================================
// Unit Tests
//======================================================================================================================

#[cfg(test)]
pub mod tests {
    use super::*;
    use crate::runtime::scheduler::{
        thread_idle,
        thread_suspend,
        thread_wake,
        thread_yield,
        thread_yield_periodic,
    };
    use ::anyhow::Result;
    use ::futures::FutureExt;
    use ::std::{
        cell::Cell,
        time::Instant,
    };

    /// Builds a scheduler and installs it on the test thread.
    pub fn install_scheduler(periodic_poll_ticks: u64) -> Rc<TaskingScheduler> {
        let clock: Rc<TickClock> = Rc::new(TickClock::new(Instant::now()));
        let scheduler: Rc<TaskingScheduler> = TaskingScheduler::new(clock, periodic_poll_ticks, 16);
        scheduler.install();
        scheduler
    }

    /// Runs the scheduler to completion and uninstalls it.
    pub fn run_scheduler(scheduler: Rc<TaskingScheduler>) {
        scheduler.run();
        scheduler.detach();
        TaskingScheduler::uninstall();
    }

    #[test]
    fn yield_reports_whether_others_ran() -> Result<()> {
        let scheduler: Rc<TaskingScheduler> = install_scheduler(0);
        let results: Rc<RefCell<Vec<(&'static str, bool)>>> = Rc::new(RefCell::new(Vec::new()));

        let log: Rc<RefCell<Vec<(&'static str, bool)>>> = results.clone();
        scheduler.spawn(
            "a",
            async move {
                log.borrow_mut().push(("a", thread_yield().await));
                log.borrow_mut().push(("a", thread_yield().await));
            }
            .boxed_local(),
        );
        let log: Rc<RefCell<Vec<(&'static str, bool)>>> = results.clone();
        scheduler.spawn(
            "b",
            async move {
                log.borrow_mut().push(("b", thread_yield().await));
            }
            .boxed_local(),
        );
        run_scheduler(scheduler);

        // Both ran between each other's yields, until b was gone.
        crate::ensure_eq!(*results.borrow(), vec![("a", false), ("b", false), ("a", true)]);
        Ok(())
    }

    #[test]
    fn ready_queue_is_fifo() -> Result<()> {
        let scheduler: Rc<TaskingScheduler> = install_scheduler(0);
        let order: Rc<RefCell<Vec<usize>>> = Rc::new(RefCell::new(Vec::new()));
        for i in 0..3 {
            let order: Rc<RefCell<Vec<usize>>> = order.clone();
            scheduler.spawn(
                "fifo",
                async move {
                    order.borrow_mut().push(i);
                    thread_yield().await;
                    order.borrow_mut().push(i);
                }
                .boxed_local(),
            );
        }
        run_scheduler(scheduler);
        crate::ensure_eq!(*order.borrow(), vec![0, 1, 2, 0, 1, 2]);
        Ok(())
    }

    #[test]
    fn suspend_and_wake() -> Result<()> {
        let scheduler: Rc<TaskingScheduler> = install_scheduler(0);
        let sleeper: Rc<Cell<Option<WorkerId>>> = Rc::new(Cell::new(None));
        let woke: Rc<Cell<bool>> = Rc::new(Cell::new(false));

        let me: Rc<Cell<Option<WorkerId>>> = sleeper.clone();
        let flag: Rc<Cell<bool>> = woke.clone();
        scheduler.spawn(
            "sleeper",
            async move {
                me.set(TaskingScheduler::with(|s| s.current_worker()));
                thread_suspend().await;
                flag.set(true);
            }
            .boxed_local(),
        );
        let target: Rc<Cell<Option<WorkerId>>> = sleeper.clone();
        let checks: Rc<RefCell<Vec<usize>>> = Rc::new(RefCell::new(Vec::new()));
        let observed: Rc<RefCell<Vec<usize>>> = checks.clone();
        scheduler.spawn(
            "waker",
            async move {
                let id: WorkerId = match target.get() {
                    Some(id) => id,
                    None => return,
                };
                TaskingScheduler::with(|s| {
                    observed.borrow_mut().push(s.running_workers());
                    observed.borrow_mut().push(s.queue_memberships(id));
                });
                thread_wake(id);
                TaskingScheduler::with(|s| observed.borrow_mut().push(s.queue_memberships(id)));
            }
            .boxed_local(),
        );
        run_scheduler(scheduler);

        crate::ensure_eq!(woke.get(), true);
        // One running Worker; the sleeper is on no list, then on exactly the ready queue.
        crate::ensure_eq!(*checks.borrow(), vec![1, 0, 1]);
        Ok(())
    }

    #[test]
    #[should_panic(expected = "thread_wake()")]
    fn waking_a_queued_worker_is_fatal() {
        let scheduler: Rc<TaskingScheduler> = install_scheduler(0);
        let first: Rc<Cell<Option<WorkerId>>> = Rc::new(Cell::new(None));
        let me: Rc<Cell<Option<WorkerId>>> = first.clone();
        scheduler.spawn(
            "yielder",
            async move {
                me.set(TaskingScheduler::with(|s| s.current_worker()));
                thread_yield().await;
            }
            .boxed_local(),
        );
        scheduler.spawn(
            "bad-waker",
            async move {
                if let Some(id) = first.get() {
                    thread_wake(id);
                }
            }
            .boxed_local(),
        );
        scheduler.run();
    }

    #[test]
    #[should_panic(expected = "not called from a Worker")]
    fn yielding_outside_a_worker_is_fatal() {
        let scheduler: Rc<TaskingScheduler> = install_scheduler(0);
        scheduler.yield_current(false);
    }

    #[test]
    fn periodic_workers_are_throttled() -> Result<()> {
        // Periodic Workers wait for the throttle even when nothing else is runnable.
        let throttle: u64 = Duration::from_millis(20).as_nanos() as u64;
        let scheduler: Rc<TaskingScheduler> = install_scheduler(throttle);
        let log: Rc<RefCell<Vec<&'static str>>> = Rc::new(RefCell::new(Vec::new()));

        let periodic_log: Rc<RefCell<Vec<&'static str>>> = log.clone();
        scheduler.spawn_periodic(
            "periodic",
            async move {
                periodic_log.borrow_mut().push("p");
                thread_yield_periodic().await;
                periodic_log.borrow_mut().push("p");
            }
            .boxed_local(),
        );
        let ready_log: Rc<RefCell<Vec<&'static str>>> = log.clone();
        scheduler.spawn(
            "ready",
            async move {
                for _ in 0..3 {
                    ready_log.borrow_mut().push("r");
                    thread_yield().await;
                }
            }
            .boxed_local(),
        );
        let start: Instant = Instant::now();
        run_scheduler(scheduler);

        crate::ensure_eq!(*log.borrow(), vec!["r", "r", "r", "p", "p"]);
        crate::ensure_eq!(start.elapsed() >= Duration::from_millis(40), true);
        Ok(())
    }

    /// Hands out task Workers that exercise `thread_idle`.
    struct IdleSource {
        done: Rc<Cell<bool>>,
        log: Rc<RefCell<Vec<(usize, bool)>>>,
        spawned: Cell<usize>,
        first: Rc<Cell<Option<WorkerId>>>,
    }

    impl WorkSource for IdleSource {
        fn available(&self) -> bool {
            !self.done.get()
        }

        fn is_done(&self) -> bool {
            self.done.get()
        }

        fn new_worker(&self) -> LocalBoxFuture<'static, ()> {
            let me: usize = self.spawned.get();
            self.spawned.set(me + 1);
            let done: Rc<Cell<bool>> = self.done.clone();
            let log: Rc<RefCell<Vec<(usize, bool)>>> = self.log.clone();
            let first: Rc<Cell<Option<WorkerId>>> = self.first.clone();
            async move {
                if me == 0 {
                    // Step aside so a second task Worker gets created.
                    first.set(TaskingScheduler::with(|s| s.current_worker()));
                    thread_suspend().await;
                    let parked: bool = thread_idle().await;
                    log.borrow_mut().push((me, parked));
                    done.set(true);
                    return;
                }
                while !done.get() {
                    let parked: bool = thread_idle().await;
                    log.borrow_mut().push((me, parked));
                    if let Some(id) = first.take() {
                        thread_wake(id);
                    }
                }
            }
            .boxed_local()
        }
    }

    #[test]
    fn idle_refuses_the_last_task_worker() -> Result<()> {
        let scheduler: Rc<TaskingScheduler> = install_scheduler(0);
        let log: Rc<RefCell<Vec<(usize, bool)>>> = Rc::new(RefCell::new(Vec::new()));
        scheduler.set_work_source(Rc::new(IdleSource {
            done: Rc::new(Cell::new(false)),
            log: log.clone(),
            spawned: Cell::new(0),
            first: Rc::new(Cell::new(None)),
        }));
        run_scheduler(scheduler);

        // Worker 1 parks while worker 0 is suspended. Worker 0 is then the last one awake and may not idle.
        crate::ensure_eq!(*log.borrow(), vec![(1, true), (0, false), (1, true)]);
        Ok(())
    }

    struct FinishedSource;

    impl WorkSource for FinishedSource {
        fn available(&self) -> bool {
            false
        }

        fn is_done(&self) -> bool {
            true
        }

        fn new_worker(&self) -> LocalBoxFuture<'static, ()> {
            async {}.boxed_local()
        }
    }

    #[test]
    fn shutdown_strands_blocked_workers() -> Result<()> {
        let scheduler: Rc<TaskingScheduler> = install_scheduler(0);
        let hooked: Rc<Cell<bool>> = Rc::new(Cell::new(false));
        let flag: Rc<Cell<bool>> = hooked.clone();
        scheduler.set_work_source(Rc::new(FinishedSource));
        scheduler.set_shutdown_hook(Box::new(move || flag.set(true)));
        scheduler.spawn(
            "forever",
            async {
                thread_suspend().await;
            }
            .boxed_local(),
        );
        scheduler.run();

        crate::ensure_eq!(hooked.get(), true);
        crate::ensure_eq!(scheduler.shutdown_started(), true);
        crate::ensure_eq!(scheduler.num_workers(), 1);
        crate::ensure_eq!(scheduler.abandon(), 1);
        crate::ensure_eq!(scheduler.num_workers(), 0);
        run_scheduler(scheduler);
        Ok(())
    }

    #[test]
    fn delegates_run_inline() -> Result<()> {
        let scheduler: Rc<TaskingScheduler> = install_scheduler(0);
        let hits: Rc<Cell<usize>> = Rc::new(Cell::new(0));
        let counter: Rc<Cell<usize>> = hits.clone();
        let waiter: Waiter = scheduler.new_delegate(Box::new(move || counter.set(counter.get() + 1)));
        let head: u64 = scheduler.push_waiter(NO_WAITER, waiter);
        let (popped, rest): (Waiter, u64) = match scheduler.pop_waiter(head) {
            Some(popped) => popped,
            None => anyhow::bail!("waiter list should not be empty"),
        };
        crate::ensure_eq!(rest, NO_WAITER);
        scheduler.wake_waiter(popped);
        crate::ensure_eq!(hits.get(), 1);
        run_scheduler(scheduler);
        Ok(())
    }
}
