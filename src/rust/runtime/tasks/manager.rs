// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! Per-core task manager. Private tasks stay on the core that spawned them; public tasks sit on the core's
//! [StealQueue] where idle cores of the same locale may take them.

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::{
    pgas::config::{
        LoadBalance,
        RuntimeConfig,
    },
    runtime::{
        scheduler::{
            thread_idle,
            thread_yield,
            TaskingScheduler,
            WorkSource,
        },
        tasks::{
            PrivateTask,
            StealQueue,
            Task,
        },
        Core,
    },
};
use ::crossbeam_deque::Stealer;
use ::futures::{
    future::LocalBoxFuture,
    FutureExt,
};
use ::rand::prelude::{
    SeedableRng,
    SliceRandom,
    SmallRng,
};
use ::std::{
    cell::{
        Cell,
        RefCell,
    },
    collections::VecDeque,
    mem,
    rc::{
        Rc,
        Weak,
    },
    sync::{
        atomic::{
            AtomicBool,
            Ordering,
        },
        Arc,
    },
};

//======================================================================================================================
// Constants
//======================================================================================================================

/// Smallest steal queue footprint negotiation will shrink to.
const MIN_STEAL_QUEUE_CAPACITY: usize = 64;

//======================================================================================================================
// Structures
//======================================================================================================================

enum Work {
    Private(PrivateTask),
    Public(Task),
}

pub struct TaskManager {
    mycore: Core,
    private_q: RefCell<VecDeque<PrivateTask>>,
    queue: StealQueue<Task>,
    /// Thief ends of every core's public queue.
    stealers: Arc<[Stealer<Task>]>,
    /// Cores of the locale to steal from, in visiting order.
    neighbors: Vec<Core>,
    next_victim: Cell<usize>,
    /// Only one Worker of this core steals at a time.
    stealing: Cell<bool>,
    done: Arc<AtomicBool>,
    chunk_size: usize,
    load_balance: LoadBalance,
    tasks_run: Cell<u64>,
    steals: Cell<u64>,
    stolen: Cell<u64>,
    this: Weak<TaskManager>,
}

//======================================================================================================================
// Associate Functions
//======================================================================================================================

impl TaskManager {
    /// Creates the task manager of `mycore`. `locale` lists every core of its locale, `queue` is this core's public
    /// queue, `stealers` reach the public queue of every core of the run, and `done` is the run-wide termination flag.
    pub fn new(
        mycore: Core,
        locale: impl Iterator<Item = Core>,
        queue: StealQueue<Task>,
        stealers: Arc<[Stealer<Task>]>,
        done: Arc<AtomicBool>,
        config: &RuntimeConfig,
    ) -> Rc<Self> {
        let mut neighbors: Vec<Core> = locale.filter(|core| *core != mycore).collect();
        let mut rng: SmallRng = SmallRng::seed_from_u64(config.steal_seed ^ mycore as u64);
        neighbors.shuffle(&mut rng);
        Rc::new_cyclic(|this| Self {
            mycore,
            private_q: RefCell::new(VecDeque::new()),
            queue,
            stealers,
            neighbors,
            next_victim: Cell::new(0),
            stealing: Cell::new(false),
            done,
            chunk_size: config.chunk_size,
            load_balance: config.load_balance,
            tasks_run: Cell::new(0),
            steals: Cell::new(0),
            stolen: Cell::new(0),
            this: this.clone(),
        })
    }

    /// Queues a task that only this core will run.
    pub fn spawn_private(&self, task: PrivateTask) {
        self.private_q.borrow_mut().push_back(task);
    }

    /// Queues a task other cores of the locale may steal.
    pub fn spawn_public(&self, task: Task) {
        self.queue.push(task);
    }

    /// Ends the run on every core.
    pub fn signal_termination(&self) {
        if !self.done.swap(true, Ordering::AcqRel) {
            info!("signal_termination(): core {} ended the run", self.mycore);
        }
    }

    pub fn is_done(&self) -> bool {
        self.done.load(Ordering::Acquire)
    }

    pub fn local_work(&self) -> usize {
        self.private_q.borrow().len() + self.queue.len()
    }

    pub fn tasks_run(&self) -> u64 {
        self.tasks_run.get()
    }

    /// Successful steals and the tasks they brought in.
    pub fn steals(&self) -> (u64, u64) {
        (self.steals.get(), self.stolen.get())
    }

    /// Takes local work: private tasks first, in spawn order, then the newest public task.
    fn try_consume_local(&self) -> Option<Work> {
        let private: Option<PrivateTask> = self.private_q.borrow_mut().pop_front();
        if let Some(task) = private {
            return Some(Work::Private(task));
        }
        self.queue.pop().map(Work::Public)
    }

    /// Waits for the next piece of work. Returns None once the run is over.
    async fn get_work(&self) -> Option<Work> {
        loop {
            if let Some(work) = self.try_consume_local() {
                return Some(work);
            }
            if self.is_done() {
                return None;
            }
            self.wait_consume_any().await;
        }
    }

    /// Looks for work elsewhere, and otherwise parks the Worker.
    async fn wait_consume_any(&self) {
        if self.load_balance == LoadBalance::Steal && !self.stealing.get() {
            self.stealing.set(true);
            let stolen: usize = self.steal().await;
            self.stealing.set(false);
            if stolen > 0 || self.local_work() > 0 {
                return;
            }
        }
        if !thread_idle().await {
            // Last Worker awake: keep the core busy with whatever the idle hook does.
            if thread_yield().await {
                TaskingScheduler::with(|s| s.idle());
            }
        }
    }

    /// Visits each neighbor once, starting after the last victim, and moves the first batch found onto this core's
    /// public queue. Yields between failed attempts.
    async fn steal(&self) -> usize {
        for _ in 0..self.neighbors.len() {
            if self.is_done() || self.local_work() > 0 {
                return 0;
            }
            let index: usize = self.next_victim.get() % self.neighbors.len();
            self.next_victim.set(index + 1);
            let victim: Core = self.neighbors[index];
            let batch: Vec<Task> =
                StealQueue::steal(&self.stealers[victim as usize], self.chunk_size.min(self.queue.room()));
            if !batch.is_empty() {
                let count: usize = batch.len();
                debug!("steal(): core {} took {} tasks from core {}", self.mycore, count, victim);
                self.check_pull(batch);
                self.steals.set(self.steals.get() + 1);
                self.stolen.set(self.stolen.get() + count as u64);
                return count;
            }
            thread_yield().await;
        }
        0
    }

    /// Moves stolen tasks onto this core's public queue, where they may be stolen again.
    fn check_pull(&self, batch: Vec<Task>) {
        for task in batch {
            self.queue.push(task);
        }
    }

    /// Bytes the task machinery of one core will use.
    pub fn estimate_footprint(config: &RuntimeConfig) -> usize {
        config.steal_queue_capacity * mem::size_of::<Task>() + config.max_allowed_active_workers * config.stack_size
    }

    /// Halves the steal queue until the footprint fits `target`. Returns the new estimate.
    pub fn adjust_footprint(config: &mut RuntimeConfig, target: usize) -> usize {
        while Self::estimate_footprint(config) > target && config.steal_queue_capacity / 2 >= MIN_STEAL_QUEUE_CAPACITY
        {
            config.steal_queue_capacity /= 2;
        }
        Self::estimate_footprint(config)
    }
}

//======================================================================================================================
// Trait Implementations
//======================================================================================================================

impl WorkSource for TaskManager {
    fn available(&self) -> bool {
        if self.local_work() > 0 {
            return true;
        }
        self.load_balance == LoadBalance::Steal
            && !self.stealing.get()
            && self.neighbors.iter().any(|core| !self.stealers[*core as usize].is_empty())
    }

    fn is_done(&self) -> bool {
        TaskManager::is_done(self)
    }

    fn new_worker(&self) -> LocalBoxFuture<'static, ()> {
        let manager: Rc<TaskManager> = match self.this.upgrade() {
            Some(manager) => manager,
            None => panic!("new_worker(): task manager of core {} is gone", self.mycore),
        };
        async move {
            while let Some(work) = manager.get_work().await {
                TaskingScheduler::with(|s| s.task_started());
                match work {
                    Work::Private(task) => task.await,
                    Work::Public(task) => task().await,
                }
                TaskingScheduler::with(|s| s.task_finished());
                manager.tasks_run.set(manager.tasks_run.get() + 1);
            }
            trace!("new_worker(): task worker of core {} exits", manager.mycore);
        }
        .boxed_local()
    }
}

//======================================================================================================================
// Unit Tests
//======================================================================================================================
