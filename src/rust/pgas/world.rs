// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::{
    pgas::config::RuntimeConfig,
    runtime::{
        aggregator::{
            AggregatorSnapshot,
            RDMAAggregator,
        },
        context::{
            self,
            CoreContext,
            RuntimeShared,
        },
        fail::Fail,
        logging,
        memory::CensusSnapshot,
        network::{
            Communicator,
            InProcessFabric,
        },
        scheduler::TaskingScheduler,
        tasks::{
            StealQueue,
            Task,
            TaskManager,
        },
        timer::TickClock,
        Core,
        Topology,
    },
};
use ::crossbeam_deque::Stealer;
use ::futures::FutureExt;
use ::std::{
    future::Future,
    rc::Rc,
    sync::{
        atomic::{
            AtomicBool,
            Ordering,
        },
        Arc,
        OnceLock,
    },
    thread,
};

//======================================================================================================================
// Structures
//======================================================================================================================

/// A set of cores, one OS thread each, that run a program together.
pub struct World {
    config: RuntimeConfig,
    topology: Topology,
    communicator: Arc<dyn Communicator>,
    started: AtomicBool,
    /// Buffer census once every core of the run has stopped.
    census: OnceLock<CensusSnapshot>,
}

/// Ends the run for everybody when a core thread unwinds, so the other cores do not wait on it forever.
struct PanicGuard {
    core: Core,
    work_done: Arc<AtomicBool>,
}

//======================================================================================================================
// Associate Functions
//======================================================================================================================

impl World {
    /// Creates a world whose cores talk through an in-process fabric.
    pub fn new(config: RuntimeConfig) -> Result<Self, Fail> {
        let topology: Topology = Topology::new(config.locales, config.locale_cores)?;
        let fabric: InProcessFabric =
            InProcessFabric::new(topology.cores(), config.send_contexts, config.send_context_size);
        Self::with_communicator(config, Arc::new(fabric))
    }

    /// Creates a world on top of `communicator`, which must serve every core of the configured topology.
    pub fn with_communicator(mut config: RuntimeConfig, communicator: Arc<dyn Communicator>) -> Result<Self, Fail> {
        logging::initialize();
        let topology: Topology = Topology::new(config.locales, config.locale_cores)?;
        config.validate()?;
        if let Some(budget) = config.memory_budget {
            Self::negotiate_footprint(&mut config, budget);
        }
        Ok(Self {
            config,
            topology,
            communicator,
            started: AtomicBool::new(false),
            census: OnceLock::new(),
        })
    }

    /// Shrinks `config` until one core's footprint fits `budget`: steal queues first, then aggregation buffers.
    /// Returns the final estimate, which may still exceed the budget.
    pub fn negotiate_footprint(config: &mut RuntimeConfig, budget: usize) -> usize {
        let estimate = |config: &RuntimeConfig| -> usize {
            TaskManager::estimate_footprint(config) + RDMAAggregator::estimate_footprint(config)
        };
        if estimate(config) > budget {
            let rest: usize = RDMAAggregator::estimate_footprint(config);
            TaskManager::adjust_footprint(config, budget.saturating_sub(rest));
        }
        if estimate(config) > budget {
            let rest: usize = TaskManager::estimate_footprint(config);
            RDMAAggregator::adjust_footprint(config, budget.saturating_sub(rest));
        }
        let footprint: usize = estimate(config);
        if footprint > budget {
            warn!(
                "negotiate_footprint(): {} bytes per core exceed the budget of {}",
                footprint, budget
            );
        } else {
            debug!("negotiate_footprint(): {} bytes per core", footprint);
        }
        footprint
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn topology(&self) -> Topology {
        self.topology
    }

    /// Where every aggregation buffer ended up, once [World::run] has returned.
    pub fn census(&self) -> Option<CensusSnapshot> {
        self.census.get().copied()
    }

    /// Boots every core, runs `main` as a task on core 0 and ends the run once it completes. Returns the aggregator
    /// counters of all cores. A world runs once.
    pub fn run<F, Fut>(&self, main: F) -> Result<AggregatorSnapshot, Fail>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + 'static,
    {
        if self.started.swap(true, Ordering::AcqRel) {
            let cause: String = String::from("this world already ran");
            error!("run(): {}", cause);
            return Err(Fail::new(libc::EBUSY, &cause));
        }
        let queues: Vec<StealQueue<Task>> = (0..self.topology.cores())
            .map(|_| StealQueue::new(self.config.steal_queue_capacity))
            .collect();
        let stealers: Arc<[Stealer<Task>]> = queues
            .iter()
            .map(StealQueue::stealer)
            .collect::<Vec<Stealer<Task>>>()
            .into();
        let shared: Arc<RuntimeShared> = Arc::new(RuntimeShared::new(
            self.config.clone(),
            self.topology,
            self.communicator.clone(),
            stealers,
        ));
        info!(
            "run(): starting {} cores in {} locales",
            self.topology.cores(),
            self.topology.locales()
        );

        let mut main: Option<F> = Some(main);
        let mut handles: Vec<(Core, thread::JoinHandle<()>)> = Vec::with_capacity(self.topology.cores());
        for (core, queue) in (0..self.topology.cores() as Core).zip(queues) {
            let core_shared: Arc<RuntimeShared> = shared.clone();
            let entry: Option<F> = if core == 0 { main.take() } else { None };
            let spawned: Result<thread::JoinHandle<()>, ::std::io::Error> = thread::Builder::new()
                .name(format!("core-{}", core))
                .spawn(move || run_core(core, core_shared, queue, entry));
            match spawned {
                Ok(handle) => handles.push((core, handle)),
                Err(e) => {
                    error!("run(): failed to start core {} ({})", core, e);
                    shared.work_done.store(true, Ordering::Release);
                    for (_, handle) in handles {
                        let _ = handle.join();
                    }
                    return Err(Fail::from(e));
                },
            }
        }

        let mut failed: Vec<Core> = Vec::new();
        for (core, handle) in handles {
            if handle.join().is_err() {
                failed.push(core);
            }
        }
        let census: CensusSnapshot = shared.census.snapshot();
        if census.total() != census.allocated() {
            warn!(
                "run(): census counts {} buffers out of {} allocated",
                census.total(),
                census.allocated()
            );
        }
        let _ = self.census.set(census);
        if !failed.is_empty() {
            let cause: String = format!("cores {:?} panicked", failed);
            error!("run(): {}", cause);
            return Err(Fail::new(libc::EIO, &cause));
        }
        info!("run(): all cores are down");
        Ok(shared.total_stats())
    }
}

/// Body of one core thread.
fn run_core<F, Fut>(core: Core, shared: Arc<RuntimeShared>, queue: StealQueue<Task>, main: Option<F>)
where
    F: FnOnce() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + 'static,
{
    let _guard: PanicGuard = PanicGuard {
        core,
        work_done: shared.work_done.clone(),
    };
    let config: &RuntimeConfig = &shared.config;
    let topology: Topology = shared.topology;

    let clock: Rc<TickClock> = Rc::new(TickClock::new(shared.epoch));
    let scheduler: Rc<TaskingScheduler> =
        TaskingScheduler::new(clock.clone(), config.periodic_poll_ticks, config.max_allowed_active_workers);
    scheduler.install();
    let tasks: Rc<TaskManager> = TaskManager::new(
        core,
        topology.cores_of(topology.locale_of(core)),
        queue,
        shared.stealers.clone(),
        shared.work_done.clone(),
        config,
    );
    let aggregator: Rc<RDMAAggregator> = RDMAAggregator::new(shared.clone(), core, clock);
    CoreContext::install(Rc::new(CoreContext {
        mycore: core,
        shared: shared.clone(),
        scheduler: scheduler.clone(),
        tasks: tasks.clone(),
        aggregator: aggregator.clone(),
    }));

    aggregator.spawn_workers(&scheduler);
    scheduler.set_work_source(tasks.clone());
    scheduler.create_task_workers(config.num_starting_workers);
    let idle: Rc<RDMAAggregator> = aggregator.clone();
    scheduler.set_idle_hook(Rc::new(move || {
        let polled: bool = idle.poll();
        idle.idle_flush() || polled
    }));
    let stopping: Rc<RDMAAggregator> = aggregator.clone();
    scheduler.set_shutdown_hook(Box::new(move || stopping.shutdown()));
    if let Some(main) = main {
        tasks.spawn_private(
            async move {
                main().await;
                context::signal_termination();
            }
            .boxed_local(),
        );
    }
    info!("run_core(): core {} is up", core);

    scheduler.run();

    scheduler.detach();
    let stranded: usize = scheduler.abandon();
    if stranded > 0 {
        debug!("run_core(): core {} dropped {} blocked workers", core, stranded);
    }
    CoreContext::uninstall();
    TaskingScheduler::uninstall();
    info!(
        "run_core(): core {} is down after {} dispatches and {} tasks",
        core,
        scheduler.dispatches(),
        tasks.tasks_run()
    );
}

//======================================================================================================================
// Trait Implementations
//======================================================================================================================

impl Drop for PanicGuard {
    fn drop(&mut self) {
        if thread::panicking() {
            error!("drop(): core {} panicked, ending the run", self.core);
            self.work_done.store(true, Ordering::Release);
        }
    }
}

//======================================================================================================================
// Unit Tests
//======================================================================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use ::anyhow::Result;
    use ::std::sync::atomic::AtomicUsize;

    #[test]
    fn main_runs_on_core_zero() -> Result<()> {
        let world: World = World::new(RuntimeConfig {
            locale_cores: 2,
            ..Default::default()
        })?;
        let seen: Arc<AtomicUsize> = Arc::new(AtomicUsize::new(usize::MAX));
        let record: Arc<AtomicUsize> = seen.clone();
        world.run(move || async move {
            record.store(context::mycore() as usize + 10 * context::cores(), Ordering::Release);
        })?;
        crate::ensure_eq!(seen.load(Ordering::Acquire), 20);
        Ok(())
    }

    #[test]
    fn worlds_run_once() -> Result<()> {
        let world: World = World::new(RuntimeConfig::default())?;
        world.run(|| async {})?;
        crate::ensure_eq!(world.run(|| async {}).err().map(|e| e.errno), Some(libc::EBUSY));
        Ok(())
    }

    #[test]
    fn bad_topologies_are_rejected() -> Result<()> {
        let result: Result<World, Fail> = World::new(RuntimeConfig {
            locales: 0,
            ..Default::default()
        });
        crate::ensure_eq!(result.err().map(|e| e.errno), Some(libc::EINVAL));
        Ok(())
    }

    #[test]
    fn panics_become_errors() -> Result<()> {
        let world: World = World::new(RuntimeConfig {
            locale_cores: 2,
            ..Default::default()
        })?;
        let result: Result<AggregatorSnapshot, Fail> = world.run(|| async { panic!("main gave up") });
        crate::ensure_eq!(result.err().map(|e| e.errno), Some(libc::EIO));
        Ok(())
    }

    #[test]
    fn budget_shrinks_queues_then_buffers() -> Result<()> {
        let mut config: RuntimeConfig = RuntimeConfig {
            max_allowed_active_workers: 4,
            ..Default::default()
        };
        let before: usize = World::negotiate_footprint(&mut config.clone(), usize::MAX);
        let after: usize = World::negotiate_footprint(&mut config, before / 2);
        crate::ensure_eq!(after <= before / 2, true);
        crate::ensure_eq!(config.steal_queue_capacity < RuntimeConfig::default().steal_queue_capacity, true);
        crate::ensure_eq!(config.rdma_buffers < RuntimeConfig::default().rdma_buffers, true);
        Ok(())
    }
}
