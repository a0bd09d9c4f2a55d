// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

mod common;

//==============================================================================
// Imports
//==============================================================================

use ::anyhow::Result;
use ::pgas::{
    ensure_eq,
    flush,
    locale_of,
    mycore,
    send_message,
    spawn,
    spawn_public,
    thread_yield,
    Core,
    CountingSemaphore,
    FullEmpty,
    LoadBalance,
    Mutex,
    RuntimeConfig,
    World,
};
use ::std::{
    cell::{
        Cell,
        RefCell,
    },
    rc::Rc,
    sync::atomic::{
        AtomicUsize,
        Ordering,
    },
};
use common::{
    counter,
    counters,
    test_config,
    wait_for,
};

//==============================================================================
// Constants
//==============================================================================

/// Number of public tasks spawned by load balancing tests.
const PUBLIC_TASKS: usize = 2000;

//==============================================================================
// Standalone Functions
//==============================================================================

/// Spawns public tasks on core 0 and waits for all of them. Returns how many tasks ran on each core.
fn do_spawn_public(config: RuntimeConfig) -> Result<Vec<usize>> {
    let cores: usize = config.locales * config.locale_cores;
    let world: World = match World::new(config) {
        Ok(world) => world,
        Err(e) => anyhow::bail!("failed to create world: {:?}", e),
    };
    let per_core: &'static [AtomicUsize] = counters(cores);
    let per_task: &'static [AtomicUsize] = counters(PUBLIC_TASKS);
    let finished: &'static AtomicUsize = counter();

    match world.run(move || async move {
        for i in 0..PUBLIC_TASKS {
            spawn_public(move || async move {
                for _ in 0..4 {
                    thread_yield().await;
                }
                per_task[i].fetch_add(1, Ordering::AcqRel);
                per_core[mycore() as usize].fetch_add(1, Ordering::AcqRel);
                finished.fetch_add(1, Ordering::AcqRel);
            });
        }
        wait_for(finished, PUBLIC_TASKS).await;
    }) {
        Ok(_) => (),
        Err(e) => anyhow::bail!("run failed: {:?}", e),
    };

    for (i, runs) in per_task.iter().enumerate() {
        if runs.load(Ordering::Acquire) != 1 {
            anyhow::bail!("task {} ran {} times", i, runs.load(Ordering::Acquire));
        }
    }
    Ok(per_core.iter().map(|c| c.load(Ordering::Acquire)).collect())
}

//==============================================================================
// test_public_tasks_are_stolen()
//==============================================================================

/// Idle cores of the locale take over part of a backlog, and every task still runs exactly once.
#[test]
fn test_public_tasks_are_stolen() -> Result<()> {
    let per_core: Vec<usize> = do_spawn_public(test_config(1, 4))?;

    ensure_eq!(per_core.iter().sum::<usize>(), PUBLIC_TASKS);
    ensure_eq!(per_core.iter().filter(|n| **n > 0).count() > 1, true);
    Ok(())
}

//==============================================================================
// test_no_load_balancing()
//==============================================================================

/// Without load balancing, public tasks stay where they were spawned.
#[test]
fn test_no_load_balancing() -> Result<()> {
    let config: RuntimeConfig = RuntimeConfig {
        load_balance: LoadBalance::None,
        ..test_config(1, 4)
    };
    let per_core: Vec<usize> = do_spawn_public(config)?;

    ensure_eq!(per_core, vec![PUBLIC_TASKS, 0, 0, 0]);
    Ok(())
}

//==============================================================================
// test_stealing_stays_in_locale()
//==============================================================================

/// Public tasks spawned by a message handler only run on cores of the handler's locale.
#[test]
fn test_stealing_stays_in_locale() -> Result<()> {
    const TASKS: usize = 200;
    let world: World = match World::new(test_config(2, 2)) {
        Ok(world) => world,
        Err(e) => anyhow::bail!("failed to create world: {:?}", e),
    };
    let per_core: &'static [AtomicUsize] = counters(4);
    let finished: &'static AtomicUsize = counter();

    match world.run(move || async move {
        send_message(2, move || {
            for _ in 0..TASKS {
                spawn_public(move || async move {
                    thread_yield().await;
                    per_core[mycore() as usize].fetch_add(1, Ordering::AcqRel);
                    finished.fetch_add(1, Ordering::AcqRel);
                });
            }
        });
        flush(2);
        wait_for(finished, TASKS).await;
    }) {
        Ok(_) => (),
        Err(e) => anyhow::bail!("run failed: {:?}", e),
    };

    ensure_eq!(per_core[0].load(Ordering::Acquire), 0);
    ensure_eq!(per_core[1].load(Ordering::Acquire), 0);
    ensure_eq!(
        per_core[2].load(Ordering::Acquire) + per_core[3].load(Ordering::Acquire),
        TASKS
    );
    Ok(())
}

//==============================================================================
// test_private_tasks_run_in_order()
//==============================================================================

/// Private tasks run on the spawning core, oldest first.
#[test]
fn test_private_tasks_run_in_order() -> Result<()> {
    let world: World = match World::new(test_config(1, 2)) {
        Ok(world) => world,
        Err(e) => anyhow::bail!("failed to create world: {:?}", e),
    };
    let order: &'static AtomicUsize = counter();
    let misplaced: &'static AtomicUsize = counter();

    match world.run(move || async move {
        let seen: Rc<RefCell<Vec<usize>>> = Rc::new(RefCell::new(Vec::new()));
        for i in 0..100 {
            let seen: Rc<RefCell<Vec<usize>>> = seen.clone();
            spawn(async move {
                if mycore() != 0 || locale_of(mycore()) != 0 {
                    misplaced.fetch_add(1, Ordering::Relaxed);
                }
                seen.borrow_mut().push(i);
            });
        }
        while seen.borrow().len() < 100 {
            thread_yield().await;
        }
        if *seen.borrow() == (0..100).collect::<Vec<usize>>() {
            order.store(1, Ordering::Release);
        }
    }) {
        Ok(_) => (),
        Err(e) => anyhow::bail!("run failed: {:?}", e),
    };

    ensure_eq!(order.load(Ordering::Acquire), 1);
    ensure_eq!(misplaced.load(Ordering::Acquire), 0);
    Ok(())
}

//==============================================================================
// test_synchronization()
//==============================================================================

/// Tasks of one core coordinate through a mutex, a semaphore and a full/empty cell.
#[test]
fn test_synchronization() -> Result<()> {
    let world: World = match World::new(test_config(1, 1)) {
        Ok(world) => world,
        Err(e) => anyhow::bail!("failed to create world: {:?}", e),
    };
    let overlaps: &'static AtomicUsize = counter();
    let sum: &'static AtomicUsize = counter();

    match world.run(move || async move {
        let mutex: Rc<Mutex> = Rc::new(Mutex::new());
        let inside: Rc<Cell<bool>> = Rc::new(Cell::new(false));
        let finished: Rc<CountingSemaphore> = Rc::new(CountingSemaphore::new(0));
        for _ in 0..8 {
            let mutex: Rc<Mutex> = mutex.clone();
            let inside: Rc<Cell<bool>> = inside.clone();
            let finished: Rc<CountingSemaphore> = finished.clone();
            spawn(async move {
                for _ in 0..10 {
                    mutex.lock().await;
                    if inside.replace(true) {
                        overlaps.fetch_add(1, Ordering::Relaxed);
                    }
                    thread_yield().await;
                    inside.set(false);
                    if mutex.unlock().is_err() {
                        overlaps.fetch_add(1, Ordering::Relaxed);
                    }
                }
                finished.increment(1);
            });
        }
        finished.decrement(8).await;

        let cell: Rc<FullEmpty<usize>> = Rc::new(FullEmpty::new());
        let producer: Rc<FullEmpty<usize>> = cell.clone();
        spawn(async move {
            for i in 1..=100 {
                producer.write_ef(i).await;
            }
        });
        for _ in 0..100 {
            sum.fetch_add(cell.read_fe().await, Ordering::Relaxed);
        }
    }) {
        Ok(_) => (),
        Err(e) => anyhow::bail!("run failed: {:?}", e),
    };

    ensure_eq!(overlaps.load(Ordering::Acquire), 0);
    ensure_eq!(sum.load(Ordering::Acquire), 5050);
    Ok(())
}

//==============================================================================
// test_home_core()
//==============================================================================

/// Handlers run on their destination core.
#[test]
fn test_home_core() -> Result<()> {
    let world: World = match World::new(test_config(2, 2)) {
        Ok(world) => world,
        Err(e) => anyhow::bail!("failed to create world: {:?}", e),
    };
    let wrong: &'static AtomicUsize = counter();
    let ran: &'static AtomicUsize = counter();

    match world.run(move || async move {
        for destination in 0..4 as Core {
            send_message(destination, move || {
                if mycore() != destination {
                    wrong.fetch_add(1, Ordering::Relaxed);
                }
                ran.fetch_add(1, Ordering::AcqRel);
            });
            flush(destination);
        }
        wait_for(ran, 4).await;
    }) {
        Ok(_) => (),
        Err(e) => anyhow::bail!("run failed: {:?}", e),
    };

    ensure_eq!(wrong.load(Ordering::Acquire), 0);
    Ok(())
}
