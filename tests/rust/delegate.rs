// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

mod common;

//==============================================================================
// Imports
//==============================================================================

use ::anyhow::Result;
use ::pgas::{
    cores,
    delegate,
    ensure_eq,
    mycore,
    AggregatorSnapshot,
    CompletionEvent,
    Core,
    World,
};
use ::std::{
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
};

//==============================================================================
// test_call_returns_result()
//==============================================================================

/// A call runs on the destination core and hands its result back to the caller.
#[test]
fn test_call_returns_result() -> Result<()> {
    let world: World = match World::new(test_config(2, 2)) {
        Ok(world) => world,
        Err(e) => anyhow::bail!("failed to create world: {:?}", e),
    };
    let answers: &'static [AtomicUsize] = counters(4);

    match world.run(move || async move {
        for destination in 0..cores() as Core {
            let answer: usize = delegate::call(destination, move || 10 * mycore() as usize + 1).await;
            answers[destination as usize].store(answer, Ordering::Release);
        }
    }) {
        Ok(_) => (),
        Err(e) => anyhow::bail!("run failed: {:?}", e),
    };

    let answers: Vec<usize> = answers.iter().map(|a| a.load(Ordering::Acquire)).collect();
    ensure_eq!(answers, vec![1, 11, 21, 31]);
    Ok(())
}

//==============================================================================
// test_local_call_sends_nothing()
//==============================================================================

/// A call to the calling core runs inline.
#[test]
fn test_local_call_sends_nothing() -> Result<()> {
    let world: World = match World::new(test_config(2, 1)) {
        Ok(world) => world,
        Err(e) => anyhow::bail!("failed to create world: {:?}", e),
    };
    let answer: &'static AtomicUsize = counter();

    let stats: AggregatorSnapshot = match world.run(move || async move {
        let value: usize = delegate::call(mycore(), || 7).await;
        answer.store(value, Ordering::Release);
    }) {
        Ok(stats) => stats,
        Err(e) => anyhow::bail!("run failed: {:?}", e),
    };

    ensure_eq!(answer.load(Ordering::Acquire), 7);
    ensure_eq!(stats.enqueued, 0);
    Ok(())
}

//==============================================================================
// test_calls_update_owner_state()
//==============================================================================

/// Calls made back to back from one core each update state owned by their destination, and see earlier updates.
#[test]
fn test_calls_update_owner_state() -> Result<()> {
    const CALLS: usize = 200;
    let world: World = match World::new(test_config(2, 2)) {
        Ok(world) => world,
        Err(e) => anyhow::bail!("failed to create world: {:?}", e),
    };
    let owned: &'static [AtomicUsize] = counters(4);
    let stale: &'static AtomicUsize = counter();

    match world.run(move || async move {
        for i in 0..CALLS {
            let destination: Core = (i % 4) as Core;
            let before: usize = delegate::call(destination, move || {
                owned[mycore() as usize].fetch_add(1, Ordering::Relaxed)
            })
            .await;
            if before != i / 4 {
                stale.fetch_add(1, Ordering::Relaxed);
            }
        }
    }) {
        Ok(_) => (),
        Err(e) => anyhow::bail!("run failed: {:?}", e),
    };

    ensure_eq!(stale.load(Ordering::Acquire), 0);
    for n in owned.iter() {
        ensure_eq!(n.load(Ordering::Acquire), CALLS / 4);
    }
    Ok(())
}

//==============================================================================
// test_call_async_completes()
//==============================================================================

/// Asynchronous calls are all done once their completion event fires.
#[test]
fn test_call_async_completes() -> Result<()> {
    const CALLS: usize = 500;
    let world: World = match World::new(test_config(2, 2)) {
        Ok(world) => world,
        Err(e) => anyhow::bail!("failed to create world: {:?}", e),
    };
    let hits: &'static AtomicUsize = counter();
    let seen: &'static AtomicUsize = counter();

    match world.run(move || async move {
        let done: Rc<CompletionEvent> = Rc::new(CompletionEvent::new(0));
        for i in 0..CALLS {
            delegate::call_async(&done, (i % cores()) as Core, move || {
                hits.fetch_add(1, Ordering::AcqRel);
            });
        }
        done.wait().await;
        seen.store(hits.load(Ordering::Acquire), Ordering::Release);
    }) {
        Ok(_) => (),
        Err(e) => anyhow::bail!("run failed: {:?}", e),
    };

    ensure_eq!(seen.load(Ordering::Acquire), CALLS);
    Ok(())
}
