// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

mod common;

//==============================================================================
// Imports
//==============================================================================

use ::anyhow::Result;
use ::pgas::{
    census,
    cores,
    ensure_eq,
    flush,
    mycore,
    runtime::memory::{
        BufferState,
        CensusSnapshot,
    },
    send_message,
    AggregatorSnapshot,
    CompletionEvent,
    Core,
    GlobalAddress,
    ReuseMessagePool,
    RuntimeConfig,
    World,
};
use ::std::sync::atomic::{
    AtomicUsize,
    Ordering,
};
use common::{
    counter,
    test_config,
    wait_for,
};

//==============================================================================
// test_census_is_conserved()
//==============================================================================

/// Buffers move between states but are never lost or duplicated.
#[test]
fn test_census_is_conserved() -> Result<()> {
    let config: RuntimeConfig = test_config(2, 2);
    let expected: usize = 4 * config.rdma_buffers;
    let world: World = match World::new(config) {
        Ok(world) => world,
        Err(e) => anyhow::bail!("failed to create world: {:?}", e),
    };
    let allocated: &'static AtomicUsize = counter();
    let counted: &'static AtomicUsize = counter();
    let filling: &'static AtomicUsize = counter();

    let stats: AggregatorSnapshot = match world.run(move || async move {
        let done: CompletionEvent = CompletionEvent::new(4 * 500);
        let reply_to: GlobalAddress<CompletionEvent> = GlobalAddress::local(&done);
        let home: Core = mycore();
        for i in 0..4 * 500 {
            send_message((i % cores()) as Core, move || {
                send_message(home, move || unsafe { reply_to.get() }.complete(1));
            });
        }
        for destination in 0..cores() {
            flush(destination as Core);
        }
        done.wait().await;
        census(|c| {
            allocated.store(c.allocated(), Ordering::Release);
            counted.store(c.total(), Ordering::Release);
            filling.store(c.count(BufferState::Filling), Ordering::Release);
        });
    }) {
        Ok(stats) => stats,
        Err(e) => anyhow::bail!("run failed: {:?}", e),
    };

    ensure_eq!(allocated.load(Ordering::Acquire), expected);
    ensure_eq!(counted.load(Ordering::Acquire) >= expected, true);
    ensure_eq!(filling.load(Ordering::Acquire) <= 4, true);
    ensure_eq!(stats.buffers_received, stats.buffers_sent);

    // Once every core has stopped, each buffer is counted in exactly one state.
    let census: CensusSnapshot = match world.census() {
        Some(census) => census,
        None => anyhow::bail!("no census after the run"),
    };
    ensure_eq!(census.allocated(), expected);
    ensure_eq!(census.total(), census.allocated());
    ensure_eq!(census.count(BufferState::Filling), 0);
    Ok(())
}

//==============================================================================
// test_reuse_message_pool()
//==============================================================================

/// Pooled messages go out, come back home and go out again.
#[test]
fn test_reuse_message_pool() -> Result<()> {
    const SENDS: usize = 300;
    let world: World = match World::new(test_config(2, 2)) {
        Ok(world) => world,
        Err(e) => anyhow::bail!("failed to create world: {:?}", e),
    };
    let hits: &'static AtomicUsize = counter();
    let leftover: &'static AtomicUsize = counter();

    match world.run(move || async move {
        let pool: ReuseMessagePool<_> = ReuseMessagePool::local(8);
        for i in 0..SENDS {
            let destination: Core = (1 + i % 3) as Core;
            pool.send(destination, move || {
                hits.fetch_add(1, Ordering::AcqRel);
            })
            .await;
            flush(destination);
        }
        pool.drain().await;
        leftover.store(pool.total() - pool.available() + pool.outstanding(), Ordering::Release);
    }) {
        Ok(_) => (),
        Err(e) => anyhow::bail!("run failed: {:?}", e),
    };

    ensure_eq!(hits.load(Ordering::Acquire), SENDS);
    ensure_eq!(leftover.load(Ordering::Acquire), 0);
    Ok(())
}

//==============================================================================
// test_global_address_home()
//==============================================================================

/// An address travels to another core and back, and is only dereferenced at home.
#[test]
fn test_global_address_home() -> Result<()> {
    let world: World = match World::new(test_config(2, 1)) {
        Ok(world) => world,
        Err(e) => anyhow::bail!("failed to create world: {:?}", e),
    };
    let seen: &'static AtomicUsize = counter();

    match world.run(move || async move {
        let value: usize = 42;
        let address: GlobalAddress<usize> = GlobalAddress::local(&value);
        send_message(1, move || {
            let back: GlobalAddress<usize> = address;
            send_message(back.core(), move || {
                // Safety: the value lives until the reply has been seen.
                seen.store(*unsafe { back.get() }, Ordering::Release);
            });
        });
        flush(1);
        wait_for(seen, 42).await;
    }) {
        Ok(_) => (),
        Err(e) => anyhow::bail!("run failed: {:?}", e),
    };

    ensure_eq!(seen.load(Ordering::Acquire), 42);
    Ok(())
}

//==============================================================================
// test_global_address_elsewhere()
//==============================================================================

/// Dereferencing an address away from its home core brings the run down.
#[test]
fn test_global_address_elsewhere() -> Result<()> {
    let world: World = match World::new(test_config(2, 1)) {
        Ok(world) => world,
        Err(e) => anyhow::bail!("failed to create world: {:?}", e),
    };

    let result: Result<AggregatorSnapshot, pgas::Fail> = world.run(|| async {
        let value: usize = 7;
        let address: GlobalAddress<usize> = GlobalAddress::local(&value);
        let done: CompletionEvent = CompletionEvent::new(1);
        send_message(1, move || {
            let _ = unsafe { address.get() };
        });
        flush(1);
        done.wait().await;
    });

    ensure_eq!(result.err().map(|e| e.errno), Some(libc::EIO));
    Ok(())
}
