// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

mod common;

//==============================================================================
// Imports
//==============================================================================

use ::anyhow::Result;
use ::pgas::{
    cores,
    ensure_eq,
    flush,
    mycore,
    pending_messages,
    send_message,
    send_message_async,
    AggregatorSnapshot,
    CompletionEvent,
    Core,
    GlobalAddress,
    Message,
    RuntimeConfig,
    Topology,
    World,
};
use ::std::sync::atomic::{
    AtomicUsize,
    Ordering,
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

/// Number of requests sent by round trip tests.
const ROUND_TRIPS: usize = 1000;

//==============================================================================
// Standalone Functions
//==============================================================================

/// Sends `count` requests from core 0, spread over every core, and waits for a reply to each. Returns the counters of
/// the run and how many requests each core served.
fn do_round_trips(config: RuntimeConfig, count: usize) -> Result<(AggregatorSnapshot, Vec<usize>)> {
    let world: World = match World::new(config) {
        Ok(world) => world,
        Err(e) => anyhow::bail!("failed to create world: {:?}", e),
    };
    let served: &'static [AtomicUsize] = counters(world.topology().cores());
    let leftover: &'static AtomicUsize = counter();

    let stats: AggregatorSnapshot = match world.run(move || async move {
        let done: CompletionEvent = CompletionEvent::new(count as i64);
        let reply_to: GlobalAddress<CompletionEvent> = GlobalAddress::local(&done);
        let home: Core = mycore();
        for i in 0..count {
            let destination: Core = (i % cores()) as Core;
            send_message_async(destination, move || {
                served[mycore() as usize].fetch_add(1, Ordering::Relaxed);
                send_message(home, move || {
                    // Safety: the event outlives every reply, since the sender waits for all of them.
                    unsafe { reply_to.get() }.complete(1);
                });
            })
            .await;
        }
        for destination in 0..cores() {
            flush(destination as Core);
        }
        done.wait().await;
        leftover.store(pending_messages(), Ordering::Release);
    }) {
        Ok(stats) => stats,
        Err(e) => anyhow::bail!("run failed: {:?}", e),
    };

    // Every reply is in, so no list anywhere may still hold a message.
    ensure_eq!(leftover.load(Ordering::Acquire), 0);
    Ok((stats, served.iter().map(|c| c.load(Ordering::Acquire)).collect()))
}

//==============================================================================
// test_round_trips_across_locales()
//==============================================================================

/// Every request reaches its core and every reply comes back, through both the local and the remote paths.
#[test]
fn test_round_trips_across_locales() -> Result<()> {
    let (stats, served): (AggregatorSnapshot, Vec<usize>) = do_round_trips(test_config(2, 2), ROUND_TRIPS)?;

    ensure_eq!(served.len(), 4);
    for n in served.iter() {
        ensure_eq!(*n, ROUND_TRIPS / 4);
    }
    ensure_eq!(stats.enqueued, 2 * ROUND_TRIPS as u64);
    ensure_eq!(stats.delivered, stats.enqueued);
    ensure_eq!(stats.buffers_sent > 0, true);
    ensure_eq!(stats.buffers_received, stats.buffers_sent);
    ensure_eq!(stats.immediate_sends, 0);
    Ok(())
}

//==============================================================================
// test_single_locale()
//==============================================================================

/// Messages within one locale never touch a buffer.
#[test]
fn test_single_locale() -> Result<()> {
    let (stats, served): (AggregatorSnapshot, Vec<usize>) = do_round_trips(test_config(1, 4), ROUND_TRIPS)?;

    ensure_eq!(served.iter().sum::<usize>(), ROUND_TRIPS);
    ensure_eq!(stats.delivered, 2 * ROUND_TRIPS as u64);
    ensure_eq!(stats.buffers_sent, 0);
    Ok(())
}

//==============================================================================
// test_immediate_sends()
//==============================================================================

/// With aggregation off, remote messages ride in send contexts of their own.
#[test]
fn test_immediate_sends() -> Result<()> {
    let config: RuntimeConfig = RuntimeConfig {
        enable_aggregation: false,
        ..test_config(2, 1)
    };
    let (stats, served): (AggregatorSnapshot, Vec<usize>) = do_round_trips(config, 200)?;

    ensure_eq!(served, vec![100, 100]);
    ensure_eq!(stats.immediate_sends > 0, true);
    ensure_eq!(stats.delivered, stats.enqueued);
    Ok(())
}

//==============================================================================
// test_idle_flush()
//==============================================================================

/// A lone message goes out once its sender runs out of work, even though no timeout would ever fire.
#[test]
fn test_idle_flush() -> Result<()> {
    let config: RuntimeConfig = RuntimeConfig {
        autoflush_ticks: 1 << 62,
        ..test_config(2, 1)
    };
    let world: World = match World::new(config) {
        Ok(world) => world,
        Err(e) => anyhow::bail!("failed to create world: {:?}", e),
    };

    let stats: AggregatorSnapshot = match world.run(|| async {
        let done: CompletionEvent = CompletionEvent::new(1);
        let reply_to: GlobalAddress<CompletionEvent> = GlobalAddress::local(&done);
        let home: Core = mycore();
        send_message(1, move || {
            send_message(home, move || unsafe { reply_to.get() }.complete(1));
        });
        done.wait().await;
    }) {
        Ok(stats) => stats,
        Err(e) => anyhow::bail!("run failed: {:?}", e),
    };

    ensure_eq!(stats.delivered, 2);
    ensure_eq!(stats.idle_flushes >= 2, true);
    Ok(())
}

//==============================================================================
// test_size_flush()
//==============================================================================

/// With idle and timeout flushes off, filling a destination's list past the target size is what sends it.
#[test]
fn test_size_flush() -> Result<()> {
    let config: RuntimeConfig = RuntimeConfig {
        autoflush_ticks: 1 << 62,
        flush_on_idle: false,
        size_flush: true,
        target_size: 256,
        ..test_config(2, 1)
    };
    let world: World = match World::new(config) {
        Ok(world) => world,
        Err(e) => anyhow::bail!("failed to create world: {:?}", e),
    };
    let hits: &'static AtomicUsize = counter();

    let stats: AggregatorSnapshot = match world.run(move || async move {
        for _ in 0..64 {
            send_message_async(1, move || {
                hits.fetch_add(1, Ordering::Relaxed);
            })
            .await;
        }
        wait_for(hits, 1).await;
    }) {
        Ok(stats) => stats,
        Err(e) => anyhow::bail!("run failed: {:?}", e),
    };

    ensure_eq!(hits.load(Ordering::Acquire) >= 1, true);
    ensure_eq!(stats.buffers_sent >= 1, true);
    ensure_eq!(stats.idle_flushes, 0);
    Ok(())
}

//==============================================================================
// test_fifo_per_sender()
//==============================================================================

/// Messages from one core to another are delivered in the order they were sent, across buffers.
#[test]
fn test_fifo_per_sender() -> Result<()> {
    const COUNT: usize = 2000;
    let world: World = match World::new(test_config(2, 2)) {
        Ok(world) => world,
        Err(e) => anyhow::bail!("failed to create world: {:?}", e),
    };
    let next: &'static AtomicUsize = counter();
    let disorder: &'static AtomicUsize = counter();

    match world.run(move || async move {
        for i in 0..COUNT {
            send_message_async(3, move || {
                if next.fetch_add(1, Ordering::AcqRel) != i {
                    disorder.fetch_add(1, Ordering::Relaxed);
                }
            })
            .await;
        }
        flush(3);
        wait_for(next, COUNT).await;
    }) {
        Ok(_) => (),
        Err(e) => anyhow::bail!("run failed: {:?}", e),
    };

    ensure_eq!(next.load(Ordering::Acquire), COUNT);
    ensure_eq!(disorder.load(Ordering::Acquire), 0);
    Ok(())
}

//==============================================================================
// test_locale_enqueue()
//==============================================================================

/// Messages put on a destination's locale-wide list arrive like any other.
#[test]
fn test_locale_enqueue() -> Result<()> {
    let world: World = match World::new(test_config(2, 2)) {
        Ok(world) => world,
        Err(e) => anyhow::bail!("failed to create world: {:?}", e),
    };
    let hits: &'static [AtomicUsize] = counters(4);

    match world.run(move || async move {
        for i in 0..400 {
            let destination: Core = (i % 4) as Core;
            Message::new(destination, move || {
                hits[mycore() as usize].fetch_add(1, Ordering::Relaxed);
            })
            .locale_enqueue();
        }
        for destination in 0..4 {
            flush(destination);
        }
        for c in hits.iter() {
            wait_for(c, 100).await;
        }
    }) {
        Ok(_) => (),
        Err(e) => anyhow::bail!("run failed: {:?}", e),
    };

    for c in hits.iter() {
        ensure_eq!(c.load(Ordering::Acquire), 100);
    }
    Ok(())
}

//==============================================================================
// test_explicit_flush_from_any_core()
//==============================================================================

/// An explicit flush ships messages right away even when the calling core is not the one that sends to the
/// destination's locale, and neither the timeout nor the idle flusher would ever fire.
#[test]
fn test_explicit_flush_from_any_core() -> Result<()> {
    let config: RuntimeConfig = RuntimeConfig {
        autoflush_ticks: 10_000_000_000,
        flush_on_idle: false,
        ..test_config(2, 2)
    };
    let world: World = match World::new(config) {
        Ok(world) => world,
        Err(e) => anyhow::bail!("failed to create world: {:?}", e),
    };
    let topology: Topology = world.topology();
    ensure_eq!(topology.sender_for(0, 1) != 0, true);
    ensure_eq!(topology.sender_for(1, 0) != 3, true);
    let hits: &'static AtomicUsize = counter();

    let stats: AggregatorSnapshot = match world.run(move || async move {
        let home: Core = mycore();
        send_message(3, move || {
            hits.fetch_add(1, Ordering::AcqRel);
            send_message(home, move || {
                hits.fetch_add(1, Ordering::AcqRel);
            });
            flush(home);
        });
        flush(3);
        wait_for(hits, 2).await;
    }) {
        Ok(stats) => stats,
        Err(e) => anyhow::bail!("run failed: {:?}", e),
    };

    ensure_eq!(hits.load(Ordering::Acquire), 2);
    ensure_eq!(stats.idle_flushes, 0);
    ensure_eq!(stats.buffers_sent, 2);
    Ok(())
}

//==============================================================================
// test_timeout_flush()
//==============================================================================

/// With the idle flusher off and no explicit flush, the send timeout alone gets every message across.
#[test]
fn test_timeout_flush() -> Result<()> {
    const COUNT: usize = 200;
    let config: RuntimeConfig = RuntimeConfig {
        autoflush_ticks: 100_000,
        flush_on_idle: false,
        ..test_config(2, 2)
    };
    let world: World = match World::new(config) {
        Ok(world) => world,
        Err(e) => anyhow::bail!("failed to create world: {:?}", e),
    };
    let hits: &'static AtomicUsize = counter();

    let stats: AggregatorSnapshot = match world.run(move || async move {
        let home: Core = mycore();
        for i in 0..COUNT {
            let destination: Core = (2 + i % 2) as Core;
            send_message_async(destination, move || {
                send_message(home, move || {
                    hits.fetch_add(1, Ordering::AcqRel);
                });
            })
            .await;
        }
        wait_for(hits, COUNT).await;
    }) {
        Ok(stats) => stats,
        Err(e) => anyhow::bail!("run failed: {:?}", e),
    };

    ensure_eq!(hits.load(Ordering::Acquire), COUNT);
    ensure_eq!(stats.idle_flushes, 0);
    ensure_eq!(stats.buffers_received, stats.buffers_sent);
    ensure_eq!(stats.delivered, 2 * COUNT as u64);
    Ok(())
}
