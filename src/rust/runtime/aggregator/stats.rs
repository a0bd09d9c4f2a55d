// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//======================================================================================================================
// Imports
//======================================================================================================================

use ::std::sync::atomic::{
    AtomicU64,
    Ordering,
};

//======================================================================================================================
// Structures
//======================================================================================================================

/// Counters kept by one core's aggregator. Only the owning core writes them; anyone may read.
#[derive(Default)]
pub struct AggregatorStats {
    enqueued: AtomicU64,
    delivered: AtomicU64,
    immediate_sends: AtomicU64,
    buffers_sent: AtomicU64,
    buffers_received: AtomicU64,
    bytes_serialized: AtomicU64,
    flushes: AtomicU64,
    idle_flushes: AtomicU64,
}

/// Point-in-time copy of [AggregatorStats]. Snapshots of several cores add up.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct AggregatorSnapshot {
    pub enqueued: u64,
    pub delivered: u64,
    pub immediate_sends: u64,
    pub buffers_sent: u64,
    pub buffers_received: u64,
    pub bytes_serialized: u64,
    pub flushes: u64,
    pub idle_flushes: u64,
}

//======================================================================================================================
// Associate Functions
//======================================================================================================================

impl AggregatorStats {
    pub fn new() -> Self {
        Self::default()
    }

    fn bump(counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }

    pub fn record_enqueue(&self) {
        Self::bump(&self.enqueued, 1);
    }

    pub fn record_delivered(&self, n: usize) {
        Self::bump(&self.delivered, n as u64);
    }

    pub fn record_immediate(&self) {
        Self::bump(&self.immediate_sends, 1);
    }

    pub fn record_buffer_sent(&self) {
        Self::bump(&self.buffers_sent, 1);
    }

    pub fn record_buffer_received(&self) {
        Self::bump(&self.buffers_received, 1);
    }

    pub fn record_serialized(&self, bytes: usize) {
        Self::bump(&self.bytes_serialized, bytes as u64);
    }

    pub fn record_flush(&self) {
        Self::bump(&self.flushes, 1);
    }

    pub fn record_idle_flush(&self) {
        Self::bump(&self.idle_flushes, 1);
    }

    pub fn snapshot(&self) -> AggregatorSnapshot {
        AggregatorSnapshot {
            enqueued: self.enqueued.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            immediate_sends: self.immediate_sends.load(Ordering::Relaxed),
            buffers_sent: self.buffers_sent.load(Ordering::Relaxed),
            buffers_received: self.buffers_received.load(Ordering::Relaxed),
            bytes_serialized: self.bytes_serialized.load(Ordering::Relaxed),
            flushes: self.flushes.load(Ordering::Relaxed),
            idle_flushes: self.idle_flushes.load(Ordering::Relaxed),
        }
    }
}

//======================================================================================================================
// Trait Implementations
//======================================================================================================================

impl ::std::ops::Add for AggregatorSnapshot {
    type Output = AggregatorSnapshot;

    fn add(self, other: AggregatorSnapshot) -> AggregatorSnapshot {
        AggregatorSnapshot {
            enqueued: self.enqueued + other.enqueued,
            delivered: self.delivered + other.delivered,
            immediate_sends: self.immediate_sends + other.immediate_sends,
            buffers_sent: self.buffers_sent + other.buffers_sent,
            buffers_received: self.buffers_received + other.buffers_received,
            bytes_serialized: self.bytes_serialized + other.bytes_serialized,
            flushes: self.flushes + other.flushes,
            idle_flushes: self.idle_flushes + other.idle_flushes,
        }
    }
}

impl ::std::iter::Sum for AggregatorSnapshot {
    fn sum<I: Iterator<Item = AggregatorSnapshot>>(iter: I) -> AggregatorSnapshot {
        iter.fold(AggregatorSnapshot::default(), |total, snapshot| total + snapshot)
    }
}

//======================================================================================================================
// Unit Tests
//======================================================================================================================
