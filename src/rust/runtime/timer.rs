// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//======================================================================================================================
// Imports
//======================================================================================================================

use ::std::{
    cell::Cell,
    time::Instant,
};

//======================================================================================================================
// Structures
//======================================================================================================================

/// Core-local tick source. Ticks are nanoseconds since a runtime-wide epoch, so timestamps taken on different cores
/// of the same run can be compared. The last reading is cached so hot paths can look at time without a clock read.
pub struct TickClock {
    epoch: Instant,
    now: Cell<u64>,
}

//======================================================================================================================
// Associate Functions
//======================================================================================================================

impl TickClock {
    pub fn new(epoch: Instant) -> Self {
        let clock: Self = Self {
            epoch,
            now: Cell::new(0),
        };
        clock.tick();
        clock
    }

    /// Reads the clock and caches the reading.
    pub fn tick(&self) -> u64 {
        let now: u64 = self.epoch.elapsed().as_nanos() as u64;
        self.now.set(now);
        now
    }

    /// Last cached reading.
    pub fn now(&self) -> u64 {
        self.now.get()
    }
}

//======================================================================================================================
// Unit Tests
//======================================================================================================================
