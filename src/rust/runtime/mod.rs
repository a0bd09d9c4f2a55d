// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//======================================================================================================================
// Exports
//======================================================================================================================

pub mod aggregator;
pub mod collections;
pub mod completion;
pub mod condition_variable;
pub mod context;
pub mod count_condition_variable;
pub mod delegate;
pub mod fail;
pub mod full_empty;
pub mod gaddr;
pub mod limits;
pub mod logging;
pub mod memory;
pub mod message;
pub mod network;
pub mod scheduler;
pub mod semaphore;
pub mod tasks;
pub mod timer;

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::runtime::{
    fail::Fail,
    limits::MAX_LOCALE_CORES,
};
use ::std::ops::Range;

//======================================================================================================================
// Structures
//======================================================================================================================

/// Identifies one core (one OS thread running one scheduler) across the whole runtime.
pub type Core = u16;

/// Identifies one locale, a group of cores sharing a memory domain.
pub type Locale = u16;

/// Shape of a run: `locales` groups of `locale_cores` cores each. Core ids are laid out locale by locale, so
/// `core = locale * locale_cores + local_index`.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Topology {
    locales: u16,
    locale_cores: u16,
}

//======================================================================================================================
// Associate Functions
//======================================================================================================================

impl Topology {
    /// Validates and builds a topology.
    pub fn new(locales: usize, locale_cores: usize) -> Result<Self, Fail> {
        if locales == 0 || locale_cores == 0 {
            let cause: String = format!("empty topology (locales={}, locale_cores={})", locales, locale_cores);
            error!("new(): {}", cause);
            return Err(Fail::new(libc::EINVAL, &cause));
        }
        if locale_cores > MAX_LOCALE_CORES {
            let cause: String = format!("too many cores per locale (locale_cores={})", locale_cores);
            error!("new(): {}", cause);
            return Err(Fail::new(libc::EINVAL, &cause));
        }
        match locales.checked_mul(locale_cores) {
            Some(cores) if cores <= Core::MAX as usize => Ok(Self {
                locales: locales as u16,
                locale_cores: locale_cores as u16,
            }),
            _ => {
                let cause: String = format!("too many cores (locales={}, locale_cores={})", locales, locale_cores);
                error!("new(): {}", cause);
                Err(Fail::new(libc::EINVAL, &cause))
            },
        }
    }

    pub fn locales(&self) -> usize {
        self.locales as usize
    }

    pub fn locale_cores(&self) -> usize {
        self.locale_cores as usize
    }

    pub fn cores(&self) -> usize {
        self.locales as usize * self.locale_cores as usize
    }

    pub fn locale_of(&self, core: Core) -> Locale {
        core / self.locale_cores
    }

    /// Position of `core` within its locale.
    pub fn local_index(&self, core: Core) -> usize {
        (core % self.locale_cores) as usize
    }

    pub fn first_core(&self, locale: Locale) -> Core {
        locale * self.locale_cores
    }

    pub fn cores_of(&self, locale: Locale) -> Range<Core> {
        let first: Core = self.first_core(locale);
        first..(first + self.locale_cores)
    }

    /// The core of `locale` that drains and ships everything bound for `partner`.
    pub fn sender_for(&self, locale: Locale, partner: Locale) -> Core {
        self.first_core(locale) + partner % self.locale_cores
    }

    /// The core of `partner` that receives buffers shipped from `locale`.
    pub fn receiver_for(&self, locale: Locale, partner: Locale) -> Core {
        self.first_core(partner) + locale % self.locale_cores
    }
}

//======================================================================================================================
// Unit Tests
//======================================================================================================================
