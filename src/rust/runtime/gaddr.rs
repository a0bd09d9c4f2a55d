// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::runtime::{
    context,
    Core,
};
use ::std::fmt;

//======================================================================================================================
// Structures
//======================================================================================================================

/// Names a piece of core-local state from anywhere in the run. It may travel inside messages, but it can only be
/// dereferenced on its home core.
pub struct GlobalAddress<T> {
    core: Core,
    ptr: *const T,
}

//======================================================================================================================
// Associate Functions
//======================================================================================================================

impl<T> GlobalAddress<T> {
    pub fn new(core: Core, ptr: *const T) -> Self {
        Self { core, ptr }
    }

    /// Address of `value`, which lives on the calling core.
    pub fn local(value: &T) -> Self {
        Self::new(context::mycore(), value as *const T)
    }

    pub fn core(&self) -> Core {
        self.core
    }

    pub fn as_ptr(&self) -> *const T {
        self.ptr
    }

    /// Dereferences the address. Doing so anywhere but on the home core is a fatal error.
    ///
    /// # Safety
    ///
    /// The caller guarantees the pointee is still alive for `'a`.
    pub unsafe fn get<'a>(&self) -> &'a T {
        let mycore: Core = context::mycore();
        assert!(
            mycore == self.core,
            "get(): address of core {} dereferenced on core {}",
            self.core,
            mycore
        );
        &*self.ptr
    }
}

//======================================================================================================================
// Trait Implementations
//======================================================================================================================

impl<T> Clone for GlobalAddress<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for GlobalAddress<T> {}

impl<T> PartialEq for GlobalAddress<T> {
    fn eq(&self, other: &Self) -> bool {
        self.core == other.core && self.ptr == other.ptr
    }
}

impl<T> Eq for GlobalAddress<T> {}

impl<T> fmt::Debug for GlobalAddress<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "GlobalAddress({}, {:p})", self.core, self.ptr)
    }
}

/// The pointer is only ever dereferenced on its home core.
unsafe impl<T> Send for GlobalAddress<T> {}
unsafe impl<T> Sync for GlobalAddress<T> {}
