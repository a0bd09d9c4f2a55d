// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//======================================================================================================================
// Exports
//======================================================================================================================

pub mod manager;
pub mod steal_queue;

pub use self::{
    manager::TaskManager,
    steal_queue::StealQueue,
};

//======================================================================================================================
// Imports
//======================================================================================================================

use ::futures::future::LocalBoxFuture;

//======================================================================================================================
// Structures
//======================================================================================================================

/// Work that may run on any core of the locale. It is built into a future by the core that ends up running it.
pub type Task = Box<dyn FnOnce() -> LocalBoxFuture<'static, ()> + Send>;

/// Work bound to the core that spawned it.
pub type PrivateTask = LocalBoxFuture<'static, ()>;
