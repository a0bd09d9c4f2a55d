// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

mod intrusive_queue;

pub use self::intrusive_queue::{
    IntrusiveQueue,
    IntrusivelyQueueable,
};
