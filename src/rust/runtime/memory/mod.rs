// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

mod rdma_buffer;
mod reuse_list;
mod reuse_pool;

//==============================================================================
// Exports
//==============================================================================

pub use self::{
    rdma_buffer::{
        BufferCensus,
        BufferState,
        CensusSnapshot,
        RDMABuffer,
        SendSlot,
    },
    reuse_list::ReuseList,
    reuse_pool::ReusePool,
};
