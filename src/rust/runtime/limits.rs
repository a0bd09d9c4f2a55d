// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

/// Largest number of cores in one locale. Buffer headers keep one byte count per core of the destination locale
/// and demultiplex with a 64-bit section mask.
pub const MAX_LOCALE_CORES: usize = 64;

/// Largest closure a message may carry.
pub const MAX_MESSAGE_BODY: usize = 4096;

/// Bytes in front of every serialized message: deserializer address, body length, source core, reserved.
pub const MESSAGE_HEADER_BYTES: usize = 16;

/// Serialized message bodies are padded to this alignment.
pub const MESSAGE_ALIGNMENT: usize = 8;

/// Depth of the per-list prefetch ring.
pub const PREFETCH_DIST: usize = 6;

/// An enqueue hints the caller to yield once every this many enqueues.
pub const YIELD_WAIT: u32 = 2;

/// Largest number of buffers one core may have in flight to one locale.
pub const MAX_IN_FLIGHT_PER_LOCALE: usize = 16;

/// Smallest aggregation buffer: it must always hold the largest message.
pub const MIN_BUFFER_SIZE: usize = 2 * (MESSAGE_HEADER_BYTES + MAX_MESSAGE_BODY);

/// Most arrivals handled by one communicator poll.
pub const MAX_ARRIVALS_PER_POLL: usize = 64;
