// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::runtime::{
    limits::MAX_ARRIVALS_PER_POLL,
    memory::RDMABuffer,
    network::{
        Arrival,
        Communicator,
        SendContext,
    },
    Core,
};
use ::crossbeam_channel::{
    Receiver,
    Sender,
};
use ::std::sync::atomic::{
    AtomicUsize,
    Ordering,
};

//======================================================================================================================
// Structures
//======================================================================================================================

struct Endpoint {
    arrivals_tx: Sender<Arrival>,
    arrivals_rx: Receiver<Arrival>,
    contexts_tx: Sender<SendContext>,
    contexts_rx: Receiver<SendContext>,
}

/// Communicator between cores of one process. Every core has an arrival channel and a bounded stock of send
/// contexts; buffers move by handing their boxes over.
pub struct InProcessFabric {
    endpoints: Vec<Endpoint>,
    in_flight: AtomicUsize,
}

//======================================================================================================================
// Associate Functions
//======================================================================================================================

impl InProcessFabric {
    pub fn new(cores: usize, send_contexts: usize, send_context_size: usize) -> Self {
        let endpoints: Vec<Endpoint> = (0..cores)
            .map(|core| {
                let (arrivals_tx, arrivals_rx): (Sender<Arrival>, Receiver<Arrival>) =
                    ::crossbeam_channel::unbounded();
                let (contexts_tx, contexts_rx): (Sender<SendContext>, Receiver<SendContext>) =
                    ::crossbeam_channel::bounded(send_contexts.max(1));
                for _ in 0..send_contexts {
                    // The channel was sized for every context.
                    let _ = contexts_tx.try_send(SendContext::new(core as Core, send_context_size));
                }
                Endpoint {
                    arrivals_tx,
                    arrivals_rx,
                    contexts_tx,
                    contexts_rx,
                }
            })
            .collect();
        Self {
            endpoints,
            in_flight: AtomicUsize::new(0),
        }
    }

    fn endpoint(&self, core: Core, operation: &str) -> &Endpoint {
        match self.endpoints.get(core as usize) {
            Some(endpoint) => endpoint,
            None => panic!("{}(): core {} is not part of the fabric", operation, core),
        }
    }

    fn deliver(&self, core: Core, arrival: Arrival) {
        self.in_flight.fetch_add(1, Ordering::AcqRel);
        // Both ends of the channel live in the fabric, so sending cannot fail.
        let _ = self.endpoint(core, "deliver").arrivals_tx.send(arrival);
    }

    /// Send contexts `core` has not handed out.
    pub fn free_send_contexts(&self, core: Core) -> usize {
        self.endpoint(core, "free_send_contexts").contexts_rx.len()
    }
}

//======================================================================================================================
// Trait Implementations
//======================================================================================================================

impl Communicator for InProcessFabric {
    fn try_get_send_context(&self, source: Core) -> Option<SendContext> {
        self.endpoint(source, "try_get_send_context").contexts_rx.try_recv().ok()
    }

    fn post_send(&self, context: SendContext) {
        trace!(
            "post_send(): {} bytes from core {} to core {}",
            context.len(),
            context.source(),
            context.destination()
        );
        self.deliver(context.destination(), Arrival::Immediate(context));
    }

    fn release_send_context(&self, context: SendContext) {
        let source: Core = context.source();
        if self.endpoint(source, "release_send_context").contexts_tx.try_send(context).is_err() {
            panic!("release_send_context(): core {} got back more contexts than it owns", source);
        }
    }

    fn post_buffer(&self, buffer: Box<RDMABuffer>) {
        trace!(
            "post_buffer(): {} bytes from core {} to core {}",
            buffer.used(),
            buffer.source(),
            buffer.destination()
        );
        self.deliver(buffer.destination(), Arrival::Buffer(buffer));
    }

    fn return_buffer(&self, buffer: Box<RDMABuffer>) {
        self.deliver(buffer.owner(), Arrival::Returned(buffer));
    }

    fn poll(&self, core: Core, handler: &mut dyn FnMut(Arrival)) -> usize {
        let endpoint: &Endpoint = self.endpoint(core, "poll");
        let mut handled: usize = 0;
        while handled < MAX_ARRIVALS_PER_POLL {
            match endpoint.arrivals_rx.try_recv() {
                Ok(arrival) => {
                    self.in_flight.fetch_sub(1, Ordering::AcqRel);
                    handler(arrival);
                    handled += 1;
                },
                Err(_) => break,
            }
        }
        handled
    }

    fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Acquire)
    }
}

//======================================================================================================================
// Unit Tests
//======================================================================================================================
