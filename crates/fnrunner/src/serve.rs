//! Serve loop: the runner's top-level driver.
//!
//! Two states. `Runner::load` is AWAIT_LOAD: it runs the guest load phase
//! once and always yields a runner, degraded or not. `Runner::serve` is
//! SERVING: receive, handle, send, forever. Only a transport failure ends it.

use std::convert::Infallible;
use std::io::{Read, Write};
use std::time::Instant;

use crate::adapter::{Adapter, Guest, GuestLoader};
use crate::bridge::chunk::{ChunkTransport, TransportError};
use crate::bridge::codec::{self, INVOCATION_FAILURE_FRAME};

pub struct Runner<G> {
    adapter: Adapter<G>,
    served: u64,
}

impl<G: Guest> Runner<G> {
    pub fn load<L>(loader: L) -> Self
    where
        L: GuestLoader<Guest = G>,
    {
        Self {
            adapter: Adapter::load(loader),
            served: 0,
        }
    }

    pub fn is_degraded(&self) -> bool {
        self.adapter.is_degraded()
    }

    /// Requests answered so far.
    pub fn served(&self) -> u64 {
        self.served
    }

    /// One full iteration: one message in, one message out.
    pub fn serve_one<R: Read, W: Write>(
        &mut self,
        transport: &mut ChunkTransport<R, W>,
    ) -> Result<(), TransportError> {
        let message = transport.receive()?;
        let start = Instant::now();

        let outcome = self.adapter.handle(&message);
        let code = outcome.code();

        let frame = match codec::encode_response(outcome) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::error!(error = %e, "Failed to encode response");
                INVOCATION_FAILURE_FRAME.to_vec()
            }
        };
        transport.send(&frame)?;

        self.served += 1;
        tracing::debug!(
            request_bytes = message.len(),
            response_bytes = frame.len(),
            ?code,
            elapsed_us = start.elapsed().as_micros() as u64,
            "Served request"
        );
        Ok(())
    }

    /// Serve until the channel fails. Never returns `Ok`.
    pub fn serve<R: Read, W: Write>(
        mut self,
        transport: &mut ChunkTransport<R, W>,
    ) -> Result<Infallible, TransportError> {
        tracing::info!(degraded = self.is_degraded(), "Serving requests");
        loop {
            if let Err(e) = self.serve_one(transport) {
                tracing::error!(error = %e, served = self.served, "Channel failed, stopping");
                return Err(e);
            }
        }
    }
}
