//! Poll-driven server connections over a [`ByteStream`].

use mbap_core::transport::ByteStream;
use mbap_core::StreamReassembler;
use tracing::{trace, warn};

use crate::dispatch::{Dispatch, Dispatcher};

/// Counts from one [`ServerConnection::poll`] call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PollSummary {
    pub frames: usize,
    pub responses: usize,
    pub dropped: usize,
}

/// One peer: its transport and its own reassembly buffer.
#[derive(Debug)]
pub struct ServerConnection<T> {
    stream: T,
    reassembler: StreamReassembler,
}

impl<T: ByteStream> ServerConnection<T> {
    pub fn new(stream: T) -> Self {
        Self {
            stream,
            reassembler: StreamReassembler::new(),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.stream.is_connected()
    }

    pub fn stream(&self) -> &T {
        &self.stream
    }

    /// Bytes received but not yet framed.
    pub fn buffered(&self) -> &[u8] {
        self.reassembler.buffered()
    }

    /// Reads what has arrived and answers every complete frame in order.
    ///
    /// Transport failures are logged; an undeliverable response is dropped.
    pub fn poll(&mut self, dispatcher: &Dispatcher) -> PollSummary {
        let mut summary = PollSummary::default();
        let chunk = match self.stream.read_available() {
            Ok(chunk) => chunk,
            Err(err) => {
                warn!(error = %err, "modbus connection read failed");
                return summary;
            }
        };
        if !chunk.is_empty() {
            trace!(bytes = chunk.len(), "modbus connection received bytes");
            self.answer(&chunk, dispatcher, &mut summary);
        }

        // Output queued by an earlier poll goes out even when nothing arrived.
        if self.stream.is_connected() {
            if let Err(err) = self.stream.flush() {
                warn!(error = %err, "modbus connection flush failed");
            }
        }
        summary
    }

    fn answer(&mut self, chunk: &[u8], dispatcher: &Dispatcher, summary: &mut PollSummary) {
        for frame in self.reassembler.push(chunk) {
            summary.frames += 1;
            let Dispatch::Respond(response) = dispatcher.dispatch(&frame) else {
                continue;
            };
            if !self.stream.is_connected() {
                warn!(
                    transaction_id = frame.transaction_id(),
                    "dropping modbus response, transport not connected"
                );
                summary.dropped += 1;
                continue;
            }
            match self.stream.write(&response) {
                Ok(()) => summary.responses += 1,
                Err(err) => {
                    warn!(
                        transaction_id = frame.transaction_id(),
                        error = %err,
                        "dropping modbus response, write failed"
                    );
                    summary.dropped += 1;
                }
            }
        }
    }

    /// Discards partial input, e.g. when the peer reconnects.
    pub fn reset(&mut self) {
        self.reassembler.clear();
    }

    pub fn into_stream(self) -> T {
        self.stream
    }
}
