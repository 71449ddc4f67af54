//! Poll-driven client over a non-blocking [`ByteStream`].

use std::time::Duration;

use mbap_core::pdu::Request;
use mbap_core::transport::ByteStream;
use mbap_core::{Frame, StreamReassembler};
use tokio::time::Instant;
use tracing::{trace, warn};

use crate::tracker::{Completion, PendingTransaction, TransactionTracker};
use crate::ClientError;

/// Counts from one [`ClientSession::poll`] call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionPoll {
    pub matched: usize,
    pub unmatched: usize,
    pub expired: usize,
    pub disconnected: usize,
}

/// A client connection driven by periodic [`poll`](Self::poll) calls.
#[derive(Debug)]
pub struct ClientSession<T> {
    stream: T,
    unit_id: u8,
    reassembler: StreamReassembler,
    tracker: TransactionTracker,
}

impl<T: ByteStream> ClientSession<T> {
    pub fn new(stream: T, unit_id: u8, response_timeout: Duration) -> Self {
        Self {
            stream,
            unit_id,
            reassembler: StreamReassembler::new(),
            tracker: TransactionTracker::new(response_timeout),
        }
    }

    pub fn unit_id(&self) -> u8 {
        self.unit_id
    }

    pub fn stream(&self) -> &T {
        &self.stream
    }

    pub fn outstanding(&self) -> usize {
        self.tracker.outstanding()
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.tracker.next_deadline()
    }

    /// Encodes `request` under a fresh transaction id and writes it.
    pub fn submit(
        &mut self,
        request: &Request<'_>,
        now: Instant,
    ) -> Result<PendingTransaction, ClientError> {
        let pdu = request.to_pdu()?;
        if !self.stream.is_connected() {
            warn!(
                function = request.function_code().as_u8(),
                "dropping modbus request, transport not connected"
            );
            return Err(ClientError::NotConnected);
        }

        let (transaction_id, pending) = self.tracker.begin(request.function_code().as_u8(), now)?;
        let adu = match Frame::new(transaction_id, self.unit_id, pdu) {
            Ok(frame) => frame.encode(),
            Err(err) => {
                self.tracker.cancel(transaction_id);
                return Err(err.into());
            }
        };

        trace!(transaction_id, unit_id = self.unit_id, len = adu.len(), "writing modbus request");
        if let Err(err) = self.stream.write(&adu).and_then(|()| self.stream.flush()) {
            self.tracker.cancel(transaction_id);
            warn!(transaction_id, error = %err, "dropping modbus request, write failed");
            return Err(ClientError::Io(err));
        }
        Ok(pending)
    }

    /// Feeds available bytes to the tracker and expires overdue requests.
    ///
    /// A closed transport discards the buffer and fails everything
    /// outstanding.
    pub fn poll(&mut self, now: Instant) -> SessionPoll {
        let mut summary = SessionPoll::default();
        match self.stream.read_available() {
            Ok(chunk) if !chunk.is_empty() => {
                for frame in self.reassembler.push(&chunk) {
                    match self.tracker.complete(frame) {
                        Completion::Matched(_) => summary.matched += 1,
                        Completion::Unmatched(_) => summary.unmatched += 1,
                    }
                }
            }
            Ok(_) => {}
            Err(err) => warn!(error = %err, "modbus client read failed"),
        }

        if !self.stream.is_connected() {
            summary.disconnected = self.close();
            return summary;
        }
        summary.expired = self.tracker.expire(now);
        summary
    }

    /// Drops partial input and resolves outstanding requests as disconnected.
    pub fn close(&mut self) -> usize {
        self.reassembler.clear();
        self.tracker.fail_all()
    }
}
