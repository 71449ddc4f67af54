//! Transaction-id allocation and request/response matching.

use std::collections::HashMap;
use std::time::Duration;

use mbap_core::pdu::FunctionCode;
use mbap_core::Frame;
use thiserror::Error;
use tokio::sync::oneshot::{self, error::TryRecvError};
use tokio::time::Instant;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum TrackerError {
    #[error("every transaction id is outstanding")]
    Exhausted,
}

/// How an outstanding request ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransactionOutcome {
    Response(Frame),
    Timeout,
    Disconnected,
}

/// Result of offering an inbound frame to the tracker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    Matched(u16),
    /// Stale or foreign; the frame was discarded.
    Unmatched(u16),
}

/// A request written to the wire and not yet resolved.
#[derive(Debug)]
pub struct OutstandingRequest {
    pub transaction_id: u16,
    pub issued_at: Instant,
    pub expected_function_code: u8,
    completion: oneshot::Sender<TransactionOutcome>,
}

impl OutstandingRequest {
    fn finish(self, outcome: TransactionOutcome) {
        if self.completion.send(outcome).is_err() {
            debug!(
                transaction_id = self.transaction_id,
                "requester went away before its transaction completed"
            );
        }
    }
}

/// Requester side of an [`OutstandingRequest`].
#[derive(Debug)]
pub struct PendingTransaction {
    transaction_id: u16,
    receiver: oneshot::Receiver<TransactionOutcome>,
}

impl PendingTransaction {
    pub fn transaction_id(&self) -> u16 {
        self.transaction_id
    }

    /// Waits for the outcome. A tracker dropped with the request still
    /// outstanding counts as a disconnect.
    pub async fn wait(self) -> TransactionOutcome {
        self.receiver
            .await
            .unwrap_or(TransactionOutcome::Disconnected)
    }

    /// Non-blocking check for poll-driven callers.
    pub fn try_outcome(&mut self) -> Option<TransactionOutcome> {
        match self.receiver.try_recv() {
            Ok(outcome) => Some(outcome),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Closed) => Some(TransactionOutcome::Disconnected),
        }
    }
}

/// Issues transaction ids and matches responses to requests.
///
/// Ids start at 1 and wrap from `0xFFFF` back to 1; 0 is never issued.
/// Expiry is driven by the caller passing the current time.
#[derive(Debug)]
pub struct TransactionTracker {
    next_id: u16,
    timeout: Duration,
    outstanding: HashMap<u16, OutstandingRequest>,
}

impl TransactionTracker {
    pub fn new(timeout: Duration) -> Self {
        Self {
            next_id: 1,
            timeout,
            outstanding: HashMap::new(),
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn outstanding(&self) -> usize {
        self.outstanding.len()
    }

    pub fn is_outstanding(&self, transaction_id: u16) -> bool {
        self.outstanding.contains_key(&transaction_id)
    }

    fn allocate_id(&mut self) -> Result<u16, TrackerError> {
        if self.outstanding.len() >= usize::from(u16::MAX) {
            return Err(TrackerError::Exhausted);
        }
        loop {
            let id = self.next_id;
            self.next_id = if id == u16::MAX { 1 } else { id + 1 };
            if !self.outstanding.contains_key(&id) {
                return Ok(id);
            }
        }
    }

    /// Registers a request that is about to be written.
    pub fn begin(
        &mut self,
        expected_function_code: u8,
        now: Instant,
    ) -> Result<(u16, PendingTransaction), TrackerError> {
        let transaction_id = self.allocate_id()?;
        let (completion, receiver) = oneshot::channel();
        self.outstanding.insert(
            transaction_id,
            OutstandingRequest {
                transaction_id,
                issued_at: now,
                expected_function_code,
                completion,
            },
        );
        Ok((
            transaction_id,
            PendingTransaction {
                transaction_id,
                receiver,
            },
        ))
    }

    /// Matches an inbound frame by transaction id.
    pub fn complete(&mut self, frame: Frame) -> Completion {
        let transaction_id = frame.transaction_id();
        let Some(request) = self.outstanding.remove(&transaction_id) else {
            debug!(
                transaction_id,
                function = frame.function_byte(),
                "discarding unmatched modbus response"
            );
            return Completion::Unmatched(transaction_id);
        };

        let function = frame.function_byte();
        let expected = request.expected_function_code;
        if function != expected
            && !(FunctionCode::is_exception(function) && function & 0x7F == expected)
        {
            debug!(
                transaction_id,
                function,
                expected,
                "modbus response function code differs from request"
            );
        }
        request.finish(TransactionOutcome::Response(frame));
        Completion::Matched(transaction_id)
    }

    /// Times out every request issued at least `timeout` before `now`.
    pub fn expire(&mut self, now: Instant) -> usize {
        let timeout = self.timeout;
        let expired: Vec<u16> = self
            .outstanding
            .values()
            .filter(|request| now.saturating_duration_since(request.issued_at) >= timeout)
            .map(|request| request.transaction_id)
            .collect();
        for transaction_id in &expired {
            if let Some(request) = self.outstanding.remove(transaction_id) {
                debug!(transaction_id, "modbus request timed out");
                request.finish(TransactionOutcome::Timeout);
            }
        }
        expired.len()
    }

    /// Resolves every outstanding request as disconnected.
    pub fn fail_all(&mut self) -> usize {
        let failed = self.outstanding.len();
        for (_, request) in self.outstanding.drain() {
            request.finish(TransactionOutcome::Disconnected);
        }
        failed
    }

    /// Forgets a request that never reached the wire.
    pub fn cancel(&mut self, transaction_id: u16) -> bool {
        self.outstanding.remove(&transaction_id).is_some()
    }

    /// Earliest instant at which [`expire`](Self::expire) has work to do.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.outstanding
            .values()
            .map(|request| request.issued_at + self.timeout)
            .min()
    }
}
