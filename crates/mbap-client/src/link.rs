//! Async request/response seam and its Modbus/TCP implementation.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use mbap_core::frame::{tcp, MAX_ADU_LEN};
use mbap_core::{EncodeError, StreamReassembler};
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpStream, ToSocketAddrs};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, trace, warn};

use crate::tracker::{TrackerError, TransactionOutcome, TransactionTracker};

#[derive(Debug, Error)]
pub enum DataLinkError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("encode error: {0}")]
    Encode(#[from] EncodeError),
    #[error("connection closed")]
    ConnectionClosed,
    #[error("request timed out")]
    Timeout,
    #[error("invalid response: {0}")]
    InvalidResponse(&'static str),
    #[error("response buffer too small (needed {needed}, available {available})")]
    ResponseBufferTooSmall { needed: usize, available: usize },
    #[error("transaction tracker: {0}")]
    Tracker(#[from] TrackerError),
}

#[async_trait]
pub trait DataLink: Send + Sync {
    /// Send a request PDU to a unit and write the response PDU into `response_pdu`.
    ///
    /// Returns the number of response bytes written to `response_pdu`.
    async fn exchange(
        &self,
        unit_id: u8,
        request_pdu: &[u8],
        response_pdu: &mut [u8],
    ) -> Result<usize, DataLinkError>;
}

#[derive(Debug)]
struct LinkState {
    tracker: TransactionTracker,
    closed: bool,
}

fn lock(state: &Mutex<LinkState>) -> MutexGuard<'_, LinkState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Pipelined Modbus/TCP link.
///
/// Requests from concurrent callers share one socket. A background task
/// owns the read half, reassembles frames, matches them by transaction id
/// and expires overdue requests every `poll_interval`.
#[derive(Debug)]
pub struct TcpDataLink {
    writer: tokio::sync::Mutex<OwnedWriteHalf>,
    state: Arc<Mutex<LinkState>>,
    reader: JoinHandle<()>,
}

impl TcpDataLink {
    pub async fn connect<A: ToSocketAddrs>(
        addr: A,
        response_timeout: Duration,
        poll_interval: Duration,
    ) -> Result<Self, DataLinkError> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        Ok(Self::from_stream(stream, response_timeout, poll_interval))
    }

    /// Must be called within a tokio runtime.
    pub fn from_stream(
        stream: TcpStream,
        response_timeout: Duration,
        poll_interval: Duration,
    ) -> Self {
        let (read_half, write_half) = stream.into_split();
        let state = Arc::new(Mutex::new(LinkState {
            tracker: TransactionTracker::new(response_timeout),
            closed: false,
        }));
        let reader = tokio::spawn(read_loop(read_half, Arc::clone(&state), poll_interval));
        Self {
            writer: tokio::sync::Mutex::new(write_half),
            state,
            reader,
        }
    }

    pub fn is_closed(&self) -> bool {
        lock(&self.state).closed
    }

    pub fn outstanding(&self) -> usize {
        lock(&self.state).tracker.outstanding()
    }
}

impl Drop for TcpDataLink {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

async fn read_loop(
    mut read_half: OwnedReadHalf,
    state: Arc<Mutex<LinkState>>,
    poll_interval: Duration,
) {
    let mut reassembler = StreamReassembler::new();
    let mut chunk = [0u8; MAX_ADU_LEN];
    let mut ticker = tokio::time::interval(poll_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            read = read_half.read(&mut chunk) => match read {
                Ok(0) => {
                    debug!("modbus tcp peer closed the connection");
                    break;
                }
                Ok(n) => {
                    let mut state = lock(&state);
                    for frame in reassembler.push(&chunk[..n]) {
                        state.tracker.complete(frame);
                    }
                }
                Err(err) => {
                    warn!(error = %err, "modbus tcp read failed");
                    break;
                }
            },
            _ = ticker.tick() => {
                lock(&state).tracker.expire(Instant::now());
            }
        }
    }

    let mut state = lock(&state);
    state.closed = true;
    let failed = state.tracker.fail_all();
    if failed > 0 {
        debug!(failed, "failed outstanding modbus requests after disconnect");
    }
}

#[async_trait]
impl DataLink for TcpDataLink {
    async fn exchange(
        &self,
        unit_id: u8,
        request_pdu: &[u8],
        response_pdu: &mut [u8],
    ) -> Result<usize, DataLinkError> {
        let Some(&function) = request_pdu.first() else {
            return Err(DataLinkError::InvalidResponse("empty request pdu"));
        };

        let (transaction_id, pending) = {
            let mut state = lock(&self.state);
            if state.closed {
                return Err(DataLinkError::ConnectionClosed);
            }
            state.tracker.begin(function, Instant::now())?
        };

        let adu = match tcp::encode(unit_id, transaction_id, request_pdu) {
            Ok(adu) => adu,
            Err(err) => {
                lock(&self.state).tracker.cancel(transaction_id);
                return Err(err.into());
            }
        };

        trace!(
            transaction_id,
            unit_id,
            pdu_len = request_pdu.len(),
            "sending modbus tcp request"
        );
        if let Err(err) = self.writer.lock().await.write_all(&adu).await {
            lock(&self.state).tracker.cancel(transaction_id);
            return Err(err.into());
        }

        match pending.wait().await {
            TransactionOutcome::Response(frame) => {
                if frame.unit_id() != unit_id {
                    return Err(DataLinkError::InvalidResponse("unit id mismatch"));
                }
                let pdu = frame.pdu();
                if pdu.len() > response_pdu.len() {
                    return Err(DataLinkError::ResponseBufferTooSmall {
                        needed: pdu.len(),
                        available: response_pdu.len(),
                    });
                }
                response_pdu[..pdu.len()].copy_from_slice(pdu);
                trace!(
                    transaction_id,
                    unit_id,
                    pdu_len = pdu.len(),
                    "received modbus tcp response"
                );
                Ok(pdu.len())
            }
            TransactionOutcome::Timeout => Err(DataLinkError::Timeout),
            TransactionOutcome::Disconnected => Err(DataLinkError::ConnectionClosed),
        }
    }
}
