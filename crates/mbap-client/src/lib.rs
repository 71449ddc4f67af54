//! Modbus/TCP client role.
//!
//! [`TransactionTracker`] matches responses to requests by transaction id
//! and expires the ones nobody answered. It is driven either by a
//! poll-driven [`ClientSession`] over a [`ByteStream`](mbap_core::transport::ByteStream)
//! or by the tokio-based [`TcpDataLink`] behind [`ModbusTcpClient`].

#![forbid(unsafe_code)]

pub mod link;
pub mod responses;
pub mod session;
pub mod tracker;

pub use link::{DataLink, DataLinkError, TcpDataLink};
pub use session::{ClientSession, SessionPoll};
pub use tracker::{
    Completion, OutstandingRequest, PendingTransaction, TrackerError, TransactionOutcome,
    TransactionTracker,
};

use mbap_core::frame::MAX_PDU_LEN;
use mbap_core::pdu::{
    ExceptionResponse, FunctionCode, ReadRequest, Request, WriteMultipleCoilsRequest,
    WriteMultipleRegistersRequest, WriteSingleCoilRequest, WriteSingleRegisterRequest,
};
use mbap_core::{DecodeError, EncodeError};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use thiserror::Error;
use tokio::net::ToSocketAddrs;
use tracing::debug;

pub const DEFAULT_UNIT_ID: u8 = 1;
pub const DEFAULT_RESPONSE_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct ClientConfig {
    pub unit_id: u8,
    pub response_timeout: Duration,
    /// How often the background reader expires overdue requests.
    pub poll_interval: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            unit_id: DEFAULT_UNIT_ID,
            response_timeout: DEFAULT_RESPONSE_TIMEOUT,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

impl ClientConfig {
    pub fn with_unit_id(mut self, unit_id: u8) -> Self {
        self.unit_id = unit_id;
        self
    }

    pub fn with_response_timeout(mut self, timeout: Duration) -> Self {
        self.response_timeout = timeout;
        self
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }
}

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("transport not connected")]
    NotConnected,
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("encode error: {0}")]
    Encode(#[from] EncodeError),
    #[error("decode error: {0}")]
    Decode(#[from] DecodeError),
    #[error("request timed out")]
    Timeout,
    #[error("connection lost before a response arrived")]
    Disconnected,
    #[error("modbus exception: {0}")]
    Exception(ExceptionResponse),
    #[error("unexpected response: {0}")]
    UnexpectedResponse(&'static str),
    #[error("transaction tracker: {0}")]
    Tracker(#[from] TrackerError),
}

impl From<DataLinkError> for ClientError {
    fn from(err: DataLinkError) -> Self {
        match err {
            DataLinkError::Io(err) => Self::Io(err),
            DataLinkError::Encode(err) => Self::Encode(err),
            DataLinkError::ConnectionClosed => Self::Disconnected,
            DataLinkError::Timeout => Self::Timeout,
            DataLinkError::InvalidResponse(message) => Self::UnexpectedResponse(message),
            DataLinkError::ResponseBufferTooSmall { .. } => {
                Self::UnexpectedResponse("response larger than a modbus pdu")
            }
            DataLinkError::Tracker(err) => Self::Tracker(err),
        }
    }
}

/// Typed Modbus requests for one unit over any [`DataLink`].
pub struct ModbusClient<D: DataLink> {
    datalink: D,
    config: ClientConfig,
    request_counter: AtomicU64,
}

/// Client over a pipelined tokio TCP connection.
pub type ModbusTcpClient = ModbusClient<TcpDataLink>;

impl ModbusClient<TcpDataLink> {
    pub async fn connect<A: ToSocketAddrs>(
        addr: A,
        config: ClientConfig,
    ) -> Result<Self, ClientError> {
        let link = TcpDataLink::connect(addr, config.response_timeout, config.poll_interval).await?;
        Ok(Self::with_config(link, config))
    }
}

impl<D: DataLink> ModbusClient<D> {
    pub fn new(datalink: D) -> Self {
        Self::with_config(datalink, ClientConfig::default())
    }

    pub fn with_config(datalink: D, config: ClientConfig) -> Self {
        Self {
            datalink,
            config,
            request_counter: AtomicU64::new(1),
        }
    }

    pub fn config(&self) -> ClientConfig {
        self.config
    }

    pub fn datalink(&self) -> &D {
        &self.datalink
    }

    fn next_correlation_id(&self) -> u64 {
        self.request_counter.fetch_add(1, Ordering::Relaxed)
    }

    /// Sends `request` and returns the length of the response PDU in `response`.
    async fn send(&self, request: &Request<'_>, response: &mut [u8]) -> Result<usize, ClientError> {
        let correlation_id = self.next_correlation_id();
        let unit_id = self.config.unit_id;
        let pdu = request.to_pdu()?;

        debug!(
            correlation_id,
            unit_id,
            function = request.function_code().as_u8(),
            pdu_len = pdu.len(),
            "dispatching modbus request"
        );
        let len = self.datalink.exchange(unit_id, &pdu, response).await?;
        debug!(correlation_id, unit_id, len, "modbus request completed");
        Ok(len)
    }

    pub async fn read_coils(&self, start: u16, quantity: u16) -> Result<Vec<bool>, ClientError> {
        self.read_bits(FunctionCode::ReadCoils, start, quantity).await
    }

    pub async fn read_discrete_inputs(
        &self,
        start: u16,
        quantity: u16,
    ) -> Result<Vec<bool>, ClientError> {
        self.read_bits(FunctionCode::ReadDiscreteInputs, start, quantity).await
    }

    pub async fn read_holding_registers(
        &self,
        start: u16,
        quantity: u16,
    ) -> Result<Vec<u16>, ClientError> {
        self.read_words(FunctionCode::ReadHoldingRegisters, start, quantity).await
    }

    pub async fn read_input_registers(
        &self,
        start: u16,
        quantity: u16,
    ) -> Result<Vec<u16>, ClientError> {
        self.read_words(FunctionCode::ReadInputRegisters, start, quantity).await
    }

    async fn read_bits(
        &self,
        function: FunctionCode,
        start: u16,
        quantity: u16,
    ) -> Result<Vec<bool>, ClientError> {
        let body = ReadRequest {
            start_address: start,
            quantity,
        };
        let request = if function == FunctionCode::ReadCoils {
            Request::ReadCoils(body)
        } else {
            Request::ReadDiscreteInputs(body)
        };

        let mut response = [0u8; MAX_PDU_LEN];
        let len = self.send(&request, &mut response).await?;
        responses::coils(&response[..len], function, quantity)
    }

    async fn read_words(
        &self,
        function: FunctionCode,
        start: u16,
        quantity: u16,
    ) -> Result<Vec<u16>, ClientError> {
        let body = ReadRequest {
            start_address: start,
            quantity,
        };
        let request = if function == FunctionCode::ReadHoldingRegisters {
            Request::ReadHoldingRegisters(body)
        } else {
            Request::ReadInputRegisters(body)
        };

        let mut response = [0u8; MAX_PDU_LEN];
        let len = self.send(&request, &mut response).await?;
        responses::registers(&response[..len], function, quantity)
    }

    pub async fn write_single_coil(&self, address: u16, value: bool) -> Result<(), ClientError> {
        let request = Request::WriteSingleCoil(WriteSingleCoilRequest { address, value });
        let mut response = [0u8; MAX_PDU_LEN];
        let len = self.send(&request, &mut response).await?;
        let echoed = if value {
            WriteSingleCoilRequest::ON
        } else {
            WriteSingleCoilRequest::OFF
        };
        responses::write_ack(&response[..len], FunctionCode::WriteSingleCoil, address, echoed)
    }

    pub async fn write_single_register(&self, address: u16, value: u16) -> Result<(), ClientError> {
        let request = Request::WriteSingleRegister(WriteSingleRegisterRequest { address, value });
        let mut response = [0u8; MAX_PDU_LEN];
        let len = self.send(&request, &mut response).await?;
        responses::write_ack(&response[..len], FunctionCode::WriteSingleRegister, address, value)
    }

    pub async fn write_multiple_coils(
        &self,
        start: u16,
        values: &[bool],
    ) -> Result<(), ClientError> {
        let body = WriteMultipleCoilsRequest {
            start_address: start,
            values,
        };
        let quantity = body.quantity()?;
        let mut response = [0u8; MAX_PDU_LEN];
        let len = self.send(&Request::WriteMultipleCoils(body), &mut response).await?;
        responses::write_ack(&response[..len], FunctionCode::WriteMultipleCoils, start, quantity)
    }

    pub async fn write_multiple_registers(
        &self,
        start: u16,
        values: &[u16],
    ) -> Result<(), ClientError> {
        let body = WriteMultipleRegistersRequest {
            start_address: start,
            values,
        };
        let quantity = body.quantity()?;
        let mut response = [0u8; MAX_PDU_LEN];
        let len = self.send(&Request::WriteMultipleRegisters(body), &mut response).await?;
        responses::write_ack(
            &response[..len],
            FunctionCode::WriteMultipleRegisters,
            start,
            quantity,
        )
    }
}
