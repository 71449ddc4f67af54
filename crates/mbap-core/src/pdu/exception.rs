use core::fmt;

use crate::encoding::{Reader, Writer};
use crate::{DecodeError, EncodeError};

/// Exception codes carried in the second byte of an exception PDU.
///
/// The server role only emits the first three; the rest are decoded so a
/// client can report whatever a peer sends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ExceptionCode {
    IllegalFunction,
    IllegalDataAddress,
    IllegalDataValue,
    ServerDeviceFailure,
    Acknowledge,
    ServerDeviceBusy,
    MemoryParityError,
    GatewayPathUnavailable,
    GatewayTargetFailedToRespond,
    Unknown(u8),
}

impl ExceptionCode {
    pub const fn from_u8(value: u8) -> Self {
        match value {
            0x01 => Self::IllegalFunction,
            0x02 => Self::IllegalDataAddress,
            0x03 => Self::IllegalDataValue,
            0x04 => Self::ServerDeviceFailure,
            0x05 => Self::Acknowledge,
            0x06 => Self::ServerDeviceBusy,
            0x08 => Self::MemoryParityError,
            0x0A => Self::GatewayPathUnavailable,
            0x0B => Self::GatewayTargetFailedToRespond,
            other => Self::Unknown(other),
        }
    }

    pub const fn as_u8(self) -> u8 {
        match self {
            Self::IllegalFunction => 0x01,
            Self::IllegalDataAddress => 0x02,
            Self::IllegalDataValue => 0x03,
            Self::ServerDeviceFailure => 0x04,
            Self::Acknowledge => 0x05,
            Self::ServerDeviceBusy => 0x06,
            Self::MemoryParityError => 0x08,
            Self::GatewayPathUnavailable => 0x0A,
            Self::GatewayTargetFailedToRespond => 0x0B,
            Self::Unknown(raw) => raw,
        }
    }
}

impl fmt::Display for ExceptionCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::IllegalFunction => f.write_str("illegal function"),
            Self::IllegalDataAddress => f.write_str("illegal data address"),
            Self::IllegalDataValue => f.write_str("illegal data value"),
            Self::ServerDeviceFailure => f.write_str("server device failure"),
            Self::Acknowledge => f.write_str("acknowledge"),
            Self::ServerDeviceBusy => f.write_str("server device busy"),
            Self::MemoryParityError => f.write_str("memory parity error"),
            Self::GatewayPathUnavailable => f.write_str("gateway path unavailable"),
            Self::GatewayTargetFailedToRespond => f.write_str("gateway target failed to respond"),
            Self::Unknown(raw) => write!(f, "unknown exception 0x{raw:02X}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ExceptionResponse {
    /// Raw function code without the exception bit (bit 7).
    pub function_code: u8,
    pub exception_code: ExceptionCode,
}

impl ExceptionResponse {
    pub const fn new(function_code: u8, exception_code: ExceptionCode) -> Self {
        Self {
            function_code: function_code & 0x7F,
            exception_code,
        }
    }

    /// The two-byte exception PDU: `function | 0x80`, then the code.
    pub const fn to_pdu(&self) -> [u8; 2] {
        [self.function_code | 0x80, self.exception_code.as_u8()]
    }

    pub fn encode(&self, w: &mut Writer<'_>) -> Result<(), EncodeError> {
        w.write_all(&self.to_pdu())
    }

    pub fn decode(function_byte: u8, r: &mut Reader<'_>) -> Result<Self, DecodeError> {
        if (function_byte & 0x80) == 0 {
            return Err(DecodeError::InvalidFunctionCode);
        }
        let exception = r.read_u8()?;
        Ok(Self::new(function_byte, ExceptionCode::from_u8(exception)))
    }
}

impl fmt::Display for ExceptionResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "function 0x{:02X} failed: {}",
            self.function_code, self.exception_code
        )
    }
}
