use core::fmt;

/// Errors that can occur while encoding Modbus data into an output buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncodeError {
    BufferTooSmall,
    ValueOutOfRange,
    InvalidLength,
}

impl fmt::Display for EncodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BufferTooSmall => f.write_str("buffer too small"),
            Self::ValueOutOfRange => f.write_str("value out of range"),
            Self::InvalidLength => f.write_str("invalid length"),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for EncodeError {}

/// Errors that can occur while decoding Modbus data from an input buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeError {
    UnexpectedEof,
    InvalidFunctionCode,
    InvalidProtocolId,
    InvalidLength,
    InvalidValue,
    Unsupported,
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnexpectedEof => f.write_str("unexpected end of input"),
            Self::InvalidFunctionCode => f.write_str("invalid function code"),
            Self::InvalidProtocolId => f.write_str("invalid mbap protocol id"),
            Self::InvalidLength => f.write_str("invalid length"),
            Self::InvalidValue => f.write_str("invalid value"),
            Self::Unsupported => f.write_str("operation unsupported"),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for DecodeError {}
