use crate::DecodeError;

/// Function codes of the eight data-access requests, plus anything else seen on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum FunctionCode {
    ReadCoils,
    ReadDiscreteInputs,
    ReadHoldingRegisters,
    ReadInputRegisters,
    WriteSingleCoil,
    WriteSingleRegister,
    WriteMultipleCoils,
    WriteMultipleRegisters,
    /// Any other code without the exception bit. Servers answer these with
    /// an Illegal Function exception.
    Unsupported(u8),
}

impl FunctionCode {
    pub const fn as_u8(self) -> u8 {
        match self {
            Self::ReadCoils => 0x01,
            Self::ReadDiscreteInputs => 0x02,
            Self::ReadHoldingRegisters => 0x03,
            Self::ReadInputRegisters => 0x04,
            Self::WriteSingleCoil => 0x05,
            Self::WriteSingleRegister => 0x06,
            Self::WriteMultipleCoils => 0x0F,
            Self::WriteMultipleRegisters => 0x10,
            Self::Unsupported(code) => code,
        }
    }

    pub fn from_u8(value: u8) -> Result<Self, DecodeError> {
        if Self::is_exception(value) {
            return Err(DecodeError::InvalidFunctionCode);
        }
        match value {
            0x01 => Ok(Self::ReadCoils),
            0x02 => Ok(Self::ReadDiscreteInputs),
            0x03 => Ok(Self::ReadHoldingRegisters),
            0x04 => Ok(Self::ReadInputRegisters),
            0x05 => Ok(Self::WriteSingleCoil),
            0x06 => Ok(Self::WriteSingleRegister),
            0x0F => Ok(Self::WriteMultipleCoils),
            0x10 => Ok(Self::WriteMultipleRegisters),
            _ => Ok(Self::Unsupported(value)),
        }
    }

    pub const fn is_exception(value: u8) -> bool {
        (value & 0x80) != 0
    }
}
