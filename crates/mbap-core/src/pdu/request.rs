use crate::encoding::{bit_at, packed_len, Reader, Writer};
use crate::pdu::FunctionCode;
use crate::{DecodeError, EncodeError};

#[cfg(feature = "alloc")]
use alloc::vec::Vec;

pub const MAX_READ_BITS: u16 = 2000;
pub const MAX_READ_REGISTERS: u16 = 125;
pub const MAX_WRITE_COILS: u16 = 1968;
pub const MAX_WRITE_REGISTERS: u16 = 123;

fn validate_quantity(quantity: u16, max: u16) -> Result<(), EncodeError> {
    if quantity == 0 || quantity > max {
        return Err(EncodeError::ValueOutOfRange);
    }
    Ok(())
}

fn write_header(
    w: &mut Writer<'_>,
    function: FunctionCode,
    start_address: u16,
    quantity: u16,
) -> Result<(), EncodeError> {
    w.write_u8(function.as_u8())?;
    w.write_be_u16(start_address)?;
    w.write_be_u16(quantity)?;
    Ok(())
}

/// `(start_address, quantity)` body shared by the four read requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadRequest {
    pub start_address: u16,
    pub quantity: u16,
}

impl ReadRequest {
    /// Reads the 4-byte body. Range checks belong to the data store.
    pub fn decode_body(r: &mut Reader<'_>) -> Result<Self, DecodeError> {
        Ok(Self {
            start_address: r.read_be_u16()?,
            quantity: r.read_be_u16()?,
        })
    }
}

pub type ReadCoilsRequest = ReadRequest;
pub type ReadDiscreteInputsRequest = ReadRequest;
pub type ReadHoldingRegistersRequest = ReadRequest;
pub type ReadInputRegistersRequest = ReadRequest;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteSingleCoilRequest {
    pub address: u16,
    pub value: bool,
}

impl WriteSingleCoilRequest {
    pub const ON: u16 = 0xFF00;
    pub const OFF: u16 = 0x0000;

    pub fn encode(&self, w: &mut Writer<'_>) -> Result<(), EncodeError> {
        w.write_u8(FunctionCode::WriteSingleCoil.as_u8())?;
        w.write_be_u16(self.address)?;
        w.write_be_u16(if self.value { Self::ON } else { Self::OFF })?;
        Ok(())
    }

    /// Any value other than `0xFF00`/`0x0000` is rejected with `InvalidValue`.
    pub fn decode_body(r: &mut Reader<'_>) -> Result<Self, DecodeError> {
        let address = r.read_be_u16()?;
        let value = match r.read_be_u16()? {
            Self::ON => true,
            Self::OFF => false,
            _ => return Err(DecodeError::InvalidValue),
        };
        Ok(Self { address, value })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteSingleRegisterRequest {
    pub address: u16,
    pub value: u16,
}

impl WriteSingleRegisterRequest {
    pub fn encode(&self, w: &mut Writer<'_>) -> Result<(), EncodeError> {
        w.write_u8(FunctionCode::WriteSingleRegister.as_u8())?;
        w.write_be_u16(self.address)?;
        w.write_be_u16(self.value)?;
        Ok(())
    }

    pub fn decode_body(r: &mut Reader<'_>) -> Result<Self, DecodeError> {
        Ok(Self {
            address: r.read_be_u16()?,
            value: r.read_be_u16()?,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteMultipleCoilsRequest<'a> {
    pub start_address: u16,
    pub values: &'a [bool],
}

impl<'a> WriteMultipleCoilsRequest<'a> {
    pub fn quantity(&self) -> Result<u16, EncodeError> {
        let quantity: u16 = self
            .values
            .len()
            .try_into()
            .map_err(|_| EncodeError::ValueOutOfRange)?;
        validate_quantity(quantity, MAX_WRITE_COILS)?;
        Ok(quantity)
    }

    pub fn encode(&self, w: &mut Writer<'_>) -> Result<(), EncodeError> {
        let quantity = self.quantity()?;
        // At most 246 bytes for MAX_WRITE_COILS.
        let byte_count = packed_len(self.values.len()) as u8;

        write_header(w, FunctionCode::WriteMultipleCoils, self.start_address, quantity)?;
        w.write_u8(byte_count)?;
        w.write_packed_bits(self.values)?;
        Ok(())
    }
}

/// Borrowed decode representation for FC15 payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteMultipleCoilsRequestData<'a> {
    pub start_address: u16,
    pub quantity: u16,
    pub values_packed: &'a [u8],
}

impl<'a> WriteMultipleCoilsRequestData<'a> {
    /// Reads the body of a Write Multiple Coils request.
    ///
    /// A byte count that disagrees with `ceil(quantity / 8)` is
    /// `InvalidLength`; fewer data bytes than announced is `UnexpectedEof`.
    pub fn decode_body(r: &mut Reader<'a>) -> Result<Self, DecodeError> {
        let start_address = r.read_be_u16()?;
        let quantity = r.read_be_u16()?;
        let byte_count = usize::from(r.read_u8()?);
        if byte_count != packed_len(usize::from(quantity)) {
            return Err(DecodeError::InvalidLength);
        }
        let values_packed = r.read_exact(byte_count)?;
        Ok(Self {
            start_address,
            quantity,
            values_packed,
        })
    }

    pub fn coil(&self, index: usize) -> Option<bool> {
        if index >= usize::from(self.quantity) {
            return None;
        }
        bit_at(self.values_packed, index)
    }

    pub fn coils(&self) -> impl Iterator<Item = bool> + '_ {
        (0..usize::from(self.quantity)).filter_map(|idx| self.coil(idx))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteMultipleRegistersRequest<'a> {
    pub start_address: u16,
    pub values: &'a [u16],
}

impl<'a> WriteMultipleRegistersRequest<'a> {
    pub fn quantity(&self) -> Result<u16, EncodeError> {
        let quantity: u16 = self
            .values
            .len()
            .try_into()
            .map_err(|_| EncodeError::ValueOutOfRange)?;
        validate_quantity(quantity, MAX_WRITE_REGISTERS)?;
        Ok(quantity)
    }

    pub fn encode(&self, w: &mut Writer<'_>) -> Result<(), EncodeError> {
        let quantity = self.quantity()?;
        // At most 246 bytes for MAX_WRITE_REGISTERS.
        let byte_count = (self.values.len() * 2) as u8;

        write_header(w, FunctionCode::WriteMultipleRegisters, self.start_address, quantity)?;
        w.write_u8(byte_count)?;
        w.write_registers(self.values)?;
        Ok(())
    }
}

/// Borrowed decode representation for FC16 payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteMultipleRegistersRequestData<'a> {
    pub start_address: u16,
    pub quantity: u16,
    pub values_bytes: &'a [u8],
}

impl<'a> WriteMultipleRegistersRequestData<'a> {
    /// Reads the body of a Write Multiple Registers request.
    ///
    /// A byte count other than `quantity * 2` is `InvalidLength`; fewer data
    /// bytes than announced is `UnexpectedEof`.
    pub fn decode_body(r: &mut Reader<'a>) -> Result<Self, DecodeError> {
        let start_address = r.read_be_u16()?;
        let quantity = r.read_be_u16()?;
        let byte_count = usize::from(r.read_u8()?);
        if byte_count != usize::from(quantity) * 2 {
            return Err(DecodeError::InvalidLength);
        }
        let values_bytes = r.read_exact(byte_count)?;
        Ok(Self {
            start_address,
            quantity,
            values_bytes,
        })
    }

    pub fn register(&self, index: usize) -> Option<u16> {
        let offset = index.checked_mul(2)?;
        let bytes = self.values_bytes.get(offset..offset + 2)?;
        Some(u16::from_be_bytes([bytes[0], bytes[1]]))
    }

    pub fn registers(&self) -> impl Iterator<Item = u16> + '_ {
        self.values_bytes
            .chunks_exact(2)
            .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
    }
}

/// Client-side request model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Request<'a> {
    ReadCoils(ReadCoilsRequest),
    ReadDiscreteInputs(ReadDiscreteInputsRequest),
    ReadHoldingRegisters(ReadHoldingRegistersRequest),
    ReadInputRegisters(ReadInputRegistersRequest),
    WriteSingleCoil(WriteSingleCoilRequest),
    WriteSingleRegister(WriteSingleRegisterRequest),
    WriteMultipleCoils(WriteMultipleCoilsRequest<'a>),
    WriteMultipleRegisters(WriteMultipleRegistersRequest<'a>),
}

impl<'a> Request<'a> {
    pub fn encode(&self, w: &mut Writer<'_>) -> Result<(), EncodeError> {
        match self {
            Self::ReadCoils(req) | Self::ReadDiscreteInputs(req) => {
                validate_quantity(req.quantity, MAX_READ_BITS)?;
                write_header(w, self.function_code(), req.start_address, req.quantity)
            }
            Self::ReadHoldingRegisters(req) | Self::ReadInputRegisters(req) => {
                validate_quantity(req.quantity, MAX_READ_REGISTERS)?;
                write_header(w, self.function_code(), req.start_address, req.quantity)
            }
            Self::WriteSingleCoil(req) => req.encode(w),
            Self::WriteSingleRegister(req) => req.encode(w),
            Self::WriteMultipleCoils(req) => req.encode(w),
            Self::WriteMultipleRegisters(req) => req.encode(w),
        }
    }

    /// Encodes into a freshly allocated PDU.
    #[cfg(feature = "alloc")]
    pub fn to_pdu(&self) -> Result<Vec<u8>, EncodeError> {
        let mut buf = [0u8; crate::frame::MAX_PDU_LEN];
        let mut w = Writer::new(&mut buf);
        self.encode(&mut w)?;
        Ok(w.as_written().to_vec())
    }

    pub fn function_code(&self) -> FunctionCode {
        match self {
            Self::ReadCoils(_) => FunctionCode::ReadCoils,
            Self::ReadDiscreteInputs(_) => FunctionCode::ReadDiscreteInputs,
            Self::ReadHoldingRegisters(_) => FunctionCode::ReadHoldingRegisters,
            Self::ReadInputRegisters(_) => FunctionCode::ReadInputRegisters,
            Self::WriteSingleCoil(_) => FunctionCode::WriteSingleCoil,
            Self::WriteSingleRegister(_) => FunctionCode::WriteSingleRegister,
            Self::WriteMultipleCoils(_) => FunctionCode::WriteMultipleCoils,
            Self::WriteMultipleRegisters(_) => FunctionCode::WriteMultipleRegisters,
        }
    }
}
