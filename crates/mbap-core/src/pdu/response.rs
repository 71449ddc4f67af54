use crate::encoding::{bit_at, Reader, Writer};
use crate::pdu::request::{MAX_READ_BITS, MAX_READ_REGISTERS};
use crate::pdu::{ExceptionResponse, FunctionCode, WriteSingleCoilRequest};
use crate::{DecodeError, EncodeError};

fn read_byte_counted<'a>(r: &mut Reader<'a>, max: usize) -> Result<&'a [u8], DecodeError> {
    let byte_count = usize::from(r.read_u8()?);
    if byte_count == 0 || byte_count > max {
        return Err(DecodeError::InvalidLength);
    }
    r.read_exact(byte_count)
}

fn write_byte_counted(
    w: &mut Writer<'_>,
    function: FunctionCode,
    data: &[u8],
) -> Result<(), EncodeError> {
    let byte_count: u8 = data
        .len()
        .try_into()
        .map_err(|_| EncodeError::ValueOutOfRange)?;
    w.write_u8(function.as_u8())?;
    w.write_u8(byte_count)?;
    w.write_all(data)?;
    Ok(())
}

/// Packed bit payload returned by Read Coils and Read Discrete Inputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadBitsResponse<'a> {
    pub packed: &'a [u8],
}

impl<'a> ReadBitsResponse<'a> {
    fn decode_body(r: &mut Reader<'a>) -> Result<Self, DecodeError> {
        let max = usize::from(MAX_READ_BITS).div_ceil(8);
        Ok(Self {
            packed: read_byte_counted(r, max)?,
        })
    }

    pub fn bit(&self, index: usize) -> Option<bool> {
        bit_at(self.packed, index)
    }

    /// Number of bits the payload can carry, padding included.
    pub fn capacity(&self) -> usize {
        self.packed.len() * 8
    }
}

/// Big-endian register payload returned by the two register reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadRegistersResponse<'a> {
    pub data: &'a [u8],
}

impl<'a> ReadRegistersResponse<'a> {
    fn decode_body(r: &mut Reader<'a>) -> Result<Self, DecodeError> {
        let data = read_byte_counted(r, usize::from(MAX_READ_REGISTERS) * 2)?;
        if data.len() % 2 != 0 {
            return Err(DecodeError::InvalidLength);
        }
        Ok(Self { data })
    }

    pub fn register_count(&self) -> usize {
        self.data.len() / 2
    }

    pub fn register(&self, index: usize) -> Option<u16> {
        let offset = index.checked_mul(2)?;
        let bytes = self.data.get(offset..offset + 2)?;
        Some(u16::from_be_bytes([bytes[0], bytes[1]]))
    }
}

/// Echo of a Write Single Coil or Write Single Register request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteSingleResponse {
    pub address: u16,
    pub value: u16,
}

impl WriteSingleResponse {
    fn decode_body(r: &mut Reader<'_>) -> Result<Self, DecodeError> {
        Ok(Self {
            address: r.read_be_u16()?,
            value: r.read_be_u16()?,
        })
    }

    /// Coil state carried by a Write Single Coil echo.
    pub fn coil_value(&self) -> Option<bool> {
        match self.value {
            WriteSingleCoilRequest::ON => Some(true),
            WriteSingleCoilRequest::OFF => Some(false),
            _ => None,
        }
    }
}

/// `(start_address, quantity)` echo of the two multi-write requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteMultipleResponse {
    pub start_address: u16,
    pub quantity: u16,
}

impl WriteMultipleResponse {
    fn decode_body(r: &mut Reader<'_>) -> Result<Self, DecodeError> {
        Ok(Self {
            start_address: r.read_be_u16()?,
            quantity: r.read_be_u16()?,
        })
    }

    pub fn encode_body(&self, w: &mut Writer<'_>) -> Result<(), EncodeError> {
        w.write_be_u16(self.start_address)?;
        w.write_be_u16(self.quantity)?;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Response<'a> {
    ReadCoils(ReadBitsResponse<'a>),
    ReadDiscreteInputs(ReadBitsResponse<'a>),
    ReadHoldingRegisters(ReadRegistersResponse<'a>),
    ReadInputRegisters(ReadRegistersResponse<'a>),
    WriteSingleCoil(WriteSingleResponse),
    WriteSingleRegister(WriteSingleResponse),
    WriteMultipleCoils(WriteMultipleResponse),
    WriteMultipleRegisters(WriteMultipleResponse),
    Exception(ExceptionResponse),
}

impl<'a> Response<'a> {
    pub fn decode(r: &mut Reader<'a>) -> Result<Self, DecodeError> {
        let function_byte = r.read_u8()?;
        if FunctionCode::is_exception(function_byte) {
            return Ok(Self::Exception(ExceptionResponse::decode(function_byte, r)?));
        }

        match FunctionCode::from_u8(function_byte)? {
            FunctionCode::ReadCoils => Ok(Self::ReadCoils(ReadBitsResponse::decode_body(r)?)),
            FunctionCode::ReadDiscreteInputs => {
                Ok(Self::ReadDiscreteInputs(ReadBitsResponse::decode_body(r)?))
            }
            FunctionCode::ReadHoldingRegisters => Ok(Self::ReadHoldingRegisters(
                ReadRegistersResponse::decode_body(r)?,
            )),
            FunctionCode::ReadInputRegisters => Ok(Self::ReadInputRegisters(
                ReadRegistersResponse::decode_body(r)?,
            )),
            FunctionCode::WriteSingleCoil => {
                Ok(Self::WriteSingleCoil(WriteSingleResponse::decode_body(r)?))
            }
            FunctionCode::WriteSingleRegister => {
                Ok(Self::WriteSingleRegister(WriteSingleResponse::decode_body(r)?))
            }
            FunctionCode::WriteMultipleCoils => {
                Ok(Self::WriteMultipleCoils(WriteMultipleResponse::decode_body(r)?))
            }
            FunctionCode::WriteMultipleRegisters => Ok(Self::WriteMultipleRegisters(
                WriteMultipleResponse::decode_body(r)?,
            )),
            FunctionCode::Unsupported(_) => Err(DecodeError::Unsupported),
        }
    }

    pub fn encode(&self, w: &mut Writer<'_>) -> Result<(), EncodeError> {
        let function = self.function_code();
        match self {
            Self::ReadCoils(resp) | Self::ReadDiscreteInputs(resp) => {
                write_byte_counted(w, function, resp.packed)
            }
            Self::ReadHoldingRegisters(resp) | Self::ReadInputRegisters(resp) => {
                write_byte_counted(w, function, resp.data)
            }
            Self::WriteSingleCoil(resp) | Self::WriteSingleRegister(resp) => {
                w.write_u8(function.as_u8())?;
                w.write_be_u16(resp.address)?;
                w.write_be_u16(resp.value)
            }
            Self::WriteMultipleCoils(resp) | Self::WriteMultipleRegisters(resp) => {
                w.write_u8(function.as_u8())?;
                resp.encode_body(w)
            }
            Self::Exception(resp) => resp.encode(w),
        }
    }

    /// Function code without the exception bit.
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
            Self::Exception(resp) => FunctionCode::from_u8(resp.function_code)
                .unwrap_or(FunctionCode::Unsupported(resp.function_code)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{ReadRegistersResponse, Response, WriteMultipleResponse, WriteSingleResponse};
    use crate::encoding::{Reader, Writer};
    use crate::pdu::ExceptionCode;
    use crate::DecodeError;

    #[test]
    fn register_helpers_work() {
        let resp = ReadRegistersResponse {
            data: &[0x00, 0x0A, 0x00, 0x14],
        };
        assert_eq!(resp.register_count(), 2);
        assert_eq!(resp.register(0), Some(10));
        assert_eq!(resp.register(1), Some(20));
        assert_eq!(resp.register(2), None);
    }

    #[test]
    fn decodes_read_holding_response() {
        let mut r = Reader::new(&[0x03, 0x04, 0x00, 0x0A, 0x00, 0x14]);
        match Response::decode(&mut r).unwrap() {
            Response::ReadHoldingRegisters(resp) => {
                assert_eq!(resp.register(0), Some(10));
                assert_eq!(resp.register(1), Some(20));
            }
            other => panic!("unexpected response: {other:?}"),
        }
        assert!(r.is_empty());
    }

    #[test]
    fn decodes_packed_bits() {
        let mut r = Reader::new(&[0x01, 0x02, 0b0000_0101, 0b0000_0001]);
        match Response::decode(&mut r).unwrap() {
            Response::ReadCoils(resp) => {
                assert_eq!(resp.capacity(), 16);
                assert_eq!(resp.bit(0), Some(true));
                assert_eq!(resp.bit(1), Some(false));
                assert_eq!(resp.bit(8), Some(true));
            }
            other => panic!("unexpected response: {other:?}"),
        }
    }

    #[test]
    fn rejects_odd_register_byte_count() {
        let mut r = Reader::new(&[0x04, 0x03, 0x00, 0x01, 0x02]);
        assert_eq!(Response::decode(&mut r).unwrap_err(), DecodeError::InvalidLength);
    }

    #[test]
    fn decode_exception_unknown_code() {
        let mut r = Reader::new(&[0x83, 0x19]);
        match Response::decode(&mut r).unwrap() {
            Response::Exception(ex) => {
                assert_eq!(ex.function_code, 0x03);
                assert_eq!(ex.exception_code, ExceptionCode::Unknown(0x19));
            }
            other => panic!("unexpected response: {other:?}"),
        }
    }

    #[test]
    fn unsupported_function_is_rejected() {
        let mut r = Reader::new(&[0x2B, 0x0E, 0x01]);
        assert_eq!(Response::decode(&mut r).unwrap_err(), DecodeError::Unsupported);
    }

    #[test]
    fn single_coil_echo_roundtrip() {
        let original = Response::WriteSingleCoil(WriteSingleResponse {
            address: 0x0007,
            value: 0xFF00,
        });
        let mut buf = [0u8; 8];
        let mut w = Writer::new(&mut buf);
        original.encode(&mut w).unwrap();
        assert_eq!(w.as_written(), &[0x05, 0x00, 0x07, 0xFF, 0x00]);

        let mut r = Reader::new(w.as_written());
        let decoded = Response::decode(&mut r).unwrap();
        assert_eq!(decoded, original);
        match decoded {
            Response::WriteSingleCoil(echo) => assert_eq!(echo.coil_value(), Some(true)),
            other => panic!("unexpected response: {other:?}"),
        }
    }

    #[test]
    fn multi_write_echo_encodes() {
        let resp = Response::WriteMultipleRegisters(WriteMultipleResponse {
            start_address: 0,
            quantity: 2,
        });
        let mut buf = [0u8; 8];
        let mut w = Writer::new(&mut buf);
        resp.encode(&mut w).unwrap();
        assert_eq!(w.as_written(), &[0x10, 0x00, 0x00, 0x00, 0x02]);
    }
}
