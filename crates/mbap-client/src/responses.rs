//! Typed extraction from response PDUs.

use mbap_core::encoding::{packed_len, Reader};
use mbap_core::pdu::{FunctionCode, Response};

use crate::ClientError;

/// Decodes a whole response PDU, turning exception PDUs into
/// [`ClientError::Exception`].
pub fn decode(pdu: &[u8]) -> Result<Response<'_>, ClientError> {
    let mut reader = Reader::new(pdu);
    let response = Response::decode(&mut reader)?;
    if !reader.is_empty() {
        return Err(ClientError::UnexpectedResponse("trailing bytes in response"));
    }
    if let Response::Exception(exception) = response {
        return Err(ClientError::Exception(exception));
    }
    Ok(response)
}

fn expect_function<'a>(pdu: &'a [u8], function: FunctionCode) -> Result<Response<'a>, ClientError> {
    let response = decode(pdu)?;
    if response.function_code() != function {
        return Err(ClientError::UnexpectedResponse("unexpected function response"));
    }
    Ok(response)
}

/// Read Coils / Read Discrete Inputs payload as `quantity` booleans.
pub fn coils(pdu: &[u8], function: FunctionCode, quantity: u16) -> Result<Vec<bool>, ClientError> {
    let data = match expect_function(pdu, function)? {
        Response::ReadCoils(data) | Response::ReadDiscreteInputs(data) => data,
        _ => return Err(ClientError::UnexpectedResponse("not a bit read response")),
    };
    let count = usize::from(quantity);
    if data.packed.len() != packed_len(count) {
        return Err(ClientError::UnexpectedResponse(
            "bit payload does not match requested quantity",
        ));
    }
    Ok((0..count).filter_map(|idx| data.bit(idx)).collect())
}

/// Read Holding / Input Registers payload as `quantity` words.
pub fn registers(
    pdu: &[u8],
    function: FunctionCode,
    quantity: u16,
) -> Result<Vec<u16>, ClientError> {
    let data = match expect_function(pdu, function)? {
        Response::ReadHoldingRegisters(data) | Response::ReadInputRegisters(data) => data,
        _ => return Err(ClientError::UnexpectedResponse("not a register read response")),
    };
    let count = usize::from(quantity);
    if data.register_count() != count {
        return Err(ClientError::UnexpectedResponse(
            "register payload does not match requested quantity",
        ));
    }
    Ok((0..count).filter_map(|idx| data.register(idx)).collect())
}

/// Checks a write echo: `(address, value)` for single writes,
/// `(start_address, quantity)` for multi-writes.
pub fn write_ack(
    pdu: &[u8],
    function: FunctionCode,
    first: u16,
    second: u16,
) -> Result<(), ClientError> {
    let echo = match expect_function(pdu, function)? {
        Response::WriteSingleCoil(echo) | Response::WriteSingleRegister(echo) => {
            (echo.address, echo.value)
        }
        Response::WriteMultipleCoils(echo) | Response::WriteMultipleRegisters(echo) => {
            (echo.start_address, echo.quantity)
        }
        _ => return Err(ClientError::UnexpectedResponse("not a write response")),
    };
    if echo != (first, second) {
        return Err(ClientError::UnexpectedResponse("write echo mismatch"));
    }
    Ok(())
}
