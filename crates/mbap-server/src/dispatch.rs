//! Routes decoded request frames to per-function handlers.

use mbap_core::encoding::{packed_len, Reader, Writer};
use mbap_core::frame::MAX_PDU_LEN;
use mbap_core::pdu::{
    ExceptionCode, ExceptionResponse, FunctionCode, ReadRequest, WriteMultipleCoilsRequestData,
    WriteMultipleRegistersRequestData, WriteSingleCoilRequest, WriteSingleRegisterRequest,
};
use mbap_core::{DecodeError, EncodeError, Frame};
use tracing::{debug, warn};

use crate::store::{AddressError, DataStore, SharedDataStore};

#[cfg(feature = "metrics")]
use std::sync::atomic::{AtomicU64, Ordering};
#[cfg(feature = "metrics")]
use std::sync::Arc;

/// Uniform handler signature: the request payload (function byte stripped)
/// in, the response payload out through `w`.
pub type Handler = fn(&mut DataStore, &[u8], &mut Writer<'_>) -> Result<(), ExceptionCode>;

/// What the dispatcher decided for one inbound frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dispatch {
    /// Encoded response ADU to write back.
    Respond(Vec<u8>),
    /// Addressed to another unit; nothing is sent.
    Ignored,
}

impl From<AddressError> for ExceptionCode {
    fn from(_: AddressError) -> Self {
        ExceptionCode::IllegalDataAddress
    }
}

pub(crate) fn map_decode_error_to_exception(err: DecodeError) -> ExceptionCode {
    match err {
        DecodeError::InvalidFunctionCode | DecodeError::Unsupported => {
            ExceptionCode::IllegalFunction
        }
        DecodeError::InvalidLength | DecodeError::InvalidValue => ExceptionCode::IllegalDataAddress,
        DecodeError::UnexpectedEof | DecodeError::InvalidProtocolId => {
            ExceptionCode::IllegalDataValue
        }
    }
}

fn map_encode(_: EncodeError) -> ExceptionCode {
    ExceptionCode::ServerDeviceFailure
}

pub fn handler_for(function: FunctionCode) -> Option<Handler> {
    match function {
        FunctionCode::ReadCoils => Some(read_coils),
        FunctionCode::ReadDiscreteInputs => Some(read_discrete_inputs),
        FunctionCode::ReadHoldingRegisters => Some(read_holding_registers),
        FunctionCode::ReadInputRegisters => Some(read_input_registers),
        FunctionCode::WriteSingleCoil => Some(write_single_coil),
        FunctionCode::WriteSingleRegister => Some(write_single_register),
        FunctionCode::WriteMultipleCoils => Some(write_multiple_coils),
        FunctionCode::WriteMultipleRegisters => Some(write_multiple_registers),
        FunctionCode::Unsupported(_) => None,
    }
}

fn read_request(payload: &[u8]) -> Result<ReadRequest, ExceptionCode> {
    let mut r = Reader::new(payload);
    ReadRequest::decode_body(&mut r).map_err(map_decode_error_to_exception)
}

fn write_bits(w: &mut Writer<'_>, bits: &[bool]) -> Result<(), ExceptionCode> {
    let byte_count =
        u8::try_from(packed_len(bits.len())).map_err(|_| ExceptionCode::ServerDeviceFailure)?;
    w.write_u8(byte_count).map_err(map_encode)?;
    w.write_packed_bits(bits).map_err(map_encode)
}

fn write_words(w: &mut Writer<'_>, words: &[u16]) -> Result<(), ExceptionCode> {
    let byte_count = u8::try_from(words.len() * 2).map_err(|_| ExceptionCode::ServerDeviceFailure)?;
    w.write_u8(byte_count).map_err(map_encode)?;
    w.write_registers(words).map_err(map_encode)
}

fn write_echo(w: &mut Writer<'_>, first: u16, second: u16) -> Result<(), ExceptionCode> {
    w.write_be_u16(first).map_err(map_encode)?;
    w.write_be_u16(second).map_err(map_encode)
}

pub fn read_coils(
    store: &mut DataStore,
    payload: &[u8],
    w: &mut Writer<'_>,
) -> Result<(), ExceptionCode> {
    let req = read_request(payload)?;
    let bits = store.coils().read(req.start_address, usize::from(req.quantity))?;
    write_bits(w, bits)
}

pub fn read_discrete_inputs(
    store: &mut DataStore,
    payload: &[u8],
    w: &mut Writer<'_>,
) -> Result<(), ExceptionCode> {
    let req = read_request(payload)?;
    let bits = store
        .discrete_inputs()
        .read(req.start_address, usize::from(req.quantity))?;
    write_bits(w, bits)
}

pub fn read_holding_registers(
    store: &mut DataStore,
    payload: &[u8],
    w: &mut Writer<'_>,
) -> Result<(), ExceptionCode> {
    let req = read_request(payload)?;
    let words = store
        .holding_registers()
        .read(req.start_address, usize::from(req.quantity))?;
    write_words(w, words)
}

pub fn read_input_registers(
    store: &mut DataStore,
    payload: &[u8],
    w: &mut Writer<'_>,
) -> Result<(), ExceptionCode> {
    let req = read_request(payload)?;
    let words = store
        .input_registers()
        .read(req.start_address, usize::from(req.quantity))?;
    write_words(w, words)
}

/// Only `0xFF00` and `0x0000` are accepted; any other value is
/// Illegal Data Address rather than being coerced to OFF.
pub fn write_single_coil(
    store: &mut DataStore,
    payload: &[u8],
    w: &mut Writer<'_>,
) -> Result<(), ExceptionCode> {
    let mut r = Reader::new(payload);
    let req = WriteSingleCoilRequest::decode_body(&mut r).map_err(map_decode_error_to_exception)?;
    store.coils_mut().set(req.address, req.value)?;
    let echoed = if req.value {
        WriteSingleCoilRequest::ON
    } else {
        WriteSingleCoilRequest::OFF
    };
    write_echo(w, req.address, echoed)
}

pub fn write_single_register(
    store: &mut DataStore,
    payload: &[u8],
    w: &mut Writer<'_>,
) -> Result<(), ExceptionCode> {
    let mut r = Reader::new(payload);
    let req =
        WriteSingleRegisterRequest::decode_body(&mut r).map_err(map_decode_error_to_exception)?;
    store.holding_registers_mut().set(req.address, req.value)?;
    write_echo(w, req.address, req.value)
}

pub fn write_multiple_coils(
    store: &mut DataStore,
    payload: &[u8],
    w: &mut Writer<'_>,
) -> Result<(), ExceptionCode> {
    let mut r = Reader::new(payload);
    let req = WriteMultipleCoilsRequestData::decode_body(&mut r)
        .map_err(map_decode_error_to_exception)?;
    let values: Vec<bool> = req.coils().collect();
    store.coils_mut().write(req.start_address, &values)?;
    write_echo(w, req.start_address, req.quantity)
}

pub fn write_multiple_registers(
    store: &mut DataStore,
    payload: &[u8],
    w: &mut Writer<'_>,
) -> Result<(), ExceptionCode> {
    let mut r = Reader::new(payload);
    let req = WriteMultipleRegistersRequestData::decode_body(&mut r)
        .map_err(map_decode_error_to_exception)?;
    let values: Vec<u16> = req.registers().collect();
    store.holding_registers_mut().write(req.start_address, &values)?;
    write_echo(w, req.start_address, req.quantity)
}

#[cfg(feature = "metrics")]
#[derive(Debug, Default)]
pub struct DispatchMetrics {
    requests_total: AtomicU64,
    responses_ok: AtomicU64,
    exceptions_sent: AtomicU64,
    ignored_unit_id: AtomicU64,
}

#[cfg(feature = "metrics")]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchMetricsSnapshot {
    pub requests_total: u64,
    pub responses_ok: u64,
    pub exceptions_sent: u64,
    pub ignored_unit_id: u64,
}

#[cfg(feature = "metrics")]
impl DispatchMetrics {
    fn snapshot(&self) -> DispatchMetricsSnapshot {
        DispatchMetricsSnapshot {
            requests_total: self.requests_total.load(Ordering::Relaxed),
            responses_ok: self.responses_ok.load(Ordering::Relaxed),
            exceptions_sent: self.exceptions_sent.load(Ordering::Relaxed),
            ignored_unit_id: self.ignored_unit_id.load(Ordering::Relaxed),
        }
    }
}

/// Server-role request dispatcher bound to one unit id and one store.
///
/// Cloning is cheap; clones share the store (and counters, with the
/// `metrics` feature).
#[derive(Debug, Clone)]
pub struct Dispatcher {
    unit_id: u8,
    store: SharedDataStore,
    #[cfg(feature = "metrics")]
    metrics: Arc<DispatchMetrics>,
}

impl Dispatcher {
    pub fn new(unit_id: u8, store: SharedDataStore) -> Self {
        Self {
            unit_id,
            store,
            #[cfg(feature = "metrics")]
            metrics: Arc::new(DispatchMetrics::default()),
        }
    }

    pub fn unit_id(&self) -> u8 {
        self.unit_id
    }

    pub fn store(&self) -> &SharedDataStore {
        &self.store
    }

    #[cfg(feature = "metrics")]
    pub fn metrics_snapshot(&self) -> DispatchMetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Handles one frame: exactly one response, or none for a foreign unit id.
    pub fn dispatch(&self, frame: &Frame) -> Dispatch {
        let transaction_id = frame.transaction_id();
        if frame.unit_id() != self.unit_id {
            #[cfg(feature = "metrics")]
            self.metrics.ignored_unit_id.fetch_add(1, Ordering::Relaxed);
            debug!(
                transaction_id,
                unit_id = frame.unit_id(),
                expected = self.unit_id,
                "ignoring request for another unit"
            );
            return Dispatch::Ignored;
        }

        #[cfg(feature = "metrics")]
        self.metrics.requests_total.fetch_add(1, Ordering::Relaxed);

        debug!(
            transaction_id,
            unit_id = self.unit_id,
            function = frame.function_byte(),
            pdu_len = frame.pdu().len(),
            "dispatching modbus request"
        );

        let pdu = self.execute(frame.pdu());
        match Frame::new(transaction_id, self.unit_id, pdu) {
            Ok(response) => Dispatch::Respond(response.encode()),
            Err(err) => {
                warn!(transaction_id, error = %err, "dropping unencodable response");
                Dispatch::Ignored
            }
        }
    }

    /// Runs a request PDU against the store and returns the response PDU.
    pub fn execute(&self, request_pdu: &[u8]) -> Vec<u8> {
        let Some((&function_byte, payload)) = request_pdu.split_first() else {
            return ExceptionResponse::new(0, ExceptionCode::IllegalFunction)
                .to_pdu()
                .to_vec();
        };

        let outcome = FunctionCode::from_u8(function_byte)
            .map_err(map_decode_error_to_exception)
            .and_then(|function| handler_for(function).ok_or(ExceptionCode::IllegalFunction));

        let mut response = [0u8; MAX_PDU_LEN];
        response[0] = function_byte;
        let (_, body) = response.split_at_mut(1);
        let mut w = Writer::new(body);
        let outcome = outcome
            .and_then(|handler| self.store.with_store(|store| handler(store, payload, &mut w)));

        match outcome {
            Ok(()) => {
                #[cfg(feature = "metrics")]
                self.metrics.responses_ok.fetch_add(1, Ordering::Relaxed);
                let len = 1 + w.position();
                response[..len].to_vec()
            }
            Err(code) => {
                #[cfg(feature = "metrics")]
                self.metrics.exceptions_sent.fetch_add(1, Ordering::Relaxed);
                debug!(
                    function = function_byte,
                    exception = code.as_u8(),
                    "answering with modbus exception"
                );
                ExceptionResponse::new(function_byte, code).to_pdu().to_vec()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{handler_for, Dispatch, Dispatcher};
    use crate::store::{DataStore, DataStoreConfig, SharedDataStore};
    use mbap_core::encoding::Writer;
    use mbap_core::pdu::{ExceptionCode, FunctionCode};
    use mbap_core::Frame;

    fn dispatcher() -> Dispatcher {
        Dispatcher::new(1, SharedDataStore::default())
    }

    fn run(
        function: FunctionCode,
        store: &mut DataStore,
        payload: &[u8],
    ) -> Result<Vec<u8>, ExceptionCode> {
        let handler = handler_for(function).unwrap();
        let mut buf = [0u8; 252];
        let mut w = Writer::new(&mut buf);
        handler(store, payload, &mut w)?;
        Ok(w.as_written().to_vec())
    }

    #[test]
    fn read_holding_registers_scenario() {
        let d = dispatcher();
        d.store().set_holding_register(0, 10).unwrap();
        d.store().set_holding_register(1, 20).unwrap();

        let request = Frame::new(1, 1, vec![0x03, 0x00, 0x00, 0x00, 0x02]).unwrap();
        assert_eq!(
            d.dispatch(&request),
            Dispatch::Respond(vec![
                0x00, 0x01, 0x00, 0x00, 0x00, 0x07, 0x01, 0x03, 0x04, 0x00, 0x0A, 0x00, 0x14
            ])
        );
    }

    #[test]
    fn write_multiple_registers_scenario() {
        let d = dispatcher();
        let request = Frame::new(
            0x0102,
            1,
            vec![0x10, 0x00, 0x00, 0x00, 0x02, 0x04, 0x00, 0x0A, 0x00, 0x14],
        )
        .unwrap();
        assert_eq!(
            d.dispatch(&request),
            Dispatch::Respond(vec![
                0x01, 0x02, 0x00, 0x00, 0x00, 0x06, 0x01, 0x10, 0x00, 0x00, 0x00, 0x02
            ])
        );
        let snapshot = d.store().snapshot();
        assert_eq!(snapshot.holding_registers().read(0, 2).unwrap(), &[10, 20]);
    }

    #[test]
    fn foreign_unit_id_is_ignored() {
        let d = dispatcher();
        let request = Frame::new(1, 2, vec![0x03, 0x00, 0x00, 0x00, 0x02]).unwrap();
        assert_eq!(d.dispatch(&request), Dispatch::Ignored);
    }

    #[test]
    fn exception_keeps_transaction_and_configured_unit() {
        let d = dispatcher();
        let request = Frame::new(0xBEEF, 1, vec![0x2B, 0x0E, 0x01, 0x00]).unwrap();
        assert_eq!(
            d.dispatch(&request),
            Dispatch::Respond(vec![0xBE, 0xEF, 0x00, 0x00, 0x00, 0x03, 0x01, 0xAB, 0x01])
        );
    }

    #[test]
    fn unsupported_and_exception_bit_functions_are_illegal() {
        let d = dispatcher();
        assert_eq!(d.execute(&[0x07]), vec![0x87, 0x01]);
        assert_eq!(d.execute(&[0x83, 0x00]), vec![0x83, 0x01]);
        assert_eq!(d.execute(&[]), vec![0x80, 0x01]);
    }

    #[test]
    fn read_coils_quantity_limits() {
        let d = Dispatcher::new(1, SharedDataStore::with_config(&DataStoreConfig::uniform(4000)));
        assert_eq!(d.execute(&[0x01, 0x00, 0x00, 0x00, 0x00]), vec![0x81, 0x02]);
        assert_eq!(d.execute(&[0x01, 0x00, 0x00, 0x07, 0xD1]), vec![0x81, 0x02]);
        let ok = d.execute(&[0x01, 0x00, 0x00, 0x07, 0xD0]);
        assert_eq!(ok[..2], [0x01, 250]);
        assert_eq!(ok.len(), 252);
    }

    #[test]
    fn read_coils_past_capacity() {
        let d = dispatcher();
        assert_eq!(d.execute(&[0x01, 0x00, 0x3F, 0x00, 0x02]), vec![0x81, 0x02]);
        assert_eq!(d.execute(&[0x01, 0x00, 0x3F, 0x00, 0x01]), vec![0x01, 0x01, 0x00]);
    }

    #[test]
    fn short_read_payload_is_illegal_value() {
        let d = dispatcher();
        assert_eq!(d.execute(&[0x03, 0x00, 0x00, 0x00]), vec![0x83, 0x03]);
        assert_eq!(d.execute(&[0x02]), vec![0x82, 0x03]);
    }

    #[test]
    fn trailing_bytes_are_ignored() {
        let d = dispatcher();
        assert_eq!(
            d.execute(&[0x04, 0x00, 0x00, 0x00, 0x01, 0xAA, 0xBB]),
            vec![0x04, 0x02, 0x00, 0x00]
        );
    }

    #[test]
    fn read_coils_packs_lsb_first() {
        let mut store = DataStore::default();
        store
            .coils_mut()
            .write(0, &[true, false, true, true, false, false, false, false, true, true])
            .unwrap();
        assert_eq!(
            run(FunctionCode::ReadCoils, &mut store, &[0x00, 0x00, 0x00, 0x0A]),
            Ok(vec![0x02, 0b0000_1101, 0b0000_0011])
        );
    }

    #[test]
    fn read_discrete_inputs_uses_its_own_bank() {
        let mut store = DataStore::default();
        store.set_discrete_input(2, true).unwrap();
        store.set_coil(0, true).unwrap();
        assert_eq!(
            run(FunctionCode::ReadDiscreteInputs, &mut store, &[0x00, 0x00, 0x00, 0x03]),
            Ok(vec![0x01, 0b0000_0100])
        );
    }

    #[test]
    fn read_input_registers_big_endian() {
        let mut store = DataStore::default();
        store.set_input_register(1, 0x1234).unwrap();
        assert_eq!(
            run(FunctionCode::ReadInputRegisters, &mut store, &[0x00, 0x01, 0x00, 0x01]),
            Ok(vec![0x02, 0x12, 0x34])
        );
    }

    #[test]
    fn write_single_coil_echoes_and_rejects_odd_values() {
        let mut store = DataStore::default();
        assert_eq!(
            run(FunctionCode::WriteSingleCoil, &mut store, &[0x00, 0x05, 0xFF, 0x00]),
            Ok(vec![0x00, 0x05, 0xFF, 0x00])
        );
        assert_eq!(store.coil(5), Ok(true));
        assert_eq!(
            run(FunctionCode::WriteSingleCoil, &mut store, &[0x00, 0x05, 0x00, 0x00]),
            Ok(vec![0x00, 0x05, 0x00, 0x00])
        );
        assert_eq!(store.coil(5), Ok(false));

        assert_eq!(
            run(FunctionCode::WriteSingleCoil, &mut store, &[0x00, 0x05, 0x12, 0x34]),
            Err(ExceptionCode::IllegalDataAddress)
        );
        assert_eq!(
            run(FunctionCode::WriteSingleCoil, &mut store, &[0x00, 0x40, 0xFF, 0x00]),
            Err(ExceptionCode::IllegalDataAddress)
        );
        assert_eq!(
            run(FunctionCode::WriteSingleCoil, &mut store, &[0x00, 0x05, 0xFF]),
            Err(ExceptionCode::IllegalDataValue)
        );
    }

    #[test]
    fn write_single_register_echoes() {
        let mut store = DataStore::default();
        assert_eq!(
            run(FunctionCode::WriteSingleRegister, &mut store, &[0x00, 0x02, 0xAB, 0xCD]),
            Ok(vec![0x00, 0x02, 0xAB, 0xCD])
        );
        assert_eq!(store.holding_register(2), Ok(0xABCD));
        assert_eq!(
            run(FunctionCode::WriteSingleRegister, &mut store, &[0x00, 0x40, 0x00, 0x01]),
            Err(ExceptionCode::IllegalDataAddress)
        );
    }

    #[test]
    fn write_multiple_coils_unpacks_lsb_first() {
        let mut store = DataStore::default();
        assert_eq!(
            run(
                FunctionCode::WriteMultipleCoils,
                &mut store,
                &[0x00, 0x02, 0x00, 0x0A, 0x02, 0b1100_1101, 0b0000_0001],
            ),
            Ok(vec![0x00, 0x02, 0x00, 0x0A])
        );
        assert_eq!(
            store.coils().read(2, 10).unwrap(),
            &[true, false, true, true, false, false, true, true, true, false]
        );
        assert_eq!(store.coil(12), Ok(false));
    }

    #[test]
    fn write_multiple_coils_rejects_bad_byte_count_and_range() {
        let mut store = DataStore::default();
        // byte count larger than ceil(quantity / 8)
        assert_eq!(
            run(
                FunctionCode::WriteMultipleCoils,
                &mut store,
                &[0x00, 0x00, 0x00, 0x08, 0x02, 0xFF, 0xFF],
            ),
            Err(ExceptionCode::IllegalDataAddress)
        );
        assert_eq!(
            run(
                FunctionCode::WriteMultipleCoils,
                &mut store,
                &[0x00, 0x00, 0x00, 0x09, 0x01, 0xFF],
            ),
            Err(ExceptionCode::IllegalDataAddress)
        );
        assert_eq!(
            run(
                FunctionCode::WriteMultipleCoils,
                &mut store,
                &[0x00, 0x3C, 0x00, 0x08, 0x01, 0xFF],
            ),
            Err(ExceptionCode::IllegalDataAddress)
        );
        assert_eq!(
            run(
                FunctionCode::WriteMultipleCoils,
                &mut store,
                &[0x00, 0x00, 0x00, 0x10, 0x02, 0xFF],
            ),
            Err(ExceptionCode::IllegalDataValue)
        );
        assert_eq!(
            run(FunctionCode::WriteMultipleCoils, &mut store, &[0x00, 0x00, 0x00]),
            Err(ExceptionCode::IllegalDataValue)
        );
        assert!(store.coils().as_slice().iter().all(|coil| !coil));
    }

    #[test]
    fn write_multiple_registers_rejects_bad_byte_count_and_range() {
        let mut store = DataStore::default();
        assert_eq!(
            run(
                FunctionCode::WriteMultipleRegisters,
                &mut store,
                &[0x00, 0x00, 0x00, 0x02, 0x03, 0x00, 0x0A, 0x00],
            ),
            Err(ExceptionCode::IllegalDataAddress)
        );
        assert_eq!(
            run(
                FunctionCode::WriteMultipleRegisters,
                &mut store,
                &[0x00, 0x00, 0x00, 0x02, 0x04, 0x00, 0x0A],
            ),
            Err(ExceptionCode::IllegalDataValue)
        );
        assert_eq!(
            run(
                FunctionCode::WriteMultipleRegisters,
                &mut store,
                &[0x00, 0x3F, 0x00, 0x02, 0x04, 0x00, 0x0A, 0x00, 0x14],
            ),
            Err(ExceptionCode::IllegalDataAddress)
        );
        assert_eq!(
            run(FunctionCode::WriteMultipleRegisters, &mut store, &[0x00, 0x00, 0x00, 0x00, 0x00]),
            Err(ExceptionCode::IllegalDataAddress)
        );
        assert!(store.holding_registers().as_slice().iter().all(|value| *value == 0));
    }

    #[cfg(feature = "metrics")]
    #[test]
    fn metrics_count_outcomes() {
        let d = dispatcher();
        let _ = d.dispatch(&Frame::new(1, 1, vec![0x03, 0x00, 0x00, 0x00, 0x01]).unwrap());
        let _ = d.dispatch(&Frame::new(2, 1, vec![0x07]).unwrap());
        let _ = d.dispatch(&Frame::new(3, 9, vec![0x03, 0x00, 0x00, 0x00, 0x01]).unwrap());

        let snapshot = d.metrics_snapshot();
        assert_eq!(snapshot.requests_total, 2);
        assert_eq!(snapshot.responses_ok, 1);
        assert_eq!(snapshot.exceptions_sent, 1);
        assert_eq!(snapshot.ignored_unit_id, 1);
    }
}
