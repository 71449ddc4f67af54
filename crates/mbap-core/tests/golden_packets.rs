use mbap_core::encoding::{Reader, Writer};
use mbap_core::frame::{self, tcp::Decoded};
use mbap_core::pdu::{
    ExceptionCode, ExceptionResponse, ReadRequest, Request, Response,
    WriteMultipleRegistersRequest,
};
use mbap_core::{EncodeError, Frame, StreamReassembler};

const TCP_READ_HOLDING: &[u8] = &[
    0x00, 0x01, 0x00, 0x00, 0x00, 0x06, 0x01, 0x03, 0x00, 0x00, 0x00, 0x02,
];
const TCP_READ_HOLDING_RESP: &[u8] = &[
    0x00, 0x01, 0x00, 0x00, 0x00, 0x07, 0x01, 0x03, 0x04, 0x00, 0x0A, 0x00, 0x14,
];
const WRITE_MULTIPLE_REGISTERS_REQ: &[u8] = &[
    0x10, 0x00, 0x00, 0x00, 0x02, 0x04, 0x00, 0x0A, 0x00, 0x14,
];
const TCP_ILLEGAL_ADDRESS: &[u8] = &[0x00, 0x09, 0x00, 0x00, 0x00, 0x03, 0x01, 0x81, 0x02];

#[test]
fn read_holding_request_golden_encode() {
    let pdu = Request::ReadHoldingRegisters(ReadRequest {
        start_address: 0,
        quantity: 2,
    })
    .to_pdu()
    .unwrap();
    assert_eq!(frame::tcp::encode(0x01, 0x0001, &pdu).unwrap(), TCP_READ_HOLDING);
}

#[test]
fn read_holding_response_golden_decode() {
    let frame = match frame::tcp::decode(TCP_READ_HOLDING_RESP) {
        Decoded::Frame { frame, consumed } => {
            assert_eq!(consumed, TCP_READ_HOLDING_RESP.len());
            frame
        }
        other => panic!("unexpected decode result: {other:?}"),
    };

    let mut r = Reader::new(frame.pdu());
    match Response::decode(&mut r).unwrap() {
        Response::ReadHoldingRegisters(resp) => {
            assert_eq!(resp.register_count(), 2);
            assert_eq!(resp.register(0), Some(10));
            assert_eq!(resp.register(1), Some(20));
        }
        other => panic!("unexpected response: {other:?}"),
    }
}

#[test]
fn write_multiple_registers_golden_encode() {
    let req = WriteMultipleRegistersRequest {
        start_address: 0,
        values: &[10, 20],
    };
    let mut buf = [0u8; 16];
    let mut w = Writer::new(&mut buf);
    req.encode(&mut w).unwrap();
    assert_eq!(w.as_written(), WRITE_MULTIPLE_REGISTERS_REQ);
}

#[test]
fn exception_frame_golden_encode() {
    let pdu = ExceptionResponse::new(0x01, ExceptionCode::IllegalDataAddress).to_pdu();
    let frame = Frame::new(0x0009, 0x01, pdu.to_vec()).unwrap();
    assert_eq!(frame.encode(), TCP_ILLEGAL_ADDRESS);
}

#[test]
fn mbap_header_golden_fields() {
    let mut r = Reader::new(TCP_READ_HOLDING);
    let (header, pdu) = frame::tcp::decode_frame(&mut r).unwrap();
    assert_eq!(header.transaction_id, 1);
    assert_eq!(header.protocol_id, 0);
    assert_eq!(header.length, 6);
    assert_eq!(header.unit_id, 1);
    assert_eq!(pdu, &TCP_READ_HOLDING[7..]);
}

#[test]
fn encode_rejects_pdu_beyond_modbus_limit() {
    let oversized = vec![0x03; frame::MAX_PDU_LEN + 1];
    assert_eq!(
        frame::tcp::encode(1, 1, &oversized).unwrap_err(),
        EncodeError::ValueOutOfRange
    );
}

#[test]
fn reassembler_handles_golden_stream_with_noise() {
    let mut stream = vec![0xFF];
    stream.extend_from_slice(TCP_READ_HOLDING);
    stream.extend_from_slice(TCP_ILLEGAL_ADDRESS);

    let mut reassembler = StreamReassembler::new();
    let frames: Vec<Frame> = reassembler.push(&stream).collect();
    assert_eq!(frames.len(), 2);
    assert_eq!(frames[0].encode(), TCP_READ_HOLDING);
    assert_eq!(frames[1].encode(), TCP_ILLEGAL_ADDRESS);
    assert_eq!(reassembler.discarded(), 1);
}
