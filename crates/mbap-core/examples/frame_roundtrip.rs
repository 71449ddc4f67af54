use mbap_core::encoding::Reader;
use mbap_core::frame::tcp;
use mbap_core::pdu::{ReadHoldingRegistersRequest, Request, Response};
use mbap_core::StreamReassembler;

fn main() {
    let request = Request::ReadHoldingRegisters(ReadHoldingRegistersRequest {
        start_address: 0x006B,
        quantity: 2,
    });
    let pdu = request
        .to_pdu()
        .expect("request encoding should succeed for valid sample data");
    let adu = tcp::encode(1, 0x0001, &pdu).expect("sample pdu fits in one frame");
    println!("encoded request adu: {adu:02X?}");

    // A response split across two reads, with a stray byte in front.
    let mut wire = vec![0xFF];
    wire.extend([0x00, 0x01, 0x00, 0x00, 0x00, 0x07, 0x01, 0x03, 0x04, 0x00, 0x2A, 0x00, 0x64]);
    let (first, second) = wire.split_at(6);

    let mut reassembler = StreamReassembler::new();
    assert_eq!(reassembler.push(first).count(), 0);
    for frame in reassembler.push(second) {
        println!(
            "frame tid={} unit={} pdu={:02X?}",
            frame.transaction_id(),
            frame.unit_id(),
            frame.pdu()
        );

        let mut r = Reader::new(frame.pdu());
        match Response::decode(&mut r) {
            Ok(Response::ReadHoldingRegisters(resp)) => {
                for idx in 0..resp.register_count() {
                    println!("register[{idx}] = {}", resp.register(idx).unwrap_or_default());
                }
            }
            other => println!("unexpected response: {other:?}"),
        }
    }
    println!("discarded {} byte(s) while resynchronising", reassembler.discarded());
}
