use mbap_core::encoding::Reader;
use mbap_core::frame::tcp::{self, Decoded};
use mbap_core::pdu::Response;
use mbap_core::{Frame, StreamReassembler};
use proptest::prelude::*;

fn arb_frame() -> impl Strategy<Value = Frame> {
    (
        any::<u16>(),
        any::<u8>(),
        proptest::collection::vec(any::<u8>(), 1..=tcp::MAX_PDU_LEN),
    )
        .prop_map(|(tid, unit, pdu)| Frame::new(tid, unit, pdu).unwrap())
}

fn arb_frames() -> impl Strategy<Value = Vec<Frame>> {
    proptest::collection::vec(arb_frame(), 0..8)
}

fn concat(frames: &[Frame]) -> Vec<u8> {
    frames.iter().flat_map(Frame::encode).collect()
}

proptest! {
    #[test]
    fn codec_roundtrip(frame in arb_frame()) {
        let bytes = frame.encode();
        match tcp::decode(&bytes) {
            Decoded::Frame { frame: decoded, consumed } => {
                prop_assert_eq!(consumed, bytes.len());
                prop_assert_eq!(decoded.encode(), bytes);
            }
            other => prop_assert!(false, "unexpected decode result: {:?}", other),
        }
    }

    #[test]
    fn n_back_to_back_frames_yield_n_frames(frames in arb_frames()) {
        let mut reassembler = StreamReassembler::new();
        let out: Vec<Frame> = reassembler.push(&concat(&frames)).collect();
        prop_assert_eq!(out, frames);
        prop_assert!(reassembler.is_empty());
        prop_assert_eq!(reassembler.discarded(), 0);
    }

    #[test]
    fn byte_at_a_time_matches_all_at_once(frames in arb_frames()) {
        let bytes = concat(&frames);

        let mut whole = StreamReassembler::new();
        let at_once: Vec<Frame> = whole.push(&bytes).collect();

        let mut trickle = StreamReassembler::new();
        let mut one_by_one = Vec::new();
        for byte in &bytes {
            one_by_one.extend(trickle.push(std::slice::from_ref(byte)));
        }

        prop_assert_eq!(&one_by_one, &at_once);
        prop_assert_eq!(one_by_one, frames);
    }

    #[test]
    fn arbitrary_split_points_match(
        frames in arb_frames(),
        cuts in proptest::collection::vec(any::<prop::sample::Index>(), 0..6),
    ) {
        let bytes = concat(&frames);
        let mut points: Vec<usize> = cuts.iter().map(|idx| idx.index(bytes.len() + 1)).collect();
        points.sort_unstable();

        let mut reassembler = StreamReassembler::new();
        let mut out = Vec::new();
        let mut start = 0;
        for point in points.into_iter().chain(std::iter::once(bytes.len())) {
            out.extend(reassembler.push(&bytes[start..point]));
            start = point;
        }
        prop_assert_eq!(out, frames);
    }

    #[test]
    fn bad_protocol_id_discards_one_byte_per_step(
        frame in arb_frame(),
        protocol in 1u16..=u16::MAX,
    ) {
        let mut bytes = frame.encode();
        bytes[2..4].copy_from_slice(&protocol.to_be_bytes());
        prop_assert!(matches!(tcp::decode(&bytes), Decoded::Invalid(_)));

        let mut reassembler = StreamReassembler::new();
        reassembler.extend(&bytes);
        let found = reassembler.next_frame();
        let discarded = reassembler.discarded() as usize;
        let consumed = found.as_ref().map_or(0, Frame::encoded_len);

        // Only single-byte resync steps and whole frames ever leave the buffer.
        prop_assert!(discarded >= 1);
        prop_assert_eq!(discarded + consumed + reassembler.buffered().len(), bytes.len());
        prop_assert_eq!(reassembler.buffered(), &bytes[discarded + consumed..]);
        if found.is_none() {
            prop_assert_eq!(tcp::decode(reassembler.buffered()), Decoded::NeedMoreBytes);
        }
    }

    #[test]
    fn corrupted_prefix_then_valid_frame_recovers(
        garbage in proptest::collection::vec(0x80u8..=0xFF, 1..16),
        frame in arb_frame(),
    ) {
        let mut bytes = garbage.clone();
        bytes.extend_from_slice(&frame.encode());

        let mut reassembler = StreamReassembler::new();
        let out: Vec<Frame> = reassembler.push(&bytes).collect();
        prop_assert_eq!(out, vec![frame]);
        prop_assert_eq!(reassembler.discarded(), garbage.len() as u64);
    }

    #[test]
    fn random_input_never_panics(data in proptest::collection::vec(any::<u8>(), 0..600)) {
        let mut reassembler = StreamReassembler::new();
        for frame in reassembler.push(&data) {
            let mut r = Reader::new(frame.pdu());
            let _ = Response::decode(&mut r);
        }
        prop_assert!(reassembler.buffered().len() < tcp::MAX_ADU_LEN);
    }
}
