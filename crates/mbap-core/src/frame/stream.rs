//! Reassembles MBAP frames from an arbitrarily fragmented byte stream.

use alloc::vec::Vec;
use tracing::trace;

use crate::frame::tcp::{self, Decoded, Frame};

/// Per-connection accumulator that turns inbound chunks into whole frames.
///
/// Bytes leave the buffer only as a complete ADU or, when the front of the
/// buffer is not a frame boundary, one byte at a time.
#[derive(Debug, Default, Clone)]
pub struct StreamReassembler {
    buffer: Vec<u8>,
    head: usize,
    discarded: u64,
}

impl StreamReassembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a chunk without extracting anything.
    pub fn extend(&mut self, chunk: &[u8]) {
        if self.head > 0 {
            self.buffer.drain(..self.head);
            self.head = 0;
        }
        self.buffer.extend_from_slice(chunk);
    }

    /// Appends a chunk and returns an iterator over every frame now complete.
    pub fn push(&mut self, chunk: &[u8]) -> Frames<'_> {
        self.extend(chunk);
        Frames { reassembler: self }
    }

    /// Extracts the next complete frame, resynchronising past garbage.
    pub fn next_frame(&mut self) -> Option<Frame> {
        loop {
            match tcp::decode(&self.buffer[self.head..]) {
                Decoded::NeedMoreBytes => return None,
                Decoded::Invalid(err) => {
                    let dropped = self.buffer[self.head];
                    self.head += 1;
                    self.discarded += 1;
                    trace!(error = %err, dropped, "resynchronising mbap stream");
                }
                Decoded::Frame { frame, consumed } => {
                    self.head += consumed;
                    trace!(
                        transaction_id = frame.transaction_id(),
                        consumed,
                        "reassembled mbap frame"
                    );
                    return Some(frame);
                }
            }
        }
    }

    /// Bytes received but not yet resolved into frames.
    pub fn buffered(&self) -> &[u8] {
        &self.buffer[self.head..]
    }

    pub fn is_empty(&self) -> bool {
        self.buffered().is_empty()
    }

    /// Total bytes dropped by resynchronisation since creation.
    pub fn discarded(&self) -> u64 {
        self.discarded
    }

    pub fn clear(&mut self) {
        self.buffer.clear();
        self.head = 0;
    }
}

/// Iterator returned by [`StreamReassembler::push`].
#[derive(Debug)]
pub struct Frames<'a> {
    reassembler: &'a mut StreamReassembler,
}

impl Iterator for Frames<'_> {
    type Item = Frame;

    fn next(&mut self) -> Option<Frame> {
        self.reassembler.next_frame()
    }
}
