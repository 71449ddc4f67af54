//! Big-endian cursor helpers shared by the MBAP and PDU codecs.

pub mod bits;
pub mod reader;
pub mod writer;

pub use bits::{bit_at, pack_bits, packed_len};
pub use reader::Reader;
pub use writer::Writer;
