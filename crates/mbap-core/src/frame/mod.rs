pub mod tcp;

#[cfg(feature = "alloc")]
pub mod stream;

#[cfg(feature = "alloc")]
pub use stream::{Frames, StreamReassembler};
#[cfg(feature = "alloc")]
pub use tcp::{Decoded, Frame};
pub use tcp::{MbapHeader, MAX_ADU_LEN, MAX_PDU_LEN, MBAP_HEADER_LEN};
