//! Modbus/TCP protocol core in pure Rust.
//!
//! `mbap-core` encodes and decodes MBAP frames and Modbus PDUs, reassembles
//! frames from a fragmented byte stream, and defines the non-blocking
//! [`transport::ByteStream`] seam that the server and client roles poll.
//! The codec is `no_std`-compatible; the reassembler needs `alloc`.

#![cfg_attr(not(feature = "std"), no_std)]
#![forbid(unsafe_code)]

#[cfg(feature = "alloc")]
extern crate alloc;
#[cfg(feature = "std")]
extern crate std;

pub mod encoding;
pub mod error;
pub mod frame;
pub mod pdu;
#[cfg(feature = "std")]
pub mod transport;

pub use error::{DecodeError, EncodeError};
#[cfg(feature = "alloc")]
pub use frame::{Frame, StreamReassembler};
