//! Modbus PDU model for the eight data-access function codes.

pub mod exception;
pub mod function_code;
pub mod request;
pub mod response;

pub use exception::{ExceptionCode, ExceptionResponse};
pub use function_code::FunctionCode;
pub use request::*;
pub use response::*;
