//! Modbus/TCP server role: a bounded data store, a function-code
//! dispatcher, and hosts that feed it frames.
//!
//! [`Dispatcher`] is transport-agnostic. [`ServerConnection`] and
//! [`ConnectionRegistry`] drive it from non-blocking
//! [`ByteStream`](mbap_core::transport::ByteStream)s; [`ModbusTcpServer`]
//! drives it from tokio sockets.

#![forbid(unsafe_code)]

use thiserror::Error;

pub mod config;
pub mod connection;
pub mod dispatch;
pub mod registry;
pub mod server;
pub mod store;

pub use config::{ConfigError, ServerConfig};
pub use connection::{PollSummary, ServerConnection};
#[cfg(feature = "metrics")]
pub use dispatch::DispatchMetricsSnapshot;
pub use dispatch::{handler_for, Dispatch, Dispatcher, Handler};
pub use registry::{ConnectionId, ConnectionRegistry};
pub use server::ModbusTcpServer;
pub use store::{AddressError, Bank, DataStore, DataStoreConfig, SharedDataStore};

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
}
