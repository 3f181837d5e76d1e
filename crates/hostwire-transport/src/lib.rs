//! Blocking stream transports for the test-host protocol.
//!
//! Provides a unified byte stream over the local and remote transports a
//! controller and a test host may share:
//! - Unix domain sockets (Linux/macOS), for co-located processes
//! - TCP, for deployed or remote test hosts
//!
//! This is the lowest layer of hostwire. Everything else builds on top of
//! the [`IpcStream`] type provided here.

pub mod address;
pub mod error;
pub mod tcp;
pub mod traits;

#[cfg(unix)]
pub mod uds;

pub use address::EndpointAddress;
pub use error::{Result, TransportError};
pub use tcp::TcpSocket;
pub use traits::IpcStream;

#[cfg(unix)]
pub use uds::UnixDomainSocket;
