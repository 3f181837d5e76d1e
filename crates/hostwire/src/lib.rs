//! Test host protocol engine.
//!
//! hostwire connects a test host to the controller that drives it: a framed
//! duplex channel over Unix sockets or TCP, a versioned JSON message
//! protocol, and a request handler that routes discovery and execution
//! requests to pluggable managers.
//!
//! # Crate Structure
//!
//! - [`transport`]: blocking Unix socket and TCP streams, endpoint addresses
//! - [`frame`]: length-prefixed UTF-8 message framing
//! - [`protocol`]: message envelope, codec, object model, version negotiation, path conversion
//! - [`channel`]: duplex channels and host/client endpoints
//! - [`host`]: request handler and job queue (behind the `host` feature)

/// Re-export transport types.
pub mod transport {
    pub use hostwire_transport::*;
}

/// Re-export frame types.
pub mod frame {
    pub use hostwire_frame::*;
}

/// Re-export protocol types.
pub mod protocol {
    pub use hostwire_protocol::*;
}

/// Re-export channel types.
pub mod channel {
    pub use hostwire_channel::*;
}

/// Re-export host types (requires `host` feature).
#[cfg(feature = "host")]
pub mod host {
    pub use hostwire_host::*;
}
