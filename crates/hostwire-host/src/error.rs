use std::time::Duration;

use crate::factory::ManagerError;

/// Errors raised by the request handler and its outbound operations.
#[derive(Debug, thiserror::Error)]
pub enum HostError {
    /// Channel or endpoint error.
    #[error("channel error: {0}")]
    Channel(#[from] hostwire_channel::ChannelError),

    /// Message encoding/decoding error.
    #[error("protocol error: {0}")]
    Protocol(#[from] hostwire_protocol::ProtocolError),

    /// A discovery or execution manager call failed.
    #[error("test host manager failed: {0}")]
    Manager(#[source] ManagerError),

    /// No controller connection has been established yet.
    #[error("no controller connection")]
    NotConnected,

    /// `initialize_communication` was already called.
    #[error("communication already initialized")]
    AlreadyInitialized,

    /// The session ended while an operation was waiting on it.
    #[error("test session closed")]
    SessionClosed,

    /// The controller did not acknowledge a request in time.
    #[error("no '{message_type}' reply within {timeout:?}")]
    AckTimeout {
        message_type: &'static str,
        timeout: Duration,
    },

    /// The session closed while a request was waiting for its reply.
    #[error("'{0}' reply abandoned: session closed")]
    AckCancelled(&'static str),
}

pub type Result<T> = std::result::Result<T, HostError>;
