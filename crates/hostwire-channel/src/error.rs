/// Errors raised by channels and endpoints.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    /// Transport-level error.
    #[error("transport error: {0}")]
    Transport(#[from] hostwire_transport::TransportError),

    /// Frame-level error.
    #[error("frame error: {0}")]
    Frame(#[from] hostwire_frame::FrameError),

    /// The channel was closed locally or by the peer.
    #[error("channel closed")]
    Closed,

    /// A message handler is already attached to this channel.
    #[error("channel already has a message handler")]
    HandlerAlreadySet,

    /// `start` was called on an endpoint that is already running.
    #[error("endpoint already started")]
    AlreadyStarted,

    /// The endpoint was stopped before a connection was established.
    #[error("endpoint stopped before a connection was established")]
    Stopped,

    /// No connection was established within the configured time.
    #[error("no connection to {address} within {timeout:?}")]
    ConnectTimeout {
        address: String,
        timeout: std::time::Duration,
    },

    /// A background thread could not be spawned.
    #[error("failed to spawn {name} thread: {source}")]
    Spawn {
        name: &'static str,
        source: std::io::Error,
    },
}

pub type Result<T> = std::result::Result<T, ChannelError>;
