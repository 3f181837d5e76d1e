use std::sync::Arc;
use std::time::Duration;

use hostwire_frame::FrameConfig;

use crate::channel::CommunicationChannel;
use crate::client::SocketClient;
use crate::error::Result;
use crate::server::SocketServer;

/// Which side of the connection this process opens.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionRole {
    /// Listen and wait for the peer to connect.
    Host,
    /// Connect to a peer that is already listening.
    Client,
}

/// How a test host reaches its controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionInfo {
    pub role: ConnectionRole,
    /// Endpoint string, see [`hostwire_transport::EndpointAddress`].
    pub endpoint: String,
}

impl ConnectionInfo {
    pub fn new(role: ConnectionRole, endpoint: impl Into<String>) -> Self {
        Self {
            role,
            endpoint: endpoint.into(),
        }
    }
}

/// Invoked exactly once with the connected channel or the reason there is none.
pub type ConnectedCallback = Box<dyn FnOnce(Result<Arc<dyn CommunicationChannel>>) + Send>;

/// Opens the one connection a session runs over.
pub trait CommunicationEndpoint: Send + Sync {
    /// Begin listening or connecting at `address`.
    ///
    /// Returns the address actually in use (for a listener on TCP port 0,
    /// the resolved port) once the endpoint is ready; the connection itself
    /// is reported later through `on_connected`.
    fn start(&self, address: &str, on_connected: ConnectedCallback) -> Result<String>;

    /// Stop listening or connecting and close any connection made.
    /// Idempotent and callable from any thread.
    fn stop(&self);
}

/// Endpoint timing and framing settings.
#[derive(Debug, Clone)]
pub struct EndpointConfig {
    pub frame: FrameConfig,
    /// How long a client keeps retrying a listener that is not up yet.
    pub connect_timeout: Duration,
    /// Pause between client connection attempts.
    pub connect_retry_interval: Duration,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            frame: FrameConfig::default(),
            connect_timeout: Duration::from_secs(90),
            connect_retry_interval: Duration::from_millis(50),
        }
    }
}

/// The endpoint for `role`.
pub fn create_endpoint(role: ConnectionRole, config: EndpointConfig) -> Box<dyn CommunicationEndpoint> {
    match role {
        ConnectionRole::Host => Box::new(SocketServer::new(config)),
        ConnectionRole::Client => Box::new(SocketClient::new(config)),
    }
}
