//! Duplex message channels for the test-host protocol.
//!
//! A [`CommunicationEndpoint`] opens the single connection a session runs
//! over: [`SocketServer`] when this process listens for its peer,
//! [`SocketClient`] when it connects out. Either hands back a
//! [`CommunicationChannel`] that sends whole messages and delivers inbound
//! ones, in order, to a [`MessageHandler`] on its own reader thread.

pub mod channel;
pub mod client;
pub mod endpoint;
pub mod error;
pub mod server;

pub use channel::{CommunicationChannel, FramedChannel, MessageHandler};
pub use client::SocketClient;
pub use endpoint::{
    create_endpoint, CommunicationEndpoint, ConnectedCallback, ConnectionInfo, ConnectionRole,
    EndpointConfig,
};
pub use error::{ChannelError, Result};
pub use server::SocketServer;
