//! Versioned message protocol spoken between a test controller and a test host.
//!
//! This crate owns everything that crosses the wire but nothing that moves
//! bytes: the [`Message`] envelope and its [`DataSerializer`] codec, the
//! stable message-type tags, the decoded [`MessageKind`] sum type, the
//! payload object model, version negotiation, and the [`PathConverter`]
//! used when the host sees files under a different prefix than the
//! controller.

pub mod error;
pub mod kind;
pub mod message;
pub mod object_model;
pub mod path_converter;
pub mod serializer;
pub mod version;

pub use error::{ProtocolError, Result};
pub use kind::MessageKind;
pub use message::{message_type, Message};
pub use path_converter::{
    NullPathConverter, PathConversionDirection, PathConverter, PrefixPathConverter,
};
pub use serializer::{DataSerializer, JsonDataSerializer, PayloadStyle};
pub use version::{
    negotiate_version, HIGHEST_SUPPORTED_VERSION, INITIAL_PROTOCOL_VERSION,
    MINIMUM_VERSION_WITH_DEBUG_SUPPORT, VERSION_WITH_ATTACH_DEBUGGER_PAYLOAD,
};
