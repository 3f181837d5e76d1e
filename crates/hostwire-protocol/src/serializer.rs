use std::cell::Cell;

use serde::Serialize;
use serde_json::{Map, Value};
use tracing::debug;

use crate::error::{ProtocolError, Result};
use crate::message::Message;

const FIELD_MESSAGE_TYPE: &str = "MessageType";
const FIELD_VERSION: &str = "Version";
const FIELD_PAYLOAD: &str = "Payload";

/// Encodes and decodes message envelopes to and from wire text.
///
/// Implementations are injected into the request handler; the envelope
/// layout may depend on the message's protocol version.
pub trait DataSerializer: Send + Sync {
    /// Encode `message` as a single wire string.
    fn serialize_message(&self, message: &Message) -> Result<String>;

    /// Decode one wire string into a message.
    fn deserialize_message(&self, raw: &str) -> Result<Message>;
}

/// How structured payload values are laid out for a given protocol version.
///
/// Versions 0, 1 and 3 carry test cases as a property bag; version 2 and
/// everything from 4 on use flat fields. Decoding accepts either layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadStyle {
    /// `{"Properties":[{"Key":{..},"Value":..}]}`
    PropertyBag,
    /// `{"Id":..,"FullyQualifiedName":..}`
    Flat,
}

impl PayloadStyle {
    /// The payload layout used by `version`.
    pub fn for_version(version: u32) -> Self {
        match version {
            0 | 1 | 3 => Self::PropertyBag,
            _ => Self::Flat,
        }
    }
}

thread_local! {
    static PAYLOAD_STYLE: Cell<PayloadStyle> = const { Cell::new(PayloadStyle::Flat) };
}

/// The payload style in effect for the serialization running on this thread.
pub(crate) fn current_payload_style() -> PayloadStyle {
    PAYLOAD_STYLE.with(Cell::get)
}

struct StyleGuard(PayloadStyle);

impl Drop for StyleGuard {
    fn drop(&mut self) {
        PAYLOAD_STYLE.with(|style| style.set(self.0));
    }
}

/// Convert a typed payload into its JSON value for `version`.
pub fn to_payload_value<T: Serialize + ?Sized>(payload: &T, version: u32) -> Result<Value> {
    let previous = PAYLOAD_STYLE.with(|style| style.replace(PayloadStyle::for_version(version)));
    let _restore = StyleGuard(previous);
    Ok(serde_json::to_value(payload)?)
}

/// JSON envelope codec.
///
/// Version 0 envelopes are `{"MessageType","Payload"}`; later versions add a
/// `Version` field so the receiver knows which payload style to expect.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonDataSerializer;

impl JsonDataSerializer {
    pub fn new() -> Self {
        Self
    }
}

impl DataSerializer for JsonDataSerializer {
    fn serialize_message(&self, message: &Message) -> Result<String> {
        let mut envelope = Map::with_capacity(3);
        if message.version() > 0 {
            envelope.insert(FIELD_VERSION.to_string(), Value::from(message.version()));
        }
        envelope.insert(
            FIELD_MESSAGE_TYPE.to_string(),
            Value::String(message.message_type().to_string()),
        );
        if let Some(payload) = message.payload() {
            envelope.insert(FIELD_PAYLOAD.to_string(), payload.clone());
        }
        Ok(serde_json::to_string(&Value::Object(envelope))?)
    }

    fn deserialize_message(&self, raw: &str) -> Result<Message> {
        let value: Value = serde_json::from_str(raw)?;
        let Value::Object(mut envelope) = value else {
            return Err(ProtocolError::MalformedEnvelope(
                "envelope is not a JSON object".to_string(),
            ));
        };

        let message_type = match envelope.remove(FIELD_MESSAGE_TYPE) {
            Some(Value::String(message_type)) if !message_type.is_empty() => message_type,
            _ => {
                return Err(ProtocolError::MalformedEnvelope(
                    "missing MessageType".to_string(),
                ))
            }
        };

        let version = match envelope.remove(FIELD_VERSION) {
            None | Some(Value::Null) => 0,
            Some(value) => value
                .as_u64()
                .and_then(|v| u32::try_from(v).ok())
                .ok_or_else(|| {
                    ProtocolError::MalformedEnvelope(format!("invalid Version {value}"))
                })?,
        };

        let payload = envelope.remove(FIELD_PAYLOAD);
        if !envelope.is_empty() {
            let fields: Vec<&String> = envelope.keys().collect();
            debug!(%message_type, ?fields, "ignoring unknown envelope fields");
        }
        Ok(Message::from_parts(message_type, version, payload))
    }
}
