use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::error::{ProtocolError, Result};
use crate::serializer::to_payload_value;

/// Stable wire tags for every message type.
///
/// These strings are the protocol; older controllers match on them verbatim.
pub mod message_type {
    /// Version handshake, both directions. Payload: protocol version number.
    pub const VERSION_CHECK: &str = "ProtocolVersion";

    /// Controller → host: load discovery extensions. Payload: extension paths.
    pub const DISCOVERY_INITIALIZE: &str = "TestDiscovery.Initialize";
    /// Controller → host: start discovery. Payload: `DiscoveryCriteria`.
    pub const START_DISCOVERY: &str = "TestDiscovery.Start";
    /// Host → controller: a batch of discovered tests.
    pub const TEST_CASES_FOUND: &str = "TestDiscovery.TestFound";
    /// Host → controller: discovery finished.
    pub const DISCOVERY_COMPLETE: &str = "TestDiscovery.Completed";
    /// Controller → host: cancel the running discovery.
    pub const CANCEL_DISCOVERY: &str = "TestDiscovery.Cancel";

    /// Controller → host: load execution extensions. Payload: extension paths.
    pub const EXECUTION_INITIALIZE: &str = "TestExecution.Initialize";
    /// Controller → host: run every test in a set of sources.
    pub const START_TEST_EXECUTION_WITH_SOURCES: &str = "TestExecution.StartWithSources";
    /// Controller → host: run an explicit list of test cases.
    pub const START_TEST_EXECUTION_WITH_TESTS: &str = "TestExecution.StartWithTests";
    /// Controller → host: cancel the running test run.
    pub const CANCEL_TEST_RUN: &str = "TestExecution.Cancel";
    /// Controller → host: abort the running test run.
    pub const ABORT_TEST_RUN: &str = "TestExecution.Abort";
    /// Host → controller: incremental results and statistics.
    pub const TEST_RUN_STATS_CHANGE: &str = "TestExecution.StatsChange";
    /// Host → controller: the test run finished.
    pub const EXECUTION_COMPLETE: &str = "TestExecution.Completed";

    /// Host → controller: start a process with a debugger attached.
    pub const LAUNCH_ADAPTER_PROCESS_WITH_DEBUGGER_ATTACHED: &str =
        "TestExecution.LaunchAdapterProcessWithDebuggerAttached";
    /// Controller → host: reply carrying the launched process id.
    pub const LAUNCH_ADAPTER_PROCESS_WITH_DEBUGGER_ATTACHED_CALLBACK: &str =
        "TestExecution.LaunchAdapterProcessWithDebuggerAttachedCallback";
    /// Host → controller: attach a debugger to a running process.
    pub const ATTACH_DEBUGGER: &str = "TestExecution.AttachDebugger";
    /// Controller → host: reply saying whether the debugger attached.
    pub const ATTACH_DEBUGGER_CALLBACK: &str = "TestExecution.AttachDebuggerCallback";

    /// Host → controller: a log message.
    pub const TEST_MESSAGE: &str = "TestSession.Message";
    /// Controller → host: the session is over; shut down.
    pub const SESSION_END: &str = "TestSession.Terminate";
    /// Controller → host: reserved, ignored.
    pub const SESSION_ABORT: &str = "TestSession.Abort";
}

/// One protocol message: a type tag, the protocol version it was encoded
/// with, and an optional payload.
///
/// Immutable once constructed. Typed payloads are converted into a JSON
/// value at construction time using the payload style of `version`, so the
/// codec only ever deals with the envelope.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    message_type: String,
    version: u32,
    payload: Option<Value>,
}

impl Message {
    /// A message with no payload.
    pub fn new(message_type: impl Into<String>, version: u32) -> Self {
        Self {
            message_type: message_type.into(),
            version,
            payload: None,
        }
    }

    /// A message carrying `payload`, encoded for `version`.
    pub fn with_payload<T: Serialize + ?Sized>(
        message_type: impl Into<String>,
        payload: &T,
        version: u32,
    ) -> Result<Self> {
        Ok(Self {
            message_type: message_type.into(),
            version,
            payload: Some(to_payload_value(payload, version)?),
        })
    }

    /// Assemble a message from already-encoded parts (used by codecs).
    pub fn from_parts(message_type: impl Into<String>, version: u32, payload: Option<Value>) -> Self {
        Self {
            message_type: message_type.into(),
            version,
            payload,
        }
    }

    /// The wire tag.
    pub fn message_type(&self) -> &str {
        &self.message_type
    }

    /// The protocol version the payload was encoded with.
    pub fn version(&self) -> u32 {
        self.version
    }

    /// The raw payload, if any.
    pub fn payload(&self) -> Option<&Value> {
        self.payload.as_ref()
    }

    /// Decode the payload into `T`.
    ///
    /// A missing or `null` payload is a [`ProtocolError::MissingPayload`].
    pub fn payload_as<T: DeserializeOwned>(&self) -> Result<T> {
        match &self.payload {
            None | Some(Value::Null) => {
                Err(ProtocolError::MissingPayload(self.message_type.clone()))
            }
            Some(value) => Ok(T::deserialize(value)?),
        }
    }
}
