use serde::Deserialize;

use crate::error::Result;
use crate::message::{message_type, Message};
use crate::object_model::{
    DiscoveryCriteria, EditorAttachDebuggerAckPayload, TestRunCriteriaWithSources,
    TestRunCriteriaWithTests,
};

/// An inbound message decoded into its typed form.
///
/// Only messages a host acts on get a dedicated variant; everything else,
/// including host-to-controller tags echoed back by a confused peer, is
/// [`MessageKind::Unknown`].
#[derive(Debug, Clone, PartialEq)]
pub enum MessageKind {
    /// Sender's highest supported version.
    VersionCheck(u32),
    /// Extension paths for discovery.
    DiscoveryInitialize(Vec<String>),
    StartDiscovery(DiscoveryCriteria),
    /// Extension paths for execution.
    ExecutionInitialize(Vec<String>),
    StartTestExecutionWithSources(TestRunCriteriaWithSources),
    StartTestExecutionWithTests(TestRunCriteriaWithTests),
    CancelTestRun,
    CancelDiscovery,
    AbortTestRun,
    SessionEnd,
    SessionAbort,
    /// Id of the process the controller launched.
    LaunchAdapterProcessWithDebuggerAttachedCallback(i32),
    AttachDebuggerCallback(EditorAttachDebuggerAckPayload),
    Unknown(String),
}

#[derive(Deserialize)]
#[serde(untagged)]
enum AttachAck {
    Attached(bool),
    Payload(EditorAttachDebuggerAckPayload),
}

impl MessageKind {
    /// Classify `message` and decode its payload.
    ///
    /// Fails when a message that requires a payload has none or the payload
    /// does not match the expected shape.
    pub fn decode(message: &Message) -> Result<Self> {
        use message_type as t;

        let kind = match message.message_type() {
            t::VERSION_CHECK => Self::VersionCheck(message.payload_as()?),
            t::DISCOVERY_INITIALIZE => Self::DiscoveryInitialize(message.payload_as()?),
            t::START_DISCOVERY => Self::StartDiscovery(message.payload_as()?),
            t::EXECUTION_INITIALIZE => Self::ExecutionInitialize(message.payload_as()?),
            t::START_TEST_EXECUTION_WITH_SOURCES => {
                Self::StartTestExecutionWithSources(message.payload_as()?)
            }
            t::START_TEST_EXECUTION_WITH_TESTS => {
                Self::StartTestExecutionWithTests(message.payload_as()?)
            }
            t::CANCEL_TEST_RUN => Self::CancelTestRun,
            t::CANCEL_DISCOVERY => Self::CancelDiscovery,
            t::ABORT_TEST_RUN => Self::AbortTestRun,
            t::SESSION_END => Self::SessionEnd,
            t::SESSION_ABORT => Self::SessionAbort,
            t::LAUNCH_ADAPTER_PROCESS_WITH_DEBUGGER_ATTACHED_CALLBACK => {
                Self::LaunchAdapterProcessWithDebuggerAttachedCallback(message.payload_as()?)
            }
            t::ATTACH_DEBUGGER_CALLBACK => {
                let ack = match message.payload_as::<AttachAck>()? {
                    AttachAck::Attached(attached) => EditorAttachDebuggerAckPayload {
                        attached,
                        error_message: None,
                    },
                    AttachAck::Payload(payload) => payload,
                };
                Self::AttachDebuggerCallback(ack)
            }
            other => Self::Unknown(other.to_string()),
        };
        Ok(kind)
    }

    /// Control-plane messages are handled on the dispatch thread instead of
    /// being queued behind running work.
    pub fn is_control(&self) -> bool {
        matches!(
            self,
            Self::CancelTestRun
                | Self::CancelDiscovery
                | Self::AbortTestRun
                | Self::SessionEnd
                | Self::SessionAbort
        )
    }
}
