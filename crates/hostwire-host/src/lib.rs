//! Test host side of a hostwire session.
//!
//! [`TestRequestHandler`] owns the controller connection, negotiates the
//! protocol version, and routes requests to the discovery and execution
//! managers supplied through a [`TestHostManagerFactory`]. Long-running
//! requests run one at a time on a bounded [`JobQueue`].

mod ack;
pub mod config;
pub mod data_collection;
pub mod error;
pub mod factory;
pub mod handler;
pub mod job_queue;
mod sinks;

pub use config::{HostConfig, PathMapping};
pub use data_collection::is_data_collection_enabled;
pub use error::{HostError, Result};
pub use factory::{
    DiscoveryEventsHandler, DiscoveryManager, ExecutionEventsHandler, ExecutionManager,
    ManagerError, ManagerResult, TestCaseEventsHandler, TestHostManagerFactory,
};
pub use handler::{TestRequestHandler, TestRequestHandlerBuilder};
pub use job_queue::{JobQueue, JobQueueConfig, JobQueueError, PauseGuard};
pub use sinks::TracingTestCaseEvents;
