//! Seams between the request handler and the code that actually discovers
//! and runs tests.
//!
//! The handler drives a [`TestHostManagerFactory`] and hands each manager an
//! events handler through which progress flows back to the controller.

use std::sync::Arc;

use hostwire_protocol::object_model::{
    AttachmentSet, DiscoveryCriteria, TestCase, TestMessageLevel, TestOutcome, TestProcessStartInfo,
    TestResult, TestRunChangedEventArgs, TestRunCompleteEventArgs, TestRunCriteriaWithSources,
    TestRunCriteriaWithTests,
};

use crate::error::Result;

/// Error returned by a discovery or execution manager.
pub type ManagerError = Box<dyn std::error::Error + Send + Sync>;

pub type ManagerResult<T = ()> = std::result::Result<T, ManagerError>;

/// Provides the managers a session works with.
pub trait TestHostManagerFactory: Send + Sync {
    fn discovery_manager(&self) -> Arc<dyn DiscoveryManager>;
    fn execution_manager(&self) -> Arc<dyn ExecutionManager>;
}

pub trait DiscoveryManager: Send + Sync {
    /// Load the extensions found under `extension_paths`.
    fn initialize(
        &self,
        extension_paths: Vec<String>,
        events: Arc<dyn DiscoveryEventsHandler>,
    ) -> ManagerResult;

    /// Discover tests; report them through `events` and finish with
    /// `handle_discovery_complete`.
    fn discover_tests(
        &self,
        criteria: DiscoveryCriteria,
        events: Arc<dyn DiscoveryEventsHandler>,
    ) -> ManagerResult;

    /// Stop the running discovery. The handler reports the aborted
    /// completion itself.
    fn abort(&self) -> ManagerResult;
}

pub trait ExecutionManager: Send + Sync {
    /// Load the extensions found under `extension_paths`.
    fn initialize(
        &self,
        extension_paths: Vec<String>,
        events: Arc<dyn ExecutionEventsHandler>,
    ) -> ManagerResult;

    /// Run every test in the criteria's sources and finish with
    /// `handle_test_run_complete`. `test_case_events` is only supplied when
    /// the run settings enable data collection.
    fn start_test_run_with_sources(
        &self,
        criteria: TestRunCriteriaWithSources,
        events: Arc<dyn ExecutionEventsHandler>,
        test_case_events: Option<Arc<dyn TestCaseEventsHandler>>,
    ) -> ManagerResult;

    /// Run exactly the given tests.
    fn start_test_run_with_tests(
        &self,
        criteria: TestRunCriteriaWithTests,
        events: Arc<dyn ExecutionEventsHandler>,
        test_case_events: Option<Arc<dyn TestCaseEventsHandler>>,
    ) -> ManagerResult;

    /// Ask the running test run to stop gracefully; it still reports its own
    /// completion.
    fn cancel(&self) -> ManagerResult;

    /// Stop the running test run at once. The handler reports the aborted
    /// completion itself.
    fn abort(&self) -> ManagerResult;
}

/// Discovery progress, forwarded to the controller.
pub trait DiscoveryEventsHandler: Send + Sync {
    fn handle_discovered_tests(&self, tests: Vec<TestCase>) -> Result<()>;

    /// `total_tests` is `-1` for an aborted discovery.
    fn handle_discovery_complete(
        &self,
        total_tests: i64,
        last_chunk: Vec<TestCase>,
        is_aborted: bool,
    ) -> Result<()>;

    fn handle_log_message(&self, level: TestMessageLevel, message: &str) -> Result<()>;
}

/// Execution progress, forwarded to the controller.
pub trait ExecutionEventsHandler: Send + Sync {
    fn handle_test_run_stats_change(&self, args: TestRunChangedEventArgs) -> Result<()>;

    fn handle_test_run_complete(
        &self,
        complete: TestRunCompleteEventArgs,
        last_chunk: Option<TestRunChangedEventArgs>,
        run_attachments: Vec<AttachmentSet>,
        executor_uris: Vec<String>,
    ) -> Result<()>;

    fn handle_log_message(&self, level: TestMessageLevel, message: &str) -> Result<()>;

    /// Ask the controller to start `info` under a debugger; returns its pid.
    fn launch_process_with_debugger_attached(&self, info: TestProcessStartInfo) -> Result<i32>;

    /// Ask the controller to attach a debugger to `process_id`.
    fn attach_debugger_to_process(
        &self,
        process_id: i32,
        target_framework: Option<String>,
    ) -> Result<bool>;
}

/// Per-test lifecycle notifications consumed by data collectors.
pub trait TestCaseEventsHandler: Send + Sync {
    fn send_test_case_start(&self, test: &TestCase);
    fn send_test_case_end(&self, test: &TestCase, outcome: TestOutcome);
    fn send_test_result(&self, result: &TestResult);
}
