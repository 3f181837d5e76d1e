//! Events handlers handed to managers; they forward to the request handler.

use std::sync::{Arc, Weak};

use hostwire_protocol::object_model::{
    AttachmentSet, TestCase, TestMessageLevel, TestOutcome, TestProcessStartInfo, TestResult,
    TestRunChangedEventArgs, TestRunCompleteEventArgs,
};
use tracing::debug;

use crate::error::{HostError, Result};
use crate::factory::{DiscoveryEventsHandler, ExecutionEventsHandler, TestCaseEventsHandler};
use crate::handler::HandlerInner;

/// Managers may hold on to their events handler; a weak link keeps that
/// from pinning a closed session in memory.
fn upgrade(handler: &Weak<HandlerInner>) -> Result<Arc<HandlerInner>> {
    handler.upgrade().ok_or(HostError::SessionClosed)
}

pub(crate) struct DiscoveryEventsSink {
    handler: Weak<HandlerInner>,
}

impl DiscoveryEventsSink {
    pub(crate) fn new(handler: &Arc<HandlerInner>) -> Arc<Self> {
        Arc::new(Self {
            handler: Arc::downgrade(handler),
        })
    }
}

impl DiscoveryEventsHandler for DiscoveryEventsSink {
    fn handle_discovered_tests(&self, tests: Vec<TestCase>) -> Result<()> {
        upgrade(&self.handler)?.send_test_cases(tests)
    }

    fn handle_discovery_complete(
        &self,
        total_tests: i64,
        last_chunk: Vec<TestCase>,
        is_aborted: bool,
    ) -> Result<()> {
        upgrade(&self.handler)?.discovery_complete(total_tests, last_chunk, is_aborted)
    }

    fn handle_log_message(&self, level: TestMessageLevel, message: &str) -> Result<()> {
        upgrade(&self.handler)?.send_log(level, message)
    }
}

pub(crate) struct ExecutionEventsSink {
    handler: Weak<HandlerInner>,
}

impl ExecutionEventsSink {
    pub(crate) fn new(handler: &Arc<HandlerInner>) -> Arc<Self> {
        Arc::new(Self {
            handler: Arc::downgrade(handler),
        })
    }
}

impl ExecutionEventsHandler for ExecutionEventsSink {
    fn handle_test_run_stats_change(&self, args: TestRunChangedEventArgs) -> Result<()> {
        upgrade(&self.handler)?.send_test_run_statistics(args)
    }

    fn handle_test_run_complete(
        &self,
        complete: TestRunCompleteEventArgs,
        last_chunk: Option<TestRunChangedEventArgs>,
        run_attachments: Vec<AttachmentSet>,
        executor_uris: Vec<String>,
    ) -> Result<()> {
        upgrade(&self.handler)?.send_execution_complete(
            complete,
            last_chunk,
            run_attachments,
            executor_uris,
        )
    }

    fn handle_log_message(&self, level: TestMessageLevel, message: &str) -> Result<()> {
        upgrade(&self.handler)?.send_log(level, message)
    }

    fn launch_process_with_debugger_attached(&self, info: TestProcessStartInfo) -> Result<i32> {
        upgrade(&self.handler)?.launch_process_with_debugger_attached(info)
    }

    fn attach_debugger_to_process(
        &self,
        process_id: i32,
        target_framework: Option<String>,
    ) -> Result<bool> {
        upgrade(&self.handler)?.attach_debugger_to_process(process_id, target_framework)
    }
}

/// Test case events handler used when none is injected: records the
/// lifecycle in the trace only.
#[derive(Debug, Default)]
pub struct TracingTestCaseEvents;

impl TestCaseEventsHandler for TracingTestCaseEvents {
    fn send_test_case_start(&self, test: &TestCase) {
        debug!(test = %test.fully_qualified_name, "test case start");
    }

    fn send_test_case_end(&self, test: &TestCase, outcome: TestOutcome) {
        debug!(test = %test.fully_qualified_name, ?outcome, "test case end");
    }

    fn send_test_result(&self, result: &TestResult) {
        debug!(
            test = %result.test_case.fully_qualified_name,
            outcome = ?result.outcome,
            "test result"
        );
    }
}
