//! The test host side of the protocol: one handler per controller session.
//!
//! The channel's reader thread is the dispatch thread. Version checks,
//! cancellation, abort and session end are handled there directly; every
//! initialize, discovery and run request becomes a job on the
//! [`JobQueue`], whose consumer thread calls into the managers and sends
//! their progress back.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, OnceLock, PoisonError, Weak};
use std::time::Duration;

use hostwire_channel::{
    create_endpoint, ChannelError, CommunicationChannel, CommunicationEndpoint, ConnectionInfo,
    MessageHandler,
};
use hostwire_protocol::object_model::{
    AttachmentSet, DiscoveryCompletePayload, EditorAttachDebuggerAckPayload, TestCase,
    TestMessageLevel, TestMessagePayload, TestProcessAttachDebuggerPayload, TestProcessStartInfo,
    TestRunChangedEventArgs, TestRunCompleteEventArgs, TestRunCompletePayload,
};
use hostwire_protocol::{
    message_type, negotiate_version, DataSerializer, JsonDataSerializer, Message, MessageKind,
    NullPathConverter, PathConversionDirection, PathConverter, INITIAL_PROTOCOL_VERSION,
    MINIMUM_VERSION_WITH_DEBUG_SUPPORT, VERSION_WITH_ATTACH_DEBUGGER_PAYLOAD,
};
use serde::Serialize;
use tracing::{debug, error, field, info, info_span, warn, Span};

use crate::ack::AckRegistry;
use crate::config::HostConfig;
use crate::data_collection::is_data_collection_enabled;
use crate::error::{HostError, Result};
use crate::factory::{ManagerResult, TestCaseEventsHandler, TestHostManagerFactory};
use crate::job_queue::{ErrorCallback, JobQueue, JobQueueError};
use crate::sinks::{DiscoveryEventsSink, ExecutionEventsSink, TracingTestCaseEvents};

/// The long-running operation a session is currently serving.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Operation {
    Discovery,
    Execution,
}

/// What a queued job does for its operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Request {
    Initialize(Operation),
    Start(Operation),
}

/// Readiness signals, each gating a different waiter.
#[derive(Default)]
struct SessionState {
    connected: bool,
    factory: Option<Arc<dyn TestHostManagerFactory>>,
    completed: bool,
}

/// Serves one controller session.
///
/// Lifecycle: [`initialize_communication`](Self::initialize_communication),
/// [`wait_for_request_sender_connection`](Self::wait_for_request_sender_connection),
/// then [`process_requests`](Self::process_requests), which blocks until
/// the controller ends the session. Dropping the handler closes it.
pub struct TestRequestHandler {
    inner: Arc<HandlerInner>,
}

/// Builder for a [`TestRequestHandler`] with non-default collaborators.
pub struct TestRequestHandlerBuilder {
    config: HostConfig,
    serializer: Arc<dyn DataSerializer>,
    test_case_events: Arc<dyn TestCaseEventsHandler>,
    span: Option<Span>,
}

impl TestRequestHandlerBuilder {
    /// Codec used for every message of the session.
    pub fn serializer(mut self, serializer: Arc<dyn DataSerializer>) -> Self {
        self.serializer = serializer;
        self
    }

    /// Receiver of per-test events for runs that enable data collection.
    pub fn test_case_events(mut self, events: Arc<dyn TestCaseEventsHandler>) -> Self {
        self.test_case_events = events;
        self
    }

    /// Span every handler and job queue event is recorded under. The
    /// default span records the endpoint address once it is known.
    pub fn span(mut self, span: Span) -> Self {
        self.span = Some(span);
        self
    }

    pub fn build(self) -> TestRequestHandler {
        let span = self
            .span
            .unwrap_or_else(|| info_span!("test_request_handler", endpoint = field::Empty));
        TestRequestHandler {
            inner: HandlerInner::new(self.config, self.serializer, self.test_case_events, span),
        }
    }
}

impl TestRequestHandler {
    /// A handler with the JSON codec and default collaborators.
    pub fn new(config: HostConfig) -> Self {
        Self::builder(config).build()
    }

    pub fn builder(config: HostConfig) -> TestRequestHandlerBuilder {
        TestRequestHandlerBuilder {
            config,
            serializer: Arc::new(JsonDataSerializer),
            test_case_events: Arc::new(TracingTestCaseEvents),
            span: None,
        }
    }

    /// Select the path converter and start listening for (host role) or
    /// connecting to (client role) the controller.
    ///
    /// Returns the endpoint address in use, which for a listener includes
    /// any port picked by the system.
    pub fn initialize_communication(&self, connection: &ConnectionInfo) -> Result<String> {
        self.inner.initialize_communication(connection)
    }

    /// Wait for the controller connection. Returns `false` on timeout or
    /// when the session closed first.
    pub fn wait_for_request_sender_connection(&self, timeout: Duration) -> bool {
        self.inner.wait_for_connection(timeout)
    }

    /// Serve requests with `factory` until the session completes.
    pub fn process_requests(&self, factory: Arc<dyn TestHostManagerFactory>) {
        self.inner.process_requests(factory);
    }

    /// The version negotiated with the controller, or
    /// [`INITIAL_PROTOCOL_VERSION`] before the handshake.
    pub fn protocol_version(&self) -> u32 {
        self.inner.protocol_version()
    }

    pub fn send_test_cases(&self, tests: Vec<TestCase>) -> Result<()> {
        self.inner.send_test_cases(tests)
    }

    pub fn send_test_run_statistics(&self, args: TestRunChangedEventArgs) -> Result<()> {
        self.inner.send_test_run_statistics(args)
    }

    pub fn send_log(&self, level: TestMessageLevel, message: &str) -> Result<()> {
        self.inner.send_log(level, message)
    }

    /// Report the end of a test run. An error captured earlier while
    /// handling a message is attached when `complete` carries none.
    pub fn send_execution_complete(
        &self,
        complete: TestRunCompleteEventArgs,
        last_chunk: Option<TestRunChangedEventArgs>,
        run_attachments: Vec<AttachmentSet>,
        executor_uris: Vec<String>,
    ) -> Result<()> {
        self.inner
            .send_execution_complete(complete, last_chunk, run_attachments, executor_uris)
    }

    pub fn discovery_complete(
        &self,
        total_tests: i64,
        last_chunk: Vec<TestCase>,
        is_aborted: bool,
    ) -> Result<()> {
        self.inner
            .discovery_complete(total_tests, last_chunk, is_aborted)
    }

    /// Ask the controller to launch `info` under a debugger and wait for the
    /// process id. Fails with [`HostError::AckTimeout`] after the configured
    /// ack timeout.
    pub fn launch_process_with_debugger_attached(&self, info: TestProcessStartInfo) -> Result<i32> {
        self.inner.launch_process_with_debugger_attached(info)
    }

    /// Ask the controller to attach a debugger to `process_id`. Returns
    /// `false` without asking when the negotiated version predates debugger
    /// support.
    pub fn attach_debugger_to_process(
        &self,
        process_id: i32,
        target_framework: Option<String>,
    ) -> Result<bool> {
        self.inner
            .attach_debugger_to_process(process_id, target_framework)
    }

    /// End the session and release the connection. Idempotent.
    pub fn close(&self) {
        self.inner.close();
    }
}

impl Drop for TestRequestHandler {
    fn drop(&mut self) {
        self.inner.close();
    }
}

pub(crate) struct HandlerInner {
    config: HostConfig,
    serializer: Arc<dyn DataSerializer>,
    test_case_events: Arc<dyn TestCaseEventsHandler>,
    path_converter: OnceLock<Arc<dyn PathConverter>>,
    endpoint: Mutex<Option<Box<dyn CommunicationEndpoint>>>,
    channel: Mutex<Option<Arc<dyn CommunicationChannel>>>,
    protocol_version: AtomicU32,
    version_negotiated: AtomicBool,
    session: Mutex<SessionState>,
    session_changed: Condvar,
    active: Mutex<Option<Operation>>,
    /// Set by each job as it starts; job failures are reported right after
    /// the job on the consumer thread, so this names the failed request.
    current_request: Mutex<Option<Request>>,
    unrecoverable_error: Mutex<Option<String>>,
    job_queue: JobQueue,
    launch_acks: AckRegistry<i32>,
    attach_acks: AckRegistry<EditorAttachDebuggerAckPayload>,
    disposed: AtomicBool,
    span: Span,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl HandlerInner {
    fn new(
        config: HostConfig,
        serializer: Arc<dyn DataSerializer>,
        test_case_events: Arc<dyn TestCaseEventsHandler>,
        span: Span,
    ) -> Arc<Self> {
        Arc::new_cyclic(|weak: &Weak<Self>| {
            let handler = weak.clone();
            let on_error: ErrorCallback = Arc::new(move |err| match handler.upgrade() {
                Some(handler) => handler.on_job_error(err),
                None => debug!(error = %err, "job error after handler was dropped"),
            });
            let queue_span = info_span!(parent: &span, "job_queue");

            Self {
                job_queue: JobQueue::new(config.job_queue.clone(), on_error, queue_span),
                config,
                serializer,
                test_case_events,
                path_converter: OnceLock::new(),
                endpoint: Mutex::new(None),
                channel: Mutex::new(None),
                protocol_version: AtomicU32::new(INITIAL_PROTOCOL_VERSION),
                version_negotiated: AtomicBool::new(false),
                session: Mutex::new(SessionState::default()),
                session_changed: Condvar::new(),
                active: Mutex::new(None),
                current_request: Mutex::new(None),
                unrecoverable_error: Mutex::new(None),
                launch_acks: AckRegistry::new(
                    message_type::LAUNCH_ADAPTER_PROCESS_WITH_DEBUGGER_ATTACHED_CALLBACK,
                ),
                attach_acks: AckRegistry::new(message_type::ATTACH_DEBUGGER_CALLBACK),
                disposed: AtomicBool::new(false),
                span,
            }
        })
    }

    // Session lifecycle.

    fn initialize_communication(self: &Arc<Self>, connection: &ConnectionInfo) -> Result<String> {
        let _enter = self.span.enter();
        let mut endpoint_slot = lock(&self.endpoint);
        if endpoint_slot.is_some() {
            return Err(HostError::AlreadyInitialized);
        }

        let converter = self.config.path_converter()?;
        if self.config.path_mapping.is_some() {
            info!("remapping paths between test host and controller");
        }
        let _ = self.path_converter.set(converter);

        let endpoint = create_endpoint(connection.role, self.config.endpoint.clone());
        let handler = Arc::downgrade(self);
        let address = endpoint.start(
            &connection.endpoint,
            Box::new(move |result| {
                if let Some(handler) = handler.upgrade() {
                    handler.on_connected(result);
                }
            }),
        )?;

        self.span.record("endpoint", address.as_str());
        info!(role = ?connection.role, %address, "communication initialized");
        *endpoint_slot = Some(endpoint);
        Ok(address)
    }

    fn on_connected(self: &Arc<Self>, result: hostwire_channel::Result<Arc<dyn CommunicationChannel>>) {
        let _enter = self.span.enter();
        let channel = match result {
            Ok(channel) => channel,
            Err(err) => {
                error!(error = %err, "connection to controller failed");
                return;
            }
        };
        if self.is_disposed() {
            channel.close();
            return;
        }

        *lock(&self.channel) = Some(Arc::clone(&channel));
        let dispatcher = Dispatcher {
            handler: Arc::downgrade(self),
        };
        if let Err(err) = channel.set_message_handler(Box::new(dispatcher)) {
            error!(error = %err, "cannot receive from controller");
            return;
        }

        lock(&self.session).connected = true;
        self.session_changed.notify_all();
        info!("controller connected");
    }

    fn wait_for_connection(&self, timeout: Duration) -> bool {
        let state = lock(&self.session);
        let (state, _) = self
            .session_changed
            .wait_timeout_while(state, timeout, |s| !s.connected && !s.completed)
            .unwrap_or_else(PoisonError::into_inner);
        state.connected
    }

    fn process_requests(&self, factory: Arc<dyn TestHostManagerFactory>) {
        let _enter = self.span.enter();
        lock(&self.session).factory = Some(factory);
        self.session_changed.notify_all();
        info!("serving requests");

        let state = lock(&self.session);
        let _state = self
            .session_changed
            .wait_while(state, |s| !s.completed)
            .unwrap_or_else(PoisonError::into_inner);
        info!("test session completed");
    }

    /// Block until `process_requests` supplies the factory.
    fn wait_for_factory(&self) -> Result<Arc<dyn TestHostManagerFactory>> {
        let state = lock(&self.session);
        let state = self
            .session_changed
            .wait_while(state, |s| s.factory.is_none() && !s.completed)
            .unwrap_or_else(PoisonError::into_inner);
        state.factory.clone().ok_or(HostError::SessionClosed)
    }

    fn mark_completed(&self) {
        lock(&self.session).completed = true;
        self.session_changed.notify_all();
    }

    fn complete_session(&self) {
        self.mark_completed();
        self.close();
    }

    fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    fn close(&self) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        let _enter = self.span.enter();
        debug!(
            pending_acks = self.launch_acks.outstanding() + self.attach_acks.outstanding(),
            "closing test request handler"
        );

        self.mark_completed();
        self.launch_acks.cancel_all();
        self.attach_acks.cancel_all();
        self.job_queue.close();

        let endpoint = lock(&self.endpoint).take();
        if let Some(endpoint) = endpoint {
            endpoint.stop();
        }
        let channel = lock(&self.channel).take();
        if let Some(channel) = channel {
            channel.close();
        }
    }

    fn protocol_version(&self) -> u32 {
        self.protocol_version.load(Ordering::SeqCst)
    }

    fn converter(&self) -> &dyn PathConverter {
        match self.path_converter.get() {
            Some(converter) => converter.as_ref(),
            None => &NullPathConverter,
        }
    }

    // Inbound.

    fn on_message_received(self: &Arc<Self>, raw: String) {
        if self.is_disposed() {
            return;
        }
        let _enter = self.span.enter();
        let size = raw.len();

        let result = self
            .serializer
            .deserialize_message(&raw)
            .map_err(HostError::from)
            .and_then(|message| {
                debug!(
                    message_type = message.message_type(),
                    version = message.version(),
                    "received message"
                );
                let kind = MessageKind::decode(&message)?;
                if kind.is_control() {
                    // Handled here, ahead of any queued work.
                    debug!(queued_jobs = self.job_queue.len(), "control message");
                }
                self.dispatch(kind, size)
            });

        if let Err(err) = result {
            error!(error = %err, "failed to process message; aborting");
            self.set_unrecoverable_error(err.to_string());
            self.handle_abort();
        }
    }

    fn dispatch(self: &Arc<Self>, kind: MessageKind, size: usize) -> Result<()> {
        match kind {
            MessageKind::VersionCheck(sender_version) => self.handle_version_check(sender_version),

            MessageKind::DiscoveryInitialize(paths) => {
                let factory = self.wait_for_factory()?;
                let paths = self
                    .converter()
                    .update_paths(paths, PathConversionDirection::Receive);
                let events = DiscoveryEventsSink::new(self);
                self.enqueue(size, Request::Initialize(Operation::Discovery), move || {
                    factory.discovery_manager().initialize(paths, events)
                });
                Ok(())
            }

            MessageKind::StartDiscovery(criteria) => {
                let factory = self.wait_for_factory()?;
                let criteria = self
                    .converter()
                    .update_discovery_criteria(criteria, PathConversionDirection::Receive);
                let events = DiscoveryEventsSink::new(self);
                self.set_active(Operation::Discovery);
                self.enqueue(size, Request::Start(Operation::Discovery), move || {
                    factory.discovery_manager().discover_tests(criteria, events)
                });
                Ok(())
            }

            MessageKind::ExecutionInitialize(paths) => {
                let factory = self.wait_for_factory()?;
                let paths = self
                    .converter()
                    .update_paths(paths, PathConversionDirection::Receive);
                let events = ExecutionEventsSink::new(self);
                self.enqueue(size, Request::Initialize(Operation::Execution), move || {
                    factory.execution_manager().initialize(paths, events)
                });
                Ok(())
            }

            MessageKind::StartTestExecutionWithSources(criteria) => {
                let factory = self.wait_for_factory()?;
                let criteria = self
                    .converter()
                    .update_run_criteria_with_sources(criteria, PathConversionDirection::Receive);
                let test_case_events = self.test_case_events_for(criteria.run_settings.as_deref());
                let events = ExecutionEventsSink::new(self);
                self.set_active(Operation::Execution);
                self.enqueue(size, Request::Start(Operation::Execution), move || {
                    factory.execution_manager().start_test_run_with_sources(
                        criteria,
                        events,
                        test_case_events,
                    )
                });
                Ok(())
            }

            MessageKind::StartTestExecutionWithTests(criteria) => {
                let factory = self.wait_for_factory()?;
                let criteria = self
                    .converter()
                    .update_run_criteria_with_tests(criteria, PathConversionDirection::Receive);
                let test_case_events = self.test_case_events_for(criteria.run_settings.as_deref());
                let events = ExecutionEventsSink::new(self);
                self.set_active(Operation::Execution);
                self.enqueue(size, Request::Start(Operation::Execution), move || {
                    factory.execution_manager().start_test_run_with_tests(
                        criteria,
                        events,
                        test_case_events,
                    )
                });
                Ok(())
            }

            MessageKind::CancelTestRun => {
                let _pause = self.job_queue.pause();
                let factory = self.wait_for_factory()?;
                info!("cancelling test run");
                factory.execution_manager().cancel().map_err(HostError::Manager)
            }

            MessageKind::CancelDiscovery => {
                let _pause = self.job_queue.pause();
                let factory = self.wait_for_factory()?;
                info!("cancelling discovery");
                factory.discovery_manager().abort().map_err(HostError::Manager)
            }

            MessageKind::AbortTestRun => {
                info!("abort requested by controller");
                self.handle_abort();
                Ok(())
            }

            MessageKind::SessionEnd => {
                info!("session end requested by controller");
                self.complete_session();
                Ok(())
            }

            MessageKind::SessionAbort => {
                debug!("session abort is reserved; ignored");
                Ok(())
            }

            MessageKind::LaunchAdapterProcessWithDebuggerAttachedCallback(process_id) => {
                if !self.launch_acks.resolve(process_id) {
                    warn!(process_id, "launch reply without a pending request");
                }
                Ok(())
            }

            MessageKind::AttachDebuggerCallback(ack) => {
                if !self.attach_acks.resolve(ack) {
                    warn!("attach reply without a pending request");
                }
                Ok(())
            }

            MessageKind::Unknown(message_type) => {
                warn!(%message_type, "ignoring unknown message type");
                Ok(())
            }
        }
    }

    fn handle_version_check(&self, sender_version: u32) -> Result<()> {
        if self.version_negotiated.swap(true, Ordering::SeqCst) {
            let current = self.protocol_version();
            warn!(sender_version, current, "repeated version check; keeping negotiated version");
            return self.send_message(message_type::VERSION_CHECK, &current);
        }

        let negotiated = negotiate_version(
            sender_version,
            self.config.max_protocol_version,
            self.config.disable_version_3_downgrade,
        );
        self.protocol_version.store(negotiated, Ordering::SeqCst);
        info!(sender_version, negotiated, "protocol version negotiated");

        self.send_message(message_type::VERSION_CHECK, &negotiated)?;
        // Encoded with the negotiated version, so only after the reply.
        self.send_diagnostics_notice()
    }

    fn send_diagnostics_notice(&self) -> Result<()> {
        if let Some(err) = &self.config.logging_init_error {
            return self.send_log(TestMessageLevel::Warning, err);
        }
        if let Some(path) = &self.config.diagnostics_file {
            let message = format!("Logging TestHost Diagnostics in file: {}", path.display());
            return self.send_log(TestMessageLevel::Informational, &message);
        }
        Ok(())
    }

    fn test_case_events_for(&self, run_settings: Option<&str>) -> Option<Arc<dyn TestCaseEventsHandler>> {
        is_data_collection_enabled(run_settings).then(|| Arc::clone(&self.test_case_events))
    }

    fn enqueue<F>(self: &Arc<Self>, size: usize, request: Request, job: F)
    where
        F: FnOnce() -> ManagerResult + Send + 'static,
    {
        let handler = Arc::downgrade(self);
        let tagged = move || {
            if let Some(handler) = handler.upgrade() {
                *lock(&handler.current_request) = Some(request);
            }
            job()
        };
        if !self.job_queue.enqueue(size, tagged) {
            warn!(size, ?request, "request dropped by job queue");
        }
    }

    fn set_active(&self, operation: Operation) {
        *lock(&self.active) = Some(operation);
    }

    fn clear_active(&self, operation: Operation) {
        let mut active = lock(&self.active);
        if *active == Some(operation) {
            *active = None;
        }
    }

    fn set_unrecoverable_error(&self, error: String) {
        *lock(&self.unrecoverable_error) = Some(error);
    }

    fn unrecoverable_error(&self) -> Option<String> {
        lock(&self.unrecoverable_error).clone()
    }

    fn on_job_error(self: &Arc<Self>, err: JobQueueError) {
        let _enter = self.span.enter();
        match err {
            JobQueueError::JobFailed(source) => self.on_request_failed(source.to_string()),
            JobQueueError::JobPanicked(message) => self.on_request_failed(message),
            JobQueueError::Overflow { .. } | JobQueueError::Closed(_) => {
                debug!(error = %err, "job rejected");
            }
        }
    }

    /// A queued request failed: abort the operation it served. A start
    /// request whose operation already completed or was aborted is only
    /// logged, so the controller sees one completion per operation.
    fn on_request_failed(self: &Arc<Self>, cause: String) {
        let Some(request) = lock(&self.current_request).take() else {
            error!(error = %cause, "job failed outside any request");
            return;
        };
        let operation = match request {
            Request::Initialize(operation) => operation,
            Request::Start(operation) => {
                let mut active = lock(&self.active);
                if *active != Some(operation) {
                    warn!(error = %cause, ?operation, "request failed after its operation finished");
                    return;
                }
                *active = None;
                operation
            }
        };

        error!(error = %cause, ?request, "request failed; aborting");
        self.set_unrecoverable_error(cause);
        self.abort_operation(operation);
    }

    /// Controller abort or an unreadable message: stop the active discovery
    /// or test run, treating an idle session as an aborted test run.
    fn handle_abort(self: &Arc<Self>) {
        let operation = lock(&self.active).take().unwrap_or(Operation::Execution);
        self.abort_operation(operation);
    }

    /// Abort `operation` and report it aborted. If that fails too, the
    /// session is over.
    fn abort_operation(self: &Arc<Self>, operation: Operation) {
        if self.is_disposed() {
            return;
        }
        let _pause = self.job_queue.pause();
        if let Err(err) = self.abort_and_report(operation) {
            error!(error = %err, ?operation, "abort failed; ending session");
            self.complete_session();
        }
    }

    fn abort_and_report(&self, operation: Operation) -> Result<()> {
        let factory = self.wait_for_factory()?;
        match operation {
            Operation::Discovery => {
                factory.discovery_manager().abort().map_err(HostError::Manager)?;
                self.discovery_complete(-1, Vec::new(), true)
            }
            Operation::Execution => {
                factory.execution_manager().abort().map_err(HostError::Manager)?;
                self.send_execution_complete(
                    TestRunCompleteEventArgs::aborted(None),
                    None,
                    Vec::new(),
                    Vec::new(),
                )
            }
        }
    }

    fn on_peer_disconnected(self: &Arc<Self>, error: Option<ChannelError>) {
        if self.is_disposed() {
            return;
        }
        let _enter = self.span.enter();
        match &error {
            Some(err) => warn!(error = %err, "controller connection lost"),
            None => info!("controller disconnected"),
        }

        let operation = lock(&self.active).take();
        let factory = lock(&self.session).factory.clone();
        if let (Some(operation), Some(factory)) = (operation, factory) {
            let _pause = self.job_queue.pause();
            let aborted = match operation {
                Operation::Discovery => factory.discovery_manager().abort(),
                Operation::Execution => factory.execution_manager().abort(),
            };
            if let Err(err) = aborted {
                warn!(error = %err, ?operation, "abort after disconnect failed");
            }
        }
        self.complete_session();
    }

    // Outbound.

    fn send_message<T: Serialize + ?Sized>(&self, message_type: &str, payload: &T) -> Result<()> {
        let _enter = self.span.enter();
        let message = Message::with_payload(message_type, payload, self.protocol_version())?;
        let raw = self.serializer.serialize_message(&message)?;

        let channel = lock(&self.channel).clone();
        let Some(channel) = channel else {
            return Err(if self.is_disposed() {
                HostError::SessionClosed
            } else {
                HostError::NotConnected
            });
        };
        channel.send(&raw)?;
        debug!(message_type, version = message.version(), "sent message");
        Ok(())
    }

    pub(crate) fn send_test_cases(&self, tests: Vec<TestCase>) -> Result<()> {
        let tests = self
            .converter()
            .update_test_cases(tests, PathConversionDirection::Send);
        self.send_message(message_type::TEST_CASES_FOUND, &tests)
    }

    pub(crate) fn send_test_run_statistics(&self, args: TestRunChangedEventArgs) -> Result<()> {
        let args = self
            .converter()
            .update_run_changed_args(args, PathConversionDirection::Send);
        self.send_message(message_type::TEST_RUN_STATS_CHANGE, &args)
    }

    pub(crate) fn send_log(&self, level: TestMessageLevel, message: &str) -> Result<()> {
        let payload = TestMessagePayload {
            message_level: level,
            message: message.to_string(),
        };
        self.send_message(message_type::TEST_MESSAGE, &payload)
    }

    pub(crate) fn send_execution_complete(
        &self,
        mut complete: TestRunCompleteEventArgs,
        last_chunk: Option<TestRunChangedEventArgs>,
        run_attachments: Vec<AttachmentSet>,
        executor_uris: Vec<String>,
    ) -> Result<()> {
        if complete.error.is_none() {
            complete.error = self.unrecoverable_error();
        }
        self.clear_active(Operation::Execution);

        let payload = self.converter().update_run_complete_payload(
            TestRunCompletePayload {
                test_run_complete_args: Some(complete),
                last_run_tests: last_chunk,
                run_attachments,
                executor_uris,
            },
            PathConversionDirection::Send,
        );
        self.send_message(message_type::EXECUTION_COMPLETE, &payload)
    }

    pub(crate) fn discovery_complete(
        &self,
        total_tests: i64,
        last_chunk: Vec<TestCase>,
        is_aborted: bool,
    ) -> Result<()> {
        self.clear_active(Operation::Discovery);
        let payload = self.converter().update_discovery_complete_payload(
            DiscoveryCompletePayload {
                total_tests,
                last_discovered_tests: last_chunk,
                is_aborted,
            },
            PathConversionDirection::Send,
        );
        self.send_message(message_type::DISCOVERY_COMPLETE, &payload)
    }

    pub(crate) fn launch_process_with_debugger_attached(
        &self,
        info: TestProcessStartInfo,
    ) -> Result<i32> {
        let info = self
            .converter()
            .update_process_start_info(info, PathConversionDirection::Send);
        let pending = self.launch_acks.register();
        if let Err(err) =
            self.send_message(message_type::LAUNCH_ADAPTER_PROCESS_WITH_DEBUGGER_ATTACHED, &info)
        {
            self.launch_acks.discard(pending);
            return Err(err);
        }

        let process_id = self.launch_acks.wait(pending, self.config.ack_timeout)?;
        debug!(process_id, "controller launched process under debugger");
        Ok(process_id)
    }

    pub(crate) fn attach_debugger_to_process(
        &self,
        process_id: i32,
        target_framework: Option<String>,
    ) -> Result<bool> {
        let version = self.protocol_version();
        if version < MINIMUM_VERSION_WITH_DEBUG_SUPPORT {
            warn!(version, "controller cannot attach debuggers at this protocol version");
            return Ok(false);
        }

        let pending = self.attach_acks.register();
        let sent = if version >= VERSION_WITH_ATTACH_DEBUGGER_PAYLOAD {
            let payload = TestProcessAttachDebuggerPayload {
                process_id,
                target_framework,
            };
            self.send_message(message_type::ATTACH_DEBUGGER, &payload)
        } else {
            self.send_message(message_type::ATTACH_DEBUGGER, &process_id)
        };
        if let Err(err) = sent {
            self.attach_acks.discard(pending);
            return Err(err);
        }

        let ack = self.attach_acks.wait(pending, self.config.ack_timeout)?;
        if !ack.attached {
            warn!(
                process_id,
                reason = ack.error_message.as_deref().unwrap_or("unknown"),
                "controller did not attach debugger"
            );
        }
        Ok(ack.attached)
    }
}

/// Channel handler feeding inbound messages to the session.
struct Dispatcher {
    handler: Weak<HandlerInner>,
}

impl MessageHandler for Dispatcher {
    fn on_message(&mut self, message: String) {
        if let Some(handler) = self.handler.upgrade() {
            handler.on_message_received(message);
        }
    }

    fn on_disconnected(&mut self, error: Option<ChannelError>) {
        if let Some(handler) = self.handler.upgrade() {
            handler.on_peer_disconnected(error);
        }
    }
}
