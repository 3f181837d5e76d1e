//! Bounded FIFO queue with a single consumer thread.
//!
//! The dispatch thread hands long-running work to the queue and goes back
//! to reading messages, so cancel, abort and session end are never stuck
//! behind a discovery or test run.

use std::collections::VecDeque;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};

use tracing::{debug, warn, Span};

/// Error returned by a job.
pub type JobError = Box<dyn std::error::Error + Send + Sync>;

/// A unit of deferred work.
pub type Job = Box<dyn FnOnce() -> Result<(), JobError> + Send>;

/// Receives every failure the queue observes. Called without the queue lock
/// held, on the enqueuing thread for overflows and on the consumer thread
/// for job failures.
pub type ErrorCallback = Arc<dyn Fn(JobQueueError) + Send + Sync>;

#[derive(Debug, thiserror::Error)]
pub enum JobQueueError {
    /// The job was rejected because the queue is at a limit.
    #[error(
        "job queue '{queue}' full: {jobs} jobs / {bytes} bytes queued, limits {max_jobs} / {max_bytes}"
    )]
    Overflow {
        queue: String,
        jobs: usize,
        bytes: usize,
        max_jobs: usize,
        max_bytes: usize,
    },

    /// A job returned an error.
    #[error("job failed: {0}")]
    JobFailed(#[source] JobError),

    /// A job panicked; the consumer thread survived it.
    #[error("job panicked: {0}")]
    JobPanicked(String),

    /// The job was rejected because the queue is closed.
    #[error("job queue '{0}' is closed")]
    Closed(String),
}

/// Queue limits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobQueueConfig {
    /// Name used for the consumer thread and in diagnostics.
    pub name: String,
    /// Maximum number of queued (not yet started) jobs.
    pub max_jobs: usize,
    /// Maximum sum of the size estimates of queued jobs.
    pub max_bytes: usize,
}

impl Default for JobQueueConfig {
    fn default() -> Self {
        Self {
            name: "hostwire-jobs".to_string(),
            max_jobs: 500,
            max_bytes: 25_000_000,
        }
    }
}

struct Queued {
    job: Job,
    size: usize,
}

#[derive(Default)]
struct QueueState {
    jobs: VecDeque<Queued>,
    bytes: usize,
    pauses: usize,
    running: bool,
    closed: bool,
}

struct Shared {
    config: JobQueueConfig,
    state: Mutex<QueueState>,
    changed: Condvar,
    on_error: ErrorCallback,
    span: Span,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn report(&self, error: JobQueueError) {
        (self.on_error)(error);
    }

    fn resume(&self) {
        let mut state = self.lock();
        state.pauses = state.pauses.saturating_sub(1);
        if state.pauses == 0 {
            self.changed.notify_all();
        }
    }
}

/// Single-consumer job queue. Jobs run one at a time, in enqueue order.
pub struct JobQueue {
    shared: Arc<Shared>,
    consumer: Mutex<Option<JoinHandle<()>>>,
}

impl JobQueue {
    /// Create the queue and start its consumer thread.
    ///
    /// Falls back to running without a consumer (every enqueue reports
    /// `Closed`) if the thread cannot be spawned.
    pub fn new(config: JobQueueConfig, on_error: ErrorCallback, span: Span) -> Self {
        let shared = Arc::new(Shared {
            config,
            state: Mutex::new(QueueState::default()),
            changed: Condvar::new(),
            on_error,
            span,
        });

        let consumer_shared = Arc::clone(&shared);
        let consumer = thread::Builder::new()
            .name(shared.config.name.clone())
            .spawn(move || run_consumer(&consumer_shared));
        let consumer = match consumer {
            Ok(handle) => Some(handle),
            Err(err) => {
                warn!(parent: &shared.span, error = %err, "failed to spawn job queue consumer");
                shared.lock().closed = true;
                None
            }
        };

        Self {
            shared,
            consumer: Mutex::new(consumer),
        }
    }

    /// Queue `job`, whose footprint is estimated at `size` bytes.
    ///
    /// Never blocks. Returns `false` and reports through the error callback
    /// when the job is rejected.
    pub fn enqueue<F>(&self, size: usize, job: F) -> bool
    where
        F: FnOnce() -> Result<(), JobError> + Send + 'static,
    {
        let rejection = {
            let mut state = self.shared.lock();
            let config = &self.shared.config;
            if state.closed {
                Some(JobQueueError::Closed(config.name.clone()))
            } else if state.jobs.len() >= config.max_jobs
                || state.bytes.saturating_add(size) > config.max_bytes
            {
                Some(JobQueueError::Overflow {
                    queue: config.name.clone(),
                    jobs: state.jobs.len(),
                    bytes: state.bytes,
                    max_jobs: config.max_jobs,
                    max_bytes: config.max_bytes,
                })
            } else {
                state.jobs.push_back(Queued {
                    job: Box::new(job),
                    size,
                });
                state.bytes += size;
                self.shared.changed.notify_all();
                None
            }
        };

        match rejection {
            Some(error) => {
                warn!(parent: &self.shared.span, %error, "job rejected");
                self.shared.report(error);
                false
            }
            None => true,
        }
    }

    /// Stop starting new jobs until the returned guard is dropped. The job
    /// already running is not interrupted. Pauses nest.
    pub fn pause(&self) -> PauseGuard {
        self.shared.lock().pauses += 1;
        debug!(parent: &self.shared.span, "job queue paused");
        PauseGuard {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Undo one [`pause`](Self::pause) whose guard was leaked with `mem::forget`
    /// or handed off elsewhere.
    pub fn resume(&self) {
        self.shared.resume();
    }

    /// Block until every job queued so far has finished. Blocks while the
    /// queue is paused with work pending.
    pub fn flush(&self) {
        let state = self.shared.lock();
        let _state = self
            .shared
            .changed
            .wait_while(state, |s| !s.closed && (s.running || !s.jobs.is_empty()))
            .unwrap_or_else(PoisonError::into_inner);
    }

    /// Number of jobs waiting to start.
    pub fn len(&self) -> usize {
        self.shared.lock().jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_paused(&self) -> bool {
        self.shared.lock().pauses > 0
    }

    /// Reject further jobs and discard the ones not yet started. The running
    /// job, if any, finishes normally.
    pub fn close(&self) {
        let discarded = {
            let mut state = self.shared.lock();
            if state.closed {
                return;
            }
            state.closed = true;
            state.bytes = 0;
            self.shared.changed.notify_all();
            std::mem::take(&mut state.jobs)
        };
        debug!(parent: &self.shared.span, discarded = discarded.len(), "job queue closed");
        drop(discarded);
    }
}

impl Drop for JobQueue {
    fn drop(&mut self) {
        self.close();
        let handle = self
            .consumer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(handle) = handle else {
            return;
        };
        // The last owner of the queue may be a job running on the consumer.
        if handle.thread().id() == thread::current().id() {
            return;
        }
        if handle.join().is_err() {
            warn!(parent: &self.shared.span, "job queue consumer panicked");
        }
    }
}

/// Resumes the queue when dropped.
#[must_use = "the queue resumes as soon as the guard is dropped"]
pub struct PauseGuard {
    shared: Arc<Shared>,
}

impl Drop for PauseGuard {
    fn drop(&mut self) {
        self.shared.resume();
        debug!(parent: &self.shared.span, "job queue resumed");
    }
}

fn run_consumer(shared: &Shared) {
    loop {
        let next = {
            let state = shared.lock();
            let mut state = shared
                .changed
                .wait_while(state, |s| !s.closed && (s.pauses > 0 || s.jobs.is_empty()))
                .unwrap_or_else(PoisonError::into_inner);
            if state.closed {
                break;
            }
            let next = state.jobs.pop_front();
            if let Some(queued) = &next {
                state.bytes = state.bytes.saturating_sub(queued.size);
                state.running = true;
            }
            next
        };
        let Some(Queued { job, .. }) = next else {
            continue;
        };

        let outcome = shared
            .span
            .in_scope(|| std::panic::catch_unwind(AssertUnwindSafe(job)));
        match outcome {
            Ok(Ok(())) => {}
            Ok(Err(err)) => shared.report(JobQueueError::JobFailed(err)),
            Err(panic) => shared.report(JobQueueError::JobPanicked(panic_message(panic.as_ref()))),
        }

        shared.lock().running = false;
        shared.changed.notify_all();
    }
    debug!(parent: &shared.span, "job queue consumer exiting");
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
