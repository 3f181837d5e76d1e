use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, SyncSender};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use crate::error::{HostError, Result};

/// Correlates replies with the requests waiting for them.
///
/// Each outstanding request holds a one-shot handle. Replies carry no
/// request id on the wire, so they resolve the oldest outstanding request
/// of their type.
pub(crate) struct AckRegistry<T> {
    message_type: &'static str,
    next_id: AtomicU64,
    pending: Mutex<VecDeque<(u64, SyncSender<T>)>>,
}

/// One request waiting for its reply.
pub(crate) struct PendingAck<T> {
    id: u64,
    reply: Receiver<T>,
}

impl<T: Send> AckRegistry<T> {
    pub(crate) fn new(message_type: &'static str) -> Self {
        Self {
            message_type,
            next_id: AtomicU64::new(1),
            pending: Mutex::new(VecDeque::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<(u64, SyncSender<T>)>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register interest in the next reply. Must happen before the request
    /// is sent so a fast reply is not missed.
    pub(crate) fn register(&self) -> PendingAck<T> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::sync_channel(1);
        self.lock().push_back((id, tx));
        PendingAck { id, reply: rx }
    }

    /// Hand `reply` to the oldest waiting request. Returns `false` when
    /// nobody is waiting.
    pub(crate) fn resolve(&self, reply: T) -> bool {
        let mut reply = reply;
        loop {
            let Some((_, tx)) = self.lock().pop_front() else {
                return false;
            };
            // A waiter that already timed out has dropped its receiver.
            match tx.try_send(reply) {
                Ok(()) => return true,
                Err(mpsc::TrySendError::Disconnected(r) | mpsc::TrySendError::Full(r)) => {
                    reply = r;
                }
            }
        }
    }

    /// Block until the reply for `pending` arrives or `timeout` elapses.
    pub(crate) fn wait(&self, pending: PendingAck<T>, timeout: Duration) -> Result<T> {
        match pending.reply.recv_timeout(timeout) {
            Ok(reply) => Ok(reply),
            Err(RecvTimeoutError::Timeout) => {
                self.forget(pending.id);
                Err(HostError::AckTimeout {
                    message_type: self.message_type,
                    timeout,
                })
            }
            Err(RecvTimeoutError::Disconnected) => Err(HostError::AckCancelled(self.message_type)),
        }
    }

    /// Drop a registration whose request could not be sent.
    pub(crate) fn discard(&self, pending: PendingAck<T>) {
        self.forget(pending.id);
    }

    /// Fail every waiting request with [`HostError::AckCancelled`].
    pub(crate) fn cancel_all(&self) {
        let cancelled = std::mem::take(&mut *self.lock());
        drop(cancelled);
    }

    pub(crate) fn outstanding(&self) -> usize {
        self.lock().len()
    }

    fn forget(&self, id: u64) {
        self.lock().retain(|(pending, _)| *pending != id);
    }
}
