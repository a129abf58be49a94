//! Request correlation for in-flight child calls.
//!
//! The [`Correlator`] maps each pending [`MessageId`] to a single-use
//! `oneshot` slot plus a timeout timer:
//!
//! - Before a request is written to the child, [`Correlator::register`]
//!   stores the slot and arms its timer.
//! - The stdout reader calls [`Correlator::resolve_incoming`] for every
//!   decoded message; a message whose `id` matches a pending entry completes
//!   that entry.
//! - The timer calls back into the correlator and rejects its own entry only.
//! - On child exit [`Correlator::reject_all`] drains the table.
//! - A [`PendingReply`] dropped before it settles withdraws its own entry, so
//!   an abandoned caller does not keep its id reserved.
//!
//! Every transition removes the entry under the table lock before completing
//! the slot, so each request settles exactly once whichever event wins.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::task::{Context, Poll};
use std::time::Duration;

use serde_json::Value;
use tokio::sync::oneshot;
use tokio::sync::oneshot::error::RecvError;
use tokio::task::AbortHandle;
use tracing::{debug, warn};

use crate::bridge::message::{log_uncorrelated, MessageId};
use crate::{AppError, Result};

/// Receiving half of a pending request.
///
/// Resolves like a `oneshot::Receiver`: `Ok(outcome)` once the request
/// settles, `Err(RecvError)` if it was cancelled. Dropping it unsettled
/// removes the registration it was created for, and nothing else.
#[derive(Debug)]
pub struct PendingReply {
    rx: oneshot::Receiver<Result<Value>>,
    id: MessageId,
    seq: u64,
    correlator: Weak<Correlator>,
    settled: bool,
}

impl Future for PendingReply {
    type Output = std::result::Result<Result<Value>, RecvError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let outcome = Pin::new(&mut self.rx).poll(cx);
        if outcome.is_ready() {
            self.settled = true;
        }
        outcome
    }
}

impl Drop for PendingReply {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        if let Some(correlator) = self.correlator.upgrade() {
            if correlator.withdraw(&self.id, self.seq) {
                debug!(id = %self.id, "caller dropped, pending request withdrawn");
            }
        }
    }
}

/// One in-flight request.
#[derive(Debug)]
struct PendingRequest {
    /// Distinguishes successive registrations of a reused id.
    seq: u64,
    reply: oneshot::Sender<Result<Value>>,
    timer: AbortHandle,
}

impl PendingRequest {
    fn settle(self, outcome: Result<Value>) -> bool {
        self.timer.abort();
        self.reply.send(outcome).is_ok()
    }
}

#[derive(Debug, Default)]
struct CorrelatorState {
    pending: HashMap<MessageId, PendingRequest>,
    next_seq: u64,
}

/// Keyed table of pending requests awaiting a child response.
#[derive(Debug, Default)]
pub struct Correlator {
    state: Mutex<CorrelatorState>,
}

impl Correlator {
    /// Create an empty correlator.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `id` and arm a timer that rejects it with
    /// [`AppError::Timeout`] after `timeout`.
    ///
    /// Must be called before the request is written, so a fast response is
    /// never missed. Requires a tokio runtime for the timer task.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::DuplicateId`] if `id` is already pending; the
    /// existing entry is left untouched.
    pub fn register(self: &Arc<Self>, id: MessageId, timeout: Duration) -> Result<PendingReply> {
        let mut state = self.lock();

        if state.pending.contains_key(&id) {
            return Err(AppError::DuplicateId(format!(
                "request {id} is already pending"
            )));
        }

        state.next_seq += 1;
        let seq = state.next_seq;
        let (reply, rx) = oneshot::channel();

        let correlator = Arc::downgrade(self);
        let timer_id = id.clone();
        let timer = tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            if let Some(correlator) = correlator.upgrade() {
                correlator.expire(&timer_id, seq, timeout);
            }
        })
        .abort_handle();

        state.pending.insert(id.clone(), PendingRequest { seq, reply, timer });
        Ok(PendingReply {
            rx,
            id,
            seq,
            correlator: Arc::downgrade(self),
            settled: false,
        })
    }

    /// Route a decoded child message to its pending request.
    ///
    /// Returns `true` if the message completed a pending request. Messages
    /// without an id, or with an id nobody is waiting for, are dropped.
    pub fn resolve_incoming(&self, message: Value) -> bool {
        let Some(id) = MessageId::of(&message) else {
            log_uncorrelated(&message);
            return false;
        };

        let entry = self.lock().pending.remove(&id);
        match entry {
            Some(entry) => {
                let delivered = entry.settle(Ok(message));
                if !delivered {
                    debug!(%id, "caller went away before its response arrived");
                }
                delivered
            }
            None => {
                log_uncorrelated(&message);
                false
            }
        }
    }

    /// Reject every pending request with `error` and empty the table.
    ///
    /// Returns the number of requests that were pending.
    pub fn reject_all(&self, error: &AppError) -> usize {
        let drained: Vec<(MessageId, PendingRequest)> = self.lock().pending.drain().collect();
        let count = drained.len();

        for (_, entry) in drained {
            entry.settle(Err(error.clone()));
        }

        if count > 0 {
            warn!(count, %error, "rejected all pending requests");
        }
        count
    }

    /// Drop a pending request without completing it.
    ///
    /// Used when the request could not be written after registration. The
    /// caller's receiver observes a closed channel.
    pub fn cancel(&self, id: &MessageId) -> bool {
        match self.lock().pending.remove(id) {
            Some(entry) => {
                entry.timer.abort();
                true
            }
            None => false,
        }
    }

    /// Whether `id` is currently awaiting a response.
    #[must_use]
    pub fn is_pending(&self, id: &MessageId) -> bool {
        self.lock().pending.contains_key(id)
    }

    /// Number of requests awaiting a response.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.lock().pending.len()
    }

    /// Timer callback: reject `id` if the same registration is still pending.
    fn expire(&self, id: &MessageId, seq: u64, timeout: Duration) {
        let entry = self.take_registration(id, seq);

        if let Some(entry) = entry {
            warn!(%id, ?timeout, "request timed out waiting for child response");
            // Running inside the timer task, so no abort.
            entry.reply.send(Err(AppError::Timeout(format!(
                "no response for request {id} within {timeout:?}"
            ))))
            .ok();
        }
    }

    /// Drop the registration `seq` of `id` if it is still pending.
    fn withdraw(&self, id: &MessageId, seq: u64) -> bool {
        match self.take_registration(id, seq) {
            Some(entry) => {
                entry.timer.abort();
                true
            }
            None => false,
        }
    }

    /// Remove `id` only if its pending entry is registration `seq`.
    fn take_registration(&self, id: &MessageId, seq: u64) -> Option<PendingRequest> {
        let mut state = self.lock();
        if state.pending.get(id).is_some_and(|entry| entry.seq == seq) {
            state.pending.remove(id)
        } else {
            None
        }
    }

    fn lock(&self) -> MutexGuard<'_, CorrelatorState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
