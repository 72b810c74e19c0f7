//! Tick-coalescing call batcher.
//!
//! # Architecture
//!
//! ```text
//! enqueue:
//!   1. assign id, push envelope on the outgoing queue
//!   2. register the reply sender in the pending registry
//!   3. first enqueue since the last flush: spawn one flush task for the
//!      next tick boundary
//!   4. deadline configured: spawn a timeout task
//!
//! flush (next tick):
//!   5. take the outgoing queue, hand it to the sender
//!   6. the pending registry is untouched
//!
//! on_responses:
//!   7. remove each id from the registry and settle its reply
//!   8. unknown ids are ignored
//! ```
//!
//! The outgoing queue holds calls waiting to be sent and is cleared on every
//! flush. The pending registry holds calls waiting for a response and is
//! only cleared when a call settles. Keeping them apart is what lets a
//! response arriving ticks after its flush still find its caller.

use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use serde_json::Value;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use super::reply_future::{CallOutcome, ReplyFuture};
use crate::config::ClientConfig;
use crate::error::CallError;
use crate::providers::Providers;
use crate::task::TaskProvider;
use crate::tick::TickProvider;
use crate::types::CallId;
use crate::wire::{RequestEnvelope, ResponseEnvelope};

type BatchSender = Rc<dyn Fn(Vec<RequestEnvelope>)>;

/// A call waiting for its response.
struct PendingCall {
    fqn: String,
    reply: oneshot::Sender<CallOutcome>,
    timeout: Option<JoinHandle<()>>,
}

impl PendingCall {
    fn settle(self, outcome: CallOutcome) {
        if let Some(timeout) = self.timeout {
            timeout.abort();
        }
        if self.reply.send(outcome).is_err() {
            tracing::trace!(fqn = %self.fqn, "caller dropped reply before it settled");
        }
    }
}

struct BatcherState {
    next_id: CallId,
    outgoing: Vec<RequestEnvelope>,
    pending: HashMap<CallId, PendingCall>,
    flush_scheduled: bool,
}

/// Collects calls made within one tick into a single request batch.
///
/// Cloning shares the same queue and registry.
pub struct Batcher<P: Providers> {
    state: Rc<RefCell<BatcherState>>,
    sender: BatchSender,
    providers: P,
    call_timeout_ticks: Option<u64>,
}

impl<P: Providers> Clone for Batcher<P> {
    fn clone(&self) -> Self {
        Self {
            state: Rc::clone(&self.state),
            sender: Rc::clone(&self.sender),
            providers: self.providers.clone(),
            call_timeout_ticks: self.call_timeout_ticks,
        }
    }
}

impl<P: Providers> Batcher<P> {
    /// Create a batcher that hands each flushed batch to `sender`.
    pub fn new<F>(providers: P, config: &ClientConfig, sender: F) -> Self
    where
        F: Fn(Vec<RequestEnvelope>) + 'static,
    {
        Self {
            state: Rc::new(RefCell::new(BatcherState {
                next_id: 1,
                outgoing: Vec::new(),
                pending: HashMap::new(),
                flush_scheduled: false,
            })),
            sender: Rc::new(sender),
            providers,
            call_timeout_ticks: config.call_timeout_ticks,
        }
    }

    /// Queue a call for the next batch.
    ///
    /// Returns immediately; must be called from within a
    /// [`LocalSet`](tokio::task::LocalSet).
    pub fn enqueue(&self, fqn: &str, payload: Value) -> ReplyFuture {
        let (reply, receiver) = oneshot::channel();
        let now = self.providers.tick().current_tick();

        let (id, schedule_flush) = {
            let mut state = self.state.borrow_mut();
            let id = state.next_id;
            state.next_id += 1;
            state.outgoing.push(RequestEnvelope {
                id,
                fqn: fqn.to_string(),
                payload,
            });
            state.pending.insert(
                id,
                PendingCall {
                    fqn: fqn.to_string(),
                    reply,
                    timeout: None,
                },
            );
            let schedule_flush = !state.flush_scheduled;
            state.flush_scheduled = true;
            (id, schedule_flush)
        };
        tracing::trace!(id, fqn, tick = now, "call enqueued");

        if schedule_flush {
            let batcher = self.clone();
            self.providers
                .task()
                .spawn_task("chisel_batch_flush", async move {
                    batcher.providers.tick().wait_until(now + 1).await;
                    batcher.flush();
                });
        }

        if let Some(ticks) = self.call_timeout_ticks {
            let batcher = self.clone();
            let handle = self
                .providers
                .task()
                .spawn_task("chisel_call_timeout", async move {
                    batcher.providers.tick().wait_until(now + ticks).await;
                    batcher.expire(id, ticks);
                });
            if let Some(call) = self.state.borrow_mut().pending.get_mut(&id) {
                call.timeout = Some(handle);
            }
        }

        ReplyFuture::new(id, receiver)
    }

    /// Send everything queued so far as one batch.
    ///
    /// Runs automatically on the tick after the first enqueue; calling it
    /// directly flushes early.
    pub fn flush(&self) {
        let batch = {
            let mut state = self.state.borrow_mut();
            state.flush_scheduled = false;
            std::mem::take(&mut state.outgoing)
        };
        if batch.is_empty() {
            return;
        }
        tracing::debug!(
            batch_size = batch.len(),
            tick = self.providers.tick().current_tick(),
            "flushing request batch"
        );
        (self.sender)(batch);
    }

    /// Settle pending calls from a response batch.
    pub fn on_responses(&self, batch: Vec<ResponseEnvelope>) {
        tracing::debug!(batch_size = batch.len(), "response batch received");
        for response in batch {
            let id = response.id;
            let call = self.state.borrow_mut().pending.remove(&id);
            match call {
                Some(call) => {
                    tracing::trace!(id, fqn = %call.fqn, ok = response.ok, "call settled");
                    call.settle(response.into_result());
                }
                None => tracing::trace!(id, "ignoring response for unknown call"),
            }
        }
    }

    /// Reject every pending call and drop anything not yet sent.
    pub fn reject_all(&self, error: CallError) {
        let drained: Vec<PendingCall> = {
            let mut state = self.state.borrow_mut();
            state.outgoing.clear();
            state.pending.drain().map(|(_, call)| call).collect()
        };
        if !drained.is_empty() {
            tracing::debug!(count = drained.len(), error = %error, "rejecting pending calls");
        }
        for call in drained {
            call.settle(Err(error.clone()));
        }
    }

    fn expire(&self, id: CallId, ticks: u64) {
        let call = {
            let mut state = self.state.borrow_mut();
            // Not sent yet: it never will be.
            state.outgoing.retain(|envelope| envelope.id != id);
            state.pending.remove(&id)
        };
        if let Some(mut call) = call {
            tracing::debug!(id, fqn = %call.fqn, ticks, "call timed out");
            // Running inside the timeout task itself.
            call.timeout = None;
            call.settle(Err(CallError::Timeout { id, ticks }));
        }
    }

    /// Calls waiting for a response, sent or not.
    pub fn pending_count(&self) -> usize {
        self.state.borrow().pending.len()
    }

    /// Calls waiting for the next flush.
    pub fn queued_count(&self) -> usize {
        self.state.borrow().outgoing.len()
    }
}

impl<P: Providers> fmt::Debug for Batcher<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.borrow();
        f.debug_struct("Batcher")
            .field("next_id", &state.next_id)
            .field("queued", &state.outgoing.len())
            .field("pending", &state.pending.len())
            .field("flush_scheduled", &state.flush_scheduled)
            .finish()
    }
}
