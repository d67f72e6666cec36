//! Receive coordinator - arbitrates the single reader role.
//!
//! Many callers concurrently want frames tagged with distinct response
//! ids, but the stream has one read side. Instead of a dedicated reader
//! task, the first caller to ask takes the *reader role* and reads frames
//! on behalf of everyone; frames for other ids are handed over through
//! the coordinator, and when the role holder finishes it passes the role
//! to a waiting caller.
//!
//! All bookkeeping lives under one mutex:
//!
//! - `awaiters`: response id → one-shot slot of a suspended caller
//! - `pending`: response id → buffer received but not yet claimed
//! - `receiver_assigned`: true while some caller holds the reader role
//!
//! For any id at most one of awaiter/pending exists: taking instructions
//! removes from `pending` before registering an awaiter, and dispatch
//! removes the awaiter before inserting into `pending`. Critical sections
//! are map operations only; no I/O happens under the lock.
//!
//! Buffer ownership is part of the contract: a dispatched buffer belongs
//! to the awaiter it is delivered to, and if that awaiter is gone
//! (cancelled), the undelivered buffer is dropped here, returning its
//! chunks to the pool.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};
use crate::protocol::ByteBuffer;

/// What a caller asking for a reply should do next.
#[derive(Debug)]
pub enum ReceiveInstruction {
    /// The frame already arrived; here it is. The caller owns the buffer.
    ReturnBuffer(ByteBuffer),
    /// Nobody is reading; the caller must read frames itself until it
    /// sees its own response id, dispatching everything else.
    AssumeReceiverRole,
}

#[derive(Default)]
struct CoordinatorState {
    awaiters: BTreeMap<i32, oneshot::Sender<ReceiveInstruction>>,
    pending: BTreeMap<i32, ByteBuffer>,
    receiver_assigned: bool,
    disposed: bool,
}

/// Shares one stream reader among any number of reply waiters.
#[derive(Default)]
pub struct ReceiveCoordinator {
    state: Mutex<CoordinatorState>,
}

impl ReceiveCoordinator {
    /// Create an idle coordinator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask how to obtain the frame for `response_to`.
    ///
    /// Returns immediately with a buffer if the frame already arrived,
    /// immediately with the reader role if nobody holds it, and otherwise
    /// suspends until the current role holder delivers the frame or hands
    /// the role over.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Cancelled`] if `cancel` fires while suspended and
    /// [`Error::Disposed`] if the coordinator is disposed.
    pub async fn get_instructions(
        &self,
        response_to: i32,
        cancel: &CancellationToken,
    ) -> Result<ReceiveInstruction> {
        let receiver = {
            let mut state = self.lock();

            if state.disposed {
                return Err(Error::Disposed);
            }

            if let Some(buffer) = state.pending.remove(&response_to) {
                return Ok(ReceiveInstruction::ReturnBuffer(buffer));
            }

            if !state.receiver_assigned {
                state.receiver_assigned = true;
                return Ok(ReceiveInstruction::AssumeReceiverRole);
            }

            let (sender, receiver) = oneshot::channel();
            // A dead slot left by a cancelled waiter for the same id may
            // still be here; replacing it is the cleanup.
            let _ = state.awaiters.insert(response_to, sender);
            receiver
        };

        tokio::select! {
            biased;
            delivered = receiver => {
                delivered.map_err(|_| Error::Disposed)
            }
            () = cancel.cancelled() => {
                // Abandon the slot in place. The role holder finds the
                // dead awaiter when the frame arrives and disposes the
                // buffer; relinquish skips it when handing the role on.
                Err(Error::Cancelled)
            }
        }
    }

    /// Deliver a frame read on behalf of another caller.
    ///
    /// Completes the waiting awaiter if there is one; otherwise parks the
    /// buffer in the pending table until someone asks for that id. A
    /// buffer aimed at a cancelled awaiter is dropped here.
    pub fn dispatch(&self, response_to: i32, buffer: ByteBuffer) {
        let mut state = self.lock();

        if state.disposed {
            return;
        }

        if let Some(sender) = state.awaiters.remove(&response_to) {
            drop(state);
            if sender
                .send(ReceiveInstruction::ReturnBuffer(buffer))
                .is_err()
            {
                tracing::debug!(response_to, "discarded reply for a cancelled waiter");
            }
        } else {
            state.pending.insert(response_to, buffer);
        }
    }

    /// Give up the reader role.
    ///
    /// Hands the role to a waiting caller if any remain (first map entry;
    /// no fairness promised), skipping cancelled ones. With no waiters
    /// left, the role is simply cleared.
    pub fn relinquish(&self) {
        loop {
            let sender = {
                let mut state = self.lock();
                match state.awaiters.pop_first() {
                    Some((_, sender)) => sender,
                    None => {
                        state.receiver_assigned = false;
                        return;
                    }
                }
            };

            if sender.send(ReceiveInstruction::AssumeReceiverRole).is_ok() {
                return;
            }
            // Awaiter cancelled between registration and handoff; try the
            // next one.
        }
    }

    /// Drop all pending buffers and fail all waiters.
    ///
    /// Waiters still suspended observe [`Error::Disposed`]. Idempotent.
    pub fn dispose(&self) {
        let (awaiters, pending) = {
            let mut state = self.lock();
            state.disposed = true;
            state.receiver_assigned = false;
            (
                std::mem::take(&mut state.awaiters),
                std::mem::take(&mut state.pending),
            )
        };

        // Dropping the senders wakes the waiters; dropping the buffers
        // returns their chunks to the pool.
        drop(awaiters);
        drop(pending);
    }

    /// True while some caller holds the reader role.
    pub fn receiver_assigned(&self) -> bool {
        self.lock().receiver_assigned
    }

    /// Number of suspended waiters.
    pub fn awaiter_count(&self) -> usize {
        self.lock().awaiters.len()
    }

    /// Number of unclaimed buffers.
    pub fn pending_count(&self) -> usize {
        self.lock().pending.len()
    }

    fn lock(&self) -> MutexGuard<'_, CoordinatorState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Scope guard that returns the reader role when the holder exits.
///
/// The role must transfer whether the holder found its frame, hit a read
/// error, or was cancelled; tying the handoff to `Drop` makes that
/// unconditional.
pub struct RoleGuard<'a> {
    coordinator: &'a ReceiveCoordinator,
}

impl<'a> RoleGuard<'a> {
    /// Guard a freshly assumed reader role.
    pub fn new(coordinator: &'a ReceiveCoordinator) -> Self {
        Self { coordinator }
    }
}

impl Drop for RoleGuard<'_> {
    fn drop(&mut self) {
        self.coordinator.relinquish();
    }
}
