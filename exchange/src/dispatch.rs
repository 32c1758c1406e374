//! Correlation table and inbound dispatcher.
//!
//! DESIGN
//! ======
//! The [`Dispatcher`] is owned by exactly one connection task, which feeds it
//! registrations, inbound frames, deadline ticks, and the final close. Nothing
//! else touches the table, so every transition is serialized.
//!
//! The table entry is the single arbiter of an exchange: whichever of reply,
//! deadline, or close removes it first settles the exchange, and every later
//! event for that id finds nothing and is dropped.
//!
//! DEADLINES
//! =========
//! Deadlines live in a min-heap of `(instant, id)` and are cancelled lazily.
//! A heap entry is live only while the table still holds `id` with that exact
//! deadline; stream chunks re-arm by pushing a fresh entry and leaving the old
//! one to be skipped. A timeout too large to add to the clock leaves the
//! exchange without a deadline; it then ends only by reply or close.

use std::cmp::Reverse;
use std::collections::hash_map::Entry;
use std::collections::{BinaryHeap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use envelope::{ExchangeId, Inbound, MAX_SAFE_ID, Reply};
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tracing::{debug, error, warn};

use crate::error::RpcError;
use crate::stream::StreamEvent;

// =============================================================================
// ID SEED
// =============================================================================

/// Monotonic exchange id counter, wrapping to 0 before [`MAX_SAFE_ID`].
#[derive(Debug, Default)]
pub(crate) struct IdSeed(AtomicU64);

impl IdSeed {
    #[cfg(test)]
    pub(crate) fn starting_at(id: ExchangeId) -> Self {
        Self(AtomicU64::new(id))
    }

    pub(crate) fn next(&self) -> ExchangeId {
        let advance = |id: ExchangeId| Some(if id + 1 >= MAX_SAFE_ID { 0 } else { id + 1 });
        self.0
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, advance)
            .unwrap_or_else(|id| id)
    }
}

// =============================================================================
// TABLE ENTRIES
// =============================================================================

/// Where an exchange's outcome is delivered.
#[derive(Debug)]
pub(crate) enum Waiter {
    Unary(oneshot::Sender<Result<Value, RpcError>>),
    Stream(mpsc::UnboundedSender<StreamEvent>),
}

impl Waiter {
    /// Deliver a terminal error. A consumer that stopped listening is ignored.
    pub(crate) fn fail(self, err: RpcError) {
        match self {
            Self::Unary(tx) => {
                let _ = tx.send(Err(err));
            }
            Self::Stream(tx) => {
                let _ = tx.send(StreamEvent::Failed(err));
            }
        }
    }
}

#[derive(Debug)]
struct Pending {
    waiter: Waiter,
    timeout: Duration,
    deadline: Option<Instant>,
}

fn deadline_after(now: Instant, timeout: Duration) -> Option<Instant> {
    now.checked_add(timeout)
}

// =============================================================================
// DISPATCHER
// =============================================================================

#[derive(Debug, Default)]
pub(crate) struct Dispatcher {
    pending: HashMap<ExchangeId, Pending>,
    deadlines: BinaryHeap<Reverse<(Instant, ExchangeId)>>,
}

impl Dispatcher {
    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.pending.len()
    }

    #[cfg(test)]
    pub(crate) fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    #[cfg(test)]
    pub(crate) fn contains(&self, id: ExchangeId) -> bool {
        self.pending.contains_key(&id)
    }

    /// Register an exchange whose first deadline is `now + timeout`, or none
    /// when that instant is beyond the clock's range.
    ///
    /// An id that is still outstanding is refused and the waiter is failed
    /// with [`RpcError::IdCollision`]; the older exchange is left untouched.
    pub(crate) fn register(
        &mut self,
        id: ExchangeId,
        timeout: Duration,
        waiter: Waiter,
        now: Instant,
    ) -> Result<(), RpcError> {
        let deadline = deadline_after(now, timeout);
        match self.pending.entry(id) {
            Entry::Occupied(_) => {
                error!(id, "exchange id wrapped onto an outstanding exchange");
                waiter.fail(RpcError::IdCollision(id));
                Err(RpcError::IdCollision(id))
            }
            Entry::Vacant(slot) => {
                slot.insert(Pending {
                    waiter,
                    timeout,
                    deadline,
                });
                self.arm(deadline, id);
                Ok(())
            }
        }
    }

    /// Settle `id` with `err` if it is still outstanding.
    pub(crate) fn fail(&mut self, id: ExchangeId, err: RpcError) {
        if let Some(pending) = self.pending.remove(&id) {
            pending.waiter.fail(err);
        }
    }

    /// Decode one structured frame and route it. Unreadable frames are dropped.
    pub(crate) fn route_frame(&mut self, bytes: &[u8], now: Instant) {
        match envelope::decode_inbound(bytes) {
            Ok(inbound) => self.route(inbound, now),
            Err(e) => warn!(error = %e, "dropping unroutable frame"),
        }
    }

    /// Route a decoded reply to the exchange waiting on its id.
    pub(crate) fn route(&mut self, inbound: Inbound, now: Instant) {
        let Inbound { id, reply } = inbound;
        let Some(pending) = self.pending.remove(&id) else {
            debug!(id, "no pending exchange for reply; dropping");
            return;
        };
        if pending.deadline.is_some_and(|deadline| deadline <= now) {
            debug!(id, "reply arrived after deadline; timing out");
            pending.waiter.fail(RpcError::Timeout);
            return;
        }

        match pending.waiter {
            Waiter::Unary(tx) => {
                let outcome = match reply {
                    Reply::Result { value, .. } => Ok(value),
                    Reply::Error { code, message } => Err(RpcError::Remote { code, message }),
                    Reply::Malformed => {
                        warn!(id, "reply has neither result nor error");
                        Err(RpcError::InvalidResponse)
                    }
                };
                let _ = tx.send(outcome);
            }
            Waiter::Stream(tx) => match reply {
                Reply::Result { value, end: true } => {
                    let _ = tx.send(StreamEvent::End(value));
                }
                Reply::Result { value, end: false } => {
                    let _ = tx.send(StreamEvent::Chunk(value));
                    let deadline = deadline_after(now, pending.timeout);
                    self.arm(deadline, id);
                    self.pending.insert(
                        id,
                        Pending {
                            waiter: Waiter::Stream(tx),
                            timeout: pending.timeout,
                            deadline,
                        },
                    );
                }
                Reply::Error { code, message } => {
                    let _ = tx.send(StreamEvent::Failed(RpcError::Remote { code, message }));
                }
                Reply::Malformed => {
                    warn!(id, "stream reply has neither result nor error");
                    let _ = tx.send(StreamEvent::Failed(RpcError::InvalidResponse));
                }
            },
        }
    }

    /// Earliest live deadline, discarding stale heap entries on the way.
    pub(crate) fn next_deadline(&mut self) -> Option<Instant> {
        while let Some(Reverse((deadline, id))) = self.deadlines.peek().copied() {
            if self.is_live(deadline, id) {
                return Some(deadline);
            }
            self.deadlines.pop();
        }
        None
    }

    /// Time out every exchange whose deadline is at or before `now`.
    pub(crate) fn expire(&mut self, now: Instant) {
        while let Some(Reverse((deadline, id))) = self.deadlines.peek().copied() {
            if deadline > now {
                break;
            }
            self.deadlines.pop();
            if self.is_live(deadline, id) {
                debug!(id, "exchange timed out");
                self.fail(id, RpcError::Timeout);
            }
        }
    }

    /// Settle every outstanding exchange with `err` and empty the table.
    pub(crate) fn close_all(&mut self, err: &RpcError) {
        let drained = self.pending.len();
        for (_, pending) in self.pending.drain() {
            pending.waiter.fail(err.clone());
        }
        self.deadlines.clear();
        if drained > 0 {
            debug!(drained, error = %err, "settled outstanding exchanges");
        }
    }

    fn arm(&mut self, deadline: Option<Instant>, id: ExchangeId) {
        match deadline {
            Some(deadline) => self.deadlines.push(Reverse((deadline, id))),
            None => debug!(id, "timeout beyond clock range; exchange has no deadline"),
        }
    }

    fn is_live(&self, deadline: Instant, id: ExchangeId) -> bool {
        self.pending
            .get(&id)
            .is_some_and(|pending| pending.deadline == Some(deadline))
    }
}

#[cfg(test)]
#[path = "dispatch_test.rs"]
mod tests;
