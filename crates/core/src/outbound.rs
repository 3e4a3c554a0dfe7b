// SPDX-License-Identifier: Apache-2.0

//! Outbound path state machine (§4.D): per-sink credit accounting and
//! batch shipping on the sending side of a stream.

use crate::control::{AckBatch, Batch, DownstreamMsg};
use crate::error::Error;
use crate::iface::DownstreamSink;
use crate::slot::{Slot, StreamSlots};
use std::collections::VecDeque;
use std::rc::Rc;
use tracing::{debug, error};

/// Lifecycle state of an [`OutboundPath`] (§4.D "State machine").
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OutboundPathState {
    /// Created, handshake not yet acked. `slots.receiver` is invalid.
    Pending,
    /// Handshake acked; batches may ship.
    Open,
    /// Marked for graceful removal: no new elements enqueued, buffered
    /// ones still ship.
    Closing,
    /// Fully drained and removed.
    Terminated,
}

/// Per-sink state on the sending side of a stream (§3 "Outbound path").
pub struct OutboundPath<A, T> {
    /// (self-sender, peer-receiver). `receiver` is invalid while pending.
    pub slots: StreamSlots,
    /// Strong reference to the peer, kept alive while the path exists.
    pub peer: A,
    /// Credit available to spend on this path.
    pub open_credit: i32,
    /// Batch size the sink has requested.
    pub desired_batch_size: i32,
    /// Next batch id to assign, starting at 1.
    pub next_batch_id: i64,
    /// Next id expected in an accumulating ack; `<= next_batch_id`.
    pub next_ack_id: i64,
    state: OutboundPathState,
    _marker: std::marker::PhantomData<fn(T)>,
}

impl<A, T> OutboundPath<A, T> {
    /// Creates a pending outbound path immediately after a handshake is
    /// sent, before `ack_open` is observed (§4.F `add_path`).
    #[must_use]
    pub fn new_pending(sender_slot: Slot, peer: A) -> Self {
        OutboundPath {
            slots: StreamSlots::new(sender_slot, crate::slot::INVALID_SLOT),
            peer,
            open_credit: 0,
            desired_batch_size: 0,
            next_batch_id: 1,
            next_ack_id: 1,
            state: OutboundPathState::Pending,
            _marker: std::marker::PhantomData,
        }
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> OutboundPathState {
        self.state
    }

    /// A path is pending until its handshake has been acked.
    #[must_use]
    pub fn pending(&self) -> bool {
        self.state == OutboundPathState::Pending
    }

    /// A path is clean when every emitted batch has been acked.
    #[must_use]
    pub fn clean(&self) -> bool {
        self.next_ack_id == self.next_batch_id
    }

    /// Whether the path is marked for graceful removal.
    #[must_use]
    pub fn is_closing(&self) -> bool {
        self.state == OutboundPathState::Closing
    }

    /// Whether the path has reached its terminal state.
    #[must_use]
    pub fn is_terminated(&self) -> bool {
        self.state == OutboundPathState::Terminated
    }

    /// Finalizes the handshake (§4.B `ack_open`): rebinds the peer if
    /// requested, grants initial credit, and transitions to `Open`.
    pub fn ack_open(&mut self, receiver_slot: Slot, rebind_to: A, initial_demand: i32, desired_batch_size: i32) {
        self.slots.receiver = receiver_slot;
        self.peer = rebind_to;
        self.open_credit = initial_demand;
        self.desired_batch_size = desired_batch_size;
        self.state = OutboundPathState::Open;
    }

    /// Applies an accumulating `ack_batch` (§4.D "On ack_batch").
    pub fn ack_batch(&mut self, body: &AckBatch) {
        self.open_credit += body.new_capacity;
        self.desired_batch_size = body.desired_batch_size;
        self.next_ack_id = body.acknowledged_id + 1;
        self.maybe_terminate();
    }

    /// Requests graceful closure: marks the path closing. The downstream
    /// manager is responsible for continuing to ship buffered batches and
    /// for emitting `close` only once [`Self::clean`] becomes true.
    pub fn request_close(&mut self) {
        if self.state != OutboundPathState::Terminated {
            self.state = OutboundPathState::Closing;
            self.maybe_terminate();
        }
    }

    /// Forces immediate termination, used on `forced_close`/`abort`.
    pub fn force_terminate(&mut self) {
        self.state = OutboundPathState::Terminated;
    }

    fn maybe_terminate(&mut self) {
        if self.state == OutboundPathState::Closing && self.clean() {
            self.state = OutboundPathState::Terminated;
        }
    }

    /// Emits one batch directly (§4.D "On emit_batch"), bypassing any
    /// per-path cache. Used by non-broadcast downstream managers and by
    /// [`Self::emit_batches`]'s internal chunking.
    pub fn emit_batch(
        &mut self,
        sink: &dyn DownstreamSink<A, T>,
        self_addr: &A,
        payload: Vec<T>,
    ) -> Result<i64, Error>
    where
        A: Clone,
    {
        let size = payload.len() as i32;
        if self.pending() {
            return Err(Error::InvalidStreamState {
                slot: self.slots.sender,
                detail: "cannot emit on a pending outbound path".into(),
            });
        }
        if size > self.open_credit {
            return Err(Error::InvalidStreamState {
                slot: self.slots.sender,
                detail: format!("batch of {size} exceeds open credit {}", self.open_credit),
            });
        }
        if self.desired_batch_size <= 0 {
            return Err(Error::InvalidStreamState {
                slot: self.slots.sender,
                detail: "desired_batch_size must be positive".into(),
            });
        }
        let id = self.next_batch_id;
        self.next_batch_id += 1;
        self.open_credit -= size;
        debug!(slot = %self.slots.sender, id, size, open_credit = self.open_credit, "emitting batch");
        sink.send(
            &self.peer,
            DownstreamMsg::Batch {
                slots: self.slots,
                sender: self_addr.clone(),
                batch: Batch { size, payload, id },
            },
        )?;
        Ok(id)
    }

    /// Drains `cache` into batches of `desired_batch_size`, shipping as
    /// many full batches as current credit allows, then (only if
    /// `force_underfull` or the path is closing) one final underfull
    /// batch. Mirrors the reference `emit_batches`/`emit_batches_impl`
    /// pair: the shippable window is `min(open_credit, cache.len())`,
    /// and only that window is ever drained from `cache` in one call.
    pub fn emit_batches(
        &mut self,
        sink: &dyn DownstreamSink<A, T>,
        self_addr: &A,
        cache: &mut VecDeque<T>,
        force_underfull: bool,
    ) -> Result<usize, Error>
    where
        A: Clone,
    {
        if self.pending() {
            return Ok(0);
        }
        let batch_size = self.desired_batch_size.max(0) as usize;
        if batch_size == 0 {
            return Ok(0);
        }
        let window = (self.open_credit.max(0) as usize).min(cache.len());
        if window == 0 {
            return Ok(0);
        }
        let mut consumed = 0usize;
        let mut shipped = 0usize;
        while window - consumed >= batch_size {
            let items: Vec<T> = cache.drain(..batch_size).collect();
            let _ = self.emit_batch(sink, self_addr, items)?;
            consumed += batch_size;
            shipped += 1;
        }
        let remainder = window - consumed;
        if remainder > 0 && (force_underfull || self.is_closing()) {
            let items: Vec<T> = cache.drain(..remainder).collect();
            let _ = self.emit_batch(sink, self_addr, items)?;
            shipped += 1;
        }
        if self.is_closing() && cache.is_empty() {
            self.maybe_terminate();
        }
        Ok(shipped)
    }

    /// Emits `close` (if not silent) via the downstream sink, for a path
    /// that has become clean while closing, or `forced_close(reason)` for
    /// an abrupt shutdown.
    pub fn emit_shutdown(
        &mut self,
        sink: &dyn DownstreamSink<A, T>,
        self_addr: &A,
        reason: Option<Rc<Error>>,
        silent: bool,
    ) -> Result<(), Error>
    where
        A: Clone,
    {
        self.force_terminate();
        if silent {
            return Ok(());
        }
        let msg = match reason {
            Some(reason) => {
                error!(slot = %self.slots.sender, %reason, "forcing outbound path closed");
                DownstreamMsg::ForcedClose {
                    slots: self.slots,
                    sender: self_addr.clone(),
                    reason,
                }
            }
            None => DownstreamMsg::Close {
                slots: self.slots,
                sender: self_addr.clone(),
            },
        };
        sink.send(&self.peer, msg)
    }
}
