// SPDX-License-Identifier: Apache-2.0

//! Stream manager (§4.I): owns one actor's inbound paths and downstream
//! manager, drives the handshake and push loop, and propagates failures.

use crate::clock::Clock;
use crate::control::{AckBatch, AckOpen, UpstreamMsg};
use crate::credit::CreditController;
use crate::downstream::DownstreamManager;
use crate::error::Error;
use crate::iface::UpstreamSink;
use crate::inbound::InboundPath;
use crate::slot::{Slot, StreamPriority, StreamSlots};
use std::collections::HashMap;
use std::rc::Rc;
use std::time::Duration;
use tracing::{error, info, trace};

/// Holds one actor's streaming state: its inbound paths, its downstream
/// manager `D`, and the continuous/shutting-down flags (§3 "Global
/// invariants", §4.I).
///
/// `generator` realizes the source hook `generate_messages()`: `None` for
/// stages and sinks (a no-op, per §4.I), `Some` for a source that pulls
/// fresh elements on every push cycle.
pub struct StreamManager<A, T, D> {
    self_addr: A,
    upstream: Rc<dyn UpstreamSink<A>>,
    inbound_paths: HashMap<Slot, InboundPath<A, T>>,
    out: D,
    priority: StreamPriority,
    is_continuous: bool,
    is_shutting_down: bool,
    pending_handshakes: usize,
    next_slot: u16,
    generator: Option<Box<dyn FnMut() -> Vec<T>>>,
}

impl<A, T, D> StreamManager<A, T, D>
where
    A: Clone,
    D: DownstreamManager<A, T>,
{
    /// Creates a manager with no inbound paths and an empty downstream
    /// manager. `upstream` delivers the `forced_drop`/`drop` messages this
    /// manager sends to its own inbound peers when it tears a path down.
    pub fn new(self_addr: A, upstream: Rc<dyn UpstreamSink<A>>, out: D, priority: StreamPriority, is_continuous: bool) -> Self {
        StreamManager {
            self_addr,
            upstream,
            inbound_paths: HashMap::new(),
            out,
            priority,
            is_continuous,
            is_shutting_down: false,
            pending_handshakes: 0,
            next_slot: 0,
            generator: None,
        }
    }

    /// Installs the source hook that [`Self::generate_messages`] pulls
    /// from on every push cycle. Leave unset for stages and sinks.
    pub fn set_generator(&mut self, generator: impl FnMut() -> Vec<T> + 'static) {
        self.generator = Some(Box::new(generator));
    }

    /// This actor's own address, used as `sender` on emitted messages.
    #[must_use]
    pub fn self_addr(&self) -> &A {
        &self.self_addr
    }

    /// The configured scheduling priority (informational; see
    /// [`crate::slot::StreamPriority`]).
    #[must_use]
    pub fn priority(&self) -> StreamPriority {
        self.priority
    }

    /// Whether this manager keeps running after becoming otherwise idle
    /// (a continuous source never reports [`Self::done`]).
    #[must_use]
    pub fn is_continuous(&self) -> bool {
        self.is_continuous
    }

    /// Whether [`Self::stop`] has already torn this manager down.
    #[must_use]
    pub fn is_shutting_down(&self) -> bool {
        self.is_shutting_down
    }

    /// Read-only access to the downstream manager, e.g. for metrics.
    #[must_use]
    pub fn out(&self) -> &D {
        &self.out
    }

    /// Mutable access to the downstream manager.
    pub fn out_mut(&mut self) -> &mut D {
        &mut self.out
    }

    /// Borrows one inbound path.
    #[must_use]
    pub fn inbound_path(&self, slot: Slot) -> Option<&InboundPath<A, T>> {
        self.inbound_paths.get(&slot)
    }

    /// Every registered inbound slot.
    #[must_use]
    pub fn inbound_slots(&self) -> Vec<Slot> {
        self.inbound_paths.keys().copied().collect()
    }

    /// True iff every inbound path is up to date (§4.I `idle` helper).
    #[must_use]
    pub fn inbound_paths_idle(&self) -> bool {
        self.inbound_paths.values().all(InboundPath::up_to_date)
    }

    fn assign_next_slot(&mut self) -> Slot {
        self.next_slot = self.next_slot.wrapping_add(1);
        if self.next_slot == 0 {
            self.next_slot = 1;
        }
        Slot::new(self.next_slot)
    }

    /// Allocates a pending outbound path to `peer` (§4.I "Opening a
    /// stream", source side). Delivering the out-of-band handshake
    /// message that carries the returned slot to `peer` is the caller's
    /// responsibility; this crate's modeled wire vocabulary (§4.B) begins
    /// at `ack_open`.
    pub fn add_unchecked_outbound_path(&mut self, peer: A) -> Slot {
        let slot = self.assign_next_slot();
        let _ = self.out.add_path(slot, peer);
        self.pending_handshakes += 1;
        slot
    }

    /// Registers a freshly opened inbound path (§4.I "Opening a stream",
    /// sink side) and returns the receiver slot plus the `ack_open` body
    /// to send back to `source_peer`.
    pub fn register_inbound_path(
        &mut self,
        clock: &impl Clock,
        source_peer: A,
        source_slot: Slot,
        priority: StreamPriority,
        controller: Box<dyn CreditController<T>>,
    ) -> (Slot, AckOpen<A>) {
        let receiver_slot = self.assign_next_slot();
        let slots = StreamSlots::new(source_slot, receiver_slot);
        let path = InboundPath::open(clock, source_peer.clone(), slots, priority, controller);
        info!(slot = %receiver_slot, "inbound path opened");
        let ack = AckOpen {
            rebind_from: source_peer,
            rebind_to: self.self_addr.clone(),
            initial_demand: path.available_credit(),
            desired_batch_size: path.desired_batch_size,
        };
        let _ = self.inbound_paths.insert(receiver_slot, path);
        (receiver_slot, ack)
    }

    /// Finalizes the handshake on the source side (§4.I `on ack_open`):
    /// rebinds and grants initial credit to the outbound path named by
    /// `slots.sender`, then runs one push cycle.
    pub fn on_ack_open(&mut self, slots: StreamSlots, body: &AckOpen<A>) -> Result<(), Error> {
        let path = self.out.path_mut(slots.sender).ok_or_else(|| Error::InvalidStreamState {
            slot: slots.sender,
            detail: "ack_open for unknown outbound path".into(),
        })?;
        path.ack_open(slots.receiver, body.rebind_to.clone(), body.initial_demand, body.desired_batch_size);
        self.pending_handshakes = self.pending_handshakes.saturating_sub(1);
        let _ = self.push()?;
        Ok(())
    }

    /// Delivers a received batch to the inbound path at `slot` (sink
    /// side). Returns the delivered payload and an `ack_batch` to send
    /// upstream, if one is due.
    ///
    /// An out-of-order id surfaces as `Err(Error::UnexpectedMessage)`; per
    /// §9 callers (the WDRR drain loop) should log and drop it rather than
    /// tear the whole manager down.
    pub fn on_batch(
        &mut self,
        clock: &impl Clock,
        slot: Slot,
        id: i64,
        size: i32,
        payload: Vec<T>,
    ) -> Result<(Vec<T>, Option<AckBatch>), Error> {
        let path = self.inbound_paths.get_mut(&slot).ok_or_else(|| Error::UnexpectedMessage {
            slot,
            detail: "batch for unknown inbound path".into(),
        })?;
        let delivery = path.on_batch(clock, id, size, payload)?;
        Ok((delivery.payload, delivery.ack))
    }

    /// Applies an `ack_batch` to the outbound path at `slot` (source
    /// side).
    pub fn on_ack_batch(&mut self, slot: Slot, body: &AckBatch) -> Result<(), Error> {
        let path = self.out.path_mut(slot).ok_or_else(|| Error::InvalidStreamState {
            slot,
            detail: "ack_batch for unknown outbound path".into(),
        })?;
        path.ack_batch(body);
        Ok(())
    }

    /// Graceful shutdown of the inbound path at `slot` (sink side `close`):
    /// no further batches are expected on it.
    pub fn on_close(&mut self, slot: Slot) -> bool {
        let removed = self.inbound_paths.remove(&slot).is_some();
        if removed {
            info!(%slot, "inbound path closed gracefully");
        }
        removed
    }

    /// Abrupt failure on the inbound path at `slot` (sink side
    /// `forced_close`, §4.I "Failure handling"): tears down the whole
    /// manager, not just this path, since an upstream failure on a stage
    /// must propagate through.
    pub fn on_forced_close(&mut self, _slot: Slot, reason: Rc<Error>) {
        self.stop(reason);
    }

    /// Abrupt failure on the outbound path at `slot` (source side
    /// `forced_drop`): the path is dropped silently, no reply is sent
    /// since the peer that reported the failure is already gone.
    pub fn on_forced_drop(&mut self, slot: Slot, reason: Rc<Error>) -> bool {
        error!(%slot, %reason, "outbound path force-dropped by peer");
        self.out.remove_path(slot, Some(reason), true)
    }

    /// Forced shutdown (§4.I "Failure handling" / §9 `stop` contract):
    /// force-closes every outbound path with `reason`, force-drops every
    /// inbound path (telling each upstream peer via `forced_drop` so it can
    /// remove its side of the path too), and marks the manager shutting
    /// down.
    pub fn stop(&mut self, reason: Rc<Error>) {
        error!(%reason, inbound = self.inbound_paths.len(), "stopping stream manager");
        self.out.abort(reason.clone());
        for (_, path) in self.inbound_paths.drain() {
            let _ = self.upstream.send(
                &path.peer,
                UpstreamMsg::ForcedDrop {
                    slots: path.slots,
                    sender: self.self_addr.clone(),
                    reason: reason.clone(),
                },
            );
        }
        self.pending_handshakes = 0;
        self.is_shutting_down = true;
    }

    /// Runs `generator` (if any) and pushes its output into the central
    /// buffer. A no-op for stages and sinks.
    pub fn generate_messages(&mut self) -> Result<(), Error> {
        if let Some(generator) = &mut self.generator {
            let items = generator();
            if !items.is_empty() {
                trace!(count = items.len(), "pushing generated elements");
                self.out.push(items)?;
            }
        }
        Ok(())
    }

    /// The push loop (§4.I): runs [`Self::generate_messages`], then ships
    /// whatever the downstream manager can.
    pub fn push(&mut self) -> Result<usize, Error> {
        self.generate_messages()?;
        self.out.emit_batches()
    }

    /// True when this actor's inbound buffer can make no further progress
    /// because its own downstream manager has no spare credit (§4.I
    /// "Congestion").
    #[must_use]
    pub fn congested(&self) -> bool {
        !self.out.empty() && self.out.stalled()
    }

    /// True once every outbound path is clean and closed, no inbound path
    /// remains open, and this manager is not continuous (§8 "no inbound and
    /// no outbound paths becomes `done()`"). A sink has no outbound paths by
    /// design, so `inbound_paths` is what actually keeps it alive.
    #[must_use]
    pub fn done(&self) -> bool {
        !self.is_continuous
            && self.pending_handshakes == 0
            && self.inbound_paths.is_empty()
            && self.out.empty()
    }

    /// True when no inbound progress is possible and no outbound batch can
    /// currently be emitted.
    #[must_use]
    pub fn idle(&self) -> bool {
        let inbound_idle = self.inbound_paths_idle();
        let outbound_idle = self.out.stalled() || self.out.buffered() == 0;
        inbound_idle && outbound_idle
    }

    /// The tick-driven shipping step (§4.I "Shipping"): gives every
    /// inbound path a chance to force an `ack_batch`, then flushes the
    /// push loop. Returns the acks the caller must send upstream.
    pub fn advance(&mut self, clock: &impl Clock, max_batch_delay: Duration) -> Result<Vec<(Slot, AckBatch)>, Error> {
        let mut acks = Vec::new();
        for (slot, path) in &mut self.inbound_paths {
            if let Some(ack) = path.tick(clock, max_batch_delay) {
                acks.push((*slot, ack));
            }
        }
        let _ = self.push()?;
        Ok(acks)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::TestClock;
    use crate::control::DownstreamMsg;
    use crate::credit::TokenBasedCreditController;
    use crate::downstream::broadcast::BroadcastDownstreamManager;
    use crate::downstream::ErasedDownstreamManager;
    use crate::iface::DownstreamSink;
    use std::cell::RefCell;

    #[derive(Default)]
    struct RecordingSink {
        sent: RefCell<Vec<DownstreamMsg<u8, i32>>>,
    }

    impl DownstreamSink<u8, i32> for RecordingSink {
        fn send(&self, _target: &u8, msg: DownstreamMsg<u8, i32>) -> Result<(), Error> {
            self.sent.borrow_mut().push(msg);
            Ok(())
        }
    }

    #[derive(Default)]
    struct RecordingUpstreamSink {
        sent: RefCell<Vec<UpstreamMsg<u8>>>,
    }

    impl UpstreamSink<u8> for RecordingUpstreamSink {
        fn send(&self, _target: &u8, msg: UpstreamMsg<u8>) -> Result<(), Error> {
            self.sent.borrow_mut().push(msg);
            Ok(())
        }
    }

    fn manager(sink: Rc<RecordingSink>) -> StreamManager<u8, i32, BroadcastDownstreamManager<u8, i32>> {
        manager_with_upstream(sink, Rc::new(RecordingUpstreamSink::default()))
    }

    fn manager_with_upstream(
        sink: Rc<RecordingSink>,
        upstream: Rc<RecordingUpstreamSink>,
    ) -> StreamManager<u8, i32, BroadcastDownstreamManager<u8, i32>> {
        let out = BroadcastDownstreamManager::new(1u8, sink as Rc<dyn DownstreamSink<u8, i32>>);
        StreamManager::new(1u8, upstream as Rc<dyn UpstreamSink<u8>>, out, StreamPriority::Normal, false)
    }

    #[test]
    fn handshake_then_push_ships_batches() {
        let sink = Rc::new(RecordingSink::default());
        let mut mgr = manager(sink.clone());
        let slot = mgr.add_unchecked_outbound_path(2u8);
        mgr.set_generator(|| (1..=10).collect());
        mgr.on_ack_open(
            StreamSlots::new(slot, Slot::new(99)),
            &AckOpen {
                rebind_from: 2u8,
                rebind_to: 2u8,
                initial_demand: 5,
                desired_batch_size: 5,
            },
        )
        .unwrap();
        assert_eq!(sink.sent.borrow().len(), 1);
    }

    #[test]
    fn forced_close_on_inbound_stops_everything() {
        let sink = Rc::new(RecordingSink::default());
        let upstream = Rc::new(RecordingUpstreamSink::default());
        let mut mgr = manager_with_upstream(sink, upstream.clone());
        let slot = mgr.add_unchecked_outbound_path(2u8);
        mgr.out_mut().path_mut(slot).unwrap().ack_open(Slot::new(9), 2u8, 10, 2);
        let clock = TestClock::new();
        let (_, ack_open) = mgr.register_inbound_path(
            &clock,
            3u8,
            Slot::new(5),
            StreamPriority::Normal,
            Box::new(TokenBasedCreditController::new()),
        );
        let _ = ack_open;
        mgr.on_forced_close(Slot::new(5), Rc::new(Error::RuntimeError { detail: "boom".into() }));
        assert!(mgr.is_shutting_down());
        assert!(mgr.inbound_slots().is_empty());
        assert!(mgr.done());
        assert_eq!(upstream.sent.borrow().len(), 1);
        assert!(matches!(upstream.sent.borrow()[0], UpstreamMsg::ForcedDrop { .. }));
    }

    #[test]
    fn forced_drop_removes_only_that_outbound_path() {
        let sink = Rc::new(RecordingSink::default());
        let mut mgr = manager(sink);
        let slot = mgr.add_unchecked_outbound_path(2u8);
        let removed = mgr.on_forced_drop(slot, Rc::new(Error::RuntimeError { detail: "gone".into() }));
        assert!(removed);
        assert!(mgr.out().empty());
    }

    #[test]
    fn sink_with_live_inbound_path_is_not_done() {
        let sink = Rc::new(RecordingSink::default());
        let mut mgr = manager(sink);
        let clock = TestClock::new();
        let (_, ack_open) = mgr.register_inbound_path(
            &clock,
            3u8,
            Slot::new(5),
            StreamPriority::Normal,
            Box::new(TokenBasedCreditController::new()),
        );
        let _ = ack_open;
        // A sink has no outbound paths by design, so `out.empty()` is
        // trivially true; `done()` must still see the live inbound path.
        assert!(mgr.out().empty());
        assert!(!mgr.done());
        mgr.on_close(Slot::new(5));
        assert!(mgr.done());
    }

    #[test]
    fn congested_when_out_of_credit_with_paths_open() {
        let sink = Rc::new(RecordingSink::default());
        let mut mgr = manager(sink);
        let slot = mgr.add_unchecked_outbound_path(2u8);
        mgr.out_mut().path_mut(slot).unwrap().ack_open(Slot::new(9), 2u8, 0, 1);
        assert!(mgr.congested());
    }
}
