// SPDX-License-Identifier: Apache-2.0

//! Inbound path state machine (§4.C): per-source credit accounting on the
//! receiving side of a stream.

use crate::clock::Clock;
use crate::control::{AckBatch, Batch};
use crate::credit::CreditController;
use crate::error::Error;
use crate::slot::{StreamPriority, StreamSlots};
use std::time::{Duration, Instant};
use tracing::warn;

/// Outcome of delivering one batch to an [`InboundPath`]: the payload to
/// hand to the stream manager, plus an ack to emit if one is due.
#[derive(Debug)]
pub struct InboundDelivery<T> {
    /// The delivered batch elements, in order.
    pub payload: Vec<T>,
    /// An `ack_batch` to send upstream, if the low watermark or the forced
    /// interval triggered one.
    pub ack: Option<AckBatch>,
}

/// Per-source state on the receiving side of a stream (§3 "Inbound path").
pub struct InboundPath<A, T> {
    /// Peer actor address (weak with respect to the peer's lifetime).
    pub peer: A,
    /// (peer-sender, self-receiver).
    pub slots: StreamSlots,
    /// Controller-assigned desired batch size.
    pub desired_batch_size: i32,
    /// Remaining credit the sink is willing to accept.
    pub assigned_credit: i32,
    /// Controller-assigned cap on `assigned_credit`.
    pub max_credit: i32,
    /// Batches remaining until the next `controller.calibrate()`.
    pub calibration_countdown: u32,
    /// Monotonic id of the last batch received.
    pub last_batch_id: i64,
    /// Monotonic id of the last batch acked.
    pub last_acked_batch_id: i64,
    /// When the last ack was sent.
    pub last_ack_time: Instant,
    /// Informational scheduling priority.
    pub priority: StreamPriority,
    controller: Box<dyn CreditController<T>>,
}

impl<A, T> InboundPath<A, T> {
    /// Opens a new inbound path, seeding its initial credit grant from
    /// `controller.init()`. Grounded on resolving the tension between
    /// §4.C ("the sink calls init() once on the first batch") and §4.I's
    /// requirement that `ack_open` already carry an initial credit grant:
    /// `init()` runs here, at path-open time, and its calibration becomes
    /// the credit offered in the handshake's `ack_open`.
    pub fn open(
        clock: &impl Clock,
        peer: A,
        slots: StreamSlots,
        priority: StreamPriority,
        mut controller: Box<dyn CreditController<T>>,
    ) -> Self {
        let cal = controller.init();
        InboundPath {
            peer,
            slots,
            desired_batch_size: cal.batch_size,
            assigned_credit: cal.max_credit,
            max_credit: cal.max_credit,
            calibration_countdown: cal.next_calibration,
            last_batch_id: 0,
            last_acked_batch_id: 0,
            last_ack_time: clock.now(),
            priority,
            controller,
        }
    }

    /// Returns `true` iff every received batch has been acked.
    #[must_use]
    pub fn up_to_date(&self) -> bool {
        self.last_acked_batch_id == self.last_batch_id
    }

    /// Remaining credit available to the source on this path.
    #[must_use]
    pub fn available_credit(&self) -> i32 {
        self.assigned_credit
    }

    /// Handles a received batch (§4.C "On batch received").
    ///
    /// Returns `Err(Error::UnexpectedMessage)` if `id` is not the expected
    /// next id; per §9's resolution of the out-of-order question, callers
    /// (the WDRR drain loop) are expected to log and drop this error
    /// rather than tear the path down.
    pub fn on_batch(
        &mut self,
        clock: &impl Clock,
        id: i64,
        size: i32,
        payload: Vec<T>,
    ) -> Result<InboundDelivery<T>, Error> {
        let expected = self.last_batch_id + 1;
        if id != expected {
            warn!(
                slot = %self.slots.receiver,
                expected, got = id, "dropping out-of-order batch"
            );
            return Err(Error::UnexpectedMessage {
                slot: self.slots.receiver,
                detail: format!("expected batch id {expected}, got {id}"),
            });
        }
        self.last_batch_id = id;
        self.assigned_credit -= size;
        let batch = Batch { size, payload, id };
        self.controller.before_processing(&batch);

        self.calibration_countdown = self.calibration_countdown.saturating_sub(1);
        if self.calibration_countdown == 0 {
            let cal = self.controller.calibrate();
            self.max_credit = cal.max_credit;
            self.desired_batch_size = cal.batch_size;
            self.calibration_countdown = cal.next_calibration;
        }

        let low_watermark = self.max_credit / 2;
        let ack = if self.assigned_credit <= low_watermark {
            Some(self.force_ack(clock))
        } else {
            None
        };

        Ok(InboundDelivery {
            payload: batch.payload,
            ack,
        })
    }

    /// Emits an `ack_batch` unconditionally, used both by the low-watermark
    /// path in [`Self::on_batch`] and by [`Self::tick`].
    fn force_ack(&mut self, clock: &impl Clock) -> AckBatch {
        let new_capacity = self.max_credit - self.assigned_credit;
        self.assigned_credit += new_capacity;
        self.last_acked_batch_id = self.last_batch_id;
        self.last_ack_time = clock.now();
        AckBatch {
            new_capacity,
            desired_batch_size: self.desired_batch_size.max(1),
            acknowledged_id: self.last_batch_id,
        }
    }

    /// Periodic hook (§4.L credit cycle / §4.C tick): if the path is not
    /// up to date and `max_batch_delay` has elapsed since the last ack,
    /// forces one so the source can make progress under low traffic.
    pub fn tick(&mut self, clock: &impl Clock, max_batch_delay: Duration) -> Option<AckBatch> {
        if self.up_to_date() {
            return None;
        }
        if clock.now().duration_since(self.last_ack_time) >= max_batch_delay {
            Some(self.force_ack(clock))
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::TestClock;
    use crate::credit::TokenBasedCreditController;

    fn path(clock: &TestClock) -> InboundPath<u8, &'static str> {
        InboundPath::open(
            clock,
            1,
            StreamSlots::new(crate::slot::Slot::new(1), crate::slot::Slot::new(2)),
            StreamPriority::Normal,
            Box::new(TokenBasedCreditController::new()),
        )
    }

    #[test]
    fn rejects_out_of_order_batches() {
        let clock = TestClock::new();
        let mut p = path(&clock);
        let err = p.on_batch(&clock, 2, 1, vec!["x"]).unwrap_err();
        assert!(matches!(err, Error::UnexpectedMessage { .. }));
    }

    #[test]
    fn accepts_in_order_and_decrements_credit() {
        let clock = TestClock::new();
        let mut p = path(&clock);
        let before = p.assigned_credit;
        let delivery = p.on_batch(&clock, 1, 1, vec!["x"]).unwrap();
        assert_eq!(delivery.payload, vec!["x"]);
        assert!(p.assigned_credit <= before);
        assert_eq!(p.last_batch_id, 1);
    }

    #[test]
    fn low_watermark_triggers_ack_and_replenishes_credit() {
        let clock = TestClock::new();
        let mut p = path(&clock);
        p.assigned_credit = 1;
        p.max_credit = 10;
        let delivery = p.on_batch(&clock, 1, 1, vec!["x"]).unwrap();
        let ack = delivery.ack.expect("low watermark should force an ack");
        assert_eq!(ack.acknowledged_id, 1);
        assert_eq!(p.assigned_credit, p.max_credit);
        assert!(p.up_to_date());
    }

    #[test]
    fn tick_is_noop_when_up_to_date() {
        let clock = TestClock::new();
        let mut p = path(&clock);
        assert!(p.tick(&clock, Duration::from_millis(1)).is_none());
    }

    #[test]
    fn tick_forces_ack_after_delay_when_behind() {
        let clock = TestClock::new();
        let mut p = path(&clock);
        p.max_credit = 10;
        p.assigned_credit = 10;
        let _ = p.on_batch(&clock, 1, 9, vec!["x"]).unwrap();
        assert!(!p.up_to_date());
        assert!(p.tick(&clock, Duration::from_millis(100)).is_none());
        clock.advance(Duration::from_millis(150));
        let ack = p.tick(&clock, Duration::from_millis(100));
        assert!(ack.is_some());
        assert!(p.up_to_date());
    }
}
