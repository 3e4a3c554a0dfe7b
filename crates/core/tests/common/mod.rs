// SPDX-License-Identifier: Apache-2.0

//! Shared test-only wiring for the end-to-end pipeline scenarios (spec §8):
//! a [`RoutingSink`] that fans [`DownstreamMsg`]s out to per-actor inboxes,
//! so a test can drive several [`StreamManager`]s by hand without a real
//! scheduler, the same way `manager.rs`'s unit tests drive a single one
//! with a `RecordingSink`.

use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::marker::PhantomData;
use std::rc::Rc;
use streamrt_core::control::{Batch, DownstreamMsg, UpstreamMsg};
use streamrt_core::credit::{Calibration, CreditController};
use streamrt_core::error::Error;
use streamrt_core::iface::{DownstreamSink, UpstreamSink};

/// One actor's downstream mailbox: every [`DownstreamMsg`] addressed to it,
/// in arrival order.
pub type Inbox<T> = Rc<RefCell<VecDeque<DownstreamMsg<u8, T>>>>;

/// One actor's upstream mailbox: every [`UpstreamMsg`] addressed to it, in
/// arrival order.
pub type UpstreamInbox = Rc<RefCell<VecDeque<UpstreamMsg<u8>>>>;

/// Routes [`DownstreamMsg`]s and [`UpstreamMsg`]s to whichever actor's
/// inbox is registered under the target address. One instance is shared by
/// every manager in a test pipeline, playing both the downstream sink and
/// the upstream sink role.
pub struct RoutingSink<T> {
    inboxes: RefCell<HashMap<u8, Inbox<T>>>,
    upstream_inboxes: RefCell<HashMap<u8, UpstreamInbox>>,
}

impl<T> Default for RoutingSink<T> {
    fn default() -> Self {
        RoutingSink {
            inboxes: RefCell::new(HashMap::new()),
            upstream_inboxes: RefCell::new(HashMap::new()),
        }
    }
}

impl<T> RoutingSink<T> {
    /// Creates a sink with no registered actors.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `addr`'s downstream inbox, creating it if this is its
    /// first mention.
    pub fn register(&self, addr: u8) -> Inbox<T> {
        self.inboxes
            .borrow_mut()
            .entry(addr)
            .or_insert_with(|| Rc::new(RefCell::new(VecDeque::new())))
            .clone()
    }

    /// Registers `addr`'s upstream inbox, creating it if this is its first
    /// mention.
    pub fn register_upstream(&self, addr: u8) -> UpstreamInbox {
        self.upstream_inboxes
            .borrow_mut()
            .entry(addr)
            .or_insert_with(|| Rc::new(RefCell::new(VecDeque::new())))
            .clone()
    }
}

impl<T> DownstreamSink<u8, T> for RoutingSink<T> {
    fn send(&self, target: &u8, msg: DownstreamMsg<u8, T>) -> Result<(), Error> {
        let inbox = self.register(*target);
        inbox.borrow_mut().push_back(msg);
        Ok(())
    }
}

impl<T> UpstreamSink<u8> for RoutingSink<T> {
    fn send(&self, target: &u8, msg: UpstreamMsg<u8>) -> Result<(), Error> {
        let inbox = self.register_upstream(*target);
        inbox.borrow_mut().push_back(msg);
        Ok(())
    }
}

/// A [`CreditController`] that grants a constant calibration forever. Used
/// in place of [`streamrt_core::credit::TokenBasedCreditController`] when a
/// test wants exact, hand-computable credit/batch numbers instead of the
/// token controller's fixed startup constants.
pub struct FixedCreditController<T> {
    max_credit: i32,
    batch_size: i32,
    _marker: PhantomData<fn(&T)>,
}

impl<T> FixedCreditController<T> {
    /// Creates a controller that always grants `max_credit` with
    /// `batch_size`, and never recalibrates.
    #[must_use]
    pub fn new(max_credit: i32, batch_size: i32) -> Self {
        FixedCreditController {
            max_credit,
            batch_size,
            _marker: PhantomData,
        }
    }
}

impl<T> CreditController<T> for FixedCreditController<T> {
    fn before_processing(&mut self, _batch: &Batch<T>) {}

    fn init(&mut self) -> Calibration {
        Calibration {
            max_credit: self.max_credit,
            batch_size: self.batch_size,
            next_calibration: u32::MAX,
        }
    }

    fn calibrate(&mut self) -> Calibration {
        self.init()
    }
}
