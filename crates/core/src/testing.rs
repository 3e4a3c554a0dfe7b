// SPDX-License-Identifier: Apache-2.0

//! Common testing utilities shared across the streaming core's unit and
//! integration tests: a single-threaded runtime helper, a `tracing`
//! subscriber installer, and [`streamrt_channel::mpsc`]-backed
//! implementations of [`DownstreamSink`]/[`UpstreamSink`].

use crate::control::{DownstreamMsg, UpstreamMsg};
use crate::error::Error;
use crate::iface::{DownstreamSink, UpstreamSink};
use std::cell::RefCell;
use std::collections::HashMap;
use std::hash::Hash;
use streamrt_channel::mpsc;
use tokio::runtime::Builder;
use tokio::task::LocalSet;

/// Installs a `tracing` subscriber that writes to the test harness's
/// captured output, so `warn!`/`error!`/`debug!` events emitted by the
/// manager and path state machines show up in failed-test output. Safe to
/// call from every test; only the first call in a process wins.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

/// Builds a current-thread runtime paired with a [`LocalSet`], matching
/// the rest of the crate's non-`Send` types (`Rc<RefCell<_>>`).
#[must_use]
pub fn setup_test_runtime() -> (tokio::runtime::Runtime, LocalSet) {
    init_tracing();
    let rt = Builder::new_current_thread().enable_all().build().expect("build test runtime");
    let local = LocalSet::new();
    (rt, local)
}

/// Routes [`DownstreamMsg`] values to per-peer [`streamrt_channel::mpsc::Sender`]s,
/// registered by address, for use as a [`DownstreamSink`] in tests.
pub struct ChannelSink<A, T> {
    routes: RefCell<HashMap<A, mpsc::Sender<DownstreamMsg<A, T>>>>,
}

impl<A, T> Default for ChannelSink<A, T> {
    fn default() -> Self {
        ChannelSink { routes: RefCell::new(HashMap::new()) }
    }
}

impl<A, T> ChannelSink<A, T>
where
    A: Clone + Eq + Hash,
{
    /// Creates a sink with no registered routes.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `peer`'s mailbox. A [`Self::send`] to an unregistered
    /// peer fails with [`Error::ChannelClosed`].
    pub fn register(&self, peer: A, sender: mpsc::Sender<DownstreamMsg<A, T>>) {
        let _ = self.routes.borrow_mut().insert(peer, sender);
    }
}

impl<A, T> DownstreamSink<A, T> for ChannelSink<A, T>
where
    A: Clone + Eq + Hash,
{
    fn send(&self, target: &A, msg: DownstreamMsg<A, T>) -> Result<(), Error> {
        let routes = self.routes.borrow();
        let sender = routes.get(target).ok_or(Error::ChannelClosed)?;
        Ok(sender.send(msg)?)
    }
}

/// Routes [`UpstreamMsg`] values to per-peer mailboxes, for use as an
/// [`UpstreamSink`] in tests.
pub struct ChannelUpstreamSink<A> {
    routes: RefCell<HashMap<A, mpsc::Sender<UpstreamMsg<A>>>>,
}

impl<A> Default for ChannelUpstreamSink<A> {
    fn default() -> Self {
        ChannelUpstreamSink { routes: RefCell::new(HashMap::new()) }
    }
}

impl<A> ChannelUpstreamSink<A>
where
    A: Clone + Eq + Hash,
{
    /// Creates a sink with no registered routes.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `peer`'s mailbox.
    pub fn register(&self, peer: A, sender: mpsc::Sender<UpstreamMsg<A>>) {
        let _ = self.routes.borrow_mut().insert(peer, sender);
    }
}

impl<A> UpstreamSink<A> for ChannelUpstreamSink<A>
where
    A: Clone + Eq + Hash,
{
    fn send(&self, target: &A, msg: UpstreamMsg<A>) -> Result<(), Error> {
        let routes = self.routes.borrow();
        let sender = routes.get(target).ok_or(Error::ChannelClosed)?;
        Ok(sender.send(msg)?)
    }
}
