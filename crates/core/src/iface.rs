// SPDX-License-Identifier: Apache-2.0

//! The narrow capabilities the streaming core consumes from its
//! environment (§6): message dispatch and an opaque payload container.
//! The actor scheduler and mailbox multiplexing that would implement
//! [`MessageSink`] in a real runtime are out of scope for this crate.

use crate::control::{DownstreamMsg, UpstreamMsg};
use crate::error::Error;

/// Best-effort, intra-pair-FIFO delivery of a downstream control message to
/// `target`. Implemented in the reference single-threaded harness by
/// [`crate::testing::ChannelSink`], which wraps a
/// [`streamrt_channel::mpsc::Sender`].
pub trait DownstreamSink<A, T> {
    /// Delivers `msg` to `target`.
    fn send(&self, target: &A, msg: DownstreamMsg<A, T>) -> Result<(), Error>;
}

/// Best-effort, intra-pair-FIFO delivery of an upstream control message to
/// `target`.
pub trait UpstreamSink<A> {
    /// Delivers `msg` to `target`.
    fn send(&self, target: &A, msg: UpstreamMsg<A>) -> Result<(), Error>;
}
