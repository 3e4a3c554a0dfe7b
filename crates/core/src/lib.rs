// SPDX-License-Identifier: Apache-2.0

//! A credit-based, single-threaded streaming runtime: backpressure,
//! batching, multi-path fan-out, and failure propagation for actors that
//! move bounded batches of elements across paths identified by
//! (sender-slot, receiver-slot) pairs.
//!
//! Every type here assumes it is owned and mutated by exactly one actor
//! (§5 "Concurrency & Resource Model"): state is plain `Rc<RefCell<_>>`
//! where sharing is needed, never `Arc<Mutex<_>>`, and cross-actor
//! coordination happens exclusively through the control-message
//! vocabulary of [`control`], dispatched via the narrow [`iface`]
//! capabilities.

pub mod aborter;
pub mod clock;
pub mod config;
pub mod control;
pub mod credit;
pub mod downstream;
pub mod error;
pub mod iface;
pub mod inbound;
pub mod manager;
pub mod metrics;
pub mod outbound;
pub mod queue;
pub mod slot;
pub mod tick;

#[cfg(any(test, feature = "testing"))]
pub mod testing;
