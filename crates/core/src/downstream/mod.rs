// SPDX-License-Identifier: Apache-2.0

//! Downstream manager abstraction (§4.F): owns a set of outbound paths and
//! is responsible for buffering, chunking, emitting, and closing them.
//!
//! The hierarchy is modeled as a trait rather than a class hierarchy, per
//! the design notes (§9): [`ErasedDownstreamManager`] carries every
//! operation that does not need to know the stream's element type, so a
//! [`crate::downstream::fused::FusedDownstreamManager`] can hold a
//! heterogeneous `Vec<Box<dyn ErasedDownstreamManager<A>>>` without type
//! erasure on the hot (`push`) path. [`DownstreamManager`] adds the
//! element-typed operations on top.

pub mod broadcast;
pub mod fused;

use crate::error::Error;
use crate::outbound::OutboundPath;
use crate::slot::Slot;
use std::rc::Rc;

/// Selects how [`DownstreamManager::check_paths`] combines per-path
/// predicate results, mirroring the reference implementation's
/// `all_paths`/`any_path`/`no_path` family.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PathAlgorithm {
    /// Every path must satisfy the predicate.
    AllOf,
    /// At least one path must satisfy the predicate.
    AnyOf,
    /// No path may satisfy the predicate.
    NoneOf,
}

/// Operations on a downstream manager that do not depend on the stream's
/// element type. This is the interface a
/// [`fused::FusedDownstreamManager`] fans out across its nested managers.
pub trait ErasedDownstreamManager<A> {
    /// Removes the path at `slot`. If `silent` is false, emits `close` (no
    /// reason) or `forced_close(reason)` as appropriate. Returns whether a
    /// path was actually removed.
    fn remove_path(&mut self, slot: Slot, reason: Option<Rc<Error>>, silent: bool) -> bool;

    /// All path slots, open or closing.
    fn path_slots(&self) -> Vec<Slot>;

    /// Path slots excluding those marked closing.
    fn open_path_slots(&self) -> Vec<Slot>;

    /// Number of paths, open or closing.
    fn num_paths(&self) -> usize {
        self.path_slots().len()
    }

    /// Whether there are no paths at all.
    fn empty(&self) -> bool {
        self.num_paths() == 0
    }

    /// Opportunistic ship: full batches on non-closing paths, forced
    /// partial emission on closing paths (§4.F/G "emit_batches").
    fn emit_batches(&mut self) -> Result<usize, Error>;

    /// Ships any remaining buffered content even below the desired batch
    /// size, used by the periodic tick's force-batch cycle.
    fn force_emit_batches(&mut self) -> Result<usize, Error>;

    /// Room left to push into the central buffer right now.
    fn capacity(&self) -> i32;

    /// Total buffered element count across the central buffer and every
    /// per-path cache.
    fn buffered(&self) -> usize;

    /// Buffered element count attributable to one path.
    fn buffered_at(&self, slot: Slot) -> usize;

    /// Minimum open credit across all non-closing paths (0 if none).
    fn min_credit(&self) -> i32;

    /// Maximum open credit across all non-closing paths (0 if none).
    fn max_credit(&self) -> i32;

    /// Sum of open credit across all non-closing paths.
    fn total_credit(&self) -> i32;

    /// Minimum per-path capacity ceiling across acked paths, used to bound
    /// buffer growth on the source side.
    fn max_capacity(&self) -> i32;

    /// True when no non-closing path has any credit left to spend.
    fn stalled(&self) -> bool {
        self.capacity() == 0
    }

    /// True when every path is clean (all emitted batches acked).
    fn clean(&self) -> bool;

    /// True when the path at `slot` is clean, or the slot does not exist.
    fn clean_at(&self, slot: Slot) -> bool;

    /// True once the manager will never accept new paths again.
    fn terminal(&self) -> bool;

    /// Marks every path as closing.
    fn close_all(&mut self);

    /// Marks one path as closing.
    fn close_one(&mut self, slot: Slot);

    /// Forced close of every path, clearing all state (§9 `abort`
    /// contract): "emit forced_close/forced_drop on every remaining path,
    /// clear every table, and transition to done."
    fn abort(&mut self, reason: Rc<Error>);

    /// Drops every path without emitting anything.
    fn clear_paths(&mut self);
}

/// Element-typed downstream manager operations layered on top of
/// [`ErasedDownstreamManager`].
pub trait DownstreamManager<A, T>: ErasedDownstreamManager<A> {
    /// Creates a pending outbound path to `peer` at `slot`. Returns `false`
    /// if the manager is terminal or the slot is already in use.
    fn add_path(&mut self, slot: Slot, peer: A) -> bool;

    /// Borrows the path at `slot`, if any.
    fn path(&self, slot: Slot) -> Option<&OutboundPath<A, T>>;

    /// Mutably borrows the path at `slot`, if any.
    fn path_mut(&mut self, slot: Slot) -> Option<&mut OutboundPath<A, T>>;

    /// Appends elements to the central buffer. Fails with
    /// `invalid_stream_state` if the manager is [`ErasedDownstreamManager::terminal`].
    fn push(&mut self, items: Vec<T>) -> Result<(), Error>;

    /// Evaluates `predicate` over every path named by `algorithm`.
    fn check_paths(&self, algorithm: PathAlgorithm, predicate: &dyn Fn(&OutboundPath<A, T>) -> bool) -> bool {
        let slots = self.path_slots();
        match algorithm {
            PathAlgorithm::AllOf => slots
                .iter()
                .all(|slot| self.path(*slot).is_some_and(|p| predicate(p))),
            PathAlgorithm::AnyOf => slots
                .iter()
                .any(|slot| self.path(*slot).is_some_and(|p| predicate(p))),
            PathAlgorithm::NoneOf => !slots
                .iter()
                .any(|slot| self.path(*slot).is_some_and(|p| predicate(p))),
        }
    }

    /// True iff `predicate` holds for every path.
    fn all_paths(&self, predicate: &dyn Fn(&OutboundPath<A, T>) -> bool) -> bool {
        self.check_paths(PathAlgorithm::AllOf, predicate)
    }

    /// True iff `predicate` holds for at least one path.
    fn any_path(&self, predicate: &dyn Fn(&OutboundPath<A, T>) -> bool) -> bool {
        self.check_paths(PathAlgorithm::AnyOf, predicate)
    }

    /// True iff `predicate` holds for no path.
    fn no_path(&self, predicate: &dyn Fn(&OutboundPath<A, T>) -> bool) -> bool {
        self.check_paths(PathAlgorithm::NoneOf, predicate)
    }
}
