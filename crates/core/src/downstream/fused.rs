// SPDX-License-Identifier: Apache-2.0

//! Fused downstream manager (§4.H): fans operations out across a fixed set
//! of nested managers, each potentially carrying a different element type.
//!
//! The reference implementation holds nested managers in a `std::tuple` and
//! dispatches through a raw pointer array; here each nested manager is
//! erased behind `Rc<RefCell<dyn ErasedDownstreamManager<A>>>`. The caller
//! keeps its own concretely-typed `Rc<RefCell<ConcreteManager<A, T>>>`
//! handle (the same allocation, unsized-coerced into the trait object given
//! to [`FusedDownstreamManager::add_nested`]) for the element-typed
//! operations `push`/`add_path`/`path`, so no downcasting is ever needed.

use super::ErasedDownstreamManager;
use crate::error::Error;
use crate::slot::Slot;
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

/// A downstream manager that delegates every operation to a fixed roster of
/// nested managers, keyed by which nested manager owns which slot.
pub struct FusedDownstreamManager<A> {
    nested: Vec<Rc<RefCell<dyn ErasedDownstreamManager<A>>>>,
    /// slot -> index into `nested`, populated by [`Self::assign`].
    paths: HashMap<Slot, usize>,
    /// Paths registered (via [`Self::insert_unassigned`]) before the
    /// element type carried by their handshake is known, mirroring the
    /// reference implementation's `unassigned_paths_`.
    unassigned: HashMap<Slot, A>,
}

impl<A> Default for FusedDownstreamManager<A> {
    fn default() -> Self {
        FusedDownstreamManager {
            nested: Vec::new(),
            paths: HashMap::new(),
            unassigned: HashMap::new(),
        }
    }
}

impl<A> FusedDownstreamManager<A> {
    /// Creates an empty fused manager with no nested managers registered.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a nested manager, returning the index later passed to
    /// [`Self::assign`].
    pub fn add_nested(&mut self, manager: Rc<RefCell<dyn ErasedDownstreamManager<A>>>) -> usize {
        self.nested.push(manager);
        self.nested.len() - 1
    }

    /// Records a path whose nested manager is not yet known, typically
    /// because the handshake carrying its element type has not completed.
    pub fn insert_unassigned(&mut self, slot: Slot, peer: A) {
        let _ = self.unassigned.insert(slot, peer);
    }

    /// Moves the pending path at `slot` under the nested manager at
    /// `nested_index`. The caller must already have called
    /// [`super::DownstreamManager::add_path`] on that concrete nested
    /// manager directly (through its typed handle) before calling this;
    /// `assign` only records the fan-out association.
    pub fn assign(&mut self, slot: Slot, nested_index: usize) -> bool {
        if nested_index >= self.nested.len() {
            return false;
        }
        if self.unassigned.remove(&slot).is_none() {
            return false;
        }
        let _ = self.paths.insert(slot, nested_index);
        true
    }

    fn owner_of(&self, slot: Slot) -> Option<&Rc<RefCell<dyn ErasedDownstreamManager<A>>>> {
        self.paths.get(&slot).map(|idx| &self.nested[*idx])
    }
}

impl<A> ErasedDownstreamManager<A> for FusedDownstreamManager<A> {
    fn remove_path(&mut self, slot: Slot, reason: Option<Rc<Error>>, silent: bool) -> bool {
        match self.paths.remove(&slot) {
            Some(idx) => self.nested[idx].borrow_mut().remove_path(slot, reason, silent),
            None => false,
        }
    }

    fn path_slots(&self) -> Vec<Slot> {
        self.paths.keys().copied().collect()
    }

    fn open_path_slots(&self) -> Vec<Slot> {
        // The erased interface has no per-slot "is this path closing?"
        // query (only concrete, element-typed managers expose that via
        // `OutboundPath::is_closing`), matching the reference
        // `downstream_manager` base class. Every assigned slot is reported
        // as open.
        self.path_slots()
    }

    fn emit_batches(&mut self) -> Result<usize, Error> {
        let mut total = 0usize;
        for nested in &self.nested {
            total += nested.borrow_mut().emit_batches()?;
        }
        Ok(total)
    }

    fn force_emit_batches(&mut self) -> Result<usize, Error> {
        let mut total = 0usize;
        for nested in &self.nested {
            total += nested.borrow_mut().force_emit_batches()?;
        }
        Ok(total)
    }

    fn capacity(&self) -> i32 {
        self.nested.iter().map(|n| n.borrow().capacity()).min().unwrap_or(0)
    }

    fn buffered(&self) -> usize {
        self.nested.iter().map(|n| n.borrow().buffered()).max().unwrap_or(0)
    }

    fn buffered_at(&self, slot: Slot) -> usize {
        self.owner_of(slot).map_or(0, |n| n.borrow().buffered_at(slot))
    }

    fn min_credit(&self) -> i32 {
        self.nested.iter().map(|n| n.borrow().min_credit()).min().unwrap_or(0)
    }

    fn max_credit(&self) -> i32 {
        self.nested.iter().map(|n| n.borrow().max_credit()).max().unwrap_or(0)
    }

    fn total_credit(&self) -> i32 {
        self.nested.iter().map(|n| n.borrow().total_credit()).sum()
    }

    fn max_capacity(&self) -> i32 {
        self.nested
            .iter()
            .map(|n| n.borrow().max_capacity())
            .min()
            .unwrap_or(i32::MAX)
    }

    fn clean(&self) -> bool {
        self.nested.iter().all(|n| n.borrow().clean())
    }

    fn clean_at(&self, slot: Slot) -> bool {
        self.owner_of(slot).is_none_or(|n| n.borrow().clean_at(slot))
    }

    fn terminal(&self) -> bool {
        // Mirrors the reference implementation: a fused manager is never
        // terminal on its own behalf, only its nested managers are.
        false
    }

    fn close_all(&mut self) {
        for nested in &self.nested {
            nested.borrow_mut().close_all();
        }
        self.paths.clear();
    }

    fn close_one(&mut self, slot: Slot) {
        if let Some(owner) = self.owner_of(slot) {
            owner.borrow_mut().close_one(slot);
        }
    }

    fn abort(&mut self, reason: Rc<Error>) {
        for nested in &self.nested {
            nested.borrow_mut().abort(reason.clone());
        }
        self.paths.clear();
        self.unassigned.clear();
    }

    fn clear_paths(&mut self) {
        for nested in &self.nested {
            nested.borrow_mut().clear_paths();
        }
        self.paths.clear();
        self.unassigned.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::downstream::broadcast::BroadcastDownstreamManager;
    use crate::downstream::DownstreamManager;
    use crate::iface::DownstreamSink;
    use crate::control::DownstreamMsg;

    struct NullSink;
    impl DownstreamSink<u8, i32> for NullSink {
        fn send(&self, _target: &u8, _msg: DownstreamMsg<u8, i32>) -> Result<(), Error> {
            Ok(())
        }
    }
    impl DownstreamSink<u8, &'static str> for NullSink {
        fn send(&self, _target: &u8, _msg: DownstreamMsg<u8, &'static str>) -> Result<(), Error> {
            Ok(())
        }
    }

    #[test]
    fn assign_requires_prior_unassigned_registration() {
        let mut fused: FusedDownstreamManager<u8> = FusedDownstreamManager::new();
        let ints: Rc<RefCell<BroadcastDownstreamManager<u8, i32>>> =
            Rc::new(RefCell::new(BroadcastDownstreamManager::new(0u8, Rc::new(NullSink))));
        let idx = fused.add_nested(ints.clone() as Rc<RefCell<dyn ErasedDownstreamManager<u8>>>);
        assert!(!fused.assign(Slot::new(1), idx));

        fused.insert_unassigned(Slot::new(1), 9u8);
        assert!(ints.borrow_mut().add_path(Slot::new(1), 9u8));
        assert!(fused.assign(Slot::new(1), idx));
        assert_eq!(fused.path_slots(), vec![Slot::new(1)]);
    }

    #[test]
    fn fans_out_across_differently_typed_nested_managers() {
        let mut fused: FusedDownstreamManager<u8> = FusedDownstreamManager::new();
        let ints: Rc<RefCell<BroadcastDownstreamManager<u8, i32>>> =
            Rc::new(RefCell::new(BroadcastDownstreamManager::new(0u8, Rc::new(NullSink))));
        let strs: Rc<RefCell<BroadcastDownstreamManager<u8, &'static str>>> =
            Rc::new(RefCell::new(BroadcastDownstreamManager::new(0u8, Rc::new(NullSink))));
        let int_idx = fused.add_nested(ints.clone() as Rc<RefCell<dyn ErasedDownstreamManager<u8>>>);
        let str_idx = fused.add_nested(strs.clone() as Rc<RefCell<dyn ErasedDownstreamManager<u8>>>);

        assert!(ints.borrow_mut().add_path(Slot::new(1), 9u8));
        fused.insert_unassigned(Slot::new(1), 9u8);
        assert!(fused.assign(Slot::new(1), int_idx));

        assert!(strs.borrow_mut().add_path(Slot::new(2), 9u8));
        fused.insert_unassigned(Slot::new(2), 9u8);
        assert!(fused.assign(Slot::new(2), str_idx));

        assert_eq!(fused.num_paths(), 2);
        assert!(!fused.terminal());
        let _ = fused.emit_batches().unwrap();
    }
}
