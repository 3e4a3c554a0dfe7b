// SPDX-License-Identifier: Apache-2.0

//! Broadcast downstream manager (§4.G): fans a central buffer out to every
//! non-closing path, limited by the slowest path's credit.

use super::{DownstreamManager, ErasedDownstreamManager};
use crate::error::Error;
use crate::iface::DownstreamSink;
use crate::outbound::OutboundPath;
use crate::slot::{Slot, INVALID_SLOT};
use std::collections::{HashMap, VecDeque};
use std::rc::Rc;

/// An optional per-path selector restricting which elements of a fan-out
/// chunk are copied into that path's cache. Absent means `select_all`.
pub type Filter<T> = Rc<dyn Fn(&T) -> bool>;

struct PathCache<T> {
    filter: Option<Filter<T>>,
    buf: VecDeque<T>,
}

/// Concrete [`DownstreamManager`] that broadcasts every pushed element to
/// all non-closing paths, each buffered and batched independently.
pub struct BroadcastDownstreamManager<A, T> {
    self_addr: A,
    sink: Rc<dyn DownstreamSink<A, T>>,
    central_buf: VecDeque<T>,
    paths: HashMap<Slot, OutboundPath<A, T>>,
    state: HashMap<Slot, PathCache<T>>,
    /// Insertion order, since broadcast fan-out and the end-to-end test
    /// scenarios care about a stable iteration order across paths.
    order: Vec<Slot>,
    terminal: bool,
}

impl<A, T> BroadcastDownstreamManager<A, T>
where
    A: Clone,
    T: Clone,
{
    /// Creates an empty broadcast manager sending on behalf of `self_addr`
    /// through `sink`.
    pub fn new(self_addr: A, sink: Rc<dyn DownstreamSink<A, T>>) -> Self {
        BroadcastDownstreamManager {
            self_addr,
            sink,
            central_buf: VecDeque::new(),
            paths: HashMap::new(),
            state: HashMap::new(),
            order: Vec::new(),
            terminal: false,
        }
    }

    /// Sets (or clears) the per-path selector for `slot`. Elements that do
    /// not match the filter are never copied into that path's cache.
    pub fn set_filter(&mut self, slot: Slot, filter: Option<Filter<T>>) {
        if let Some(entry) = self.state.get_mut(&slot) {
            entry.filter = filter;
        }
    }

    fn emit_one_path(&mut self, slot: Slot, force: bool) -> Result<usize, Error> {
        let shipped = {
            let path = self.paths.get_mut(&slot).ok_or_else(|| Error::InvalidStreamState {
                slot,
                detail: "missing outbound path".into(),
            })?;
            let cache = &mut self
                .state
                .get_mut(&slot)
                .ok_or_else(|| Error::InvalidStreamState {
                    slot,
                    detail: "missing path cache".into(),
                })?
                .buf;
            path.emit_batches(self.sink.as_ref(), &self.self_addr, cache, force)?
        };
        if self.paths.get(&slot).is_some_and(|p| p.is_terminated()) {
            if let Some(path) = self.paths.get_mut(&slot) {
                path.emit_shutdown(self.sink.as_ref(), &self.self_addr, None, false)?;
            }
            let _ = self.paths.remove(&slot);
            let _ = self.state.remove(&slot);
            self.order.retain(|s| *s != slot);
        }
        Ok(shipped)
    }

    /// The chunking algorithm shared by [`ErasedDownstreamManager::emit_batches`]
    /// and [`ErasedDownstreamManager::force_emit_batches`], matching the
    /// reference `broadcast_downstream_manager::emit_batches_impl`:
    ///
    /// 1. `chunk_size` is the minimum, over non-closing paths, of
    ///    `max(0, credit - cache.len())`.
    /// 2. If every path is closing, every path is force-emitted and the
    ///    function returns.
    /// 3. Otherwise a chunk of up to `chunk_size` elements is pulled off
    ///    the head of the central buffer and copied (through each path's
    ///    filter) into every non-closing path's cache.
    /// 4. Every path, closing or not, is then asked to emit.
    fn emit_batches_impl(&mut self, force_underfull: bool) -> Result<usize, Error> {
        if self.paths.is_empty() {
            return Ok(0);
        }

        let mut chunk_size: Option<usize> = None;
        for slot in &self.order {
            let path = &self.paths[slot];
            if path.is_closing() {
                continue;
            }
            let cache_len = self.state[slot].buf.len();
            let avail = (path.open_credit.max(0) as usize).saturating_sub(cache_len);
            chunk_size = Some(match chunk_size {
                None => avail,
                Some(current) => current.min(avail),
            });
        }

        let mut shipped_total = 0usize;
        match chunk_size {
            None => {
                // Every path is closing: always force their remainder out.
                for slot in self.order.clone() {
                    shipped_total += self.emit_one_path(slot, true)?;
                }
            }
            Some(chunk_size) => {
                let take = chunk_size.min(self.central_buf.len());
                let chunk: Vec<T> = self.central_buf.drain(..take).collect();
                if chunk.is_empty() {
                    for slot in self.order.clone() {
                        let closing = self.paths[&slot].is_closing();
                        shipped_total += self.emit_one_path(slot, force_underfull || closing)?;
                    }
                } else {
                    for slot in self.order.clone() {
                        let closing = self.paths[&slot].is_closing();
                        if !closing {
                            let entry = self.state.get_mut(&slot).expect("path state exists");
                            match &entry.filter {
                                None => entry.buf.extend(chunk.iter().cloned()),
                                Some(predicate) => {
                                    entry
                                        .buf
                                        .extend(chunk.iter().filter(|item| predicate(item)).cloned());
                                }
                            }
                        }
                        shipped_total += self.emit_one_path(slot, force_underfull || closing)?;
                    }
                }
            }
        }
        Ok(shipped_total)
    }
}

impl<A, T> ErasedDownstreamManager<A> for BroadcastDownstreamManager<A, T>
where
    A: Clone,
    T: Clone,
{
    fn remove_path(&mut self, slot: Slot, reason: Option<Rc<Error>>, silent: bool) -> bool {
        if let Some(mut path) = self.paths.remove(&slot) {
            let _ = self.state.remove(&slot);
            self.order.retain(|s| *s != slot);
            let _ = path.emit_shutdown(self.sink.as_ref(), &self.self_addr, reason, silent);
            true
        } else {
            false
        }
    }

    fn path_slots(&self) -> Vec<Slot> {
        self.order.clone()
    }

    fn open_path_slots(&self) -> Vec<Slot> {
        self.order
            .iter()
            .filter(|slot| !self.paths[slot].is_closing())
            .copied()
            .collect()
    }

    fn emit_batches(&mut self) -> Result<usize, Error> {
        self.emit_batches_impl(false)
    }

    fn force_emit_batches(&mut self) -> Result<usize, Error> {
        self.emit_batches_impl(true)
    }

    fn capacity(&self) -> i32 {
        self.order
            .iter()
            .filter(|slot| !self.paths[slot].is_closing())
            .map(|slot| {
                let cache_len = self.state[slot].buf.len() as i32;
                (self.paths[slot].open_credit - cache_len).max(0)
            })
            .min()
            .unwrap_or(0)
    }

    fn buffered(&self) -> usize {
        let max_cache = self.state.values().map(|s| s.buf.len()).max().unwrap_or(0);
        self.central_buf.len() + max_cache
    }

    fn buffered_at(&self, slot: Slot) -> usize {
        self.central_buf.len() + self.state.get(&slot).map_or(0, |s| s.buf.len())
    }

    fn min_credit(&self) -> i32 {
        self.paths
            .values()
            .filter(|p| !p.is_closing())
            .map(|p| p.open_credit)
            .min()
            .unwrap_or(0)
    }

    fn max_credit(&self) -> i32 {
        self.paths
            .values()
            .filter(|p| !p.is_closing())
            .map(|p| p.open_credit)
            .max()
            .unwrap_or(0)
    }

    fn total_credit(&self) -> i32 {
        self.paths
            .values()
            .filter(|p| !p.is_closing())
            .map(|p| p.open_credit)
            .sum()
    }

    fn max_capacity(&self) -> i32 {
        self.paths
            .values()
            .filter(|p| !p.pending())
            .map(|p| p.open_credit)
            .min()
            .unwrap_or(i32::MAX)
    }

    fn clean(&self) -> bool {
        self.paths.values().all(|p| p.clean())
    }

    fn clean_at(&self, slot: Slot) -> bool {
        self.paths.get(&slot).is_none_or(|p| p.clean())
    }

    fn terminal(&self) -> bool {
        self.terminal
    }

    fn close_all(&mut self) {
        for path in self.paths.values_mut() {
            path.request_close();
        }
    }

    fn close_one(&mut self, slot: Slot) {
        if let Some(path) = self.paths.get_mut(&slot) {
            path.request_close();
        }
    }

    fn abort(&mut self, reason: Rc<Error>) {
        for slot in self.order.clone() {
            if let Some(mut path) = self.paths.remove(&slot) {
                let _ = path.emit_shutdown(self.sink.as_ref(), &self.self_addr, Some(reason.clone()), false);
            }
        }
        self.state.clear();
        self.order.clear();
        self.terminal = true;
    }

    fn clear_paths(&mut self) {
        self.paths.clear();
        self.state.clear();
        self.order.clear();
    }
}

impl<A, T> DownstreamManager<A, T> for BroadcastDownstreamManager<A, T>
where
    A: Clone,
    T: Clone,
{
    fn add_path(&mut self, slot: Slot, peer: A) -> bool {
        if self.terminal || self.paths.contains_key(&slot) {
            return false;
        }
        let _ = self.paths.insert(slot, OutboundPath::new_pending(slot, peer));
        let _ = self.state.insert(
            slot,
            PathCache {
                filter: None,
                buf: VecDeque::new(),
            },
        );
        self.order.push(slot);
        true
    }

    fn path(&self, slot: Slot) -> Option<&OutboundPath<A, T>> {
        self.paths.get(&slot)
    }

    fn path_mut(&mut self, slot: Slot) -> Option<&mut OutboundPath<A, T>> {
        self.paths.get_mut(&slot)
    }

    fn push(&mut self, items: Vec<T>) -> Result<(), Error> {
        if self.terminal {
            return Err(Error::InvalidStreamState {
                slot: INVALID_SLOT,
                detail: "cannot push into a terminal downstream manager".into(),
            });
        }
        self.central_buf.extend(items);
        Ok(())
    }
}
