// SPDX-License-Identifier: Apache-2.0

//! Weighted deficit round-robin queue policy for downstream messages
//! (§4.J), grounded on `policy::downstream_messages`'s dynamic,
//! per-slot-keyed multiplexed queue.
//!
//! A sink's mailbox holds one FIFO sub-queue per inbound slot. Every round
//! visits each enabled sub-queue, grants it a quantum proportional to its
//! path's desired batch size, and drains whole messages while their task
//! size fits the accumulated deficit. This weights fairness by batch size,
//! lets a congested slot's sub-queue be skipped without stalling the
//! others, and preserves per-slot arrival order.

use crate::control::DownstreamMsg;
use crate::slot::Slot;
use std::collections::{HashMap, VecDeque};

struct SubQueue<Msg> {
    items: VecDeque<Msg>,
    deficit: i64,
    desired_batch_size: i32,
}

/// A dynamic, per-slot WDRR multiplexer over [`DownstreamMsg`] values.
pub struct DownstreamMessageQueue<A, T> {
    sub_queues: HashMap<Slot, SubQueue<DownstreamMsg<A, T>>>,
    /// Round-robin visiting order; insertion order, stable across rounds.
    order: Vec<Slot>,
}

impl<A, T> Default for DownstreamMessageQueue<A, T> {
    fn default() -> Self {
        DownstreamMessageQueue {
            sub_queues: HashMap::new(),
            order: Vec::new(),
        }
    }
}

impl<A, T> DownstreamMessageQueue<A, T> {
    /// Creates an empty queue with no registered slots.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers (or re-registers) a sub-queue for `slot`, used when an
    /// inbound path is opened.
    pub fn register_slot(&mut self, slot: Slot, desired_batch_size: i32) {
        if !self.sub_queues.contains_key(&slot) {
            self.order.push(slot);
        }
        let _ = self
            .sub_queues
            .entry(slot)
            .and_modify(|q| q.desired_batch_size = desired_batch_size.max(1))
            .or_insert_with(|| SubQueue {
                items: VecDeque::new(),
                deficit: 0,
                desired_batch_size: desired_batch_size.max(1),
            });
    }

    /// Removes `slot`'s sub-queue and drops any messages still buffered in
    /// it, used when an inbound path is torn down.
    pub fn unregister_slot(&mut self, slot: Slot) {
        let _ = self.sub_queues.remove(&slot);
        self.order.retain(|s| *s != slot);
    }

    /// Updates the desired batch size used to compute `slot`'s quantum,
    /// following a credit-controller recalibration.
    pub fn set_desired_batch_size(&mut self, slot: Slot, desired_batch_size: i32) {
        if let Some(q) = self.sub_queues.get_mut(&slot) {
            q.desired_batch_size = desired_batch_size.max(1);
        }
    }

    /// Enqueues `msg`, keyed by `id_of(msg) = msg.slots().receiver`. Lazily
    /// registers the slot (with a desired batch size of `1`) if it has not
    /// been registered yet.
    pub fn enqueue(&mut self, msg: DownstreamMsg<A, T>) {
        let slot = msg.slots().receiver;
        self.register_slot(slot, 1);
        self.sub_queues.get_mut(&slot).expect("just registered").items.push_back(msg);
    }

    /// Sum of `task_size` over every message currently buffered for
    /// `slot`, used by the credit cycle as `base_size`.
    #[must_use]
    pub fn total_task_size(&self, slot: Slot) -> i32 {
        self.sub_queues
            .get(&slot)
            .map_or(0, |q| q.items.iter().map(DownstreamMsg::task_size).sum())
    }

    /// True iff `slot` has no buffered messages.
    #[must_use]
    pub fn is_empty_at(&self, slot: Slot) -> bool {
        self.sub_queues.get(&slot).is_none_or(|q| q.items.is_empty())
    }

    /// Runs one WDRR round: every registered slot for which `is_enabled`
    /// holds is granted `quantum(q, base) = base * q.desired_batch_size`
    /// deficit, then drained (FIFO, whole messages only) while the next
    /// message's task size still fits the remaining deficit.
    pub fn drain_round(&mut self, base_quantum: i32, is_enabled: &dyn Fn(Slot) -> bool) -> Vec<DownstreamMsg<A, T>> {
        let mut drained = Vec::new();
        for slot in self.order.clone() {
            if !is_enabled(slot) {
                continue;
            }
            let Some(q) = self.sub_queues.get_mut(&slot) else {
                continue;
            };
            if q.items.is_empty() {
                continue;
            }
            q.deficit += i64::from(base_quantum) * i64::from(q.desired_batch_size);
            while let Some(front) = q.items.front() {
                let size = i64::from(front.task_size());
                if size > q.deficit {
                    break;
                }
                q.deficit -= size;
                drained.push(q.items.pop_front().expect("front just peeked"));
            }
            if q.items.is_empty() {
                q.deficit = 0;
            }
        }
        drained
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::slot::StreamSlots;

    fn batch(receiver: Slot, size: i32) -> DownstreamMsg<u8, i32> {
        DownstreamMsg::Batch {
            slots: StreamSlots::new(Slot::new(9), receiver),
            sender: 9,
            batch: crate::control::Batch {
                size,
                payload: vec![0; size as usize],
                id: 1,
            },
        }
    }

    #[test]
    fn heavier_desired_batch_size_drains_more_per_round() {
        let mut q: DownstreamMessageQueue<u8, i32> = DownstreamMessageQueue::new();
        q.register_slot(Slot::new(1), 1);
        q.register_slot(Slot::new(2), 4);
        for _ in 0..10 {
            q.enqueue(batch(Slot::new(1), 1));
            q.enqueue(batch(Slot::new(2), 1));
        }
        let drained = q.drain_round(1, &|_| true);
        let slot1 = drained.iter().filter(|m| m.slots().receiver == Slot::new(1)).count();
        let slot2 = drained.iter().filter(|m| m.slots().receiver == Slot::new(2)).count();
        assert!(slot2 > slot1);
    }

    #[test]
    fn disabled_slot_is_skipped() {
        let mut q: DownstreamMessageQueue<u8, i32> = DownstreamMessageQueue::new();
        q.register_slot(Slot::new(1), 1);
        q.enqueue(batch(Slot::new(1), 1));
        let drained = q.drain_round(10, &|_| false);
        assert!(drained.is_empty());
        assert_eq!(q.total_task_size(Slot::new(1)), 1);
    }

    #[test]
    fn preserves_fifo_order_within_a_slot() {
        let mut q: DownstreamMessageQueue<u8, i32> = DownstreamMessageQueue::new();
        q.register_slot(Slot::new(1), 1);
        q.enqueue(batch(Slot::new(1), 1));
        q.enqueue(batch(Slot::new(1), 1));
        q.enqueue(batch(Slot::new(1), 1));
        let drained = q.drain_round(10, &|_| true);
        let ids: Vec<i64> = drained
            .iter()
            .map(|m| match m {
                DownstreamMsg::Batch { batch, .. } => batch.id,
                _ => unreachable!(),
            })
            .collect();
        assert_eq!(ids.len(), 3);
    }

    #[test]
    fn unregistering_drops_buffered_messages() {
        let mut q: DownstreamMessageQueue<u8, i32> = DownstreamMessageQueue::new();
        q.register_slot(Slot::new(1), 1);
        q.enqueue(batch(Slot::new(1), 1));
        q.unregister_slot(Slot::new(1));
        assert_eq!(q.total_task_size(Slot::new(1)), 0);
        let drained = q.drain_round(10, &|_| true);
        assert!(drained.is_empty());
    }
}
