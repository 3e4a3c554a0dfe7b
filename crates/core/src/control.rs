// SPDX-License-Identifier: Apache-2.0

//! Upstream and downstream control-message variants (§4.B).
//!
//! `UpstreamMsg` flows from sink to source; `DownstreamMsg` flows from
//! source to sink. Both are tagged unions carrying the path's
//! [`StreamSlots`] and the sending peer's address, matched with
//! pattern matching rather than a visitor, the idiomatic Rust analogue of
//! the reference implementation's `variant<...>` payloads.

use crate::error::Error;
use crate::slot::StreamSlots;
use std::rc::Rc;

/// A contiguous group of stream elements shipped and acked atomically.
///
/// `T` is the stream's element type; the opaque payload container required
/// by §6 ("carrying a vector of T for batches") is realized directly as
/// `Vec<T>`.
#[derive(Debug, Clone)]
pub struct Batch<T> {
    /// Element count the sink must charge against its credit. Always `> 0`.
    pub size: i32,
    /// The batch payload: `size` stream elements, in order.
    pub payload: Vec<T>,
    /// Monotonically increasing batch id, starting at 1 on a given path.
    pub id: i64,
}

/// Finalizes a handshake and grants initial credit (§4.B).
#[derive(Debug, Clone)]
pub struct AckOpen<A> {
    /// The peer address the outbound path was opened against.
    pub rebind_from: A,
    /// The peer address the outbound path should use from now on. Lets a
    /// proxy actor hand off participation to a concrete actor.
    pub rebind_to: A,
    /// Initial credit grant. Nonneg.
    pub initial_demand: i32,
    /// Initial desired batch size. `>= 1`.
    pub desired_batch_size: i32,
}

/// An accumulating acknowledgement of batches up to `acknowledged_id`.
#[derive(Debug, Clone)]
pub struct AckBatch {
    /// Additional credit granted to the source. Nonneg.
    pub new_capacity: i32,
    /// Updated desired batch size. `>= 1`.
    pub desired_batch_size: i32,
    /// Acks every batch id `<= acknowledged_id` on this path.
    pub acknowledged_id: i64,
}

/// Messages flowing from a sink to a source on one path.
#[derive(Debug, Clone)]
pub enum UpstreamMsg<A> {
    /// Finalizes the handshake, granting initial credit.
    AckOpen {
        /// The path this message concerns.
        slots: StreamSlots,
        /// The sending peer's address.
        sender: A,
        /// The handshake payload.
        body: AckOpen<A>,
    },
    /// Accumulatively acks batches and grants more credit.
    AckBatch {
        /// The path this message concerns.
        slots: StreamSlots,
        /// The sending peer's address.
        sender: A,
        /// The ack payload.
        body: AckBatch,
    },
    /// Graceful stop request at the source.
    Drop {
        /// The path this message concerns.
        slots: StreamSlots,
        /// The sending peer's address.
        sender: A,
    },
    /// Abrupt stop at the source.
    ForcedDrop {
        /// The path this message concerns.
        slots: StreamSlots,
        /// The sending peer's address.
        sender: A,
        /// The reason for the abrupt stop.
        reason: Rc<Error>,
    },
}

impl<A> UpstreamMsg<A> {
    /// Returns the slots this message concerns.
    #[must_use]
    pub fn slots(&self) -> StreamSlots {
        match self {
            UpstreamMsg::AckOpen { slots, .. }
            | UpstreamMsg::AckBatch { slots, .. }
            | UpstreamMsg::Drop { slots, .. }
            | UpstreamMsg::ForcedDrop { slots, .. } => *slots,
        }
    }
}

/// Messages flowing from a source to a sink on one path.
#[derive(Debug, Clone)]
pub enum DownstreamMsg<A, T> {
    /// A batch of elements.
    Batch {
        /// The path this message concerns.
        slots: StreamSlots,
        /// The sending peer's address.
        sender: A,
        /// The batch payload.
        batch: Batch<T>,
    },
    /// Graceful shutdown: deliver after all already-acked batches.
    Close {
        /// The path this message concerns.
        slots: StreamSlots,
        /// The sending peer's address.
        sender: A,
    },
    /// Abrupt shutdown.
    ForcedClose {
        /// The path this message concerns.
        slots: StreamSlots,
        /// The sending peer's address.
        sender: A,
        /// The reason for the abrupt shutdown.
        reason: Rc<Error>,
    },
}

impl<A, T> DownstreamMsg<A, T> {
    /// Returns the slots this message concerns.
    #[must_use]
    pub fn slots(&self) -> StreamSlots {
        match self {
            DownstreamMsg::Batch { slots, .. }
            | DownstreamMsg::Close { slots, .. }
            | DownstreamMsg::ForcedClose { slots, .. } => *slots,
        }
    }

    /// The task size the WDRR queue policy (§4.J) should charge this
    /// message: the batch's element count, or `1` for control messages.
    #[must_use]
    pub fn task_size(&self) -> i32 {
        match self {
            DownstreamMsg::Batch { batch, .. } => batch.size,
            DownstreamMsg::Close { .. } | DownstreamMsg::ForcedClose { .. } => 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_size_uses_batch_size_for_batches_and_one_otherwise() {
        let slots = StreamSlots::new(crate::slot::Slot::new(1), crate::slot::Slot::new(2));
        let batch_msg: DownstreamMsg<u8, &str> = DownstreamMsg::Batch {
            slots,
            sender: 0,
            batch: Batch {
                size: 7,
                payload: vec!["x"],
                id: 1,
            },
        };
        assert_eq!(batch_msg.task_size(), 7);

        let close_msg: DownstreamMsg<u8, &str> = DownstreamMsg::Close { slots, sender: 0 };
        assert_eq!(close_msg.task_size(), 1);
    }
}
