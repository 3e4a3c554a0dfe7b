// SPDX-License-Identifier: Apache-2.0

//! Stream slot identifiers and directional path addresses.

use std::fmt;

/// A 16-bit endpoint identifier, unique per actor. `0` is reserved and never
/// names a real endpoint.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Slot(u16);

/// The reserved "no endpoint" slot value.
pub const INVALID_SLOT: Slot = Slot(0);

impl Slot {
    /// Wraps a raw 16-bit value as a slot.
    #[must_use]
    pub const fn new(raw: u16) -> Self {
        Slot(raw)
    }

    /// Returns the raw 16-bit value.
    #[must_use]
    pub const fn raw(self) -> u16 {
        self.0
    }

    /// Returns whether this slot names a real endpoint.
    #[must_use]
    pub const fn is_valid(self) -> bool {
        self.0 != 0
    }
}

impl Default for Slot {
    fn default() -> Self {
        INVALID_SLOT
    }
}

impl fmt::Debug for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Slot({})", self.0)
    }
}

impl fmt::Display for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Names a single directional path as a (sender-slot, receiver-slot) pair.
///
/// A path is addressed from the sender's point of view: `sender` is the
/// slot on the actor that emits batches, `receiver` is the slot on the
/// actor that consumes them.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct StreamSlots {
    /// The slot on the sending actor.
    pub sender: Slot,
    /// The slot on the receiving actor.
    pub receiver: Slot,
}

impl StreamSlots {
    /// Builds a slot pair from raw sender/receiver values.
    #[must_use]
    pub const fn new(sender: Slot, receiver: Slot) -> Self {
        StreamSlots { sender, receiver }
    }

    /// Swaps sender and receiver, producing the address of the same path as
    /// seen from the other endpoint.
    #[must_use]
    pub const fn invert(self) -> Self {
        StreamSlots {
            sender: self.receiver,
            receiver: self.sender,
        }
    }

    /// Packs both slots into a single comparable value, for use as a sort
    /// key or in ordered containers keyed by path identity.
    #[must_use]
    pub const fn compare_key(self) -> u32 {
        ((self.sender.0 as u32) << 16) | self.receiver.0 as u32
    }
}

impl fmt::Display for StreamSlots {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({} -> {})", self.sender, self.receiver)
    }
}

/// Relative importance of a path's outgoing traffic, informational only:
/// the WDRR queue policy (see [`crate::queue`]) does not currently weight
/// by priority, mirroring the reference implementation's own `TODO`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum StreamPriority {
    /// The lowest priority.
    VeryLow,
    /// Below-default priority.
    Low,
    /// The default priority for newly opened paths.
    #[default]
    Normal,
    /// Above-default priority.
    High,
    /// The highest priority.
    VeryHigh,
}
