// SPDX-License-Identifier: Apache-2.0

//! Errors raised or propagated by the streaming core.
//!
//! Important note: it is deliberately safe to clone these errors (via
//! `Rc<Error>`) so the same failure can be attached to `forced_close`
//! messages fanned out to several paths at once.

use crate::slot::Slot;

/// Errors raised or propagated by the streaming core, matching the error
/// kinds enumerated by the design: `unexpected_message`,
/// `invalid_stream_state`, `runtime_error`, and user-defined reasons
/// (carried as [`Error::Aborted`]).
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A batch arrived out of sequence, or a control message arrived in a
    /// state that forbids it, with no local recovery defined.
    #[error("unexpected message on slot {slot}: {detail}")]
    UnexpectedMessage {
        /// The slot on which the message arrived.
        slot: Slot,
        /// Human-readable detail.
        detail: String,
    },

    /// A path transition was requested that the state machine forbids.
    #[error("invalid stream state for slot {slot}: {detail}")]
    InvalidStreamState {
        /// The slot whose state machine rejected the transition.
        slot: Slot,
        /// Human-readable detail.
        detail: String,
    },

    /// A peer is unreachable or terminated without sending `drop`/`close`.
    #[error("peer unreachable or terminated: {detail}")]
    RuntimeError {
        /// Human-readable detail.
        detail: String,
    },

    /// A user-defined reason supplied by an aborter or a driver.
    #[error("stream aborted: {reason}")]
    Aborted {
        /// The reason given for the abort.
        reason: String,
    },

    /// A configuration value was invalid.
    #[error("invalid configuration: {detail}")]
    InvalidConfig {
        /// Human-readable detail.
        detail: String,
    },

    /// The underlying mailbox channel rejected a send.
    #[error("channel send failed")]
    ChannelSend,

    /// The underlying mailbox channel is closed.
    #[error("channel closed")]
    ChannelClosed,
}

impl Error {
    /// Returns the string name of the active variant, for log and metric
    /// labeling without exposing the full `Display` message.
    #[must_use]
    pub fn variant_name(&self) -> &'static str {
        match self {
            Error::UnexpectedMessage { .. } => "UnexpectedMessage",
            Error::InvalidStreamState { .. } => "InvalidStreamState",
            Error::RuntimeError { .. } => "RuntimeError",
            Error::Aborted { .. } => "Aborted",
            Error::InvalidConfig { .. } => "InvalidConfig",
            Error::ChannelSend => "ChannelSend",
            Error::ChannelClosed => "ChannelClosed",
        }
    }
}

impl<T> From<streamrt_channel::error::SendError<T>> for Error {
    fn from(_: streamrt_channel::error::SendError<T>) -> Self {
        Error::ChannelSend
    }
}

impl From<streamrt_channel::error::RecvError> for Error {
    fn from(_: streamrt_channel::error::RecvError) -> Self {
        Error::ChannelClosed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn variant_name_matches_variant() {
        let err = Error::RuntimeError {
            detail: "gone".into(),
        };
        assert_eq!(err.variant_name(), "RuntimeError");
    }
}
