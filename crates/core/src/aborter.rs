// SPDX-License-Identifier: Apache-2.0

//! Stream aborter (§4.K): a registry of attachments that synthesizes
//! `forced_close`/`forced_drop` events when a monitored peer terminates.
//!
//! The reference implementation attaches itself directly to the observed
//! actor's exit handler; the actor lifecycle and exit notification that
//! would drive that are out of scope here (see [`crate::iface`]), so this
//! module models only the bookkeeping: register an attachment, then convert
//! a peer-exit notification into the events the stream manager must act on.

use crate::error::Error;
use crate::slot::StreamSlots;
use std::collections::HashMap;
use std::hash::Hash;
use std::rc::Rc;

/// Which side attached the aborter, determining the synthesized event kind.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AborterMode {
    /// Attached by a source onto the sink it streams to: fires
    /// `forced_close` at the source (observer) when the sink (observed)
    /// exits.
    Source,
    /// Attached by a sink onto the source it streams from: fires
    /// `forced_drop` at the sink (observer) when the source (observed)
    /// exits.
    Sink,
}

/// One attachment: `observer` wants to know if `observed` exits while this
/// path is open.
struct Attachment<A> {
    observer: A,
    slots: StreamSlots,
    mode: AborterMode,
}

/// Event synthesized by [`StreamAborterRegistry::notify_exit`], to be
/// dispatched to `observer` through [`crate::iface::UpstreamSink`] or
/// [`crate::iface::DownstreamSink`] as appropriate.
pub enum AborterEvent<A> {
    /// The sink named by `slots` died; deliver to the source.
    ForcedClose {
        /// The path that no longer has a live sink.
        slots: StreamSlots,
        /// The observer to notify (the source).
        observer: A,
        /// The reason to attach to the synthesized `forced_close`.
        reason: Rc<Error>,
    },
    /// The source named by `slots` died; deliver to the sink.
    ForcedDrop {
        /// The path that no longer has a live source.
        slots: StreamSlots,
        /// The observer to notify (the sink).
        observer: A,
        /// The reason to attach to the synthesized `forced_drop`.
        reason: Rc<Error>,
    },
}

/// Tracks attachments keyed by the actor being observed.
pub struct StreamAborterRegistry<A> {
    by_observed: HashMap<A, Vec<Attachment<A>>>,
}

impl<A> Default for StreamAborterRegistry<A> {
    fn default() -> Self {
        StreamAborterRegistry {
            by_observed: HashMap::new(),
        }
    }
}

impl<A> StreamAborterRegistry<A>
where
    A: Clone + Eq + Hash,
{
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Attaches an aborter to `observed` on behalf of `observer` (§4.K
    /// `add`).
    pub fn add(&mut self, observed: A, observer: A, slots: StreamSlots, mode: AborterMode) {
        self.by_observed.entry(observed).or_default().push(Attachment { observer, slots, mode });
    }

    /// Detaches the aborter matching `{observer, slots, mode}` from
    /// `observed` (§4.K `del`), mirroring the reference `token` match.
    pub fn remove(&mut self, observed: &A, observer: &A, slots: StreamSlots, mode: AborterMode) {
        if let Some(attachments) = self.by_observed.get_mut(observed) {
            attachments.retain(|a| !(a.observer == *observer && a.slots == slots && a.mode == mode));
            if attachments.is_empty() {
                let _ = self.by_observed.remove(observed);
            }
        }
    }

    /// Converts every attachment registered against `observed` into its
    /// synthesized event and removes them, as if `observed` had just
    /// exited with `reason`.
    #[must_use]
    pub fn notify_exit(&mut self, observed: &A, reason: Rc<Error>) -> Vec<AborterEvent<A>> {
        self.by_observed
            .remove(observed)
            .into_iter()
            .flatten()
            .map(|a| match a.mode {
                AborterMode::Source => AborterEvent::ForcedClose {
                    slots: a.slots,
                    observer: a.observer,
                    reason: reason.clone(),
                },
                AborterMode::Sink => AborterEvent::ForcedDrop {
                    slots: a.slots,
                    observer: a.observer,
                    reason: reason.clone(),
                },
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::slot::Slot;

    fn reason() -> Rc<Error> {
        Rc::new(Error::RuntimeError { detail: "peer gone".into() })
    }

    #[test]
    fn source_aborter_fires_forced_close_on_observer() {
        let mut reg: StreamAborterRegistry<u8> = StreamAborterRegistry::new();
        let slots = StreamSlots::new(Slot::new(1), Slot::new(2));
        reg.add(20, 10, slots, AborterMode::Source);
        let events = reg.notify_exit(&20, reason());
        assert_eq!(events.len(), 1);
        match &events[0] {
            AborterEvent::ForcedClose { observer, .. } => assert_eq!(*observer, 10),
            _ => panic!("expected ForcedClose"),
        }
    }

    #[test]
    fn sink_aborter_fires_forced_drop_on_observer() {
        let mut reg: StreamAborterRegistry<u8> = StreamAborterRegistry::new();
        let slots = StreamSlots::new(Slot::new(1), Slot::new(2));
        reg.add(10, 20, slots, AborterMode::Sink);
        let events = reg.notify_exit(&10, reason());
        assert_eq!(events.len(), 1);
        match &events[0] {
            AborterEvent::ForcedDrop { observer, .. } => assert_eq!(*observer, 20),
            _ => panic!("expected ForcedDrop"),
        }
    }

    #[test]
    fn remove_drops_only_the_matching_attachment() {
        let mut reg: StreamAborterRegistry<u8> = StreamAborterRegistry::new();
        let slots = StreamSlots::new(Slot::new(1), Slot::new(2));
        reg.add(20, 10, slots, AborterMode::Source);
        reg.add(20, 11, slots, AborterMode::Source);
        reg.remove(&20, &10, slots, AborterMode::Source);
        let events = reg.notify_exit(&20, reason());
        assert_eq!(events.len(), 1);
    }

    #[test]
    fn notify_exit_is_a_one_shot() {
        let mut reg: StreamAborterRegistry<u8> = StreamAborterRegistry::new();
        let slots = StreamSlots::new(Slot::new(1), Slot::new(2));
        reg.add(20, 10, slots, AborterMode::Source);
        assert_eq!(reg.notify_exit(&20, reason()).len(), 1);
        assert_eq!(reg.notify_exit(&20, reason()).len(), 0);
    }
}
