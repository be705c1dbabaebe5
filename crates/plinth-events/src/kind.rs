//! The event kind hierarchy.
//!
//! Kinds form a tagged tree (with one deliberate diamond: the store progress
//! family specializes both the progress family and the store key family).
//! Listener registration and enable/disable state are resolved by walking the
//! subtype relation, so a listener for [`EventKind::Store`] also fires for a
//! [`EventKind::StoreSet`] event.

use serde::{Deserialize, Serialize};

/// Classification of every event that can flow through an
/// [`EventManager`](crate::EventManager).
///
/// Some kinds are abstract groupings that exist only so listeners can target
/// a whole family (`Store`, `StoreKey`, `Progress`); the rest are concrete
/// kinds that events are actually constructed with.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EventKind {
    /// Root of the hierarchy; a listener for `Any` sees every event.
    Any,
    /// Periodic tick from a [`Heartbeat`](crate::Heartbeat) service.
    Heartbeat,
    /// Root of the progress-reporting family.
    Progress,
    /// A long-running operation has started.
    ProgressStart,
    /// A long-running operation has advanced.
    ProgressStep,
    /// A long-running operation has finished.
    ProgressEnd,
    /// Root of the store family.
    Store,
    /// Root of the store transaction family.
    StoreTransaction,
    /// A store transaction has begun.
    StoreTransactionStart,
    /// A store transaction has committed or rolled back.
    StoreTransactionEnd,
    /// Store events that pertain to a particular key.
    StoreKey,
    /// Store events that record a mutation of a key.
    StoreModification,
    /// A key was written for the first time.
    StoreSet,
    /// An existing key was overwritten.
    StoreUpdate,
    /// A key was removed.
    StoreDelete,
    /// Progress events attributed to a store key.
    StoreProgress,
    /// Keyed progress: operation started.
    StoreProgressStart,
    /// Keyed progress: operation advanced.
    StoreProgressStep,
    /// Keyed progress: operation finished.
    StoreProgressEnd,
}

impl EventKind {
    /// Every kind, in declaration order.
    pub const ALL: &'static [EventKind] = &[
        EventKind::Any,
        EventKind::Heartbeat,
        EventKind::Progress,
        EventKind::ProgressStart,
        EventKind::ProgressStep,
        EventKind::ProgressEnd,
        EventKind::Store,
        EventKind::StoreTransaction,
        EventKind::StoreTransactionStart,
        EventKind::StoreTransactionEnd,
        EventKind::StoreKey,
        EventKind::StoreModification,
        EventKind::StoreSet,
        EventKind::StoreUpdate,
        EventKind::StoreDelete,
        EventKind::StoreProgress,
        EventKind::StoreProgressStart,
        EventKind::StoreProgressStep,
        EventKind::StoreProgressEnd,
    ];

    /// Direct supertypes of this kind.
    ///
    /// Most kinds have exactly one parent; the store progress kinds have two.
    pub fn parents(self) -> &'static [EventKind] {
        match self {
            EventKind::Any => &[],
            EventKind::Heartbeat => &[EventKind::Any],
            EventKind::Progress => &[EventKind::Any],
            EventKind::ProgressStart => &[EventKind::Progress],
            EventKind::ProgressStep => &[EventKind::Progress],
            EventKind::ProgressEnd => &[EventKind::Progress],
            EventKind::Store => &[EventKind::Any],
            EventKind::StoreTransaction => &[EventKind::Store],
            EventKind::StoreTransactionStart => &[EventKind::StoreTransaction],
            EventKind::StoreTransactionEnd => &[EventKind::StoreTransaction],
            EventKind::StoreKey => &[EventKind::Store],
            EventKind::StoreModification => &[EventKind::StoreKey],
            EventKind::StoreSet => &[EventKind::StoreModification],
            EventKind::StoreUpdate => &[EventKind::StoreModification],
            EventKind::StoreDelete => &[EventKind::StoreModification],
            EventKind::StoreProgress => &[EventKind::StoreKey, EventKind::Progress],
            EventKind::StoreProgressStart => {
                &[EventKind::StoreProgress, EventKind::ProgressStart]
            }
            EventKind::StoreProgressStep => &[EventKind::StoreProgress, EventKind::ProgressStep],
            EventKind::StoreProgressEnd => &[EventKind::StoreProgress, EventKind::ProgressEnd],
        }
    }

    /// The kind itself followed by its transitive supertypes, breadth-first,
    /// deduplicated.
    ///
    /// This is the chain walked when matching listener registrations against
    /// an emitted event.
    pub fn ancestors(self) -> Vec<EventKind> {
        let mut chain = vec![self];
        let mut cursor = 0;
        while cursor < chain.len() {
            for &parent in chain[cursor].parents() {
                if !chain.contains(&parent) {
                    chain.push(parent);
                }
            }
            cursor += 1;
        }
        chain
    }

    /// Whether this kind is `ancestor` or a sub-kind of `ancestor`.
    pub fn is_a(self, ancestor: EventKind) -> bool {
        self.ancestors().contains(&ancestor)
    }

    /// This kind and every kind below it in the hierarchy.
    pub fn descendants(self) -> Vec<EventKind> {
        EventKind::ALL
            .iter()
            .copied()
            .filter(|kind| kind.is_a(self))
            .collect()
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self:?}")
    }
}
