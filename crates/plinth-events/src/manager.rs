//! The event manager: registration, filtering, and dispatch.

use std::cmp::Reverse;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::thread;

use tracing::{debug, trace, warn};

use crate::error::{BoxError, EventError, EventResult};
use crate::event::{Attributes, Event};
use crate::kind::EventKind;

/// Listener callback signature.
///
/// Listeners receive the event mutably so they can mark it handled; a
/// returned error aborts dispatch and propagates to the emitter.
pub type Listener = dyn Fn(&mut Event) -> Result<(), BoxError> + Send + Sync;

/// Handle identifying one listener registration.
///
/// `connect` returns the handle and the owner is responsible for passing it
/// back to `disconnect` when done (or for holding a [`ListenerGuard`], which
/// does so on drop). This replaces reachability-based cleanup: a registration
/// lives until it is explicitly released.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ListenerId {
    kind: EventKind,
    token: u64,
}

struct Registration {
    token: u64,
    /// Global connection order, used to break priority ties.
    seq: u64,
    priority: i32,
    filter: Option<Attributes>,
    listener: Arc<Listener>,
}

impl Registration {
    /// Whether this registration's filter accepts the event. A filter entry
    /// naming an attribute the event does not have never matches.
    fn accepts(&self, event: &Event) -> bool {
        match &self.filter {
            None => true,
            Some(filter) => filter
                .iter()
                .all(|(name, expected)| event.attr(name).as_ref() == Some(expected)),
        }
    }
}

/// A single registry point for application events.
///
/// Listeners register against an [`EventKind`] and fire for that kind and
/// every sub-kind, in descending priority order (connection order breaks
/// ties). All methods are safe to call concurrently, and from inside
/// listeners: the dispatch snapshot is taken before any listener runs, so a
/// listener may connect or disconnect others without deadlocking.
pub struct EventManager {
    tables: RwLock<HashMap<EventKind, Vec<Registration>>>,
    disabled: RwLock<HashSet<EventKind>>,
    serial: AtomicU64,
}

impl EventManager {
    pub fn new() -> Self {
        Self {
            tables: RwLock::new(HashMap::new()),
            disabled: RwLock::new(HashSet::new()),
            serial: AtomicU64::new(0),
        }
    }

    /// Register `listener` for events of `kind` and its sub-kinds.
    ///
    /// Higher `priority` listeners are invoked first. `filter`, if given,
    /// restricts dispatch to events whose attributes equal every entry in the
    /// map (see [`Event::attr`]).
    pub fn connect<F>(
        &self,
        kind: EventKind,
        priority: i32,
        filter: Option<Attributes>,
        listener: F,
    ) -> ListenerId
    where
        F: Fn(&mut Event) -> Result<(), BoxError> + Send + Sync + 'static,
    {
        let serial = self.serial.fetch_add(1, Ordering::Relaxed);
        let registration = Registration {
            token: serial,
            seq: serial,
            priority,
            filter,
            listener: Arc::new(listener),
        };
        self.tables
            .write()
            .expect("lock poisoned")
            .entry(kind)
            .or_default()
            .push(registration);
        trace!(%kind, priority, token = serial, "listener connected");
        ListenerId {
            kind,
            token: serial,
        }
    }

    /// Remove a registration. Idempotent: returns `false` when the handle
    /// was already disconnected.
    pub fn disconnect(&self, id: ListenerId) -> bool {
        let mut tables = self.tables.write().expect("lock poisoned");
        let Some(registrations) = tables.get_mut(&id.kind) else {
            return false;
        };
        let before = registrations.len();
        registrations.retain(|r| r.token != id.token);
        let removed = registrations.len() < before;
        if removed {
            trace!(kind = %id.kind, token = id.token, "listener disconnected");
        }
        removed
    }

    /// Wrap a registration in a guard that disconnects when dropped.
    pub fn guard(self: &Arc<Self>, id: ListenerId) -> ListenerGuard {
        ListenerGuard {
            manager: Arc::clone(self),
            id: Some(id),
        }
    }

    /// Dispatch `event` synchronously on the calling thread.
    ///
    /// Matching listeners run in descending priority order until one of them
    /// marks the event handled or fails. A listener error propagates to the
    /// caller; listeners that already ran are not undone. Returns `Ok` without
    /// dispatching when the event's kind is disabled.
    pub fn emit(&self, event: &mut Event) -> EventResult<()> {
        let kind = event.kind();
        if !self.is_enabled(kind) {
            trace!(%kind, "event suppressed: kind disabled");
            return Ok(());
        }

        let listeners = self.matching_listeners(event);
        event.pre_dispatch();
        let mut outcome = Ok(());
        for listener in listeners {
            if let Err(source) = (listener)(event) {
                warn!(%kind, error = %source, "listener failed, aborting dispatch");
                outcome = Err(EventError::Listener { kind, source });
                break;
            }
            if event.is_handled() {
                debug!(%kind, "event handled, stopping dispatch");
                break;
            }
        }
        event.post_dispatch();
        outcome
    }

    /// Dispatch `event` on a newly spawned worker thread.
    ///
    /// Returns immediately with the worker's handle; joining it yields the
    /// dispatch outcome together with the event. Ordering between two
    /// asynchronous emits from different threads is not guaranteed.
    pub fn emit_async(self: &Arc<Self>, mut event: Event) -> thread::JoinHandle<EventResult<Event>> {
        let manager = Arc::clone(self);
        thread::spawn(move || manager.emit(&mut event).map(|()| event))
    }

    /// Suppress dispatch for `kind` and all its sub-kinds.
    pub fn disable(&self, kind: EventKind) {
        let mut disabled = self.disabled.write().expect("lock poisoned");
        for descendant in kind.descendants() {
            disabled.insert(descendant);
        }
        debug!(%kind, "event kind disabled");
    }

    /// Restore dispatch for `kind` and all its sub-kinds.
    ///
    /// State is per-kind: disabling a supertype and then enabling one subtype
    /// leaves that subtype enabled while the supertype's other descendants
    /// stay disabled.
    pub fn enable(&self, kind: EventKind) {
        let mut disabled = self.disabled.write().expect("lock poisoned");
        for descendant in kind.descendants() {
            disabled.remove(&descendant);
        }
        debug!(%kind, "event kind enabled");
    }

    /// Whether events of `kind` are currently dispatched.
    pub fn is_enabled(&self, kind: EventKind) -> bool {
        !self.disabled.read().expect("lock poisoned").contains(&kind)
    }

    /// Number of live registrations for `kind` alone (sub-kinds excluded).
    pub fn listener_count(&self, kind: EventKind) -> usize {
        self.tables
            .read()
            .expect("lock poisoned")
            .get(&kind)
            .map_or(0, Vec::len)
    }

    /// Snapshot the listeners that will fire for `event`, in dispatch order.
    /// The table lock is released before any listener runs.
    fn matching_listeners(&self, event: &Event) -> Vec<Arc<Listener>> {
        let tables = self.tables.read().expect("lock poisoned");
        let mut matched: Vec<(Reverse<i32>, u64, Arc<Listener>)> = Vec::new();
        for kind in event.kind().ancestors() {
            if let Some(registrations) = tables.get(&kind) {
                for registration in registrations {
                    if registration.accepts(event) {
                        matched.push((
                            Reverse(registration.priority),
                            registration.seq,
                            Arc::clone(&registration.listener),
                        ));
                    }
                }
            }
        }
        drop(tables);
        matched.sort_by_key(|(priority, seq, _)| (*priority, *seq));
        matched.into_iter().map(|(_, _, listener)| listener).collect()
    }
}

impl Default for EventManager {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for EventManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let tables = self.tables.read().expect("lock poisoned");
        let registrations: usize = tables.values().map(Vec::len).sum();
        f.debug_struct("EventManager")
            .field("kinds", &tables.len())
            .field("registrations", &registrations)
            .finish()
    }
}

/// RAII wrapper releasing a listener registration on drop.
pub struct ListenerGuard {
    manager: Arc<EventManager>,
    id: Option<ListenerId>,
}

impl ListenerGuard {
    /// The wrapped registration handle.
    pub fn id(&self) -> Option<ListenerId> {
        self.id
    }

    /// Disconnect now instead of at drop time.
    pub fn disconnect(mut self) -> bool {
        match self.id.take() {
            Some(id) => self.manager.disconnect(id),
            None => false,
        }
    }
}

impl Drop for ListenerGuard {
    fn drop(&mut self) {
        if let Some(id) = self.id.take() {
            self.manager.disconnect(id);
        }
    }
}
