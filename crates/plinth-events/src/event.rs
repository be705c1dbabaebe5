//! The event type and its payloads.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use crate::kind::EventKind;

/// Free-form attribute map attached to events and used by listener filters.
pub type Attributes = BTreeMap<String, serde_json::Value>;

/// Identity of the component that emitted an event.
///
/// Sources are opaque: two stores constructed from the same label still get
/// distinct identities, so a filter on `source` never aliases across
/// instances.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SourceId(String);

impl SourceId {
    /// Create a fresh identity tagged with a human-readable label.
    pub fn new(label: &str) -> Self {
        let uuid = Uuid::new_v4().simple().to_string();
        Self(format!("{label}/{}", &uuid[..8]))
    }

    /// An identity with no meaningful label.
    pub fn anonymous() -> Self {
        Self::new("anonymous")
    }

    /// An [`Attributes`] map matching only events from this source.
    ///
    /// Convenience for `connect` filters.
    pub fn as_filter(&self) -> Attributes {
        let mut filter = Attributes::new();
        filter.insert("source".to_string(), json!(self.0));
        filter
    }

    /// The underlying identity string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SourceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Correlator shared by the start/step/end events of one operation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OperationId(Uuid);

impl OperationId {
    /// Generate a fresh correlator.
    #[allow(clippy::new_without_default)]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl std::fmt::Display for OperationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Outcome carried by a transaction end event.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransactionState {
    /// The transaction committed.
    Done,
    /// The transaction rolled back.
    Failed,
}

/// Outcome carried by a progress end event.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExitState {
    /// The operation completed.
    Normal,
    /// The operation failed or was abandoned.
    Error,
}

/// Kind-specific data carried by an [`Event`].
///
/// Each variant corresponds to one concrete [`EventKind`]; `None` produces a
/// bare event at the root of the hierarchy.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum EventPayload {
    /// No payload.
    None,
    /// Periodic tick.
    Heartbeat {
        frame: u64,
        interval: Duration,
    },
    ProgressStart {
        operation_id: OperationId,
        message: String,
        /// Total step count, or -1 when unknown.
        steps: i64,
    },
    ProgressStep {
        operation_id: OperationId,
        message: String,
        step: u64,
    },
    ProgressEnd {
        operation_id: OperationId,
        message: String,
        exit_state: ExitState,
    },
    StoreSet {
        key: String,
        metadata: Attributes,
    },
    StoreUpdate {
        key: String,
        metadata: Attributes,
    },
    StoreDelete {
        key: String,
        metadata: Attributes,
    },
    TransactionStart {
        notes: String,
    },
    TransactionEnd {
        notes: String,
        state: TransactionState,
    },
    StoreProgressStart {
        key: String,
        operation_id: OperationId,
        message: String,
        steps: i64,
    },
    StoreProgressStep {
        key: String,
        operation_id: OperationId,
        message: String,
        step: u64,
    },
    StoreProgressEnd {
        key: String,
        operation_id: OperationId,
        message: String,
        exit_state: ExitState,
    },
}

impl EventPayload {
    /// The concrete kind this payload produces.
    pub fn kind(&self) -> EventKind {
        match self {
            EventPayload::None => EventKind::Any,
            EventPayload::Heartbeat { .. } => EventKind::Heartbeat,
            EventPayload::ProgressStart { .. } => EventKind::ProgressStart,
            EventPayload::ProgressStep { .. } => EventKind::ProgressStep,
            EventPayload::ProgressEnd { .. } => EventKind::ProgressEnd,
            EventPayload::StoreSet { .. } => EventKind::StoreSet,
            EventPayload::StoreUpdate { .. } => EventKind::StoreUpdate,
            EventPayload::StoreDelete { .. } => EventKind::StoreDelete,
            EventPayload::TransactionStart { .. } => EventKind::StoreTransactionStart,
            EventPayload::TransactionEnd { .. } => EventKind::StoreTransactionEnd,
            EventPayload::StoreProgressStart { .. } => EventKind::StoreProgressStart,
            EventPayload::StoreProgressStep { .. } => EventKind::StoreProgressStep,
            EventPayload::StoreProgressEnd { .. } => EventKind::StoreProgressEnd,
        }
    }

    /// Look up a payload field by name, as a JSON value.
    fn attr(&self, name: &str) -> Option<serde_json::Value> {
        match self {
            EventPayload::None => None,
            EventPayload::Heartbeat { frame, interval } => match name {
                "frame" => Some(json!(frame)),
                "interval" => Some(json!(interval.as_millis() as u64)),
                _ => None,
            },
            EventPayload::ProgressStart {
                operation_id,
                message,
                steps,
            }
            | EventPayload::StoreProgressStart {
                operation_id,
                message,
                steps,
                ..
            } => match name {
                "operation_id" => Some(json!(operation_id.to_string())),
                "message" => Some(json!(message)),
                "steps" => Some(json!(steps)),
                "key" => self.key().map(|k| json!(k)),
                _ => None,
            },
            EventPayload::ProgressStep {
                operation_id,
                message,
                step,
            }
            | EventPayload::StoreProgressStep {
                operation_id,
                message,
                step,
                ..
            } => match name {
                "operation_id" => Some(json!(operation_id.to_string())),
                "message" => Some(json!(message)),
                "step" => Some(json!(step)),
                "key" => self.key().map(|k| json!(k)),
                _ => None,
            },
            EventPayload::ProgressEnd {
                operation_id,
                message,
                exit_state,
            }
            | EventPayload::StoreProgressEnd {
                operation_id,
                message,
                exit_state,
                ..
            } => match name {
                "operation_id" => Some(json!(operation_id.to_string())),
                "message" => Some(json!(message)),
                "exit_state" => Some(json!(format!("{exit_state:?}"))),
                "key" => self.key().map(|k| json!(k)),
                _ => None,
            },
            EventPayload::StoreSet { key, metadata }
            | EventPayload::StoreUpdate { key, metadata }
            | EventPayload::StoreDelete { key, metadata } => match name {
                "key" => Some(json!(key)),
                "metadata" => Some(json!(metadata)),
                _ => None,
            },
            EventPayload::TransactionStart { notes } => match name {
                "notes" => Some(json!(notes)),
                _ => None,
            },
            EventPayload::TransactionEnd { notes, state } => match name {
                "notes" => Some(json!(notes)),
                "state" => Some(json!(format!("{state:?}"))),
                _ => None,
            },
        }
    }

    /// The store key this payload pertains to, if any.
    pub fn key(&self) -> Option<&str> {
        match self {
            EventPayload::StoreSet { key, .. }
            | EventPayload::StoreUpdate { key, .. }
            | EventPayload::StoreDelete { key, .. }
            | EventPayload::StoreProgressStart { key, .. }
            | EventPayload::StoreProgressStep { key, .. }
            | EventPayload::StoreProgressEnd { key, .. } => Some(key),
            _ => None,
        }
    }
}

/// A single event.
///
/// Events are plain data: a concrete kind, the identity of the emitter, a
/// kind-specific payload, and any extra attributes the emitter chose to
/// attach. The `handled` flag is the cooperative stop signal for dispatch;
/// once a listener sets it, lower-priority listeners are not invoked.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Event {
    kind: EventKind,
    source: SourceId,
    handled: bool,
    payload: EventPayload,
    extra: Attributes,
}

impl Event {
    /// Build an event; the kind is derived from the payload.
    pub fn new(source: SourceId, payload: EventPayload) -> Self {
        Self {
            kind: payload.kind(),
            source,
            handled: false,
            payload,
            extra: Attributes::new(),
        }
    }

    /// Attach an extra attribute, visible to listener filters and `attr`.
    pub fn with_attr(mut self, name: &str, value: serde_json::Value) -> Self {
        self.extra.insert(name.to_string(), value);
        self
    }

    /// Attach a whole map of extra attributes.
    pub fn with_attrs(mut self, attrs: Attributes) -> Self {
        self.extra.extend(attrs);
        self
    }

    pub fn kind(&self) -> EventKind {
        self.kind
    }

    pub fn source(&self) -> &SourceId {
        &self.source
    }

    pub fn payload(&self) -> &EventPayload {
        &self.payload
    }

    /// Mark the event as handled so subsequent listeners are not notified.
    pub fn mark_handled(&mut self) {
        self.handled = true;
    }

    pub fn is_handled(&self) -> bool {
        self.handled
    }

    /// Clear the handled flag.
    ///
    /// Used when an event captured during a transaction is replayed after
    /// commit; ordinary listeners have no reason to call this.
    pub fn reset_handled(&mut self) {
        self.handled = false;
    }

    /// Uniform attribute access: `source` and `kind`, then payload fields,
    /// then extra attributes. This is what listener filters evaluate against.
    pub fn attr(&self, name: &str) -> Option<serde_json::Value> {
        match name {
            "source" => Some(json!(self.source.as_str())),
            "kind" => Some(json!(self.kind.to_string())),
            _ => self
                .payload
                .attr(name)
                .or_else(|| self.extra.get(name).cloned()),
        }
    }

    /// Hook run by the dispatcher once, before the first listener.
    pub fn pre_dispatch(&mut self) {
        tracing::trace!(kind = %self.kind, source = %self.source, "dispatching event");
    }

    /// Hook run by the dispatcher once, after dispatch finishes (normally,
    /// by handling, or by listener error).
    pub fn post_dispatch(&mut self) {
        tracing::trace!(kind = %self.kind, handled = self.handled, "dispatch finished");
    }
}

impl std::fmt::Display for Event {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} event from {}", self.kind, self.source)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_follows_payload() {
        let event = Event::new(
            SourceId::new("test"),
            EventPayload::StoreSet {
                key: "k".to_string(),
                metadata: Attributes::new(),
            },
        );
        assert_eq!(event.kind(), EventKind::StoreSet);
    }

    #[test]
    fn attr_reads_source_payload_and_extra() {
        let source = SourceId::new("store");
        let event = Event::new(
            source.clone(),
            EventPayload::StoreDelete {
                key: "report.txt".to_string(),
                metadata: Attributes::new(),
            },
        )
        .with_attr("directory", json!("X"));

        assert_eq!(event.attr("source"), Some(json!(source.as_str())));
        assert_eq!(event.attr("key"), Some(json!("report.txt")));
        assert_eq!(event.attr("directory"), Some(json!("X")));
        assert_eq!(event.attr("missing"), None);
    }

    #[test]
    fn handled_flag_roundtrip() {
        let mut event = Event::new(SourceId::anonymous(), EventPayload::None);
        assert!(!event.is_handled());
        event.mark_handled();
        assert!(event.is_handled());
        event.reset_handled();
        assert!(!event.is_handled());
    }

    #[test]
    fn source_ids_are_unique_per_instance() {
        let a = SourceId::new("store");
        let b = SourceId::new("store");
        assert_ne!(a, b);
        assert!(a.as_str().starts_with("store/"));
    }

    #[test]
    fn source_filter_matches_own_events_only() {
        let mine = SourceId::new("mine");
        let theirs = SourceId::new("theirs");
        let filter = mine.as_filter();

        let event = Event::new(mine.clone(), EventPayload::None);
        assert_eq!(event.attr("source"), filter.get("source").cloned());

        let other = Event::new(theirs, EventPayload::None);
        assert_ne!(other.attr("source"), filter.get("source").cloned());
    }

    #[test]
    fn progress_payload_attrs() {
        let op = OperationId::new();
        let event = Event::new(
            SourceId::anonymous(),
            EventPayload::StoreProgressStep {
                key: "k".to_string(),
                operation_id: op,
                message: "copying".to_string(),
                step: 3,
            },
        );
        assert_eq!(event.kind(), EventKind::StoreProgressStep);
        assert_eq!(event.attr("step"), Some(json!(3)));
        assert_eq!(event.attr("key"), Some(json!("k")));
        assert_eq!(event.attr("operation_id"), Some(json!(op.to_string())));
    }

    #[test]
    fn serde_roundtrip() {
        let event = Event::new(
            SourceId::new("s"),
            EventPayload::TransactionEnd {
                notes: "n".to_string(),
                state: TransactionState::Done,
            },
        );
        let text = serde_json::to_string(&event).unwrap();
        let back: Event = serde_json::from_str(&text).unwrap();
        assert_eq!(back.kind(), EventKind::StoreTransactionEnd);
        assert_eq!(back.attr("state"), Some(json!("Done")));
    }
}
