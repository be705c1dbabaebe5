//! Progress reporting for long-running operations.
//!
//! A [`ProgressManager`] ties a start/step/end event triple together with a
//! shared operation id, so observers (progress bars, logs) can correlate the
//! phases. Store operations use the keyed flavor, which emits the
//! `StoreProgress*` kinds and carries the key being worked on.

use std::sync::Arc;

use tracing::warn;

use crate::error::EventResult;
use crate::event::{Attributes, Event, EventPayload, ExitState, OperationId, SourceId};
use crate::manager::EventManager;

/// Emits a correlated start/step/end event triple for one operation.
///
/// `start` is emitted lazily by the first `step` if not called explicitly.
/// The triple is always closed: dropping a running reporter emits an
/// error-state end event, so listeners never see a dangling operation.
pub struct ProgressManager {
    events: Arc<EventManager>,
    source: SourceId,
    operation_id: OperationId,
    message: String,
    /// Total number of steps, or -1 when unknown.
    steps: i64,
    key: Option<String>,
    extra: Attributes,
    step_count: u64,
    running: bool,
}

impl ProgressManager {
    pub fn new(events: Arc<EventManager>, source: SourceId, message: &str, steps: i64) -> Self {
        Self {
            events,
            source,
            operation_id: OperationId::new(),
            message: message.to_string(),
            steps,
            key: None,
            extra: Attributes::new(),
            step_count: 0,
            running: false,
        }
    }

    /// Attribute the operation to a store key; events switch to the
    /// `StoreProgress*` kinds.
    pub fn for_key(mut self, key: &str) -> Self {
        self.key = Some(key.to_string());
        self
    }

    /// Attach extra attributes to every emitted event.
    pub fn with_attrs(mut self, attrs: Attributes) -> Self {
        self.extra.extend(attrs);
        self
    }

    /// The correlator shared by this operation's events.
    pub fn operation_id(&self) -> OperationId {
        self.operation_id
    }

    /// Emit the start event.
    pub fn start(&mut self) -> EventResult<()> {
        self.running = true;
        let payload = match &self.key {
            Some(key) => EventPayload::StoreProgressStart {
                key: key.clone(),
                operation_id: self.operation_id,
                message: self.message.clone(),
                steps: self.steps,
            },
            None => EventPayload::ProgressStart {
                operation_id: self.operation_id,
                message: self.message.clone(),
                steps: self.steps,
            },
        };
        self.emit(payload)
    }

    /// Emit a step event with a monotonically increasing step count.
    ///
    /// Starts the operation first if `start` has not been called.
    pub fn step(&mut self, message: Option<&str>) -> EventResult<()> {
        if !self.running {
            self.start()?;
        }
        let message = message.unwrap_or(&self.message).to_string();
        let step = self.step_count;
        self.step_count += 1;
        let payload = match &self.key {
            Some(key) => EventPayload::StoreProgressStep {
                key: key.clone(),
                operation_id: self.operation_id,
                message,
                step,
            },
            None => EventPayload::ProgressStep {
                operation_id: self.operation_id,
                message,
                step,
            },
        };
        self.emit(payload)
    }

    /// Emit the end event. Idempotent once the operation has ended.
    pub fn end(&mut self, exit_state: ExitState, message: Option<&str>) -> EventResult<()> {
        if !self.running {
            return Ok(());
        }
        self.running = false;
        let message = message.unwrap_or(&self.message).to_string();
        let payload = match &self.key {
            Some(key) => EventPayload::StoreProgressEnd {
                key: key.clone(),
                operation_id: self.operation_id,
                message,
                exit_state,
            },
            None => EventPayload::ProgressEnd {
                operation_id: self.operation_id,
                message,
                exit_state,
            },
        };
        self.emit(payload)
    }

    fn emit(&self, payload: EventPayload) -> EventResult<()> {
        let mut event =
            Event::new(self.source.clone(), payload).with_attrs(self.extra.clone());
        self.events.emit(&mut event)
    }
}

impl Drop for ProgressManager {
    fn drop(&mut self) {
        if self.running {
            if let Err(error) = self.end(ExitState::Error, Some("operation dropped before completion")) {
                warn!(operation_id = %self.operation_id, %error, "progress end event failed");
            }
        }
    }
}
