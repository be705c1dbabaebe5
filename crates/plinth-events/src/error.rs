use crate::kind::EventKind;

/// Boxed error type returned by listener callbacks.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors from event dispatch.
#[derive(Debug, thiserror::Error)]
pub enum EventError {
    /// A listener callback failed. Dispatch stops at the failing listener;
    /// side effects of listeners that already ran are not undone.
    #[error("listener failed while handling {kind} event")]
    Listener {
        kind: EventKind,
        #[source]
        source: BoxError,
    },
}

/// Result alias for event operations.
pub type EventResult<T> = Result<T, EventError>;
