use plinth_events::EventError;

/// Errors from store operations.
///
/// Every condition is distinguishable by variant; there is no catch-all.
/// All errors propagate to the caller; the store layer never retries.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The requested key is not present in the store.
    #[error("key not found: {0}")]
    NotFound(String),

    /// The operation was attempted before `connect` or after `disconnect`.
    #[error("store is not connected")]
    NotConnected,

    /// The store does not implement this capability (e.g. a write on a
    /// read-only store).
    #[error("operation not supported: {0}")]
    Unsupported(String),

    /// The authenticated user may not perform this operation on the key.
    #[error("authorization denied for {key}: {reason}")]
    AuthorizationDenied { key: String, reason: String },

    /// A transaction hook (begin/commit/rollback) failed. The batch that was
    /// in flight has been rolled back where the backend allows it.
    #[error("transaction failed ({notes}): {source}")]
    TransactionFailure {
        notes: String,
        #[source]
        source: Box<StoreError>,
    },

    /// A glob pattern could not be compiled.
    #[error("invalid glob pattern: {0}")]
    InvalidPattern(#[from] globset::Error),

    /// I/O failure from a data stream or the underlying medium.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A listener failed while an event emitted by a store operation was
    /// being dispatched.
    #[error("event dispatch failed: {0}")]
    Event(#[from] EventError),
}

impl StoreError {
    /// Shorthand used when deciding whether a composite store should keep
    /// consulting members.
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound(_))
    }
}

/// Result alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;
