//! Reentrant transaction scopes.
//!
//! A [`Transactor`] owns the depth counter and the backend hooks for one
//! store. [`Transactor::begin`] returns a [`Transaction`] scope guard; only
//! the outermost scope runs hooks and emits transaction events, so store
//! operations can open scopes freely without caring whether a caller already
//! did.
//!
//! While a hooks-backed transaction is open, the store's modification events
//! are captured and marked handled so observers never see uncommitted writes;
//! they are replayed after a successful commit and discarded on rollback.

use std::marker::PhantomData;
use std::sync::{Arc, Mutex};

use tracing::{debug, warn};

use plinth_events::{
    Event, EventKind, EventManager, EventPayload, SourceId, TransactionState,
};

use crate::error::{StoreError, StoreResult};

/// Backend begin/commit/rollback operations.
///
/// Supplied by stores with real transaction support; stores without it use a
/// hook-less [`Transactor`], which tracks nesting and emits events but has
/// nothing to commit or roll back.
pub trait TransactionHooks: Send + Sync {
    fn begin(&self) -> StoreResult<()>;
    fn commit(&self) -> StoreResult<()>;
    fn rollback(&self) -> StoreResult<()>;
}

struct Capture {
    listener: plinth_events::ListenerId,
    buffer: Arc<Mutex<Vec<Event>>>,
}

#[derive(Default)]
struct TransactorState {
    depth: u32,
    /// Description given to the outermost scope; nested notes are ignored.
    notes: String,
    capture: Option<Capture>,
}

/// Coordinates transaction scopes for one store.
pub struct Transactor {
    events: Arc<EventManager>,
    source: SourceId,
    hooks: Option<Box<dyn TransactionHooks>>,
    state: Mutex<TransactorState>,
}

impl Transactor {
    /// A transactor for a backend without real transactions: nesting is
    /// tracked and transaction events are emitted, but there are no hooks to
    /// run and no event capture.
    pub fn new(events: Arc<EventManager>, source: SourceId) -> Self {
        Self {
            events,
            source,
            hooks: None,
            state: Mutex::new(TransactorState::default()),
        }
    }

    /// A transactor driving real backend hooks.
    pub fn with_hooks(
        events: Arc<EventManager>,
        source: SourceId,
        hooks: Box<dyn TransactionHooks>,
    ) -> Self {
        Self {
            events,
            source,
            hooks: Some(hooks),
            state: Mutex::new(TransactorState::default()),
        }
    }

    /// Whether this transactor drives real backend hooks.
    pub fn is_transactional(&self) -> bool {
        self.hooks.is_some()
    }

    /// Current nesting depth; zero means no open transaction.
    pub fn depth(&self) -> u32 {
        self.state.lock().expect("lock poisoned").depth
    }

    /// Open a transaction scope.
    ///
    /// On the outermost entry this runs the backend's begin hook, emits a
    /// transaction-start event, and begins capturing this source's
    /// modification events. Nested entries only move the depth counter.
    pub fn begin(&self, notes: &str) -> StoreResult<Transaction<'_>> {
        let outermost = {
            let mut state = self.state.lock().expect("lock poisoned");
            if state.depth == 0 {
                if let Some(hooks) = &self.hooks {
                    hooks.begin().map_err(|source| StoreError::TransactionFailure {
                        notes: notes.to_string(),
                        source: Box::new(source),
                    })?;
                    state.capture = Some(self.connect_capture());
                }
                state.notes = notes.to_string();
            }
            state.depth += 1;
            state.depth == 1
        };

        // The guard exists before the start event is emitted, so a failing
        // listener unwinds through the rollback path.
        let transaction = Transaction {
            transactor: self,
            completed: false,
            _not_send: PhantomData,
        };
        if outermost {
            debug!(source = %self.source, notes, "transaction started");
            let mut event = Event::new(
                self.source.clone(),
                EventPayload::TransactionStart {
                    notes: notes.to_string(),
                },
            );
            self.events.emit(&mut event)?;
        }
        Ok(transaction)
    }

    /// Register the listener that swallows this source's modification events
    /// while the transaction is open.
    fn connect_capture(&self) -> Capture {
        let buffer: Arc<Mutex<Vec<Event>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&buffer);
        let listener = self.events.connect(
            EventKind::StoreModification,
            i32::MAX,
            Some(self.source.as_filter()),
            move |event: &mut Event| {
                sink.lock().expect("lock poisoned").push(event.clone());
                event.mark_handled();
                Ok(())
            },
        );
        Capture { listener, buffer }
    }

    /// Close one scope level; finalize at the outermost exit.
    fn finish(&self, success: bool) -> StoreResult<()> {
        let (notes, capture) = {
            let mut state = self.state.lock().expect("lock poisoned");
            state.depth -= 1;
            if state.depth > 0 {
                return Ok(());
            }
            (std::mem::take(&mut state.notes), state.capture.take())
        };

        // Stop capturing before anything is re-emitted.
        let buffer = capture.map(|capture| {
            self.events.disconnect(capture.listener);
            capture.buffer
        });

        let hook_result = self.run_hooks(&notes, success);
        let state = if success && hook_result.is_ok() {
            TransactionState::Done
        } else {
            TransactionState::Failed
        };
        debug!(source = %self.source, %notes, ?state, "transaction finished");

        let mut end = Event::new(
            self.source.clone(),
            EventPayload::TransactionEnd {
                notes,
                state,
            },
        );
        let emit_result = self.events.emit(&mut end).map_err(StoreError::from);
        hook_result?;
        emit_result?;

        if state == TransactionState::Done {
            if let Some(buffer) = buffer {
                for mut event in buffer.lock().expect("lock poisoned").drain(..) {
                    event.reset_handled();
                    self.events.emit(&mut event)?;
                }
            }
        }
        Ok(())
    }

    fn run_hooks(&self, notes: &str, success: bool) -> StoreResult<()> {
        let Some(hooks) = &self.hooks else {
            return Ok(());
        };
        if success {
            if let Err(source) = hooks.commit() {
                // The batch must not stay half-applied after a failed commit.
                if let Err(error) = hooks.rollback() {
                    warn!(%error, "rollback after failed commit also failed");
                }
                return Err(StoreError::TransactionFailure {
                    notes: notes.to_string(),
                    source: Box::new(source),
                });
            }
        } else if let Err(source) = hooks.rollback() {
            return Err(StoreError::TransactionFailure {
                notes: notes.to_string(),
                source: Box::new(source),
            });
        }
        Ok(())
    }
}

impl std::fmt::Debug for Transactor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transactor")
            .field("source", &self.source)
            .field("transactional", &self.is_transactional())
            .field("depth", &self.depth())
            .finish()
    }
}

/// A single transaction scope.
///
/// Dropping the guard without calling [`commit`](Transaction::commit) rolls
/// the transaction back. The guard is not `Send`: reentrancy is defined per
/// logical call stack, so a scope must stay on the thread that opened it.
#[must_use = "dropping a transaction without committing rolls it back"]
pub struct Transaction<'a> {
    transactor: &'a Transactor,
    completed: bool,
    _not_send: PhantomData<*const ()>,
}

impl Transaction<'_> {
    /// Close the scope successfully. At the outermost exit this commits the
    /// backend, emits the transaction-end event, and replays captured
    /// modification events.
    pub fn commit(mut self) -> StoreResult<()> {
        self.completed = true;
        self.transactor.finish(true)
    }

    /// Close the scope as failed. At the outermost exit this rolls the
    /// backend back and discards captured modification events.
    pub fn rollback(mut self) -> StoreResult<()> {
        self.completed = true;
        self.transactor.finish(false)
    }
}

impl Drop for Transaction<'_> {
    fn drop(&mut self) {
        if !self.completed {
            // Error path: rollback failures here are logged, not panicked.
            if let Err(error) = self.transactor.finish(false) {
                warn!(%error, "transaction rollback failed during drop");
            }
        }
    }
}
