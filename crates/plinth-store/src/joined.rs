//! Joined store: several member stores presented as one namespace.
//!
//! Members are consulted in a fixed priority order; a key present in an
//! earlier member shadows the same key in later members. Writes always go to
//! the first member. Any member error other than not-found propagates
//! immediately, so a broken member is never silently masked by a later one.

use std::collections::HashSet;
use std::io::Read;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::debug;

use plinth_events::{EventManager, SourceId};

use crate::error::{StoreError, StoreResult};
use crate::metadata::Metadata;
use crate::traits::{Credentials, ReadOnlyStore, Store, StoreInfo};
use crate::transaction::{Transaction, Transactor};
use crate::value::Value;

/// A store layering an ordered list of member stores into one namespace.
///
/// Reads return the first member's result where the key exists; writes go to
/// the designated primary (first) member. Members are usually constructed
/// over the same shared [`EventManager`], so their events interleave with
/// the composite's transaction events.
pub struct JoinedStore {
    events: Arc<EventManager>,
    source: SourceId,
    members: Vec<Arc<dyn Store>>,
    connected: AtomicBool,
    transactor: Transactor,
}

impl JoinedStore {
    pub fn new(events: Arc<EventManager>, members: Vec<Arc<dyn Store>>) -> Self {
        let source = SourceId::new("joined-store");
        let transactor = Transactor::new(Arc::clone(&events), source.clone());
        Self {
            events,
            source,
            members,
            connected: AtomicBool::new(false),
            transactor,
        }
    }

    /// The member stores, in priority order.
    pub fn members(&self) -> &[Arc<dyn Store>] {
        &self.members
    }

    fn ensure_connected(&self) -> StoreResult<()> {
        if self.connected.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StoreError::NotConnected)
        }
    }

    /// The member all writes are directed to.
    fn primary(&self) -> StoreResult<&Arc<dyn Store>> {
        self.members
            .first()
            .ok_or_else(|| StoreError::Unsupported("joined store has no members".to_string()))
    }

    /// Run `op` against each member in order, returning the first result
    /// where the key exists. Member errors other than not-found propagate
    /// immediately; not-found is reported once, after every member missed.
    fn first_result<T>(
        &self,
        key: &str,
        mut op: impl FnMut(&Arc<dyn Store>) -> StoreResult<T>,
    ) -> StoreResult<T> {
        for member in &self.members {
            match op(member) {
                Err(error) if error.is_not_found() => continue,
                result => return result,
            }
        }
        Err(StoreError::NotFound(key.to_string()))
    }
}

impl ReadOnlyStore for JoinedStore {
    fn event_manager(&self) -> &Arc<EventManager> {
        &self.events
    }

    fn source_id(&self) -> &SourceId {
        &self.source
    }

    /// Connects any member that is not already connected, then the
    /// composite itself.
    fn connect(&self, credentials: Option<&Credentials>) -> StoreResult<()> {
        for member in &self.members {
            if !member.is_connected() {
                member.connect(credentials)?;
            }
        }
        self.connected.store(true, Ordering::SeqCst);
        debug!(source = %self.source, members = self.members.len(), "joined store connected");
        Ok(())
    }

    /// Disconnects only the composite; members may be shared with other
    /// consumers and are left as they are.
    fn disconnect(&self) -> StoreResult<()> {
        self.connected.store(false, Ordering::SeqCst);
        debug!(source = %self.source, "joined store disconnected");
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn info(&self) -> StoreInfo {
        StoreInfo {
            readonly: false,
            transactional: false,
        }
    }

    fn get(&self, key: &str) -> StoreResult<Value> {
        self.ensure_connected()?;
        self.first_result(key, |member| member.get(key))
    }

    fn get_data(&self, key: &str) -> StoreResult<Box<dyn Read + Send>> {
        self.ensure_connected()?;
        self.first_result(key, |member| member.get_data(key))
    }

    fn get_metadata(&self, key: &str, select: Option<&[&str]>) -> StoreResult<Metadata> {
        self.ensure_connected()?;
        self.first_result(key, |member| member.get_metadata(key, select))
    }

    fn exists(&self, key: &str) -> StoreResult<bool> {
        self.ensure_connected()?;
        for member in &self.members {
            if member.exists(key)? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Union of the members' results; a key present in an earlier member
    /// shadows later members' entries even when the earlier member did not
    /// match the predicates.
    fn query(
        &self,
        select: Option<&[&str]>,
        predicates: &Metadata,
    ) -> StoreResult<Vec<(String, Metadata)>> {
        self.ensure_connected()?;
        let mut results = Vec::new();
        let mut shadowed: HashSet<String> = HashSet::new();
        for member in &self.members {
            for (key, metadata) in member.query(select, predicates)? {
                if !shadowed.contains(&key) {
                    results.push((key, metadata));
                }
            }
            for key in member.query_keys(&Metadata::new())? {
                shadowed.insert(key);
            }
        }
        Ok(results)
    }
}

impl Store for JoinedStore {
    fn set(&self, key: &str, value: Value) -> StoreResult<()> {
        self.ensure_connected()?;
        self.primary()?.set(key, value)
    }

    fn delete(&self, key: &str) -> StoreResult<()> {
        self.ensure_connected()?;
        self.primary()?.delete(key)
    }

    fn set_data(&self, key: &str, data: &mut dyn Read) -> StoreResult<()> {
        self.ensure_connected()?;
        self.primary()?.set_data(key, data)
    }

    fn set_metadata(&self, key: &str, metadata: &Metadata) -> StoreResult<()> {
        self.ensure_connected()?;
        self.primary()?.set_metadata(key, metadata)
    }

    fn update_metadata(&self, key: &str, metadata: &Metadata) -> StoreResult<()> {
        self.ensure_connected()?;
        self.primary()?.update_metadata(key, metadata)
    }

    /// The composite has no backend transaction of its own; scopes track
    /// nesting and emit transaction events only.
    fn transaction(&self, notes: &str) -> StoreResult<Transaction<'_>> {
        self.ensure_connected()?;
        self.transactor.begin(notes)
    }
}

impl std::fmt::Debug for JoinedStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JoinedStore")
            .field("source", &self.source)
            .field("members", &self.members.len())
            .field("connected", &self.is_connected())
            .finish()
    }
}
