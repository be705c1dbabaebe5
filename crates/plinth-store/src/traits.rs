//! The store contract: read-only and writable key-value interfaces.
//!
//! Backends implement the abstract operations; the batch ("multi") forms,
//! querying conveniences, and file/byte transfer helpers are provided as
//! default methods so every backend honors the same semantics. A multi
//! operation is equivalent to the single-key operation applied once per key
//! in order, wrapped in one transaction, so a failure part-way through rolls
//! the whole batch back on transactional backends.

use std::collections::{BTreeMap, BTreeSet};
use std::io::Read;
use std::path::Path;
use std::sync::Arc;

use globset::GlobBuilder;
use serde::{Deserialize, Serialize};

use plinth_events::{EventManager, ExitState, ProgressManager, SourceId};

use crate::error::{StoreError, StoreResult};
use crate::metadata::Metadata;
use crate::stream::{copy_chunked, CopyConfig};
use crate::transaction::Transaction;
use crate::value::Value;

/// Authentication material handed to [`ReadOnlyStore::connect`].
///
/// The interpretation is backend-specific; backends without authentication
/// ignore it.
#[derive(Clone, Serialize, Deserialize)]
pub struct Credentials {
    pub username: String,
    pub secret: String,
}

impl Credentials {
    pub fn new(username: &str, secret: &str) -> Self {
        Self {
            username: username.to_string(),
            secret: secret.to_string(),
        }
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("secret", &"<redacted>")
            .finish()
    }
}

/// Capabilities reported by a store.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreInfo {
    /// Whether the store rejects writes.
    pub readonly: bool,
    /// Whether batches are atomic (the backend has real transaction hooks).
    pub transactional: bool,
}

/// Permission name to the set of user tags holding it.
pub type Permissions = BTreeMap<String, BTreeSet<String>>;

/// The read-only key-value contract.
///
/// Keys are case-sensitive strings with no imposed structure. Every `get*`
/// on a missing key fails with [`StoreError::NotFound`], and every operation
/// on a disconnected store fails with [`StoreError::NotConnected`].
pub trait ReadOnlyStore: Send + Sync {
    /// The event manager this store emits through.
    fn event_manager(&self) -> &Arc<EventManager>;

    /// The identity stamped on this store's events.
    fn source_id(&self) -> &SourceId;

    /// Connect to the store, optionally authenticating.
    fn connect(&self, credentials: Option<&Credentials>) -> StoreResult<()>;

    /// Disconnect from the store. Idempotent: disconnecting twice succeeds.
    fn disconnect(&self) -> StoreResult<()>;

    fn is_connected(&self) -> bool;

    fn info(&self) -> StoreInfo;

    /// Retrieve the value stored under `key`.
    fn get(&self, key: &str) -> StoreResult<Value>;

    /// Open a reader over the data stored under `key`.
    fn get_data(&self, key: &str) -> StoreResult<Box<dyn Read + Send>>;

    /// Retrieve the metadata stored under `key`, optionally restricted to
    /// the `select` subset of metadata keys.
    fn get_metadata(&self, key: &str, select: Option<&[&str]>) -> StoreResult<Metadata>;

    fn exists(&self, key: &str) -> StoreResult<bool>;

    /// Every (key, metadata) pair whose metadata contains all of
    /// `predicates` as exact matches. Empty predicates match everything.
    /// Each call re-queries the store.
    fn query(
        &self,
        select: Option<&[&str]>,
        predicates: &Metadata,
    ) -> StoreResult<Vec<(String, Metadata)>>;

    /// The keys matching `predicates`, without their metadata.
    fn query_keys(&self, predicates: &Metadata) -> StoreResult<Vec<String>> {
        Ok(self
            .query(None, predicates)?
            .into_iter()
            .map(|(key, _)| key)
            .collect())
    }

    /// The keys matching a shell-style pattern (`*`, `?`, `[...]`) applied
    /// to the full key string.
    fn glob(&self, pattern: &str) -> StoreResult<Vec<String>> {
        let matcher = GlobBuilder::new(pattern)
            .literal_separator(false)
            .build()?
            .compile_matcher();
        Ok(self
            .query_keys(&Metadata::new())?
            .into_iter()
            .filter(|key| matcher.is_match(key))
            .collect())
    }

    /// Retrieve several values; results are in the order of `keys`.
    fn multiget(&self, keys: &[&str]) -> StoreResult<Vec<Value>> {
        keys.iter().map(|key| self.get(key)).collect()
    }

    /// Open readers over several keys' data, in order.
    fn multiget_data(&self, keys: &[&str]) -> StoreResult<Vec<Box<dyn Read + Send>>> {
        keys.iter().map(|key| self.get_data(key)).collect()
    }

    /// Retrieve several keys' metadata, in order.
    fn multiget_metadata(
        &self,
        keys: &[&str],
        select: Option<&[&str]>,
    ) -> StoreResult<Vec<Metadata>> {
        keys.iter()
            .map(|key| self.get_metadata(key, select))
            .collect()
    }

    /// Stream the data under `key` into a file, emitting keyed progress
    /// events per chunk. Returns the number of bytes written.
    fn to_file(&self, key: &str, path: &Path, config: &CopyConfig) -> StoreResult<u64> {
        let mut reader = self.get_data(key)?;
        let mut file = std::fs::File::create(path)?;
        let mut progress = ProgressManager::new(
            Arc::clone(self.event_manager()),
            self.source_id().clone(),
            &format!("copying '{key}' to file"),
            -1,
        )
        .for_key(key);
        progress.start()?;
        match copy_chunked(&mut *reader, &mut file, config, &mut |_| {
            progress.step(None).map_err(StoreError::from)
        }) {
            Ok(written) => {
                progress.end(ExitState::Normal, None)?;
                Ok(written)
            }
            Err(error) => {
                progress.end(ExitState::Error, Some("copy aborted"))?;
                Err(error)
            }
        }
    }

    /// Read the data under `key` into one buffer, chunk by chunk, emitting
    /// keyed progress events.
    fn to_bytes(&self, key: &str, config: &CopyConfig) -> StoreResult<Vec<u8>> {
        let mut reader = self.get_data(key)?;
        let mut out = Vec::new();
        let mut progress = ProgressManager::new(
            Arc::clone(self.event_manager()),
            self.source_id().clone(),
            &format!("reading '{key}'"),
            -1,
        )
        .for_key(key);
        progress.start()?;
        match copy_chunked(&mut *reader, &mut out, config, &mut |_| {
            progress.step(None).map_err(StoreError::from)
        }) {
            Ok(_) => {
                progress.end(ExitState::Normal, None)?;
                Ok(out)
            }
            Err(error) => {
                progress.end(ExitState::Error, Some("read aborted"))?;
                Err(error)
            }
        }
    }
}

/// The writable key-value contract.
///
/// Mutating operations emit, on success, a store-set event for a new key, a
/// store-update event for an existing one, and a store-delete event carrying
/// the last metadata on removal. Writes on a read-only capability fail with
/// [`StoreError::Unsupported`].
pub trait Store: ReadOnlyStore {
    /// Store `value` under `key`, replacing any previous value.
    fn set(&self, key: &str, value: Value) -> StoreResult<()>;

    /// Remove `key`. Fails with [`StoreError::NotFound`] when absent.
    fn delete(&self, key: &str) -> StoreResult<()>;

    /// Replace the data under `key`, preserving its metadata. A new key gets
    /// empty metadata.
    fn set_data(&self, key: &str, data: &mut dyn Read) -> StoreResult<()>;

    /// Replace the metadata under `key`, preserving its data. A new key gets
    /// an empty data stream.
    fn set_metadata(&self, key: &str, metadata: &Metadata) -> StoreResult<()>;

    /// Merge `metadata` into the existing metadata under `key`: existing
    /// entries are overwritten, new entries added, absent entries untouched.
    /// All-or-nothing: a failure leaves the previous metadata intact.
    fn update_metadata(&self, key: &str, metadata: &Metadata) -> StoreResult<()>;

    /// Open a transaction scope described by `notes`.
    ///
    /// Scopes nest: only the outermost runs the backend hooks and emits
    /// transaction events.
    fn transaction(&self, notes: &str) -> StoreResult<Transaction<'_>>;

    /// Store several values, in order, as one transaction.
    fn multiset(&self, entries: Vec<(String, Value)>) -> StoreResult<()> {
        let scope = self.transaction("multiset")?;
        for (key, value) in entries {
            self.set(&key, value)?;
        }
        scope.commit()
    }

    /// Replace several keys' data, in order, as one transaction.
    fn multiset_data(&self, entries: Vec<(String, Box<dyn Read + Send>)>) -> StoreResult<()> {
        let scope = self.transaction("multiset_data")?;
        for (key, mut data) in entries {
            self.set_data(&key, &mut *data)?;
        }
        scope.commit()
    }

    /// Replace several keys' metadata, in order, as one transaction.
    fn multiset_metadata(&self, entries: &[(String, Metadata)]) -> StoreResult<()> {
        let scope = self.transaction("multiset_metadata")?;
        for (key, metadata) in entries {
            self.set_metadata(key, metadata)?;
        }
        scope.commit()
    }

    /// Merge into several keys' metadata, in order, as one transaction.
    fn multiupdate_metadata(&self, entries: &[(String, Metadata)]) -> StoreResult<()> {
        let scope = self.transaction("multiupdate_metadata")?;
        for (key, metadata) in entries {
            self.update_metadata(key, metadata)?;
        }
        scope.commit()
    }

    /// Replace the data under `key` with a file's contents.
    fn from_file(&self, key: &str, path: &Path) -> StoreResult<()> {
        let mut file = std::fs::File::open(path)?;
        self.set_data(key, &mut file)
    }

    /// Replace the data under `key` with an in-memory payload.
    fn from_bytes(&self, key: &str, data: &[u8]) -> StoreResult<()> {
        let mut cursor = std::io::Cursor::new(data);
        self.set_data(key, &mut cursor)
    }
}

/// Optional tier for stores that track per-key permissions.
///
/// Defined here at the interface boundary; realized by external backends
/// with real user models.
pub trait AuthorizingStore: Store {
    /// The tag identifying the connected user in permission sets.
    fn user_tag(&self) -> StoreResult<String>;

    /// The permission sets for `key`.
    fn get_permissions(&self, key: &str) -> StoreResult<Permissions>;

    /// Replace the permission sets for `key`.
    fn set_permissions(&self, key: &str, permissions: &Permissions) -> StoreResult<()>;

    /// Merge into the permission sets for `key`: each named permission's tag
    /// set is unioned with the given tags.
    fn update_permissions(&self, key: &str, permissions: &Permissions) -> StoreResult<()> {
        let mut merged = self.get_permissions(key)?;
        for (name, tags) in permissions {
            merged
                .entry(name.clone())
                .or_default()
                .extend(tags.iter().cloned());
        }
        self.set_permissions(key, &merged)
    }
}
