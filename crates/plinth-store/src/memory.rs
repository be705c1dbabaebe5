//! In-memory reference backend.
//!
//! Data and metadata live in a `RwLock`ed map. Intended for tests and
//! embedding, and as the reference implementation of the contract: unlike a
//! minimal map wrapper it carries full transaction support (map snapshots),
//! so batch atomicity and transaction reentrancy are exercised in-tree.

use std::collections::HashMap;
use std::io::Read;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::SystemTime;

use bytes::Bytes;
use tracing::debug;

use plinth_events::{
    Event, EventManager, EventPayload, ExitState, ProgressManager, SourceId,
};

use crate::error::{StoreError, StoreResult};
use crate::metadata::{matches_all, select_metadata, Metadata};
use crate::stream::{copy_chunked, CopyConfig};
use crate::traits::{Credentials, ReadOnlyStore, Store, StoreInfo};
use crate::transaction::{Transaction, TransactionHooks, Transactor};
use crate::value::Value;

#[derive(Clone)]
struct Record {
    data: Bytes,
    metadata: Metadata,
    created: SystemTime,
    modified: SystemTime,
}

type Records = Arc<RwLock<HashMap<String, Record>>>;

/// Transaction hooks that snapshot the whole map on begin and restore it on
/// rollback. Only the outermost scope runs hooks, so one snapshot suffices.
struct SnapshotHooks {
    records: Records,
    snapshot: Mutex<Option<HashMap<String, Record>>>,
}

impl TransactionHooks for SnapshotHooks {
    fn begin(&self) -> StoreResult<()> {
        let snapshot = self.records.read().expect("lock poisoned").clone();
        *self.snapshot.lock().expect("lock poisoned") = Some(snapshot);
        Ok(())
    }

    fn commit(&self) -> StoreResult<()> {
        self.snapshot.lock().expect("lock poisoned").take();
        Ok(())
    }

    fn rollback(&self) -> StoreResult<()> {
        let snapshot = self.snapshot.lock().expect("lock poisoned").take();
        match snapshot {
            Some(snapshot) => {
                *self.records.write().expect("lock poisoned") = snapshot;
                Ok(())
            }
            None => Err(StoreError::Unsupported(
                "rollback without an open transaction".to_string(),
            )),
        }
    }
}

/// Map-based in-memory store.
///
/// Writes stream through chunked copies with keyed progress events; every
/// mutation wraps itself in a transaction scope and emits a set, update, or
/// delete event on success.
pub struct MemoryStore {
    events: Arc<EventManager>,
    source: SourceId,
    connected: AtomicBool,
    records: Records,
    transactor: Transactor,
    copy: CopyConfig,
}

impl MemoryStore {
    pub fn new(events: Arc<EventManager>) -> Self {
        let source = SourceId::new("memory-store");
        let records: Records = Arc::new(RwLock::new(HashMap::new()));
        let hooks = SnapshotHooks {
            records: Arc::clone(&records),
            snapshot: Mutex::new(None),
        };
        let transactor =
            Transactor::with_hooks(Arc::clone(&events), source.clone(), Box::new(hooks));
        Self {
            events,
            source,
            connected: AtomicBool::new(false),
            records,
            transactor,
            copy: CopyConfig::default(),
        }
    }

    /// Override the chunk size used by streaming writes.
    pub fn with_copy_config(mut self, copy: CopyConfig) -> Self {
        self.copy = copy;
        self
    }

    /// Number of keys currently stored.
    pub fn len(&self) -> usize {
        self.records.read().expect("lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().expect("lock poisoned").is_empty()
    }

    fn ensure_connected(&self) -> StoreResult<()> {
        if self.connected.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StoreError::NotConnected)
        }
    }

    /// Replace the record under `key`, preserving its creation time when the
    /// key already exists. Returns whether this was an update.
    fn insert_record(&self, key: &str, data: Bytes, metadata: Metadata) -> bool {
        let mut records = self.records.write().expect("lock poisoned");
        let now = SystemTime::now();
        match records.get_mut(key) {
            Some(record) => {
                record.data = data;
                record.metadata = metadata;
                record.modified = now;
                true
            }
            None => {
                records.insert(
                    key.to_string(),
                    Record {
                        data,
                        metadata,
                        created: now,
                        modified: now,
                    },
                );
                false
            }
        }
    }

    /// Drain `reader` into the store under `key` inside a transaction scope,
    /// reporting keyed progress and emitting a set or update event.
    fn store_stream(
        &self,
        key: &str,
        reader: &mut dyn Read,
        metadata: Metadata,
        steps: i64,
    ) -> StoreResult<()> {
        let scope = self.transaction(&format!("set '{key}'"))?;

        let mut progress = ProgressManager::new(
            Arc::clone(&self.events),
            self.source.clone(),
            &format!("storing '{key}'"),
            steps,
        )
        .for_key(key);
        progress.start()?;
        let mut data = Vec::new();
        match copy_chunked(reader, &mut data, &self.copy, &mut |_| {
            progress.step(None).map_err(StoreError::from)
        }) {
            Ok(_) => progress.end(ExitState::Normal, None)?,
            Err(error) => {
                progress.end(ExitState::Error, Some("store aborted"))?;
                return Err(error);
            }
        }

        let update = self.insert_record(key, Bytes::from(data), metadata.clone());
        let payload = if update {
            EventPayload::StoreUpdate {
                key: key.to_string(),
                metadata,
            }
        } else {
            EventPayload::StoreSet {
                key: key.to_string(),
                metadata,
            }
        };
        self.events.emit(&mut Event::new(self.source.clone(), payload))?;
        scope.commit()
    }

    fn step_total(&self, size: Option<u64>) -> i64 {
        match size {
            Some(bytes) => bytes.div_ceil(self.copy.buffer_size as u64) as i64,
            None => -1,
        }
    }
}

impl ReadOnlyStore for MemoryStore {
    fn event_manager(&self) -> &Arc<EventManager> {
        &self.events
    }

    fn source_id(&self) -> &SourceId {
        &self.source
    }

    fn connect(&self, _credentials: Option<&Credentials>) -> StoreResult<()> {
        // No external resources; credentials are ignored.
        self.connected.store(true, Ordering::SeqCst);
        debug!(source = %self.source, "store connected");
        Ok(())
    }

    fn disconnect(&self) -> StoreResult<()> {
        self.connected.store(false, Ordering::SeqCst);
        debug!(source = %self.source, "store disconnected");
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn info(&self) -> StoreInfo {
        StoreInfo {
            readonly: false,
            transactional: true,
        }
    }

    fn get(&self, key: &str) -> StoreResult<Value> {
        self.ensure_connected()?;
        let records = self.records.read().expect("lock poisoned");
        let record = records
            .get(key)
            .ok_or_else(|| StoreError::NotFound(key.to_string()))?;
        Ok(
            Value::from_bytes(record.data.clone(), record.metadata.clone())
                .with_times(record.created, record.modified),
        )
    }

    fn get_data(&self, key: &str) -> StoreResult<Box<dyn Read + Send>> {
        self.ensure_connected()?;
        let records = self.records.read().expect("lock poisoned");
        let record = records
            .get(key)
            .ok_or_else(|| StoreError::NotFound(key.to_string()))?;
        Ok(Box::new(std::io::Cursor::new(record.data.clone())))
    }

    fn get_metadata(&self, key: &str, select: Option<&[&str]>) -> StoreResult<Metadata> {
        self.ensure_connected()?;
        let records = self.records.read().expect("lock poisoned");
        let record = records
            .get(key)
            .ok_or_else(|| StoreError::NotFound(key.to_string()))?;
        Ok(match select {
            Some(select) => select_metadata(&record.metadata, select),
            None => record.metadata.clone(),
        })
    }

    fn exists(&self, key: &str) -> StoreResult<bool> {
        self.ensure_connected()?;
        Ok(self.records.read().expect("lock poisoned").contains_key(key))
    }

    fn query(
        &self,
        select: Option<&[&str]>,
        predicates: &Metadata,
    ) -> StoreResult<Vec<(String, Metadata)>> {
        self.ensure_connected()?;
        let records = self.records.read().expect("lock poisoned");
        let mut matches: Vec<(String, Metadata)> = records
            .iter()
            .filter(|(_, record)| matches_all(&record.metadata, predicates))
            .map(|(key, record)| {
                let metadata = match select {
                    Some(select) => select_metadata(&record.metadata, select),
                    None => record.metadata.clone(),
                };
                (key.clone(), metadata)
            })
            .collect();
        matches.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(matches)
    }
}

impl Store for MemoryStore {
    fn set(&self, key: &str, value: Value) -> StoreResult<()> {
        self.ensure_connected()?;
        let steps = self.step_total(value.size());
        let (source, metadata) = value.into_parts();
        let mut reader = source.open()?;
        self.store_stream(key, &mut *reader, metadata, steps)
    }

    fn delete(&self, key: &str) -> StoreResult<()> {
        self.ensure_connected()?;
        if !self.records.read().expect("lock poisoned").contains_key(key) {
            return Err(StoreError::NotFound(key.to_string()));
        }
        let scope = self.transaction(&format!("delete '{key}'"))?;
        let metadata = self
            .records
            .write()
            .expect("lock poisoned")
            .remove(key)
            .map(|record| record.metadata)
            .ok_or_else(|| StoreError::NotFound(key.to_string()))?;
        self.events.emit(&mut Event::new(
            self.source.clone(),
            EventPayload::StoreDelete {
                key: key.to_string(),
                metadata,
            },
        ))?;
        scope.commit()
    }

    fn set_data(&self, key: &str, data: &mut dyn Read) -> StoreResult<()> {
        self.ensure_connected()?;
        let metadata = self
            .records
            .read()
            .expect("lock poisoned")
            .get(key)
            .map(|record| record.metadata.clone())
            .unwrap_or_default();
        self.store_stream(key, data, metadata, -1)
    }

    fn set_metadata(&self, key: &str, metadata: &Metadata) -> StoreResult<()> {
        self.ensure_connected()?;
        let scope = self.transaction(&format!("set metadata for '{key}'"))?;
        let update = {
            let mut records = self.records.write().expect("lock poisoned");
            let now = SystemTime::now();
            match records.get_mut(key) {
                Some(record) => {
                    record.metadata = metadata.clone();
                    record.modified = now;
                    true
                }
                None => {
                    records.insert(
                        key.to_string(),
                        Record {
                            data: Bytes::new(),
                            metadata: metadata.clone(),
                            created: now,
                            modified: now,
                        },
                    );
                    false
                }
            }
        };
        let payload = if update {
            EventPayload::StoreUpdate {
                key: key.to_string(),
                metadata: metadata.clone(),
            }
        } else {
            EventPayload::StoreSet {
                key: key.to_string(),
                metadata: metadata.clone(),
            }
        };
        self.events.emit(&mut Event::new(self.source.clone(), payload))?;
        scope.commit()
    }

    fn update_metadata(&self, key: &str, metadata: &Metadata) -> StoreResult<()> {
        self.ensure_connected()?;
        if !self.records.read().expect("lock poisoned").contains_key(key) {
            return Err(StoreError::NotFound(key.to_string()));
        }
        let scope = self.transaction(&format!("update metadata for '{key}'"))?;
        let merged = {
            let mut records = self.records.write().expect("lock poisoned");
            let record = records
                .get_mut(key)
                .ok_or_else(|| StoreError::NotFound(key.to_string()))?;
            record
                .metadata
                .extend(metadata.iter().map(|(k, v)| (k.clone(), v.clone())));
            record.modified = SystemTime::now();
            record.metadata.clone()
        };
        self.events.emit(&mut Event::new(
            self.source.clone(),
            EventPayload::StoreUpdate {
                key: key.to_string(),
                metadata: merged,
            },
        ))?;
        scope.commit()
    }

    fn transaction(&self, notes: &str) -> StoreResult<Transaction<'_>> {
        self.ensure_connected()?;
        self.transactor.begin(notes)
    }
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStore")
            .field("source", &self.source)
            .field("connected", &self.is_connected())
            .field("keys", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StoreResult;
    use crate::metadata;
    use crate::value::DataSource;
    use plinth_events::EventKind;
    use std::sync::Mutex as StdMutex;

    fn store() -> MemoryStore {
        let store = MemoryStore::new(Arc::new(EventManager::new()));
        store.connect(None).unwrap();
        store
    }

    fn collect(store: &MemoryStore, kind: EventKind) -> Arc<StdMutex<Vec<Event>>> {
        let seen: Arc<StdMutex<Vec<Event>>> = Arc::new(StdMutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        store
            .event_manager()
            .connect(kind, 0, None, move |event: &mut Event| {
                sink.lock().unwrap().push(event.clone());
                Ok(())
            });
        seen
    }

    fn read_all(mut reader: Box<dyn Read + Send>) -> Vec<u8> {
        let mut out = Vec::new();
        reader.read_to_end(&mut out).unwrap();
        out
    }

    /// A data source whose stream cannot be opened; used to make one entry
    /// of a batch fail mid-way.
    struct BrokenSource;

    impl DataSource for BrokenSource {
        fn open(&self) -> StoreResult<Box<dyn Read + Send>> {
            Err(StoreError::Io(std::io::Error::other("broken source")))
        }
    }

    // -----------------------------------------------------------------------
    // Round trips and errors
    // -----------------------------------------------------------------------

    #[test]
    fn set_then_get_round_trips() {
        let store = store();
        store
            .set(
                "report.txt",
                Value::from_bytes(&b"contents"[..], metadata! { "author" => "alice" }),
            )
            .unwrap();

        let value = store.get("report.txt").unwrap();
        assert_eq!(read_all(value.data().unwrap()), b"contents");
        assert_eq!(value.metadata(), &metadata! { "author" => "alice" });
        assert_eq!(value.size(), Some(8));
    }

    #[test]
    fn get_missing_key_is_not_found() {
        let store = store();
        assert!(matches!(
            store.get("absent").unwrap_err(),
            StoreError::NotFound(key) if key == "absent"
        ));
        match store.get_data("absent") {
            Err(e) => assert!(matches!(e, StoreError::NotFound(_))),
            Ok(_) => panic!("expected NotFound error"),
        }
        assert!(matches!(
            store.get_metadata("absent", None).unwrap_err(),
            StoreError::NotFound(_)
        ));
    }

    #[test]
    fn keys_are_case_sensitive() {
        let store = store();
        store
            .set("Key", Value::from_bytes(&b"upper"[..], Metadata::new()))
            .unwrap();
        assert!(store.exists("Key").unwrap());
        assert!(!store.exists("key").unwrap());
    }

    #[test]
    fn operations_require_connection() {
        let store = MemoryStore::new(Arc::new(EventManager::new()));
        assert!(matches!(
            store.get("k").unwrap_err(),
            StoreError::NotConnected
        ));
        assert!(matches!(
            store
                .set("k", Value::from_bytes(&b""[..], Metadata::new()))
                .unwrap_err(),
            StoreError::NotConnected
        ));

        store.connect(None).unwrap();
        store
            .set("k", Value::from_bytes(&b""[..], Metadata::new()))
            .unwrap();
        store.disconnect().unwrap();
        assert!(matches!(
            store.exists("k").unwrap_err(),
            StoreError::NotConnected
        ));
    }

    #[test]
    fn disconnect_is_idempotent() {
        let store = store();
        store.disconnect().unwrap();
        store.disconnect().unwrap();
        assert!(!store.is_connected());
    }

    #[test]
    fn info_reports_transactional_writable() {
        let store = store();
        assert_eq!(
            store.info(),
            StoreInfo {
                readonly: false,
                transactional: true,
            }
        );
    }

    // -----------------------------------------------------------------------
    // Modification events
    // -----------------------------------------------------------------------

    #[test]
    fn set_emits_set_then_update() {
        let store = store();
        let sets = collect(&store, EventKind::StoreSet);
        let updates = collect(&store, EventKind::StoreUpdate);

        store
            .set("k", Value::from_bytes(&b"one"[..], Metadata::new()))
            .unwrap();
        store
            .set("k", Value::from_bytes(&b"two"[..], Metadata::new()))
            .unwrap();

        assert_eq!(sets.lock().unwrap().len(), 1);
        assert_eq!(updates.lock().unwrap().len(), 1);
        assert_eq!(
            sets.lock().unwrap()[0].attr("key"),
            Some(serde_json::json!("k"))
        );
    }

    #[test]
    fn delete_emits_last_metadata() {
        let store = store();
        let deletes = collect(&store, EventKind::StoreDelete);
        store
            .set(
                "k",
                Value::from_bytes(&b"data"[..], metadata! { "author" => "alice" }),
            )
            .unwrap();
        store.delete("k").unwrap();

        assert!(!store.exists("k").unwrap());
        let deletes = deletes.lock().unwrap();
        assert_eq!(deletes.len(), 1);
        assert_eq!(
            deletes[0].attr("metadata"),
            Some(serde_json::json!({ "author": "alice" }))
        );
    }

    #[test]
    fn delete_missing_key_is_not_found() {
        let store = store();
        assert!(matches!(
            store.delete("absent").unwrap_err(),
            StoreError::NotFound(_)
        ));
    }

    #[test]
    fn writes_emit_keyed_progress() {
        let store = store().with_copy_config(CopyConfig::with_buffer_size(4));
        let steps = collect(&store, EventKind::StoreProgressStep);
        let ends = collect(&store, EventKind::StoreProgressEnd);

        store
            .set("k", Value::from_bytes(vec![0u8; 10], Metadata::new()))
            .unwrap();

        // Ten bytes in four-byte chunks: three steps, one end.
        assert_eq!(steps.lock().unwrap().len(), 3);
        let ends = ends.lock().unwrap();
        assert_eq!(ends.len(), 1);
        assert_eq!(ends[0].attr("key"), Some(serde_json::json!("k")));
        assert_eq!(ends[0].attr("exit_state"), Some(serde_json::json!("Normal")));
    }

    // -----------------------------------------------------------------------
    // Data / metadata separation
    // -----------------------------------------------------------------------

    #[test]
    fn set_data_preserves_metadata() {
        let store = store();
        store
            .set(
                "k",
                Value::from_bytes(&b"old"[..], metadata! { "author" => "alice" }),
            )
            .unwrap();
        store.from_bytes("k", b"new").unwrap();

        let value = store.get("k").unwrap();
        assert_eq!(read_all(value.data().unwrap()), b"new");
        assert_eq!(value.metadata(), &metadata! { "author" => "alice" });
    }

    #[test]
    fn set_data_on_new_key_creates_empty_metadata() {
        let store = store();
        store.from_bytes("fresh", b"data").unwrap();
        assert_eq!(store.get_metadata("fresh", None).unwrap(), Metadata::new());
    }

    #[test]
    fn set_metadata_preserves_data() {
        let store = store();
        store
            .set("k", Value::from_bytes(&b"payload"[..], metadata! { "v" => 1 }))
            .unwrap();
        store.set_metadata("k", &metadata! { "v" => 2 }).unwrap();

        let value = store.get("k").unwrap();
        assert_eq!(read_all(value.data().unwrap()), b"payload");
        assert_eq!(value.metadata(), &metadata! { "v" => 2 });
    }

    #[test]
    fn update_metadata_merges() {
        let store = store();
        store
            .set(
                "k",
                Value::from_bytes(&b""[..], metadata! { "author" => "alice", "org" => "o1" }),
            )
            .unwrap();
        store
            .update_metadata("k", &metadata! { "org" => "o2", "tag" => "new" })
            .unwrap();

        assert_eq!(
            store.get_metadata("k", None).unwrap(),
            metadata! { "author" => "alice", "org" => "o2", "tag" => "new" }
        );
    }

    #[test]
    fn update_metadata_missing_key_is_not_found() {
        let store = store();
        assert!(matches!(
            store.update_metadata("absent", &metadata! { "a" => 1 }).unwrap_err(),
            StoreError::NotFound(_)
        ));
    }

    #[test]
    fn timestamps_track_creation_and_modification() {
        let store = store();
        store
            .set("k", Value::from_bytes(&b"one"[..], Metadata::new()))
            .unwrap();
        let created = store.get("k").unwrap().created();
        store
            .set("k", Value::from_bytes(&b"two"[..], Metadata::new()))
            .unwrap();

        let value = store.get("k").unwrap();
        assert_eq!(value.created(), created);
        assert!(value.modified() >= created);
    }

    // -----------------------------------------------------------------------
    // Query and glob
    // -----------------------------------------------------------------------

    #[test]
    fn query_is_exact_match_conjunction() {
        let store = store();
        store
            .set(
                "first",
                Value::from_bytes(&b""[..], metadata! { "author" => "a", "org" => "o1" }),
            )
            .unwrap();
        store
            .set(
                "second",
                Value::from_bytes(&b""[..], metadata! { "author" => "a", "org" => "o2" }),
            )
            .unwrap();

        let keys = store
            .query_keys(&metadata! { "author" => "a", "org" => "o1" })
            .unwrap();
        assert_eq!(keys, vec!["first"]);

        let both = store.query_keys(&metadata! { "author" => "a" }).unwrap();
        assert_eq!(both, vec!["first", "second"]);
    }

    #[test]
    fn query_with_empty_predicates_returns_everything() {
        let store = store();
        store
            .set("a", Value::from_bytes(&b""[..], Metadata::new()))
            .unwrap();
        store
            .set("b", Value::from_bytes(&b""[..], Metadata::new()))
            .unwrap();
        assert_eq!(store.query_keys(&Metadata::new()).unwrap(), vec!["a", "b"]);
    }

    #[test]
    fn query_select_subsets_metadata() {
        let store = store();
        store
            .set(
                "k",
                Value::from_bytes(&b""[..], metadata! { "author" => "a", "org" => "o" }),
            )
            .unwrap();
        let results = store
            .query(Some(&["org"]), &metadata! { "author" => "a" })
            .unwrap();
        assert_eq!(results, vec![("k".to_string(), metadata! { "org" => "o" })]);
    }

    #[test]
    fn query_restarts_fresh_each_call() {
        let store = store();
        store
            .set("a", Value::from_bytes(&b""[..], Metadata::new()))
            .unwrap();
        assert_eq!(store.query_keys(&Metadata::new()).unwrap().len(), 1);
        store
            .set("b", Value::from_bytes(&b""[..], Metadata::new()))
            .unwrap();
        assert_eq!(store.query_keys(&Metadata::new()).unwrap().len(), 2);
    }

    #[test]
    fn glob_matches_shell_patterns() {
        let store = store();
        for key in ["report.jpg", "report.txt", "summary.jpg"] {
            store
                .set(key, Value::from_bytes(&b""[..], Metadata::new()))
                .unwrap();
        }
        assert_eq!(
            store.glob("*.jpg").unwrap(),
            vec!["report.jpg", "summary.jpg"]
        );
        assert_eq!(store.glob("report.???").unwrap(), vec!["report.jpg", "report.txt"]);
        assert_eq!(store.glob("report.[jt]*").unwrap(), vec!["report.jpg", "report.txt"]);
        assert!(store.glob("*.png").unwrap().is_empty());
    }

    #[test]
    fn glob_rejects_bad_patterns() {
        let store = store();
        assert!(matches!(
            store.glob("[unclosed").unwrap_err(),
            StoreError::InvalidPattern(_)
        ));
    }

    // -----------------------------------------------------------------------
    // Batch operations
    // -----------------------------------------------------------------------

    #[test]
    fn multiget_preserves_key_order() {
        let store = store();
        store.from_bytes("a", b"1").unwrap();
        store.from_bytes("b", b"2").unwrap();

        let values = store.multiget(&["b", "a"]).unwrap();
        assert_eq!(read_all(values[0].data().unwrap()), b"2");
        assert_eq!(read_all(values[1].data().unwrap()), b"1");
    }

    #[test]
    fn multiget_fails_on_first_missing_key() {
        let store = store();
        store.from_bytes("a", b"1").unwrap();
        assert!(matches!(
            store.multiget(&["a", "missing"]).unwrap_err(),
            StoreError::NotFound(key) if key == "missing"
        ));
    }

    #[test]
    fn multiset_commits_all_entries() {
        let store = store();
        store
            .multiset(vec![
                ("a".to_string(), Value::from_bytes(&b"1"[..], Metadata::new())),
                ("b".to_string(), Value::from_bytes(&b"2"[..], Metadata::new())),
            ])
            .unwrap();
        assert!(store.exists("a").unwrap());
        assert!(store.exists("b").unwrap());
    }

    #[test]
    fn multiset_failure_leaves_no_partial_writes() {
        let store = store();
        let error = store
            .multiset(vec![
                ("a".to_string(), Value::from_bytes(&b"1"[..], Metadata::new())),
                ("b".to_string(), Value::new(Box::new(BrokenSource), Metadata::new())),
                ("c".to_string(), Value::from_bytes(&b"3"[..], Metadata::new())),
            ])
            .unwrap_err();
        assert!(matches!(error, StoreError::Io(_)));

        // The write for `a` was rolled back with the rest of the batch.
        assert!(!store.exists("a").unwrap());
        assert!(!store.exists("c").unwrap());
        assert!(store.is_empty());
    }

    #[test]
    fn multiset_failure_preserves_prior_state() {
        let store = store();
        store.from_bytes("a", b"original").unwrap();

        let result = store.multiset(vec![
            ("a".to_string(), Value::from_bytes(&b"changed"[..], Metadata::new())),
            ("b".to_string(), Value::new(Box::new(BrokenSource), Metadata::new())),
        ]);
        assert!(result.is_err());

        assert_eq!(read_all(store.get_data("a").unwrap()), b"original");
        assert!(!store.exists("b").unwrap());
    }

    #[test]
    fn multiupdate_metadata_is_atomic() {
        let store = store();
        store
            .set("a", Value::from_bytes(&b""[..], metadata! { "v" => 1 }))
            .unwrap();

        // Second entry targets a missing key, so the first merge must not
        // survive.
        let result = store.multiupdate_metadata(&[
            ("a".to_string(), metadata! { "v" => 2 }),
            ("missing".to_string(), metadata! { "v" => 2 }),
        ]);
        assert!(matches!(result.unwrap_err(), StoreError::NotFound(_)));
        assert_eq!(store.get_metadata("a", None).unwrap(), metadata! { "v" => 1 });
    }

    // -----------------------------------------------------------------------
    // Transactions
    // -----------------------------------------------------------------------

    #[test]
    fn nested_transactions_emit_one_event_pair() {
        let store = store();
        let starts = collect(&store, EventKind::StoreTransactionStart);
        let ends = collect(&store, EventKind::StoreTransactionEnd);

        {
            let outer = store.transaction("outer").unwrap();
            {
                let inner = store.transaction("inner").unwrap();
                store.from_bytes("k", b"data").unwrap();
                inner.commit().unwrap();
            }
            outer.commit().unwrap();
        }

        assert_eq!(starts.lock().unwrap().len(), 1);
        assert_eq!(ends.lock().unwrap().len(), 1);
    }

    #[test]
    fn modification_events_are_hidden_until_commit() {
        let store = store();
        let seen = collect(&store, EventKind::StoreModification);

        let scope = store.transaction("batch").unwrap();
        store.from_bytes("k", b"data").unwrap();
        assert!(seen.lock().unwrap().is_empty());
        scope.commit().unwrap();

        assert_eq!(seen.lock().unwrap().len(), 1);
    }

    #[test]
    fn rollback_restores_state_and_discards_events() {
        let store = store();
        store.from_bytes("kept", b"before").unwrap();
        let seen = collect(&store, EventKind::StoreModification);

        {
            let _scope = store.transaction("abandoned").unwrap();
            store.from_bytes("kept", b"changed").unwrap();
            store.from_bytes("new", b"data").unwrap();
            // Dropped without commit.
        }

        assert_eq!(read_all(store.get_data("kept").unwrap()), b"before");
        assert!(!store.exists("new").unwrap());
        assert!(seen.lock().unwrap().is_empty());
    }

    // -----------------------------------------------------------------------
    // File and byte conveniences
    // -----------------------------------------------------------------------

    #[test]
    fn to_file_and_from_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let source_path = dir.path().join("in.bin");
        let dest_path = dir.path().join("out.bin");
        std::fs::write(&source_path, b"file payload").unwrap();

        let store = store();
        store.from_file("k", &source_path).unwrap();
        let written = store
            .to_file("k", &dest_path, &CopyConfig::default())
            .unwrap();

        assert_eq!(written, 12);
        assert_eq!(std::fs::read(&dest_path).unwrap(), b"file payload");
    }

    #[test]
    fn to_bytes_reports_progress() {
        let store = store().with_copy_config(CopyConfig::with_buffer_size(4));
        store.from_bytes("k", &vec![9u8; 10]).unwrap();
        let steps = collect(&store, EventKind::StoreProgressStep);

        let bytes = store
            .to_bytes("k", &CopyConfig::with_buffer_size(4))
            .unwrap();
        assert_eq!(bytes, vec![9u8; 10]);
        assert_eq!(steps.lock().unwrap().len(), 3);
    }

    // -----------------------------------------------------------------------
    // Concurrency
    // -----------------------------------------------------------------------

    #[test]
    fn concurrent_reads_are_safe() {
        use std::thread;

        let store = Arc::new(store());
        store.from_bytes("shared", b"shared data").unwrap();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = Arc::clone(&store);
                thread::spawn(move || {
                    let value = store.get("shared").unwrap();
                    assert_eq!(read_all(value.data().unwrap()), b"shared data");
                })
            })
            .collect();
        for handle in handles {
            handle.join().expect("thread should not panic");
        }
    }
}
