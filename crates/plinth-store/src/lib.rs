//! Backend-agnostic key-value storage with change notification.
//!
//! This crate defines the store contract the Plinth stack is built on: a
//! [`Value`] pairing a lazily-opened data stream with a metadata map, the
//! [`ReadOnlyStore`] / [`Store`] capability tiers, reentrant transaction
//! scopes, exact-match querying with shell-style globbing, and an in-memory
//! reference backend plus a composite [`JoinedStore`].
//!
//! # Contract Rules
//!
//! 1. `get*` on a missing key fails with [`StoreError::NotFound`]; any
//!    operation on a disconnected store fails with
//!    [`StoreError::NotConnected`].
//! 2. Data and metadata materialize independently; fetching one never forces
//!    the other.
//! 3. A multi operation equals the single-key operation applied once per key
//!    in order, wrapped in one transaction: on transactional backends a
//!    failure part-way through leaves no partial writes visible.
//! 4. Only the outermost transaction scope runs backend hooks and emits
//!    transaction events; modification events raised inside a hooks-backed
//!    transaction are withheld until commit and discarded on rollback.
//! 5. Mutations emit store-set (new key), store-update (existing key), or
//!    store-delete events through the store's
//!    [`EventManager`](plinth_events::EventManager) on success.

pub mod error;
pub mod joined;
pub mod memory;
pub mod metadata;
pub mod stream;
pub mod traits;
pub mod transaction;
pub mod value;

// Re-export primary types at crate root for ergonomic imports.
pub use error::{StoreError, StoreResult};
pub use joined::JoinedStore;
pub use memory::MemoryStore;
pub use metadata::{matches_all, select_metadata, Metadata};
pub use stream::{copy_chunked, read_chunked, Chunks, CopyConfig, DEFAULT_BUFFER_SIZE};
pub use traits::{AuthorizingStore, Credentials, Permissions, ReadOnlyStore, Store, StoreInfo};
pub use transaction::{Transaction, TransactionHooks, Transactor};
pub use value::{BytesDataSource, DataSource, FileDataSource, Value};
