//!
//! accountd storage module
//! -----------------------
//! An in-process document store: named collections of JSON documents, each with
//! a string `_id` and a version number, plus unique and secondary indexes.
//!
//! Key responsibilities:
//! - Optimistic multi-document transactions (`Transaction`) with commit-time
//!   validation of everything the transaction read, which makes committed
//!   transactions serializable.
//! - `run_transaction`: retry on transient conflicts, bounded by a deadline.
//! - Unique indexes (optionally partial) enforced at write time and again under
//!   the commit lock.
//! - Atomic snapshots to disk for restart.
//!
//! The public API centers around `Store`, a cheap clonable handle over
//! `Arc<RwLock<..>>`. The lock is never held across an `.await`.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::info;

mod catalog;
mod document;
mod error;
mod index;
mod runner;
mod settings;
mod snapshot;
mod txn;

pub use document::{
    compare_values, doc_id, from_document, to_document, Direction, Document, Filter, FindOptions, Projection, Sort,
    Update, UpdateOp, ID_FIELD,
};
pub use error::{StoreError, StoreResult};
pub use index::IndexSpec;
pub use settings::{PersistenceSettings, StoreSettings, TxnSettings};
pub use snapshot::SNAPSHOT_FILE;
pub use txn::Transaction;

use catalog::{Catalog, Collection};

/// Handle to the document store. Clones share the same underlying state.
#[derive(Clone)]
pub struct Store {
    inner: Arc<RwLock<Catalog>>,
    settings: Arc<StoreSettings>,
    data_dir: Option<PathBuf>,
}

impl Store {
    /// Volatile store; `save_snapshot` does nothing.
    pub fn in_memory(settings: StoreSettings) -> Self {
        Self { inner: Arc::new(RwLock::new(Catalog::default())), settings: Arc::new(settings), data_dir: None }
    }

    /// Store rooted at `dir`, restoring the latest snapshot found there.
    pub fn open(dir: impl AsRef<Path>, settings: StoreSettings) -> StoreResult<Self> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)?;
        let catalog = snapshot::load_snapshot(&dir)?.unwrap_or_default();
        info!(target: "accountd::storage", dir = %dir.display(), collections = catalog.collections.len(), "store opened");
        Ok(Self { inner: Arc::new(RwLock::new(catalog)), settings: Arc::new(settings), data_dir: Some(dir) })
    }

    pub fn settings(&self) -> &StoreSettings { &self.settings }

    pub fn data_dir(&self) -> Option<&Path> { self.data_dir.as_deref() }

    /// Create the collection if needed and (re)build its indexes from `indexes`.
    pub fn ensure_collection(&self, name: &str, indexes: &[IndexSpec]) -> StoreResult<()> {
        let mut catalog = self.inner.write();
        let coll = catalog.collections.entry(name.to_string()).or_insert_with(Collection::default);
        coll.set_indexes(name, indexes)
    }

    pub fn has_collection(&self, name: &str) -> bool { self.inner.read().collections.contains_key(name) }

    pub fn begin(&self) -> Transaction { Transaction::new(self.clone()) }

    /// Non-transactional read of the latest committed state.
    pub fn find(&self, collection: &str, filter: &Filter, opts: &FindOptions) -> StoreResult<Vec<Document>> {
        let catalog = self.inner.read();
        let mut docs: Vec<&Document> = catalog.collection(collection)?.scan(filter).into_iter().map(|(_, d)| &d.body).collect();
        if let Some(sort) = &opts.sort {
            docs.sort_by(|a, b| sort.compare(a, b));
        }
        if let Some(limit) = opts.limit { docs.truncate(limit); }
        Ok(docs.into_iter().map(|d| opts.projection.apply(d)).collect())
    }

    pub fn find_one(&self, collection: &str, filter: &Filter, projection: &Projection) -> StoreResult<Option<Document>> {
        let opts = FindOptions::default().projection(projection.clone()).limit(1);
        Ok(self.find(collection, filter, &opts)?.into_iter().next())
    }

    pub fn count(&self, collection: &str, filter: &Filter) -> StoreResult<usize> {
        Ok(self.inner.read().collection(collection)?.scan(filter).len())
    }

    /// Committed version of a document, if present.
    pub fn version_of(&self, collection: &str, id: &str) -> StoreResult<Option<u64>> {
        Ok(self.inner.read().collection(collection)?.docs.get(id).map(|d| d.version))
    }

    /// Number of committed write transactions since the store was created.
    pub fn commit_count(&self) -> u64 { self.inner.read().commits }
}
