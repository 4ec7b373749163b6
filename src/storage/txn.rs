//! Optimistic multi-document transactions.
//! ----------------------------------------
//! A `Transaction` buffers writes and overlays them on every read it performs.
//! Each read also records which committed documents (and versions) it observed.
//! `commit` takes the store's write lock, re-runs those reads against the
//! committed state, checks the base versions of rewritten documents and the
//! unique indexes, and only then applies the buffered writes. Any drift is a
//! `WriteConflict`, which the runner treats as transient and retries. Dropping
//! a transaction without committing discards it.

use std::collections::BTreeMap;
use std::time::Instant;

use tracing::debug;

use super::catalog::Catalog;
use super::document::{doc_id, Document, Filter, FindOptions, Projection, Update, ID_FIELD};
use super::error::{StoreError, StoreResult};
use super::Store;
use crate::ids::ObjectId;

#[derive(Debug, Clone)]
struct ReadRecord {
    collection: String,
    filter: Filter,
    observed: Vec<(String, u64)>,
}

#[derive(Debug, Clone)]
struct PendingWrite {
    /// Committed version this write replaces; None for inserts.
    base_version: Option<u64>,
    /// None marks a delete.
    body: Option<Document>,
}

type WriteKey = (String, String);

pub struct Transaction {
    store: Store,
    reads: Vec<ReadRecord>,
    writes: BTreeMap<WriteKey, PendingWrite>,
}

impl Transaction {
    pub(crate) fn new(store: Store) -> Self {
        Self { store, reads: Vec::new(), writes: BTreeMap::new() }
    }

    pub fn is_read_only(&self) -> bool { self.writes.is_empty() }

    pub fn pending_writes(&self) -> usize { self.writes.len() }

    /// Matching documents as this transaction sees them: committed state with the
    /// buffered writes layered on top. Returns (id, base version, body).
    fn view(&mut self, collection: &str, filter: &Filter) -> StoreResult<Vec<(String, Option<u64>, Document)>> {
        let mut out: BTreeMap<String, (Option<u64>, Document)> = BTreeMap::new();
        {
            let catalog = self.store.inner.read();
            let coll = catalog.collection(collection)?;
            let hits = coll.scan(filter);
            self.reads.push(ReadRecord {
                collection: collection.to_string(),
                filter: filter.clone(),
                observed: hits.iter().map(|(id, d)| (id.to_string(), d.version)).collect(),
            });
            for (id, d) in hits {
                out.insert(id.to_string(), (Some(d.version), d.body.clone()));
            }
        }
        for ((c, id), w) in self.writes.range((collection.to_string(), String::new())..) {
            if c != collection { break; }
            match &w.body {
                Some(body) if filter.matches(body) => { out.insert(id.clone(), (w.base_version, body.clone())); }
                _ => { out.remove(id); }
            }
        }
        Ok(out.into_iter().map(|(id, (v, b))| (id, v, b)).collect())
    }

    pub fn find(&mut self, collection: &str, filter: &Filter, opts: &FindOptions) -> StoreResult<Vec<Document>> {
        let mut docs: Vec<Document> = self.view(collection, filter)?.into_iter().map(|(_, _, b)| b).collect();
        if let Some(sort) = &opts.sort {
            docs.sort_by(|a, b| sort.compare(a, b));
        }
        if let Some(limit) = opts.limit { docs.truncate(limit); }
        Ok(docs.iter().map(|d| opts.projection.apply(d)).collect())
    }

    pub fn find_one(&mut self, collection: &str, filter: &Filter, projection: &Projection) -> StoreResult<Option<Document>> {
        let opts = FindOptions::default().projection(projection.clone()).limit(1);
        Ok(self.find(collection, filter, &opts)?.into_iter().next())
    }

    pub fn count(&mut self, collection: &str, filter: &Filter) -> StoreResult<usize> {
        Ok(self.view(collection, filter)?.len())
    }

    /// Buffer an insert, assigning a fresh `_id` when the document has none.
    pub fn insert(&mut self, collection: &str, mut doc: Document) -> StoreResult<String> {
        let id = match doc.get(ID_FIELD) {
            None => {
                let id = ObjectId::new().to_hex();
                doc.insert(ID_FIELD.to_string(), id.clone().into());
                id
            }
            Some(_) => doc_id(&doc)
                .map(str::to_string)
                .ok_or_else(|| StoreError::MissingId { collection: collection.to_string() })?,
        };
        let key = (collection.to_string(), id.clone());
        let exists = self.writes.contains_key(&key)
            || self.store.inner.read().collection(collection)?.docs.contains_key(&id);
        if exists {
            return Err(StoreError::DuplicateKey { collection: collection.to_string(), index: ID_FIELD.to_string() });
        }
        self.stage(key, PendingWrite { base_version: None, body: Some(doc) })?;
        Ok(id)
    }

    /// Apply `update` to every visible match. Returns the number of documents matched.
    pub fn update_many(&mut self, collection: &str, filter: &Filter, update: &Update) -> StoreResult<usize> {
        let hits = self.view(collection, filter)?;
        let n = hits.len();
        for (id, base_version, mut body) in hits {
            update.apply(&mut body);
            self.stage((collection.to_string(), id), PendingWrite { base_version, body: Some(body) })?;
        }
        Ok(n)
    }

    /// Apply `update` to the first visible match in `_id` order.
    pub fn update_one(&mut self, collection: &str, filter: &Filter, update: &Update) -> StoreResult<bool> {
        let Some((id, base_version, mut body)) = self.view(collection, filter)?.into_iter().next() else {
            return Ok(false);
        };
        update.apply(&mut body);
        self.stage((collection.to_string(), id), PendingWrite { base_version, body: Some(body) })?;
        Ok(true)
    }

    /// Delete every visible match. Returns the number of documents removed.
    pub fn delete_many(&mut self, collection: &str, filter: &Filter) -> StoreResult<usize> {
        let hits = self.view(collection, filter)?;
        let n = hits.len();
        for (id, base_version, _) in hits {
            self.writes.insert((collection.to_string(), id), PendingWrite { base_version, body: None });
        }
        Ok(n)
    }

    /// Stage a write after checking unique indexes against committed state plus
    /// everything buffered so far. A rejected write leaves the buffer untouched.
    fn stage(&mut self, key: WriteKey, write: PendingWrite) -> StoreResult<()> {
        let previous = self.writes.insert(key.clone(), write);
        let checked = {
            let catalog = self.store.inner.read();
            check_collection_unique(&catalog, &key.0, &self.writes)
        };
        if let Err(e) = checked {
            match previous {
                Some(p) => { self.writes.insert(key, p); }
                None => { self.writes.remove(&key); }
            }
            return Err(e);
        }
        Ok(())
    }

    /// Validate and apply. `deadline`, when given, is checked under the commit lock
    /// so an expired transaction never becomes visible.
    pub fn commit(self, deadline: Option<Instant>) -> StoreResult<()> {
        if self.writes.is_empty() { return Ok(()); }
        let mut catalog = self.store.inner.write();
        if deadline.map(|d| Instant::now() >= d).unwrap_or(false) {
            return Err(StoreError::DeadlineExceeded { attempts: 1 });
        }
        for r in &self.reads {
            if catalog.observe(&r.collection, &r.filter)? != r.observed {
                debug!(target: "accountd::storage", collection = %r.collection, "read set changed before commit");
                return Err(StoreError::WriteConflict { collection: r.collection.clone() });
            }
        }
        for ((c, id), w) in &self.writes {
            let current = catalog.collection(c)?.docs.get(id).map(|d| d.version);
            match (w.base_version, current) {
                (None, Some(_)) => {
                    return Err(StoreError::DuplicateKey { collection: c.clone(), index: ID_FIELD.to_string() });
                }
                (Some(base), cur) if Some(base) != cur => {
                    debug!(target: "accountd::storage", collection = %c, id = %id, "stale base version");
                    return Err(StoreError::WriteConflict { collection: c.clone() });
                }
                _ => {}
            }
        }
        let mut touched: Vec<&str> = self.writes.keys().map(|(c, _)| c.as_str()).collect();
        touched.dedup();
        for c in &touched {
            check_collection_unique(&catalog, c, &self.writes)?;
        }
        let n = self.writes.len();
        for ((c, id), w) in self.writes {
            let coll = catalog.collection_mut(&c)?;
            match w.body {
                Some(body) => coll.put(&id, body),
                None => coll.remove(&id),
            }
        }
        catalog.commits += 1;
        debug!(target: "accountd::storage", writes = n, commit = catalog.commits, "transaction committed");
        Ok(())
    }

    pub fn abort(self) {}
}

fn check_collection_unique(catalog: &Catalog, collection: &str, writes: &BTreeMap<WriteKey, PendingWrite>) -> StoreResult<()> {
    let coll = catalog.collection(collection)?;
    let in_coll = writes
        .iter()
        .filter(|((c, _), _)| c == collection)
        .map(|((_, id), w)| (id.as_str(), w.body.as_ref()));
    coll.check_unique(collection, in_coll)
}
