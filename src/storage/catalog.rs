//! Committed state of the store: collections of versioned documents plus their
//! materialized indexes. Everything here runs under the store's lock.

use std::collections::{BTreeMap, HashMap};

use serde_json::Value;

use super::document::{Document, Filter, ID_FIELD};
use super::error::{StoreError, StoreResult};
use super::index::{IndexSpec, IndexState};

#[derive(Debug, Clone)]
pub(crate) struct StoredDoc {
    /// Bumped on every committed write; inserts start at 1.
    pub version: u64,
    pub body: Document,
}

#[derive(Debug, Clone, Default)]
pub(crate) struct Collection {
    pub docs: BTreeMap<String, StoredDoc>,
    pub indexes: Vec<IndexState>,
}

impl Collection {
    /// Replace the index set and rebuild it from the committed documents.
    pub fn set_indexes(&mut self, collection: &str, specs: &[IndexSpec]) -> StoreResult<()> {
        let mut built = Vec::with_capacity(specs.len());
        for spec in specs {
            let mut state = IndexState::new(spec.clone());
            for (id, doc) in &self.docs {
                if spec.unique {
                    if let Some(k) = spec.key_for(&doc.body) {
                        if state.lookup(&k).is_some() {
                            return Err(StoreError::DuplicateKey { collection: collection.to_string(), index: spec.name.clone() });
                        }
                    }
                }
                state.insert(id, &doc.body);
            }
            built.push(state);
        }
        self.indexes = built;
        Ok(())
    }

    /// Candidate ids for a filter using `_id` or an index; None means a full scan.
    fn candidates(&self, filter: &Filter) -> Option<Vec<String>> {
        if let Some(Value::String(id)) = filter.pinned(ID_FIELD) {
            return Some(if self.docs.contains_key(id) { vec![id.clone()] } else { Vec::new() });
        }
        for idx in &self.indexes {
            if let Some(key) = idx.spec.key_for_filter(filter) {
                return Some(idx.lookup(&key).map(|s| s.iter().cloned().collect()).unwrap_or_default());
            }
        }
        None
    }

    /// Committed documents matching `filter`, in `_id` order.
    pub fn scan<'a>(&'a self, filter: &Filter) -> Vec<(&'a str, &'a StoredDoc)> {
        match self.candidates(filter) {
            Some(ids) => ids
                .iter()
                .filter_map(|id| self.docs.get_key_value(id))
                .filter(|(_, d)| filter.matches(&d.body))
                .map(|(id, d)| (id.as_str(), d))
                .collect(),
            None => self
                .docs
                .iter()
                .filter(|(_, d)| filter.matches(&d.body))
                .map(|(id, d)| (id.as_str(), d))
                .collect(),
        }
    }

    /// Check unique indexes assuming `writes` (id -> new body, None for a delete)
    /// replace the committed versions of those ids.
    pub fn check_unique<'w, I>(&self, collection: &str, writes: I) -> StoreResult<()>
    where
        I: IntoIterator<Item = (&'w str, Option<&'w Document>)> + Clone,
    {
        for idx in self.indexes.iter().filter(|i| i.spec.unique) {
            let mut seen: HashMap<String, &str> = HashMap::new();
            for (id, body) in writes.clone() {
                let Some(key) = body.and_then(|b| idx.spec.key_for(b)) else { continue };
                let rewritten = |other: &str| writes.clone().into_iter().any(|(w, _)| w == other);
                let taken = idx
                    .lookup(&key)
                    .map(|holders| holders.iter().any(|h| h != id && !rewritten(h)))
                    .unwrap_or(false);
                let twice = matches!(seen.insert(key, id), Some(prev) if prev != id);
                if taken || twice {
                    return Err(StoreError::DuplicateKey { collection: collection.to_string(), index: idx.spec.name.clone() });
                }
            }
        }
        Ok(())
    }

    pub fn put(&mut self, id: &str, body: Document) {
        let version = match self.docs.get(id) {
            Some(old) => {
                for idx in self.indexes.iter_mut() { idx.remove(id, &old.body); }
                old.version + 1
            }
            None => 1,
        };
        for idx in self.indexes.iter_mut() { idx.insert(id, &body); }
        self.docs.insert(id.to_string(), StoredDoc { version, body });
    }

    pub fn remove(&mut self, id: &str) {
        if let Some(old) = self.docs.remove(id) {
            for idx in self.indexes.iter_mut() { idx.remove(id, &old.body); }
        }
    }
}

#[derive(Debug, Default)]
pub(crate) struct Catalog {
    pub collections: HashMap<String, Collection>,
    /// Number of committed write transactions.
    pub commits: u64,
}

impl Catalog {
    pub fn collection(&self, name: &str) -> StoreResult<&Collection> {
        self.collections.get(name).ok_or_else(|| StoreError::UnknownCollection(name.to_string()))
    }

    pub fn collection_mut(&mut self, name: &str) -> StoreResult<&mut Collection> {
        self.collections.get_mut(name).ok_or_else(|| StoreError::UnknownCollection(name.to_string()))
    }

    /// (id, version) pairs of the committed documents matching `filter`.
    pub fn observe(&self, collection: &str, filter: &Filter) -> StoreResult<Vec<(String, u64)>> {
        Ok(self
            .collection(collection)?
            .scan(filter)
            .into_iter()
            .map(|(id, d)| (id.to_string(), d.version))
            .collect())
    }
}
