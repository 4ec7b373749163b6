use std::collections::{BTreeMap, BTreeSet};

use serde_json::Value;

use super::document::{Document, Filter};

/// Declarative index definition for a collection.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexSpec {
    pub name: String,
    pub fields: Vec<String>,
    pub unique: bool,
    /// Only documents matching this filter are indexed.
    pub partial: Option<Filter>,
}

impl IndexSpec {
    pub fn new<I, S>(name: impl Into<String>, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self { name: name.into(), fields: fields.into_iter().map(Into::into).collect(), unique: false, partial: None }
    }

    pub fn unique(mut self) -> Self { self.unique = true; self }

    pub fn partial(mut self, filter: Filter) -> Self { self.partial = Some(filter); self }

    /// Index key for a document, or None when the document is not covered
    /// (filtered out by the partial filter, or a key field is absent).
    pub fn key_for(&self, doc: &Document) -> Option<String> {
        if let Some(p) = &self.partial {
            if !p.matches(doc) { return None; }
        }
        let mut parts = Vec::with_capacity(self.fields.len());
        for f in &self.fields {
            match doc.get(f) {
                None | Some(Value::Null) => return None,
                Some(v) => parts.push(v.clone()),
            }
        }
        Some(Value::Array(parts).to_string())
    }

    /// Key a query would hit, when the filter pins every indexed field and implies the
    /// partial filter.
    pub(crate) fn key_for_filter(&self, filter: &Filter) -> Option<String> {
        if let Some(p) = &self.partial {
            if !filter.implies(p) { return None; }
        }
        let mut parts = Vec::with_capacity(self.fields.len());
        for f in &self.fields {
            parts.push(filter.pinned(f)?.clone());
        }
        Some(Value::Array(parts).to_string())
    }
}

/// Materialized index: key -> document ids.
#[derive(Debug, Clone)]
pub(crate) struct IndexState {
    pub spec: IndexSpec,
    entries: BTreeMap<String, BTreeSet<String>>,
}

impl IndexState {
    pub fn new(spec: IndexSpec) -> Self { Self { spec, entries: BTreeMap::new() } }

    pub fn lookup(&self, key: &str) -> Option<&BTreeSet<String>> { self.entries.get(key) }

    pub fn insert(&mut self, doc_id: &str, doc: &Document) {
        if let Some(k) = self.spec.key_for(doc) {
            self.entries.entry(k).or_default().insert(doc_id.to_string());
        }
    }

    pub fn remove(&mut self, doc_id: &str, doc: &Document) {
        if let Some(k) = self.spec.key_for(doc) {
            if let Some(set) = self.entries.get_mut(&k) {
                set.remove(doc_id);
                if set.is_empty() { self.entries.remove(&k); }
            }
        }
    }

    pub fn len(&self) -> usize { self.entries.values().map(|s| s.len()).sum() }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn partial_unique_index_skips_soft_deleted() {
        let spec = IndexSpec::new("username_live", ["username"]).unique().partial(Filter::missing("deleted_at"));
        let live = json!({"_id": "1", "username": "ana"}).as_object().cloned().unwrap();
        let gone = json!({"_id": "2", "username": "ana", "deleted_at": 7}).as_object().cloned().unwrap();
        assert!(spec.key_for(&live).is_some());
        assert!(spec.key_for(&gone).is_none());

        let q = Filter::eq("username", "ana").and(Filter::missing("deleted_at"));
        assert_eq!(spec.key_for_filter(&q), spec.key_for(&live));
        assert!(spec.key_for_filter(&Filter::eq("username", "ana")).is_none());
    }

    #[test]
    fn remove_drops_empty_keys() {
        let mut idx = IndexState::new(IndexSpec::new("by_account", ["account_id"]));
        let d = json!({"_id": "1", "account_id": "a"}).as_object().cloned().unwrap();
        idx.insert("1", &d);
        assert_eq!(idx.len(), 1);
        idx.remove("1", &d);
        assert_eq!(idx.len(), 0);
        assert!(idx.lookup(&spec_key("a")).is_none());
    }

    fn spec_key(v: &str) -> String { Value::Array(vec![json!(v)]).to_string() }
}
