//! Local mirror of server-side collections.
//!
//! Each collection is created lazily by its first `added` diff. Documents are
//! schema-less field maps; `changed` is a shallow key-wise overwrite and
//! never creates a document.

use std::collections::{BTreeMap, HashMap};

use serde_json::Value;

use super::protocol::Fields;

/// One document of a collection.
///
/// The field map always carries the document id under `"id"`.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    id: String,
    fields: Fields,
}

impl Document {
    fn new(id: &str, mut fields: Fields) -> Self {
        fields.insert("id".to_string(), Value::String(id.to_string()));
        Self {
            id: id.to_string(),
            fields,
        }
    }

    /// Document id.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Field value by key.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    /// String field by key.
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.fields.get(key).and_then(Value::as_str)
    }

    /// All fields, `id` included.
    pub fn fields(&self) -> &Fields {
        &self.fields
    }

    /// The document as a JSON object.
    pub fn to_value(&self) -> Value {
        Value::Object(self.fields.clone())
    }

    fn merge(&mut self, fields: Fields, cleared: &[String]) {
        for (key, value) in fields {
            if key != "id" {
                self.fields.insert(key, value);
            }
        }
        for key in cleared {
            if key != "id" {
                self.fields.remove(key);
            }
        }
    }
}

/// All mirrored collections, keyed by name.
#[derive(Debug, Default)]
pub struct CollectionStore {
    collections: HashMap<String, BTreeMap<String, Document>>,
}

impl CollectionStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a document, replacing any previous one with the same id.
    pub fn apply_added(&mut self, collection: &str, id: &str, fields: Fields) {
        self.collections
            .entry(collection.to_string())
            .or_default()
            .insert(id.to_string(), Document::new(id, fields));
    }

    /// Merge `fields` into an existing document and drop `cleared` keys.
    ///
    /// Returns `false` (and changes nothing) when the document is unknown.
    pub fn apply_changed(
        &mut self,
        collection: &str,
        id: &str,
        fields: Fields,
        cleared: &[String],
    ) -> bool {
        match self
            .collections
            .get_mut(collection)
            .and_then(|docs| docs.get_mut(id))
        {
            Some(doc) => {
                doc.merge(fields, cleared);
                true
            }
            None => {
                log::debug!("[Ddp] changed for unknown document {}/{}", collection, id);
                false
            }
        }
    }

    /// Remove a document. Returns `false` when it was not present.
    pub fn apply_removed(&mut self, collection: &str, id: &str) -> bool {
        self.collections
            .get_mut(collection)
            .and_then(|docs| docs.remove(id))
            .is_some()
    }

    /// Point lookup.
    pub fn get(&self, collection: &str, id: &str) -> Option<&Document> {
        self.collections.get(collection).and_then(|docs| docs.get(id))
    }

    /// Every document of a collection, ordered by id.
    pub fn list(&self, collection: &str) -> Vec<&Document> {
        self.collections
            .get(collection)
            .map(|docs| docs.values().collect())
            .unwrap_or_default()
    }

    /// Number of documents in a collection.
    pub fn len(&self, collection: &str) -> usize {
        self.collections.get(collection).map_or(0, BTreeMap::len)
    }

    /// Names of every collection seen so far.
    pub fn collection_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.collections.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Forget every collection.
    pub fn clear(&mut self) {
        self.collections.clear();
    }
}
