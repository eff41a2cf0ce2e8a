use crate::normalize::normalize;
use crate::schema::FieldMap;
use log::{debug, warn};
use std::collections::HashMap;

/// One extracted field, keyed by its normalized label.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexedField {
    pub key: String,
    pub raw_key: String,
    pub value: String,
}

/// Normalized view of a [`FieldMap`], built once per fill run.
///
/// Entries iterate in declaration order. Keys that normalize to the same
/// text share the slot of their first occurrence and carry the value of
/// their last one. Keys that normalize to nothing are dropped, since an
/// empty key would be contained in every label.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldIndex {
    entries: Vec<IndexedField>,
}

impl FieldIndex {
    pub fn build(fields: &FieldMap) -> Self {
        let mut entries: Vec<IndexedField> = Vec::with_capacity(fields.len());
        let mut slots: HashMap<String, usize> = HashMap::new();

        for (raw_key, value) in fields.iter() {
            let key = normalize(raw_key);
            if key.is_empty() {
                warn!("Ignoring field with blank label {:?}", raw_key);
                continue;
            }

            match slots.get(&key) {
                Some(&slot) => {
                    debug!(
                        "Field {:?} normalizes to existing key {:?}; replacing value from {:?}",
                        raw_key, key, entries[slot].raw_key
                    );
                    entries[slot].raw_key = raw_key.to_string();
                    entries[slot].value = value.to_string();
                }
                None => {
                    slots.insert(key.clone(), entries.len());
                    entries.push(IndexedField {
                        key,
                        raw_key: raw_key.to_string(),
                        value: value.to_string(),
                    });
                }
            }
        }

        Self { entries }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &IndexedField> {
        self.entries.iter()
    }

    /// Exact lookup by normalized key.
    pub fn get(&self, key: &str) -> Option<&IndexedField> {
        self.entries.iter().find(|e| e.key == key)
    }
}

impl From<&FieldMap> for FieldIndex {
    fn from(fields: &FieldMap) -> Self {
        Self::build(fields)
    }
}
