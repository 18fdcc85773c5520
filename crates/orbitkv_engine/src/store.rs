//! Object store data.
//!
//! A store owns its records (encoded), its key generator and its indexes.
//! Transactions write to the live stores and keep a [`Journal`] of the keys
//! they touched, which rolls the writes back if the transaction aborts.

use crate::codec;
use crate::error::{EngineError, EngineResult};
use crate::key::{extract_index_key, extract_key, inject_key, Key};
use crate::types::{IndexInfo, IndexParams, StoreInfo, StoreParams};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};

/// Checks a value before it is queued for writing.
///
/// Mirrors the synchronous checks of a write call: the value must be an
/// object and must carry a valid key unless the store generates keys.
pub(crate) fn validate_write(
    value: &Value,
    key_path: &str,
    auto_increment: bool,
) -> EngineResult<()> {
    if !value.is_object() {
        return Err(EngineError::data("stored values must be objects"));
    }
    match extract_key(value, key_path)? {
        Some(_) => Ok(()),
        None if auto_increment => Ok(()),
        None => Err(EngineError::data(format!(
            "value has no key at key path '{key_path}' and the store does not generate keys"
        ))),
    }
}

/// Undo log of one read-write transaction.
///
/// Holds the previous bytes of each touched key and the key generator
/// position of each touched store, so rollback costs only what was written.
#[derive(Debug, Default)]
pub(crate) struct Journal {
    writes: Vec<(String, Key, Option<Vec<u8>>)>,
    next_keys: BTreeMap<String, i64>,
}

impl Journal {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    fn touch(&mut self, store: &str, data: &StoreData) {
        self.next_keys
            .entry(store.to_string())
            .or_insert(data.next_key);
    }

    fn record(&mut self, store: &str, key: Key, previous: Option<Vec<u8>>) {
        self.writes.push((store.to_string(), key, previous));
    }

    /// Number of journaled writes.
    pub(crate) fn len(&self) -> usize {
        self.writes.len()
    }

    /// Undoes every journaled write, newest first.
    pub(crate) fn roll_back(self, stores: &mut BTreeMap<String, StoreData>) -> EngineResult<()> {
        for (store, key, previous) in self.writes.into_iter().rev() {
            if let Some(data) = stores.get_mut(&store) {
                data.restore_record(key, previous)?;
            }
        }
        for (store, next_key) in self.next_keys {
            if let Some(data) = stores.get_mut(&store) {
                data.next_key = next_key;
            }
        }
        Ok(())
    }
}

/// A secondary index: indexed value -> primary keys.
#[derive(Debug, Clone)]
pub(crate) struct IndexData {
    pub(crate) key_path: String,
    pub(crate) unique: bool,
    entries: BTreeMap<Key, BTreeSet<Key>>,
}

impl IndexData {
    fn new(params: IndexParams) -> Self {
        Self {
            key_path: params.key_path,
            unique: params.unique,
            entries: BTreeMap::new(),
        }
    }

    /// Returns the primary key already holding `index_key`, other than `primary`.
    fn conflict(&self, index_key: &Key, primary: &Key) -> Option<&Key> {
        self.entries
            .get(index_key)
            .and_then(|holders| holders.iter().find(|holder| *holder != primary))
    }

    fn insert(&mut self, index_key: Key, primary: Key) {
        self.entries.entry(index_key).or_default().insert(primary);
    }

    fn remove(&mut self, index_key: &Key, primary: &Key) {
        if let Some(holders) = self.entries.get_mut(index_key) {
            holders.remove(primary);
            if holders.is_empty() {
                self.entries.remove(index_key);
            }
        }
    }
}

/// One object store.
#[derive(Debug, Clone)]
pub(crate) struct StoreData {
    pub(crate) key_path: String,
    pub(crate) auto_increment: bool,
    /// Next key the generator hands out.
    pub(crate) next_key: i64,
    records: BTreeMap<Key, Vec<u8>>,
    indexes: BTreeMap<String, IndexData>,
}

impl StoreData {
    pub(crate) fn new(params: StoreParams) -> Self {
        Self {
            key_path: params.key_path,
            auto_increment: params.auto_increment,
            next_key: 1,
            records: BTreeMap::new(),
            indexes: BTreeMap::new(),
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.records.len()
    }

    pub(crate) fn index_names(&self) -> Vec<String> {
        self.indexes.keys().cloned().collect()
    }

    pub(crate) fn indexes(&self) -> impl Iterator<Item = (&String, &IndexData)> {
        self.indexes.iter()
    }

    /// Rebuilds a store from saved parts, re-deriving its indexes.
    pub(crate) fn restore(
        store: &str,
        params: StoreParams,
        next_key: i64,
        indexes: Vec<(String, IndexParams)>,
        records: Vec<Value>,
    ) -> EngineResult<Self> {
        let mut data = Self::new(params);
        for (name, index) in indexes {
            data.create_index(store, &name, index)?;
        }
        for record in records {
            data.add(store, record)?;
        }
        data.next_key = data.next_key.max(next_key);
        Ok(data)
    }

    pub(crate) fn info(&self, name: &str) -> StoreInfo {
        StoreInfo {
            name: name.to_string(),
            key_path: self.key_path.clone(),
            auto_increment: self.auto_increment,
            indexes: self
                .indexes
                .iter()
                .map(|(index_name, index)| IndexInfo {
                    name: index_name.clone(),
                    key_path: index.key_path.clone(),
                    unique: index.unique,
                })
                .collect(),
            record_count: self.records.len(),
        }
    }

    /// Resolves the primary key of `value`, generating one if needed.
    fn resolve_key(&mut self, value: &mut Value) -> EngineResult<Key> {
        match extract_key(value, &self.key_path)? {
            Some(key) => {
                // Explicit integer keys push the generator past them.
                if let Key::Integer(n) = key {
                    if self.auto_increment && n >= self.next_key {
                        self.next_key = n.saturating_add(1);
                    }
                }
                Ok(key)
            }
            None if self.auto_increment => {
                let key = Key::Integer(self.next_key);
                self.next_key = self.next_key.saturating_add(1);
                inject_key(value, &self.key_path, &key)?;
                Ok(key)
            }
            None => Err(EngineError::data(format!(
                "value has no key at key path '{}'",
                self.key_path
            ))),
        }
    }

    fn check_unique(&self, store: &str, value: &Value, primary: &Key) -> EngineResult<()> {
        for (name, index) in self.indexes.iter().filter(|(_, index)| index.unique) {
            if let Some(index_key) = extract_index_key(value, &index.key_path) {
                if let Some(holder) = index.conflict(&index_key, primary) {
                    return Err(EngineError::constraint(format!(
                        "unique index '{name}' on '{store}' already maps {index_key} to key {holder}"
                    )));
                }
            }
        }
        Ok(())
    }

    fn index_record(&mut self, value: &Value, primary: &Key) {
        for index in self.indexes.values_mut() {
            if let Some(index_key) = extract_index_key(value, &index.key_path) {
                index.insert(index_key, primary.clone());
            }
        }
    }

    fn unindex_record(&mut self, primary: &Key) -> EngineResult<()> {
        if let Some(bytes) = self.records.get(primary) {
            let old = codec::decode(bytes)?;
            for index in self.indexes.values_mut() {
                if let Some(index_key) = extract_index_key(&old, &index.key_path) {
                    index.remove(&index_key, primary);
                }
            }
        }
        Ok(())
    }

    /// Inserts a new record; fails if the key exists.
    pub(crate) fn add(&mut self, store: &str, mut value: Value) -> EngineResult<Key> {
        let key = self.resolve_key(&mut value)?;
        if self.records.contains_key(&key) {
            return Err(EngineError::constraint(format!(
                "key {key} already exists in object store '{store}'"
            )));
        }
        self.check_unique(store, &value, &key)?;
        let bytes = codec::encode(&value)?;
        self.index_record(&value, &key);
        self.records.insert(key.clone(), bytes);
        Ok(key)
    }

    /// Inserts or replaces a record, returning the bytes it replaced.
    fn replace(&mut self, store: &str, mut value: Value) -> EngineResult<(Key, Option<Vec<u8>>)> {
        let key = self.resolve_key(&mut value)?;
        self.check_unique(store, &value, &key)?;
        let bytes = codec::encode(&value)?;
        self.unindex_record(&key)?;
        self.index_record(&value, &key);
        let previous = self.records.insert(key.clone(), bytes);
        Ok((key, previous))
    }

    /// [`add`](Self::add), journaled.
    pub(crate) fn add_journaled(
        &mut self,
        store: &str,
        value: Value,
        journal: &mut Journal,
    ) -> EngineResult<Key> {
        journal.touch(store, self);
        let key = self.add(store, value)?;
        journal.record(store, key.clone(), None);
        Ok(key)
    }

    /// Inserts or replaces a record, journaled.
    pub(crate) fn put_journaled(
        &mut self,
        store: &str,
        value: Value,
        journal: &mut Journal,
    ) -> EngineResult<Key> {
        journal.touch(store, self);
        let (key, previous) = self.replace(store, value)?;
        journal.record(store, key.clone(), previous);
        Ok(key)
    }

    /// Removes a record, journaled. Removing a missing key is not an error.
    pub(crate) fn delete_journaled(
        &mut self,
        store: &str,
        key: &Key,
        journal: &mut Journal,
    ) -> EngineResult<()> {
        self.unindex_record(key)?;
        if let Some(previous) = self.records.remove(key) {
            journal.record(store, key.clone(), Some(previous));
        }
        Ok(())
    }

    /// Puts `key` back to `previous`, or removes it when there was none.
    fn restore_record(&mut self, key: Key, previous: Option<Vec<u8>>) -> EngineResult<()> {
        self.unindex_record(&key)?;
        match previous {
            Some(bytes) => {
                let value = codec::decode(&bytes)?;
                self.index_record(&value, &key);
                self.records.insert(key, bytes);
            }
            None => {
                self.records.remove(&key);
            }
        }
        Ok(())
    }

    pub(crate) fn get(&self, key: &Key) -> EngineResult<Option<Value>> {
        self.records.get(key).map(|bytes| codec::decode(bytes)).transpose()
    }

    /// Decoded copies of every record, in key order.
    pub(crate) fn values(&self) -> EngineResult<Vec<Value>> {
        self.records.values().map(|bytes| codec::decode(bytes)).collect()
    }

    /// Creates an index and fills it from the existing records.
    pub(crate) fn create_index(
        &mut self,
        store: &str,
        name: &str,
        params: IndexParams,
    ) -> EngineResult<()> {
        if self.indexes.contains_key(name) {
            return Err(EngineError::constraint(format!(
                "index '{name}' already exists on object store '{store}'"
            )));
        }
        let mut index = IndexData::new(params);
        for (primary, bytes) in &self.records {
            let value = codec::decode(bytes)?;
            if let Some(index_key) = extract_index_key(&value, &index.key_path) {
                if index.unique && index.conflict(&index_key, primary).is_some() {
                    return Err(EngineError::constraint(format!(
                        "existing records violate unique index '{name}' on '{store}'"
                    )));
                }
                index.insert(index_key, primary.clone());
            }
        }
        self.indexes.insert(name.to_string(), index);
        Ok(())
    }
}
