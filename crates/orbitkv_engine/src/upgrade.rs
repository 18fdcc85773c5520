//! The version-change context handed to upgrade handlers.

use crate::error::{EngineError, EngineResult};
use crate::store::StoreData;
use crate::types::{IndexParams, StoreParams};
use std::collections::BTreeMap;
use tracing::debug;

/// Structural access to a database while it is being upgraded.
///
/// Works on a staged copy of the database's stores; nothing becomes visible
/// unless the upgrade handler returns `Ok`.
pub struct VersionChange {
    name: String,
    old_version: u32,
    new_version: u32,
    stores: BTreeMap<String, StoreData>,
}

impl VersionChange {
    pub(crate) fn new(
        name: &str,
        old_version: u32,
        new_version: u32,
        stores: BTreeMap<String, StoreData>,
    ) -> Self {
        Self {
            name: name.to_string(),
            old_version,
            new_version,
            stores,
        }
    }

    /// Database being upgraded.
    #[must_use]
    pub fn database(&self) -> &str {
        &self.name
    }

    /// Version before the upgrade (0 for a new database).
    #[must_use]
    pub fn old_version(&self) -> u32 {
        self.old_version
    }

    /// Version being installed.
    #[must_use]
    pub fn new_version(&self) -> u32 {
        self.new_version
    }

    /// Names of the object stores, sorted.
    #[must_use]
    pub fn object_store_names(&self) -> Vec<String> {
        self.stores.keys().cloned().collect()
    }

    /// Names of the indexes on `store`, sorted. Empty if the store is missing.
    #[must_use]
    pub fn index_names(&self, store: &str) -> Vec<String> {
        self.stores
            .get(store)
            .map(StoreData::index_names)
            .unwrap_or_default()
    }

    /// Creates an object store.
    ///
    /// # Errors
    ///
    /// Returns `Constraint` if the store exists and `InvalidAccess` for an
    /// empty key path.
    pub fn create_object_store(&mut self, name: &str, params: StoreParams) -> EngineResult<()> {
        if self.stores.contains_key(name) {
            return Err(EngineError::constraint(format!(
                "object store '{name}' already exists in '{}'",
                self.name
            )));
        }
        if params.key_path.is_empty() {
            return Err(EngineError::invalid_access(format!(
                "object store '{name}' needs a key path"
            )));
        }
        debug!(database = %self.name, store = name, key_path = %params.key_path, "creating object store");
        self.stores.insert(name.to_string(), StoreData::new(params));
        Ok(())
    }

    /// Creates an index on an existing object store.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the store is missing and `Constraint` if the
    /// index exists or existing records violate its uniqueness.
    pub fn create_index(&mut self, store: &str, name: &str, params: IndexParams) -> EngineResult<()> {
        let data = self.stores.get_mut(store).ok_or_else(|| {
            EngineError::not_found(format!("object store '{store}' in '{}'", self.name))
        })?;
        debug!(database = %self.name, store, index = name, unique = params.unique, "creating index");
        data.create_index(store, name, params)
    }

    pub(crate) fn into_stores(self) -> BTreeMap<String, StoreData> {
        self.stores
    }
}
