//! Schema provisioning.
//!
//! Provisioning is split in two. [`plan`] is a pure function from the
//! structure already present and the target schema to a list of actions;
//! [`apply`] executes that list inside the engine's upgrade transaction.

use crate::schema::Schema;
use orbitkv_engine::{DatabaseInfo, EngineResult, IndexParams, StoreParams, VersionChange};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use tracing::info;

/// One structural change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ProvisionAction {
    /// Create a record collection.
    CreateCollection {
        /// Collection (model) name.
        name: String,
        /// Identifier field.
        key_path: String,
        /// Whether the engine generates identifiers.
        auto_increment: bool,
    },
    /// Create a secondary index on a collection.
    CreateIndex {
        /// Collection the index belongs to.
        collection: String,
        /// Index name (the attribute name).
        name: String,
        /// Indexed field.
        key_path: String,
        /// Whether indexed values must be distinct.
        unique: bool,
    },
}

impl fmt::Display for ProvisionAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CreateCollection {
                name,
                key_path,
                auto_increment,
            } => {
                write!(f, "create collection {name} keyed by {key_path}")?;
                if *auto_increment {
                    f.write_str(" (auto-increment)")?;
                }
                Ok(())
            }
            Self::CreateIndex {
                collection,
                name,
                key_path,
                unique,
            } => {
                let kind = if *unique { "unique index" } else { "index" };
                write!(f, "create {kind} {collection}.{name} on {key_path}")
            }
        }
    }
}

/// Collections and their index names already present in a database.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoreLayout {
    collections: BTreeMap<String, BTreeSet<String>>,
}

impl StoreLayout {
    /// An empty database.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a collection with the given indexes.
    #[must_use]
    pub fn with_collection<I, S>(mut self, name: impl Into<String>, indexes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.collections
            .entry(name.into())
            .or_default()
            .extend(indexes.into_iter().map(Into::into));
        self
    }

    /// Reads the layout of a database being upgraded.
    #[must_use]
    pub fn from_version_change(change: &VersionChange) -> Self {
        let collections = change
            .object_store_names()
            .into_iter()
            .map(|store| {
                let indexes = change.index_names(&store).into_iter().collect();
                (store, indexes)
            })
            .collect();
        Self { collections }
    }

    /// Reads the layout from an engine description of a database.
    #[must_use]
    pub fn from_info(info: &DatabaseInfo) -> Self {
        info.stores.iter().fold(Self::new(), |layout, store| {
            layout.with_collection(
                store.name.clone(),
                store.indexes.iter().map(|index| index.name.clone()),
            )
        })
    }

    /// Returns whether the collection exists.
    #[must_use]
    pub fn has_collection(&self, name: &str) -> bool {
        self.collections.contains_key(name)
    }

    /// Returns whether the index exists on the collection.
    #[must_use]
    pub fn has_index(&self, collection: &str, name: &str) -> bool {
        self.collections
            .get(collection)
            .is_some_and(|indexes| indexes.contains(name))
    }
}

/// Computes the actions that bring `existing` up to `schema`.
///
/// Models are visited in declaration order. Each gets its collection, keyed
/// by the schema's identifier field, and then one index per attribute, named
/// after the attribute. Anything already present is skipped.
#[must_use]
pub fn plan(existing: &StoreLayout, schema: &Schema, auto_increment: bool) -> Vec<ProvisionAction> {
    let mut actions = Vec::new();
    for model in schema.models() {
        if !existing.has_collection(&model.name) {
            actions.push(ProvisionAction::CreateCollection {
                name: model.name.clone(),
                key_path: schema.id_field().to_string(),
                auto_increment,
            });
        }
        for (attribute, descriptor) in &model.attributes {
            if !existing.has_index(&model.name, attribute) {
                actions.push(ProvisionAction::CreateIndex {
                    collection: model.name.clone(),
                    name: attribute.clone(),
                    key_path: attribute.clone(),
                    unique: descriptor.unique,
                });
            }
        }
    }
    actions
}

/// Executes a plan inside an upgrade. Stops at the first engine error.
///
/// # Errors
///
/// Returns the engine error of the first action that fails; the engine then
/// aborts the whole upgrade.
pub fn apply(actions: &[ProvisionAction], change: &mut VersionChange) -> EngineResult<()> {
    for action in actions {
        info!(
            namespace = change.database(),
            version = change.new_version(),
            %action,
            "provisioning"
        );
        match action {
            ProvisionAction::CreateCollection {
                name,
                key_path,
                auto_increment,
            } => change.create_object_store(
                name,
                StoreParams::new(key_path.clone()).auto_increment(*auto_increment),
            )?,
            ProvisionAction::CreateIndex {
                collection,
                name,
                key_path,
                unique,
            } => change.create_index(
                collection,
                name,
                IndexParams::new(key_path.clone()).unique(*unique),
            )?,
        }
    }
    Ok(())
}
