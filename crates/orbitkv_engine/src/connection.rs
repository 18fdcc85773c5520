//! Open database connections.

use crate::engine::{resume_waiting, Shared, VersionChangeHandler};
use crate::error::{EngineError, EngineResult};
use crate::transaction::{StoreMeta, Transaction};
use crate::types::{ConnectionId, TransactionMode, VersionChangeEvent};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// A handle on one open database.
///
/// Clones share the same underlying connection. The connection stays open
/// until [`close`](DbConnection::close) is called on any clone.
#[derive(Clone)]
pub struct DbConnection {
    id: ConnectionId,
    name: String,
    version: u32,
    shared: Arc<Shared>,
}

impl DbConnection {
    pub(crate) fn new(id: ConnectionId, name: String, version: u32, shared: Arc<Shared>) -> Self {
        Self {
            id,
            name,
            version,
            shared,
        }
    }

    /// Connection identifier.
    #[must_use]
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Database name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Version the connection was opened at.
    #[must_use]
    pub fn version(&self) -> u32 {
        self.version
    }

    /// Returns true once the connection has been closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        !self.shared.state.lock().connections.contains_key(&self.id)
    }

    /// Names of the database's object stores, sorted.
    #[must_use]
    pub fn object_store_names(&self) -> Vec<String> {
        self.shared
            .state
            .lock()
            .databases
            .get(&self.name)
            .map(|db| db.stores.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Registers the handler told when another opener wants a newer version
    /// or wants to delete the database. Replaces any earlier handler.
    ///
    /// The requester keeps waiting until this connection closes, so the
    /// handler normally closes it.
    pub fn set_on_version_change(&self, handler: impl Fn(VersionChangeEvent) + Send + Sync + 'static) {
        let handler: VersionChangeHandler = Arc::new(handler);
        if let Some(entry) = self.shared.state.lock().connections.get_mut(&self.id) {
            entry.on_version_change = Some(handler);
        }
    }

    /// Closes the connection. Closing twice is a no-op.
    ///
    /// Transactions already created keep running to completion.
    pub fn close(&self) {
        let waiting = {
            let mut state = self.shared.state.lock();
            if state.connections.remove(&self.id).is_none() {
                return;
            }
            state.has_waiting(&self.name)
        };
        debug!(id = %self.id, database = %self.name, "connection closed");
        if waiting {
            let shared = Arc::clone(&self.shared);
            let name = self.name.clone();
            self.shared
                .enqueue(Box::new(move || resume_waiting(&shared, &name)));
        }
    }

    /// Starts a transaction over the named stores.
    ///
    /// # Errors
    ///
    /// Returns `InvalidAccess` for an empty scope, `InvalidState` if the
    /// connection is closed and `NotFound` for an unknown store.
    pub fn transaction(&self, stores: &[&str], mode: TransactionMode) -> EngineResult<Transaction> {
        if stores.is_empty() {
            return Err(EngineError::invalid_access(
                "a transaction needs at least one object store",
            ));
        }
        let mut state = self.shared.state.lock();
        if !state.connections.contains_key(&self.id) {
            return Err(EngineError::invalid_state(format!(
                "connection to '{}' is closed",
                self.name
            )));
        }
        let db = state
            .databases
            .get(&self.name)
            .ok_or_else(|| EngineError::invalid_state(format!("database '{}' is gone", self.name)))?;

        let mut scope = BTreeMap::new();
        for &store in stores {
            let data = db.stores.get(store).ok_or_else(|| {
                EngineError::not_found(format!("object store '{store}' in '{}'", self.name))
            })?;
            scope.insert(
                store.to_string(),
                StoreMeta {
                    key_path: data.key_path.clone(),
                    auto_increment: data.auto_increment,
                },
            );
        }

        let id = state.next_transaction_id();
        drop(state);
        debug!(txn = %id, connection = %self.id, %mode, stores = ?stores, "transaction started");
        Ok(Transaction::new(
            id,
            self.name.clone(),
            mode,
            scope,
            Arc::clone(&self.shared),
        ))
    }
}

impl fmt::Debug for DbConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DbConnection")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("version", &self.version)
            .finish_non_exhaustive()
    }
}
