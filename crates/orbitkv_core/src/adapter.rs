//! The storage adapter facade.

use crate::config::AdapterConfig;
use crate::connection::{ConnectionState, EngineConnection};
use crate::dispatch::{route, Instruction, Operation, OperationOutcome};
use crate::error::{AdapterError, AdapterResult};
use crate::provision::{apply, plan, StoreLayout};
use crate::records::RecordOps;
use crate::schema::{Record, Schema};
use orbitkv_engine::{MemoryEngine, VersionChangeEvent};
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info};

/// A schema-driven storage adapter over one engine namespace.
///
/// The adapter owns the namespace's [`EngineConnection`]. Initializing it
/// opens the connection, provisioning collections and indexes when the
/// configured version is newer than the stored one. Every operation returns
/// a future that settles exactly once; writes settle only after their
/// transaction has committed.
///
/// # Example
///
/// ```rust,no_run
/// use orbitkv_core::{AdapterConfig, Schema, StorageAdapter};
/// use orbitkv_engine::MemoryEngine;
/// use serde_json::json;
///
/// # async fn run() -> Result<(), Box<dyn std::error::Error>> {
/// let schema = Schema::from_json(r#"{"idField": "id", "models": {"planet": {}}}"#)?;
/// let adapter = StorageAdapter::initialize(MemoryEngine::new(), schema, AdapterConfig::default()).await?;
///
/// let record = json!({"id": "p1", "name": "Jupiter"}).as_object().cloned().unwrap_or_default();
/// adapter.add("planet", record).await?;
/// assert!(adapter.find("planet", "p1").await?.is_some());
/// # Ok(())
/// # }
/// ```
pub struct StorageAdapter {
    schema: Schema,
    config: AdapterConfig,
    connection: EngineConnection,
    ready: AtomicBool,
}

impl StorageAdapter {
    /// Opens the configured namespace and provisions it if needed.
    ///
    /// The ready callback runs once the adapter is usable.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` for a bad configuration, `UnsupportedEnvironment`
    /// if the engine is unavailable, or the mapped engine error of a failed
    /// open or provisioning.
    pub async fn initialize(
        engine: MemoryEngine,
        schema: Schema,
        config: AdapterConfig,
    ) -> AdapterResult<Self> {
        config.validate()?;
        if !engine.is_available() {
            return Err(AdapterError::UnsupportedEnvironment {
                message: "the storage engine is not available in this environment".to_string(),
            });
        }
        let connection =
            EngineConnection::new(engine, config.namespace.clone(), config.on_blocked.clone());
        let adapter = Self {
            schema,
            config,
            connection,
            ready: AtomicBool::new(false),
        };
        adapter.open().await?;
        adapter.notify_ready();
        Ok(adapter)
    }

    async fn open(&self) -> AdapterResult<()> {
        let schema = self.schema.clone();
        let auto_increment = self.config.auto_increment;
        self.connection
            .open(self.config.version, move |change| {
                let existing = StoreLayout::from_version_change(change);
                let actions = plan(&existing, &schema, auto_increment);
                apply(&actions, change)
            })
            .await?;
        Ok(())
    }

    fn notify_ready(&self) {
        if self.ready.swap(true, Ordering::SeqCst) {
            return;
        }
        info!(namespace = %self.config.namespace, version = self.config.version, "adapter ready");
        if let Some(callback) = &self.config.on_ready {
            callback();
        }
    }

    fn records(&self) -> RecordOps<'_> {
        RecordOps {
            connection: &self.connection,
            schema: &self.schema,
            auto_increment: self.config.auto_increment,
        }
    }

    /// Inserts a record, filling in a missing identifier first.
    ///
    /// # Errors
    ///
    /// `DuplicateKey` if the identifier (or a unique attribute) is taken,
    /// `InvalidArgument` for an unknown model or a record without an
    /// identifier, `ConnectionClosed` after close.
    pub async fn add(&self, model: &str, record: Record) -> AdapterResult<Record> {
        self.records().add(model, record).await
    }

    /// Looks up a record; `None` if it does not exist.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` for a missing or invalid identifier, without
    /// touching the engine.
    pub async fn get(&self, model: &str, id: impl Into<Value>) -> AdapterResult<Option<Record>> {
        let id = id.into();
        self.records().get(model, &id).await
    }

    /// Same as [`get`](Self::get).
    ///
    /// # Errors
    ///
    /// See [`get`](Self::get).
    pub async fn find(&self, model: &str, id: impl Into<Value>) -> AdapterResult<Option<Record>> {
        self.get(model, id).await
    }

    /// Inserts or replaces a record.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` for a record without an identifier.
    pub async fn put(&self, model: &str, record: Record) -> AdapterResult<Record> {
        self.records().put(model, record).await
    }

    /// Removes a record. Removing a missing record succeeds.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` for a missing or invalid identifier.
    pub async fn delete(&self, model: &str, id: impl Into<Value>) -> AdapterResult<()> {
        let id = id.into();
        self.records().delete(model, &id).await
    }

    /// Applies an abstract operation.
    ///
    /// # Errors
    ///
    /// `UnsupportedOperation` for sub-record paths and unknown ops, returned
    /// before the engine is touched; otherwise the error of the routed call.
    pub async fn apply_operation(&self, operation: &Operation) -> AdapterResult<OperationOutcome> {
        let instruction = route(operation, self.schema.id_field())?;
        debug!(namespace = %self.config.namespace, op = %operation.op, "applying operation");
        match instruction {
            Instruction::Add { model, record } => {
                self.add(&model, record).await.map(OperationOutcome::Record)
            }
            Instruction::Put { model, record } => {
                self.put(&model, record).await.map(OperationOutcome::Record)
            }
            Instruction::Delete { model, id } => {
                self.delete(&model, id).await?;
                Ok(OperationOutcome::Removed)
            }
        }
    }

    /// Closes the connection and deletes the namespace with all its data.
    ///
    /// Operations fail with `ConnectionClosed` until [`reopen`](Self::reopen)
    /// or [`reset`](Self::reset).
    ///
    /// # Errors
    ///
    /// The mapped engine error if the deletion fails.
    pub async fn delete_database(&self) -> AdapterResult<()> {
        let version = self.connection.delete_database().await?;
        info!(namespace = %self.config.namespace, deleted_version = version, "database deleted");
        Ok(())
    }

    /// Deletes the namespace and opens it again, provisioning from empty.
    ///
    /// # Errors
    ///
    /// The error of the deletion or of the new open.
    pub async fn reset(&self) -> AdapterResult<()> {
        self.delete_database().await?;
        self.open().await
    }

    /// Opens the connection again after a close or a version change.
    /// A no-op while open.
    ///
    /// # Errors
    ///
    /// As for [`initialize`](Self::initialize).
    pub async fn reopen(&self) -> AdapterResult<()> {
        self.open().await
    }

    /// Closes the connection. Later operations fail with `ConnectionClosed`.
    pub fn close(&self) {
        self.connection.close();
    }

    /// Registers an observer told after the connection was closed because
    /// another connection needed a newer version or deleted the namespace.
    pub fn on_version_change(&self, observer: impl Fn(VersionChangeEvent) + Send + Sync + 'static) {
        self.connection.on_version_change(observer);
    }

    /// Connection lifecycle state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.connection.state()
    }

    /// Namespace served.
    #[must_use]
    pub fn namespace(&self) -> &str {
        &self.config.namespace
    }

    /// Configured schema version.
    #[must_use]
    pub fn version(&self) -> u32 {
        self.config.version
    }

    /// The schema.
    #[must_use]
    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// The configuration.
    #[must_use]
    pub fn config(&self) -> &AdapterConfig {
        &self.config
    }
}

impl std::fmt::Debug for StorageAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageAdapter")
            .field("config", &self.config)
            .field("connection", &self.connection)
            .finish_non_exhaustive()
    }
}
