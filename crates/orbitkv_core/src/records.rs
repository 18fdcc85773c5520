//! CRUD operations on record collections.

use crate::bridge::{bridge, SettleOn};
use crate::connection::EngineConnection;
use crate::error::{AdapterError, AdapterResult};
use crate::schema::{is_missing_id, Record, Schema};
use orbitkv_engine::{EngineError, Key, TransactionMode};
use serde_json::Value;
use tracing::debug;

/// CRUD over one connection, as described by one schema.
pub(crate) struct RecordOps<'a> {
    pub(crate) connection: &'a EngineConnection,
    pub(crate) schema: &'a Schema,
    pub(crate) auto_increment: bool,
}

impl RecordOps<'_> {
    fn engine_error(&self) -> impl Fn(EngineError) -> AdapterError + '_ {
        move |err| AdapterError::from_engine(self.connection.namespace(), &err)
    }

    fn check_model(&self, model: &str) -> AdapterResult<()> {
        if self.schema.model(model).is_none() {
            return Err(AdapterError::invalid_argument(format!(
                "'{model}' is not a model of this schema"
            )));
        }
        Ok(())
    }

    /// Validates a lookup identifier before any transaction is opened.
    fn lookup_key(&self, model: &str, id: &Value) -> AdapterResult<Key> {
        if is_missing_id(Some(id)) {
            return Err(AdapterError::invalid_argument(format!(
                "no id given for '{model}'"
            )));
        }
        Key::from_value(id).ok_or_else(|| {
            AdapterError::invalid_argument(format!("'{id}' is not a valid id for '{model}'"))
        })
    }

    /// Checks the record's identifier. With auto-increment an absent one is
    /// dropped for the engine to assign.
    fn require_id(&self, model: &str, record: &mut Record) -> AdapterResult<()> {
        if self.schema.id_of(record).is_some() {
            return Ok(());
        }
        if self.auto_increment && is_missing_id(record.get(self.schema.id_field())) {
            self.schema.strip_missing_id(record);
            return Ok(());
        }
        Err(AdapterError::invalid_argument(format!(
            "'{model}' record has no valid '{}'",
            self.schema.id_field()
        )))
    }

    /// Inserts a record; resolves with it (carrying any generated id) once
    /// the transaction has committed.
    pub(crate) async fn add(&self, model: &str, mut record: Record) -> AdapterResult<Record> {
        self.check_model(model)?;
        self.schema.init_record(model, &mut record);
        self.require_id(model, &mut record)?;
        debug!(namespace = self.connection.namespace(), store = model, "add");

        let pending = {
            let db = self.connection.handle()?;
            let txn = db
                .transaction(&[model], TransactionMode::ReadWrite)
                .map_err(self.engine_error())?;
            let request = txn
                .object_store(model)
                .and_then(|store| store.add(Value::Object(record.clone())))
                .map_err(self.engine_error())?;
            let id_field = self.schema.id_field().to_string();
            let pending = bridge(
                self.connection.namespace(),
                &request,
                &txn,
                SettleOn::TransactionComplete,
                move |key: Key| {
                    record.entry(id_field).or_insert_with(|| key.to_value());
                    Ok(record)
                },
            );
            txn.commit().map_err(self.engine_error())?;
            pending
        };
        pending.await
    }

    /// Looks up a record. Resolves with `None` if it does not exist.
    pub(crate) async fn get(&self, model: &str, id: &Value) -> AdapterResult<Option<Record>> {
        let key = self.lookup_key(model, id)?;
        self.check_model(model)?;
        debug!(namespace = self.connection.namespace(), store = model, %key, "get");

        let pending = {
            let db = self.connection.handle()?;
            let txn = db
                .transaction(&[model], TransactionMode::ReadOnly)
                .map_err(self.engine_error())?;
            let request = txn
                .object_store(model)
                .and_then(|store| store.get(key))
                .map_err(self.engine_error())?;
            let pending = bridge(
                self.connection.namespace(),
                &request,
                &txn,
                SettleOn::RequestSuccess,
                |value: Option<Value>| match value {
                    None => Ok(None),
                    Some(Value::Object(record)) => Ok(Some(record)),
                    Some(_) => Err(AdapterError::from(EngineError::data(
                        "stored value is not a record",
                    ))),
                },
            );
            txn.commit().map_err(self.engine_error())?;
            pending
        };
        pending.await
    }

    /// Inserts or replaces a record; resolves with it once committed.
    pub(crate) async fn put(&self, model: &str, mut record: Record) -> AdapterResult<Record> {
        self.check_model(model)?;
        self.require_id(model, &mut record)?;
        debug!(namespace = self.connection.namespace(), store = model, "put");

        let pending = {
            let db = self.connection.handle()?;
            let txn = db
                .transaction(&[model], TransactionMode::ReadWrite)
                .map_err(self.engine_error())?;
            let request = txn
                .object_store(model)
                .and_then(|store| store.put(Value::Object(record.clone())))
                .map_err(self.engine_error())?;
            let id_field = self.schema.id_field().to_string();
            let pending = bridge(
                self.connection.namespace(),
                &request,
                &txn,
                SettleOn::TransactionComplete,
                move |key: Key| {
                    record.entry(id_field).or_insert_with(|| key.to_value());
                    Ok(record)
                },
            );
            txn.commit().map_err(self.engine_error())?;
            pending
        };
        pending.await
    }

    /// Removes a record. Removing a missing record succeeds.
    pub(crate) async fn delete(&self, model: &str, id: &Value) -> AdapterResult<()> {
        let key = self.lookup_key(model, id)?;
        self.check_model(model)?;
        debug!(namespace = self.connection.namespace(), store = model, %key, "delete");

        let pending = {
            let db = self.connection.handle()?;
            let txn = db
                .transaction(&[model], TransactionMode::ReadWrite)
                .map_err(self.engine_error())?;
            let request = txn
                .object_store(model)
                .and_then(|store| store.delete(key))
                .map_err(self.engine_error())?;
            let pending = bridge(
                self.connection.namespace(),
                &request,
                &txn,
                SettleOn::TransactionComplete,
                Ok,
            );
            txn.commit().map_err(self.engine_error())?;
            pending
        };
        pending.await
    }
}
