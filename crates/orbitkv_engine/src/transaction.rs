//! Transactions and object store handles.
//!
//! A transaction collects requests until [`Transaction::commit`] hands it to
//! the event loop. The loop runs every request in order against the live
//! stores while holding the engine lock, journaling each write. If all
//! succeed, each request reports success and then the transaction completes.
//! The first failing request reports its error, every later request is
//! aborted, the journal is rolled back, and the transaction reports an error
//! with nothing applied.

use crate::engine::{Job, Shared};
use crate::error::{EngineError, EngineResult};
use crate::event::{EventSlot, Request};
use crate::key::Key;
use crate::store::{validate_write, Journal, StoreData};
use crate::types::{TransactionId, TransactionMode};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, error, warn};

/// Metadata of a store in scope, captured when the transaction starts.
#[derive(Debug, Clone)]
pub(crate) struct StoreMeta {
    pub(crate) key_path: String,
    pub(crate) auto_increment: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    /// Accepting requests.
    Active,
    /// Handed to the event loop.
    Committing,
    /// Completed or aborted.
    Finished,
}

type Delivery = Box<dyn FnOnce() + Send + 'static>;

enum PendingOp {
    Add {
        store: String,
        value: Value,
        request: Request<Key>,
    },
    Put {
        store: String,
        value: Value,
        request: Request<Key>,
    },
    Get {
        store: String,
        key: Key,
        request: Request<Option<Value>>,
    },
    GetAll {
        store: String,
        request: Request<Vec<Value>>,
    },
    Count {
        store: String,
        request: Request<usize>,
    },
    Delete {
        store: String,
        key: Key,
        request: Request<()>,
    },
}

fn store_mut<'a>(
    stores: &'a mut BTreeMap<String, StoreData>,
    name: &str,
) -> EngineResult<&'a mut StoreData> {
    stores
        .get_mut(name)
        .ok_or_else(|| EngineError::not_found(format!("object store '{name}'")))
}

fn settle<T: Send + 'static>(
    request: Request<T>,
    result: EngineResult<T>,
) -> Result<Delivery, (EngineError, Delivery)> {
    match result {
        Ok(value) => Ok(Box::new(move || request.succeed(value))),
        Err(err) => {
            let delivered = err.clone();
            Err((err, Box::new(move || request.fail(delivered))))
        }
    }
}

fn fail_later<T: Send + 'static>(request: Request<T>, err: EngineError) -> Delivery {
    Box::new(move || request.fail(err))
}

impl PendingOp {
    fn run(
        self,
        stores: &mut BTreeMap<String, StoreData>,
        journal: &mut Journal,
    ) -> Result<Delivery, (EngineError, Delivery)> {
        match self {
            PendingOp::Add {
                store,
                value,
                request,
            } => settle(
                request,
                store_mut(stores, &store).and_then(|s| s.add_journaled(&store, value, journal)),
            ),
            PendingOp::Put {
                store,
                value,
                request,
            } => settle(
                request,
                store_mut(stores, &store).and_then(|s| s.put_journaled(&store, value, journal)),
            ),
            PendingOp::Get {
                store,
                key,
                request,
            } => settle(request, store_mut(stores, &store).and_then(|s| s.get(&key))),
            PendingOp::GetAll { store, request } => {
                settle(request, store_mut(stores, &store).and_then(|s| s.values()))
            }
            PendingOp::Count { store, request } => {
                settle(request, store_mut(stores, &store).map(|s| s.len()))
            }
            PendingOp::Delete {
                store,
                key,
                request,
            } => settle(
                request,
                store_mut(stores, &store).and_then(|s| s.delete_journaled(&store, &key, journal)),
            ),
        }
    }

    fn abort(self, err: EngineError) -> Delivery {
        match self {
            PendingOp::Add { request, .. } | PendingOp::Put { request, .. } => fail_later(request, err),
            PendingOp::Get { request, .. } => fail_later(request, err),
            PendingOp::GetAll { request, .. } => fail_later(request, err),
            PendingOp::Count { request, .. } => fail_later(request, err),
            PendingOp::Delete { request, .. } => fail_later(request, err),
        }
    }
}

struct TransactionInner {
    id: TransactionId,
    db_name: String,
    mode: TransactionMode,
    scope: BTreeMap<String, StoreMeta>,
    phase: Mutex<Phase>,
    ops: Mutex<Vec<PendingOp>>,
    complete: EventSlot<()>,
    error: EventSlot<EngineError>,
}

/// A unit of atomic work over a fixed set of object stores.
///
/// Dropping a transaction that was never committed aborts it.
pub struct Transaction {
    inner: Arc<TransactionInner>,
    shared: Arc<Shared>,
}

impl Transaction {
    pub(crate) fn new(
        id: TransactionId,
        db_name: String,
        mode: TransactionMode,
        scope: BTreeMap<String, StoreMeta>,
        shared: Arc<Shared>,
    ) -> Self {
        Self {
            inner: Arc::new(TransactionInner {
                id,
                db_name,
                mode,
                scope,
                phase: Mutex::new(Phase::Active),
                ops: Mutex::new(Vec::new()),
                complete: EventSlot::new(),
                error: EventSlot::new(),
            }),
            shared,
        }
    }

    /// Transaction identifier.
    #[must_use]
    pub fn id(&self) -> TransactionId {
        self.inner.id
    }

    /// Access mode.
    #[must_use]
    pub fn mode(&self) -> TransactionMode {
        self.inner.mode
    }

    /// Returns a handle on a store in scope.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the store is not part of this transaction.
    pub fn object_store(&self, name: &str) -> EngineResult<ObjectStore<'_>> {
        let meta = self.inner.scope.get(name).ok_or_else(|| {
            EngineError::not_found(format!(
                "object store '{name}' is not in the scope of {}",
                self.inner.id
            ))
        })?;
        Ok(ObjectStore {
            txn: self,
            name: name.to_string(),
            meta: meta.clone(),
        })
    }

    /// Registers the handler run after every request has succeeded and the
    /// writes are durable.
    pub fn on_complete(&self, handler: impl FnOnce() + Send + 'static) {
        self.inner.complete.set_handler(move |()| handler());
    }

    /// Registers the handler run when the transaction aborts.
    pub fn on_error(&self, handler: impl FnOnce(EngineError) + Send + 'static) {
        self.inner.error.set_handler(handler);
    }

    /// Hands the queued requests to the engine.
    ///
    /// # Errors
    ///
    /// Returns `TransactionInactive` if the transaction was already committed
    /// or aborted.
    pub fn commit(&self) -> EngineResult<()> {
        {
            let mut phase = self.inner.phase.lock();
            if *phase != Phase::Active {
                return Err(EngineError::TransactionInactive);
            }
            *phase = Phase::Committing;
        }
        let inner = Arc::clone(&self.inner);
        let shared = Arc::clone(&self.shared);
        let job: Job = Box::new(move || execute(&shared, &inner));
        if !self.shared.enqueue(job) {
            finish_aborted(&self.inner, EngineError::Unavailable);
        }
        Ok(())
    }

    /// Aborts the transaction. Queued requests fail with an abort error.
    /// Aborting after commit is a no-op.
    pub fn abort(&self) {
        {
            let mut phase = self.inner.phase.lock();
            if *phase != Phase::Active {
                return;
            }
            *phase = Phase::Committing;
        }
        let inner = Arc::clone(&self.inner);
        let err = EngineError::aborted("transaction aborted by caller");
        let job_err = err.clone();
        let job: Job = Box::new(move || finish_aborted(&inner, job_err));
        if !self.shared.enqueue(job) {
            finish_aborted(&self.inner, err);
        }
    }

    fn queue(&self, op: PendingOp) -> EngineResult<()> {
        let phase = self.inner.phase.lock();
        if *phase != Phase::Active {
            return Err(EngineError::TransactionInactive);
        }
        self.inner.ops.lock().push(op);
        Ok(())
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        if *self.inner.phase.lock() == Phase::Active {
            debug!(txn = %self.inner.id, "transaction dropped without commit");
            self.abort();
        }
    }
}

/// Handle on one object store inside a transaction.
///
/// Each call queues a request and returns it. Synchronous checks (an inactive
/// transaction, a write in a read-only transaction, a value without a usable
/// key) fail the call itself.
pub struct ObjectStore<'t> {
    txn: &'t Transaction,
    name: String,
    meta: StoreMeta,
}

impl ObjectStore<'_> {
    /// Store name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Primary key path.
    #[must_use]
    pub fn key_path(&self) -> &str {
        &self.meta.key_path
    }

    /// Whether the store generates missing keys.
    #[must_use]
    pub fn auto_increment(&self) -> bool {
        self.meta.auto_increment
    }

    fn check_write(&self, value: &Value) -> EngineResult<()> {
        if self.txn.inner.mode == TransactionMode::ReadOnly {
            return Err(EngineError::ReadOnly);
        }
        validate_write(value, &self.meta.key_path, self.meta.auto_increment)
    }

    /// Queues an insert. Fails at execution if the key exists.
    ///
    /// # Errors
    ///
    /// See the type-level documentation.
    pub fn add(&self, value: Value) -> EngineResult<Request<Key>> {
        self.check_write(&value)?;
        let request = Request::new();
        self.txn.queue(PendingOp::Add {
            store: self.name.clone(),
            value,
            request: request.clone(),
        })?;
        Ok(request)
    }

    /// Queues an insert-or-replace.
    ///
    /// # Errors
    ///
    /// See the type-level documentation.
    pub fn put(&self, value: Value) -> EngineResult<Request<Key>> {
        self.check_write(&value)?;
        let request = Request::new();
        self.txn.queue(PendingOp::Put {
            store: self.name.clone(),
            value,
            request: request.clone(),
        })?;
        Ok(request)
    }

    /// Queues a lookup by primary key.
    ///
    /// # Errors
    ///
    /// Returns `TransactionInactive` after commit.
    pub fn get(&self, key: impl Into<Key>) -> EngineResult<Request<Option<Value>>> {
        let request = Request::new();
        self.txn.queue(PendingOp::Get {
            store: self.name.clone(),
            key: key.into(),
            request: request.clone(),
        })?;
        Ok(request)
    }

    /// Queues a read of every record, in key order.
    ///
    /// # Errors
    ///
    /// Returns `TransactionInactive` after commit.
    pub fn get_all(&self) -> EngineResult<Request<Vec<Value>>> {
        let request = Request::new();
        self.txn.queue(PendingOp::GetAll {
            store: self.name.clone(),
            request: request.clone(),
        })?;
        Ok(request)
    }

    /// Queues a record count.
    ///
    /// # Errors
    ///
    /// Returns `TransactionInactive` after commit.
    pub fn count(&self) -> EngineResult<Request<usize>> {
        let request = Request::new();
        self.txn.queue(PendingOp::Count {
            store: self.name.clone(),
            request: request.clone(),
        })?;
        Ok(request)
    }

    /// Queues a delete. Deleting a missing key succeeds.
    ///
    /// # Errors
    ///
    /// Returns `ReadOnly` in a read-only transaction and
    /// `TransactionInactive` after commit.
    pub fn delete(&self, key: impl Into<Key>) -> EngineResult<Request<()>> {
        if self.txn.inner.mode == TransactionMode::ReadOnly {
            return Err(EngineError::ReadOnly);
        }
        let request = Request::new();
        self.txn.queue(PendingOp::Delete {
            store: self.name.clone(),
            key: key.into(),
            request: request.clone(),
        })?;
        Ok(request)
    }
}

/// Fails every queued request and reports the transaction error.
fn finish_aborted(inner: &TransactionInner, err: EngineError) {
    *inner.phase.lock() = Phase::Finished;
    let ops = std::mem::take(&mut *inner.ops.lock());
    for op in ops {
        op.abort(err.clone())();
    }
    warn!(txn = %inner.id, error = %err, "transaction aborted");
    inner.complete.disarm();
    inner.error.fire(err);
}

fn execute(shared: &Shared, inner: &TransactionInner) {
    let mut ops = std::mem::take(&mut *inner.ops.lock()).into_iter();
    let mut deliveries: Vec<Delivery> = Vec::new();
    let mut failure: Option<EngineError> = None;

    {
        let mut state = shared.state.lock();
        let Some(db) = state.databases.get_mut(&inner.db_name) else {
            drop(state);
            let err = EngineError::invalid_state(format!("database '{}' no longer exists", inner.db_name));
            for op in ops {
                op.abort(err.clone())();
            }
            finish_aborted(inner, err);
            return;
        };

        let mut journal = Journal::new();
        for op in ops.by_ref() {
            match op.run(&mut db.stores, &mut journal) {
                Ok(delivery) => deliveries.push(delivery),
                Err((err, delivery)) => {
                    deliveries.push(delivery);
                    failure = Some(err);
                    break;
                }
            }
        }

        if failure.is_none()
            && inner.mode == TransactionMode::ReadWrite
            && std::mem::take(&mut db.fail_next_commit)
        {
            failure = Some(EngineError::aborted("commit failed"));
        }
        if failure.is_some() {
            let writes = journal.len();
            if let Err(err) = journal.roll_back(&mut db.stores) {
                error!(txn = %inner.id, database = %inner.db_name, error = %err, "rollback failed");
            } else {
                debug!(txn = %inner.id, writes, "rolled back");
            }
        }
    }

    *inner.phase.lock() = Phase::Finished;
    for delivery in deliveries {
        delivery();
    }

    match failure {
        None => {
            debug!(txn = %inner.id, database = %inner.db_name, mode = %inner.mode, "transaction complete");
            inner.error.disarm();
            inner.complete.fire(());
        }
        Some(err) => {
            let reason = EngineError::aborted(format!("{}: {err}", inner.id));
            for op in ops {
                op.abort(reason.clone())();
            }
            warn!(txn = %inner.id, database = %inner.db_name, error = %err, "transaction aborted");
            inner.complete.disarm();
            inner.error.fire(err);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{IndexParams, StoreParams};
    use crate::{DbConnection, MemoryEngine};
    use serde_json::json;
    use std::sync::mpsc::{channel, Receiver};
    use std::time::Duration;

    const WAIT: Duration = Duration::from_secs(5);

    fn open_planets() -> (MemoryEngine, DbConnection) {
        let engine = MemoryEngine::new();
        let (tx, rx) = channel();
        let request = engine.open("orbit", 1);
        request.on_upgrade_needed(|change| {
            change.create_object_store("planet", StoreParams::new("id"))?;
            change.create_index("planet", "name", IndexParams::new("name").unique(true))
        });
        request.on_success(move |db| tx.send(db).unwrap());
        request.send();
        let db = rx.recv_timeout(WAIT).unwrap();
        (engine, db)
    }

    fn outcome<T: Send + 'static>(request: &Request<T>) -> Receiver<EngineResult<T>> {
        let (tx, rx) = channel();
        let err_tx = tx.clone();
        request.on_success(move |v| tx.send(Ok(v)).unwrap());
        request.on_error(move |e| err_tx.send(Err(e)).unwrap());
        rx
    }

    fn finished(txn: &Transaction) -> Receiver<EngineResult<()>> {
        let (tx, rx) = channel();
        let err_tx = tx.clone();
        txn.on_complete(move || tx.send(Ok(())).unwrap());
        txn.on_error(move |e| err_tx.send(Err(e)).unwrap());
        rx
    }

    #[test]
    fn write_then_read_in_later_transaction() {
        let (_engine, db) = open_planets();
        let txn = db.transaction(&["planet"], TransactionMode::ReadWrite).unwrap();
        let added = txn
            .object_store("planet")
            .unwrap()
            .add(json!({"id": "p1", "name": "Jupiter"}))
            .unwrap();
        let added = outcome(&added);
        let done = finished(&txn);
        txn.commit().unwrap();
        assert_eq!(added.recv_timeout(WAIT).unwrap().unwrap(), Key::from("p1"));
        done.recv_timeout(WAIT).unwrap().unwrap();

        let txn = db.transaction(&["planet"], TransactionMode::ReadOnly).unwrap();
        let got = outcome(&txn.object_store("planet").unwrap().get("p1").unwrap());
        txn.commit().unwrap();
        assert_eq!(
            got.recv_timeout(WAIT).unwrap().unwrap(),
            Some(json!({"id": "p1", "name": "Jupiter"}))
        );
    }

    #[test]
    fn failing_request_rolls_back_whole_transaction() {
        let (_engine, db) = open_planets();
        let txn = db.transaction(&["planet"], TransactionMode::ReadWrite).unwrap();
        let store = txn.object_store("planet").unwrap();
        let first = outcome(&store.add(json!({"id": "p1", "name": "A"})).unwrap());
        let second = outcome(&store.add(json!({"id": "p1", "name": "B"})).unwrap());
        let third = outcome(&store.add(json!({"id": "p3", "name": "C"})).unwrap());
        let done = finished(&txn);
        txn.commit().unwrap();

        assert!(first.recv_timeout(WAIT).unwrap().is_ok());
        assert_eq!(
            second.recv_timeout(WAIT).unwrap().unwrap_err().code(),
            "ConstraintError"
        );
        assert_eq!(third.recv_timeout(WAIT).unwrap().unwrap_err().code(), "AbortError");
        assert_eq!(done.recv_timeout(WAIT).unwrap().unwrap_err().code(), "ConstraintError");

        let txn = db.transaction(&["planet"], TransactionMode::ReadOnly).unwrap();
        let count = outcome(&txn.object_store("planet").unwrap().count().unwrap());
        txn.commit().unwrap();
        assert_eq!(count.recv_timeout(WAIT).unwrap().unwrap(), 0);
    }

    #[test]
    fn abort_restores_replaced_and_deleted_records() {
        let (_engine, db) = open_planets();
        let txn = db.transaction(&["planet"], TransactionMode::ReadWrite).unwrap();
        let store = txn.object_store("planet").unwrap();
        store.add(json!({"id": "p1", "name": "Jupiter"})).unwrap();
        store.add(json!({"id": "p2", "name": "Saturn"})).unwrap();
        let done = finished(&txn);
        txn.commit().unwrap();
        done.recv_timeout(WAIT).unwrap().unwrap();

        let txn = db.transaction(&["planet"], TransactionMode::ReadWrite).unwrap();
        let store = txn.object_store("planet").unwrap();
        store.put(json!({"id": "p1", "name": "Jove"})).unwrap();
        store.delete("p2").unwrap();
        store.add(json!({"id": "p3", "name": "Saturn"})).unwrap();
        store.add(json!({"id": "p4", "name": "Jove"})).unwrap();
        let done = finished(&txn);
        txn.commit().unwrap();
        assert_eq!(done.recv_timeout(WAIT).unwrap().unwrap_err().code(), "ConstraintError");

        let txn = db.transaction(&["planet"], TransactionMode::ReadOnly).unwrap();
        let all = outcome(&txn.object_store("planet").unwrap().get_all().unwrap());
        txn.commit().unwrap();
        assert_eq!(
            all.recv_timeout(WAIT).unwrap().unwrap(),
            vec![
                json!({"id": "p1", "name": "Jupiter"}),
                json!({"id": "p2", "name": "Saturn"}),
            ]
        );
    }

    #[test]
    fn injected_commit_failure_reports_success_then_aborts() {
        let (engine, db) = open_planets();
        engine.inject_commit_failure("orbit").unwrap();
        let txn = db.transaction(&["planet"], TransactionMode::ReadWrite).unwrap();
        let added = outcome(&txn.object_store("planet").unwrap().add(json!({"id": "p1"})).unwrap());
        let done = finished(&txn);
        txn.commit().unwrap();

        assert!(added.recv_timeout(WAIT).unwrap().is_ok());
        assert_eq!(done.recv_timeout(WAIT).unwrap().unwrap_err().code(), "AbortError");
        assert_eq!(engine.describe("orbit").unwrap().stores[0].record_count, 0);
    }

    #[test]
    fn read_only_rejects_writes_synchronously() {
        let (_engine, db) = open_planets();
        let txn = db.transaction(&["planet"], TransactionMode::ReadOnly).unwrap();
        let store = txn.object_store("planet").unwrap();
        assert!(matches!(store.put(json!({"id": "p1"})), Err(EngineError::ReadOnly)));
        assert!(matches!(store.delete("p1"), Err(EngineError::ReadOnly)));
    }

    #[test]
    fn value_without_key_is_rejected_synchronously() {
        let (_engine, db) = open_planets();
        let txn = db.transaction(&["planet"], TransactionMode::ReadWrite).unwrap();
        let err = txn
            .object_store("planet")
            .unwrap()
            .add(json!({"name": "Jupiter"}))
            .unwrap_err();
        assert_eq!(err.code(), "DataError");
    }

    #[test]
    fn requests_after_commit_are_inactive() {
        let (_engine, db) = open_planets();
        let txn = db.transaction(&["planet"], TransactionMode::ReadWrite).unwrap();
        txn.commit().unwrap();
        assert!(matches!(
            txn.object_store("planet").unwrap().get("p1"),
            Err(EngineError::TransactionInactive)
        ));
        assert!(matches!(txn.commit(), Err(EngineError::TransactionInactive)));
    }

    #[test]
    fn abort_fails_queued_requests() {
        let (_engine, db) = open_planets();
        let txn = db.transaction(&["planet"], TransactionMode::ReadWrite).unwrap();
        let added = outcome(&txn.object_store("planet").unwrap().add(json!({"id": "p1"})).unwrap());
        let done = finished(&txn);
        txn.abort();
        assert_eq!(added.recv_timeout(WAIT).unwrap().unwrap_err().code(), "AbortError");
        assert_eq!(done.recv_timeout(WAIT).unwrap().unwrap_err().code(), "AbortError");
    }

    #[test]
    fn transaction_scope_is_checked() {
        let (_engine, db) = open_planets();
        assert!(matches!(
            db.transaction(&[], TransactionMode::ReadOnly),
            Err(EngineError::InvalidAccess { .. })
        ));
        assert!(matches!(
            db.transaction(&["moon"], TransactionMode::ReadOnly),
            Err(EngineError::NotFound { .. })
        ));
        db.close();
        assert!(matches!(
            db.transaction(&["planet"], TransactionMode::ReadOnly),
            Err(EngineError::InvalidState { .. })
        ));
    }
}
