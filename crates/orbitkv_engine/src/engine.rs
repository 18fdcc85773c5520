//! The engine factory and its event loop.

use crate::connection::DbConnection;
use crate::error::{EngineError, EngineResult};
use crate::event::{EventSlot, Request};
use crate::snapshot;
use crate::store::StoreData;
use crate::types::{
    BlockedEvent, ConnectionId, DatabaseInfo, TransactionId, VersionChangeEvent,
};
use crate::upgrade::VersionChange;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::panic::{self, AssertUnwindSafe};
use std::path::Path;
use std::sync::mpsc::{self, Sender};
use std::sync::Arc;
use std::thread;
use tracing::{debug, error, info, warn};

/// Work scheduled on the event loop.
pub(crate) type Job = Box<dyn FnOnce() + Send + 'static>;

/// Handler invoked on a connection when another opener needs it gone.
pub type VersionChangeHandler = Arc<dyn Fn(VersionChangeEvent) + Send + Sync + 'static>;

/// Upgrade callback run inside the version-change transaction.
pub type UpgradeHandler = Box<dyn FnOnce(&mut VersionChange) -> EngineResult<()> + Send + 'static>;

/// One named database.
#[derive(Debug, Clone)]
pub(crate) struct DatabaseData {
    pub(crate) version: u32,
    pub(crate) stores: BTreeMap<String, StoreData>,
    pub(crate) fail_next_commit: bool,
}

impl DatabaseData {
    pub(crate) fn new(version: u32) -> Self {
        Self {
            version,
            stores: BTreeMap::new(),
            fail_next_commit: false,
        }
    }

    pub(crate) fn info(&self, name: &str) -> DatabaseInfo {
        DatabaseInfo {
            name: name.to_string(),
            version: self.version,
            stores: self
                .stores
                .iter()
                .map(|(store_name, store)| store.info(store_name))
                .collect(),
        }
    }
}

/// An open connection as seen by the engine.
pub(crate) struct ConnectionEntry {
    pub(crate) name: String,
    pub(crate) on_version_change: Option<VersionChangeHandler>,
}

/// An open or delete request parked until other connections close.
enum Waiter {
    Open(Arc<OpenInner>),
    Delete(Arc<DeleteInner>),
}

impl Waiter {
    fn name(&self) -> &str {
        match self {
            Waiter::Open(open) => &open.name,
            Waiter::Delete(delete) => &delete.name,
        }
    }
}

/// Mutable engine state, guarded by one lock.
#[derive(Default)]
pub(crate) struct EngineState {
    pub(crate) databases: HashMap<String, DatabaseData>,
    /// Open connections only; closing removes the entry.
    pub(crate) connections: HashMap<ConnectionId, ConnectionEntry>,
    waiting: Vec<Waiter>,
    next_connection: u64,
    next_transaction: u64,
}

impl EngineState {
    pub(crate) fn from_databases(databases: HashMap<String, DatabaseData>) -> Self {
        Self {
            databases,
            ..Self::default()
        }
    }

    fn has_open(&self, name: &str) -> bool {
        self.connections.values().any(|entry| entry.name == name)
    }

    pub(crate) fn has_waiting(&self, name: &str) -> bool {
        self.waiting.iter().any(|waiter| waiter.name() == name)
    }

    fn version_change_handlers(&self, name: &str) -> Vec<Option<VersionChangeHandler>> {
        self.connections
            .values()
            .filter(|entry| entry.name == name)
            .map(|entry| entry.on_version_change.clone())
            .collect()
    }

    pub(crate) fn next_transaction_id(&mut self) -> TransactionId {
        self.next_transaction += 1;
        TransactionId::new(self.next_transaction)
    }
}

/// State shared between the engine, its connections and the event loop.
pub(crate) struct Shared {
    pub(crate) state: Mutex<EngineState>,
    jobs: Option<Sender<Job>>,
}

impl Shared {
    /// Schedules a job on the event loop. Returns false if the loop is gone.
    pub(crate) fn enqueue(&self, job: Job) -> bool {
        match &self.jobs {
            Some(jobs) => {
                if jobs.send(job).is_err() {
                    error!("engine event loop has stopped; dropping job");
                    return false;
                }
                true
            }
            None => false,
        }
    }

    fn register_connection(
        self: &Arc<Self>,
        state: &mut EngineState,
        name: &str,
        version: u32,
    ) -> DbConnection {
        state.next_connection += 1;
        let id = ConnectionId::new(state.next_connection);
        state.connections.insert(
            id,
            ConnectionEntry {
                name: name.to_string(),
                on_version_change: None,
            },
        );
        debug!(%id, database = name, version, "connection opened");
        DbConnection::new(id, name.to_string(), version, Arc::clone(self))
    }
}

fn spawn_event_loop() -> Option<Sender<Job>> {
    let (sender, receiver) = mpsc::channel::<Job>();
    let spawned = thread::Builder::new()
        .name("orbitkv-engine".into())
        .spawn(move || {
            for job in receiver {
                if panic::catch_unwind(AssertUnwindSafe(job)).is_err() {
                    error!("engine callback panicked; event loop continues");
                }
            }
        });
    match spawned {
        Ok(_) => Some(sender),
        Err(e) => {
            warn!(error = %e, "could not start engine event loop");
            None
        }
    }
}

pub(crate) struct OpenInner {
    pub(crate) name: String,
    pub(crate) version: u32,
    pub(crate) request: Request<DbConnection>,
    pub(crate) blocked: EventSlot<BlockedEvent>,
    pub(crate) upgrade: Mutex<Option<UpgradeHandler>>,
}

/// A request to open a database at a version.
///
/// Register handlers, then call [`send`](OpenRequest::send). Processing
/// starts only on `send`, so the upgrade handler is always in place before
/// the engine decides whether an upgrade is needed.
#[must_use = "an open request does nothing until it is sent"]
pub struct OpenRequest {
    inner: Arc<OpenInner>,
    shared: Arc<Shared>,
}

impl OpenRequest {
    /// Registers the handler receiving the open connection.
    pub fn on_success(&self, handler: impl FnOnce(DbConnection) + Send + 'static) {
        self.inner.request.on_success(handler);
    }

    /// Registers the handler receiving the failure.
    pub fn on_error(&self, handler: impl FnOnce(EngineError) + Send + 'static) {
        self.inner.request.on_error(handler);
    }

    /// Registers the handler told that other connections block the open.
    ///
    /// The open keeps waiting after this fires.
    pub fn on_blocked(&self, handler: impl FnOnce(BlockedEvent) + Send + 'static) {
        self.inner.blocked.set_handler(handler);
    }

    /// Registers the upgrade callback. Returning an error aborts the upgrade.
    pub fn on_upgrade_needed(
        &self,
        handler: impl FnOnce(&mut VersionChange) -> EngineResult<()> + Send + 'static,
    ) {
        *self.inner.upgrade.lock() = Some(Box::new(handler));
    }

    /// Hands the request to the engine.
    pub fn send(self) {
        let inner = Arc::clone(&self.inner);
        let shared = Arc::clone(&self.shared);
        if !self
            .shared
            .enqueue(Box::new(move || process_open(&shared, inner)))
        {
            self.inner.request.fail(EngineError::Unavailable);
        }
    }
}

pub(crate) struct DeleteInner {
    pub(crate) name: String,
    pub(crate) request: Request<u32>,
    pub(crate) blocked: EventSlot<BlockedEvent>,
}

/// A request to delete a database. Succeeds with the deleted version
/// (0 when the database did not exist).
pub struct DeleteRequest {
    inner: Arc<DeleteInner>,
}

impl DeleteRequest {
    /// Registers the success handler.
    pub fn on_success(&self, handler: impl FnOnce(u32) + Send + 'static) {
        self.inner.request.on_success(handler);
    }

    /// Registers the error handler.
    pub fn on_error(&self, handler: impl FnOnce(EngineError) + Send + 'static) {
        self.inner.request.on_error(handler);
    }

    /// Registers the handler told that open connections block the delete.
    pub fn on_blocked(&self, handler: impl FnOnce(BlockedEvent) + Send + 'static) {
        self.inner.blocked.set_handler(handler);
    }
}

/// An in-process, versioned, transactional key-value engine.
///
/// The engine manages named databases. Each database has a version and a
/// set of object stores with secondary indexes; its structure changes only
/// inside an upgrade triggered by opening at a higher version. Data is read
/// and written through transactions on an open [`DbConnection`].
///
/// All outcomes are delivered as callbacks from a dedicated event-loop
/// thread, in the order the engine produced them.
///
/// # Example
///
/// ```rust,no_run
/// use orbitkv_engine::{MemoryEngine, StoreParams};
///
/// let engine = MemoryEngine::new();
/// let request = engine.open("planets", 1);
/// request.on_upgrade_needed(|change| {
///     change.create_object_store("planet", StoreParams::new("id"))
/// });
/// request.on_success(|db| println!("opened {} at v{}", db.name(), db.version()));
/// request.send();
/// ```
#[derive(Clone)]
pub struct MemoryEngine {
    shared: Arc<Shared>,
}

impl MemoryEngine {
    /// Creates an empty engine and starts its event loop.
    #[must_use]
    pub fn new() -> Self {
        Self::with_state(EngineState::default())
    }

    pub(crate) fn with_state(state: EngineState) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(state),
                jobs: spawn_event_loop(),
            }),
        }
    }

    /// Creates an engine for an environment without storage.
    ///
    /// Every request fails with [`EngineError::Unavailable`].
    #[must_use]
    pub fn unavailable() -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(EngineState::default()),
                jobs: None,
            }),
        }
    }

    /// Returns whether the engine can serve requests.
    #[must_use]
    pub fn is_available(&self) -> bool {
        self.shared.jobs.is_some()
    }

    /// Creates a request to open `name` at `version`.
    pub fn open(&self, name: &str, version: u32) -> OpenRequest {
        OpenRequest {
            inner: Arc::new(OpenInner {
                name: name.to_string(),
                version,
                request: Request::new(),
                blocked: EventSlot::new(),
                upgrade: Mutex::new(None),
            }),
            shared: Arc::clone(&self.shared),
        }
    }

    /// Deletes `name` and everything in it.
    pub fn delete_database(&self, name: &str) -> DeleteRequest {
        let inner = Arc::new(DeleteInner {
            name: name.to_string(),
            request: Request::new(),
            blocked: EventSlot::new(),
        });
        let job_inner = Arc::clone(&inner);
        let shared = Arc::clone(&self.shared);
        if !self
            .shared
            .enqueue(Box::new(move || process_delete(&shared, job_inner)))
        {
            inner.request.fail(EngineError::Unavailable);
        }
        DeleteRequest { inner }
    }

    /// Names of all existing databases, sorted.
    #[must_use]
    pub fn database_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.shared.state.lock().databases.keys().cloned().collect();
        names.sort();
        names
    }

    /// Stored version of `name`, if it exists.
    #[must_use]
    pub fn version_of(&self, name: &str) -> Option<u32> {
        self.shared
            .state
            .lock()
            .databases
            .get(name)
            .map(|db| db.version)
    }

    /// Describes the structure and size of `name`.
    #[must_use]
    pub fn describe(&self, name: &str) -> Option<DatabaseInfo> {
        self.shared
            .state
            .lock()
            .databases
            .get(name)
            .map(|db| db.info(name))
    }

    /// Makes the next read-write transaction on `name` abort at commit time,
    /// after its requests have reported success.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the database does not exist.
    pub fn inject_commit_failure(&self, name: &str) -> EngineResult<()> {
        let mut state = self.shared.state.lock();
        let db = state
            .databases
            .get_mut(name)
            .ok_or_else(|| EngineError::not_found(format!("database '{name}'")))?;
        db.fail_next_commit = true;
        Ok(())
    }

    /// Writes every database to a snapshot file.
    ///
    /// # Errors
    ///
    /// Returns an error if encoding or writing the file fails.
    pub fn save_snapshot(&self, path: &Path) -> EngineResult<()> {
        let file = {
            let state = self.shared.state.lock();
            snapshot::capture(&state.databases)?
        };
        snapshot::write(path, &file)?;
        info!(path = %path.display(), databases = file.databases.len(), "snapshot saved");
        Ok(())
    }

    /// Starts an engine from a snapshot file written by [`save_snapshot`](Self::save_snapshot).
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, is not a snapshot, or
    /// holds records that violate their store's constraints.
    pub fn load_snapshot(path: &Path) -> EngineResult<Self> {
        let file = snapshot::read(path)?;
        let databases = snapshot::restore(file)?;
        info!(path = %path.display(), databases = databases.len(), "snapshot loaded");
        Ok(Self::with_state(EngineState::from_databases(databases)))
    }
}

impl Default for MemoryEngine {
    fn default() -> Self {
        Self::new()
    }
}

/// Tells open connections about a pending version change, then parks the
/// waiter if any of them stayed open. Returns true when the way is clear.
fn notify_open_connections(
    shared: &Arc<Shared>,
    name: &str,
    event: VersionChangeEvent,
    waiter: Waiter,
) -> bool {
    let handlers = shared.state.lock().version_change_handlers(name);
    for handler in handlers.into_iter().flatten() {
        handler(event);
    }
    let mut state = shared.state.lock();
    if state.has_open(name) {
        state.waiting.push(waiter);
        false
    } else {
        true
    }
}

fn process_open(shared: &Arc<Shared>, open: Arc<OpenInner>) {
    if open.version == 0 {
        open.request
            .fail(EngineError::InvalidVersion { version: open.version });
        return;
    }

    let stored = {
        let mut state = shared.state.lock();
        let stored = state.databases.get(&open.name).map_or(0, |db| db.version);
        if open.version < stored {
            drop(state);
            open.request.fail(EngineError::Version {
                requested: open.version,
                stored,
            });
            return;
        }
        if open.version == stored {
            let connection = shared.register_connection(&mut state, &open.name, stored);
            drop(state);
            open.request.succeed(connection);
            return;
        }
        stored
    };

    let event = VersionChangeEvent {
        old_version: stored,
        new_version: Some(open.version),
    };
    if !notify_open_connections(shared, &open.name, event, Waiter::Open(Arc::clone(&open))) {
        warn!(database = %open.name, from = stored, to = open.version, "open blocked by older connections");
        open.blocked.fire(BlockedEvent {
            old_version: stored,
            new_version: Some(open.version),
        });
        return;
    }

    run_upgrade(shared, &open, stored);
}

fn run_upgrade(shared: &Arc<Shared>, open: &OpenInner, stored: u32) {
    let staged = shared
        .state
        .lock()
        .databases
        .get(&open.name)
        .map(|db| db.stores.clone())
        .unwrap_or_default();
    let mut change = VersionChange::new(&open.name, stored, open.version, staged);

    info!(database = %open.name, from = stored, to = open.version, "upgrade needed");
    let handler = open.upgrade.lock().take();
    let outcome = match handler {
        Some(handler) => handler(&mut change),
        None => Ok(()),
    };

    match outcome {
        Ok(()) => {
            let connection = {
                let mut state = shared.state.lock();
                let db = state
                    .databases
                    .entry(open.name.clone())
                    .or_insert_with(|| DatabaseData::new(open.version));
                db.version = open.version;
                db.stores = change.into_stores();
                shared.register_connection(&mut state, &open.name, open.version)
            };
            open.request.succeed(connection);
        }
        Err(err) => {
            warn!(database = %open.name, error = %err, "upgrade aborted");
            open.request.fail(err);
        }
    }
}

fn process_delete(shared: &Arc<Shared>, delete: Arc<DeleteInner>) {
    let stored = shared
        .state
        .lock()
        .databases
        .get(&delete.name)
        .map_or(0, |db| db.version);

    let event = VersionChangeEvent {
        old_version: stored,
        new_version: None,
    };
    if !notify_open_connections(shared, &delete.name, event, Waiter::Delete(Arc::clone(&delete))) {
        warn!(database = %delete.name, "delete blocked by open connections");
        delete.blocked.fire(BlockedEvent {
            old_version: stored,
            new_version: None,
        });
        return;
    }

    shared.state.lock().databases.remove(&delete.name);
    info!(database = %delete.name, version = stored, "database deleted");
    delete.request.succeed(stored);
}

/// Re-schedules requests waiting on `name` once no connection to it is open.
pub(crate) fn resume_waiting(shared: &Arc<Shared>, name: &str) {
    let ready: Vec<Waiter> = {
        let mut state = shared.state.lock();
        if state.has_open(name) {
            return;
        }
        let (ready, rest): (Vec<Waiter>, Vec<Waiter>) = std::mem::take(&mut state.waiting)
            .into_iter()
            .partition(|waiter| waiter.name() == name);
        state.waiting = rest;
        ready
    };

    for waiter in ready {
        let job_shared = Arc::clone(shared);
        let job: Job = match waiter {
            Waiter::Open(open) => Box::new(move || process_open(&job_shared, open)),
            Waiter::Delete(delete) => Box::new(move || process_delete(&job_shared, delete)),
        };
        shared.enqueue(job);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::StoreParams;
    use std::sync::mpsc::{channel, Receiver};
    use std::time::Duration;

    const WAIT: Duration = Duration::from_secs(5);

    fn open(engine: &MemoryEngine, name: &str, version: u32) -> Receiver<EngineResult<DbConnection>> {
        let (tx, rx) = channel();
        let err_tx = tx.clone();
        let request = engine.open(name, version);
        request.on_upgrade_needed(|change| {
            if !change.object_store_names().contains(&"planet".to_string()) {
                change.create_object_store("planet", StoreParams::new("id"))?;
            }
            Ok(())
        });
        request.on_success(move |db| tx.send(Ok(db)).unwrap());
        request.on_error(move |e| err_tx.send(Err(e)).unwrap());
        request.send();
        rx
    }

    #[test]
    fn open_creates_database_at_version() {
        let engine = MemoryEngine::new();
        let db = open(&engine, "planets", 1).recv_timeout(WAIT).unwrap().unwrap();
        assert_eq!(db.version(), 1);
        assert_eq!(engine.version_of("planets"), Some(1));
        assert_eq!(db.object_store_names(), vec!["planet".to_string()]);
    }

    #[test]
    fn version_zero_is_rejected() {
        let engine = MemoryEngine::new();
        let result = open(&engine, "planets", 0).recv_timeout(WAIT).unwrap();
        assert!(matches!(result, Err(EngineError::InvalidVersion { version: 0 })));
    }

    #[test]
    fn older_version_is_rejected() {
        let engine = MemoryEngine::new();
        let db = open(&engine, "planets", 3).recv_timeout(WAIT).unwrap().unwrap();
        db.close();
        let result = open(&engine, "planets", 2).recv_timeout(WAIT).unwrap();
        assert!(matches!(
            result,
            Err(EngineError::Version {
                requested: 2,
                stored: 3
            })
        ));
    }

    #[test]
    fn upgrade_error_leaves_no_database() {
        let engine = MemoryEngine::new();
        let (tx, rx) = channel();
        let request = engine.open("broken", 1);
        request.on_upgrade_needed(|_| Err(EngineError::constraint("boom")));
        request.on_error(move |e| tx.send(e).unwrap());
        request.send();
        let err = rx.recv_timeout(WAIT).unwrap();
        assert_eq!(err.code(), "ConstraintError");
        assert_eq!(engine.version_of("broken"), None);
    }

    #[test]
    fn unavailable_engine_fails_requests() {
        let engine = MemoryEngine::unavailable();
        assert!(!engine.is_available());
        let result = open(&engine, "planets", 1).recv_timeout(WAIT).unwrap();
        assert!(matches!(result, Err(EngineError::Unavailable)));
    }

    #[test]
    fn delete_blocked_until_connection_closes() {
        let engine = MemoryEngine::new();
        let db = open(&engine, "planets", 1).recv_timeout(WAIT).unwrap().unwrap();

        let (blocked_tx, blocked_rx) = channel();
        let (done_tx, done_rx) = channel();
        let delete = engine.delete_database("planets");
        delete.on_blocked(move |event| blocked_tx.send(event).unwrap());
        delete.on_success(move |version| done_tx.send(version).unwrap());

        let event = blocked_rx.recv_timeout(WAIT).unwrap();
        assert_eq!(event.new_version, None);
        assert!(done_rx.try_recv().is_err());

        db.close();
        assert_eq!(done_rx.recv_timeout(WAIT).unwrap(), 1);
        assert!(engine.database_names().is_empty());
    }

    #[test]
    fn commit_failure_flag_requires_database() {
        let engine = MemoryEngine::new();
        assert!(engine.inject_commit_failure("missing").is_err());
    }
}
