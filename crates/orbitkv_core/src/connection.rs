//! Engine connection lifecycle.
//!
//! One [`EngineConnection`] owns the single engine handle for a namespace.
//! Its lifecycle is an explicit tagged state with a table of allowed
//! transitions:
//!
//! ```text
//! Closed -> Opening -> (Blocked) -> (UpgradeNeeded) -> Open -> VersionChanging -> Closed
//! ```
//!
//! Any failure while opening returns to `Closed`, and `close` moves `Open`
//! straight to `Closed`. A new `open` from `Closed` starts over.

use crate::bridge::{self, Pending};
use crate::config::BlockedCallback;
use crate::error::{AdapterError, AdapterResult};
use orbitkv_engine::{
    BlockedEvent, DbConnection, EngineResult, MemoryEngine, VersionChange, VersionChangeEvent,
};
use parking_lot::Mutex;
use std::fmt;
use std::sync::{Arc, Weak};
use tracing::{debug, info, warn};

/// Lifecycle state of an [`EngineConnection`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// No handle. Initial and terminal state.
    Closed,
    /// Open request issued.
    Opening,
    /// Waiting for older connections to close.
    Blocked,
    /// Provisioning inside the upgrade.
    UpgradeNeeded,
    /// Handle usable.
    Open,
    /// Closing so a newer version (or a deletion) can proceed.
    VersionChanging,
}

impl ConnectionState {
    /// Returns whether moving from `self` to `next` is allowed.
    #[must_use]
    pub fn can_transition_to(self, next: Self) -> bool {
        use ConnectionState::{Blocked, Closed, Open, Opening, UpgradeNeeded, VersionChanging};
        matches!(
            (self, next),
            (Closed, Opening)
                | (Opening, Blocked | UpgradeNeeded | Open | Closed)
                | (Blocked, UpgradeNeeded | Open | Closed)
                | (UpgradeNeeded, Open | Closed)
                | (Open, VersionChanging | Closed)
                | (VersionChanging, Closed)
        )
    }

    /// Returns whether the handle is usable.
    #[must_use]
    pub fn is_open(self) -> bool {
        self == Self::Open
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Closed => "closed",
            Self::Opening => "opening",
            Self::Blocked => "blocked",
            Self::UpgradeNeeded => "upgrade-needed",
            Self::Open => "open",
            Self::VersionChanging => "version-changing",
        };
        f.write_str(name)
    }
}

/// Observer told when the handle was closed for a version change.
pub type VersionChangeObserver = Arc<dyn Fn(VersionChangeEvent) + Send + Sync + 'static>;

struct ConnectionInner {
    state: ConnectionState,
    handle: Option<DbConnection>,
    /// Bumped on every open; stale engine callbacks compare against it.
    generation: u64,
    observer: Option<VersionChangeObserver>,
}

impl ConnectionInner {
    fn transition(&mut self, namespace: &str, next: ConnectionState) -> bool {
        if !self.state.can_transition_to(next) {
            warn!(namespace, from = %self.state, to = %next, "ignoring invalid connection transition");
            return false;
        }
        info!(namespace, from = %self.state, to = %next, "connection state");
        self.state = next;
        true
    }
}

/// The single engine handle of one namespace.
pub struct EngineConnection {
    engine: MemoryEngine,
    namespace: String,
    on_blocked: Option<BlockedCallback>,
    inner: Arc<Mutex<ConnectionInner>>,
}

impl EngineConnection {
    /// Creates a closed connection for `namespace`.
    pub fn new(
        engine: MemoryEngine,
        namespace: impl Into<String>,
        on_blocked: Option<BlockedCallback>,
    ) -> Self {
        Self {
            engine,
            namespace: namespace.into(),
            on_blocked,
            inner: Arc::new(Mutex::new(ConnectionInner {
                state: ConnectionState::Closed,
                handle: None,
                generation: 0,
                observer: None,
            })),
        }
    }

    /// Namespace served by this connection.
    #[must_use]
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.inner.lock().state
    }

    /// Registers the observer told after the handle closed for a version change.
    pub fn on_version_change(&self, observer: impl Fn(VersionChangeEvent) + Send + Sync + 'static) {
        self.inner.lock().observer = Some(Arc::new(observer));
    }

    /// Opens the handle at `version`.
    ///
    /// `provisioner` runs inside the upgrade if the stored version is lower.
    /// While older connections keep the namespace open, the blocked callback
    /// receives [`AdapterError::ConnectionBlocked`] and the open keeps waiting.
    /// Opening an already open connection returns the existing handle.
    ///
    /// # Errors
    ///
    /// `UnsupportedEnvironment` if the engine is unavailable; otherwise the
    /// mapped engine error of a failed open or provisioning. The connection
    /// is `Closed` after any failure.
    pub async fn open<P>(&self, version: u32, provisioner: P) -> AdapterResult<DbConnection>
    where
        P: FnOnce(&mut VersionChange) -> EngineResult<()> + Send + 'static,
    {
        if !self.engine.is_available() {
            return Err(AdapterError::UnsupportedEnvironment {
                message: format!("no storage engine available for '{}'", self.namespace),
            });
        }
        let pending = self.begin_open(version, provisioner)?;
        pending.await
    }

    fn begin_open<P>(&self, version: u32, provisioner: P) -> AdapterResult<Pending<DbConnection>>
    where
        P: FnOnce(&mut VersionChange) -> EngineResult<()> + Send + 'static,
    {
        let generation = {
            let mut inner = self.inner.lock();
            if let (ConnectionState::Open, Some(handle)) = (inner.state, &inner.handle) {
                debug!(namespace = %self.namespace, "connection already open");
                let (settlement, pending) = bridge::settlement();
                settlement.settle(Ok(handle.clone()));
                return Ok(pending);
            }
            if !inner.transition(&self.namespace, ConnectionState::Opening) {
                return Err(AdapterError::invalid_argument(format!(
                    "cannot open '{}' while {}",
                    self.namespace, inner.state
                )));
            }
            inner.generation += 1;
            inner.generation
        };

        let (settlement, pending) = bridge::settlement();
        let request = self.engine.open(&self.namespace, version);

        {
            let weak = Arc::downgrade(&self.inner);
            let namespace = self.namespace.clone();
            let on_blocked = self.on_blocked.clone();
            request.on_blocked(move |event: BlockedEvent| {
                if let Some(inner) = weak.upgrade() {
                    let mut inner = inner.lock();
                    if inner.generation == generation {
                        inner.transition(&namespace, ConnectionState::Blocked);
                    }
                }
                let blocked = AdapterError::ConnectionBlocked {
                    namespace: namespace.clone(),
                    old_version: event.old_version,
                    new_version: event.new_version,
                };
                warn!(%namespace, old_version = event.old_version, "open blocked by an older connection");
                if let Some(callback) = on_blocked {
                    callback(&blocked);
                }
            });
        }

        {
            let weak = Arc::downgrade(&self.inner);
            let namespace = self.namespace.clone();
            request.on_upgrade_needed(move |change| {
                if let Some(inner) = weak.upgrade() {
                    let mut inner = inner.lock();
                    if inner.generation == generation {
                        inner.transition(&namespace, ConnectionState::UpgradeNeeded);
                    }
                }
                info!(
                    %namespace,
                    from = change.old_version(),
                    to = change.new_version(),
                    "provisioning schema"
                );
                provisioner(change)
            });
        }

        {
            let weak = Arc::downgrade(&self.inner);
            let namespace = self.namespace.clone();
            let settlement = settlement.clone();
            request.on_success(move |db| {
                let Some(inner) = weak.upgrade() else {
                    db.close();
                    settlement.settle(Err(AdapterError::connection_closed(&namespace)));
                    return;
                };
                {
                    let mut guard = inner.lock();
                    if guard.generation != generation
                        || !guard.transition(&namespace, ConnectionState::Open)
                    {
                        drop(guard);
                        db.close();
                        settlement.settle(Err(AdapterError::connection_closed(&namespace)));
                        return;
                    }
                    guard.handle = Some(db.clone());
                }
                db.set_on_version_change(version_change_handler(
                    Arc::downgrade(&inner),
                    namespace.clone(),
                    generation,
                ));
                info!(%namespace, version = db.version(), "connection open");
                settlement.settle(Ok(db));
            });
        }

        {
            let weak = Arc::downgrade(&self.inner);
            let namespace = self.namespace.clone();
            request.on_error(move |err| {
                if let Some(inner) = weak.upgrade() {
                    let mut inner = inner.lock();
                    if inner.generation == generation {
                        inner.transition(&namespace, ConnectionState::Closed);
                    }
                }
                settlement.settle(Err(AdapterError::from_engine(&namespace, &err)));
            });
        }

        request.send();
        Ok(pending)
    }

    /// Returns the usable handle.
    ///
    /// # Errors
    ///
    /// Returns `ConnectionClosed` unless the connection is open.
    pub fn handle(&self) -> AdapterResult<DbConnection> {
        let inner = self.inner.lock();
        match (&inner.handle, inner.state) {
            (Some(handle), ConnectionState::Open) => Ok(handle.clone()),
            _ => Err(AdapterError::connection_closed(&self.namespace)),
        }
    }

    /// Closes the handle. Closing a connection that is not open is a no-op.
    pub fn close(&self) {
        let handle = {
            let mut inner = self.inner.lock();
            if inner.state != ConnectionState::Open {
                return;
            }
            inner.transition(&self.namespace, ConnectionState::Closed);
            inner.handle.take()
        };
        if let Some(handle) = handle {
            handle.close();
        }
    }

    /// Closes the handle and deletes the namespace. Resolves with the
    /// version that was deleted (0 if nothing existed).
    ///
    /// # Errors
    ///
    /// `UnsupportedEnvironment` if the engine is unavailable, otherwise the
    /// mapped engine error.
    pub async fn delete_database(&self) -> AdapterResult<u32> {
        if !self.engine.is_available() {
            return Err(AdapterError::UnsupportedEnvironment {
                message: format!("no storage engine available for '{}'", self.namespace),
            });
        }
        self.close();

        let (settlement, pending) = bridge::settlement();
        let request = self.engine.delete_database(&self.namespace);
        {
            let namespace = self.namespace.clone();
            let on_blocked = self.on_blocked.clone();
            request.on_blocked(move |event| {
                warn!(%namespace, "delete blocked by another connection");
                if let Some(callback) = on_blocked {
                    callback(&AdapterError::ConnectionBlocked {
                        namespace,
                        old_version: event.old_version,
                        new_version: None,
                    });
                }
            });
        }
        {
            let settlement = settlement.clone();
            let namespace = self.namespace.clone();
            request.on_success(move |version| {
                info!(%namespace, version, "namespace deleted");
                settlement.settle(Ok(version));
            });
        }
        {
            let namespace = self.namespace.clone();
            request.on_error(move |err| {
                settlement.settle(Err(AdapterError::from_engine(&namespace, &err)));
            });
        }
        pending.await
    }
}

impl fmt::Debug for EngineConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineConnection")
            .field("namespace", &self.namespace)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

/// Builds the handler that closes the handle when another connection asks
/// for a newer version or deletes the namespace.
fn version_change_handler(
    weak: Weak<Mutex<ConnectionInner>>,
    namespace: String,
    generation: u64,
) -> impl Fn(VersionChangeEvent) + Send + Sync + 'static {
    move |event| {
        let Some(inner) = weak.upgrade() else {
            return;
        };
        let (handle, observer) = {
            let mut guard = inner.lock();
            if guard.generation != generation
                || !guard.transition(&namespace, ConnectionState::VersionChanging)
            {
                return;
            }
            (guard.handle.take(), guard.observer.clone())
        };
        warn!(
            %namespace,
            old_version = event.old_version,
            new_version = ?event.new_version,
            "closing connection for version change"
        );
        if let Some(handle) = handle {
            handle.close();
        }
        inner.lock().transition(&namespace, ConnectionState::Closed);
        if let Some(observer) = observer {
            observer(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ConnectionState::*;

    #[test]
    fn lifecycle_path_is_allowed() {
        let path = [Closed, Opening, Blocked, UpgradeNeeded, Open, VersionChanging, Closed];
        for pair in path.windows(2) {
            assert!(pair[0].can_transition_to(pair[1]), "{} -> {}", pair[0], pair[1]);
        }
    }

    #[test]
    fn shortcuts_are_allowed() {
        assert!(Opening.can_transition_to(Open));
        assert!(Opening.can_transition_to(UpgradeNeeded));
        assert!(Open.can_transition_to(Closed));
        assert!(UpgradeNeeded.can_transition_to(Closed));
    }

    #[test]
    fn invalid_transitions_are_rejected() {
        assert!(!Closed.can_transition_to(Open));
        assert!(!Open.can_transition_to(Opening));
        assert!(!VersionChanging.can_transition_to(Open));
        assert!(!Blocked.can_transition_to(VersionChanging));
        assert!(!Closed.can_transition_to(Closed));
    }

    #[tokio::test]
    async fn unavailable_engine_fails_open() {
        let connection = EngineConnection::new(MemoryEngine::unavailable(), "orbit", None);
        let err = connection.open(1, |_| Ok(())).await.unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::UnsupportedEnvironment);
        assert_eq!(connection.state(), Closed);
    }

    #[tokio::test]
    async fn failed_provisioning_leaves_connection_closed() {
        let connection = EngineConnection::new(MemoryEngine::new(), "orbit", None);
        let err = connection
            .open(1, |_| Err(orbitkv_engine::EngineError::data("bad key path")))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::EngineRequestFailed);
        assert_eq!(err.context().unwrap().code, "DataError");
        assert_eq!(connection.state(), Closed);
        assert!(connection.handle().is_err());
    }

    #[tokio::test]
    async fn close_then_reopen() {
        let connection = EngineConnection::new(MemoryEngine::new(), "orbit", None);
        connection.open(1, |_| Ok(())).await.unwrap();
        assert_eq!(connection.state(), Open);
        connection.close();
        assert_eq!(connection.state(), Closed);
        assert!(connection.handle().is_err());
        connection.open(1, |_| Ok(())).await.unwrap();
        assert!(connection.handle().is_ok());
    }
}
