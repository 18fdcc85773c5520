//! Connection lifecycle, provisioning and version negotiation.

mod common;

use common::{adapter, jupiter, planet_schema};
use orbitkv_core::{
    AdapterConfig, AdapterError, ConnectionState, EngineConnection, ErrorKind, StorageAdapter,
};
use orbitkv_engine::{DbConnection, MemoryEngine, StoreParams};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::timeout;

const WAIT: Duration = Duration::from_secs(5);

/// Opens a bare engine connection that ignores version-change requests.
async fn open_raw(engine: &MemoryEngine, name: &str, version: u32) -> DbConnection {
    let (tx, rx) = oneshot::channel();
    let request = engine.open(name, version);
    request.on_success(move |db| {
        let _ = tx.send(db);
    });
    request.send();
    rx.await.unwrap()
}

#[tokio::test]
async fn unavailable_engine_is_unsupported_environment() {
    let err = StorageAdapter::initialize(
        MemoryEngine::unavailable(),
        planet_schema(),
        AdapterConfig::default(),
    )
    .await
    .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::UnsupportedEnvironment);
}

#[tokio::test]
async fn provisioning_creates_one_collection_per_model_with_indexes() {
    let engine = MemoryEngine::new();
    let adapter = adapter(&engine, AdapterConfig::default()).await;
    assert_eq!(adapter.state(), ConnectionState::Open);

    let info = engine.describe("orbit").unwrap();
    assert_eq!(info.version, 1);
    let stores: Vec<&str> = info.stores.iter().map(|s| s.name.as_str()).collect();
    assert_eq!(stores, vec!["moon", "planet"]);

    let planet = info.stores.iter().find(|s| s.name == "planet").unwrap();
    assert_eq!(planet.key_path, "id");
    assert!(!planet.auto_increment);
    let indexes: Vec<(&str, bool)> = planet
        .indexes
        .iter()
        .map(|i| (i.name.as_str(), i.unique))
        .collect();
    assert_eq!(indexes, vec![("classification", false), ("name", true)]);
}

#[tokio::test]
async fn reopening_at_same_version_skips_provisioning() {
    let engine = MemoryEngine::new();
    let runs = Arc::new(AtomicUsize::new(0));
    let connection = EngineConnection::new(engine.clone(), "orbit", None);

    for _ in 0..2 {
        let counter = Arc::clone(&runs);
        connection
            .open(1, move |change| {
                counter.fetch_add(1, Ordering::SeqCst);
                change.create_object_store("planet", StoreParams::new("id"))
            })
            .await
            .unwrap();
        connection.close();
    }
    assert_eq!(runs.load(Ordering::SeqCst), 1);
    assert_eq!(engine.describe("orbit").unwrap().stores.len(), 1);
}

#[tokio::test]
async fn reopened_adapter_keeps_records() {
    let engine = MemoryEngine::new();
    let first = adapter(&engine, AdapterConfig::default()).await;
    first.add("planet", jupiter()).await.unwrap();
    first.close();

    let second = adapter(&engine, AdapterConfig::default()).await;
    assert_eq!(second.find("planet", "p1").await.unwrap(), Some(jupiter()));
}

#[tokio::test]
async fn higher_version_closes_older_connection() {
    let engine = MemoryEngine::new();
    let first = adapter(&engine, AdapterConfig::default()).await;
    first.add("planet", jupiter()).await.unwrap();

    let (seen_tx, mut seen_rx) = mpsc::unbounded_channel();
    first.on_version_change(move |event| {
        let _ = seen_tx.send(event);
    });

    let second = adapter(&engine, AdapterConfig::new().version(2)).await;
    assert_eq!(second.state(), ConnectionState::Open);
    assert_eq!(engine.version_of("orbit"), Some(2));

    let event = timeout(WAIT, seen_rx.recv()).await.unwrap().unwrap();
    assert_eq!(event.old_version, 1);
    assert_eq!(event.new_version, Some(2));

    assert_eq!(first.state(), ConnectionState::Closed);
    let err = first.find("planet", "p1").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ConnectionClosed);

    // Data written through the old connection is still there.
    assert_eq!(second.find("planet", "p1").await.unwrap(), Some(jupiter()));
}

#[tokio::test]
async fn blocked_open_is_reported_and_waits() {
    let engine = MemoryEngine::new();
    let holdout = open_raw(&engine, "orbit", 1).await;

    let (blocked_tx, mut blocked_rx) = mpsc::unbounded_channel();
    let config = AdapterConfig::new().version(2).on_blocked(move |err| {
        let _ = blocked_tx.send(err.clone());
    });
    let init_engine = engine.clone();
    let opening = tokio::spawn(async move {
        StorageAdapter::initialize(init_engine, planet_schema(), config).await
    });

    let blocked = timeout(WAIT, blocked_rx.recv()).await.unwrap().unwrap();
    assert!(matches!(
        blocked,
        AdapterError::ConnectionBlocked {
            old_version: 1,
            new_version: Some(2),
            ..
        }
    ));
    assert_eq!(blocked.kind(), ErrorKind::ConnectionBlocked);
    assert!(!opening.is_finished());

    holdout.close();
    let adapter = timeout(WAIT, opening).await.unwrap().unwrap().unwrap();
    assert_eq!(adapter.state(), ConnectionState::Open);
    assert_eq!(engine.version_of("orbit"), Some(2));
}

#[tokio::test]
async fn lower_version_than_stored_fails_open() {
    let engine = MemoryEngine::new();
    let newer = adapter(&engine, AdapterConfig::new().version(3)).await;
    newer.close();

    let err = StorageAdapter::initialize(engine, planet_schema(), AdapterConfig::default())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::EngineRequestFailed);
    assert_eq!(err.context().unwrap().code, "VersionError");
}

#[tokio::test]
async fn delete_database_closes_and_removes_everything() {
    let engine = MemoryEngine::new();
    let adapter = adapter(&engine, AdapterConfig::default()).await;
    adapter.add("planet", jupiter()).await.unwrap();

    adapter.delete_database().await.unwrap();
    assert_eq!(adapter.state(), ConnectionState::Closed);
    assert!(engine.database_names().is_empty());
    let err = adapter.add("planet", jupiter()).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ConnectionClosed);

    adapter.reopen().await.unwrap();
    assert_eq!(engine.version_of("orbit"), Some(1));
    assert_eq!(adapter.find("planet", "p1").await.unwrap(), None);
}

#[tokio::test]
async fn delete_from_elsewhere_closes_adapter() {
    let engine = MemoryEngine::new();
    let adapter = adapter(&engine, AdapterConfig::default()).await;

    let (tx, rx) = oneshot::channel();
    let request = engine.delete_database("orbit");
    request.on_success(move |version| {
        let _ = tx.send(version);
    });
    assert_eq!(timeout(WAIT, rx).await.unwrap().unwrap(), 1);
    assert_eq!(adapter.state(), ConnectionState::Closed);
}

#[tokio::test]
async fn reset_recreates_empty_namespace() {
    let engine = MemoryEngine::new();
    let ready = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&ready);
    let config = AdapterConfig::default().on_ready(move || {
        counter.fetch_add(1, Ordering::SeqCst);
    });
    let adapter = adapter(&engine, config).await;
    adapter.add("planet", jupiter()).await.unwrap();

    adapter.reset().await.unwrap();
    assert_eq!(adapter.state(), ConnectionState::Open);
    assert_eq!(adapter.find("planet", "p1").await.unwrap(), None);
    adapter.add("planet", jupiter()).await.unwrap();
    assert_eq!(ready.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn zero_version_is_invalid_argument() {
    let err = StorageAdapter::initialize(
        MemoryEngine::new(),
        planet_schema(),
        AdapterConfig::new().version(0),
    )
    .await
    .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidArgument);
}
