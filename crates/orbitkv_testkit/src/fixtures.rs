//! Test fixtures and adapter helpers.
//!
//! Provides the planet/moon schema used across the test suites and a
//! synchronous wrapper around an adapter for use inside property tests.

use orbitkv_core::{AdapterConfig, AdapterResult, Record, Schema, StorageAdapter};
use orbitkv_engine::MemoryEngine;
use serde_json::{json, Value};
use std::future::Future;
use std::path::PathBuf;
use tempfile::TempDir;
use tokio::runtime::{Builder, Runtime};

/// Schema with a `planet` model (unique `name`, plain `classification`)
/// and a `moon` model linked to it.
pub const PLANET_SCHEMA: &str = r#"{
    "idField": "id",
    "models": {
        "planet": {
            "attributes": {
                "name": { "type": "string", "unique": true },
                "classification": { "type": "string" }
            },
            "links": { "moons": { "type": "hasMany", "model": "moon", "inverse": "planet" } }
        },
        "moon": {
            "attributes": { "name": { "type": "string" } },
            "links": { "planet": { "type": "hasOne", "model": "planet", "inverse": "moons" } }
        }
    }
}"#;

/// Parses [`PLANET_SCHEMA`].
pub fn planet_schema() -> Schema {
    Schema::from_json(PLANET_SCHEMA).expect("planet schema must parse")
}

/// Converts a JSON object literal into a record.
pub fn record(value: Value) -> Record {
    value
        .as_object()
        .cloned()
        .expect("record literal must be an object")
}

/// A planet record.
pub fn planet(id: &str, name: &str, classification: &str) -> Record {
    record(json!({"id": id, "name": name, "classification": classification}))
}

/// Builds a single-threaded runtime for driving adapters from sync tests.
pub fn runtime() -> Runtime {
    Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("failed to build test runtime")
}

/// An adapter bundled with its engine and a runtime to drive it.
pub struct TestAdapter {
    /// The adapter.
    pub adapter: StorageAdapter,
    /// The engine behind it.
    pub engine: MemoryEngine,
    runtime: Runtime,
}

impl TestAdapter {
    /// Initializes an adapter over a fresh engine with the planet schema.
    pub fn new(config: AdapterConfig) -> Self {
        let runtime = runtime();
        let engine = MemoryEngine::new();
        let adapter = runtime
            .block_on(StorageAdapter::initialize(engine.clone(), planet_schema(), config))
            .expect("failed to initialize test adapter");
        Self {
            adapter,
            engine,
            runtime,
        }
    }

    /// Initializes an adapter with the default configuration.
    pub fn planets() -> Self {
        Self::new(AdapterConfig::default())
    }

    /// Runs a future on the adapter's runtime.
    pub fn block_on<F: Future>(&self, future: F) -> F::Output {
        self.runtime.block_on(future)
    }

    /// Adds a record, blocking until it settles.
    pub fn add(&self, model: &str, record: Record) -> AdapterResult<Record> {
        self.block_on(self.adapter.add(model, record))
    }

    /// Looks up a record, blocking until it settles.
    pub fn find(&self, model: &str, id: impl Into<Value>) -> AdapterResult<Option<Record>> {
        self.block_on(self.adapter.find(model, id))
    }
}

/// A temporary directory for snapshot files.
pub struct SnapshotDir {
    dir: TempDir,
}

impl SnapshotDir {
    /// Creates an empty temporary directory.
    pub fn new() -> Self {
        Self {
            dir: TempDir::new().expect("failed to create temp directory"),
        }
    }

    /// Path of a snapshot file inside the directory.
    pub fn file(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }
}

impl Default for SnapshotDir {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_adapter_round_trip() {
        let test = TestAdapter::planets();
        test.add("planet", planet("p1", "Jupiter", "gas giant")).unwrap();
        assert_eq!(
            test.find("planet", "p1").unwrap(),
            Some(planet("p1", "Jupiter", "gas giant"))
        );
    }

    #[test]
    fn snapshot_survives_engine_restart() {
        let dir = SnapshotDir::new();
        let path = dir.file("orbit.snapshot");

        let test = TestAdapter::planets();
        test.add("planet", planet("p1", "Jupiter", "gas giant")).unwrap();
        test.engine.save_snapshot(&path).unwrap();

        let engine = MemoryEngine::load_snapshot(&path).unwrap();
        let rt = runtime();
        let adapter = rt
            .block_on(StorageAdapter::initialize(engine, planet_schema(), AdapterConfig::default()))
            .unwrap();
        let found = rt.block_on(adapter.find("planet", "p1")).unwrap();
        assert_eq!(found, Some(planet("p1", "Jupiter", "gas giant")));

        // The unique index came back with the data.
        let err = rt
            .block_on(adapter.add("planet", planet("p2", "Jupiter", "gas giant")))
            .unwrap_err();
        assert_eq!(err.kind(), orbitkv_core::ErrorKind::DuplicateKey);
    }
}
