//! Shared helpers for adapter integration tests.

#![allow(dead_code)]

use orbitkv_core::{AdapterConfig, Record, Schema, StorageAdapter};
use orbitkv_engine::MemoryEngine;
use serde_json::{json, Value};

pub const PLANET_SCHEMA: &str = r#"{
    "idField": "id",
    "models": {
        "planet": {
            "attributes": {
                "name": { "unique": true },
                "classification": {}
            },
            "links": { "moons": { "type": "hasMany", "model": "moon", "inverse": "planet" } }
        },
        "moon": {
            "attributes": { "name": {} },
            "links": { "planet": { "type": "hasOne", "model": "planet", "inverse": "moons" } }
        }
    }
}"#;

pub fn planet_schema() -> Schema {
    Schema::from_json(PLANET_SCHEMA).unwrap()
}

pub fn record(value: Value) -> Record {
    value.as_object().cloned().expect("record literal must be an object")
}

pub fn jupiter() -> Record {
    record(json!({"id": "p1", "name": "Jupiter", "classification": "gas giant"}))
}

pub async fn adapter(engine: &MemoryEngine, config: AdapterConfig) -> StorageAdapter {
    StorageAdapter::initialize(engine.clone(), planet_schema(), config)
        .await
        .unwrap()
}
