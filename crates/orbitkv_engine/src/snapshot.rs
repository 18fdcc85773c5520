//! Snapshot files.
//!
//! A snapshot is one CBOR document holding every database: versions, store
//! definitions, index definitions, key generator positions and records.
//! Index contents are not saved; they are rebuilt on load.

use crate::engine::DatabaseData;
use crate::error::{EngineError, EngineResult};
use crate::store::StoreData;
use crate::types::{IndexParams, StoreParams};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

/// Marker at the start of every snapshot.
pub const SNAPSHOT_MAGIC: &str = "orbitkv-snapshot";

/// Current snapshot format version.
pub const SNAPSHOT_FORMAT: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct SnapshotFile {
    pub(crate) magic: String,
    pub(crate) format: u32,
    pub(crate) databases: Vec<SnapshotDatabase>,
}

#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct SnapshotDatabase {
    name: String,
    version: u32,
    stores: Vec<SnapshotStore>,
}

#[derive(Debug, Serialize, Deserialize)]
struct SnapshotStore {
    name: String,
    key_path: String,
    auto_increment: bool,
    next_key: i64,
    indexes: Vec<SnapshotIndex>,
    records: Vec<Value>,
}

#[derive(Debug, Serialize, Deserialize)]
struct SnapshotIndex {
    name: String,
    key_path: String,
    unique: bool,
}

pub(crate) fn capture(databases: &HashMap<String, DatabaseData>) -> EngineResult<SnapshotFile> {
    let mut names: Vec<&String> = databases.keys().collect();
    names.sort();

    let mut saved = Vec::with_capacity(names.len());
    for name in names {
        let db = &databases[name];
        let mut stores = Vec::with_capacity(db.stores.len());
        for (store_name, store) in &db.stores {
            stores.push(SnapshotStore {
                name: store_name.clone(),
                key_path: store.key_path.clone(),
                auto_increment: store.auto_increment,
                next_key: store.next_key,
                indexes: store
                    .indexes()
                    .map(|(index_name, index)| SnapshotIndex {
                        name: index_name.clone(),
                        key_path: index.key_path.clone(),
                        unique: index.unique,
                    })
                    .collect(),
                records: store.values()?,
            });
        }
        saved.push(SnapshotDatabase {
            name: name.clone(),
            version: db.version,
            stores,
        });
    }

    Ok(SnapshotFile {
        magic: SNAPSHOT_MAGIC.to_string(),
        format: SNAPSHOT_FORMAT,
        databases: saved,
    })
}

pub(crate) fn restore(file: SnapshotFile) -> EngineResult<HashMap<String, DatabaseData>> {
    let mut databases = HashMap::with_capacity(file.databases.len());
    for db in file.databases {
        let mut stores = BTreeMap::new();
        for store in db.stores {
            let params = StoreParams::new(store.key_path).auto_increment(store.auto_increment);
            let indexes = store
                .indexes
                .into_iter()
                .map(|index| (index.name, IndexParams::new(index.key_path).unique(index.unique)))
                .collect();
            let data = StoreData::restore(&store.name, params, store.next_key, indexes, store.records)?;
            stores.insert(store.name, data);
        }
        let mut data = DatabaseData::new(db.version);
        data.stores = stores;
        databases.insert(db.name, data);
    }
    Ok(databases)
}

/// Writes the snapshot next to `path` and renames it into place.
pub(crate) fn write(path: &Path, file: &SnapshotFile) -> EngineResult<()> {
    let temp_path = path.with_extension("tmp");
    let temp = File::create(&temp_path)?;
    let mut writer = BufWriter::new(temp);
    ciborium::ser::into_writer(file, &mut writer)
        .map_err(|e| EngineError::codec(format!("failed to encode snapshot: {e}")))?;
    writer.flush()?;
    let temp = writer
        .into_inner()
        .map_err(|e| EngineError::from(e.into_error()))?;
    temp.sync_all()?;
    drop(temp);
    fs::rename(&temp_path, path)?;
    Ok(())
}

pub(crate) fn read(path: &Path) -> EngineResult<SnapshotFile> {
    let reader = BufReader::new(File::open(path)?);
    let file: SnapshotFile = ciborium::de::from_reader(reader)
        .map_err(|e| EngineError::codec(format!("failed to decode snapshot: {e}")))?;
    if file.magic != SNAPSHOT_MAGIC {
        return Err(EngineError::codec(format!(
            "{} is not a snapshot file",
            path.display()
        )));
    }
    if file.format != SNAPSHOT_FORMAT {
        return Err(EngineError::codec(format!(
            "unsupported snapshot format {} (expected {SNAPSHOT_FORMAT})",
            file.format
        )));
    }
    Ok(file)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TransactionMode;
    use crate::{DbConnection, MemoryEngine};
    use serde_json::json;
    use std::sync::mpsc::channel;
    use std::time::Duration;
    use tempfile::tempdir;

    const WAIT: Duration = Duration::from_secs(5);

    fn open(engine: &MemoryEngine) -> DbConnection {
        let (tx, rx) = channel();
        let request = engine.open("orbit", 2);
        request.on_upgrade_needed(|change| {
            change.create_object_store("moon", StoreParams::new("id").auto_increment(true))?;
            change.create_index("moon", "name", IndexParams::new("name").unique(true))
        });
        request.on_success(move |db| tx.send(db).unwrap());
        request.send();
        rx.recv_timeout(WAIT).unwrap()
    }

    #[test]
    fn snapshot_preserves_structure_records_and_generator() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("orbit.snapshot");

        let engine = MemoryEngine::new();
        let db = open(&engine);
        let txn = db.transaction(&["moon"], TransactionMode::ReadWrite).unwrap();
        let store = txn.object_store("moon").unwrap();
        store.add(json!({"name": "Io"})).unwrap();
        store.add(json!({"name": "Europa"})).unwrap();
        let (tx, rx) = channel();
        txn.on_complete(move || tx.send(()).unwrap());
        txn.commit().unwrap();
        rx.recv_timeout(WAIT).unwrap();
        engine.save_snapshot(&path).unwrap();

        let loaded = MemoryEngine::load_snapshot(&path).unwrap();
        let info = loaded.describe("orbit").unwrap();
        assert_eq!(info.version, 2);
        assert_eq!(info.stores[0].record_count, 2);
        assert_eq!(info.stores[0].indexes[0].name, "name");

        let db = open(&loaded);
        let txn = db.transaction(&["moon"], TransactionMode::ReadWrite).unwrap();
        let (tx, rx) = channel();
        txn.object_store("moon")
            .unwrap()
            .add(json!({"name": "Ganymede"}))
            .unwrap()
            .on_success(move |key| tx.send(key).unwrap());
        txn.commit().unwrap();
        assert_eq!(rx.recv_timeout(WAIT).unwrap(), crate::Key::Integer(3));
    }

    #[test]
    fn foreign_file_is_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("not-a-snapshot");
        let mut bytes = Vec::new();
        ciborium::ser::into_writer(&json!({"magic": "other", "format": 1, "databases": []}), &mut bytes)
            .unwrap();
        fs::write(&path, bytes).unwrap();
        let err = MemoryEngine::load_snapshot(&path).err().unwrap();
        assert_eq!(err.code(), "DataCloneError");
    }
}
