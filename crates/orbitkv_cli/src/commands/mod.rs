//! CLI command implementations.

pub mod find;
pub mod inspect;
pub mod plan;
pub mod run;

use orbitkv_core::Schema;
use orbitkv_engine::MemoryEngine;
use std::path::Path;

/// Boxed error used by every command.
pub type CommandResult<T> = Result<T, Box<dyn std::error::Error>>;

/// Loads the engine from a snapshot, or starts empty if the file is absent.
pub fn load_engine(path: &Path) -> CommandResult<MemoryEngine> {
    if path.exists() {
        Ok(MemoryEngine::load_snapshot(path)?)
    } else {
        tracing::debug!(path = %path.display(), "no snapshot yet, starting empty");
        Ok(MemoryEngine::new())
    }
}

/// Reads a schema file.
pub fn load_schema(path: &Path) -> CommandResult<Schema> {
    let json = std::fs::read_to_string(path)
        .map_err(|e| format!("cannot read schema {}: {e}", path.display()))?;
    Ok(Schema::from_json(&json)?)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::path::PathBuf;
    use tempfile::TempDir;

    pub(crate) const SCHEMA: &str = r#"{
        "idField": "id",
        "models": {
            "planet": { "attributes": { "name": { "unique": true }, "classification": {} } }
        }
    }"#;

    pub(crate) fn write_schema(dir: &TempDir) -> PathBuf {
        let path = dir.path().join("schema.json");
        std::fs::write(&path, SCHEMA).unwrap();
        path
    }

    #[test]
    fn missing_snapshot_starts_empty() {
        let dir = TempDir::new().unwrap();
        let engine = load_engine(&dir.path().join("absent.snapshot")).unwrap();
        assert!(engine.database_names().is_empty());
    }

    #[test]
    fn unreadable_schema_is_reported() {
        let dir = TempDir::new().unwrap();
        let err = load_schema(&dir.path().join("absent.json")).unwrap_err();
        assert!(err.to_string().contains("cannot read schema"));
    }

    #[test]
    fn schema_file_parses() {
        let dir = TempDir::new().unwrap();
        let schema = load_schema(&write_schema(&dir)).unwrap();
        assert!(schema.model("planet").is_some());
    }
}
