//! Inspect command implementation.

use super::CommandResult;
use orbitkv_engine::{DatabaseInfo, MemoryEngine};
use std::path::Path;

/// Runs the inspect command.
pub fn run(path: &Path, format: &str) -> CommandResult<()> {
    if !path.exists() {
        return Err(format!("No snapshot found at {}", path.display()).into());
    }
    let databases = describe_all(&MemoryEngine::load_snapshot(path)?);

    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&to_json(&databases))?),
        _ => print_text_output(path, &databases),
    }
    Ok(())
}

fn describe_all(engine: &MemoryEngine) -> Vec<DatabaseInfo> {
    engine
        .database_names()
        .iter()
        .filter_map(|name| engine.describe(name))
        .collect()
}

fn to_json(databases: &[DatabaseInfo]) -> serde_json::Value {
    databases
        .iter()
        .map(|db| {
            serde_json::json!({
                "name": db.name,
                "version": db.version,
                "collections": db.stores.iter().map(|store| serde_json::json!({
                    "name": store.name,
                    "keyPath": store.key_path,
                    "autoIncrement": store.auto_increment,
                    "records": store.record_count,
                    "indexes": store.indexes.iter().map(|index| serde_json::json!({
                        "name": index.name,
                        "keyPath": index.key_path,
                        "unique": index.unique,
                    })).collect::<Vec<_>>(),
                })).collect::<Vec<_>>(),
            })
        })
        .collect()
}

fn print_text_output(path: &Path, databases: &[DatabaseInfo]) {
    println!("OrbitKV Snapshot Inspection");
    println!("===========================");
    println!();
    println!("Path: {}", path.display());

    if databases.is_empty() {
        println!();
        println!("(no databases)");
    }
    for db in databases {
        println!();
        println!("Database {} (version {})", db.name, db.version);
        for store in &db.stores {
            let generated = if store.auto_increment { ", auto-increment" } else { "" };
            println!(
                "  {} [key {}{}] {} records",
                store.name, store.key_path, generated, store.record_count
            );
            for index in &store.indexes {
                let unique = if index.unique { " unique" } else { "" };
                println!("    index {} on {}{}", index.name, index.key_path, unique);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use orbitkv_engine::{IndexInfo, StoreInfo};

    #[test]
    fn json_output_lists_collections_and_indexes() {
        let databases = vec![DatabaseInfo {
            name: "orbit".to_string(),
            version: 2,
            stores: vec![StoreInfo {
                name: "planet".to_string(),
                key_path: "id".to_string(),
                auto_increment: false,
                indexes: vec![IndexInfo {
                    name: "name".to_string(),
                    key_path: "name".to_string(),
                    unique: true,
                }],
                record_count: 3,
            }],
        }];
        let json = to_json(&databases);
        assert_eq!(json[0]["version"], 2);
        assert_eq!(json[0]["collections"][0]["records"], 3);
        assert_eq!(json[0]["collections"][0]["indexes"][0]["unique"], true);
    }

    #[test]
    fn missing_snapshot_is_an_error() {
        let dir = tempfile::TempDir::new().unwrap();
        assert!(run(&dir.path().join("absent.snapshot"), "text").is_err());
    }
}
