//! Find command implementation.

use super::{load_engine, load_schema, CommandResult};
use orbitkv_core::{AdapterConfig, StorageAdapter};
use serde_json::Value;
use std::path::Path;

/// Runs the find command.
pub async fn run(
    data: &Path,
    schema_path: &Path,
    config: AdapterConfig,
    model: &str,
    id: &str,
) -> CommandResult<()> {
    let schema = load_schema(schema_path)?;
    let engine = load_engine(data)?;
    let adapter = StorageAdapter::initialize(engine, schema, config).await?;

    match adapter.find(model, parse_id(id)).await? {
        Some(record) => println!("{}", serde_json::to_string_pretty(&Value::Object(record))?),
        None => println!("null"),
    }
    Ok(())
}

/// Integer-looking identifiers are looked up as integers.
fn parse_id(id: &str) -> Value {
    id.parse::<i64>().map_or_else(|_| Value::from(id), Value::from)
}
