//! Plan command implementation.
//!
//! Computes the provisioning actions without opening a connection, so the
//! snapshot is never modified.

use super::{load_engine, load_schema, CommandResult};
use orbitkv_core::{plan, AdapterConfig, ProvisionAction, Schema, StoreLayout};
use orbitkv_engine::MemoryEngine;
use std::path::Path;

/// Runs the plan command.
pub fn run(
    data: Option<&Path>,
    schema_path: &Path,
    config: &AdapterConfig,
    format: &str,
) -> CommandResult<()> {
    let schema = load_schema(schema_path)?;
    let engine = match data {
        Some(path) => load_engine(path)?,
        None => MemoryEngine::new(),
    };
    let stored_version = engine.version_of(&config.namespace);
    let actions = actions_for(&engine, &schema, config);

    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&actions)?),
        _ => {
            if let Some(stored) = stored_version.filter(|stored| *stored >= config.version) {
                println!(
                    "Stored version {stored} is not below {}; no upgrade would run.",
                    config.version
                );
            }
            if actions.is_empty() {
                println!("Nothing to provision.");
            }
            for action in &actions {
                println!("{action}");
            }
        }
    }
    Ok(())
}

fn actions_for(engine: &MemoryEngine, schema: &Schema, config: &AdapterConfig) -> Vec<ProvisionAction> {
    let existing = engine
        .describe(&config.namespace)
        .map(|info| StoreLayout::from_info(&info))
        .unwrap_or_default();
    plan(&existing, schema, config.auto_increment)
}

#[cfg(test)]
mod tests {
    use super::*;
    use orbitkv_core::StorageAdapter;

    #[tokio::test]
    async fn provisioned_namespace_plans_nothing() {
        let schema = Schema::from_json(crate::commands::tests::SCHEMA).unwrap();
        let engine = MemoryEngine::new();
        let config = AdapterConfig::default();

        assert_eq!(actions_for(&engine, &schema, &config).len(), 3);

        let _adapter = StorageAdapter::initialize(engine.clone(), schema.clone(), config.clone())
            .await
            .unwrap();
        assert!(actions_for(&engine, &schema, &config).is_empty());
    }
}
