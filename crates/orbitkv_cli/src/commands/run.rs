//! Run command implementation.

use super::{load_engine, load_schema, CommandResult};
use orbitkv_core::{AdapterConfig, Operation, OperationOutcome, StorageAdapter};
use orbitkv_engine::MemoryEngine;
use serde_json::{json, Value};
use std::path::Path;
use tracing::{info, warn};

/// Totals for one run.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct RunSummary {
    /// Operations that succeeded.
    pub applied: usize,
    /// Operations that failed.
    pub failed: usize,
}

/// Runs the run command.
pub async fn run(
    data: Option<&Path>,
    schema_path: &Path,
    operations_path: &Path,
    config: AdapterConfig,
    keep_going: bool,
) -> CommandResult<()> {
    let schema = load_schema(schema_path)?;
    let operations = read_operations(operations_path)?;
    let engine = match data {
        Some(path) => load_engine(path)?,
        None => MemoryEngine::new(),
    };
    let adapter = StorageAdapter::initialize(engine.clone(), schema, config).await?;

    let summary = apply_all(&adapter, &operations, keep_going).await;
    adapter.close();
    if let Some(path) = data {
        engine.save_snapshot(path)?;
        info!(
            applied = summary.applied,
            failed = summary.failed,
            path = %path.display(),
            "snapshot saved"
        );
    }

    match summary {
        RunSummary { failed: 0, .. } => Ok(()),
        RunSummary { failed, .. } => Err(format!("{failed} operation(s) failed").into()),
    }
}

/// Parses a single operation, an array of operations, or one operation per
/// line.
pub fn parse_operations(json: &str) -> CommandResult<Vec<Operation>> {
    let operations = match serde_json::from_str::<Value>(json) {
        Ok(Value::Array(items)) => items
            .into_iter()
            .map(serde_json::from_value)
            .collect::<Result<Vec<Operation>, _>>()?,
        Ok(other) => vec![serde_json::from_value(other)?],
        Err(_) => json
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(serde_json::from_str)
            .collect::<Result<Vec<Operation>, _>>()?,
    };
    Ok(operations)
}

fn read_operations(path: &Path) -> CommandResult<Vec<Operation>> {
    let json = std::fs::read_to_string(path)
        .map_err(|e| format!("cannot read operations {}: {e}", path.display()))?;
    parse_operations(&json)
}

/// Applies operations in order, printing one JSON line per outcome.
///
/// Stops at the first failure unless `keep_going` is set.
pub async fn apply_all(
    adapter: &StorageAdapter,
    operations: &[Operation],
    keep_going: bool,
) -> RunSummary {
    let mut summary = RunSummary::default();
    for (position, operation) in operations.iter().enumerate() {
        match adapter.apply_operation(operation).await {
            Ok(OperationOutcome::Record(record)) => {
                summary.applied += 1;
                println!("{}", json!({"op": operation.op, "record": record}));
            }
            Ok(OperationOutcome::Removed) => {
                summary.applied += 1;
                println!("{}", json!({"op": operation.op, "removed": operation.path}));
            }
            Err(e) => {
                summary.failed += 1;
                warn!(position, op = %operation.op, error = %e, "operation failed");
                if !keep_going {
                    break;
                }
            }
        }
    }
    summary
}
