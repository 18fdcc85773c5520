//! Operation dispatch.
//!
//! Operations address records by a path: `[type, id]`. Longer paths address
//! parts of a record (link management) and are rejected with
//! `UnsupportedOperation`, as are unknown ops.

use crate::error::{AdapterError, AdapterResult};
use crate::schema::{is_missing_id, Record};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use std::fmt;

/// The op of an [`Operation`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum OpKind {
    /// Insert a record.
    Add,
    /// Insert or replace a record.
    Replace,
    /// Remove a record.
    Remove,
    /// Any other op name. Always rejected.
    Unknown(String),
}

impl OpKind {
    /// Parses an op name.
    #[must_use]
    pub fn parse(name: &str) -> Self {
        match name {
            "add" => Self::Add,
            "replace" => Self::Replace,
            "remove" => Self::Remove,
            other => Self::Unknown(other.to_string()),
        }
    }

    /// The op name.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Add => "add",
            Self::Replace => "replace",
            Self::Remove => "remove",
            Self::Unknown(name) => name,
        }
    }
}

impl fmt::Display for OpKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for OpKind {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for OpKind {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let name = String::deserialize(deserializer)?;
        Ok(Self::parse(&name))
    }
}

/// An abstract data operation.
///
/// ```
/// use orbitkv_core::{Operation, OpKind};
///
/// let op: Operation = serde_json::from_str(
///     r#"{"op": "remove", "addressPath": ["planet", "p1"], "value": {"id": "p1"}}"#,
/// ).unwrap();
/// assert_eq!(op.op, OpKind::Remove);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Operation {
    /// What to do.
    pub op: OpKind,
    /// `[type, id, ...]`.
    #[serde(alias = "addressPath")]
    pub path: Vec<Value>,
    /// The record for add/replace; for remove, a value carrying the id.
    #[serde(default)]
    pub value: Value,
}

impl Operation {
    /// Creates an operation.
    pub fn new(op: OpKind, path: Vec<Value>, value: Value) -> Self {
        Self { op, path, value }
    }

    /// An add of `record` to `model`.
    pub fn add(model: &str, id: impl Into<Value>, record: Record) -> Self {
        Self::new(
            OpKind::Add,
            vec![Value::from(model), id.into()],
            Value::Object(record),
        )
    }

    /// A replace of `record` in `model`.
    pub fn replace(model: &str, id: impl Into<Value>, record: Record) -> Self {
        Self::new(
            OpKind::Replace,
            vec![Value::from(model), id.into()],
            Value::Object(record),
        )
    }

    /// A remove of the record `id` from `model`.
    pub fn remove(model: &str, id: impl Into<Value>) -> Self {
        Self::new(OpKind::Remove, vec![Value::from(model), id.into()], Value::Null)
    }
}

/// What applying an operation produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationOutcome {
    /// The record as stored by an add or replace.
    Record(Record),
    /// A remove completed.
    Removed,
}

impl OperationOutcome {
    /// The record, for add and replace outcomes.
    #[must_use]
    pub fn record(&self) -> Option<&Record> {
        match self {
            Self::Record(record) => Some(record),
            Self::Removed => None,
        }
    }
}

/// A validated operation, ready for the CRUD layer.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Instruction {
    Add { model: String, record: Record },
    Put { model: String, record: Record },
    Delete { model: String, id: Value },
}

fn record_value(op: &OpKind, value: &Value) -> AdapterResult<Record> {
    match value {
        Value::Object(record) => Ok(record.clone()),
        other => Err(AdapterError::invalid_argument(format!(
            "{op} needs a record value, got {other}"
        ))),
    }
}

fn model_of(path: &[Value]) -> AdapterResult<String> {
    match path.first() {
        Some(Value::String(model)) if !model.is_empty() => Ok(model.clone()),
        Some(other) => Err(AdapterError::invalid_argument(format!(
            "operation type must be a non-empty string, got {other}"
        ))),
        None => Err(AdapterError::invalid_argument("operation path is empty")),
    }
}

/// Validates an operation and maps it to a CRUD instruction.
///
/// Runs before anything touches the engine, so rejections are synchronous.
/// The path length is checked first, then the op, then the model segment.
pub(crate) fn route(operation: &Operation, id_field: &str) -> AdapterResult<Instruction> {
    let path = &operation.path;
    if path.len() > 2 {
        return Err(AdapterError::unsupported_operation(format!(
            "{} on sub-record path {} is not implemented",
            operation.op,
            Value::Array(path.clone())
        )));
    }

    match &operation.op {
        OpKind::Add => Ok(Instruction::Add {
            model: model_of(path)?,
            record: record_value(&operation.op, &operation.value)?,
        }),
        OpKind::Replace => Ok(Instruction::Put {
            model: model_of(path)?,
            record: record_value(&operation.op, &operation.value)?,
        }),
        OpKind::Remove => {
            let model = model_of(path)?;
            let from_value = operation
                .value
                .get(id_field)
                .filter(|id| !is_missing_id(Some(id)))
                .cloned();
            let id = from_value
                .or_else(|| path.get(1).cloned())
                .unwrap_or(Value::Null);
            Ok(Instruction::Delete { model, id })
        }
        OpKind::Unknown(name) => Err(AdapterError::unsupported_operation(format!(
            "unknown operation '{name}'"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ErrorKind;
    use serde_json::json;

    fn parse(json: Value) -> Operation {
        serde_json::from_value(json).unwrap()
    }

    #[test]
    fn add_routes_to_add() {
        let op = parse(json!({"op": "add", "path": ["planet", "p1"], "value": {"id": "p1"}}));
        assert_eq!(
            route(&op, "id").unwrap(),
            Instruction::Add {
                model: "planet".into(),
                record: json!({"id": "p1"}).as_object().cloned().unwrap(),
            }
        );
    }

    #[test]
    fn replace_routes_to_put() {
        let op = parse(json!({"op": "replace", "addressPath": ["planet", "p1"], "value": {"id": "p1"}}));
        assert!(matches!(route(&op, "id").unwrap(), Instruction::Put { .. }));
    }

    #[test]
    fn remove_takes_id_from_value_then_path() {
        let op = parse(json!({"op": "remove", "path": ["planet", "p1"], "value": {"id": "p2"}}));
        assert_eq!(
            route(&op, "id").unwrap(),
            Instruction::Delete {
                model: "planet".into(),
                id: json!("p2"),
            }
        );

        let op = parse(json!({"op": "remove", "path": ["planet", "p1"]}));
        assert_eq!(
            route(&op, "id").unwrap(),
            Instruction::Delete {
                model: "planet".into(),
                id: json!("p1"),
            }
        );
    }

    #[test]
    fn long_paths_are_unsupported_for_every_op() {
        for op in ["add", "replace", "remove", "bogus"] {
            let operation = parse(json!({
                "op": op,
                "path": ["planet", "p1", "links", "moons"],
                "value": {"id": "m1"}
            }));
            assert_eq!(
                route(&operation, "id").unwrap_err().kind(),
                ErrorKind::UnsupportedOperation
            );
        }
    }

    #[test]
    fn unknown_op_is_unsupported() {
        let op = parse(json!({"op": "move", "path": ["planet", "p1"], "value": {}}));
        assert_eq!(op.op, OpKind::Unknown("move".into()));
        let err = route(&op, "id").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnsupportedOperation);
        assert!(err.to_string().contains("move"));

        // The op is checked before the model segment.
        let op = parse(json!({"op": "move", "path": []}));
        assert_eq!(route(&op, "id").unwrap_err().kind(), ErrorKind::UnsupportedOperation);
    }

    #[test]
    fn remove_skips_empty_id_in_value() {
        let op = parse(json!({"op": "remove", "path": ["planet", "p1"], "value": {"id": ""}}));
        assert_eq!(
            route(&op, "id").unwrap(),
            Instruction::Delete {
                model: "planet".into(),
                id: json!("p1"),
            }
        );
    }

    #[test]
    fn malformed_paths_and_values_are_invalid() {
        let empty = parse(json!({"op": "add", "path": [], "value": {}}));
        assert_eq!(route(&empty, "id").unwrap_err().kind(), ErrorKind::InvalidArgument);

        let numeric = parse(json!({"op": "add", "path": [7, "p1"], "value": {}}));
        assert_eq!(route(&numeric, "id").unwrap_err().kind(), ErrorKind::InvalidArgument);

        let scalar = parse(json!({"op": "replace", "path": ["planet", "p1"], "value": 3}));
        assert_eq!(route(&scalar, "id").unwrap_err().kind(), ErrorKind::InvalidArgument);
    }

    #[test]
    fn op_kind_round_trips_through_json() {
        let op = Operation::remove("planet", "p1");
        let json = serde_json::to_value(&op).unwrap();
        assert_eq!(json["op"], "remove");
        assert_eq!(json["path"], json!(["planet", "p1"]));
    }
}
