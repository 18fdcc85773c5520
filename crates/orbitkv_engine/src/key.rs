//! Record keys and key path resolution.

use crate::error::{EngineError, EngineResult};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// A primary or index key.
///
/// Keys are totally ordered: every integer sorts before every string.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Key {
    /// Integer key (also produced by key generators).
    Integer(i64),
    /// String key.
    Text(String),
}

impl Key {
    /// Converts a JSON value into a key.
    ///
    /// Only integers and strings are valid keys.
    #[must_use]
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Number(n) => n.as_i64().map(Key::Integer),
            Value::String(s) => Some(Key::Text(s.clone())),
            _ => None,
        }
    }

    /// Converts the key back into a JSON value.
    #[must_use]
    pub fn to_value(&self) -> Value {
        match self {
            Key::Integer(n) => Value::from(*n),
            Key::Text(s) => Value::String(s.clone()),
        }
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Key::Integer(n) => write!(f, "{n}"),
            Key::Text(s) => write!(f, "{s:?}"),
        }
    }
}

impl From<i64> for Key {
    fn from(n: i64) -> Self {
        Key::Integer(n)
    }
}

impl From<&str> for Key {
    fn from(s: &str) -> Self {
        Key::Text(s.to_string())
    }
}

impl From<String> for Key {
    fn from(s: String) -> Self {
        Key::Text(s)
    }
}

/// Looks up the value at a dotted key path.
fn lookup<'v>(value: &'v Value, key_path: &str) -> Option<&'v Value> {
    key_path
        .split('.')
        .try_fold(value, |current, segment| current.as_object()?.get(segment))
}

/// Extracts the primary key of `value` at `key_path`.
///
/// Returns `Ok(None)` when nothing is stored at the path and a data error
/// when something is stored there that is not a valid key.
pub(crate) fn extract_key(value: &Value, key_path: &str) -> EngineResult<Option<Key>> {
    match lookup(value, key_path) {
        None => Ok(None),
        Some(found) => Key::from_value(found).map(Some).ok_or_else(|| {
            EngineError::data(format!(
                "value at key path '{key_path}' is not a valid key: {found}"
            ))
        }),
    }
}

/// Extracts an index key; values that are missing or not keys are not indexed.
pub(crate) fn extract_index_key(value: &Value, key_path: &str) -> Option<Key> {
    lookup(value, key_path).and_then(Key::from_value)
}

/// Writes a generated key into `value` at `key_path`, creating objects on the way.
pub(crate) fn inject_key(value: &mut Value, key_path: &str, key: &Key) -> EngineResult<()> {
    let mut segments = key_path.split('.').peekable();
    let mut current = value;
    while let Some(segment) = segments.next() {
        let object = current.as_object_mut().ok_or_else(|| {
            EngineError::data(format!("cannot write key path '{key_path}' into a non-object"))
        })?;
        if segments.peek().is_none() {
            object.insert(segment.to_string(), key.to_value());
            return Ok(());
        }
        current = object
            .entry(segment.to_string())
            .or_insert_with(|| Value::Object(serde_json::Map::new()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn integers_sort_before_strings() {
        let mut keys = vec![Key::from("b"), Key::from(10), Key::from("a"), Key::from(-3)];
        keys.sort();
        assert_eq!(
            keys,
            vec![Key::from(-3), Key::from(10), Key::from("a"), Key::from("b")]
        );
    }

    #[test]
    fn from_value_rejects_non_keys() {
        assert_eq!(Key::from_value(&json!("p1")), Some(Key::from("p1")));
        assert_eq!(Key::from_value(&json!(7)), Some(Key::from(7)));
        assert_eq!(Key::from_value(&json!(1.5)), None);
        assert_eq!(Key::from_value(&json!(null)), None);
        assert_eq!(Key::from_value(&json!({"a": 1})), None);
    }

    #[test]
    fn extract_key_follows_dotted_paths() {
        let value = json!({"meta": {"id": "x"}, "id": 4});
        assert_eq!(extract_key(&value, "id").unwrap(), Some(Key::from(4)));
        assert_eq!(extract_key(&value, "meta.id").unwrap(), Some(Key::from("x")));
        assert_eq!(extract_key(&value, "missing").unwrap(), None);
    }

    #[test]
    fn extract_key_rejects_invalid_key_values() {
        let value = json!({"id": true});
        assert!(matches!(
            extract_key(&value, "id"),
            Err(EngineError::Data { .. })
        ));
        assert_eq!(extract_index_key(&value, "id"), None);
    }

    #[test]
    fn inject_key_creates_intermediate_objects() {
        let mut value = json!({"name": "Io"});
        inject_key(&mut value, "meta.id", &Key::from(3)).unwrap();
        assert_eq!(value, json!({"name": "Io", "meta": {"id": 3}}));
    }

    #[test]
    fn inject_key_into_scalar_fails() {
        let mut value = json!("scalar");
        assert!(inject_key(&mut value, "id", &Key::from(1)).is_err());
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn integer_keys_order_like_integers(a in any::<i64>(), b in any::<i64>()) {
                prop_assert_eq!(Key::from(a).cmp(&Key::from(b)), a.cmp(&b));
            }

            #[test]
            fn keys_survive_value_conversion(n in any::<i64>(), s in "[a-z0-9]{0,12}") {
                prop_assert_eq!(Key::from_value(&Key::from(n).to_value()), Some(Key::from(n)));
                let key = Key::from(s.as_str());
                prop_assert_eq!(Key::from_value(&key.to_value()), Some(key));
            }

            #[test]
            fn integers_always_precede_strings(n in any::<i64>(), s in ".{0,8}") {
                prop_assert!(Key::from(n) < Key::from(s));
            }
        }
    }
}
