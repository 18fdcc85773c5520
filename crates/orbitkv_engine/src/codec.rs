//! Value encoding for stored records.
//!
//! Records are stored as CBOR bytes rather than live values, so every read
//! hands out an independent copy and later mutation by the caller cannot
//! reach into the store.

use crate::error::{EngineError, EngineResult};
use serde_json::Value;

/// Encodes a value into its stored form.
pub(crate) fn encode(value: &Value) -> EngineResult<Vec<u8>> {
    let mut bytes = Vec::new();
    ciborium::ser::into_writer(value, &mut bytes)
        .map_err(|e| EngineError::codec(format!("failed to encode value: {e}")))?;
    Ok(bytes)
}

/// Decodes a stored value.
pub(crate) fn decode(bytes: &[u8]) -> EngineResult<Value> {
    ciborium::de::from_reader(bytes)
        .map_err(|e| EngineError::codec(format!("failed to decode value: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn nested_record_survives_storage() {
        let value = json!({
            "id": "p1",
            "name": "Jupiter",
            "moons": 95,
            "mass": 1.898e27,
            "tags": ["gas giant", null, true]
        });
        let bytes = encode(&value).unwrap();
        assert_eq!(decode(&bytes).unwrap(), value);
    }

    #[test]
    fn garbage_fails_to_decode() {
        assert!(matches!(decode(&[0xff, 0x00]), Err(EngineError::Codec { .. })));
    }
}
