//! Property-based test generators using proptest.

use orbitkv_core::{AttributeDescriptor, ModelDescriptor, OpKind, Operation, Record, Schema};
use proptest::prelude::*;
use serde_json::{json, Value};

/// Strategy for record identifiers.
pub fn id_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-z][a-z0-9]{0,11}").expect("Invalid regex")
}

/// Strategy for model and attribute names.
pub fn name_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-z][a-z_]{0,9}").expect("Invalid regex")
}

/// Strategy for planet records keyed by `id`.
///
/// Names are derived from the id so the unique `name` index never collides
/// between distinct ids.
pub fn planet_record_strategy() -> impl Strategy<Value = Record> {
    (
        id_strategy(),
        prop::option::of(prop::sample::select(vec!["gas giant", "terrestrial", "ice giant"])),
        prop::option::of(any::<i32>()),
    )
        .prop_map(|(id, classification, moons)| {
            let mut record = json!({"id": id, "name": format!("planet-{id}")});
            if let Some(classification) = classification {
                record["classification"] = json!(classification);
            }
            if let Some(moons) = moons {
                record["moons"] = json!(moons);
            }
            record.as_object().cloned().unwrap_or_default()
        })
}

/// Strategy for address paths with three or more segments.
pub fn sub_record_path_strategy() -> impl Strategy<Value = Vec<Value>> {
    (id_strategy(), prop::collection::vec(name_strategy(), 1..4)).prop_map(|(id, tail)| {
        let mut path = vec![json!("planet"), json!(id)];
        path.extend(tail.into_iter().map(Value::from));
        path
    })
}

/// Strategy for every op kind, known or not.
pub fn op_kind_strategy() -> impl Strategy<Value = OpKind> {
    prop_oneof![
        Just(OpKind::Add),
        Just(OpKind::Replace),
        Just(OpKind::Remove),
        name_strategy().prop_map(|name| OpKind::parse(&name)),
    ]
}

/// Strategy for operations addressing a sub-record.
pub fn sub_record_operation_strategy() -> impl Strategy<Value = Operation> {
    (op_kind_strategy(), sub_record_path_strategy(), planet_record_strategy())
        .prop_map(|(op, path, record)| Operation::new(op, path, Value::Object(record)))
}

/// Strategy for schemas with distinct model names and attributes.
pub fn schema_strategy() -> impl Strategy<Value = Schema> {
    prop::collection::btree_map(
        name_strategy(),
        prop::collection::btree_map(name_strategy(), any::<bool>(), 0..5),
        1..5,
    )
    .prop_map(|models| {
        let models = models
            .into_iter()
            .map(|(name, attributes)| {
                attributes
                    .into_iter()
                    .fold(ModelDescriptor::new(name), |model, (attribute, unique)| {
                        model.attribute(attribute, AttributeDescriptor::default().unique(unique))
                    })
            })
            .collect();
        Schema::new("id", models).expect("generated schema must be valid")
    })
}

/// Configuration for property tests.
#[derive(Debug, Clone)]
pub struct PropTestConfig {
    /// Number of test cases to run.
    pub cases: u32,
    /// Maximum shrink iterations.
    pub max_shrink_iters: u32,
}

impl Default for PropTestConfig {
    fn default() -> Self {
        Self {
            cases: 256,
            max_shrink_iters: 1000,
        }
    }
}

impl PropTestConfig {
    /// Configuration for tests that drive a full adapter per case.
    #[must_use]
    pub fn quick() -> Self {
        Self {
            cases: 32,
            max_shrink_iters: 100,
        }
    }

    /// Converts to proptest config.
    #[must_use]
    pub fn to_proptest_config(&self) -> ProptestConfig {
        ProptestConfig {
            cases: self.cases,
            max_shrink_iters: self.max_shrink_iters,
            ..ProptestConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    proptest! {
        #![proptest_config(PropTestConfig::quick().to_proptest_config())]

        #[test]
        fn planet_records_carry_id_and_name(record in planet_record_strategy()) {
            prop_assert!(record["id"].is_string());
            let expected = format!("planet-{}", record["id"].as_str().unwrap_or_default());
            prop_assert_eq!(record["name"].as_str(), Some(expected.as_str()));
        }

        #[test]
        fn sub_record_paths_are_long(path in sub_record_path_strategy()) {
            prop_assert!(path.len() > 2);
            prop_assert!(path.iter().all(Value::is_string));
        }

        #[test]
        fn generated_schemas_have_models(schema in schema_strategy()) {
            prop_assert!(!schema.models().is_empty());
            prop_assert_eq!(schema.id_field(), "id");
        }
    }
}
