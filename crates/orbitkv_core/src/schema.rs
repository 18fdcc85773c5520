//! Declarative schema consumed by the adapter.
//!
//! A schema names the identifier field shared by every record and lists the
//! models in declaration order. Each model declares attributes (one index
//! each) and links to other models. Link mutations are not supported by the
//! adapter; links are validated and kept for inspection only.

use crate::error::{AdapterError, AdapterResult};
use orbitkv_engine::Key;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

/// A record: field name to value.
pub type Record = serde_json::Map<String, Value>;

/// Identifier field used when a schema does not name one.
pub const DEFAULT_ID_FIELD: &str = "id";

fn default_attribute_kind() -> String {
    "string".to_string()
}

fn default_id_field() -> String {
    DEFAULT_ID_FIELD.to_string()
}

/// Whether an identifier value counts as absent: no value, `null`, or the
/// empty string.
#[must_use]
pub fn is_missing_id(id: Option<&Value>) -> bool {
    match id {
        None | Some(Value::Null) => true,
        Some(Value::String(s)) => s.is_empty(),
        Some(_) => false,
    }
}

/// One declared attribute.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributeDescriptor {
    /// Declared type name. Informational; not enforced at write time.
    #[serde(rename = "type", default = "default_attribute_kind")]
    pub kind: String,
    /// Whether the attribute's index is unique.
    #[serde(default)]
    pub unique: bool,
}

impl Default for AttributeDescriptor {
    fn default() -> Self {
        Self {
            kind: default_attribute_kind(),
            unique: false,
        }
    }
}

impl AttributeDescriptor {
    /// Creates a non-unique attribute of the given type.
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            unique: false,
        }
    }

    /// Sets uniqueness.
    #[must_use]
    pub fn unique(mut self, value: bool) -> Self {
        self.unique = value;
        self
    }
}

/// Cardinality of a link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum LinkKind {
    /// At most one related record.
    HasOne,
    /// Any number of related records.
    HasMany,
}

/// One declared link.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkDescriptor {
    /// Cardinality.
    #[serde(rename = "type")]
    pub kind: LinkKind,
    /// Target model.
    pub model: String,
    /// Name of the link on the target model pointing back, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inverse: Option<String>,
}

/// One model: a record collection with its attributes and links.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelDescriptor {
    /// Collection name.
    pub name: String,
    /// Attributes in declaration order.
    pub attributes: Vec<(String, AttributeDescriptor)>,
    /// Links in declaration order.
    pub links: Vec<(String, LinkDescriptor)>,
}

impl ModelDescriptor {
    /// Creates a model with no attributes or links.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            attributes: Vec::new(),
            links: Vec::new(),
        }
    }

    /// Adds an attribute.
    #[must_use]
    pub fn attribute(mut self, name: impl Into<String>, attribute: AttributeDescriptor) -> Self {
        self.attributes.push((name.into(), attribute));
        self
    }

    /// Adds a link.
    #[must_use]
    pub fn link(mut self, name: impl Into<String>, link: LinkDescriptor) -> Self {
        self.links.push((name.into(), link));
        self
    }

    /// Looks up an attribute by name.
    #[must_use]
    pub fn attribute_named(&self, name: &str) -> Option<&AttributeDescriptor> {
        self.attributes
            .iter()
            .find(|(attribute, _)| attribute == name)
            .map(|(_, descriptor)| descriptor)
    }
}

/// Supplies identifiers for records that lack one.
pub trait IdGenerator: Send + Sync {
    /// Returns a fresh identifier for a record of `model`.
    fn generate(&self, model: &str) -> Value;
}

/// Generates random UUID v4 strings.
#[derive(Debug, Clone, Copy, Default)]
pub struct UuidGenerator;

impl IdGenerator for UuidGenerator {
    fn generate(&self, _model: &str) -> Value {
        Value::String(Uuid::new_v4().to_string())
    }
}

/// Map deserialization that keeps declaration order.
mod ordered {
    use serde::de::{Deserialize, Deserializer, MapAccess, Visitor};
    use std::fmt;
    use std::marker::PhantomData;

    struct OrderedVisitor<T>(PhantomData<T>);

    impl<'de, T: Deserialize<'de>> Visitor<'de> for OrderedVisitor<T> {
        type Value = Vec<(String, T)>;

        fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("a map")
        }

        fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Self::Value, A::Error> {
            let mut entries = Vec::with_capacity(map.size_hint().unwrap_or(0));
            while let Some((key, value)) = map.next_entry::<String, T>()? {
                entries.push((key, value));
            }
            Ok(entries)
        }
    }

    pub(super) fn deserialize<'de, D, T>(deserializer: D) -> Result<Vec<(String, T)>, D::Error>
    where
        D: Deserializer<'de>,
        T: Deserialize<'de>,
    {
        deserializer.deserialize_map(OrderedVisitor(PhantomData))
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawSchema {
    #[serde(default = "default_id_field")]
    id_field: String,
    #[serde(default, deserialize_with = "ordered::deserialize")]
    models: Vec<(String, RawModel)>,
}

#[derive(Deserialize)]
struct RawModel {
    #[serde(default, deserialize_with = "ordered::deserialize")]
    attributes: Vec<(String, Option<AttributeDescriptor>)>,
    #[serde(default, deserialize_with = "ordered::deserialize")]
    links: Vec<(String, LinkDescriptor)>,
}

/// The schema: identifier field, ordered models, and the identifier hook.
#[derive(Clone)]
pub struct Schema {
    id_field: String,
    models: Vec<ModelDescriptor>,
    id_generator: Option<Arc<dyn IdGenerator>>,
}

impl Schema {
    /// Creates a schema with the UUID identifier generator.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` for an empty identifier field, a repeated
    /// model name, or a link to an undeclared model.
    pub fn new(id_field: impl Into<String>, models: Vec<ModelDescriptor>) -> AdapterResult<Self> {
        let id_field = id_field.into();
        if id_field.is_empty() {
            return Err(AdapterError::invalid_argument("idField must not be empty"));
        }
        for (position, model) in models.iter().enumerate() {
            if models[..position].iter().any(|earlier| earlier.name == model.name) {
                return Err(AdapterError::invalid_argument(format!(
                    "model '{}' is declared twice",
                    model.name
                )));
            }
            for (link, descriptor) in &model.links {
                if !models.iter().any(|target| target.name == descriptor.model) {
                    return Err(AdapterError::invalid_argument(format!(
                        "link '{}.{link}' targets undeclared model '{}'",
                        model.name, descriptor.model
                    )));
                }
            }
        }
        Ok(Self {
            id_field,
            models,
            id_generator: Some(Arc::new(UuidGenerator)),
        })
    }

    /// Parses a schema from JSON, keeping the declared order of models and
    /// attributes.
    ///
    /// ```
    /// use orbitkv_core::Schema;
    ///
    /// let schema = Schema::from_json(r#"{
    ///     "idField": "id",
    ///     "models": {
    ///         "planet": { "attributes": { "name": { "unique": true }, "classification": {} } }
    ///     }
    /// }"#).unwrap();
    /// assert_eq!(schema.model("planet").unwrap().attributes.len(), 2);
    /// ```
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if the JSON is malformed or the schema is invalid.
    pub fn from_json(json: &str) -> AdapterResult<Self> {
        let raw: RawSchema = serde_json::from_str(json)
            .map_err(|e| AdapterError::invalid_argument(format!("invalid schema: {e}")))?;
        let models = raw
            .models
            .into_iter()
            .map(|(name, model)| ModelDescriptor {
                name,
                attributes: model
                    .attributes
                    .into_iter()
                    .map(|(attribute, descriptor)| (attribute, descriptor.unwrap_or_default()))
                    .collect(),
                links: model.links,
            })
            .collect();
        Self::new(raw.id_field, models)
    }

    /// Replaces the identifier generator.
    #[must_use]
    pub fn with_id_generator(mut self, generator: impl IdGenerator + 'static) -> Self {
        self.id_generator = Some(Arc::new(generator));
        self
    }

    /// Removes the identifier generator; records must carry their own
    /// identifiers unless the engine generates them.
    #[must_use]
    pub fn without_id_generator(mut self) -> Self {
        self.id_generator = None;
        self
    }

    /// Identifier field name.
    #[must_use]
    pub fn id_field(&self) -> &str {
        &self.id_field
    }

    /// Models in declaration order.
    #[must_use]
    pub fn models(&self) -> &[ModelDescriptor] {
        &self.models
    }

    /// Looks up a model.
    #[must_use]
    pub fn model(&self, name: &str) -> Option<&ModelDescriptor> {
        self.models.iter().find(|model| model.name == name)
    }

    /// Fills in the identifier of a record that lacks one.
    ///
    /// Does nothing if the record has an identifier or no generator is set.
    pub fn init_record(&self, model: &str, record: &mut Record) {
        let missing = is_missing_id(record.get(&self.id_field));
        if let (true, Some(generator)) = (missing, &self.id_generator) {
            record.insert(self.id_field.clone(), generator.generate(model));
        }
    }

    /// Returns the record's identifier as an engine key.
    #[must_use]
    pub fn id_of(&self, record: &Record) -> Option<Key> {
        let id = record.get(&self.id_field);
        if is_missing_id(id) {
            return None;
        }
        id.and_then(Key::from_value)
    }

    /// Removes an absent identifier (`null` or `""`) so the engine's key
    /// generator can assign one.
    pub fn strip_missing_id(&self, record: &mut Record) {
        if record.contains_key(&self.id_field) && is_missing_id(record.get(&self.id_field)) {
            record.remove(&self.id_field);
        }
    }
}

impl fmt::Debug for Schema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Schema")
            .field("id_field", &self.id_field)
            .field("models", &self.models)
            .field("id_generator", &self.id_generator.is_some())
            .finish()
    }
}
