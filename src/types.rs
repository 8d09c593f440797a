use serde::{Deserialize, Serialize};
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Tenant identifier for multi-tenant indexes.
pub type TenantId = String;
/// Document identifier, the string form of the entity identifier.
pub type DocumentId = String;

/// An entity instance as handed over by the application.
///
/// The indexing core never looks inside it; only the document contributor and
/// the reindex resolver registered for the entity type downcast it.
pub type EntityHandle = Arc<dyn Any + Send + Sync>;

/// Identity of one logical entity: its type name and identifier.
///
/// Used both to coalesce operations inside an indexing plan and to report
/// entities whose index state became uncertain after a failure.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityKey {
    pub entity_type: String,
    pub id: String,
}

impl EntityKey {
    pub fn new(entity_type: impl Into<String>, id: impl Into<String>) -> Self {
        EntityKey {
            entity_type: entity_type.into(),
            id: id.into(),
        }
    }
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.entity_type, self.id)
    }
}

/// A document payload with an ID and a set of named fields.
///
/// Built by a [`crate::plan::DocumentContributor`] when a pending entity is
/// resolved to an add or update work item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: DocumentId,
    pub fields: HashMap<String, FieldValue>,
}

impl Document {
    pub fn new(id: impl Into<DocumentId>) -> Self {
        Document {
            id: id.into(),
            fields: HashMap::new(),
        }
    }

    pub fn add_field(&mut self, name: impl Into<String>, value: impl Into<FieldValue>) -> &mut Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.fields.get(name)
    }

    /// JSON object holding only the fields, as sent to document stores that
    /// keep the identifier out of the source.
    pub fn source_json(&self) -> serde_json::Value {
        sorted_object(&self.fields)
    }
}

/// Keys are emitted in sorted order at every depth.
fn sorted_object(fields: &HashMap<String, FieldValue>) -> serde_json::Value {
    let mut entries: Vec<(&String, &FieldValue)> = fields.iter().collect();
    entries.sort_by(|a, b| a.0.cmp(b.0));
    let map = entries
        .into_iter()
        .map(|(k, v)| (k.clone(), field_value_to_json_value(v)))
        .collect();
    serde_json::Value::Object(map)
}

fn field_value_to_json_value(field_value: &FieldValue) -> serde_json::Value {
    match field_value {
        FieldValue::Text(s) => serde_json::Value::String(s.clone()),
        FieldValue::Integer(i) => serde_json::json!(i),
        FieldValue::Float(f) => serde_json::json!(f),
        FieldValue::Bool(b) => serde_json::Value::Bool(*b),
        FieldValue::Array(arr) => {
            serde_json::Value::Array(arr.iter().map(field_value_to_json_value).collect())
        }
        FieldValue::Object(obj) => sorted_object(obj),
    }
}

/// A dynamically-typed field value stored in a [`Document`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum FieldValue {
    Object(HashMap<String, FieldValue>),
    Array(Vec<FieldValue>),
    Text(String),
    Integer(i64),
    Float(f64),
    Bool(bool),
}

impl FieldValue {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            FieldValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self {
            FieldValue::Integer(i) => Some(*i),
            _ => None,
        }
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        FieldValue::Text(value.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        FieldValue::Text(value)
    }
}

impl From<i64> for FieldValue {
    fn from(value: i64) -> Self {
        FieldValue::Integer(value)
    }
}

impl From<f64> for FieldValue {
    fn from(value: f64) -> Self {
        FieldValue::Float(value)
    }
}

impl From<bool> for FieldValue {
    fn from(value: bool) -> Self {
        FieldValue::Bool(value)
    }
}

impl<T: Into<FieldValue>> From<Vec<T>> for FieldValue {
    fn from(values: Vec<T>) -> Self {
        FieldValue::Array(values.into_iter().map(Into::into).collect())
    }
}
