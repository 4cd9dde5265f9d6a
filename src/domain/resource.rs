use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Attribute map of a resource, keyed by attribute name.
pub type Attributes = Map<String, Value>;

/// Identity value of a tracked resource.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ResourceId {
    Int(i64),
    Text(String),
}

impl ResourceId {
    /// Reads an identity out of a JSON value. Null, floats and structured
    /// values are not identities.
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Number(n) => n.as_i64().map(Self::Int),
            Value::String(s) => Some(Self::Text(s.clone())),
            _ => None,
        }
    }

    pub fn to_value(&self) -> Value {
        match self {
            Self::Int(n) => Value::from(*n),
            Self::Text(s) => Value::String(s.clone()),
        }
    }
}

impl std::fmt::Display for ResourceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Int(n) => write!(f, "{}", n),
            Self::Text(s) => write!(f, "{}", s),
        }
    }
}

impl From<i64> for ResourceId {
    fn from(n: i64) -> Self {
        Self::Int(n)
    }
}

impl From<&str> for ResourceId {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

impl From<String> for ResourceId {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

/// A mutable record as the host sees it: its type (table name) and its
/// attributes, identity field included.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    pub kind: String,
    pub attributes: Attributes,
}

impl Resource {
    pub fn new(kind: impl Into<String>, attributes: Attributes) -> Self {
        Self {
            kind: kind.into(),
            attributes,
        }
    }

    /// Builds a resource from any serializable value. Fails unless the value
    /// serializes to a JSON object.
    pub fn from_serialize<T: Serialize>(
        kind: impl Into<String>,
        value: &T,
    ) -> Result<Self, serde_json::Error> {
        match serde_json::to_value(value)? {
            Value::Object(attributes) => Ok(Self::new(kind, attributes)),
            other => Err(serde::ser::Error::custom(format!(
                "expected an attribute map, got {}",
                json_kind(&other)
            ))),
        }
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.attributes.get(name)
    }

    /// Identity stored under `id_attribute`, if present and usable.
    pub fn id(&self, id_attribute: &str) -> Option<ResourceId> {
        self.attributes
            .get(id_attribute)
            .and_then(ResourceId::from_value)
    }
}

pub(crate) fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
