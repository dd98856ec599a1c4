//! Runtime values flowing through manifest execution.
//!
//! Manifest literals arrive as JSON, but capabilities may hand back API
//! objects (user records, groups, ...) that are not plain JSON. [`Value`]
//! carries both so references can walk into object attributes and the
//! executor can defer serialization to the `OBJECTS.dump` capability.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde_json::Number;

use crate::capability::CallArgs;

/// An object produced by a capability that is not plain JSON.
pub trait ApiObject: fmt::Debug + Send + Sync {
    /// Object type name, used in log lines and error messages.
    fn type_name(&self) -> &str;

    /// Read a named attribute.
    fn attr(&self, name: &str) -> Option<Value>;

    /// Invoke a named method on the object.
    ///
    /// # Errors
    ///
    /// Returns an error when the method does not exist or fails.
    fn invoke(&self, method: &str, args: CallArgs) -> anyhow::Result<Value> {
        let _ = args;
        anyhow::bail!("{} has no method '{method}'", self.type_name())
    }

    /// JSON representation used by `OBJECTS.dump`, if the object has one.
    fn to_json(&self) -> Option<serde_json::Value> {
        None
    }
}

/// A runtime value: JSON-shaped data plus opaque API objects.
#[derive(Debug, Clone, Default)]
pub enum Value {
    /// JSON null.
    #[default]
    Null,
    /// Boolean.
    Bool(bool),
    /// Number, kept in serde_json's representation.
    Number(Number),
    /// String.
    String(String),
    /// Ordered list.
    List(Vec<Value>),
    /// Map with deterministic key order.
    Map(BTreeMap<String, Value>),
    /// Opaque API object.
    Object(Arc<dyn ApiObject>),
}

impl Value {
    /// Build a string value.
    pub fn string(s: impl Into<String>) -> Self {
        Self::String(s.into())
    }

    /// Wrap an API object.
    pub fn object(obj: impl ApiObject + 'static) -> Self {
        Self::Object(Arc::new(obj))
    }

    /// Borrow as a string slice.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// Borrow as a map.
    pub fn as_map(&self) -> Option<&BTreeMap<String, Value>> {
        match self {
            Self::Map(m) => Some(m),
            _ => None,
        }
    }

    /// Short type description for error messages.
    pub fn kind(&self) -> &str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Number(_) => "number",
            Self::String(_) => "string",
            Self::List(_) => "list",
            Self::Map(_) => "map",
            Self::Object(obj) => obj.type_name(),
        }
    }

    /// Step one segment into this value.
    ///
    /// Maps are indexed by key, lists by a decimal index, objects by
    /// attribute name. Scalars have no children.
    pub fn child(&self, segment: &str) -> Option<Value> {
        match self {
            Self::Map(m) => m.get(segment).cloned(),
            Self::List(items) => segment
                .parse::<usize>()
                .ok()
                .and_then(|i| items.get(i).cloned()),
            Self::Object(obj) => obj.attr(segment),
            _ => None,
        }
    }

    /// Walk a sequence of segments, returning the first missing segment on failure.
    pub fn walk<'s, I>(&self, segments: I) -> Result<Value, &'s str>
    where
        I: IntoIterator<Item = &'s str>,
    {
        let mut current = self.clone();
        for segment in segments {
            current = current.child(segment).ok_or(segment)?;
        }
        Ok(current)
    }

    /// Convert to JSON if the value contains no opaque objects.
    pub fn to_json(&self) -> Option<serde_json::Value> {
        Some(match self {
            Self::Null => serde_json::Value::Null,
            Self::Bool(b) => serde_json::Value::Bool(*b),
            Self::Number(n) => serde_json::Value::Number(n.clone()),
            Self::String(s) => serde_json::Value::String(s.clone()),
            Self::List(items) => serde_json::Value::Array(
                items.iter().map(Value::to_json).collect::<Option<Vec<_>>>()?,
            ),
            Self::Map(m) => serde_json::Value::Object(
                m.iter()
                    .map(|(k, v)| v.to_json().map(|j| (k.clone(), j)))
                    .collect::<Option<serde_json::Map<_, _>>>()?,
            ),
            Self::Object(_) => return None,
        })
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Null, Self::Null) => true,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Number(a), Self::Number(b)) => a == b,
            (Self::String(a), Self::String(b)) => a == b,
            (Self::List(a), Self::List(b)) => a == b,
            (Self::Map(a), Self::Map(b)) => a == b,
            (Self::Object(a), Self::Object(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl From<serde_json::Value> for Value {
    fn from(json: serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => Self::Null,
            serde_json::Value::Bool(b) => Self::Bool(b),
            serde_json::Value::Number(n) => Self::Number(n),
            serde_json::Value::String(s) => Self::String(s),
            serde_json::Value::Array(items) => {
                Self::List(items.into_iter().map(Value::from).collect())
            }
            serde_json::Value::Object(m) => {
                Self::Map(m.into_iter().map(|(k, v)| (k, Value::from(v))).collect())
            }
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::String(s.to_owned())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}
