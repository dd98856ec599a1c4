//! Compiled Objects: the typed, executable nodes of a manifest.
//!
//! A [`CompiledManifest`] is an ordered list of [`CompiledObject`]s with
//! unique reference keys. It serializes to a JSON array of objects tagged
//! by `type`, which is what `compile --dump` prints and what
//! [`CompiledManifest::from_dump`] reads back.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use super::block::{DATA_KEY, PARAMS_KEY, RESPONSE_KEY};
use super::error::{ManifestError, DEFAULT_ENSURE_CODE, DEFAULT_ENSURE_ERROR};
use super::value::Value;

// ---------------------------------------------------------------------------
// Calls and predicates
// ---------------------------------------------------------------------------

/// A method mapping: `{"call": ..., "args": ..., "kwargs": ..., "ensure": ...}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallSpec {
    /// Capability path (`<root>.X.y`) or reference method (`#obj.method`).
    pub call: String,
    /// Positional arguments: a list, `#ref` or `*<root>.path`.
    #[serde(default = "empty_args")]
    pub args: serde_json::Value,
    /// Keyword arguments: a map, `#ref` or `**<root>.path`.
    #[serde(default = "empty_kwargs")]
    pub kwargs: serde_json::Value,
    /// Predicate applied to the call result.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ensure: Option<Ensure>,
}

fn empty_args() -> serde_json::Value {
    serde_json::Value::Array(Vec::new())
}

fn empty_kwargs() -> serde_json::Value {
    serde_json::Value::Object(serde_json::Map::new())
}

impl CallSpec {
    /// Whether a raw manifest value is a method mapping.
    pub fn is_mapping(value: &serde_json::Value) -> bool {
        value.as_object().is_some_and(|m| m.contains_key("call"))
    }

    /// Parse a method mapping from its manifest form.
    ///
    /// Only the shape is checked here; paths are validated by the compiler.
    ///
    /// # Errors
    ///
    /// Returns [`ManifestError::Compile`] for a missing or non-string
    /// `call`, or a malformed `ensure`.
    pub fn from_block(value: &serde_json::Value) -> Result<Self, ManifestError> {
        let map = value
            .as_object()
            .ok_or_else(|| ManifestError::compile("method mapping must be an object"))?;
        let call = map
            .get("call")
            .and_then(serde_json::Value::as_str)
            .ok_or_else(|| ManifestError::compile("method mapping requires a string 'call'"))?;

        if let Some(unknown) = map
            .keys()
            .find(|k| !matches!(k.as_str(), "call" | "args" | "kwargs" | "ensure"))
        {
            return Err(ManifestError::compile(format!(
                "unsupported key '{unknown}' in mapping for {call}"
            )));
        }

        let ensure = match map.get("ensure") {
            None | Some(serde_json::Value::Null) | Some(serde_json::Value::Bool(false)) => None,
            Some(raw) => Some(Ensure::from_block(raw)?),
        };

        Ok(Self {
            call: call.to_owned(),
            args: map.get("args").cloned().unwrap_or_else(empty_args),
            kwargs: map.get("kwargs").cloned().unwrap_or_else(empty_kwargs),
            ensure,
        })
    }
}

/// Equality or inequality check on a call result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Predicate {
    /// The result must equal this value.
    Value(serde_json::Value),
    /// The result must differ from this value.
    Isnot(serde_json::Value),
}

impl Predicate {
    /// Whether `result` satisfies the predicate.
    ///
    /// Results holding API objects never equal a JSON literal. Numbers
    /// compare by value, so `1` equals `1.0`.
    pub fn holds(&self, result: &Value) -> bool {
        let json = result.to_json();
        let equals = |literal: &serde_json::Value| json.as_ref().is_some_and(|j| json_eq(j, literal));
        match self {
            Self::Value(expected) => equals(expected),
            Self::Isnot(rejected) => !equals(rejected),
        }
    }
}

fn json_eq(left: &serde_json::Value, right: &serde_json::Value) -> bool {
    use serde_json::Value as Json;
    match (left, right) {
        (Json::Number(a), Json::Number(b)) => match (a.as_f64(), b.as_f64()) {
            (Some(x), Some(y)) => x == y,
            _ => a == b,
        },
        (Json::Array(a), Json::Array(b)) => {
            a.len() == b.len() && a.iter().zip(b).all(|(x, y)| json_eq(x, y))
        }
        (Json::Object(a), Json::Object(b)) => {
            a.len() == b.len()
                && a.iter().all(|(k, x)| b.get(k).is_some_and(|y| json_eq(x, y)))
        }
        _ => left == right,
    }
}

/// An `ensure` clause.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ensure {
    /// The check to apply.
    pub predicate: Predicate,
    /// Message returned when the check fails.
    pub error: String,
    /// Status code returned when the check fails.
    pub code: u16,
    /// Message logged at info level when the check passes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log: Option<String>,
    /// Message logged at debug level when the check passes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub debug: Option<String>,
}

impl Ensure {
    fn from_block(value: &serde_json::Value) -> Result<Self, ManifestError> {
        let map = value
            .as_object()
            .ok_or_else(|| ManifestError::compile("'ensure' must be an object"))?;

        if let Some(unknown) = map.keys().find(|k| {
            !matches!(
                k.as_str(),
                "value" | "isnot" | "error" | "code" | "log" | "debug"
            )
        }) {
            return Err(ManifestError::compile(format!(
                "unsupported key '{unknown}' in 'ensure'"
            )));
        }

        let predicate = match (map.get("value"), map.get("isnot")) {
            (Some(v), None) => Predicate::Value(v.clone()),
            (None, Some(v)) => Predicate::Isnot(v.clone()),
            (Some(_), Some(_)) => {
                return Err(ManifestError::compile(
                    "'ensure' cannot supply both 'value' and 'isnot'",
                ))
            }
            (None, None) => {
                return Err(ManifestError::compile(
                    "'ensure' requires one of 'value' or 'isnot'",
                ))
            }
        };

        let error = match map.get("error") {
            None => DEFAULT_ENSURE_ERROR.to_owned(),
            Some(serde_json::Value::String(s)) => s.clone(),
            Some(_) => return Err(ManifestError::compile("'ensure.error' must be a string")),
        };

        let code = match map.get("code") {
            None => DEFAULT_ENSURE_CODE,
            Some(raw) => raw
                .as_u64()
                .and_then(|n| u16::try_from(n).ok())
                .filter(|n| (100..=599).contains(n))
                .ok_or_else(|| {
                    ManifestError::compile(format!("'ensure.code' is not a status code: {raw}"))
                })?,
        };

        Ok(Self {
            predicate,
            error,
            code,
            log: message(map, "log")?,
            debug: message(map, "debug")?,
        })
    }
}

fn message(
    map: &serde_json::Map<String, serde_json::Value>,
    key: &str,
) -> Result<Option<String>, ManifestError> {
    match map.get(key) {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(serde_json::Value::String(s)) => Ok(Some(s.clone())),
        Some(_) => Err(ManifestError::compile(format!(
            "'ensure.{key}' must be a string"
        ))),
    }
}

// ---------------------------------------------------------------------------
// Compiled objects
// ---------------------------------------------------------------------------

/// How a variable obtains its value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VariableSource {
    /// A literal.
    Static(serde_json::Value),
    /// Another executed object, by reference key (dotted suffix allowed).
    Reference(String),
    /// A method call.
    Call(CallSpec),
    /// A capability path.
    Fetch(String),
}

/// Default of a declared request parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParamDefault {
    /// No default.
    None,
    /// A literal.
    Literal(serde_json::Value),
    /// A capability path, fetched when applied.
    Fetch(String),
    /// A method call, invoked when applied.
    Call(CallSpec),
}

/// One declared request parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamField {
    /// Whether the parameter must be supplied when it has no default.
    pub required: bool,
    /// Default applied when the parameter is absent.
    pub default: ParamDefault,
}

/// An executable manifest node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CompiledObject {
    /// `var#<key>` or `__DATA__`.
    Variable {
        /// Reference key.
        key: String,
        /// Value source.
        source: VariableSource,
    },
    /// `do#<key>`: a side-effecting call.
    Action {
        /// Reference key.
        key: String,
        /// The call.
        call: CallSpec,
    },
    /// `__PARAMS__`
    Parameters {
        /// Declared parameters by name.
        fields: BTreeMap<String, ParamField>,
    },
    /// `response`
    Response {
        /// Response body, resolved on execution.
        kwargs: serde_json::Value,
    },
}

impl CompiledObject {
    /// Reference key.
    pub fn key(&self) -> &str {
        match self {
            Self::Variable { key, .. } | Self::Action { key, .. } => key,
            Self::Parameters { .. } => PARAMS_KEY,
            Self::Response { .. } => RESPONSE_KEY,
        }
    }

    /// Object kind, for log lines.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Variable { .. } => "variable",
            Self::Action { .. } => "action",
            Self::Parameters { .. } => "parameters",
            Self::Response { .. } => "response",
        }
    }
}

/// Ordered, unique-keyed list of compiled objects.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CompiledManifest {
    objects: Vec<CompiledObject>,
}

impl CompiledManifest {
    /// Append an object.
    ///
    /// # Errors
    ///
    /// Returns [`ManifestError::Compile`] when the key is already taken, or
    /// when `__DATA__` would land anywhere but position 0.
    pub fn push(&mut self, object: CompiledObject) -> Result<(), ManifestError> {
        if self.contains(object.key()) {
            return Err(ManifestError::compile(format!(
                "duplicate reference key: {}",
                object.key()
            )));
        }
        if object.key() == DATA_KEY && !self.objects.is_empty() {
            return Err(ManifestError::compile(
                "__DATA__ must be the first manifest block",
            ));
        }
        self.objects.push(object);
        Ok(())
    }

    /// Whether an object with `key` exists.
    pub fn contains(&self, key: &str) -> bool {
        self.objects.iter().any(|o| o.key() == key)
    }

    /// Object by reference key.
    pub fn get(&self, key: &str) -> Option<&CompiledObject> {
        self.objects.iter().find(|o| o.key() == key)
    }

    /// Objects in execution order.
    pub fn objects(&self) -> &[CompiledObject] {
        &self.objects
    }

    /// Reference keys in execution order.
    pub fn keys(&self) -> Vec<&str> {
        self.objects.iter().map(CompiledObject::key).collect()
    }

    /// Number of objects.
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    /// Whether the manifest compiled to nothing.
    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// Render as JSON text for inspection.
    ///
    /// # Errors
    ///
    /// Returns [`ManifestError::Serialize`] if rendering fails.
    pub fn dump(&self) -> Result<String, ManifestError> {
        serde_json::to_string_pretty(&self.objects)
            .map_err(|e| ManifestError::Serialize(e.to_string()))
    }

    /// Re-read text produced by [`CompiledManifest::dump`].
    ///
    /// # Errors
    ///
    /// Returns [`ManifestError::Compile`] for unparseable text, duplicate
    /// keys or a misplaced `__DATA__`.
    pub fn from_dump(text: &str) -> Result<Self, ManifestError> {
        let objects: Vec<CompiledObject> = serde_json::from_str(text)
            .map_err(|e| ManifestError::compile(format!("invalid compiled manifest: {e}")))?;
        let mut seen = BTreeSet::new();
        for (index, object) in objects.iter().enumerate() {
            if !seen.insert(object.key()) {
                return Err(ManifestError::compile(format!(
                    "duplicate reference key: {}",
                    object.key()
                )));
            }
            if object.key() == DATA_KEY && index != 0 {
                return Err(ManifestError::compile(
                    "__DATA__ must be the first manifest block",
                ));
            }
        }
        Ok(Self { objects })
    }
}
