//! Reference Resolver.
//!
//! Turns the symbolic parts of a manifest into values: `#key` references
//! into already-executed objects, capability paths into registry entries,
//! and nested `{"call": ...}` mappings into call results. Plain strings,
//! booleans, numbers and null are literals.

use std::collections::BTreeMap;

use serde_json::Value as Json;
use tracing::{debug, info, warn};

use super::block::DATA_KEY;
use super::compiled::{CallSpec, Ensure};
use super::error::ManifestError;
use super::executor::ExecutionContext;
use super::value::Value;
use crate::capability::{CallArgs, CallScope, CapabilityRegistry};

/// Resolves references and calls against one execution context.
#[derive(Debug, Clone, Copy)]
pub struct Resolver<'a> {
    registry: &'a CapabilityRegistry,
    scope: &'a CallScope,
    context: &'a ExecutionContext<'a>,
}

impl<'a> Resolver<'a> {
    /// Create a resolver over `context`.
    pub fn new(
        registry: &'a CapabilityRegistry,
        scope: &'a CallScope,
        context: &'a ExecutionContext<'a>,
    ) -> Self {
        Self {
            registry,
            scope,
            context,
        }
    }

    /// Resolve `key[.attr...]` against executed objects.
    ///
    /// `__DATA__` always names the live request data.
    ///
    /// # Errors
    ///
    /// [`ManifestError::RequestData`] when the walk into request data
    /// fails, [`ManifestError::Reference`] when the key is unknown, not yet
    /// executed, or lacks an attribute.
    pub fn resolve_reference(&self, reference: &str) -> Result<Value, ManifestError> {
        let mut segments = reference.split('.');
        let head = segments.next().unwrap_or_default();

        if head == DATA_KEY {
            let data = self.context.data();
            return match segments.next() {
                None => Ok(Value::Map(data.clone())),
                Some(first) => data
                    .get(first)
                    .ok_or(first)
                    .and_then(|v| v.walk(segments))
                    .map_err(|seg| {
                        ManifestError::RequestData(format!(
                            "missing '{seg}' while resolving #{reference}"
                        ))
                    }),
            };
        }

        let value = self.context.executed(head).ok_or_else(|| {
            ManifestError::reference(format!(
                "#{reference}: '{head}' is not an executed manifest object"
            ))
        })?;
        value.walk(segments).map_err(|seg| {
            ManifestError::reference(format!("#{reference}: no attribute '{seg}'"))
        })
    }

    /// Resolve a capability path.
    ///
    /// # Errors
    ///
    /// [`ManifestError::Reference`] for a missing segment.
    pub fn resolve_capability(&self, path: &str) -> Result<Value, ManifestError> {
        self.registry.fetch(path, self.scope)
    }

    /// Invoke a method mapping and apply its `ensure` clause.
    ///
    /// # Errors
    ///
    /// Propagates argument mapping and call failures; returns
    /// [`ManifestError::Ensure`] when the result fails the predicate.
    pub fn call(&self, spec: &CallSpec) -> Result<Value, ManifestError> {
        let args = CallArgs::new(self.map_args(&spec.args)?, self.map_kwargs(&spec.kwargs)?);

        let result = if self.registry.is_capability_path(&spec.call) {
            self.registry.call(&spec.call, self.scope, args)?
        } else {
            self.call_reference(&spec.call, args)?
        };

        if let Some(ensure) = &spec.ensure {
            enforce(ensure, &result, &spec.call)?;
        }
        Ok(result)
    }

    /// `#obj.method`: invoke `method` on the API object held by `#obj`.
    fn call_reference(&self, call: &str, args: CallArgs) -> Result<Value, ManifestError> {
        let target = call.strip_prefix('#').unwrap_or(call);
        let (reference, method) = target.rsplit_once('.').ok_or_else(|| {
            ManifestError::reference(format!("'{call}' does not name an object method"))
        })?;

        match self.resolve_reference(reference)? {
            Value::Object(object) => {
                object
                    .invoke(method, args)
                    .map_err(|source| ManifestError::Capability {
                        path: call.to_owned(),
                        source,
                    })
            }
            other => Err(ManifestError::reference(format!(
                "cannot call '{method}' on #{reference} ({})",
                other.kind()
            ))),
        }
    }

    /// Map positional arguments: a list, `#ref` or `*<root>.path`.
    ///
    /// # Errors
    ///
    /// [`ManifestError::Reference`] when a spread does not resolve to a list.
    pub fn map_args(&self, raw: &Json) -> Result<Vec<Value>, ManifestError> {
        match raw {
            Json::Null => Ok(Vec::new()),
            Json::Array(items) => items.iter().map(|v| self.map_value(v)).collect(),
            Json::String(s) => match self.resolve_spread(s, "*")? {
                Value::Null => Ok(Vec::new()),
                Value::List(items) => Ok(items),
                other => Err(ManifestError::reference(format!(
                    "args '{s}' resolved to {}, expected a list",
                    other.kind()
                ))),
            },
            other => Err(ManifestError::reference(format!("invalid args: {other}"))),
        }
    }

    /// Map keyword arguments: a mapping, `#ref` or `**<root>.path`.
    ///
    /// # Errors
    ///
    /// [`ManifestError::Reference`] when a spread does not resolve to a map.
    pub fn map_kwargs(&self, raw: &Json) -> Result<BTreeMap<String, Value>, ManifestError> {
        match raw {
            Json::Null => Ok(BTreeMap::new()),
            Json::Object(map) => map
                .iter()
                .map(|(k, v)| Ok::<_, ManifestError>((k.clone(), self.map_value(v)?)))
                .collect(),
            Json::String(s) => match self.resolve_spread(s, "**")? {
                Value::Null => Ok(BTreeMap::new()),
                Value::Map(map) => Ok(map),
                other => Err(ManifestError::reference(format!(
                    "kwargs '{s}' resolved to {}, expected a mapping",
                    other.kind()
                ))),
            },
            other => Err(ManifestError::reference(format!("invalid kwargs: {other}"))),
        }
    }

    /// Map one value recursively.
    ///
    /// # Errors
    ///
    /// Propagates reference, capability and ensure failures.
    pub fn map_value(&self, raw: &Json) -> Result<Value, ManifestError> {
        match raw {
            Json::Null | Json::Bool(_) | Json::Number(_) => Ok(Value::from(raw.clone())),
            Json::String(s) => {
                if let Some(reference) = s.strip_prefix('#') {
                    self.resolve_reference(reference)
                } else if self.registry.is_capability_path(s) {
                    self.resolve_capability(s)
                } else {
                    Ok(Value::String(s.clone()))
                }
            }
            Json::Object(_) if CallSpec::is_mapping(raw) => self.call(&CallSpec::from_block(raw)?),
            Json::Object(map) => map
                .iter()
                .map(|(k, v)| Ok::<_, ManifestError>((k.clone(), self.map_value(v)?)))
                .collect::<Result<_, ManifestError>>()
                .map(Value::Map),
            Json::Array(items) => items
                .iter()
                .map(|v| self.map_value(v))
                .collect::<Result<_, _>>()
                .map(Value::List),
        }
    }

    fn resolve_spread(&self, s: &str, marker: &str) -> Result<Value, ManifestError> {
        if let Some(reference) = s.strip_prefix('#') {
            return self.resolve_reference(reference);
        }
        match s.strip_prefix(marker) {
            Some(path) if self.registry.is_capability_path(path) => self.resolve_capability(path),
            _ => Err(ManifestError::reference(format!(
                "'{s}' must be a #reference or {marker}{}.path",
                self.registry.root()
            ))),
        }
    }
}

fn enforce(ensure: &Ensure, result: &Value, call: &str) -> Result<(), ManifestError> {
    if ensure.predicate.holds(result) {
        if let Some(message) = &ensure.log {
            info!(call, "{message}");
        }
        if let Some(message) = &ensure.debug {
            debug!(call, "{message}");
        }
        return Ok(());
    }
    warn!(call, code = ensure.code, error = %ensure.error, "ensure predicate failed");
    Err(ManifestError::Ensure {
        message: ensure.error.clone(),
        code: ensure.code,
    })
}
