//! Manifest Executor.
//!
//! Runs compiled objects strictly in order. Every object moves from
//! `compiled` to `executed` exactly once; the first error aborts the run
//! with no partial result.
//!
//! The request data map lives in the [`ExecutionContext`]. Only the
//! `__DATA__` variable (which replaces it) and the Parameters step (which
//! injects defaults) write to it; every later step reads it through
//! `#__DATA__` references.

use std::collections::BTreeMap;

use serde_json::Value as Json;
use tracing::{debug, info};

use super::block::{DATA_KEY, RESPONSE_KEY};
use super::compiled::{
    CompiledManifest, CompiledObject, ParamDefault, ParamField, VariableSource,
};
use super::error::ManifestError;
use super::resolver::Resolver;
use super::value::Value;
use crate::capability::builtin::DUMP_PATH;
use crate::capability::{CallArgs, CallScope, CapabilityRegistry};

/// Execution state of one compiled object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectState {
    /// Not yet run.
    Compiled,
    /// Run; its value is available to references.
    Executed,
}

/// Per-request execution state. Never shared across requests.
#[derive(Debug)]
pub struct ExecutionContext<'m> {
    compiled: &'m CompiledManifest,
    data: BTreeMap<String, Value>,
    results: BTreeMap<String, Value>,
}

impl<'m> ExecutionContext<'m> {
    /// Fresh context over `compiled` with the caller's request data.
    pub fn new(compiled: &'m CompiledManifest, data: BTreeMap<String, Value>) -> Self {
        Self {
            compiled,
            data,
            results: BTreeMap::new(),
        }
    }

    /// Live request data.
    pub fn data(&self) -> &BTreeMap<String, Value> {
        &self.data
    }

    /// Consume the context, keeping the request data.
    pub fn into_data(self) -> BTreeMap<String, Value> {
        self.data
    }

    /// Value of an executed object.
    pub fn executed(&self, key: &str) -> Option<&Value> {
        self.results.get(key)
    }

    /// State of the object with `key`, if the manifest has one.
    pub fn state(&self, key: &str) -> Option<ObjectState> {
        if self.results.contains_key(key) {
            Some(ObjectState::Executed)
        } else if self.compiled.contains(key) {
            Some(ObjectState::Compiled)
        } else {
            None
        }
    }
}

/// Result of a complete run.
#[derive(Debug, Clone, PartialEq)]
pub struct Execution {
    /// Rendered response, when the manifest has a `response` block.
    pub response: Option<Json>,
    /// Request data after parameter defaults were applied.
    pub data: BTreeMap<String, Value>,
}

/// Runs compiled manifests against a capability registry.
#[derive(Debug, Clone, Copy)]
pub struct Executor<'r> {
    registry: &'r CapabilityRegistry,
}

impl<'r> Executor<'r> {
    /// Create an executor calling into `registry`.
    pub fn new(registry: &'r CapabilityRegistry) -> Self {
        Self { registry }
    }

    /// Run `compiled` in a fresh context.
    ///
    /// # Errors
    ///
    /// Returns the first [`ManifestError`] raised by any object.
    pub fn run(
        &self,
        compiled: &CompiledManifest,
        scope: &CallScope,
        data: BTreeMap<String, Value>,
    ) -> Result<Execution, ManifestError> {
        let mut context = ExecutionContext::new(compiled, data);
        let response = self.execute(&mut context, scope)?;
        Ok(Execution {
            response,
            data: context.into_data(),
        })
    }

    /// Run every object of `context` in order and render the response.
    ///
    /// # Errors
    ///
    /// Returns the first [`ManifestError`] raised by any object.
    pub fn execute(
        &self,
        context: &mut ExecutionContext<'_>,
        scope: &CallScope,
    ) -> Result<Option<Json>, ManifestError> {
        let compiled = context.compiled;

        for object in compiled.objects() {
            if context.results.contains_key(object.key()) {
                continue;
            }
            let value = self.step(object, context, scope)?;
            debug!(
                request = %scope.request_id,
                key = object.key(),
                kind = object.kind(),
                "executed manifest object"
            );
            context.results.insert(object.key().to_owned(), value);
        }

        let response = match context.results.get(RESPONSE_KEY) {
            Some(value) => Some(self.render(value, scope)?),
            None => None,
        };
        info!(
            request = %scope.request_id,
            objects = compiled.len(),
            response = response.is_some(),
            "manifest executed"
        );
        Ok(response)
    }

    fn step(
        &self,
        object: &CompiledObject,
        context: &mut ExecutionContext<'_>,
        scope: &CallScope,
    ) -> Result<Value, ManifestError> {
        match object {
            CompiledObject::Variable { key, source } if key == DATA_KEY => {
                let VariableSource::Static(Json::Object(raw)) = source else {
                    return Err(ManifestError::compile("__DATA__ must be a static object"));
                };
                context.data = raw
                    .iter()
                    .map(|(k, v)| (k.clone(), Value::from(v.clone())))
                    .collect();
                Ok(Value::Map(context.data.clone()))
            }
            CompiledObject::Variable { source, .. } => {
                let resolver = Resolver::new(self.registry, scope, context);
                match source {
                    VariableSource::Static(raw) => Ok(Value::from(raw.clone())),
                    VariableSource::Reference(reference) => resolver.resolve_reference(reference),
                    VariableSource::Call(spec) => resolver.call(spec),
                    VariableSource::Fetch(path) => resolver.resolve_capability(path),
                }
            }
            CompiledObject::Action { call, .. } => {
                Resolver::new(self.registry, scope, context).call(call)
            }
            CompiledObject::Parameters { fields } => self.apply_parameters(fields, context, scope),
            CompiledObject::Response { kwargs } => {
                Resolver::new(self.registry, scope, context).map_value(kwargs)
            }
        }
    }

    /// Validate request data against the declared parameters and inject defaults.
    fn apply_parameters(
        &self,
        fields: &BTreeMap<String, ParamField>,
        context: &mut ExecutionContext<'_>,
        scope: &CallScope,
    ) -> Result<Value, ManifestError> {
        if let Some(unsupported) = context.data.keys().find(|k| !fields.contains_key(*k)) {
            return Err(ManifestError::Request(format!(
                "Supplied unsupported attribute: {unsupported}"
            )));
        }

        let mut defaults = Vec::new();
        {
            let resolver = Resolver::new(self.registry, scope, context);
            for (name, field) in fields {
                if context.data.contains_key(name) {
                    continue;
                }
                let value = match &field.default {
                    ParamDefault::None if field.required => {
                        return Err(ManifestError::Request(format!(
                            "Missing required parameter: {name}"
                        )))
                    }
                    ParamDefault::None => continue,
                    ParamDefault::Literal(raw) => Value::from(raw.clone()),
                    ParamDefault::Fetch(path) => resolver.resolve_capability(path)?,
                    ParamDefault::Call(spec) => resolver.call(spec)?,
                };
                defaults.push((name.clone(), value));
            }
        }

        for (name, value) in defaults {
            debug!(request = %scope.request_id, parameter = %name, "applied parameter default");
            context.data.insert(name, value);
        }
        Ok(Value::Map(context.data.clone()))
    }

    /// Convert a response value to JSON, dumping API objects through the registry.
    fn render(&self, value: &Value, scope: &CallScope) -> Result<Json, ManifestError> {
        Ok(match value {
            Value::Null => Json::Null,
            Value::Bool(b) => Json::Bool(*b),
            Value::Number(n) => Json::Number(n.clone()),
            Value::String(s) => Json::String(s.clone()),
            Value::List(items) => Json::Array(
                items
                    .iter()
                    .map(|v| self.render(v, scope))
                    .collect::<Result<_, _>>()?,
            ),
            Value::Map(map) => Json::Object(
                map.iter()
                    .map(|(k, v)| Ok::<_, ManifestError>((k.clone(), self.render(v, scope)?)))
                    .collect::<Result<_, ManifestError>>()?,
            ),
            Value::Object(object) => {
                let path = self.registry.absolute(DUMP_PATH);
                let args = CallArgs::new(vec![value.clone()], BTreeMap::new());
                let dumped = self.registry.call(&path, scope, args).map_err(|e| {
                    ManifestError::Serialize(format!("cannot dump {}: {e}", object.type_name()))
                })?;
                dumped.to_json().ok_or_else(|| {
                    ManifestError::Serialize(format!(
                        "dump of {} is not JSON",
                        object.type_name()
                    ))
                })?
            }
        })
    }
}
