//! Manifest Compiler: manifest blocks in, unique-keyed Compiled Objects out.
//!
//! Compilation never computes values. Capability paths are checked against
//! the registry and `#key` references against the blocks compiled so far,
//! so a manifest that compiles can only fail at run time on data.

use serde_json::Value as Json;
use tracing::{debug, info};

use super::block::{parse_blocks, BlockKey, DATA_KEY};
use super::compiled::{
    CallSpec, CompiledManifest, CompiledObject, ParamDefault, ParamField, VariableSource,
};
use super::error::ManifestError;
use crate::capability::CapabilityRegistry;

/// Compiles manifests against a capability registry.
#[derive(Debug, Clone, Copy)]
pub struct Compiler<'r> {
    registry: &'r CapabilityRegistry,
}

impl<'r> Compiler<'r> {
    /// Create a compiler validating paths against `registry`.
    pub fn new(registry: &'r CapabilityRegistry) -> Self {
        Self { registry }
    }

    /// Compile a manifest document.
    ///
    /// # Errors
    ///
    /// Returns [`ManifestError::Compile`] for structural problems (unknown
    /// or duplicate keys, misplaced `__DATA__`, malformed parameters or
    /// method mappings) and [`ManifestError::Reference`] for unknown
    /// capability paths or references to blocks not compiled before.
    pub fn compile(&self, manifest: &Json) -> Result<CompiledManifest, ManifestError> {
        let blocks = parse_blocks(manifest)?;
        let mut compiled = CompiledManifest::default();

        for (index, block) in blocks.into_iter().enumerate() {
            let key = block.key.reference().to_owned();
            if compiled.contains(&key) {
                return Err(ManifestError::compile(format!(
                    "duplicate reference key: {key}"
                )));
            }

            let object = match block.key {
                BlockKey::Data => compile_data(index, block.value)?,
                BlockKey::Var(_) => self.compile_var(key, block.value, &compiled)?,
                BlockKey::Do(_) => self.compile_action(key, &block.value, &compiled)?,
                BlockKey::Params => self.compile_params(&block.value, &compiled)?,
                BlockKey::Response => self.compile_response(block.value, &compiled)?,
            };
            debug!(key = object.key(), kind = object.kind(), "compiled manifest block");
            compiled.push(object)?;
        }

        info!(objects = compiled.len(), "manifest compiled");
        Ok(compiled)
    }

    fn compile_var(
        &self,
        key: String,
        value: Json,
        known: &CompiledManifest,
    ) -> Result<CompiledObject, ManifestError> {
        let source = if CallSpec::is_mapping(&value) {
            let spec = CallSpec::from_block(&value)?;
            self.check_call(&spec, known)?;
            VariableSource::Call(spec)
        } else {
            match value {
                Json::String(s) => {
                    if let Some(reference) = s.strip_prefix('#') {
                        check_reference(reference, known)?;
                        VariableSource::Reference(reference.to_owned())
                    } else if self.registry.is_capability_path(&s) {
                        self.registry.check(&s)?;
                        VariableSource::Fetch(s)
                    } else {
                        VariableSource::Static(Json::String(s))
                    }
                }
                other => VariableSource::Static(other),
            }
        };
        Ok(CompiledObject::Variable { key, source })
    }

    fn compile_action(
        &self,
        key: String,
        value: &Json,
        known: &CompiledManifest,
    ) -> Result<CompiledObject, ManifestError> {
        if !CallSpec::is_mapping(value) {
            return Err(ManifestError::compile(format!(
                "action '{key}' must be a mapping with a 'call' key"
            )));
        }
        let call = CallSpec::from_block(value)?;
        self.check_call(&call, known)?;
        Ok(CompiledObject::Action { key, call })
    }

    fn compile_params(
        &self,
        value: &Json,
        known: &CompiledManifest,
    ) -> Result<CompiledObject, ManifestError> {
        let params = value
            .as_object()
            .ok_or_else(|| ManifestError::compile("__PARAMS__ must be an object"))?;

        let mut fields = std::collections::BTreeMap::new();
        for (name, definition) in params {
            let (required, default) = match definition.as_array().map(Vec::as_slice) {
                Some([Json::Bool(required), default]) => (*required, default),
                Some([_, _]) => {
                    return Err(ManifestError::compile(format!(
                        "parameter '{name}': required flag must be a boolean"
                    )))
                }
                _ => {
                    return Err(ManifestError::compile(format!(
                        "parameter '{name}' must be a [required, default] pair"
                    )))
                }
            };

            let default = match default {
                Json::Null => ParamDefault::None,
                Json::String(s) if self.registry.is_capability_path(s) => {
                    self.registry.check(s)?;
                    ParamDefault::Fetch(s.clone())
                }
                Json::String(_) | Json::Number(_) | Json::Bool(_) => {
                    ParamDefault::Literal(default.clone())
                }
                Json::Object(_) if CallSpec::is_mapping(default) => {
                    let spec = CallSpec::from_block(default)?;
                    self.check_call(&spec, known)?;
                    ParamDefault::Call(spec)
                }
                _ => {
                    return Err(ManifestError::compile(format!(
                        "parameter '{name}': default must be null, a literal or a method mapping"
                    )))
                }
            };
            fields.insert(name.clone(), ParamField { required, default });
        }
        Ok(CompiledObject::Parameters { fields })
    }

    fn compile_response(
        &self,
        value: Json,
        known: &CompiledManifest,
    ) -> Result<CompiledObject, ManifestError> {
        if !matches!(value, Json::Object(_) | Json::String(_)) {
            return Err(ManifestError::compile(
                "response must be a mapping or a reference",
            ));
        }
        self.check_value(&value, known)?;
        Ok(CompiledObject::Response { kwargs: value })
    }

    // -----------------------------------------------------------------------
    // Validation
    // -----------------------------------------------------------------------

    fn check_call(&self, spec: &CallSpec, known: &CompiledManifest) -> Result<(), ManifestError> {
        if self.registry.is_capability_path(&spec.call) {
            self.registry.check(&spec.call)?;
        } else {
            let target = spec.call.strip_prefix('#').unwrap_or(&spec.call);
            let (object, _method) = target.rsplit_once('.').ok_or_else(|| {
                ManifestError::reference(format!(
                    "call '{}' is neither a capability path nor an object method",
                    spec.call
                ))
            })?;
            check_reference(object, known)?;
        }

        match &spec.args {
            Json::Null => {}
            Json::Array(items) => {
                for item in items {
                    self.check_value(item, known)?;
                }
            }
            Json::String(s) => self.check_spread(s, "*", known)?,
            other => {
                return Err(ManifestError::compile(format!(
                    "args for {} must be a list or reference, got {other}",
                    spec.call
                )))
            }
        }

        match &spec.kwargs {
            Json::Null => Ok(()),
            Json::Object(map) => map.values().try_for_each(|v| self.check_value(v, known)),
            Json::String(s) => self.check_spread(s, "**", known),
            other => Err(ManifestError::compile(format!(
                "kwargs for {} must be a mapping or reference, got {other}",
                spec.call
            ))),
        }
    }

    /// Top-level args/kwargs given as `#ref` or `<marker><root>.path`.
    fn check_spread(
        &self,
        s: &str,
        marker: &str,
        known: &CompiledManifest,
    ) -> Result<(), ManifestError> {
        if let Some(reference) = s.strip_prefix('#') {
            return check_reference(reference, known);
        }
        match s.strip_prefix(marker) {
            Some(path) if self.registry.is_capability_path(path) => self.registry.check(path),
            _ => Err(ManifestError::compile(format!(
                "'{s}' must be a #reference or {marker}{}.path",
                self.registry.root()
            ))),
        }
    }

    fn check_value(&self, value: &Json, known: &CompiledManifest) -> Result<(), ManifestError> {
        match value {
            Json::String(s) => {
                if let Some(reference) = s.strip_prefix('#') {
                    check_reference(reference, known)
                } else if self.registry.is_capability_path(s) {
                    self.registry.check(s)
                } else {
                    Ok(())
                }
            }
            Json::Object(_) if CallSpec::is_mapping(value) => {
                self.check_call(&CallSpec::from_block(value)?, known)
            }
            Json::Object(map) => map.values().try_for_each(|v| self.check_value(v, known)),
            Json::Array(items) => items.iter().try_for_each(|v| self.check_value(v, known)),
            Json::Null | Json::Bool(_) | Json::Number(_) => Ok(()),
        }
    }
}

fn compile_data(index: usize, value: Json) -> Result<CompiledObject, ManifestError> {
    if index != 0 {
        return Err(ManifestError::compile(
            "__DATA__ must be the first manifest block",
        ));
    }
    if !value.is_object() {
        return Err(ManifestError::compile("__DATA__ must be an object"));
    }
    Ok(CompiledObject::Variable {
        key: DATA_KEY.to_owned(),
        source: VariableSource::Static(value),
    })
}

/// The head of a `#key.attr` reference must name an earlier block.
fn check_reference(reference: &str, known: &CompiledManifest) -> Result<(), ManifestError> {
    let head = reference.split('.').next().unwrap_or_default();
    if head.is_empty() {
        return Err(ManifestError::compile(format!(
            "empty reference: #{reference}"
        )));
    }
    if head == DATA_KEY || known.contains(head) {
        Ok(())
    } else {
        Err(ManifestError::reference(format!(
            "#{reference} does not name an earlier manifest block"
        )))
    }
}
