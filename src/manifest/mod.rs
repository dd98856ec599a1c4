//! Manifest interpreter.
//!
//! A manifest is a JSON array of single-key blocks describing what a
//! request handler does:
//!
//! ```json
//! [
//!   {"__PARAMS__": {"name": [true, null]}},
//!   {"do#user": {"call": "LENSE.OBJECTS.USER.create", "kwargs": "#__DATA__"}},
//!   {"response": {"uuid": "#user.uuid"}}
//! ]
//! ```
//!
//! [`compiler`] turns it into typed [`CompiledObject`]s, [`executor`] runs
//! them in order, resolving references through [`resolver`] and calling
//! out to the capability registry.

pub mod block;
pub mod compiled;
pub mod compiler;
pub mod error;
pub mod executor;
pub mod resolver;
pub mod value;

use std::collections::BTreeMap;

pub use compiled::{CompiledManifest, CompiledObject};
pub use compiler::Compiler;
pub use error::ManifestError;
pub use executor::{Execution, ExecutionContext, Executor};
pub use value::{ApiObject, Value};

use crate::capability::{CallScope, CapabilityRegistry};

/// Output of [`ManifestEngine::compile`].
#[derive(Debug, Clone, PartialEq)]
pub enum Compiled {
    /// Compiled objects, ready to run.
    Objects(CompiledManifest),
    /// Rendered JSON text (`dump = true`).
    Dump(String),
}

/// Compiles and executes manifests against one capability registry.
#[derive(Debug, Clone)]
pub struct ManifestEngine {
    registry: CapabilityRegistry,
}

impl ManifestEngine {
    /// Create an engine over `registry`.
    pub fn new(registry: CapabilityRegistry) -> Self {
        Self { registry }
    }

    /// The capability registry.
    pub fn registry(&self) -> &CapabilityRegistry {
        &self.registry
    }

    /// Parse manifest text.
    ///
    /// # Errors
    ///
    /// Returns [`ManifestError::Compile`] for invalid JSON.
    pub fn parse(text: &str) -> Result<serde_json::Value, ManifestError> {
        serde_json::from_str(text)
            .map_err(|e| ManifestError::compile(format!("manifest is not valid JSON: {e}")))
    }

    /// Compile a manifest, optionally rendering it to text.
    ///
    /// # Errors
    ///
    /// See [`Compiler::compile`].
    pub fn compile(&self, manifest: &serde_json::Value, dump: bool) -> Result<Compiled, ManifestError> {
        let compiled = Compiler::new(&self.registry).compile(manifest)?;
        if dump {
            compiled.dump().map(Compiled::Dump)
        } else {
            Ok(Compiled::Objects(compiled))
        }
    }

    /// Compile and run a manifest, returning its rendered response.
    ///
    /// # Errors
    ///
    /// Any compile or execution [`ManifestError`].
    pub fn execute(
        &self,
        manifest: &serde_json::Value,
        scope: &CallScope,
        data: BTreeMap<String, Value>,
    ) -> Result<Option<serde_json::Value>, ManifestError> {
        let compiled = Compiler::new(&self.registry).compile(manifest)?;
        self.run(&compiled, scope, data).map(|execution| execution.response)
    }

    /// Run an already compiled manifest.
    ///
    /// # Errors
    ///
    /// Any execution [`ManifestError`].
    pub fn run(
        &self,
        compiled: &CompiledManifest,
        scope: &CallScope,
        data: BTreeMap<String, Value>,
    ) -> Result<Execution, ManifestError> {
        Executor::new(&self.registry).run(compiled, scope, data)
    }
}

/// Convert a JSON object (or null) into request data.
///
/// # Errors
///
/// Returns [`ManifestError::RequestData`] for any other JSON shape.
pub fn request_data(json: serde_json::Value) -> Result<BTreeMap<String, Value>, ManifestError> {
    match Value::from(json) {
        Value::Map(map) => Ok(map),
        Value::Null => Ok(BTreeMap::new()),
        other => Err(ManifestError::RequestData(format!(
            "request data must be an object, got {}",
            other.kind()
        ))),
    }
}
