//! Capability registry — the dotted-path namespace manifests call into.
//!
//! Manifests address services (logging, object CRUD, serialization, ACL
//! filters) through paths rooted at a configurable marker, e.g.
//! `LENSE.OBJECTS.dump`. The registry is an explicit map built once and
//! validated at build time; it is injected into the compiler, resolver and
//! executor rather than reached through global state.
//!
//! Entries are either values, which references may walk into, or
//! functions receiving the per-request [`CallScope`] and mapped arguments.

pub mod builtin;

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

use crate::acl::model::{AccessContext, Requester};
use crate::manifest::{ManifestError, Value};

/// Signature of a callable capability.
pub type CapabilityFn = dyn Fn(&CallScope, CallArgs) -> anyhow::Result<Value> + Send + Sync;

/// A registered capability.
#[derive(Clone)]
pub enum Capability {
    /// A value; remaining path segments walk into it.
    Value(Value),
    /// A callable.
    Function(Arc<CapabilityFn>),
}

impl fmt::Debug for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Value(v) => f.debug_tuple("Value").field(v).finish(),
            Self::Function(_) => f.write_str("Function(..)"),
        }
    }
}

/// Positional and keyword arguments handed to a capability.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CallArgs {
    /// Positional arguments.
    pub args: Vec<Value>,
    /// Keyword arguments.
    pub kwargs: BTreeMap<String, Value>,
}

impl CallArgs {
    /// Build from already-mapped arguments.
    pub fn new(args: Vec<Value>, kwargs: BTreeMap<String, Value>) -> Self {
        Self { args, kwargs }
    }

    /// Look up an argument by keyword, falling back to its position.
    pub fn get(&self, index: usize, name: &str) -> Option<&Value> {
        self.kwargs.get(name).or_else(|| self.args.get(index))
    }

    /// Like [`CallArgs::get`], failing when the argument is absent.
    ///
    /// # Errors
    ///
    /// Returns an error naming the missing argument.
    pub fn require(&self, index: usize, name: &str) -> anyhow::Result<&Value> {
        self.get(index, name)
            .ok_or_else(|| anyhow::anyhow!("missing argument '{name}'"))
    }

    /// Like [`CallArgs::require`], additionally requiring a string.
    ///
    /// # Errors
    ///
    /// Returns an error when the argument is absent or not a string.
    pub fn require_str(&self, index: usize, name: &str) -> anyhow::Result<&str> {
        let value = self.require(index, name)?;
        value
            .as_str()
            .ok_or_else(|| anyhow::anyhow!("argument '{name}' must be a string, got {}", value.kind()))
    }
}

/// Per-request context visible to capabilities.
#[derive(Debug, Clone)]
pub struct CallScope {
    /// Request identifier, for log correlation.
    pub request_id: Uuid,
    /// The caller.
    pub requester: Requester,
    /// Outcome of the handler authorization.
    pub access: AccessContext,
}

impl CallScope {
    /// Scope for an authorized request.
    pub fn new(requester: Requester, access: AccessContext) -> Self {
        Self {
            request_id: Uuid::new_v4(),
            requester,
            access,
        }
    }

    /// Scope for calls made outside a request (CLI, tests): anonymous, global access.
    pub fn internal() -> Self {
        Self::new(Requester::anonymous(), AccessContext::bypass())
    }
}

/// Registry construction errors.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// The root marker is not an identifier.
    #[error("invalid capability root '{0}'")]
    InvalidRoot(String),
    /// A path segment is not an identifier.
    #[error("invalid capability path '{0}'")]
    InvalidPath(String),
    /// The same path was registered twice.
    #[error("capability path '{0}' is already registered")]
    Duplicate(String),
    /// A path was registered beneath another entry.
    #[error("capability path '{path}' is nested beneath registered entry '{parent}'")]
    Nested {
        /// The offending path.
        path: String,
        /// The entry it is nested under.
        parent: String,
    },
}

/// Accumulates capabilities and validates them on [`RegistryBuilder::build`].
#[derive(Debug)]
pub struct RegistryBuilder {
    root: String,
    entries: Vec<(String, Capability)>,
}

impl RegistryBuilder {
    /// Start an empty registry rooted at `root`.
    pub fn new(root: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            entries: Vec::new(),
        }
    }

    /// Register a value at `path` (relative to the root).
    pub fn value(mut self, path: impl Into<String>, value: impl Into<Value>) -> Self {
        self.entries
            .push((path.into(), Capability::Value(value.into())));
        self
    }

    /// Register a function at `path` (relative to the root).
    pub fn function<F>(mut self, path: impl Into<String>, f: F) -> Self
    where
        F: Fn(&CallScope, CallArgs) -> anyhow::Result<Value> + Send + Sync + 'static,
    {
        self.entries
            .push((path.into(), Capability::Function(Arc::new(f))));
        self
    }

    /// Validate and freeze the registry.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError`] for a malformed root or path, a duplicate
    /// path, or a path nested beneath another entry.
    pub fn build(self) -> Result<CapabilityRegistry, RegistryError> {
        if !is_identifier(&self.root) {
            return Err(RegistryError::InvalidRoot(self.root));
        }

        let mut entries = BTreeMap::new();
        for (path, capability) in self.entries {
            if !path.split('.').all(is_identifier) {
                return Err(RegistryError::InvalidPath(path));
            }
            if entries.contains_key(&path) {
                return Err(RegistryError::Duplicate(path));
            }
            entries.insert(path, capability);
        }

        for path in entries.keys() {
            let mut prefix = String::new();
            for segment in path.split('.') {
                if !prefix.is_empty() {
                    if entries.contains_key(&prefix) {
                        return Err(RegistryError::Nested {
                            path: path.clone(),
                            parent: prefix,
                        });
                    }
                    prefix.push('.');
                }
                prefix.push_str(segment);
            }
        }

        debug!(root = %self.root, count = entries.len(), "capability registry built");

        Ok(CapabilityRegistry {
            root: self.root,
            entries: Arc::new(entries),
        })
    }
}

/// Immutable, cheaply cloneable capability registry.
#[derive(Debug, Clone)]
pub struct CapabilityRegistry {
    root: String,
    entries: Arc<BTreeMap<String, Capability>>,
}

impl CapabilityRegistry {
    /// Start building a registry rooted at `root`.
    pub fn builder(root: impl Into<String>) -> RegistryBuilder {
        RegistryBuilder::new(root)
    }

    /// Start a builder seeded with this registry's entries.
    pub fn extend(&self) -> RegistryBuilder {
        RegistryBuilder {
            root: self.root.clone(),
            entries: self
                .entries
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        }
    }

    /// The root marker.
    pub fn root(&self) -> &str {
        &self.root
    }

    /// Registered paths, relative to the root.
    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    /// Whether `s` addresses the capability namespace.
    ///
    /// The first dot-segment must equal the root marker exactly.
    pub fn is_capability_path(&self, s: &str) -> bool {
        s.split('.').next() == Some(self.root.as_str())
    }

    /// Absolute path for a root-relative one.
    pub fn absolute(&self, relative: &str) -> String {
        format!("{}.{relative}", self.root)
    }

    /// Find the longest registered prefix of `path` and the segments left over.
    fn locate<'p>(&self, path: &'p str) -> Result<(&Capability, Vec<&'p str>), ManifestError> {
        let mut segments = path.split('.');
        if segments.next() != Some(self.root.as_str()) {
            return Err(ManifestError::reference(format!(
                "'{path}' is not a capability path"
            )));
        }
        let rest: Vec<&str> = segments.collect();
        if rest.is_empty() {
            return Err(ManifestError::reference(format!(
                "capability path '{path}' names only the root"
            )));
        }

        for n in (1..=rest.len()).rev() {
            let key = rest[..n].join(".");
            if let Some(capability) = self.entries.get(&key) {
                return Ok((capability, rest[n..].to_vec()));
            }
        }
        Err(ManifestError::reference(format!(
            "invalid capability path: {path}"
        )))
    }

    /// Check that `path` resolves, without evaluating it.
    ///
    /// # Errors
    ///
    /// Returns [`ManifestError::Reference`] when a segment is missing.
    pub fn check(&self, path: &str) -> Result<(), ManifestError> {
        match self.locate(path)? {
            (Capability::Function(_), rest) if rest.is_empty() => Ok(()),
            (Capability::Function(_), _) => Err(ManifestError::reference(format!(
                "cannot walk into callable capability: {path}"
            ))),
            (Capability::Value(value), rest) => value.walk(rest).map(|_| ()).map_err(|seg| {
                ManifestError::reference(format!("invalid capability path: {path} (no '{seg}')"))
            }),
        }
    }

    /// Fetch the value at `path`; functions are evaluated with no arguments.
    ///
    /// # Errors
    ///
    /// Returns [`ManifestError::Reference`] for unknown paths and
    /// [`ManifestError::Capability`] when an evaluated function fails.
    pub fn fetch(&self, path: &str, scope: &CallScope) -> Result<Value, ManifestError> {
        match self.locate(path)? {
            (Capability::Function(f), rest) if rest.is_empty() => {
                invoke(f, path, scope, CallArgs::default())
            }
            (Capability::Function(_), _) => Err(ManifestError::reference(format!(
                "cannot walk into callable capability: {path}"
            ))),
            (Capability::Value(value), rest) => value.walk(rest).map_err(|seg| {
                ManifestError::reference(format!("invalid capability path: {path} (no '{seg}')"))
            }),
        }
    }

    /// Call the function at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`ManifestError::Reference`] when the path is unknown or not
    /// callable, and [`ManifestError::Capability`] when the call fails.
    pub fn call(&self, path: &str, scope: &CallScope, args: CallArgs) -> Result<Value, ManifestError> {
        match self.locate(path)? {
            (Capability::Function(f), rest) if rest.is_empty() => invoke(f, path, scope, args),
            _ => Err(ManifestError::reference(format!(
                "capability is not callable: {path}"
            ))),
        }
    }
}

fn invoke(
    f: &Arc<CapabilityFn>,
    path: &str,
    scope: &CallScope,
    args: CallArgs,
) -> Result<Value, ManifestError> {
    debug!(request = %scope.request_id, capability = path, "invoking capability");
    (**f)(scope, args).map_err(|source| ManifestError::Capability {
        path: path.to_owned(),
        source,
    })
}

/// `[A-Za-z_][A-Za-z0-9_]*`
pub(crate) fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}
