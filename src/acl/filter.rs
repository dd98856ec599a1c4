//! Object Access Filter.
//!
//! Applies an [`AccessContext`] to objects a handler returns. GLOBAL access
//! passes everything; OBJECT access keeps only instances the requesting
//! group holds an allowed [`ObjectAclGrant`](super::model::ObjectAclGrant)
//! for. Lists drop excluded instances silently; a single object that is
//! excluded is an error.

use tracing::{debug, warn};

use super::decision::AuthError;
use super::model::AccessContext;
use super::store::PermissionStore;
use crate::manifest::Value;

/// Attribute holding an object's id when the handler does not name one.
pub const DEFAULT_OBJECT_KEY: &str = "uuid";

/// Why one instance was excluded.
enum Exclusion {
    NoKey(String),
    NoGrant(String),
    Disallowed(String),
}

impl From<Exclusion> for AuthError {
    fn from(exclusion: Exclusion) -> Self {
        match exclusion {
            Exclusion::NoKey(msg) => Self::NotFound(msg),
            Exclusion::NoGrant(msg) | Exclusion::Disallowed(msg) => Self::Denied(msg),
        }
    }
}

/// Filters objects through instance grants.
#[derive(Clone, Copy)]
pub struct ObjectFilter<'s> {
    store: &'s dyn PermissionStore,
}

impl<'s> ObjectFilter<'s> {
    /// Create a filter reading grants from `store`.
    pub fn new(store: &'s dyn PermissionStore) -> Self {
        Self { store }
    }

    /// Filter a list or a single object, dispatching on shape.
    ///
    /// # Errors
    ///
    /// See [`ObjectFilter::object`] and [`ObjectFilter::objects`].
    pub fn filter(&self, access: &AccessContext, input: Value) -> Result<Value, AuthError> {
        match input {
            Value::List(items) => Ok(Value::List(self.objects(access, items))),
            single => self.object(access, single),
        }
    }

    /// Keep the objects the caller may see, preserving order.
    ///
    /// Never fails: a misconfigured access context admits nothing.
    pub fn objects(&self, access: &AccessContext, objects: Vec<Value>) -> Vec<Value> {
        let check = match self.check(access) {
            Ok(Some(check)) => check,
            Ok(None) => return objects,
            Err(err) => {
                warn!(error = %err, total = objects.len(), "object list dropped");
                return Vec::new();
            }
        };
        let total = objects.len();
        let kept: Vec<Value> = objects
            .into_iter()
            .filter(|object| check.admit(object).is_ok())
            .collect();
        debug!(
            object_type = check.object_type,
            total,
            kept = kept.len(),
            "filtered object list"
        );
        kept
    }

    /// Pass a single object through, or fail if the caller may not see it.
    ///
    /// # Errors
    ///
    /// [`AuthError::NotFound`] when the object has no id,
    /// [`AuthError::Denied`] when the grant is absent or disallowed,
    /// [`AuthError::Misconfigured`] when the handler has no object type.
    pub fn object(&self, access: &AccessContext, object: Value) -> Result<Value, AuthError> {
        let Some(check) = self.check(access)? else {
            return Ok(object);
        };
        match check.admit(&object) {
            Ok(()) => Ok(object),
            Err(exclusion) => {
                let err = AuthError::from(exclusion);
                warn!(object_type = check.object_type, error = %err, "object access denied");
                Err(err)
            }
        }
    }

    /// `None` for unrestricted access.
    fn check<'a>(&self, access: &'a AccessContext) -> Result<Option<Check<'a, 's>>, AuthError> {
        if !access.is_object_level() {
            return Ok(None);
        }
        let object_type = access.object_type.as_deref().ok_or_else(|| {
            AuthError::Misconfigured("object-level access requires a handler object type".to_owned())
        })?;
        let group = access.group.as_deref().ok_or_else(|| {
            AuthError::Misconfigured("object-level access requires a requesting group".to_owned())
        })?;
        Ok(Some(Check {
            store: self.store,
            object_type,
            object_key: access.object_key.as_deref().unwrap_or(DEFAULT_OBJECT_KEY),
            group,
        }))
    }
}

struct Check<'a, 's> {
    store: &'s dyn PermissionStore,
    object_type: &'a str,
    object_key: &'a str,
    group: &'a str,
}

impl Check<'_, '_> {
    fn admit(&self, object: &Value) -> Result<(), Exclusion> {
        let id = object_id(object, self.object_key).ok_or_else(|| {
            Exclusion::NoKey(format!(
                "{} has no '{}' attribute",
                self.object_type, self.object_key
            ))
        })?;
        match self.store.object_grant(self.object_type, &id, self.group) {
            None => Err(Exclusion::NoGrant(format!(
                "group '{}' has no grant on {} '{id}'",
                self.group, self.object_type
            ))),
            Some(grant) if !grant.allowed => Err(Exclusion::Disallowed(format!(
                "group '{}' is not allowed on {} '{id}'",
                self.group, self.object_type
            ))),
            Some(_) => Ok(()),
        }
    }
}

/// Identifier of `object` under `key`; strings and numbers qualify.
pub fn object_id(object: &Value, key: &str) -> Option<String> {
    match object.child(key)? {
        Value::String(s) => Some(s),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
