//! ACL Decision Engine: may this group invoke this handler, and how?
//!
//! Access is tiered. A key shared between the handler's global pool and
//! the group's global pool grants GLOBAL access (every object visible).
//! Failing that, a shared object-pool key grants OBJECT access (objects
//! must then pass the [`filter`](super::filter)). Otherwise the request
//! is denied.

use std::collections::BTreeSet;
use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, info, warn};

use super::model::{AccessContext, AccessType, Group, Handler, Requester};
use super::store::PermissionStore;

/// Authorization failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    /// The ACL decision or object filter denied access.
    #[error("access denied: {0}")]
    Denied(String),
    /// The target does not exist.
    #[error("not found: {0}")]
    NotFound(String),
    /// Handler or store configuration prevents a decision.
    #[error("authorization misconfigured: {0}")]
    Misconfigured(String),
    /// An anonymous request hit a handler that requires a user.
    #[error("anonymous access not allowed: {0}")]
    AnonymousNotAllowed(String),
    /// The handler exists but is disabled.
    #[error("handler disabled: {0}")]
    HandlerDisabled(String),
}

impl AuthError {
    /// Numeric status code surfaced to the caller.
    pub fn status(&self) -> u16 {
        match self {
            Self::Denied(_) | Self::AnonymousNotAllowed(_) => 401,
            Self::NotFound(_) | Self::HandlerDisabled(_) => 404,
            Self::Misconfigured(_) => 500,
        }
    }
}

/// Decide access for a (handler, group) pair.
///
/// Intersections use raw grant membership: a grant whose `allowed` flag is
/// false still counts. The granting key is the lexicographically smallest
/// match so audit lines are stable.
pub fn decide(handler: &Handler, group: &Group) -> AccessContext {
    let base = AccessContext {
        granted: false,
        access_type: AccessType::None,
        acl: None,
        group: Some(group.id.clone()),
        object_type: handler.object_type.clone(),
        object_key: handler.object_key.clone(),
    };

    if let Some(acl) = first_match(&handler.global_acls, &group.global_keys()) {
        return AccessContext {
            granted: true,
            access_type: AccessType::Global,
            acl: Some(acl),
            ..base
        };
    }
    if let Some(acl) = first_match(&handler.object_acls, &group.object_keys()) {
        return AccessContext {
            granted: true,
            access_type: AccessType::Object,
            acl: Some(acl),
            ..base
        };
    }
    base
}

fn first_match(handler_keys: &BTreeSet<String>, group_keys: &BTreeSet<&str>) -> Option<String> {
    handler_keys
        .iter()
        .find(|k| group_keys.contains(k.as_str()))
        .cloned()
}

/// Gates requests against the permission store.
#[derive(Clone)]
pub struct DecisionEngine {
    store: Arc<dyn PermissionStore>,
    enabled: bool,
}

impl std::fmt::Debug for DecisionEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DecisionEngine")
            .field("enabled", &self.enabled)
            .finish_non_exhaustive()
    }
}

impl DecisionEngine {
    /// Create an engine; `enabled = false` grants everything GLOBAL.
    pub fn new(store: Arc<dyn PermissionStore>, enabled: bool) -> Self {
        Self { store, enabled }
    }

    /// The backing store.
    pub fn store(&self) -> &Arc<dyn PermissionStore> {
        &self.store
    }

    /// Decide for a group id, looking the group up in the store.
    ///
    /// # Errors
    ///
    /// [`AuthError::Denied`] when the group is unknown.
    pub fn decide_for(&self, handler: &Handler, group_id: &str) -> Result<AccessContext, AuthError> {
        let group = self.store.group(group_id).ok_or_else(|| {
            warn!(group = group_id, handler = %handler.id, "unknown group");
            AuthError::Denied(format!("unknown group '{group_id}'"))
        })?;
        Ok(decide(handler, &group))
    }

    /// Authorize `requester` for `handler`.
    ///
    /// Bypasses with GLOBAL access when enforcement is disabled or the
    /// request is anonymous.
    ///
    /// # Errors
    ///
    /// [`AuthError::Denied`] when no grant matches or the requester has no
    /// known group.
    pub fn authorize(&self, handler: &Handler, requester: &Requester) -> Result<AccessContext, AuthError> {
        if !self.enabled || requester.is_anonymous() {
            debug!(
                handler = %handler.id,
                enabled = self.enabled,
                anonymous = requester.is_anonymous(),
                "ACL bypass"
            );
            return Ok(AccessContext {
                group: requester.group.clone(),
                object_type: handler.object_type.clone(),
                object_key: handler.object_key.clone(),
                ..AccessContext::bypass()
            });
        }

        let group_id = requester
            .group
            .as_deref()
            .ok_or_else(|| AuthError::Denied("requester has no group".to_owned()))?;
        let access = self.decide_for(handler, group_id)?;

        if !access.granted {
            warn!(
                handler = %handler.id,
                path = %handler.path,
                method = %handler.method,
                group = group_id,
                user = %requester.name,
                "ACL denied"
            );
            return Err(AuthError::Denied(format!(
                "group '{group_id}' has no ACL key for {} {}",
                handler.method, handler.path
            )));
        }

        info!(
            handler = %handler.id,
            group = group_id,
            access = ?access.access_type,
            acl = access.acl.as_deref().unwrap_or_default(),
            "ACL granted"
        );
        Ok(access)
    }
}
