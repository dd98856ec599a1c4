//! Instance-level permission bits.
//!
//! Independent of ACL keys: every object may carry owner/group/all ×
//! read/write/delete/exec records. Checks run in a fixed order and the
//! first satisfied rule grants.

use tracing::debug;

use super::model::{Operation, PermissionRecord, Requester};
use super::store::PermissionStore;
use crate::manifest::Value;

/// Evaluates `can(op, object)` for a requester.
#[derive(Clone, Copy)]
pub struct PermissionChecker<'s> {
    store: &'s dyn PermissionStore,
    admin_group: &'s str,
}

impl<'s> PermissionChecker<'s> {
    /// Create a checker; members of `admin_group` may do anything.
    pub fn new(store: &'s dyn PermissionStore, admin_group: &'s str) -> Self {
        Self { store, admin_group }
    }

    /// Whether `requester` may perform `op` on `object`.
    ///
    /// The object's identity is its `uuid` attribute.
    pub fn can(&self, requester: &Requester, op: Operation, object: &Value) -> bool {
        let uuid = object.child("uuid").and_then(|v| v.as_str().map(str::to_owned));
        self.can_uuid(requester, op, uuid.as_deref())
    }

    /// Like [`PermissionChecker::can`], for a bare object id.
    pub fn can_uuid(&self, requester: &Requester, op: Operation, uuid: Option<&str>) -> bool {
        let (granted, rule) = self.evaluate(requester, op, uuid);
        debug!(
            user = requester.user.as_deref().unwrap_or_default(),
            group = requester.group.as_deref().unwrap_or_default(),
            object = uuid.unwrap_or_default(),
            op = %op,
            granted,
            rule,
            "permission check"
        );
        granted
    }

    fn evaluate(&self, requester: &Requester, op: Operation, uuid: Option<&str>) -> (bool, &'static str) {
        if requester.belongs_to(self.admin_group) {
            return (true, "admin");
        }
        let Some(uuid) = uuid else {
            return (true, "no identity");
        };
        if requester.user.as_deref() == Some(uuid) && matches!(op, Operation::Read | Operation::Write) {
            return (true, "self");
        }
        if requester.belongs_to(uuid) && op == Operation::Read {
            return (true, "own group");
        }
        for record in self.store.permission_records(uuid) {
            if let Some(rule) = record_grants(&record, requester, op) {
                return (true, rule);
            }
        }
        (false, "denied")
    }
}

fn record_grants(record: &PermissionRecord, requester: &Requester, op: Operation) -> Option<&'static str> {
    if requester.user.as_deref() == Some(record.owner.as_str()) && record.user_bits.allows(op) {
        return Some("owner");
    }
    if requester.group.as_deref() == Some(record.group.as_str()) && record.group_bits.allows(op) {
        return Some("group");
    }
    if record.all_bits.allows(op) {
        return Some("all");
    }
    None
}
