//! Authorization data model: handlers, ACL keys, groups, grants and
//! instance-level permission records.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Request methods and handlers
// ---------------------------------------------------------------------------

/// HTTP method a handler is bound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
    /// GET
    Get,
    /// PUT
    Put,
    /// POST
    Post,
    /// DELETE
    Delete,
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Get => "GET",
            Self::Put => "PUT",
            Self::Post => "POST",
            Self::Delete => "DELETE",
        })
    }
}

impl FromStr for Method {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "GET" => Ok(Self::Get),
            "PUT" => Ok(Self::Put),
            "POST" => Ok(Self::Post),
            "DELETE" => Ok(Self::Delete),
            other => Err(format!("unsupported request method: {other}")),
        }
    }
}

/// A request handler: the manifest it runs and the ACL keys that open it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Handler {
    /// Handler identifier.
    pub id: String,
    /// Human-readable name.
    #[serde(default)]
    pub name: String,
    /// Request path, without leading or trailing slash.
    pub path: String,
    /// Request method.
    pub method: Method,
    /// Manifest executed for this handler (JSON array of blocks).
    #[serde(default = "empty_manifest")]
    pub manifest: serde_json::Value,
    /// Object type the handler operates on, for object-level access.
    #[serde(default)]
    pub object_type: Option<String>,
    /// Attribute holding an object's identifier.
    #[serde(default)]
    pub object_key: Option<String>,
    /// ACL keys granting global access to this handler.
    #[serde(default)]
    pub global_acls: BTreeSet<String>,
    /// ACL keys granting object-level access to this handler.
    #[serde(default)]
    pub object_acls: BTreeSet<String>,
    /// Whether unauthenticated requests may reach the handler.
    #[serde(default)]
    pub allow_anon: bool,
    /// Whether the handler is enabled.
    #[serde(default = "enabled_by_default")]
    pub enabled: bool,
}

fn empty_manifest() -> serde_json::Value {
    serde_json::Value::Array(Vec::new())
}

fn enabled_by_default() -> bool {
    true
}

// ---------------------------------------------------------------------------
// ACL keys and groups
// ---------------------------------------------------------------------------

/// A named authorization capability grantable to groups.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AclKey {
    /// Key identifier.
    pub id: String,
    /// Unique name.
    pub name: String,
    /// Description.
    #[serde(default)]
    pub desc: String,
    /// Usable in the global pool.
    #[serde(default)]
    pub type_global: bool,
    /// Usable in the object pool.
    #[serde(default)]
    pub type_object: bool,
}

/// A group's grant of one ACL key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AclGrant {
    /// ACL key identifier.
    pub acl: String,
    /// Whether the grant is enabled.
    #[serde(default = "enabled_by_default")]
    pub allowed: bool,
}

impl AclGrant {
    /// An enabled grant.
    pub fn allow(acl: impl Into<String>) -> Self {
        Self {
            acl: acl.into(),
            allowed: true,
        }
    }

    /// A disabled grant.
    pub fn deny(acl: impl Into<String>) -> Self {
        Self {
            acl: acl.into(),
            allowed: false,
        }
    }
}

/// A requesting group with its global and object ACL grants.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Group {
    /// Group identifier.
    pub id: String,
    /// Group name.
    #[serde(default)]
    pub name: String,
    /// Grants in the global pool.
    #[serde(default)]
    pub global: Vec<AclGrant>,
    /// Grants in the object pool.
    #[serde(default)]
    pub object: Vec<AclGrant>,
}

impl Group {
    /// Create a group with no grants.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: String::new(),
            global: Vec::new(),
            object: Vec::new(),
        }
    }

    /// ACL key ids present in the global pool, regardless of `allowed`.
    pub fn global_keys(&self) -> BTreeSet<&str> {
        self.global.iter().map(|g| g.acl.as_str()).collect()
    }

    /// ACL key ids present in the object pool, regardless of `allowed`.
    pub fn object_keys(&self) -> BTreeSet<&str> {
        self.object.iter().map(|g| g.acl.as_str()).collect()
    }
}

/// Per-instance authorization of one group on one object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectAclGrant {
    /// Object type, matching [`Handler::object_type`].
    pub object_type: String,
    /// Object identifier.
    pub object_id: String,
    /// Group the grant applies to.
    pub group: String,
    /// Whether access is allowed.
    #[serde(default = "enabled_by_default")]
    pub allowed: bool,
}

// ---------------------------------------------------------------------------
// Permission records
// ---------------------------------------------------------------------------

/// Instance-level operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    /// Read the object.
    Read,
    /// Modify the object.
    Write,
    /// Delete the object.
    Delete,
    /// Execute the object.
    Exec,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Read => "read",
            Self::Write => "write",
            Self::Delete => "delete",
            Self::Exec => "exec",
        })
    }
}

impl FromStr for Operation {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "read" => Ok(Self::Read),
            "write" => Ok(Self::Write),
            "delete" => Ok(Self::Delete),
            "exec" => Ok(Self::Exec),
            other => Err(format!("invalid access type: {other}")),
        }
    }
}

/// Read/write/delete/exec bits for one scope.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PermissionBits {
    /// Read bit.
    pub read: bool,
    /// Write bit.
    pub write: bool,
    /// Delete bit.
    pub delete: bool,
    /// Exec bit.
    pub exec: bool,
}

impl PermissionBits {
    /// Whether the bit for `op` is set.
    pub fn allows(&self, op: Operation) -> bool {
        match op {
            Operation::Read => self.read,
            Operation::Write => self.write,
            Operation::Delete => self.delete,
            Operation::Exec => self.exec,
        }
    }
}

/// Ownership bits attached to one object, independent of ACL keys.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionRecord {
    /// Object the record applies to.
    pub object_uuid: String,
    /// Owning user.
    pub owner: String,
    /// Owning group.
    pub group: String,
    /// Bits granted to the owning user.
    #[serde(default)]
    pub user_bits: PermissionBits,
    /// Bits granted to the owning group.
    #[serde(default)]
    pub group_bits: PermissionBits,
    /// Bits granted to everyone.
    #[serde(default)]
    pub all_bits: PermissionBits,
}

// ---------------------------------------------------------------------------
// Requesters and access contexts
// ---------------------------------------------------------------------------

/// The caller of a request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Requester {
    /// User id; `None` for anonymous requests.
    pub user: Option<String>,
    /// User name, for logging.
    #[serde(default)]
    pub name: String,
    /// Group the request is made as.
    pub group: Option<String>,
    /// All groups the user belongs to.
    #[serde(default)]
    pub groups: Vec<String>,
}

impl Requester {
    /// An unauthenticated caller.
    pub fn anonymous() -> Self {
        Self::default()
    }

    /// An authenticated user acting as `group`.
    pub fn user(id: impl Into<String>, name: impl Into<String>, group: impl Into<String>) -> Self {
        let group = group.into();
        Self {
            user: Some(id.into()),
            name: name.into(),
            groups: vec![group.clone()],
            group: Some(group),
        }
    }

    /// Add memberships beyond the acting group.
    pub fn with_groups<I, S>(mut self, groups: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for g in groups {
            let g = g.into();
            if !self.groups.contains(&g) {
                self.groups.push(g);
            }
        }
        self
    }

    /// Whether the request is unauthenticated.
    pub fn is_anonymous(&self) -> bool {
        self.user.is_none()
    }

    /// Whether the user belongs to `group`.
    pub fn belongs_to(&self, group: &str) -> bool {
        self.group.as_deref() == Some(group) || self.groups.iter().any(|g| g == group)
    }
}

/// How a request was granted access to its handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccessType {
    /// Unrestricted access to every object.
    Global,
    /// Access limited to objects with an explicit grant.
    Object,
    /// No access.
    None,
}

/// Outcome of an authorization decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessContext {
    /// Whether access was granted.
    pub granted: bool,
    /// Tier at which access was granted.
    pub access_type: AccessType,
    /// ACL key that granted access, if any.
    pub acl: Option<String>,
    /// Requesting group.
    pub group: Option<String>,
    /// Handler object type.
    pub object_type: Option<String>,
    /// Handler object key attribute.
    pub object_key: Option<String>,
}

impl AccessContext {
    /// Unconditional global access (ACL disabled, anonymous, internal calls).
    pub fn bypass() -> Self {
        Self {
            granted: true,
            access_type: AccessType::Global,
            acl: None,
            group: None,
            object_type: None,
            object_key: None,
        }
    }

    /// Whether objects must be filtered through instance grants.
    pub fn is_object_level(&self) -> bool {
        self.access_type == AccessType::Object
    }
}
