//! Permission store: the read side consumed by the decision engine and
//! object filter, plus an in-memory implementation loadable from TOML.
//!
//! Storage itself is out of scope for this crate. [`PermissionStore`] is
//! the seam a real backend implements; [`InMemoryStore`] backs the CLI and
//! the tests.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::RwLock;

use serde::Deserialize;
use thiserror::Error;
use tracing::{info, warn};

use super::model::{AclKey, Group, Handler, Method, ObjectAclGrant, PermissionRecord};

/// Read-only queries against long-lived authorization data.
///
/// Implementations must give read-after-write consistency; callers never
/// write through this trait and may query it from many threads at once.
pub trait PermissionStore: Send + Sync {
    /// Handler bound to `path` and `method`.
    fn handler(&self, path: &str, method: Method) -> Option<Handler>;

    /// ACL key by id.
    fn acl_key(&self, id: &str) -> Option<AclKey>;

    /// Group by id.
    fn group(&self, id: &str) -> Option<Group>;

    /// Instance grant of `group` on one object.
    fn object_grant(&self, object_type: &str, object_id: &str, group: &str)
        -> Option<ObjectAclGrant>;

    /// Permission records attached to an object.
    fn permission_records(&self, object_uuid: &str) -> Vec<PermissionRecord>;
}

/// Store loading and mutation errors.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The store file could not be read.
    #[error("failed to read store file: {0}")]
    Io(#[from] std::io::Error),

    /// The store file is not valid TOML for [`StoreFile`].
    #[error("failed to parse store file: {0}")]
    Parse(#[from] toml::de::Error),

    /// A grant names an ACL key that does not exist.
    #[error("{owner} references unknown ACL key '{acl}'")]
    UnknownAclKey {
        /// Handler or group holding the grant.
        owner: String,
        /// Missing key id.
        acl: String,
    },

    /// An ACL key is used in a pool its type flags do not allow.
    #[error("{owner} uses ACL key '{acl}' in the {pool} pool, but the key is not of that type")]
    PoolMismatch {
        /// Handler or group holding the grant.
        owner: String,
        /// Key id.
        acl: String,
        /// `global` or `object`.
        pool: &'static str,
    },

    /// A handler manifest given as text is not valid JSON.
    #[error("handler '{handler}' has an invalid manifest: {message}")]
    InvalidManifest {
        /// Handler id.
        handler: String,
        /// Parse error.
        message: String,
    },

    /// A lock was poisoned by a panicking writer.
    #[error("permission store lock poisoned: {0}")]
    Poisoned(&'static str),
}

// ---------------------------------------------------------------------------
// Store file
// ---------------------------------------------------------------------------

/// On-disk layout of an [`InMemoryStore`].
///
/// ```toml
/// [[acl_keys]]
/// id = "k1"
/// name = "user.admin"
/// type_global = true
///
/// [[groups]]
/// id = "g1"
/// global = [{ acl = "k1" }]
///
/// [[handlers]]
/// id = "h1"
/// path = "user"
/// method = "GET"
/// global_acls = ["k1"]
/// manifest = '''[{"response": {"ok": true}}]'''
/// ```
#[derive(Debug, Clone, Default, Deserialize)]
pub struct StoreFile {
    /// ACL keys.
    #[serde(default)]
    pub acl_keys: Vec<AclKey>,
    /// Groups and their grants.
    #[serde(default)]
    pub groups: Vec<Group>,
    /// Handlers. `manifest` may be a TOML array or a JSON string.
    #[serde(default)]
    pub handlers: Vec<Handler>,
    /// Instance grants.
    #[serde(default)]
    pub object_grants: Vec<ObjectAclGrant>,
    /// Permission records.
    #[serde(default)]
    pub permissions: Vec<PermissionRecord>,
}

// ---------------------------------------------------------------------------
// InMemoryStore
// ---------------------------------------------------------------------------

type GrantKey = (String, String, String);

/// Lock-guarded in-memory [`PermissionStore`].
#[derive(Debug, Default)]
pub struct InMemoryStore {
    handlers: RwLock<BTreeMap<(String, Method), Handler>>,
    acl_keys: RwLock<BTreeMap<String, AclKey>>,
    groups: RwLock<BTreeMap<String, Group>>,
    object_grants: RwLock<BTreeMap<GrantKey, ObjectAclGrant>>,
    permissions: RwLock<BTreeMap<String, Vec<PermissionRecord>>>,
}

impl InMemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Load and validate a store file.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the file cannot be read, parsed or validated.
    pub fn load(path: &Path) -> Result<Self, StoreError> {
        let text = std::fs::read_to_string(path)?;
        let store = Self::from_toml(&text)?;
        info!(path = %path.display(), "permission store loaded");
        Ok(store)
    }

    /// Parse and validate store TOML.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] for invalid TOML, manifests given as invalid
    /// JSON text, or grants that do not match their ACL key's type.
    pub fn from_toml(text: &str) -> Result<Self, StoreError> {
        let file: StoreFile = toml::from_str(text)?;
        Self::from_file(file)
    }

    /// Build from a parsed [`StoreFile`], validating grants.
    ///
    /// # Errors
    ///
    /// See [`InMemoryStore::from_toml`].
    pub fn from_file(file: StoreFile) -> Result<Self, StoreError> {
        let store = Self::new();
        for key in file.acl_keys {
            store.insert_acl_key(key)?;
        }
        for group in file.groups {
            store.insert_group(group)?;
        }
        for handler in file.handlers {
            store.insert_handler(handler)?;
        }
        for grant in file.object_grants {
            store.grant_object(grant)?;
        }
        for record in file.permissions {
            store.set_permission(record)?;
        }
        Ok(store)
    }

    /// Add or replace an ACL key.
    ///
    /// # Errors
    ///
    /// [`StoreError::Poisoned`] if the lock is poisoned.
    pub fn insert_acl_key(&self, key: AclKey) -> Result<(), StoreError> {
        let mut keys = self
            .acl_keys
            .write()
            .map_err(|_| StoreError::Poisoned("acl_keys"))?;
        keys.insert(key.id.clone(), key);
        Ok(())
    }

    /// Add or replace a group after checking its grants.
    ///
    /// # Errors
    ///
    /// [`StoreError::UnknownAclKey`] / [`StoreError::PoolMismatch`] for bad grants.
    pub fn insert_group(&self, group: Group) -> Result<(), StoreError> {
        let owner = format!("group '{}'", group.id);
        self.check_pool(&owner, group.global.iter().map(|g| g.acl.as_str()), Pool::Global)?;
        self.check_pool(&owner, group.object.iter().map(|g| g.acl.as_str()), Pool::Object)?;

        let mut groups = self
            .groups
            .write()
            .map_err(|_| StoreError::Poisoned("groups"))?;
        groups.insert(group.id.clone(), group);
        Ok(())
    }

    /// Add or replace a handler after checking its ACL keys.
    ///
    /// A manifest given as a JSON string is parsed here.
    ///
    /// # Errors
    ///
    /// [`StoreError::InvalidManifest`] for unparseable manifest text, and
    /// the pool errors of [`InMemoryStore::insert_group`].
    pub fn insert_handler(&self, mut handler: Handler) -> Result<(), StoreError> {
        if let serde_json::Value::String(text) = &handler.manifest {
            handler.manifest =
                serde_json::from_str(text).map_err(|e| StoreError::InvalidManifest {
                    handler: handler.id.clone(),
                    message: e.to_string(),
                })?;
        }
        handler.path = normalize_path(&handler.path).to_owned();

        let owner = format!("handler '{}'", handler.id);
        self.check_pool(&owner, handler.global_acls.iter().map(String::as_str), Pool::Global)?;
        self.check_pool(&owner, handler.object_acls.iter().map(String::as_str), Pool::Object)?;

        let mut handlers = self
            .handlers
            .write()
            .map_err(|_| StoreError::Poisoned("handlers"))?;
        handlers.insert((handler.path.clone(), handler.method), handler);
        Ok(())
    }

    /// Add or replace an instance grant.
    ///
    /// # Errors
    ///
    /// [`StoreError::Poisoned`] if the lock is poisoned.
    pub fn grant_object(&self, grant: ObjectAclGrant) -> Result<(), StoreError> {
        let mut grants = self
            .object_grants
            .write()
            .map_err(|_| StoreError::Poisoned("object_grants"))?;
        let key = (
            grant.object_type.clone(),
            grant.object_id.clone(),
            grant.group.clone(),
        );
        grants.insert(key, grant);
        Ok(())
    }

    /// Add a permission record, replacing one with the same owner and group.
    ///
    /// # Errors
    ///
    /// [`StoreError::Poisoned`] if the lock is poisoned.
    pub fn set_permission(&self, record: PermissionRecord) -> Result<(), StoreError> {
        let mut permissions = self
            .permissions
            .write()
            .map_err(|_| StoreError::Poisoned("permissions"))?;
        let records = permissions.entry(record.object_uuid.clone()).or_default();
        records.retain(|r| !(r.owner == record.owner && r.group == record.group));
        records.push(record);
        Ok(())
    }

    fn check_pool<'a>(
        &self,
        owner: &str,
        acls: impl IntoIterator<Item = &'a str>,
        pool: Pool,
    ) -> Result<(), StoreError> {
        let keys = self
            .acl_keys
            .read()
            .map_err(|_| StoreError::Poisoned("acl_keys"))?;
        for acl in acls {
            let key = keys.get(acl).ok_or_else(|| StoreError::UnknownAclKey {
                owner: owner.to_owned(),
                acl: acl.to_owned(),
            })?;
            let matches = match pool {
                Pool::Global => key.type_global,
                Pool::Object => key.type_object,
            };
            if !matches {
                return Err(StoreError::PoolMismatch {
                    owner: owner.to_owned(),
                    acl: acl.to_owned(),
                    pool: pool.name(),
                });
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
enum Pool {
    Global,
    Object,
}

impl Pool {
    fn name(self) -> &'static str {
        match self {
            Self::Global => "global",
            Self::Object => "object",
        }
    }
}

impl PermissionStore for InMemoryStore {
    fn handler(&self, path: &str, method: Method) -> Option<Handler> {
        match self.handlers.read() {
            Ok(map) => map.get(&(normalize_path(path).to_owned(), method)).cloned(),
            Err(e) => {
                warn!(error = %e, "permission store lock poisoned in handler");
                None
            }
        }
    }

    fn acl_key(&self, id: &str) -> Option<AclKey> {
        match self.acl_keys.read() {
            Ok(map) => map.get(id).cloned(),
            Err(e) => {
                warn!(error = %e, "permission store lock poisoned in acl_key");
                None
            }
        }
    }

    fn group(&self, id: &str) -> Option<Group> {
        match self.groups.read() {
            Ok(map) => map.get(id).cloned(),
            Err(e) => {
                warn!(error = %e, "permission store lock poisoned in group");
                None
            }
        }
    }

    fn object_grant(
        &self,
        object_type: &str,
        object_id: &str,
        group: &str,
    ) -> Option<ObjectAclGrant> {
        match self.object_grants.read() {
            Ok(map) => map
                .get(&(object_type.to_owned(), object_id.to_owned(), group.to_owned()))
                .cloned(),
            Err(e) => {
                warn!(error = %e, "permission store lock poisoned in object_grant");
                None
            }
        }
    }

    fn permission_records(&self, object_uuid: &str) -> Vec<PermissionRecord> {
        match self.permissions.read() {
            Ok(map) => map.get(object_uuid).cloned().unwrap_or_default(),
            Err(e) => {
                warn!(error = %e, "permission store lock poisoned in permission_records");
                Vec::new()
            }
        }
    }
}

/// Handler paths are stored without surrounding slashes.
pub fn normalize_path(path: &str) -> &str {
    path.trim_matches('/')
}
