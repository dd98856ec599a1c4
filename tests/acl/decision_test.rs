//! Tests for the ACL decision engine.

use std::collections::BTreeSet;
use std::sync::Arc;

use lense::acl::model::{AccessType, AclGrant, Group, Handler, Method, Requester};
use lense::acl::{decide, AuthError, DecisionEngine, InMemoryStore, PermissionStore};

const STORE: &str = r#"
[[acl_keys]]
id = "k-admin"
name = "admin"
type_global = true

[[acl_keys]]
id = "k-editor"
name = "editor"
type_global = true
type_object = true

[[acl_keys]]
id = "k-viewer"
name = "viewer"
type_object = true

[[groups]]
id = "admins"
global = [{ acl = "k-admin" }]

[[groups]]
id = "editors"
object = [{ acl = "k-editor" }]

[[groups]]
id = "nobody"

[[handlers]]
id = "h-user-get"
path = "/user"
method = "GET"
object_type = "user"
global_acls = ["k-admin"]
object_acls = ["k-editor", "k-viewer"]
"#;

fn store() -> Arc<dyn PermissionStore> {
    Arc::new(InMemoryStore::from_toml(STORE).expect("store should load"))
}

fn handler(global: &[&str], object: &[&str]) -> Handler {
    Handler {
        id: "h1".to_owned(),
        name: String::new(),
        path: "user".to_owned(),
        method: Method::Get,
        manifest: serde_json::json!([]),
        object_type: Some("user".to_owned()),
        object_key: None,
        global_acls: global.iter().map(|s| (*s).to_owned()).collect(),
        object_acls: object.iter().map(|s| (*s).to_owned()).collect(),
        allow_anon: false,
        enabled: true,
    }
}

// ---------- pure decision ----------

#[test]
fn shared_global_key_grants_global() {
    let mut group = Group::new("g1");
    group.global = vec![AclGrant::allow("k1")];

    let access = decide(&handler(&["k1"], &[]), &group);
    assert!(access.granted);
    assert_eq!(access.access_type, AccessType::Global);
    assert_eq!(access.acl.as_deref(), Some("k1"));
    assert_eq!(access.group.as_deref(), Some("g1"));
}

#[test]
fn global_wins_regardless_of_object_pools() {
    let mut group = Group::new("g1");
    group.global = vec![AclGrant::allow("k1")];
    group.object = vec![AclGrant::allow("k2")];

    let access = decide(&handler(&["k1"], &["k2"]), &group);
    assert_eq!(access.access_type, AccessType::Global);
}

#[test]
fn shared_object_key_grants_object() {
    let mut group = Group::new("g1");
    group.object = vec![AclGrant::allow("k2")];

    let access = decide(&handler(&["k1"], &["k2"]), &group);
    assert!(access.granted);
    assert_eq!(access.access_type, AccessType::Object);
    assert_eq!(access.object_type.as_deref(), Some("user"));
    assert!(access.is_object_level());
}

#[test]
fn pools_do_not_cross() {
    let mut group = Group::new("g1");
    group.object = vec![AclGrant::allow("k1")];

    let access = decide(&handler(&["k1"], &[]), &group);
    assert!(!access.granted);
    assert_eq!(access.access_type, AccessType::None);
    assert_eq!(access.acl, None);
}

#[test]
fn disallowed_grant_still_matches() {
    let mut group = Group::new("g1");
    group.global = vec![AclGrant::deny("k1")];

    let access = decide(&handler(&["k1"], &[]), &group);
    assert!(access.granted);
    assert_eq!(access.access_type, AccessType::Global);
}

#[test]
fn smallest_matching_key_is_reported() {
    let mut group = Group::new("g1");
    group.global = vec![AclGrant::allow("k-b"), AclGrant::allow("k-a")];

    let access = decide(&handler(&["k-b", "k-a"], &[]), &group);
    assert_eq!(access.acl.as_deref(), Some("k-a"));
}

#[test]
fn decision_is_deterministic() {
    let mut group = Group::new("g1");
    group.object = vec![AclGrant::allow("k2"), AclGrant::allow("k3")];
    let handler = handler(&[], &["k3", "k2"]);

    let first = decide(&handler, &group);
    for _ in 0..10 {
        assert_eq!(decide(&handler, &group), first);
    }
}

// ---------- engine ----------

#[test]
fn engine_grants_per_group() {
    let store = store();
    let handler = store.handler("user", Method::Get).expect("handler should exist");
    let engine = DecisionEngine::new(Arc::clone(&store), true);

    let admin = engine
        .authorize(&handler, &Requester::user("u1", "alice", "admins"))
        .expect("admins should pass");
    assert_eq!(admin.access_type, AccessType::Global);
    assert_eq!(admin.acl.as_deref(), Some("k-admin"));

    let editor = engine
        .authorize(&handler, &Requester::user("u2", "bob", "editors"))
        .expect("editors should pass");
    assert_eq!(editor.access_type, AccessType::Object);
    assert_eq!(editor.acl.as_deref(), Some("k-editor"));
}

#[test]
fn engine_denies_without_shared_key() {
    let store = store();
    let handler = store.handler("/user/", Method::Get).expect("handler should exist");
    let engine = DecisionEngine::new(store, true);

    let err = engine
        .authorize(&handler, &Requester::user("u3", "carol", "nobody"))
        .expect_err("group without keys should be denied");
    assert!(matches!(err, AuthError::Denied(_)));
    assert_eq!(err.status(), 401);
}

#[test]
fn engine_denies_unknown_group() {
    let store = store();
    let handler = store.handler("user", Method::Get).expect("handler should exist");
    let engine = DecisionEngine::new(store, true);

    let err = engine
        .authorize(&handler, &Requester::user("u4", "dave", "ghosts"))
        .expect_err("unknown group should be denied");
    assert!(matches!(err, AuthError::Denied(_)));

    let mut groupless = Requester::user("u5", "erin", "admins");
    groupless.group = None;
    let err = engine
        .authorize(&handler, &groupless)
        .expect_err("requester without group should be denied");
    assert!(matches!(err, AuthError::Denied(_)));
}

#[test]
fn disabled_acl_bypasses_to_global() {
    let store = store();
    let handler = store.handler("user", Method::Get).expect("handler should exist");
    let engine = DecisionEngine::new(store, false);

    let access = engine
        .authorize(&handler, &Requester::user("u3", "carol", "nobody"))
        .expect("disabled ACL should pass");
    assert!(access.granted);
    assert_eq!(access.access_type, AccessType::Global);
    assert_eq!(access.acl, None);
    assert_eq!(access.group.as_deref(), Some("nobody"));
}

#[test]
fn anonymous_bypasses_to_global() {
    let store = store();
    let handler = store.handler("user", Method::Get).expect("handler should exist");
    let engine = DecisionEngine::new(store, true);

    let access = engine
        .authorize(&handler, &Requester::anonymous())
        .expect("anonymous should bypass");
    assert_eq!(access.access_type, AccessType::Global);
    assert_eq!(access.group, None);
}

#[test]
fn decide_for_reports_decision_without_failing() {
    let store = store();
    let handler = store.handler("user", Method::Get).expect("handler should exist");
    let engine = DecisionEngine::new(store, true);

    let access = engine.decide_for(&handler, "nobody").expect("group exists");
    assert!(!access.granted);
    assert_eq!(access.access_type, AccessType::None);

    assert_eq!(
        handler.object_acls,
        BTreeSet::from(["k-editor".to_owned(), "k-viewer".to_owned()])
    );
}
