//! Tests for the object access filter.

use serde_json::json;

use lense::acl::model::{AccessContext, AccessType, ObjectAclGrant};
use lense::acl::{AuthError, InMemoryStore, ObjectFilter};
use lense::manifest::Value;

fn store() -> InMemoryStore {
    let store = InMemoryStore::new();
    for (id, allowed) in [("u1", true), ("u3", true), ("u4", false)] {
        store
            .grant_object(ObjectAclGrant {
                object_type: "user".to_owned(),
                object_id: id.to_owned(),
                group: "editors".to_owned(),
                allowed,
            })
            .expect("grant should store");
    }
    store
}

fn object_access() -> AccessContext {
    AccessContext {
        granted: true,
        access_type: AccessType::Object,
        acl: Some("k-editor".to_owned()),
        group: Some("editors".to_owned()),
        object_type: Some("user".to_owned()),
        object_key: None,
    }
}

fn user(uuid: &str) -> Value {
    Value::from(json!({"uuid": uuid, "name": format!("user {uuid}")}))
}

#[test]
fn list_keeps_granted_objects_in_order() {
    let store = store();
    let filter = ObjectFilter::new(&store);
    let kept = filter.objects(
        &object_access(),
        vec![user("u4"), user("u3"), user("u2"), user("u1")],
    );

    let ids: Vec<String> = kept
        .iter()
        .filter_map(|o| lense::acl::filter::object_id(o, "uuid"))
        .collect();
    assert_eq!(ids, ["u3", "u1"]);
}

#[test]
fn list_drops_objects_without_key() {
    let store = store();
    let filter = ObjectFilter::new(&store);
    let kept = filter.objects(
        &object_access(),
        vec![Value::from(json!({"name": "anonymous"})), user("u1")],
    );
    assert_eq!(kept, vec![user("u1")]);
}

#[test]
fn single_object_errors() {
    let store = store();
    let filter = ObjectFilter::new(&store);
    let access = object_access();

    filter.object(&access, user("u1")).expect("granted object passes");

    let err = filter
        .object(&access, user("u2"))
        .expect_err("absent grant should fail");
    assert!(matches!(err, AuthError::Denied(_)));
    assert_eq!(err.status(), 401);

    let err = filter
        .object(&access, user("u4"))
        .expect_err("disallowed grant should fail");
    assert!(matches!(err, AuthError::Denied(_)));

    let err = filter
        .object(&access, Value::from(json!({"name": "no id"})))
        .expect_err("missing key should fail");
    assert!(matches!(err, AuthError::NotFound(_)));
    assert_eq!(err.status(), 404);
}

#[test]
fn filter_dispatches_on_shape() {
    let store = store();
    let filter = ObjectFilter::new(&store);
    let access = object_access();

    let list = filter
        .filter(&access, Value::List(vec![user("u1"), user("u2")]))
        .expect("list passes");
    assert_eq!(list, Value::List(vec![user("u1")]));

    assert!(filter.filter(&access, user("u2")).is_err());
}

#[test]
fn custom_object_key() {
    let store = store();
    let filter = ObjectFilter::new(&store);
    let access = AccessContext {
        object_key: Some("id".to_owned()),
        ..object_access()
    };
    let by_id = Value::from(json!({"id": "u1"}));
    filter.object(&access, by_id).expect("id attribute is used");
    assert!(filter.object(&access, user("u1")).is_err());
}

#[test]
fn global_access_passes_everything() {
    let store = store();
    let filter = ObjectFilter::new(&store);
    let access = AccessContext::bypass();

    let all = vec![user("u1"), user("u2"), Value::from(json!({"no": "key"}))];
    assert_eq!(
        filter.objects(&access, all.clone()),
        all
    );
    filter.object(&access, user("u9")).expect("global passes");
}

#[test]
fn object_access_without_type_is_misconfigured() {
    let store = store();
    let filter = ObjectFilter::new(&store);
    let access = AccessContext {
        object_type: None,
        ..object_access()
    };

    assert!(filter.objects(&access, vec![user("u1"), user("u2")]).is_empty());
    assert_eq!(
        filter
            .filter(&access, Value::List(vec![user("u1")]))
            .expect("list mode never fails"),
        Value::List(Vec::new())
    );

    let err = filter
        .object(&access, user("u1"))
        .expect_err("missing object type should fail");
    assert!(matches!(err, AuthError::Misconfigured(_)));
    assert_eq!(err.status(), 500);
}

#[test]
fn numeric_identifiers_are_matched() {
    let store = InMemoryStore::new();
    store
        .grant_object(ObjectAclGrant {
            object_type: "user".to_owned(),
            object_id: "42".to_owned(),
            group: "editors".to_owned(),
            allowed: true,
        })
        .expect("grant should store");
    let filter = ObjectFilter::new(&store);
    filter
        .object(&object_access(), Value::from(json!({"uuid": 42})))
        .expect("numeric id should match");
}
