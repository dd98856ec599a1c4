//! Tests for the request gateway: handler gate, ACL decision, manifest run
//! and response rendering.

use std::sync::Arc;

use serde_json::json;

use lense::acl::model::{Method, Requester};
use lense::acl::{AuthError, InMemoryStore, PermissionStore};
use lense::config::Config;
use lense::gateway::{registry_builder, ApiRequest, Gateway, GatewayError};
use lense::manifest::{ManifestError, Value};
use lense::response::SUCCESS_MESSAGE;

const STORE: &str = r##"
[[acl_keys]]
id = "k-admin"
name = "admin"
type_global = true

[[acl_keys]]
id = "k-editor"
name = "editor"
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
id = "h-users"
path = "/users"
method = "GET"
object_type = "user"
global_acls = ["k-admin"]
object_acls = ["k-editor"]
manifest = '''
[
  {"var#all": {"call": "LENSE.USERS.list"}},
  {"var#visible": {"call": "LENSE.AUTH.ACL.objects", "args": ["#all"]}},
  {"response": {"users": "#visible"}}
]
'''

[[handlers]]
id = "h-user"
path = "/user"
method = "GET"
object_type = "user"
global_acls = ["k-admin"]
object_acls = ["k-editor"]
manifest = '''
[
  {"__PARAMS__": {"uuid": [true, null]}},
  {"var#user": {"call": "LENSE.USERS.get", "kwargs": {"uuid": "#__DATA__.uuid"}}},
  {"var#checked": {"call": "LENSE.AUTH.ACL.object", "args": ["#user"]}},
  {"response": "#checked"}
]
'''

[[handlers]]
id = "h-ping"
path = "ping"
method = "GET"
allow_anon = true
global_acls = ["k-admin"]
manifest = '[{"response": {"pong": true}}]'

[[handlers]]
id = "h-off"
path = "off"
method = "GET"
enabled = false
global_acls = ["k-admin"]

[[handlers]]
id = "h-boom"
path = "boom"
method = "POST"
global_acls = ["k-admin"]
manifest = '[{"do#fail": {"call": "LENSE.USERS.broken"}}]'

[[object_grants]]
object_type = "user"
object_id = "u1"
group = "editors"
"##;

fn users() -> Vec<serde_json::Value> {
    vec![
        json!({"uuid": "u1", "name": "alice"}),
        json!({"uuid": "u2", "name": "bob"}),
    ]
}

fn gateway(config: &Config) -> Gateway {
    let store: Arc<dyn PermissionStore> =
        Arc::new(InMemoryStore::from_toml(STORE).expect("store should load"));
    let registry = registry_builder(Arc::clone(&store), config)
        .function("USERS.list", |_, _| {
            Ok(Value::List(users().into_iter().map(Value::from).collect()))
        })
        .function("USERS.get", |_, args| {
            let uuid = args.require_str(0, "uuid")?;
            users()
                .into_iter()
                .find(|u| u["uuid"] == uuid)
                .map(Value::from)
                .ok_or_else(|| anyhow::anyhow!("no user {uuid}"))
        })
        .function("USERS.broken", |_, _| {
            Err(anyhow::anyhow!("database unavailable").context("loading users"))
        })
        .build()
        .expect("registry should build");
    Gateway::new(store, registry, config)
}

fn request(path: &str, method: Method, requester: Requester, data: serde_json::Value) -> ApiRequest {
    ApiRequest {
        path: path.to_owned(),
        method,
        requester,
        data,
    }
}

fn admin() -> Requester {
    Requester::user("u-root", "root", "admins")
}

fn editor() -> Requester {
    Requester::user("u-ed", "ed", "editors")
}

// ---------- handler gate ----------

#[test]
fn unknown_handler_is_not_found() {
    let err = gateway(&Config::default())
        .handle(request("missing", Method::Get, admin(), json!(null)))
        .expect_err("unknown handler should fail");
    assert!(matches!(err, GatewayError::Auth(AuthError::NotFound(_))));
    assert_eq!(err.status(), 404);

    let err = gateway(&Config::default())
        .handle(request("users", Method::Delete, admin(), json!(null)))
        .expect_err("wrong method should fail");
    assert_eq!(err.status(), 404);
}

#[test]
fn disabled_handler_is_not_found() {
    let err = gateway(&Config::default())
        .handle(request("off", Method::Get, admin(), json!(null)))
        .expect_err("disabled handler should fail");
    assert!(matches!(err, GatewayError::Auth(AuthError::HandlerDisabled(_))));
    assert_eq!(err.status(), 404);
}

#[test]
fn anonymous_needs_allow_anon() {
    let gateway = gateway(&Config::default());

    let err = gateway
        .handle(request("users", Method::Get, Requester::anonymous(), json!(null)))
        .expect_err("anonymous should be rejected");
    assert!(matches!(err, GatewayError::Auth(AuthError::AnonymousNotAllowed(_))));
    assert_eq!(err.status(), 401);

    let response = gateway
        .handle(request("/ping/", Method::Get, Requester::anonymous(), json!(null)))
        .expect("anonymous ping should pass");
    assert_eq!(response.data, json!({"pong": true}));
}

// ---------- ACL decision ----------

#[test]
fn group_without_key_is_denied() {
    let err = gateway(&Config::default())
        .handle(request(
            "users",
            Method::Get,
            Requester::user("u-x", "x", "nobody"),
            json!(null),
        ))
        .expect_err("group without key should be denied");
    assert!(matches!(err, GatewayError::Auth(AuthError::Denied(_))));
    assert_eq!(err.status(), 401);
}

#[test]
fn disabled_acl_grants_everyone() {
    let mut config = Config::default();
    config.acl.enabled = false;

    let response = gateway(&config)
        .handle(request(
            "users",
            Method::Get,
            Requester::user("u-x", "x", "nobody"),
            json!(null),
        ))
        .expect("disabled ACL should pass");
    assert_eq!(response.data["users"].as_array().map(Vec::len), Some(2));
}

// ---------- object filtering through manifests ----------

#[test]
fn global_access_sees_every_object() {
    let response = gateway(&Config::default())
        .handle(request("users", Method::Get, admin(), json!(null)))
        .expect("admin should pass");
    assert_eq!(response.message, SUCCESS_MESSAGE);
    assert_eq!(response.data, json!({"users": users()}));
}

#[test]
fn object_access_sees_granted_objects() {
    let response = gateway(&Config::default())
        .handle(request("users", Method::Get, editor(), json!(null)))
        .expect("editor should pass");
    assert_eq!(response.data, json!({"users": [{"uuid": "u1", "name": "alice"}]}));
}

#[test]
fn single_object_outside_grants_is_denied() {
    let gateway = gateway(&Config::default());

    let response = gateway
        .handle(request("user", Method::Get, editor(), json!({"uuid": "u1"})))
        .expect("granted object should pass");
    assert_eq!(response.data, json!({"uuid": "u1", "name": "alice"}));

    let err = gateway
        .handle(request("user", Method::Get, editor(), json!({"uuid": "u2"})))
        .expect_err("ungranted object should fail");
    assert!(matches!(
        &err,
        GatewayError::Manifest(ManifestError::Capability { .. })
    ));
    assert_eq!(err.status(), 401);

    let payload = err.payload(false);
    assert_eq!(payload.code, 401);
    assert!(payload.error.starts_with("access denied"), "{}", payload.error);
    assert_eq!(payload.message, "An error occured while authorizing the request");
}

// ---------- manifest failures ----------

#[test]
fn missing_parameter_is_client_error() {
    let payload = gateway(&Config::default())
        .respond(request("user", Method::Get, admin(), json!({})))
        .expect_err("missing parameter should fail");
    assert_eq!(payload.code, 400);
    assert_eq!(payload.error, "Missing required parameter: uuid");
    assert_eq!(payload.message, "An error occurred while validating the request");
    assert!(payload.debug.is_none());
}

#[test]
fn non_object_data_is_client_error() {
    let err = gateway(&Config::default())
        .handle(request("ping", Method::Get, admin(), json!([1, 2])))
        .expect_err("list data should fail");
    assert!(matches!(err, GatewayError::Manifest(ManifestError::RequestData(_))));
    assert_eq!(err.status(), 400);
}

#[test]
fn server_errors_hide_details_unless_debug() {
    let quiet = gateway(&Config::default())
        .respond(request("boom", Method::Post, admin(), json!(null)))
        .expect_err("broken capability should fail");
    assert_eq!(quiet.code, 500);
    assert!(quiet.debug.is_none());

    let mut config = Config::default();
    config.engine.debug = true;
    let loud = gateway(&config)
        .respond(request("boom", Method::Post, admin(), json!(null)))
        .expect_err("broken capability should fail");
    let debug = loud.debug.expect("debug details should be attached");
    assert!(debug.exception.contains("LENSE.USERS.broken"), "{}", debug.exception);
    assert!(
        debug.causes.iter().any(|c| c.contains("loading users")),
        "{:?}",
        debug.causes
    );
}

#[test]
fn payloads_serialize_without_empty_debug() {
    let payload = gateway(&Config::default())
        .respond(request("missing", Method::Get, admin(), json!(null)))
        .expect_err("unknown handler should fail");
    let json = serde_json::to_value(&payload).expect("payload serializes");
    assert_eq!(json["code"], 404);
    assert!(json.get("debug").is_none());

    let ok = gateway(&Config::default())
        .respond(request("ping", Method::Get, admin(), json!(null)))
        .expect("ping should pass");
    assert_eq!(
        serde_json::to_value(&ok).expect("response serializes"),
        json!({"message": "Request successful", "data": {"pong": true}})
    );
}
