//! Reference resolver tests: argument spreads, nested values and calls on
//! API objects.

use std::collections::BTreeMap;

use serde_json::json;

use lense::capability::{builtin, CallArgs, CallScope, CapabilityRegistry};
use lense::manifest::executor::ObjectState;
use lense::manifest::resolver::Resolver;
use lense::manifest::{
    ApiObject, CompiledManifest, Compiler, ExecutionContext, Executor, ManifestError, Value,
};

#[derive(Debug)]
struct Account {
    owner: String,
}

impl ApiObject for Account {
    fn type_name(&self) -> &str {
        "Account"
    }

    fn attr(&self, name: &str) -> Option<Value> {
        (name == "owner").then(|| Value::string(self.owner.clone()))
    }

    fn invoke(&self, method: &str, args: CallArgs) -> anyhow::Result<Value> {
        match method {
            "transfer" => {
                let to = args.require_str(0, "to")?;
                Ok(Value::object(Account { owner: to.to_owned() }))
            }
            "describe" => Ok(Value::string(format!("account of {}", self.owner))),
            other => anyhow::bail!("Account has no method '{other}'"),
        }
    }

    fn to_json(&self) -> Option<serde_json::Value> {
        Some(json!({"owner": self.owner}))
    }
}

fn registry() -> CapabilityRegistry {
    builtin::standard("LENSE")
        .function("ACCOUNTS.open", |_, args| {
            let owner = args.require_str(0, "owner")?;
            Ok(Value::object(Account {
                owner: owner.to_owned(),
            }))
        })
        .function("ECHO.kwargs", |_, args| Ok(Value::Map(args.kwargs)))
        .function("ECHO.args", |_, args| Ok(Value::List(args.args)))
        .value("SITE", Value::from(json!({"name": "example", "tags": ["a", "b"]})))
        .build()
        .expect("registry should build")
}

fn compile(registry: &CapabilityRegistry, manifest: serde_json::Value) -> CompiledManifest {
    Compiler::new(registry)
        .compile(&manifest)
        .expect("manifest should compile")
}

#[test]
fn spreads_resolve_references_and_paths() {
    let registry = registry();
    let scope = CallScope::internal();
    let compiled = compile(
        &registry,
        json!([
            {"var#items": ["x", "y"]},
            {"var#options": {"limit": 10}}
        ]),
    );
    let mut context = ExecutionContext::new(&compiled, BTreeMap::new());
    Executor::new(&registry)
        .execute(&mut context, &scope)
        .expect("manifest should run");

    let resolver = Resolver::new(&registry, &scope, &context);
    assert_eq!(
        resolver.map_args(&json!("#items")).expect("args spread"),
        vec![Value::string("x"), Value::string("y")]
    );
    assert_eq!(
        resolver.map_args(&json!("*LENSE.SITE.tags")).expect("path spread"),
        vec![Value::string("a"), Value::string("b")]
    );
    assert_eq!(
        resolver
            .map_kwargs(&json!("#options"))
            .expect("kwargs spread")
            .get("limit"),
        Some(&Value::from(json!(10)))
    );
    assert_eq!(
        resolver
            .map_kwargs(&json!("**LENSE.SITE"))
            .expect("kwargs path spread")
            .get("name"),
        Some(&Value::string("example"))
    );

    let err = resolver
        .map_args(&json!("#options"))
        .expect_err("mapping is not a list");
    assert!(matches!(err, ManifestError::Reference(_)), "got {err:?}");
    let err = resolver
        .map_kwargs(&json!("#items"))
        .expect_err("list is not a mapping");
    assert!(matches!(err, ManifestError::Reference(_)), "got {err:?}");
}

#[test]
fn map_value_keeps_literals_and_resolves_symbols() {
    let registry = registry();
    let scope = CallScope::internal();
    let compiled = compile(&registry, json!([{"var#n": 3}]));
    let mut context = ExecutionContext::new(&compiled, BTreeMap::new());
    Executor::new(&registry)
        .execute(&mut context, &scope)
        .expect("manifest should run");

    let resolver = Resolver::new(&registry, &scope, &context);
    let value = resolver
        .map_value(&json!({
            "plain": "hello",
            "number": "#n",
            "site": "LENSE.SITE.name",
            "nested": [{"echo": {"call": "LENSE.ECHO.args", "args": ["#n", true]}}]
        }))
        .expect("value should map");

    assert_eq!(
        value.to_json(),
        Some(json!({
            "plain": "hello",
            "number": 3,
            "site": "example",
            "nested": [{"echo": [3, true]}]
        }))
    );
}

#[test]
fn reference_call_invokes_object_method() {
    let registry = registry();
    let response = lense::manifest::ManifestEngine::new(registry)
        .execute(
            &json!([
                {"var#account": {"call": "LENSE.ACCOUNTS.open", "args": ["alice"]}},
                {"var#moved": {"call": "#account.transfer", "kwargs": {"to": "bob"}}},
                {"var#text": {"call": "#moved.describe"}},
                {"response": {"from": "#account.owner", "to": "#moved", "text": "#text"}}
            ]),
            &CallScope::internal(),
            BTreeMap::new(),
        )
        .expect("manifest should run");

    assert_eq!(
        response,
        Some(json!({"from": "alice", "to": {"owner": "bob"}, "text": "account of bob"}))
    );
}

#[test]
fn reference_call_failures() {
    let engine = lense::manifest::ManifestEngine::new(registry());
    let scope = CallScope::internal();

    let err = engine
        .execute(
            &json!([
                {"var#account": {"call": "LENSE.ACCOUNTS.open", "args": ["alice"]}},
                {"do#x": {"call": "#account.close"}}
            ]),
            &scope,
            BTreeMap::new(),
        )
        .expect_err("unknown method should fail");
    assert!(matches!(err, ManifestError::Capability { .. }), "got {err:?}");

    let err = engine
        .execute(
            &json!([{"var#name": "plain"}, {"do#x": {"call": "#name.upper"}}]),
            &scope,
            BTreeMap::new(),
        )
        .expect_err("method on a string should fail");
    assert!(matches!(err, ManifestError::Reference(_)), "got {err:?}");
}

#[test]
fn kwargs_are_resolved_before_the_call() {
    let response = lense::manifest::ManifestEngine::new(registry())
        .execute(
            &json!([
                {"__DATA__": {"limit": 5}},
                {"var#echo": {"call": "LENSE.ECHO.kwargs", "kwargs": {"limit": "#__DATA__.limit", "site": "LENSE.SITE.name"}}},
                {"response": "#echo"}
            ]),
            &CallScope::internal(),
            BTreeMap::new(),
        )
        .expect("manifest should run");
    assert_eq!(response, Some(json!({"limit": 5, "site": "example"})));
}

#[test]
fn failed_run_leaves_later_objects_compiled() {
    let registry = registry();
    let scope = CallScope::internal();
    let compiled = compile(
        &registry,
        json!([
            {"var#a": 1},
            {"do#fail": {"call": "LENSE.ECHO.args", "ensure": {"value": "never"}}},
            {"var#c": 3}
        ]),
    );
    let mut context = ExecutionContext::new(&compiled, BTreeMap::new());
    let err = Executor::new(&registry)
        .execute(&mut context, &scope)
        .expect_err("ensure should fail");
    assert!(matches!(err, ManifestError::Ensure { .. }));

    assert_eq!(context.state("a"), Some(ObjectState::Executed));
    assert_eq!(context.state("fail"), Some(ObjectState::Compiled));
    assert_eq!(context.state("c"), Some(ObjectState::Compiled));
    assert_eq!(context.state("missing"), None);
}
