//! Tests for compiled manifest dumps (`compile --dump`).

use std::collections::BTreeMap;

use serde_json::json;

use lense::capability::{builtin, CallScope};
use lense::manifest::{Compiled, CompiledManifest, ManifestEngine, ManifestError};

fn engine() -> ManifestEngine {
    ManifestEngine::new(builtin::standard("LENSE").build().expect("registry should build"))
}

fn manifest() -> serde_json::Value {
    json!([
        {"__PARAMS__": {"name": [true, null], "id": [false, {"call": "LENSE.uuid4"}]}},
        {"var#greeting": "hello"},
        {"var#user": "#__DATA__.name"},
        {"do#log": {
            "call": "LENSE.LOG.info",
            "args": ["#greeting"],
            "ensure": {"value": null, "error": "log failed", "code": 503}
        }},
        {"response": {"greeting": "#greeting", "user": "#user"}}
    ])
}

#[test]
fn dump_reads_back_as_the_same_objects() {
    let engine = engine();
    let Compiled::Objects(objects) = engine.compile(&manifest(), false).expect("compile") else {
        panic!("expected compiled objects");
    };
    let Compiled::Dump(text) = engine.compile(&manifest(), true).expect("compile with dump") else {
        panic!("expected a dump");
    };

    let restored = CompiledManifest::from_dump(&text).expect("dump should read back");
    assert_eq!(restored, objects);
}

#[test]
fn dump_is_tagged_by_object_type() {
    let Compiled::Dump(text) = engine().compile(&manifest(), true).expect("compile with dump") else {
        panic!("expected a dump");
    };
    let parsed: serde_json::Value = serde_json::from_str(&text).expect("dump is JSON");
    let types: Vec<&str> = parsed
        .as_array()
        .expect("dump is an array")
        .iter()
        .filter_map(|o| o["type"].as_str())
        .collect();
    assert_eq!(types, ["parameters", "variable", "variable", "action", "response"]);
}

#[test]
fn restored_manifest_runs() {
    let engine = engine();
    let Compiled::Dump(text) = engine.compile(&manifest(), true).expect("compile with dump") else {
        panic!("expected a dump");
    };
    let restored = CompiledManifest::from_dump(&text).expect("dump should read back");
    let data = BTreeMap::from([("name".to_owned(), "bob".into())]);

    let execution = engine
        .run(&restored, &CallScope::internal(), data)
        .expect("restored manifest should run");
    assert_eq!(
        execution.response,
        Some(json!({"greeting": "hello", "user": "bob"}))
    );
}

#[test]
fn tampered_dump_is_rejected() {
    let duplicate = json!([
        {"type": "variable", "key": "a", "source": {"static": 1}},
        {"type": "variable", "key": "a", "source": {"static": 2}}
    ]);
    let err = CompiledManifest::from_dump(&duplicate.to_string()).expect_err("duplicate key");
    assert!(matches!(err, ManifestError::Compile(_)));

    let late_data = json!([
        {"type": "variable", "key": "a", "source": {"static": 1}},
        {"type": "variable", "key": "__DATA__", "source": {"static": {}}}
    ]);
    let err = CompiledManifest::from_dump(&late_data.to_string()).expect_err("late __DATA__");
    assert!(matches!(err, ManifestError::Compile(_)));

    let err = CompiledManifest::from_dump("not json").expect_err("garbage");
    assert!(matches!(err, ManifestError::Compile(_)));
}
