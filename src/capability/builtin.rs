//! Built-in capabilities every registry starts with.
//!
//! - `LOG.{debug,info,warn,error}(msg)` — forward to `tracing`
//! - `uuid4()` — random UUID string
//! - `OBJECTS.dump(object)` — JSON rendering of API objects
//! - `REQUEST.{id,user,group}` — caller details from the call scope

use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::{CallArgs, CallScope, RegistryBuilder};
use crate::manifest::Value;

/// Path of the serializer used to render opaque response values.
pub const DUMP_PATH: &str = "OBJECTS.dump";

/// Registry builder seeded with the built-ins.
pub fn standard(root: impl Into<String>) -> RegistryBuilder {
    register(RegistryBuilder::new(root))
}

/// Add the built-ins to an existing builder.
pub fn register(builder: RegistryBuilder) -> RegistryBuilder {
    builder
        .function("LOG.debug", |scope, args| log_message("debug", scope, &args))
        .function("LOG.info", |scope, args| log_message("info", scope, &args))
        .function("LOG.warn", |scope, args| log_message("warn", scope, &args))
        .function("LOG.error", |scope, args| log_message("error", scope, &args))
        .function("uuid4", |_, _| Ok(Value::String(Uuid::new_v4().to_string())))
        .function(DUMP_PATH, |_, args| dump(args.require(0, "object")?))
        .function("REQUEST.id", |scope, _| {
            Ok(Value::String(scope.request_id.to_string()))
        })
        .function("REQUEST.user", |scope, _| {
            Ok(scope.requester.user.clone().map_or(Value::Null, Value::String))
        })
        .function("REQUEST.group", |scope, _| {
            Ok(scope.requester.group.clone().map_or(Value::Null, Value::String))
        })
}

fn log_message(level: &str, scope: &CallScope, args: &CallArgs) -> anyhow::Result<Value> {
    let msg = args.require_str(0, "msg")?;
    let request = scope.request_id;
    match level {
        "debug" => debug!(%request, "{msg}"),
        "warn" => warn!(%request, "{msg}"),
        "error" => error!(%request, "{msg}"),
        _ => info!(%request, "{msg}"),
    }
    Ok(Value::Null)
}

/// Render a value, including nested API objects, as JSON.
///
/// # Errors
///
/// Returns an error when an object has no JSON representation.
pub fn dump(value: &Value) -> anyhow::Result<Value> {
    dump_json(value).map(Value::from)
}

fn dump_json(value: &Value) -> anyhow::Result<serde_json::Value> {
    Ok(match value {
        Value::Object(obj) => obj
            .to_json()
            .ok_or_else(|| anyhow::anyhow!("{} does not support dump", obj.type_name()))?,
        Value::List(items) => serde_json::Value::Array(
            items.iter().map(dump_json).collect::<anyhow::Result<Vec<_>>>()?,
        ),
        Value::Map(m) => serde_json::Value::Object(
            m.iter()
                .map(|(k, v)| dump_json(v).map(|j| (k.clone(), j)))
                .collect::<anyhow::Result<serde_json::Map<_, _>>>()?,
        ),
        // Scalars always convert.
        other => other.to_json().unwrap_or(serde_json::Value::Null),
    })
}
