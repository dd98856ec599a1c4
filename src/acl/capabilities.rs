//! Authorization checks exposed to manifests.
//!
//! - `AUTH.ACL.object(obj)` — pass a single object or fail the request
//! - `AUTH.ACL.objects(list)` — keep the visible objects of a list
//! - `AUTH.can_{read,write,delete,exec}(obj)` — instance permission bits
//!
//! Each reads the access context from the call scope, so one registry
//! serves every request.

use std::sync::Arc;

use super::filter::ObjectFilter;
use super::model::Operation;
use super::permissions::PermissionChecker;
use super::store::PermissionStore;
use crate::capability::RegistryBuilder;
use crate::manifest::Value;

/// Register the `AUTH.*` capabilities.
pub fn register(
    builder: RegistryBuilder,
    store: Arc<dyn PermissionStore>,
    admin_group: impl Into<String>,
) -> RegistryBuilder {
    let admin_group: Arc<str> = Arc::from(admin_group.into());

    let single = Arc::clone(&store);
    let list = Arc::clone(&store);
    let builder = builder
        .function("AUTH.ACL.object", move |scope, args| {
            let object = args.require(0, "object")?.clone();
            Ok(ObjectFilter::new(single.as_ref()).object(&scope.access, object)?)
        })
        .function("AUTH.ACL.objects", move |scope, args| {
            let objects = match args.require(0, "objects")? {
                Value::List(items) => items.clone(),
                other => anyhow::bail!("AUTH.ACL.objects expects a list, got {}", other.kind()),
            };
            Ok(Value::List(
                ObjectFilter::new(list.as_ref()).objects(&scope.access, objects),
            ))
        });

    [
        ("AUTH.can_read", Operation::Read),
        ("AUTH.can_write", Operation::Write),
        ("AUTH.can_delete", Operation::Delete),
        ("AUTH.can_exec", Operation::Exec),
    ]
    .into_iter()
    .fold(builder, |builder, (path, op)| {
        let store = Arc::clone(&store);
        let admin_group = Arc::clone(&admin_group);
        builder.function(path, move |scope, args| {
            let object = args.require(0, "object")?;
            let checker = PermissionChecker::new(store.as_ref(), &admin_group);
            Ok(Value::Bool(checker.can(&scope.requester, op, object)))
        })
    })
}
