//! Capability-based authorization gateway.
//!
//! Three tiers, checked per request:
//! - **global**: handler and group share a global ACL key; all objects visible
//! - **object**: they share an object ACL key; objects need an instance grant
//! - **instance bits**: owner/group/all permission records per object
//!
//! [`decision`] gates the handler, [`filter`] applies object-level access
//! to results, [`permissions`] evaluates instance bits. All three only read
//! from a [`store::PermissionStore`].

pub mod capabilities;
pub mod decision;
pub mod filter;
pub mod model;
pub mod permissions;
pub mod store;

pub use decision::{decide, AuthError, DecisionEngine};
pub use filter::ObjectFilter;
pub use model::{AccessContext, AccessType, Handler, Method, Requester};
pub use permissions::PermissionChecker;
pub use store::{InMemoryStore, PermissionStore, StoreError};
