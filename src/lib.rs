//! Lense — manifest interpreter and capability-based ACL gateway.
//!
//! Request handlers are declared as JSON manifests, compiled into typed
//! nodes and run against an explicit capability registry. Before a
//! manifest runs, the ACL decision engine decides whether the requesting
//! group may invoke the handler and at which tier; manifests then filter
//! object results through the `AUTH.*` capabilities.
//!
//! See `DESIGN.md` for the architecture notes.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod logging;

pub mod capability;
pub mod manifest;

pub mod acl;
pub mod gateway;
pub mod response;
