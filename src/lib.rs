//! Warrant - authorization engine
//!
//! Decides whether a principal may perform an action on a resource instance,
//! and compiles the same permission rules into query predicates for
//! collection filtering. The `warrant` binary drives it from KDL policy files
//! and a JSON record catalog.

pub mod authz;
pub mod catalog;
pub mod errors;
pub mod settings;
