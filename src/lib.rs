//! Warden - authorization core
//!
//! Capability resolution, the permission level hierarchy, the single
//! authorization decision function, elevation policy and the audit trail.
//! The `warden` binary is a thin admin CLI over these modules.

pub mod audit;
pub mod authz;
pub mod elevation;
pub mod errors;
pub mod settings;
pub mod storage;

pub use authz::engine::authorize;
pub use authz::types::{Decision, Level, Principal};
