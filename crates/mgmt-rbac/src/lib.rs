//! Role based access control
//!
//! Maps an authenticated [`Principal`] to a set of [`Role`]s and decides
//! whether those roles may perform an action on an address.
//!
//! # Core Concepts
//!
//! - [`StandardRole`]: domain-wide roles ranked by privilege
//! - [`Role`]: standard, host-scoped or server-group-scoped
//! - [`sensitivity`]: classifications that raise the required privilege
//! - [`TargetScope`]: hosts and server-groups an address belongs to
//! - [`Authorizer`]: per-request decisions, built from the live model
//!
//! Roles are derived again for every request from the current
//! authorization subtree; nothing is cached between requests.

#![warn(unreachable_pub)]
#![allow(missing_docs)]

mod authorizer;
mod config;
mod role;
mod scope;

pub mod sensitivity;

pub use authorizer::{AccessRequest, Authorizer, Decision, DenyReason, FilterReport};
pub use config::{AuthorizationConfig, Provider, RoleMapping, ScopedRoleDefinition, AUTHORIZATION_ADDRESS};
pub use role::{Principal, PrincipalRef, Role, StandardRole};
pub use scope::TargetScope;

/// RBAC errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RbacError {
    /// Role name not recognized
    #[error("unknown role '{0}'")]
    UnknownRole(String),

    /// Authorization subtree malformed
    #[error("invalid authorization configuration at '{address}': {reason}")]
    InvalidConfig { address: String, reason: String },
}
