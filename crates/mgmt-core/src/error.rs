//! Error types for the management plane
//!
//! [`ManagementError`] is the only error that reaches the operation boundary.
//! Every variant maps onto one [`ErrorKind`] of the failure taxonomy and a
//! stable `MGMT0xxx` code used as the prefix of the failure description.

use crate::launcher::LaunchError;
use crate::rollout::{RolloutError, RolloutReport, TargetStatus};
use crate::topology::TopologyError;
use mgmt_model::{codes, AddressError, TreeError};
use mgmt_ops::RegistryError;
use mgmt_rbac::{DenyReason, RbacError};

/// Failure taxonomy seen by management clients
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    MalformedAddress,
    UnresolvedAddress,
    UnknownOperation,
    AuthorizationDenied,
    OperationNotPermitted,
    TargetUnreachable,
    RolloutTimeout,
    /// Request or model state rejected the operation
    OperationFailed,
}

/// Main management error type
#[derive(Debug, thiserror::Error)]
pub enum ManagementError {
    /// Address could not be parsed
    #[error(transparent)]
    MalformedAddress(#[from] AddressError),

    /// Address does not identify an existing resource
    #[error("{problem}")]
    UnresolvedAddress { problem: String },

    /// Resource tree rejected the change
    #[error(transparent)]
    Tree(#[from] TreeError),

    /// Operation lookup or visibility failure
    #[error(transparent)]
    Registry(#[from] RegistryError),

    /// Authorizer denied the request
    #[error("not authorized to invoke '{operation}' on '{address}': {reason}")]
    AuthorizationDenied {
        operation: String,
        address: String,
        reason: DenyReason,
    },

    /// Authorization configuration problem
    #[error(transparent)]
    Rbac(#[from] RbacError),

    /// Missing or mistyped parameter
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Host controller could not be reached
    #[error("host '{host}' is unreachable: {reason}")]
    TargetUnreachable { host: String, reason: String },

    /// Session or channel failure
    #[error(transparent)]
    Topology(#[from] TopologyError),

    /// Rollout plan could not be resolved
    #[error(transparent)]
    Rollout(#[from] RolloutError),

    /// Rollout finished with a failed or timed-out outcome
    #[error("{}", rollout_summary(.report))]
    RolloutFailed { report: Box<RolloutReport> },

    /// Operation was cancelled before it was dispatched
    #[error("operation cancelled")]
    Cancelled,

    /// Domain controller is reloading
    #[error("the domain controller is reloading, retry once it is running")]
    ControllerReloading,

    /// Server launcher failure
    #[error(transparent)]
    Launch(#[from] LaunchError),

    /// Failure reported by a host controller, passed through as-is
    #[error("{description}")]
    Remote { description: String },

    /// Resource is still referenced
    #[error("'{address}' is still referenced by {}", .users.join(", "))]
    InUse { address: String, users: Vec<String> },

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Unexpected internal failure
    #[error("internal error: {0}")]
    Internal(String),
}

fn rollout_summary(report: &RolloutReport) -> String {
    match report.outcome {
        TargetStatus::TimedOut => format!(
            "rollout {} timed out and was rolled back",
            report.id
        ),
        _ => format!("rollout {} failed and was rolled back", report.id),
    }
}

impl ManagementError {
    /// Taxonomy entry of this error
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::MalformedAddress(_) => ErrorKind::MalformedAddress,
            Self::UnresolvedAddress { .. } | Self::Tree(TreeError::NotFound { .. }) => {
                ErrorKind::UnresolvedAddress
            }
            Self::Registry(RegistryError::UnknownOperation { .. }) => ErrorKind::UnknownOperation,
            Self::Registry(RegistryError::NotPermitted { .. }) => ErrorKind::OperationNotPermitted,
            Self::AuthorizationDenied { .. } => ErrorKind::AuthorizationDenied,
            Self::TargetUnreachable { .. } | Self::Topology(_) => ErrorKind::TargetUnreachable,
            Self::RolloutFailed { report } if report.outcome == TargetStatus::TimedOut => {
                ErrorKind::RolloutTimeout
            }
            _ => ErrorKind::OperationFailed,
        }
    }

    /// Stable failure code
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::MalformedAddress(_) => codes::MALFORMED_ADDRESS,
            Self::UnresolvedAddress { .. } => codes::RESOURCE_NOT_FOUND,
            Self::Tree(err) => match err {
                TreeError::NotFound { .. } | TreeError::ParentNotFound { .. } => {
                    codes::RESOURCE_NOT_FOUND
                }
                TreeError::Duplicate { .. } => codes::DUPLICATE_RESOURCE,
                TreeError::UnregisteredType { .. } => codes::UNREGISTERED_TYPE,
                TreeError::ProtectedBinding { .. } => codes::PROTECTED_BINDING,
                TreeError::ReadOnlyAttribute { .. } | TreeError::ProtectedContent { .. } => {
                    codes::READ_ONLY
                }
                TreeError::AttributeNotFound { .. }
                | TreeError::WildcardNotAllowed { .. }
                | TreeError::RootOperation => codes::INVALID_REQUEST,
            },
            Self::Registry(err) => match err {
                RegistryError::UnknownOperation { .. } => codes::UNKNOWN_OPERATION,
                RegistryError::NotPermitted { .. } => codes::NOT_CALLABLE,
                RegistryError::DuplicateOperation { .. } => codes::INTERNAL,
            },
            Self::AuthorizationDenied { .. } => codes::UNAUTHORIZED,
            Self::Rbac(_) | Self::Config(_) | Self::Internal(_) => codes::INTERNAL,
            Self::InvalidRequest(_) | Self::InUse { .. } => codes::INVALID_REQUEST,
            Self::TargetUnreachable { .. } => codes::TARGET_UNREACHABLE,
            Self::Topology(err) if err.is_unreachable() => codes::TARGET_UNREACHABLE,
            Self::Topology(_) => codes::INTERNAL,
            Self::Rollout(_) => codes::INVALID_ROLLOUT_PLAN,
            Self::RolloutFailed { report } if report.outcome == TargetStatus::TimedOut => {
                codes::TIMED_OUT
            }
            Self::RolloutFailed { .. } | Self::Launch(_) => codes::OPERATION_FAILED_OR_ROLLED_BACK,
            Self::Cancelled => codes::CANCELLED,
            Self::ControllerReloading => codes::CONTROLLER_RELOADING,
            Self::Remote { .. } => "",
        }
    }

    /// `failure-description` value
    ///
    /// Remote failures already carry their code and are returned unchanged.
    #[must_use]
    pub fn failure_description(&self) -> String {
        match self {
            Self::Remote { description } => description.clone(),
            other => format!("{}: {other}", other.code()),
        }
    }

    /// Check if the caller may simply retry later
    #[inline]
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::TargetUnreachable | ErrorKind::RolloutTimeout
        ) || matches!(self, Self::ControllerReloading)
    }

    /// Rollout report attached to a rollout failure
    #[must_use]
    pub fn rollout_report(&self) -> Option<&RolloutReport> {
        match self {
            Self::RolloutFailed { report } => Some(report),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mgmt_ops::{CallerContext, Visibility};

    #[test]
    fn descriptions_carry_codes() {
        let err = ManagementError::from(RegistryError::NotPermitted {
            operation: "private-op".into(),
            visibility: Visibility::Private,
            caller: CallerContext::External,
        });
        assert_eq!(err.kind(), ErrorKind::OperationNotPermitted);
        assert!(err.failure_description().starts_with(codes::NOT_CALLABLE));

        let err = ManagementError::from(TreeError::NotFound {
            address: "/profile=x".into(),
        });
        assert_eq!(err.kind(), ErrorKind::UnresolvedAddress);
        assert_eq!(
            err.failure_description(),
            format!("{}: resource '/profile=x' not found", codes::RESOURCE_NOT_FOUND)
        );
    }

    #[test]
    fn remote_descriptions_pass_through() {
        let err = ManagementError::Remote {
            description: "MGMT0035: attribute 'x' of '/host=h' is read-only".into(),
        };
        assert_eq!(
            err.failure_description(),
            "MGMT0035: attribute 'x' of '/host=h' is read-only"
        );
    }

    #[test]
    fn denial_is_not_retryable() {
        let err = ManagementError::AuthorizationDenied {
            operation: "add".into(),
            address: "/profile=x".into(),
            reason: DenyReason::NoRoles,
        };
        assert_eq!(err.code(), codes::UNAUTHORIZED);
        assert!(!err.is_retryable());
        assert!(ManagementError::ControllerReloading.is_retryable());
    }
}
