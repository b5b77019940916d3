//! Stable failure codes carried in failure descriptions

/// Resource not found while walking an address
pub const RESOURCE_NOT_FOUND: &str = "MGMT0216";

/// First address element is not a registered top-level type
pub const UNREGISTERED_TYPE: &str = "MGMT0217";

/// Operation name unknown at the target address
pub const UNKNOWN_OPERATION: &str = "MGMT0030";

/// Operation exists but is not callable by this caller
pub const NOT_CALLABLE: &str = "MGMT0031";

/// Malformed request or parameter
pub const INVALID_REQUEST: &str = "MGMT0032";

/// Address could not be parsed
pub const MALFORMED_ADDRESS: &str = "MGMT0033";

/// Resource already exists
pub const DUPLICATE_RESOURCE: &str = "MGMT0034";

/// Attribute is read-only or protected content
pub const READ_ONLY: &str = "MGMT0035";

/// Resource cannot be removed
pub const PROTECTED_BINDING: &str = "MGMT0036";

/// Caller lacks permission
pub const UNAUTHORIZED: &str = "MGMT0013";

/// Rollout plan invalid or unknown
pub const INVALID_ROLLOUT_PLAN: &str = "MGMT0120";

/// Rollout failed and was rolled back
pub const OPERATION_FAILED_OR_ROLLED_BACK: &str = "MGMT0121";

/// Target host is not reachable
pub const TARGET_UNREACHABLE: &str = "MGMT0122";

/// Rollout timed out on a target
pub const TIMED_OUT: &str = "MGMT0123";

/// Rollout cancelled before completion
pub const CANCELLED: &str = "MGMT0124";

/// Controller is reloading
pub const CONTROLLER_RELOADING: &str = "MGMT0190";

/// Unexpected internal failure
pub const INTERNAL: &str = "MGMT0199";
