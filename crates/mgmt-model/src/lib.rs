//! Management model
//!
//! Addresses, resources and the shared resource tree of a managed domain.
//!
//! # Core Concepts
//!
//! - [`PathAddress`]: ordered `type=value` elements locating a resource
//! - [`Resource`]: attributes plus children grouped by child type
//! - [`ResourceTree`]: the lock-guarded root shared by every handler
//!
//! # Example
//!
//! ```rust
//! use mgmt_model::{PathAddress, Resource, ResourceTree};
//!
//! let tree = ResourceTree::new(Resource::new().with_child("profile", "default", Resource::new()));
//! let addr = PathAddress::resolve("/profile=default").unwrap();
//! assert!(tree.validate(&addr).valid);
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

mod address;
mod resource;
mod tree;

pub mod codes;

pub use address::{AddressError, PathAddress, PathElement, ROOT_TYPE, WILDCARD};
pub use resource::{Binding, RenderFilter, RenderOptions, Resource, RuntimeState};
pub use tree::{
    add_in, read_attribute_in, remove_in, under_protected, validate_in, write_attribute_in,
    ResourceTree, TreeError, ValidationResult, DEFAULT_TOP_LEVEL_TYPES,
};

/// Management interface major version
pub const MANAGEMENT_MAJOR_VERSION: u32 = 4;

/// Management interface minor version
pub const MANAGEMENT_MINOR_VERSION: u32 = 1;

/// Management interface micro version
pub const MANAGEMENT_MICRO_VERSION: u32 = 0;

/// Product release version
pub const RELEASE_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Names of the read-only version attributes
pub const VERSION_ATTRIBUTES: &[&str] = &[
    "management-major-version",
    "management-minor-version",
    "management-micro-version",
    "release-version",
];

/// Add the read-only version attributes (root and host resources carry them)
#[must_use]
pub fn with_version_attributes(resource: Resource) -> Resource {
    resource
        .with_read_only_attribute("management-major-version", MANAGEMENT_MAJOR_VERSION)
        .with_read_only_attribute("management-minor-version", MANAGEMENT_MINOR_VERSION)
        .with_read_only_attribute("management-micro-version", MANAGEMENT_MICRO_VERSION)
        .with_read_only_attribute("release-version", RELEASE_VERSION)
}

#[cfg(test)]
mod version_tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn version_attributes_are_read_only_integers() {
        let root = with_version_attributes(Resource::new());
        assert_eq!(root.attribute("management-major-version"), Some(&json!(4)));
        for name in VERSION_ATTRIBUTES {
            assert!(root.is_read_only(name), "{name}");
        }
        assert!(root.attribute("management-minor-version").unwrap().is_u64());
    }
}
