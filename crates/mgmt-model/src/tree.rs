//! Shared resource tree
//!
//! [`ResourceTree`] guards the root [`Resource`] with a single-writer /
//! multiple-reader lock. A closure passed to [`ResourceTree::read`] sees one
//! consistent snapshot for its whole duration.

use crate::address::{PathAddress, PathElement};
use crate::codes;
use crate::resource::{Binding, Resource};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;

/// Top-level resource types accepted by default
pub const DEFAULT_TOP_LEVEL_TYPES: &[&str] = &[
    "host",
    "profile",
    "extension",
    "socket-binding-group",
    "deployment",
    "server-group",
    "management-client-content",
    "core-service",
    "interface",
    "path",
    "system-property",
];

/// Outcome of `validate-address`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub valid: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub problem: Option<String>,
}

impl ValidationResult {
    /// Address identifies an existing resource
    #[inline]
    #[must_use]
    pub fn valid() -> Self {
        Self {
            valid: true,
            problem: None,
        }
    }

    /// Address is invalid for the given reason
    #[inline]
    #[must_use]
    pub fn invalid(problem: impl Into<String>) -> Self {
        Self {
            valid: false,
            problem: Some(problem.into()),
        }
    }

    /// Management value form (`{valid, problem?}`)
    #[must_use]
    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

/// Walk `root` along `address`, matching one element at a time
///
/// Wildcard elements match every existing child of their type. The walk stops
/// at the first element with no match; nothing past it is inspected.
#[must_use]
pub fn validate_in(
    root: &Resource,
    top_level: &BTreeSet<String>,
    address: &PathAddress,
) -> ValidationResult {
    if let Some(first) = address.first() {
        if !top_level.contains(first.key()) {
            return ValidationResult::invalid(format!(
                "{}: '{}' is not a registered top-level resource type (segment '{first}')",
                codes::UNREGISTERED_TYPE,
                first.key()
            ));
        }
    }

    let mut current: Vec<&Resource> = vec![root];
    let mut walked = PathAddress::root();
    for element in address {
        current = current
            .into_iter()
            .flat_map(|node| matching(node, element))
            .collect();
        if current.is_empty() {
            return ValidationResult::invalid(format!(
                "{}: Management resource '{element}' not found under '{walked}'",
                codes::RESOURCE_NOT_FOUND
            ));
        }
        walked = walked.append(element.clone());
    }
    ValidationResult::valid()
}

fn matching<'a>(node: &'a Resource, element: &PathElement) -> Vec<&'a Resource> {
    node.children_of(element.key())
        .filter(|(name, _)| element.matches(element.key(), name))
        .map(|(_, child)| child)
        .collect()
}

/// Thread-safe resource tree
#[derive(Debug)]
pub struct ResourceTree {
    root: RwLock<Resource>,
    top_level: BTreeSet<String>,
}

impl ResourceTree {
    /// Create tree with the default top-level types
    #[must_use]
    pub fn new(root: Resource) -> Self {
        Self::with_top_level_types(root, DEFAULT_TOP_LEVEL_TYPES.iter().copied())
    }

    /// Create tree accepting the given top-level types
    #[must_use]
    pub fn with_top_level_types<'a>(
        root: Resource,
        types: impl IntoIterator<Item = &'a str>,
    ) -> Self {
        Self {
            root: RwLock::new(root),
            top_level: types.into_iter().map(str::to_string).collect(),
        }
    }

    #[inline]
    #[must_use]
    pub fn top_level_types(&self) -> &BTreeSet<String> {
        &self.top_level
    }

    #[inline]
    #[must_use]
    pub fn is_top_level_type(&self, key: &str) -> bool {
        self.top_level.contains(key)
    }

    /// Run `f` against a consistent snapshot
    pub fn read<R>(&self, f: impl FnOnce(&Resource) -> R) -> R {
        f(&self.root.read())
    }

    /// Run `f` with exclusive access
    pub fn write<R>(&self, f: impl FnOnce(&mut Resource) -> R) -> R {
        f(&mut self.root.write())
    }

    /// Clone the whole tree
    #[must_use]
    pub fn snapshot(&self) -> Resource {
        self.root.read().clone()
    }

    /// Replace the whole tree
    pub fn restore(&self, root: Resource) {
        *self.root.write() = root;
    }

    /// Check that `address` identifies an existing resource
    #[must_use]
    pub fn exists(&self, address: &PathAddress) -> bool {
        self.read(|root| root.navigate(address).is_some())
    }

    /// Validate an address against the live tree
    #[must_use]
    pub fn validate(&self, address: &PathAddress) -> ValidationResult {
        self.read(|root| validate_in(root, &self.top_level, address))
    }

    /// Concrete addresses selected by a (possibly wildcard) address
    #[must_use]
    pub fn expand(&self, pattern: &PathAddress) -> Vec<PathAddress> {
        self.read(|root| root.expand(pattern))
    }

    /// Attach `resource` at `address`
    ///
    /// # Errors
    /// - `TreeError::RootOperation` for the root address
    /// - `TreeError::UnregisteredType` for an unknown top-level type
    /// - `TreeError::ParentNotFound` if the parent is missing
    /// - `TreeError::Duplicate` if a resource already exists
    pub fn add(&self, address: &PathAddress, resource: Resource) -> Result<(), TreeError> {
        let (parent, last) = split(address)?;
        if parent.is_empty() && !self.is_top_level_type(last.key()) {
            return Err(TreeError::UnregisteredType {
                key: last.key().to_string(),
            });
        }
        self.write(|root| add_in(root, &parent, last, address, resource))
    }

    /// Detach the resource at `address` with all its children
    ///
    /// # Errors
    /// - `TreeError::NotFound` if nothing exists at `address`
    /// - `TreeError::ProtectedBinding` if the resource or a descendant is bound
    pub fn remove(&self, address: &PathAddress) -> Result<Resource, TreeError> {
        self.write(|root| remove_in(root, address))
    }

    /// Change one attribute, returning the previous value
    ///
    /// # Errors
    /// - `TreeError::NotFound` if nothing exists at `address`
    /// - `TreeError::ReadOnlyAttribute` for read-only attributes
    /// - `TreeError::ProtectedContent` beneath a protected resource
    pub fn write_attribute(
        &self,
        address: &PathAddress,
        name: &str,
        value: Value,
    ) -> Result<Option<Value>, TreeError> {
        self.write(|root| write_attribute_in(root, address, name, value))
    }

    /// Read one attribute (configuration or runtime)
    ///
    /// # Errors
    /// `TreeError::NotFound` or `TreeError::AttributeNotFound`
    pub fn read_attribute(&self, address: &PathAddress, name: &str) -> Result<Value, TreeError> {
        self.read(|root| read_attribute_in(root, address, name))
    }
}

fn split(address: &PathAddress) -> Result<(PathAddress, &PathElement), TreeError> {
    match (address.parent(), address.last()) {
        (Some(parent), Some(last)) if !last.is_wildcard() => Ok((parent, last)),
        (Some(_), Some(_)) => Err(TreeError::WildcardNotAllowed {
            address: address.to_string(),
        }),
        _ => Err(TreeError::RootOperation),
    }
}

/// Attach `resource` under `parent` (tree already locked)
///
/// # Errors
/// See [`ResourceTree::add`].
pub fn add_in(
    root: &mut Resource,
    parent: &PathAddress,
    last: &PathElement,
    address: &PathAddress,
    resource: Resource,
) -> Result<(), TreeError> {
    let node = root
        .navigate_mut(parent)
        .ok_or_else(|| TreeError::ParentNotFound {
            address: address.to_string(),
        })?;
    if node.child(last.key(), last.value()).is_some() {
        return Err(TreeError::Duplicate {
            address: address.to_string(),
        });
    }
    node.insert_child(last.key(), last.value(), resource);
    Ok(())
}

/// Detach the resource at `address` (tree already locked)
///
/// # Errors
/// See [`ResourceTree::remove`].
pub fn remove_in(root: &mut Resource, address: &PathAddress) -> Result<Resource, TreeError> {
    let (parent, last) = split(address)?;
    let target = root.navigate(address).ok_or_else(|| TreeError::NotFound {
        address: address.to_string(),
    })?;
    if let Some((relative, binding)) = target.find_binding() {
        let bound = address_join(address, &relative);
        return Err(TreeError::ProtectedBinding {
            address: address.to_string(),
            bound: bound.to_string(),
            binding,
        });
    }
    root.navigate_mut(&parent)
        .and_then(|node| node.remove_child(last.key(), last.value()))
        .ok_or_else(|| TreeError::NotFound {
            address: address.to_string(),
        })
}

/// Change one attribute (tree already locked)
///
/// # Errors
/// See [`ResourceTree::write_attribute`].
pub fn write_attribute_in(
    root: &mut Resource,
    address: &PathAddress,
    name: &str,
    value: Value,
) -> Result<Option<Value>, TreeError> {
    if under_protected(root, address) {
        return Err(TreeError::ProtectedContent {
            address: address.to_string(),
        });
    }
    let node = root
        .navigate_mut(address)
        .ok_or_else(|| TreeError::NotFound {
            address: address.to_string(),
        })?;
    if node.is_read_only(name) {
        return Err(TreeError::ReadOnlyAttribute {
            address: address.to_string(),
            attribute: name.to_string(),
        });
    }
    Ok(node.set_attribute(name, value))
}

/// Read one attribute (tree already locked)
///
/// # Errors
/// See [`ResourceTree::read_attribute`].
pub fn read_attribute_in(
    root: &Resource,
    address: &PathAddress,
    name: &str,
) -> Result<Value, TreeError> {
    let node = root.navigate(address).ok_or_else(|| TreeError::NotFound {
        address: address.to_string(),
    })?;
    node.attribute(name)
        .or_else(|| node.runtime_attribute(name))
        .cloned()
        .or_else(|| {
            (name == "runtime-state")
                .then(|| node.runtime_state().map(|s| Value::String(s.as_str().into())))
                .flatten()
        })
        .ok_or_else(|| TreeError::AttributeNotFound {
            address: address.to_string(),
            attribute: name.to_string(),
        })
}

/// Check whether the resource at `address` or one of its ancestors is protected
#[must_use]
pub fn under_protected(root: &Resource, address: &PathAddress) -> bool {
    let mut node = root;
    for element in address {
        match node.child(element.key(), element.value()) {
            Some(child) if child.is_protected() => return true,
            Some(child) => node = child,
            None => return false,
        }
    }
    false
}

fn address_join(base: &PathAddress, relative: &PathAddress) -> PathAddress {
    relative
        .iter()
        .fold(base.clone(), |acc, e| acc.append(e.clone()))
}

/// Errors raised by tree mutations
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TreeError {
    /// No resource at address
    #[error("resource '{address}' not found")]
    NotFound { address: String },

    /// Parent of a new resource is missing
    #[error("parent of '{address}' not found")]
    ParentNotFound { address: String },

    /// Resource already exists
    #[error("resource '{address}' already exists")]
    Duplicate { address: String },

    /// First address element is not a registered top-level type
    #[error("'{key}' is not a registered top-level resource type")]
    UnregisteredType { key: String },

    /// Resource or descendant cannot be detached
    #[error("cannot remove '{address}': '{bound}' is {binding}")]
    ProtectedBinding {
        address: String,
        bound: String,
        binding: Binding,
    },

    /// Attribute cannot be written
    #[error("attribute '{attribute}' of '{address}' is read-only")]
    ReadOnlyAttribute { address: String, attribute: String },

    /// Content beneath a protected resource is changed through add/remove only
    #[error("'{address}' is protected content and can only be changed by add or remove")]
    ProtectedContent { address: String },

    /// Attribute not present
    #[error("attribute '{attribute}' not found on '{address}'")]
    AttributeNotFound { address: String, attribute: String },

    /// Wildcard used where a concrete address is needed
    #[error("wildcard address '{address}' not allowed here")]
    WildcardNotAllowed { address: String },

    /// Root cannot be added or removed
    #[error("the root resource cannot be added or removed")]
    RootOperation,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::RuntimeState;
    use proptest::prelude::*;
    use serde_json::json;

    fn domain() -> ResourceTree {
        let root = Resource::new()
            .with_child(
                "host",
                "primary",
                Resource::new()
                    .with_child(
                        "server-config",
                        "server-one",
                        Resource::new().with_attribute("group", "main-server-group"),
                    )
                    .with_child(
                        "server-config",
                        "server-two",
                        Resource::new()
                            .with_attribute("group", "main-server-group")
                            .with_runtime_state(RuntimeState::Running),
                    ),
            )
            .with_child("profile", "default", Resource::new())
            .with_child(
                "management-client-content",
                "rollout-plans",
                Resource::new().protected().with_child_type("rollout-plan"),
            );
        ResourceTree::new(root)
    }

    fn addr(raw: &str) -> PathAddress {
        PathAddress::resolve(raw).unwrap()
    }

    #[test]
    fn validate_existing_addresses() {
        let tree = domain();
        for raw in ["/", "/host=primary", "/host=primary/server-config=server-one", "/profile=default"] {
            let result = tree.validate(&addr(raw));
            assert!(result.valid, "{raw}");
            assert!(result.problem.is_none());
        }
    }

    #[test]
    fn validate_reports_first_bad_segment() {
        let tree = domain();
        let result = tree.validate(&addr("/host=primary/server-config=bogus/jvm=*"));
        assert!(!result.valid);
        let problem = result.problem.unwrap();
        assert!(problem.contains("server-config=bogus"), "{problem}");
        assert!(problem.contains(codes::RESOURCE_NOT_FOUND));
        assert!(!problem.contains("jvm"));
    }

    #[test]
    fn validate_wildcard_matches_existing_children() {
        let tree = domain();
        assert!(tree.validate(&addr("/host=*/server-config=*")).valid);
        assert!(!tree.validate(&addr("/host=*/server=*")).valid);
        assert!(!tree.validate(&addr("/host=nope/server-config=*")).valid);
    }

    #[test]
    fn validate_rejects_unregistered_top_level_type() {
        let result = domain().validate(&addr("/bogus=thing"));
        assert!(!result.valid);
        assert!(result.problem.unwrap().contains(codes::UNREGISTERED_TYPE));
    }

    #[test]
    fn add_checks_parent_duplicate_and_type() {
        let tree = domain();
        tree.add(&addr("/profile=full"), Resource::new()).unwrap();
        assert!(tree.exists(&addr("/profile=full")));
        assert!(matches!(
            tree.add(&addr("/profile=full"), Resource::new()),
            Err(TreeError::Duplicate { .. })
        ));
        assert!(matches!(
            tree.add(&addr("/host=nope/server-config=x"), Resource::new()),
            Err(TreeError::ParentNotFound { .. })
        ));
        assert!(matches!(
            tree.add(&addr("/bogus=x"), Resource::new()),
            Err(TreeError::UnregisteredType { .. })
        ));
        assert!(matches!(
            tree.add(&PathAddress::root(), Resource::new()),
            Err(TreeError::RootOperation)
        ));
    }

    #[test]
    fn remove_fails_on_live_descendant() {
        let tree = domain();
        let err = tree.remove(&addr("/host=primary")).unwrap_err();
        match err {
            TreeError::ProtectedBinding { bound, .. } => {
                assert_eq!(bound, "/host=primary/server-config=server-two");
            }
            other => panic!("unexpected {other:?}"),
        }
        tree.remove(&addr("/host=primary/server-config=server-one"))
            .unwrap();
        assert!(!tree.exists(&addr("/host=primary/server-config=server-one")));
    }

    #[test]
    fn protected_content_is_add_remove_only() {
        let tree = domain();
        let plan = addr("/management-client-content=rollout-plans/rollout-plan=p");
        tree.add(&plan, Resource::new().with_attribute("content", json!({})))
            .unwrap();
        assert!(matches!(
            tree.write_attribute(&plan, "content", json!({"x": 1})),
            Err(TreeError::ProtectedContent { .. })
        ));
        tree.remove(&plan).unwrap();
        assert!(matches!(
            tree.remove(&addr("/management-client-content=rollout-plans")),
            Err(TreeError::ProtectedBinding { .. })
        ));
    }

    #[test]
    fn read_only_attributes_reject_writes() {
        let tree = ResourceTree::new(Resource::new().with_read_only_attribute("release-version", "1.0"));
        assert!(matches!(
            tree.write_attribute(&PathAddress::root(), "release-version", json!("2.0")),
            Err(TreeError::ReadOnlyAttribute { .. })
        ));
        assert_eq!(
            tree.read_attribute(&PathAddress::root(), "release-version")
                .unwrap(),
            json!("1.0")
        );
    }

    #[test]
    fn snapshot_restore() {
        let tree = domain();
        let before = tree.snapshot();
        tree.add(&addr("/profile=ha"), Resource::new()).unwrap();
        tree.restore(before);
        assert!(!tree.exists(&addr("/profile=ha")));
    }

    proptest! {
        #[test]
        fn prop_invalid_segment_is_named(index in 0usize..3, bogus in "[a-z]{3,8}x") {
            let tree = domain();
            let mut elements = vec![
                PathElement::new("host", "primary"),
                PathElement::new("server-config", "server-one"),
            ];
            elements.truncate(index.min(2));
            elements.push(PathElement::new("server-config", bogus.clone()));
            let result = tree.validate(&PathAddress::new(elements));
            prop_assert!(!result.valid);
            let problem = result.problem.unwrap_or_default();
            let expected = format!("server-config={bogus}");
            prop_assert!(problem.contains(&expected));
        }
    }
}
