//! Operation registry
//!
//! Provides [`OperationRegistry`], a concurrent catalog keyed by
//! `(resource type, operation name)`.

use crate::descriptor::OperationDescriptor;
use crate::visibility::{CallerContext, Visibility};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::collections::BTreeSet;
use std::sync::Arc;

/// Resource type under which global operations are registered
pub const GLOBAL_TYPE: &str = "*";

/// Registered descriptor plus its handler
#[derive(Debug, Clone)]
pub struct RegisteredOperation<H> {
    pub descriptor: Arc<OperationDescriptor>,
    pub handler: H,
}

/// Catalog of operations per resource type
///
/// Type-specific entries shadow global (`*`) entries of the same name.
/// Entries cannot be replaced once registered.
#[derive(Debug)]
pub struct OperationRegistry<H> {
    entries: DashMap<(String, String), RegisteredOperation<H>>,
}

impl<H> Default for OperationRegistry<H> {
    fn default() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }
}

impl<H: Clone> OperationRegistry<H> {
    /// Create empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an operation for `descriptor.target_resource_type`
    ///
    /// # Errors
    /// `RegistryError::DuplicateOperation` if the pair is already registered.
    pub fn register(&self, descriptor: OperationDescriptor, handler: H) -> Result<(), RegistryError> {
        let key = (
            descriptor.target_resource_type.clone(),
            descriptor.name.clone(),
        );
        match self.entries.entry(key) {
            Entry::Occupied(occupied) => Err(RegistryError::DuplicateOperation {
                resource_type: occupied.key().0.clone(),
                operation: occupied.key().1.clone(),
            }),
            Entry::Vacant(vacant) => {
                vacant.insert(RegisteredOperation {
                    descriptor: Arc::new(descriptor),
                    handler,
                });
                Ok(())
            }
        }
    }

    /// Find the entry for an operation on a resource type
    ///
    /// # Errors
    /// `RegistryError::UnknownOperation` for unregistered pairs.
    pub fn lookup(
        &self,
        resource_type: &str,
        operation: &str,
    ) -> Result<RegisteredOperation<H>, RegistryError> {
        self.entries
            .get(&(resource_type.to_string(), operation.to_string()))
            .or_else(|| {
                self.entries
                    .get(&(GLOBAL_TYPE.to_string(), operation.to_string()))
            })
            .map(|entry| entry.value().clone())
            .ok_or_else(|| RegistryError::UnknownOperation {
                resource_type: resource_type.to_string(),
                operation: operation.to_string(),
            })
    }

    /// Visibility of an operation
    ///
    /// # Errors
    /// `RegistryError::UnknownOperation` for unregistered pairs.
    pub fn classify(&self, resource_type: &str, operation: &str) -> Result<Visibility, RegistryError> {
        self.lookup(resource_type, operation)
            .map(|entry| entry.descriptor.visibility)
    }

    /// Callable from the given caller context
    ///
    /// # Errors
    /// `RegistryError::UnknownOperation` for unregistered pairs.
    pub fn is_callable(
        &self,
        resource_type: &str,
        operation: &str,
        caller: CallerContext,
    ) -> Result<bool, RegistryError> {
        self.classify(resource_type, operation)
            .map(|v| v.is_callable_from(caller))
    }

    /// Callable by a caller that is or is not internal
    ///
    /// # Errors
    /// `RegistryError::UnknownOperation` for unregistered pairs.
    pub fn is_callable_externally(
        &self,
        resource_type: &str,
        operation: &str,
        caller_is_internal: bool,
    ) -> Result<bool, RegistryError> {
        self.classify(resource_type, operation)
            .map(|v| v.is_callable_externally(caller_is_internal))
    }

    /// Lookup plus visibility check
    ///
    /// # Errors
    /// - `RegistryError::UnknownOperation` for unregistered pairs
    /// - `RegistryError::NotPermitted` if `caller` may not invoke it
    pub fn resolve(
        &self,
        resource_type: &str,
        operation: &str,
        caller: CallerContext,
    ) -> Result<RegisteredOperation<H>, RegistryError> {
        let entry = self.lookup(resource_type, operation)?;
        let visibility = entry.descriptor.visibility;
        if visibility.is_callable_from(caller) {
            Ok(entry)
        } else {
            Err(RegistryError::NotPermitted {
                operation: operation.to_string(),
                visibility,
                caller,
            })
        }
    }

    /// Introspectable operation names for a resource type, sorted
    #[must_use]
    pub fn introspectable_names(&self, resource_type: &str) -> Vec<String> {
        let mut shadowed = BTreeSet::new();
        let mut names = BTreeSet::new();
        for entry in &self.entries {
            let (ty, name) = entry.key();
            if ty == resource_type {
                shadowed.insert(name.clone());
                if entry.descriptor.visibility.is_introspectable() {
                    names.insert(name.clone());
                }
            }
        }
        for entry in &self.entries {
            let (ty, name) = entry.key();
            if ty == GLOBAL_TYPE
                && !shadowed.contains(name)
                && entry.descriptor.visibility.is_introspectable()
            {
                names.insert(name.clone());
            }
        }
        names.into_iter().collect()
    }

    /// Number of registered entries
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Registry errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    /// No such operation on the resource type
    #[error("operation '{operation}' is not registered for resource type '{resource_type}'")]
    UnknownOperation {
        resource_type: String,
        operation: String,
    },

    /// Pair registered twice
    #[error("operation '{operation}' already registered for resource type '{resource_type}'")]
    DuplicateOperation {
        resource_type: String,
        operation: String,
    },

    /// Visibility forbids this caller
    #[error("operation '{operation}' is {visibility} and cannot be invoked by a {caller} caller")]
    NotPermitted {
        operation: String,
        visibility: Visibility,
        caller: CallerContext,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::ActionEffect;

    fn registry() -> OperationRegistry<&'static str> {
        let registry = OperationRegistry::new();
        let ops = [
            ("read-resource", GLOBAL_TYPE, Visibility::Public, "global-read"),
            ("start", "server-config", Visibility::Public, "start"),
            ("private-op", "host", Visibility::Private, "private"),
            ("hidden-op", "host", Visibility::Hidden, "hidden"),
            ("domain-private-op", "root", Visibility::DomainPrivate, "domain-private"),
            ("domain-hidden-op", "root", Visibility::DomainHidden, "domain-hidden"),
            ("read-resource", "host", Visibility::Public, "host-read"),
        ];
        for (name, ty, visibility, handler) in ops {
            registry
                .register(
                    OperationDescriptor::new(name, ty, ActionEffect::ReadConfig)
                        .with_visibility(visibility),
                    handler,
                )
                .unwrap();
        }
        registry
    }

    #[test]
    fn duplicate_registration_fails() {
        let registry = registry();
        let err = registry
            .register(
                OperationDescriptor::new("start", "server-config", ActionEffect::WriteRuntime),
                "again",
            )
            .unwrap_err();
        assert!(matches!(err, RegistryError::DuplicateOperation { .. }));
        assert_eq!(registry.lookup("server-config", "start").unwrap().handler, "start");
    }

    #[test]
    fn type_specific_shadows_global() {
        let registry = registry();
        assert_eq!(registry.lookup("host", "read-resource").unwrap().handler, "host-read");
        assert_eq!(
            registry.lookup("profile", "read-resource").unwrap().handler,
            "global-read"
        );
    }

    #[test]
    fn unknown_operation() {
        let err = registry().classify("host", "explode").unwrap_err();
        assert!(matches!(err, RegistryError::UnknownOperation { .. }));
    }

    #[test]
    fn private_rejected_for_external_callers() {
        let registry = registry();
        assert!(!registry
            .is_callable_externally("host", "private-op", false)
            .unwrap());
        assert!(registry
            .is_callable_externally("host", "private-op", true)
            .unwrap());
        assert!(matches!(
            registry.resolve("root", "domain-private-op", CallerContext::External),
            Err(RegistryError::NotPermitted { .. })
        ));
        assert!(registry
            .resolve("root", "domain-hidden-op", CallerContext::External)
            .is_ok());
        assert!(registry
            .is_callable("host", "hidden-op", CallerContext::External)
            .unwrap());
    }

    #[test]
    fn listings_include_only_public() {
        let registry = registry();
        assert_eq!(registry.introspectable_names("host"), vec!["read-resource"]);
        assert!(registry.introspectable_names("root").iter().all(|n| n == "read-resource"));
        assert_eq!(
            registry.introspectable_names("server-config"),
            vec!["read-resource", "start"]
        );
    }
}
