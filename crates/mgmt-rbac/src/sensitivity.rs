//! Sensitivity classifications
//!
//! A classification raises the minimum privilege needed to read or write the
//! resources and attributes it covers, independent of the action's base
//! requirement.

use crate::role::StandardRole;
use mgmt_model::PathAddress;
use once_cell::sync::Lazy;

/// Minimum privilege for an action
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Requirement {
    /// Role of at least this level
    AtLeast(StandardRole),
    /// Auditor or SuperUser only
    Audit,
}

impl Requirement {
    /// Stricter of two requirements
    #[must_use]
    pub fn max(self, other: Self) -> Self {
        match (self, other) {
            (Self::Audit, _) | (_, Self::Audit) => Self::Audit,
            (Self::AtLeast(a), Self::AtLeast(b)) => {
                Self::AtLeast(if b.level() > a.level() { b } else { a })
            }
        }
    }
}

/// What a classification covers
#[derive(Debug, Clone, Copy)]
pub enum Matcher {
    /// Any resource whose address contains an element of this type
    ResourceType(&'static str),
    /// Resources at or below this address
    Subtree(&'static [(&'static str, &'static str)]),
    /// An attribute of this name on any resource
    Attribute(&'static str),
}

/// One sensitivity classification
#[derive(Debug, Clone)]
pub struct SensitivityClass {
    pub name: &'static str,
    pub matchers: Vec<Matcher>,
    pub read: Option<Requirement>,
    pub write: Option<Requirement>,
}

impl SensitivityClass {
    /// Check whether the class covers `address` (resource level)
    #[must_use]
    pub fn covers_resource(&self, address: &PathAddress) -> bool {
        self.matchers.iter().any(|m| match m {
            Matcher::ResourceType(ty) => address.iter().any(|e| e.key() == *ty),
            Matcher::Subtree(prefix) => {
                prefix.len() <= address.len()
                    && prefix
                        .iter()
                        .zip(address.iter())
                        .all(|((k, v), e)| e.key() == *k && e.value() == *v)
            }
            Matcher::Attribute(_) => false,
        })
    }

    /// Check whether the class covers the attribute `name`
    #[must_use]
    pub fn covers_attribute(&self, name: &str) -> bool {
        self.matchers
            .iter()
            .any(|m| matches!(m, Matcher::Attribute(attr) if *attr == name))
    }

    /// Requirement this class imposes on a read or write
    #[inline]
    #[must_use]
    pub fn requirement(&self, write: bool) -> Option<Requirement> {
        if write {
            self.write
        } else {
            self.read
        }
    }
}

/// Built-in classifications
pub static CLASSIFICATIONS: Lazy<Vec<SensitivityClass>> = Lazy::new(|| {
    vec![
        SensitivityClass {
            name: "credential",
            matchers: vec![
                Matcher::Attribute("password"),
                Matcher::Attribute("credential-reference"),
            ],
            read: Some(Requirement::AtLeast(StandardRole::Administrator)),
            write: Some(Requirement::AtLeast(StandardRole::Administrator)),
        },
        SensitivityClass {
            name: "socket-config",
            matchers: vec![
                Matcher::ResourceType("socket-binding-group"),
                Matcher::ResourceType("interface"),
            ],
            read: None,
            write: Some(Requirement::AtLeast(StandardRole::Administrator)),
        },
        SensitivityClass {
            name: "access-control",
            matchers: vec![Matcher::Subtree(&[
                ("core-service", "management"),
                ("access", "authorization"),
            ])],
            read: Some(Requirement::AtLeast(StandardRole::Administrator)),
            write: Some(Requirement::AtLeast(StandardRole::SuperUser)),
        },
        SensitivityClass {
            name: "audit",
            matchers: vec![Matcher::Subtree(&[
                ("core-service", "management"),
                ("access", "audit"),
            ])],
            read: Some(Requirement::Audit),
            write: Some(Requirement::Audit),
        },
        SensitivityClass {
            name: "management-client-content",
            matchers: vec![Matcher::ResourceType("management-client-content")],
            read: None,
            write: Some(Requirement::AtLeast(StandardRole::Maintainer)),
        },
    ]
});

/// Classes covering the resource at `address`
pub fn resource_classes(address: &PathAddress) -> impl Iterator<Item = &'static SensitivityClass> + '_ {
    CLASSIFICATIONS
        .iter()
        .filter(move |class| class.covers_resource(address))
}

/// Classes covering the attribute `name`
pub fn attribute_classes(name: &str) -> impl Iterator<Item = &'static SensitivityClass> + '_ {
    CLASSIFICATIONS
        .iter()
        .filter(move |class| class.covers_attribute(name))
}

/// Check whether an attribute is sensitive at all
#[must_use]
pub fn is_sensitive_attribute(name: &str) -> bool {
    attribute_classes(name).next().is_some()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(raw: &str) -> PathAddress {
        PathAddress::resolve(raw).unwrap()
    }

    #[test]
    fn subtree_matching() {
        let names: Vec<_> = resource_classes(&addr(
            "/core-service=management/access=authorization/role-mapping=Monitor",
        ))
        .map(|c| c.name)
        .collect();
        assert_eq!(names, vec!["access-control"]);
        assert_eq!(resource_classes(&addr("/core-service=management")).count(), 0);
    }

    #[test]
    fn resource_type_matching_anywhere_in_address() {
        let names: Vec<_> = resource_classes(&addr("/host=primary/interface=public"))
            .map(|c| c.name)
            .collect();
        assert_eq!(names, vec!["socket-config"]);
    }

    #[test]
    fn credential_attributes() {
        assert!(is_sensitive_attribute("password"));
        assert!(!is_sensitive_attribute("group"));
    }

    #[test]
    fn audit_dominates() {
        let admin = Requirement::AtLeast(StandardRole::Administrator);
        assert_eq!(admin.max(Requirement::Audit), Requirement::Audit);
        assert_eq!(
            Requirement::AtLeast(StandardRole::Operator).max(admin),
            admin
        );
    }
}
