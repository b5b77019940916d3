//! Roles and principals

use crate::RbacError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

/// Domain-wide role
///
/// Declaration order is the privilege ranking; `Auditor` sits outside it
/// (reads everything, writes only audit resources).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum StandardRole {
    Monitor,
    Operator,
    Maintainer,
    Deployer,
    Administrator,
    Auditor,
    SuperUser,
}

impl StandardRole {
    /// Every standard role
    pub const ALL: [Self; 7] = [
        Self::Monitor,
        Self::Operator,
        Self::Maintainer,
        Self::Deployer,
        Self::Administrator,
        Self::Auditor,
        Self::SuperUser,
    ];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Monitor => "Monitor",
            Self::Operator => "Operator",
            Self::Maintainer => "Maintainer",
            Self::Deployer => "Deployer",
            Self::Administrator => "Administrator",
            Self::Auditor => "Auditor",
            Self::SuperUser => "SuperUser",
        }
    }

    /// Nominal privilege level
    #[must_use]
    pub fn level(self) -> u8 {
        match self {
            Self::Monitor | Self::Auditor => 0,
            Self::Operator => 1,
            Self::Maintainer => 2,
            Self::Deployer => 3,
            Self::Administrator => 4,
            Self::SuperUser => 5,
        }
    }

    /// Parse a role name, ignoring case
    #[must_use]
    pub fn parse(name: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|role| role.as_str().eq_ignore_ascii_case(name))
    }
}

impl Display for StandardRole {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StandardRole {
    type Err = RbacError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s).ok_or_else(|| RbacError::UnknownRole(s.to_string()))
    }
}

/// Role held by a principal for one request
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Role {
    /// Grant over the whole tree
    Standard(StandardRole),
    /// Grant restricted to the listed hosts
    HostScoped {
        name: String,
        base: StandardRole,
        hosts: BTreeSet<String>,
    },
    /// Grant restricted to the listed server-groups
    ServerGroupScoped {
        name: String,
        base: StandardRole,
        groups: BTreeSet<String>,
    },
}

impl Role {
    /// Role name as used in role mappings
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::Standard(role) => role.as_str(),
            Self::HostScoped { name, .. } | Self::ServerGroupScoped { name, .. } => name,
        }
    }

    /// Privileges the role grants within its scope
    #[must_use]
    pub fn base(&self) -> StandardRole {
        match self {
            Self::Standard(role) => *role,
            Self::HostScoped { base, .. } | Self::ServerGroupScoped { base, .. } => *base,
        }
    }

    #[inline]
    #[must_use]
    pub fn is_scoped(&self) -> bool {
        !matches!(self, Self::Standard(_))
    }
}

impl Display for Role {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Authenticated caller
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Principal {
    pub name: String,
    #[serde(default)]
    pub groups: BTreeSet<String>,
}

impl Principal {
    /// Create user principal
    #[must_use]
    pub fn user(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            groups: BTreeSet::new(),
        }
    }

    /// With group membership
    #[must_use]
    pub fn with_group(mut self, group: impl Into<String>) -> Self {
        self.groups.insert(group.into());
        self
    }

    /// Check whether a `user:<name>` / `group:<name>` reference selects this principal
    #[must_use]
    pub fn matches(&self, reference: &PrincipalRef) -> bool {
        match reference {
            PrincipalRef::User(name) => *name == self.name,
            PrincipalRef::Group(name) => self.groups.contains(name),
        }
    }
}

/// Principal reference used by role mappings
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PrincipalRef {
    User(String),
    Group(String),
}

impl FromStr for PrincipalRef {
    type Err = String;

    /// `user:<name>`, `group:<name>`, or a bare user name
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once(':') {
            Some(("user", name)) if !name.is_empty() => Ok(Self::User(name.to_string())),
            Some(("group", name)) if !name.is_empty() => Ok(Self::Group(name.to_string())),
            Some(_) => Err(format!("invalid principal reference '{s}'")),
            None if !s.is_empty() => Ok(Self::User(s.to_string())),
            None => Err("empty principal reference".to_string()),
        }
    }
}

impl Display for PrincipalRef {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::User(name) => write!(f, "user:{name}"),
            Self::Group(name) => write!(f, "group:{name}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_role_names_parse_case_insensitively() {
        assert_eq!(StandardRole::parse("superuser"), Some(StandardRole::SuperUser));
        assert_eq!("MONITOR".parse::<StandardRole>().unwrap(), StandardRole::Monitor);
        assert!("Janitor".parse::<StandardRole>().is_err());
    }

    #[test]
    fn ranking() {
        assert!(StandardRole::Monitor.level() < StandardRole::Operator.level());
        assert!(StandardRole::Maintainer.level() < StandardRole::Administrator.level());
        assert!(StandardRole::Administrator.level() < StandardRole::SuperUser.level());
    }

    #[test]
    fn principal_references() {
        let alice = Principal::user("alice").with_group("ops");
        assert!(alice.matches(&"user:alice".parse().unwrap()));
        assert!(alice.matches(&"group:ops".parse().unwrap()));
        assert!(alice.matches(&"alice".parse().unwrap()));
        assert!(!alice.matches(&"group:dev".parse().unwrap()));
        assert!("robot:x".parse::<PrincipalRef>().is_err());
    }

    #[test]
    fn scoped_role_name_and_base() {
        let role = Role::HostScoped {
            name: "primary-admins".into(),
            base: StandardRole::Administrator,
            hosts: BTreeSet::from(["primary".to_string()]),
        };
        assert_eq!(role.name(), "primary-admins");
        assert_eq!(role.base(), StandardRole::Administrator);
        assert!(role.is_scoped());
    }
}
