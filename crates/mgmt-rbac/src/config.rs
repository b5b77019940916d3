//! Authorization configuration read from the model
//!
//! Lives under `core-service=management/access=authorization`:
//!
//! ```text
//! access=authorization            provider = "rbac" | "simple"
//!   role-mapping=<ROLE>           include-all, include = [...], exclude = [...]
//!   host-scoped-role=<NAME>       base-role, hosts = [...]
//!   server-group-scoped-role=<N>  base-role, server-groups = [...]
//! ```

use crate::role::{PrincipalRef, Role, StandardRole};
use crate::RbacError;
use mgmt_model::{PathAddress, Resource};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};

/// Address of the authorization resource
pub const AUTHORIZATION_ADDRESS: &[(&str, &str)] =
    &[("core-service", "management"), ("access", "authorization")];

/// Authorization provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Provider {
    /// Every authenticated principal is a SuperUser
    Simple,
    /// Role mappings apply
    #[default]
    Rbac,
}

/// Principals mapped to one role
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RoleMapping {
    pub include_all: bool,
    pub include: BTreeSet<PrincipalRef>,
    pub exclude: BTreeSet<PrincipalRef>,
}

/// Base role plus the hosts or groups it is limited to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScopedRoleDefinition {
    pub base: StandardRole,
    pub targets: BTreeSet<String>,
}

/// Parsed authorization subtree
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AuthorizationConfig {
    pub provider: Provider,
    /// Role name (as written) to mapping
    pub mappings: BTreeMap<String, RoleMapping>,
    pub host_scoped: BTreeMap<String, ScopedRoleDefinition>,
    pub server_group_scoped: BTreeMap<String, ScopedRoleDefinition>,
}

impl AuthorizationConfig {
    /// Read the configuration from the domain model
    ///
    /// A model without an authorization resource yields the default (RBAC
    /// with no mappings, so every request is denied).
    ///
    /// # Errors
    /// `RbacError::InvalidConfig` for malformed entries.
    pub fn from_model(model: &Resource) -> Result<Self, RbacError> {
        let address = PathAddress::from_pairs(AUTHORIZATION_ADDRESS);
        let Some(authz) = model.navigate(&address) else {
            return Ok(Self::default());
        };

        let provider = match authz.attribute_str("provider") {
            None | Some("rbac") => Provider::Rbac,
            Some("simple") => Provider::Simple,
            Some(other) => {
                return Err(invalid(&address, format!("unknown provider '{other}'")));
            }
        };

        let mut config = Self {
            provider,
            ..Self::default()
        };
        for (name, mapping) in authz.children_of("role-mapping") {
            let at = address.child("role-mapping", name.as_str());
            config.mappings.insert(
                name.clone(),
                RoleMapping {
                    include_all: mapping
                        .attribute("include-all")
                        .and_then(Value::as_bool)
                        .unwrap_or(false),
                    include: principal_refs(mapping, "include", &at)?,
                    exclude: principal_refs(mapping, "exclude", &at)?,
                },
            );
        }
        for (name, role) in authz.children_of("host-scoped-role") {
            let at = address.child("host-scoped-role", name.as_str());
            config
                .host_scoped
                .insert(name.clone(), scoped_definition(role, "hosts", &at)?);
        }
        for (name, role) in authz.children_of("server-group-scoped-role") {
            let at = address.child("server-group-scoped-role", name.as_str());
            config
                .server_group_scoped
                .insert(name.clone(), scoped_definition(role, "server-groups", &at)?);
        }
        Ok(config)
    }

    /// Turn a role name into a role, standard names first
    ///
    /// # Errors
    /// `RbacError::UnknownRole` if nothing defines `name`.
    pub fn role_named(&self, name: &str) -> Result<Role, RbacError> {
        if let Some(standard) = StandardRole::parse(name) {
            return Ok(Role::Standard(standard));
        }
        if let Some((name, def)) = find_ignore_case(&self.host_scoped, name) {
            return Ok(Role::HostScoped {
                name: name.clone(),
                base: def.base,
                hosts: def.targets.clone(),
            });
        }
        if let Some((name, def)) = find_ignore_case(&self.server_group_scoped, name) {
            return Ok(Role::ServerGroupScoped {
                name: name.clone(),
                base: def.base,
                groups: def.targets.clone(),
            });
        }
        Err(RbacError::UnknownRole(name.to_string()))
    }
}

fn find_ignore_case<'a, V>(map: &'a BTreeMap<String, V>, name: &str) -> Option<(&'a String, &'a V)> {
    map.iter().find(|(key, _)| key.eq_ignore_ascii_case(name))
}

fn strings(resource: &Resource, attribute: &str, at: &PathAddress) -> Result<Vec<String>, RbacError> {
    match resource.attribute(attribute) {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(Value::String(single)) => Ok(vec![single.clone()]),
        Some(Value::Array(items)) => items
            .iter()
            .map(|item| {
                item.as_str()
                    .map(str::to_string)
                    .ok_or_else(|| invalid(at, format!("'{attribute}' entries must be strings")))
            })
            .collect(),
        Some(_) => Err(invalid(at, format!("'{attribute}' must be a list of strings"))),
    }
}

fn principal_refs(
    resource: &Resource,
    attribute: &str,
    at: &PathAddress,
) -> Result<BTreeSet<PrincipalRef>, RbacError> {
    strings(resource, attribute, at)?
        .iter()
        .map(|raw| raw.parse::<PrincipalRef>().map_err(|reason| invalid(at, reason)))
        .collect()
}

fn scoped_definition(
    resource: &Resource,
    targets: &str,
    at: &PathAddress,
) -> Result<ScopedRoleDefinition, RbacError> {
    let base = resource
        .attribute_str("base-role")
        .ok_or_else(|| invalid(at, "missing 'base-role'".to_string()))?;
    let base = StandardRole::parse(base)
        .ok_or_else(|| invalid(at, format!("unknown base-role '{base}'")))?;
    Ok(ScopedRoleDefinition {
        base,
        targets: strings(resource, targets, at)?.into_iter().collect(),
    })
}

fn invalid(at: &PathAddress, reason: String) -> RbacError {
    RbacError::InvalidConfig {
        address: at.to_string(),
        reason,
    }
}
