//! Authorization decisions
//!
//! [`Authorizer`] borrows the domain model for one request. It derives the
//! caller's roles, resolves the topology scope of each target and combines
//! the per-role verdicts: ALLOW if any role grants, otherwise DENY with the
//! most specific reason.

use crate::config::{AuthorizationConfig, Provider};
use crate::role::{Principal, Role, StandardRole};
use crate::scope::TargetScope;
use crate::sensitivity::{self, Requirement};
use crate::RbacError;
use mgmt_model::{PathAddress, RenderFilter, Resource};
use mgmt_ops::ActionEffect;
use serde_json::{json, Value};
use std::collections::BTreeSet;
use std::fmt::{self, Display, Formatter};
use tracing::{debug, trace};

/// Action to authorize
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessRequest {
    pub address: PathAddress,
    pub effect: ActionEffect,
    /// Attributes read or written by the action
    pub attributes: Vec<String>,
}

impl AccessRequest {
    /// Create request with no attributes
    #[must_use]
    pub fn new(address: PathAddress, effect: ActionEffect) -> Self {
        Self {
            address,
            effect,
            attributes: Vec::new(),
        }
    }

    /// With an attribute touched by the action
    #[must_use]
    pub fn with_attribute(mut self, name: impl Into<String>) -> Self {
        self.attributes.push(name.into());
        self
    }
}

/// Why access was denied, from least to most specific
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum DenyReason {
    /// Principal maps to no role
    NoRoles,
    /// Target lies outside the role's hosts or server-groups
    OutOfScope { role: String, target: String },
    /// Base role ranks too low for the action
    InsufficientRole { role: String, required: StandardRole },
    /// A sensitivity classification raised the requirement
    Sensitivity {
        role: String,
        classification: &'static str,
    },
}

impl Display for DenyReason {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoRoles => f.write_str("no roles are mapped to the caller"),
            Self::OutOfScope { role, target } => {
                write!(f, "'{target}' is outside the scope of role '{role}'")
            }
            Self::InsufficientRole { role, required } => {
                write!(f, "role '{role}' is insufficient, at least '{required}' is required")
            }
            Self::Sensitivity {
                role,
                classification,
            } => write!(
                f,
                "'{classification}' sensitivity constraint is not satisfied by role '{role}'"
            ),
        }
    }
}

/// Authorization outcome
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Allow,
    Deny(DenyReason),
}

impl Decision {
    #[inline]
    #[must_use]
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allow)
    }
}

/// Children and attributes elided from a filtered read
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FilterReport {
    pub children: Vec<String>,
    pub attributes: Vec<String>,
}

impl FilterReport {
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.children.is_empty() && self.attributes.is_empty()
    }

    /// `response-headers.access-control` value
    #[must_use]
    pub fn to_value(&self) -> Value {
        json!({
            "filtered-children": self.children,
            "filtered-attributes": self.attributes,
        })
    }
}

/// Per-request authorizer over a model snapshot
#[derive(Debug, Clone)]
pub struct Authorizer<'m> {
    model: &'m Resource,
    config: AuthorizationConfig,
}

impl<'m> Authorizer<'m> {
    /// Read the authorization configuration from `model`
    ///
    /// # Errors
    /// `RbacError::InvalidConfig` for a malformed authorization subtree.
    pub fn new(model: &'m Resource) -> Result<Self, RbacError> {
        Ok(Self {
            model,
            config: AuthorizationConfig::from_model(model)?,
        })
    }

    /// Use an explicit configuration
    #[must_use]
    pub fn with_config(model: &'m Resource, config: AuthorizationConfig) -> Self {
        Self { model, config }
    }

    #[inline]
    #[must_use]
    pub fn config(&self) -> &AuthorizationConfig {
        &self.config
    }

    /// Roles held by `principal` for this request
    ///
    /// `run_as` (the `roles` operation header) replaces the mapped set, and
    /// is only honoured for principals holding `SuperUser`.
    ///
    /// # Errors
    /// `RbacError::UnknownRole` if `run_as` names an undefined role.
    pub fn roles_for(
        &self,
        principal: &Principal,
        run_as: Option<&[String]>,
    ) -> Result<BTreeSet<Role>, RbacError> {
        let mapped = self.mapped_roles(principal);
        let Some(requested) = run_as else {
            return Ok(mapped);
        };
        if !mapped.contains(&Role::Standard(StandardRole::SuperUser)) {
            debug!(principal = %principal.name, "ignoring run-as roles for non-SuperUser");
            return Ok(mapped);
        }
        requested
            .iter()
            .map(|name| self.config.role_named(name))
            .collect()
    }

    fn mapped_roles(&self, principal: &Principal) -> BTreeSet<Role> {
        if self.config.provider == Provider::Simple {
            return BTreeSet::from([Role::Standard(StandardRole::SuperUser)]);
        }
        let mut roles = BTreeSet::new();
        for (name, mapping) in &self.config.mappings {
            if mapping.exclude.iter().any(|r| principal.matches(r)) {
                continue;
            }
            if !(mapping.include_all || mapping.include.iter().any(|r| principal.matches(r))) {
                continue;
            }
            match self.config.role_named(name) {
                Ok(role) => {
                    roles.insert(role);
                }
                Err(err) => debug!(%err, "role mapping names an undefined role"),
            }
        }
        roles
    }

    /// Topology scope of an address in this model
    #[must_use]
    pub fn scope_of(&self, address: &PathAddress) -> TargetScope {
        TargetScope::resolve(self.model, address)
    }

    /// Decide whether any of `roles` may perform `request`
    #[must_use]
    pub fn decide(&self, roles: &BTreeSet<Role>, request: &AccessRequest) -> Decision {
        let scope = self.scope_of(&request.address);
        let mut reason = DenyReason::NoRoles;
        for role in roles {
            match evaluate(role, request, &scope) {
                Ok(()) => return Decision::Allow,
                Err(denied) => reason = reason.max(denied),
            }
        }
        trace!(address = %request.address, effect = ?request.effect, %reason, "access denied");
        Decision::Deny(reason)
    }

    /// Derive roles and decide in one step
    ///
    /// # Errors
    /// See [`Authorizer::roles_for`].
    pub fn authorize(
        &self,
        principal: &Principal,
        run_as: Option<&[String]>,
        request: &AccessRequest,
    ) -> Result<Decision, RbacError> {
        let roles = self.roles_for(principal, run_as)?;
        Ok(self.decide(&roles, request))
    }

    /// Filter verdict for one resource of a read, recording what was elided
    pub fn read_filter(
        &self,
        roles: &BTreeSet<Role>,
        address: &PathAddress,
        resource: &Resource,
        effect: ActionEffect,
        report: &mut FilterReport,
    ) -> RenderFilter {
        if !self
            .decide(roles, &AccessRequest::new(address.clone(), effect))
            .is_allowed()
        {
            report.children.push(address.to_string());
            return RenderFilter::hidden();
        }
        let hidden_attributes: Vec<String> = resource
            .attributes()
            .keys()
            .chain(resource.runtime_attributes().keys())
            .filter(|name| sensitivity::is_sensitive_attribute(name))
            .filter(|name| {
                !self
                    .decide(
                        roles,
                        &AccessRequest::new(address.clone(), effect).with_attribute(name.as_str()),
                    )
                    .is_allowed()
            })
            .cloned()
            .collect();
        report
            .attributes
            .extend(hidden_attributes.iter().map(|name| format!("{address}:{name}")));
        RenderFilter {
            hidden: false,
            hidden_attributes,
        }
    }
}

/// Verdict of a single role
fn evaluate(role: &Role, request: &AccessRequest, scope: &TargetScope) -> Result<(), DenyReason> {
    check_privilege(role, request)?;
    check_scope(role, request, scope)
}

fn check_privilege(role: &Role, request: &AccessRequest) -> Result<(), DenyReason> {
    let write = request.effect.is_write();
    let base = base_requirement(request.effect);

    let mut required = base;
    let mut raised_by = None;
    if request.effect != ActionEffect::Address {
        let classes = sensitivity::resource_classes(&request.address).chain(
            request
                .attributes
                .iter()
                .flat_map(|name| sensitivity::attribute_classes(name)),
        );
        for class in classes {
            if let Some(requirement) = class.requirement(write) {
                let next = required.max(requirement);
                if next != required {
                    raised_by = Some(class.name);
                }
                required = next;
            }
        }
    }

    if grants(role.base(), required, write, &request.address) {
        return Ok(());
    }
    let role = role.name().to_string();
    Err(match raised_by {
        Some(classification) => DenyReason::Sensitivity {
            role,
            classification,
        },
        None => DenyReason::InsufficientRole {
            role,
            required: match required {
                Requirement::AtLeast(min) => min,
                Requirement::Audit => StandardRole::Auditor,
            },
        },
    })
}

fn base_requirement(effect: ActionEffect) -> Requirement {
    Requirement::AtLeast(match effect {
        ActionEffect::Address | ActionEffect::ReadConfig | ActionEffect::ReadRuntime => {
            StandardRole::Monitor
        }
        ActionEffect::WriteRuntime => StandardRole::Operator,
        ActionEffect::WriteConfig => StandardRole::Maintainer,
    })
}

fn grants(base: StandardRole, required: Requirement, write: bool, address: &PathAddress) -> bool {
    match (base, required) {
        (StandardRole::SuperUser, _) => true,
        (StandardRole::Auditor, Requirement::Audit) => true,
        (StandardRole::Auditor, Requirement::AtLeast(_)) => !write,
        (_, Requirement::Audit) => false,
        (role, Requirement::AtLeast(min)) => effective_level(role, address) >= min.level(),
    }
}

fn effective_level(role: StandardRole, address: &PathAddress) -> u8 {
    match role {
        StandardRole::Deployer if address.iter().any(|e| e.key() == "deployment") => {
            StandardRole::Maintainer.level()
        }
        StandardRole::Deployer => StandardRole::Monitor.level(),
        other => other.level(),
    }
}

fn check_scope(role: &Role, request: &AccessRequest, scope: &TargetScope) -> Result<(), DenyReason> {
    let write = request.effect.is_write();
    let in_scope = match role {
        Role::Standard(_) => true,
        Role::HostScoped { hosts, .. } => scope.within_hosts(hosts).unwrap_or(!write),
        Role::ServerGroupScoped { groups, .. } => scope.within_groups(groups).unwrap_or(!write),
    };
    if in_scope {
        Ok(())
    } else {
        Err(DenyReason::OutOfScope {
            role: role.name().to_string(),
            target: request.address.to_string(),
        })
    }
}
