//! Initial domain description
//!
//! A [`DomainBootstrap`] lists what the domain starts with. It is read from
//! TOML or YAML, chosen by file extension:
//!
//! ```toml
//! [profiles.default]
//! subsystems = { logging = { level = "INFO" } }
//!
//! [socket-binding-groups.standard-sockets]
//! default-interface = "public"
//!
//! [server-groups.main-server-group]
//! profile = "default"
//! socket-binding-group = "standard-sockets"
//!
//! [hosts.primary.servers.server-one]
//! group = "main-server-group"
//! auto-start = true
//!
//! [authorization.role-mappings.SuperUser]
//! include = ["user:admin"]
//!
//! [users.admin]
//! groups = ["admins"]
//! ```

use crate::error::ManagementError;
use crate::rollout::{RolloutPlan, ROLLOUT_PLANS_NAME, ROLLOUT_PLANS_TYPE, ROLLOUT_PLAN_TYPE};
use indexmap::IndexMap;
use mgmt_model::{with_version_attributes, Resource};
use mgmt_rbac::{Principal, StandardRole};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::Path;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct ProfileSpec {
    #[serde(flatten)]
    pub attributes: Map<String, Value>,
    /// Subsystem name to its attributes
    pub subsystems: IndexMap<String, Map<String, Value>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct SocketBindingGroupSpec {
    pub default_interface: Option<String>,
    #[serde(flatten)]
    pub attributes: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct ServerGroupSpec {
    pub profile: String,
    pub socket_binding_group: Option<String>,
    /// Deployments assigned to the group
    pub deployments: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct DeploymentSpec {
    pub runtime_name: Option<String>,
    pub enabled: bool,
}

impl Default for DeploymentSpec {
    fn default() -> Self {
        Self {
            runtime_name: None,
            enabled: true,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct ServerSpec {
    pub group: String,
    pub auto_start: bool,
    pub port_offset: Option<u16>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct HostSpec {
    pub servers: IndexMap<String, ServerSpec>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct RoleMappingSpec {
    pub include_all: bool,
    /// `user:<name>` or `group:<name>`
    pub include: Vec<String>,
    pub exclude: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct ScopedRoleSpec {
    pub base_role: String,
    /// Hosts or server-groups, depending on the role kind
    #[serde(alias = "hosts", alias = "server-groups")]
    pub targets: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct AuthorizationSpec {
    /// `rbac` or `simple`
    pub provider: String,
    pub role_mappings: IndexMap<String, RoleMappingSpec>,
    pub host_scoped_roles: IndexMap<String, ScopedRoleSpec>,
    pub server_group_scoped_roles: IndexMap<String, ScopedRoleSpec>,
}

impl Default for AuthorizationSpec {
    fn default() -> Self {
        Self {
            provider: "rbac".to_string(),
            role_mappings: IndexMap::new(),
            host_scoped_roles: IndexMap::new(),
            server_group_scoped_roles: IndexMap::new(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct UserSpec {
    pub groups: Vec<String>,
}

/// Initial topology, configuration and principals of a domain
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct DomainBootstrap {
    pub profiles: IndexMap<String, ProfileSpec>,
    pub socket_binding_groups: IndexMap<String, SocketBindingGroupSpec>,
    pub server_groups: IndexMap<String, ServerGroupSpec>,
    pub deployments: IndexMap<String, DeploymentSpec>,
    pub hosts: IndexMap<String, HostSpec>,
    pub authorization: AuthorizationSpec,
    pub users: IndexMap<String, UserSpec>,
    /// Stored rollout plans, name to plan JSON
    pub rollout_plans: IndexMap<String, Value>,
}

impl DomainBootstrap {
    /// Load from a `.toml`, `.yaml` or `.yml` file
    ///
    /// # Errors
    /// `ManagementError::Config` if the file cannot be read, has another
    /// extension, or does not parse.
    pub fn load(path: &Path) -> Result<Self, ManagementError> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| ManagementError::Config(format!("{}: {e}", path.display())))?;
        match path.extension().and_then(|e| e.to_str()) {
            Some("toml") => Self::from_toml(&raw),
            Some("yaml" | "yml") => Self::from_yaml(&raw),
            _ => Err(ManagementError::Config(format!(
                "{}: bootstrap must be .toml, .yaml or .yml",
                path.display()
            ))),
        }
    }

    /// Parse TOML text
    ///
    /// # Errors
    /// `ManagementError::Config` for invalid TOML.
    pub fn from_toml(raw: &str) -> Result<Self, ManagementError> {
        toml::from_str(raw).map_err(|e| ManagementError::Config(e.to_string()))
    }

    /// Parse YAML text
    ///
    /// # Errors
    /// `ManagementError::Config` for invalid YAML.
    pub fn from_yaml(raw: &str) -> Result<Self, ManagementError> {
        serde_yaml::from_str(raw).map_err(|e| ManagementError::Config(e.to_string()))
    }

    /// Check cross references, and that `primary_host` is declared
    ///
    /// # Errors
    /// `ManagementError::Config` naming the first dangling reference.
    pub fn validate(&self, primary_host: &str) -> Result<(), ManagementError> {
        if !self.hosts.contains_key(primary_host) {
            return Err(config(format!("primary host '{primary_host}' is not declared")));
        }
        for (name, group) in &self.server_groups {
            if !self.profiles.contains_key(&group.profile) {
                return Err(config(format!(
                    "server-group '{name}' uses undeclared profile '{}'",
                    group.profile
                )));
            }
            if let Some(sockets) = &group.socket_binding_group {
                if !self.socket_binding_groups.contains_key(sockets) {
                    return Err(config(format!(
                        "server-group '{name}' uses undeclared socket-binding-group '{sockets}'"
                    )));
                }
            }
            if let Some(missing) = group.deployments.iter().find(|d| !self.deployments.contains_key(*d)) {
                return Err(config(format!(
                    "server-group '{name}' uses undeclared deployment '{missing}'"
                )));
            }
        }
        for (host, spec) in &self.hosts {
            for (server, server_spec) in &spec.servers {
                if !self.server_groups.contains_key(&server_spec.group) {
                    return Err(config(format!(
                        "server '{server}' on host '{host}' uses undeclared server-group '{}'",
                        server_spec.group
                    )));
                }
            }
        }
        let scoped = self
            .authorization
            .host_scoped_roles
            .iter()
            .chain(&self.authorization.server_group_scoped_roles);
        for (name, role) in scoped {
            if StandardRole::parse(&role.base_role).is_none() {
                return Err(config(format!(
                    "scoped role '{name}' has unknown base-role '{}'",
                    role.base_role
                )));
            }
        }
        for (name, raw) in &self.rollout_plans {
            let plan = RolloutPlan::parse(raw).map_err(|e| config(format!("rollout plan '{name}': {e}")))?;
            if let Some(group) = plan.groups().into_iter().find(|g| !self.server_groups.contains_key(g)) {
                return Err(config(format!(
                    "rollout plan '{name}' names undeclared server-group '{group}'"
                )));
            }
        }
        Ok(())
    }

    /// Domain-level model: everything but the hosts
    #[must_use]
    pub fn domain_model(&self) -> Resource {
        let mut root = with_version_attributes(Resource::new());

        for (name, profile) in &self.profiles {
            let mut resource = Resource::from_attributes(profile.attributes.clone()).with_child_type("subsystem");
            for (subsystem, attributes) in &profile.subsystems {
                resource.insert_child(
                    "subsystem",
                    subsystem.as_str(),
                    Resource::from_attributes(attributes.clone()),
                );
            }
            root.insert_child("profile", name.as_str(), resource);
        }

        for (name, sockets) in &self.socket_binding_groups {
            let mut resource = Resource::from_attributes(sockets.attributes.clone());
            if let Some(interface) = &sockets.default_interface {
                resource.set_attribute("default-interface", Value::from(interface.as_str()));
            }
            root.insert_child("socket-binding-group", name.as_str(), resource);
        }

        for (name, deployment) in &self.deployments {
            let resource = Resource::new()
                .with_attribute(
                    "runtime-name",
                    deployment.runtime_name.as_deref().unwrap_or(name.as_str()),
                )
                .with_attribute("enabled", deployment.enabled);
            root.insert_child("deployment", name.as_str(), resource);
        }

        for (name, group) in &self.server_groups {
            let mut resource = Resource::new()
                .with_attribute("profile", group.profile.as_str())
                .with_child_type("deployment");
            if let Some(sockets) = &group.socket_binding_group {
                resource.set_attribute("socket-binding-group", Value::from(sockets.as_str()));
            }
            for deployment in &group.deployments {
                resource.insert_child(
                    "deployment",
                    deployment.as_str(),
                    Resource::new().with_attribute("enabled", true),
                );
            }
            root.insert_child("server-group", name.as_str(), resource);
        }

        let mut plans = Resource::new().protected().with_child_type(ROLLOUT_PLAN_TYPE);
        for (name, content) in &self.rollout_plans {
            plans.insert_child(
                ROLLOUT_PLAN_TYPE,
                name.as_str(),
                Resource::new().with_attribute("content", content.clone()),
            );
        }
        root.insert_child(ROLLOUT_PLANS_TYPE, ROLLOUT_PLANS_NAME, plans);

        root.with_child(
            "core-service",
            "management",
            Resource::new().with_child("access", "authorization", self.authorization_model()),
        )
    }

    fn authorization_model(&self) -> Resource {
        let spec = &self.authorization;
        let mut authz = Resource::new()
            .with_attribute("provider", spec.provider.as_str())
            .with_child_type("role-mapping")
            .with_child_type("host-scoped-role")
            .with_child_type("server-group-scoped-role");
        for (role, mapping) in &spec.role_mappings {
            authz.insert_child(
                "role-mapping",
                role.as_str(),
                Resource::new()
                    .with_attribute("include-all", mapping.include_all)
                    .with_attribute("include", mapping.include.clone())
                    .with_attribute("exclude", mapping.exclude.clone()),
            );
        }
        for (name, role) in &spec.host_scoped_roles {
            authz.insert_child(
                "host-scoped-role",
                name.as_str(),
                Resource::new()
                    .with_attribute("base-role", role.base_role.as_str())
                    .with_attribute("hosts", role.targets.clone()),
            );
        }
        for (name, role) in &spec.server_group_scoped_roles {
            authz.insert_child(
                "server-group-scoped-role",
                name.as_str(),
                Resource::new()
                    .with_attribute("base-role", role.base_role.as_str())
                    .with_attribute("server-groups", role.targets.clone()),
            );
        }
        authz
    }

    /// Bootstrap model of `host`, its server-configs only
    #[must_use]
    pub fn host_model(&self, host: &str) -> Option<Resource> {
        let spec = self.hosts.get(host)?;
        let mut resource = Resource::new().with_attribute("name", host);
        for (server, config) in &spec.servers {
            let mut server_config = Resource::new()
                .with_attribute("group", config.group.as_str())
                .with_attribute("auto-start", config.auto_start);
            if let Some(offset) = config.port_offset {
                server_config.set_attribute("socket-binding-port-offset", Value::from(offset));
            }
            resource.insert_child("server-config", server.as_str(), server_config);
        }
        Some(resource)
    }

    /// Declared hosts other than `primary_host`
    pub fn secondary_hosts<'a>(&'a self, primary_host: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.hosts
            .keys()
            .map(String::as_str)
            .filter(move |host| *host != primary_host)
    }

    /// Principal for a declared user
    #[must_use]
    pub fn principal(&self, name: &str) -> Option<Principal> {
        let user = self.users.get(name)?;
        Some(
            user.groups
                .iter()
                .fold(Principal::user(name), |principal, group| principal.with_group(group.as_str())),
        )
    }
}

fn config(message: String) -> ManagementError {
    ManagementError::Config(message)
}

#[cfg(test)]
mod tests {
    use super::*;
    use mgmt_model::PathAddress;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::io::Write;

    const DOMAIN: &str = r#"
[profiles.default]
subsystems = { logging = { level = "INFO" } }

[socket-binding-groups.standard-sockets]
default-interface = "public"

[server-groups.main-server-group]
profile = "default"
socket-binding-group = "standard-sockets"
deployments = ["app.war"]

[deployments."app.war"]

[hosts.primary.servers.server-one]
group = "main-server-group"
auto-start = true

[hosts.secondary.servers.server-two]
group = "main-server-group"
port-offset = 150

[authorization.role-mappings.SuperUser]
include = ["user:admin"]

[authorization.host-scoped-roles.primary-admins]
base-role = "Administrator"
hosts = ["primary"]

[users.admin]
groups = ["admins"]

[rollout-plans.testPlan]
rollout-plan = { in-series = [{ server-group = { main-server-group = {} } }] }
"#;

    #[test]
    fn parses_toml() {
        let bootstrap = DomainBootstrap::from_toml(DOMAIN).unwrap();
        bootstrap.validate("primary").unwrap();
        assert_eq!(bootstrap.hosts.len(), 2);
        assert!(bootstrap.hosts["primary"].servers["server-one"].auto_start);
        assert_eq!(bootstrap.authorization.host_scoped_roles["primary-admins"].targets, vec!["primary"]);
        assert_eq!(bootstrap.secondary_hosts("primary").collect::<Vec<_>>(), vec!["secondary"]);
    }

    #[test]
    fn domain_model_layout() {
        let bootstrap = DomainBootstrap::from_toml(DOMAIN).unwrap();
        let root = bootstrap.domain_model();
        let group = root.child("server-group", "main-server-group").unwrap();
        assert_eq!(group.attribute_str("profile"), Some("default"));
        assert!(group.child("deployment", "app.war").is_some());
        let logging = PathAddress::resolve("/profile=default/subsystem=logging").unwrap();
        assert_eq!(root.navigate(&logging).unwrap().attribute("level"), Some(&json!("INFO")));
        let plans = root.child(ROLLOUT_PLANS_TYPE, ROLLOUT_PLANS_NAME).unwrap();
        assert!(plans.is_protected());
        assert!(plans.child(ROLLOUT_PLAN_TYPE, "testPlan").is_some());
        let mapping = PathAddress::resolve(
            "/core-service=management/access=authorization/role-mapping=SuperUser",
        )
        .unwrap();
        assert_eq!(root.navigate(&mapping).unwrap().attribute("include"), Some(&json!(["user:admin"])));
        assert!(root.child("host", "primary").is_none());
    }

    #[test]
    fn host_model_has_server_configs() {
        let bootstrap = DomainBootstrap::from_toml(DOMAIN).unwrap();
        let host = bootstrap.host_model("secondary").unwrap();
        let server = host.child("server-config", "server-two").unwrap();
        assert_eq!(server.attribute_str("group"), Some("main-server-group"));
        assert_eq!(server.attribute("socket-binding-port-offset"), Some(&json!(150)));
        assert!(bootstrap.host_model("nowhere").is_none());
    }

    #[test]
    fn dangling_references_fail() {
        let mut bootstrap = DomainBootstrap::from_toml(DOMAIN).unwrap();
        assert!(bootstrap.validate("other").is_err());
        bootstrap.server_groups["main-server-group"].profile = "missing".into();
        let err = bootstrap.validate("primary").unwrap_err();
        assert!(err.to_string().contains("missing"));
    }

    #[test]
    fn principals_carry_groups() {
        let bootstrap = DomainBootstrap::from_toml(DOMAIN).unwrap();
        let admin = bootstrap.principal("admin").unwrap();
        assert!(admin.groups.contains("admins"));
        assert!(bootstrap.principal("nobody").is_none());
    }

    #[test]
    fn loads_yaml_by_extension() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(
            file,
            "profiles:\n  default: {{}}\nserver-groups:\n  g:\n    profile: default\nhosts:\n  primary:\n    servers:\n      s1:\n        group: g\n"
        )
        .unwrap();
        let bootstrap = DomainBootstrap::load(file.path()).unwrap();
        bootstrap.validate("primary").unwrap();
        assert_eq!(bootstrap.hosts["primary"].servers["s1"].group, "g");

        let other = tempfile::Builder::new().suffix(".ini").tempfile().unwrap();
        assert!(DomainBootstrap::load(other.path()).is_err());
    }
}
