//! Standard operations shared by the domain and host controllers
//!
//! Registration builds each controller's catalog; the read helpers render
//! a model consulting a per-resource filter so the domain controller can
//! elide what the caller may not see.

use crate::error::ManagementError;
use crate::extension::OperationHandler;
use crate::request::OperationRequest;
use mgmt_model::{
    PathAddress, RenderFilter, RenderOptions, Resource, TreeError, ValidationResult,
};
use mgmt_ops::{
    ActionEffect, OperationDescriptor, OperationRegistry, ParameterDescriptor, RegistryError,
    ValueType, Visibility, GLOBAL_TYPE,
};
use serde_json::{json, Map, Value};
use std::collections::BTreeSet;
use std::sync::Arc;

/// Lifecycle action on one server
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerAction {
    Start,
    Stop,
    Restart,
}

impl ServerAction {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Stop => "stop",
            Self::Restart => "restart",
        }
    }
}

/// Handler attached to a registry entry
#[derive(Debug, Clone)]
pub enum Handler {
    ReadResource,
    ReadChildrenNames,
    ReadChildrenResources,
    ReadAttribute,
    WriteAttribute,
    Add,
    Remove,
    ValidateAddress,
    ReadOperationNames,
    /// `start`/`stop`/`restart` on a server-config
    Server(ServerAction),
    /// Server-group lifecycle; carries the server operation rolled out
    ServerGroup(&'static str),
    /// `reload` on a host
    Reload,
    ReadHostModel,
    ApplyServerGroupOperation,
    SyncDomainContent,
    ReadContentDigest,
    /// Contributed by an extension
    Custom(Arc<dyn OperationHandler>),
}

impl Handler {
    /// Reads served from the model without changing it
    #[must_use]
    pub fn is_read(&self) -> bool {
        matches!(
            self,
            Self::ReadResource
                | Self::ReadChildrenNames
                | Self::ReadChildrenResources
                | Self::ReadAttribute
                | Self::ReadOperationNames
        )
    }
}

/// Operation catalog of a controller
pub type Registry = OperationRegistry<Handler>;

fn flag(name: &str) -> ParameterDescriptor {
    ParameterDescriptor::optional(name, ValueType::Boolean, json!(false))
}

fn blocking() -> ParameterDescriptor {
    flag("blocking")
}

/// Global operations available on every resource type
fn standard_operations() -> Vec<(OperationDescriptor, Handler)> {
    vec![
        (
            OperationDescriptor::new("read-resource", GLOBAL_TYPE, ActionEffect::ReadConfig)
                .with_description("Read the attributes and children of a resource")
                .with_parameter(flag("recursive"))
                .with_parameter(flag("include-runtime")),
            Handler::ReadResource,
        ),
        (
            OperationDescriptor::new("read-children-names", GLOBAL_TYPE, ActionEffect::ReadConfig)
                .with_parameter(ParameterDescriptor::required("child-type", ValueType::String)),
            Handler::ReadChildrenNames,
        ),
        (
            OperationDescriptor::new("read-children-resources", GLOBAL_TYPE, ActionEffect::ReadConfig)
                .with_parameter(ParameterDescriptor::required("child-type", ValueType::String))
                .with_parameter(flag("recursive"))
                .with_parameter(flag("include-runtime")),
            Handler::ReadChildrenResources,
        ),
        (
            OperationDescriptor::new("read-attribute", GLOBAL_TYPE, ActionEffect::ReadConfig)
                .with_parameter(ParameterDescriptor::required("name", ValueType::String)),
            Handler::ReadAttribute,
        ),
        (
            OperationDescriptor::new("write-attribute", GLOBAL_TYPE, ActionEffect::WriteConfig)
                .with_parameter(ParameterDescriptor::required("name", ValueType::String))
                .with_parameter(ParameterDescriptor::required("value", ValueType::Any)),
            Handler::WriteAttribute,
        ),
        (
            OperationDescriptor::new("add", GLOBAL_TYPE, ActionEffect::WriteConfig)
                .with_description("Add a resource; parameters become its attributes"),
            Handler::Add,
        ),
        (
            OperationDescriptor::new("remove", GLOBAL_TYPE, ActionEffect::WriteConfig),
            Handler::Remove,
        ),
        (
            OperationDescriptor::new("validate-address", GLOBAL_TYPE, ActionEffect::Address)
                .with_parameter(ParameterDescriptor::required("value", ValueType::Any)),
            Handler::ValidateAddress,
        ),
        (
            OperationDescriptor::new("read-operation-names", GLOBAL_TYPE, ActionEffect::Address),
            Handler::ReadOperationNames,
        ),
    ]
}

fn server_operations() -> Vec<(OperationDescriptor, Handler)> {
    [ServerAction::Start, ServerAction::Stop, ServerAction::Restart]
        .into_iter()
        .map(|action| {
            (
                OperationDescriptor::new(action.as_str(), "server-config", ActionEffect::WriteRuntime)
                    .with_parameter(blocking()),
                Handler::Server(action),
            )
        })
        .chain([(
            OperationDescriptor::new("reload", "host", ActionEffect::WriteRuntime)
                .with_description("Reload the host controller")
                .with_parameter(flag("admin-only")),
            Handler::Reload,
        )])
        .collect()
}

/// Operations of the domain controller
///
/// # Errors
/// `RegistryError::DuplicateOperation` if `registry` already holds one.
pub fn register_domain(registry: &Registry) -> Result<(), RegistryError> {
    for (descriptor, handler) in standard_operations().into_iter().chain(server_operations()) {
        registry.register(descriptor, handler)?;
    }
    for (name, server_operation) in [
        ("start-servers", "start"),
        ("stop-servers", "stop"),
        ("restart-servers", "restart"),
        ("reload-servers", "reload"),
    ] {
        registry.register(
            OperationDescriptor::new(name, "server-group", ActionEffect::WriteRuntime)
                .with_description("Apply a lifecycle operation to every server of the group")
                .with_parameter(blocking()),
            Handler::ServerGroup(server_operation),
        )?;
    }
    Ok(())
}

/// Operations of a host controller
///
/// # Errors
/// `RegistryError::DuplicateOperation` if `registry` already holds one.
pub fn register_host(registry: &Registry) -> Result<(), RegistryError> {
    for (descriptor, handler) in standard_operations().into_iter().chain(server_operations()) {
        registry.register(descriptor, handler)?;
    }
    let internal = [
        (
            OperationDescriptor::new("read-host-model", "host", ActionEffect::ReadRuntime),
            Handler::ReadHostModel,
        ),
        (
            OperationDescriptor::new("apply-server-group-operation", "host", ActionEffect::WriteRuntime)
                .with_parameter(ParameterDescriptor::required("server-group", ValueType::String))
                .with_parameter(ParameterDescriptor::required("server-operation", ValueType::String))
                .with_parameter(blocking()),
            Handler::ApplyServerGroupOperation,
        ),
        (
            OperationDescriptor::new("sync-domain-content", "root", ActionEffect::WriteConfig)
                .with_parameter(ParameterDescriptor::required("content", ValueType::Object)),
            Handler::SyncDomainContent,
        ),
        (
            OperationDescriptor::new("read-content-digest", "root", ActionEffect::ReadConfig),
            Handler::ReadContentDigest,
        ),
    ];
    for (descriptor, handler) in internal {
        registry.register(descriptor.with_visibility(Visibility::DomainPrivate), handler)?;
    }
    Ok(())
}

pub(crate) fn render_options(request: &OperationRequest) -> RenderOptions {
    RenderOptions {
        recursive: request.param_bool("recursive", false),
        include_runtime: request.param_bool("include-runtime", false),
    }
}

fn navigate<'r>(root: &'r Resource, address: &PathAddress) -> Result<&'r Resource, ManagementError> {
    root.navigate(address).ok_or_else(|| {
        ManagementError::Tree(TreeError::NotFound {
            address: address.to_string(),
        })
    })
}

/// `read-resource`; wildcard addresses yield one entry per match
///
/// # Errors
/// `TreeError::NotFound` for a concrete address that does not exist.
pub fn read_resource<F>(
    root: &Resource,
    address: &PathAddress,
    options: RenderOptions,
    filter: &mut F,
) -> Result<Value, ManagementError>
where
    F: FnMut(&PathAddress, &Resource) -> RenderFilter,
{
    if !address.has_wildcard() {
        return Ok(navigate(root, address)?.render_with(address, options, filter));
    }
    let mut items = Vec::new();
    for concrete in root.expand(address) {
        let Some(node) = root.navigate(&concrete) else {
            continue;
        };
        if filter(&concrete, node).hidden {
            continue;
        }
        items.push(json!({
            "address": concrete.to_json(),
            "outcome": "success",
            "result": node.render_with(&concrete, options, filter),
        }));
    }
    Ok(Value::Array(items))
}

/// `read-children-names`
///
/// # Errors
/// `TreeError::NotFound` if `address` does not exist.
pub fn read_children_names<F>(
    root: &Resource,
    address: &PathAddress,
    child_type: &str,
    filter: &mut F,
) -> Result<Value, ManagementError>
where
    F: FnMut(&PathAddress, &Resource) -> RenderFilter,
{
    let node = navigate(root, address)?;
    Ok(Value::Array(
        node.children_of(child_type)
            .filter(|&(name, child)| !filter(&address.child(child_type, name.as_str()), child).hidden)
            .map(|(name, _)| Value::String(name.clone()))
            .collect(),
    ))
}

/// `read-children-resources`; children the filter hides are left out
///
/// # Errors
/// `TreeError::NotFound` if `address` does not exist.
pub fn read_children_resources<F>(
    root: &Resource,
    address: &PathAddress,
    child_type: &str,
    options: RenderOptions,
    filter: &mut F,
) -> Result<Value, ManagementError>
where
    F: FnMut(&PathAddress, &Resource) -> RenderFilter,
{
    let node = navigate(root, address)?;
    let mut out = Map::new();
    for (name, child) in node.children_of(child_type) {
        let child_address = address.child(child_type, name.as_str());
        if filter(&child_address, child).hidden {
            continue;
        }
        out.insert(name.clone(), child.render_with(&child_address, options, filter));
    }
    Ok(Value::Object(out))
}

/// Parse the candidate of `validate-address`
///
/// A malformed candidate is an invalid address, not a failed operation.
pub fn validation_candidate(value: &Value) -> Result<PathAddress, ValidationResult> {
    let parsed = match value {
        Value::String(raw) => PathAddress::resolve(raw),
        other => PathAddress::from_json(other),
    };
    parsed.map_err(|err| {
        ValidationResult::invalid(format!("{}: {err}", mgmt_model::codes::MALFORMED_ADDRESS))
    })
}

/// Attributes of a resource created by `add`
#[must_use]
pub fn add_attributes(request: &OperationRequest) -> Resource {
    Resource::from_attributes(
        request
            .params
            .iter()
            .filter(|(_, value)| !value.is_null())
            .map(|(name, value)| (name.clone(), value.clone())),
    )
}

/// Attribute names touched by a request, for attribute-level authorization
#[must_use]
pub fn touched_attributes(handler: &Handler, request: &OperationRequest) -> BTreeSet<String> {
    match handler {
        Handler::ReadAttribute | Handler::WriteAttribute => {
            request.param_str("name").map(str::to_string).into_iter().collect()
        }
        Handler::Add => request.params.keys().cloned().collect(),
        _ => BTreeSet::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mgmt_ops::CallerContext;
    use pretty_assertions::assert_eq;

    fn model() -> Resource {
        Resource::new()
            .with_child(
                "host",
                "primary",
                Resource::new()
                    .with_attribute("name", "primary")
                    .with_child("server-config", "s1", Resource::new().with_attribute("group", "a"))
                    .with_child("server-config", "s2", Resource::new().with_attribute("group", "b")),
            )
            .with_child("host", "secondary", Resource::new().with_attribute("name", "secondary"))
    }

    fn visible(_: &PathAddress, _: &Resource) -> RenderFilter {
        RenderFilter::visible()
    }

    #[test]
    fn catalogs_register_cleanly() {
        let domain = Registry::new();
        register_domain(&domain).unwrap();
        assert!(domain.lookup("server-group", "start-servers").is_ok());
        assert!(domain.lookup("host", "read-host-model").is_err());

        let host = Registry::new();
        register_host(&host).unwrap();
        assert!(matches!(
            host.resolve("host", "read-host-model", CallerContext::External),
            Err(RegistryError::NotPermitted { .. })
        ));
        assert!(host
            .resolve("host", "read-host-model", CallerContext::DomainToHost)
            .is_ok());
        assert!(!host.introspectable_names("root").contains(&"sync-domain-content".to_string()));
    }

    #[test]
    fn wildcard_read_lists_matches() {
        let pattern = PathAddress::resolve("/host=*").unwrap();
        let result = read_resource(&model(), &pattern, RenderOptions::default(), &mut visible).unwrap();
        let items = result.as_array().unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[1]["result"]["name"], json!("secondary"));
        assert_eq!(items[0]["address"], json!([{"host": "primary"}]));
    }

    #[test]
    fn children_reads_apply_filter() {
        let host = PathAddress::resolve("/host=primary").unwrap();
        let mut only_a = |addr: &PathAddress, _: &Resource| {
            if addr.value_of("server-config") == Some("s2") {
                RenderFilter::hidden()
            } else {
                RenderFilter::visible()
            }
        };
        let names = read_children_names(&model(), &host, "server-config", &mut only_a).unwrap();
        assert_eq!(names, json!(["s1"]));
        let resources = read_children_resources(
            &model(),
            &host,
            "server-config",
            RenderOptions::default(),
            &mut only_a,
        )
        .unwrap();
        assert_eq!(resources, json!({"s1": {"group": "a"}}));
    }

    #[test]
    fn malformed_candidates_are_invalid() {
        let invalid = validation_candidate(&json!("/host")).unwrap_err();
        assert!(!invalid.valid);
        assert!(invalid.problem.unwrap().starts_with("MGMT0033"));
        assert!(validation_candidate(&json!([["host", "primary"]])).is_ok());
    }

    #[test]
    fn missing_resource_fails() {
        let address = PathAddress::resolve("/host=nope").unwrap();
        assert!(read_resource(&model(), &address, RenderOptions::default(), &mut visible).is_err());
    }
}
