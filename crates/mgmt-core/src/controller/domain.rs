//! Domain controller
//!
//! Entry point for external management clients. Every request goes through
//! the same pipeline:
//!
//! 1. reject while the controller reloads
//! 2. resolve the operation and its visibility for an external caller
//! 3. bind parameters
//! 4. take the write permit for writes
//! 5. authorize against the current model
//! 6. execute locally, forward to the owning host, or roll out to
//!    server-groups
//!
//! Failures at any step become an `outcome=failed` response.

use super::router::HostRouter;
use crate::config::ControllerConfig;
use crate::content;
use crate::error::{ErrorKind, ManagementError};
use crate::extension::{OperationContext, OperationHandler};
use crate::handlers::{self, Handler, Registry};
use crate::request::{OperationRequest, OperationResponse};
use crate::rollout::{
    GroupOperation, RolloutCoordinator, RolloutError, RolloutPlan, RolloutReport, RolloutTarget,
    ROLLOUT_PLANS_NAME, ROLLOUT_PLANS_TYPE, ROLLOUT_PLAN_TYPE,
};
use crate::topology::{DomainContent, SessionState, TopologyManager};
use futures::future::join_all;
use mgmt_model::{read_attribute_in, PathAddress, Resource, ResourceTree, TreeError};
use mgmt_ops::{ActionEffect, CallerContext, OperationDescriptor};
use mgmt_rbac::{AccessRequest, Authorizer, Decision, FilterReport, Principal, Role};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Top-level types a read view carries besides the addressed one
const VIEW_SCOPE_TYPES: &[&str] = &["core-service", "server-group", "host"];

/// Types whose changes require a reload of the servers using them
const RELOAD_TRIGGERING_TYPES: &[&str] = &["profile", "server-group", "deployment", "socket-binding-group"];

/// Lifecycle state of the domain controller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerState {
    Running,
    Reloading,
    /// Running without secondary hosts
    AdminOnly,
}

impl ControllerState {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Reloading => "reloading",
            Self::AdminOnly => "admin-only",
        }
    }
}

impl fmt::Display for ControllerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug)]
struct DomainInner {
    tree: Arc<ResourceTree>,
    registry: Registry,
    router: HostRouter,
    topology: Arc<TopologyManager>,
    coordinator: RolloutCoordinator,
    /// Serializes whole write operations, rollouts included
    write_permit: Mutex<()>,
    state: watch::Sender<ControllerState>,
    cancel: CancellationToken,
    config: ControllerConfig,
}

/// Controller of the domain, running on the primary host
#[derive(Debug, Clone)]
pub struct DomainController {
    inner: Arc<DomainInner>,
}

impl DomainController {
    /// Create controller over `tree`
    ///
    /// # Errors
    /// `ManagementError::Registry` if the catalog cannot be built.
    pub fn new(
        tree: Arc<ResourceTree>,
        router: HostRouter,
        topology: Arc<TopologyManager>,
        config: ControllerConfig,
        cancel: CancellationToken,
    ) -> Result<Self, ManagementError> {
        let registry = Registry::new();
        handlers::register_domain(&registry)?;
        let coordinator = RolloutCoordinator::new(
            Arc::new(router.clone()),
            config.rollout.step_timeout(),
            config.rollout.default_policy,
        );
        let (state, _) = watch::channel(ControllerState::Running);
        Ok(Self {
            inner: Arc::new(DomainInner {
                tree,
                registry,
                router,
                topology,
                coordinator,
                write_permit: Mutex::new(()),
                state,
                cancel,
                config,
            }),
        })
    }

    /// Add extension operations to the catalog
    ///
    /// # Errors
    /// `ManagementError::Registry` for a duplicate operation.
    pub fn install(
        &self,
        operations: &[(OperationDescriptor, Arc<dyn OperationHandler>)],
    ) -> Result<(), ManagementError> {
        for (descriptor, handler) in operations {
            self.inner
                .registry
                .register(descriptor.clone(), Handler::Custom(Arc::clone(handler)))?;
        }
        Ok(())
    }

    #[inline]
    #[must_use]
    pub fn tree(&self) -> &Arc<ResourceTree> {
        &self.inner.tree
    }

    #[inline]
    #[must_use]
    pub fn topology(&self) -> &Arc<TopologyManager> {
        &self.inner.topology
    }

    #[inline]
    #[must_use]
    pub fn router(&self) -> &HostRouter {
        &self.inner.router
    }

    #[inline]
    #[must_use]
    pub fn config(&self) -> &ControllerConfig {
        &self.inner.config
    }

    #[must_use]
    pub fn state(&self) -> ControllerState {
        *self.inner.state.borrow()
    }

    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<ControllerState> {
        self.inner.state.subscribe()
    }

    /// Wait until the controller leaves `reloading`
    ///
    /// Returns the state reached, or `None` on timeout.
    pub async fn wait_until_ready(&self, timeout: Duration) -> Option<ControllerState> {
        let mut states = self.subscribe();
        let ready = tokio::time::timeout(
            timeout,
            states.wait_for(|state| *state != ControllerState::Reloading),
        )
        .await;
        match ready {
            Ok(Ok(state)) => Some(*state),
            _ => None,
        }
    }

    /// Execute `request` on behalf of `principal`
    pub async fn execute(&self, principal: &Principal, request: OperationRequest) -> OperationResponse {
        let operation = request.operation.clone();
        let address = request.address.to_string();
        debug!(principal = %principal.name, %operation, %address, "operation received");
        match self.run(principal, request).await {
            Ok(response) => {
                debug!(%operation, %address, "operation succeeded");
                response
            }
            Err(err) => {
                if err.kind() == ErrorKind::AuthorizationDenied {
                    warn!(principal = %principal.name, %operation, %address, %err, "operation denied");
                } else {
                    info!(%operation, %address, code = err.code(), %err, "operation failed");
                }
                OperationResponse::failed(&err)
            }
        }
    }

    /// Parse and execute a JSON request
    pub async fn execute_json(&self, principal: &Principal, request: &Value) -> OperationResponse {
        match OperationRequest::from_json(request) {
            Ok(request) => self.execute(principal, request).await,
            Err(err) => OperationResponse::failed(&err),
        }
    }

    async fn run(&self, principal: &Principal, mut request: OperationRequest) -> Result<OperationResponse, ManagementError> {
        self.ensure_available()?;
        let entry = self.inner.registry.resolve(
            request.address.resource_type(),
            &request.operation,
            CallerContext::External,
        )?;
        request.params = entry
            .descriptor
            .bind(&request.params)
            .map_err(ManagementError::InvalidRequest)?;
        let effect = entry.descriptor.effect;

        if entry.handler.is_read() {
            return self.read(principal, &entry.handler, &request, effect).await;
        }

        let _permit = if effect.is_write() {
            let permit = self.inner.write_permit.lock().await;
            self.ensure_available()?;
            Some(permit)
        } else {
            None
        };
        let attributes = handlers::touched_attributes(&entry.handler, &request);
        self.inner.tree.read(|model| {
            let authorizer = Authorizer::new(model)?;
            let roles = authorizer.roles_for(principal, request.headers.roles.as_deref())?;
            check(&authorizer, &roles, &request, effect, &attributes)
        })?;

        let address = &request.address;
        match &entry.handler {
            Handler::ValidateAddress => Ok(OperationResponse::success(self.validate_address(&request).await?)),
            Handler::WriteAttribute | Handler::Add | Handler::Remove => match host_of(address) {
                Some(host) => Ok(OperationResponse::success(self.forward(host, &request).await?)),
                None => self.domain_write(&entry.handler, &request).await,
            },
            Handler::Server(_) => {
                let host = host_of(address).ok_or_else(|| not_found(address))?;
                Ok(OperationResponse::success(self.forward(host, &request).await?))
            }
            Handler::Reload => {
                let host = host_of(address).ok_or_else(|| not_found(address))?;
                if host == self.inner.config.primary_host {
                    self.reload(request.param_bool("admin-only", false)).await;
                    Ok(OperationResponse::success(Value::Null))
                } else {
                    Ok(OperationResponse::success(self.forward(host, &request).await?))
                }
            }
            Handler::ServerGroup(server_operation) => {
                self.group_lifecycle(server_operation, &request).await
            }
            Handler::Custom(handler) => {
                let context = OperationContext {
                    tree: Arc::clone(&self.inner.tree),
                    caller: CallerContext::External,
                    host: None,
                };
                Ok(OperationResponse::success(handler.execute(&context, &request).await?))
            }
            Handler::ReadResource
            | Handler::ReadChildrenNames
            | Handler::ReadChildrenResources
            | Handler::ReadAttribute
            | Handler::ReadOperationNames
            | Handler::ReadHostModel
            | Handler::ApplyServerGroupOperation
            | Handler::SyncDomainContent
            | Handler::ReadContentDigest => Err(ManagementError::Internal(format!(
                "'{}' is not served by the domain controller",
                request.operation
            ))),
        }
    }

    fn ensure_available(&self) -> Result<(), ManagementError> {
        if self.state() == ControllerState::Reloading {
            return Err(ManagementError::ControllerReloading);
        }
        Ok(())
    }

    /// Serve a read from a view with live host models spliced in,
    /// filtering per resource
    async fn read(
        &self,
        principal: &Principal,
        handler: &Handler,
        request: &OperationRequest,
        effect: ActionEffect,
    ) -> Result<OperationResponse, ManagementError> {
        let view = self.read_view(request).await?;
        let attributes = handlers::touched_attributes(handler, request);
        let address = &request.address;
        let mut report = FilterReport::default();

        let result = {
            let authorizer = Authorizer::new(&view)?;
            let roles = authorizer.roles_for(principal, request.headers.roles.as_deref())?;
            check(&authorizer, &roles, request, effect, &attributes)?;
            let mut filter = |at: &PathAddress, resource: &Resource| {
                authorizer.read_filter(&roles, at, resource, effect, &mut report)
            };
            match handler {
                Handler::ReadResource => handlers::read_resource(
                    &view,
                    address,
                    handlers::render_options(request),
                    &mut filter,
                )?,
                Handler::ReadChildrenNames => handlers::read_children_names(
                    &view,
                    address,
                    request.require_str("child-type")?,
                    &mut filter,
                )?,
                Handler::ReadChildrenResources => handlers::read_children_resources(
                    &view,
                    address,
                    request.require_str("child-type")?,
                    handlers::render_options(request),
                    &mut filter,
                )?,
                Handler::ReadAttribute => read_attribute_in(&view, address, request.require_str("name")?)?,
                _ => Value::from(self.inner.registry.introspectable_names(address.resource_type())),
            }
        };

        let mut response = OperationResponse::success(result);
        if !report.is_empty() {
            report.children.sort();
            report.children.dedup();
            report.attributes.sort();
            report.attributes.dedup();
            debug!(%address, children = report.children.len(), attributes = report.attributes.len(), "read filtered");
            response = response.with_response_header("access-control", report.to_value());
        }
        Ok(response)
    }

    /// Domain model with the live models of the hosts a read touches
    async fn read_view(&self, request: &OperationRequest) -> Result<Resource, ManagementError> {
        let mut view = match request.address.first() {
            None => self.inner.tree.snapshot(),
            Some(first) => {
                let target = first.key();
                self.inner
                    .tree
                    .read(|root| root.pruned(|key| key == target || VIEW_SCOPE_TYPES.contains(&key)))
            }
        };
        let (hosts, strict) = match request.address.first() {
            None if request.param_bool("recursive", false) => (self.inner.router.hosts(), false),
            Some(first) if first.key() == "host" && first.is_wildcard() => (self.inner.router.hosts(), false),
            Some(first) if first.key() == "host" => {
                if !self.inner.router.knows(first.value()) {
                    return Ok(view);
                }
                (vec![first.value().to_string()], true)
            }
            _ => return Ok(view),
        };
        let router = &self.inner.router;
        let models = join_all(hosts.iter().map(|host| router.host_model(host))).await;
        for (host, model) in hosts.iter().zip(models) {
            match model {
                Ok(model) => {
                    view.insert_child("host", host.as_str(), model);
                }
                Err(err) if strict => return Err(err),
                Err(err) => warn!(%host, %err, "serving mirrored host model"),
            }
        }
        Ok(view)
    }

    /// Forward a request under `host=<host>` and refresh the mirror
    async fn forward(&self, host: &str, request: &OperationRequest) -> Result<Value, ManagementError> {
        if !self.inner.router.knows(host) {
            return Err(not_found(&PathAddress::root().child("host", host)));
        }
        let result = self.inner.router.invoke(host, request.clone()).await?;
        if let Err(err) = self.refresh_host(host).await {
            warn!(%host, %err, "host mirror not refreshed");
        }
        Ok(result)
    }

    /// Replace the mirror of `host` with its current model
    ///
    /// # Errors
    /// Failure to reach the host.
    pub async fn refresh_host(&self, host: &str) -> Result<(), ManagementError> {
        let model = self.inner.router.host_model(host).await?;
        self.inner.tree.register_host(host, model);
        Ok(())
    }

    /// Push the synced content to every reachable host
    pub async fn broadcast_content(&self) {
        let payload = match self.inner.tree.read(|root| content::to_value(&content::extract(root))) {
            Ok(payload) => payload,
            Err(err) => {
                warn!(%err, "domain content not serializable");
                return;
            }
        };
        let local = self.inner.router.local().name().to_string();
        let targets: Vec<String> = self
            .inner
            .router
            .hosts()
            .into_iter()
            .filter(|host| {
                *host == local
                    || self.inner.topology.state(host).is_ok_and(|s| s == SessionState::Running)
            })
            .collect();
        let router = &self.inner.router;
        let sent = join_all(targets.iter().map(|host| {
            router.invoke(
                host,
                OperationRequest::new(PathAddress::root(), "sync-domain-content")
                    .with_param("content", payload.clone()),
            )
        }))
        .await;
        for (host, result) in targets.iter().zip(sent) {
            if let Err(err) = result {
                warn!(%host, %err, "domain content not pushed, host resyncs on reconnect");
            }
        }
    }

    async fn validate_address(&self, request: &OperationRequest) -> Result<Value, ManagementError> {
        let candidate = match handlers::validation_candidate(request.param("value").unwrap_or(&Value::Null)) {
            Ok(candidate) => candidate,
            Err(invalid) => return Ok(invalid.to_value()),
        };
        if let Some(host) = host_of(&candidate) {
            if self.inner.router.knows(host) {
                let delegated = OperationRequest::new(PathAddress::root(), "validate-address")
                    .with_param("value", candidate.to_json());
                match self.inner.router.invoke(host, delegated).await {
                    Ok(result) => return Ok(result),
                    Err(err) => warn!(%host, %err, "validating against the host mirror"),
                }
            }
        }
        Ok(self.inner.tree.validate(&candidate).to_value())
    }

    /// Apply a domain-level write, then sync hosts and roll out a reload
    /// to the affected server-groups
    async fn domain_write(&self, handler: &Handler, request: &OperationRequest) -> Result<OperationResponse, ManagementError> {
        let address = &request.address;
        if address.has_wildcard() {
            return Err(TreeError::WildcardNotAllowed {
                address: address.to_string(),
            }
            .into());
        }
        let groups = if reload_triggering(address) {
            self.groups_with_servers(address)
        } else {
            BTreeSet::new()
        };
        let plan = if groups.is_empty() {
            None
        } else {
            Some(self.plan_for(request, &groups)?)
        };

        // host mirrors may be refreshed by handshakes meanwhile; only content rolls back
        let before = self.inner.tree.read(content::extract);
        match handler {
            Handler::Add => {
                let resource = handlers::add_attributes(request);
                self.check_plan_content(address, &resource)?;
                self.inner.tree.add(address, resource)?;
            }
            Handler::Remove => {
                self.check_unreferenced(address)?;
                self.inner.tree.remove(address)?;
            }
            _ => {
                let name = request.require_str("name")?;
                let value = request.param("value").cloned().unwrap_or(Value::Null);
                self.inner.tree.write_attribute(address, name, value)?;
            }
        }
        info!(operation = %request.operation, %address, "domain model changed");

        if !address.first().is_some_and(|e| content::is_synced_type(e.key())) {
            return Ok(OperationResponse::success(Value::Null));
        }
        self.broadcast_content().await;
        let Some(plan) = plan else {
            return Ok(OperationResponse::success(Value::Null));
        };

        let report = self
            .rollout(&plan, &GroupOperation::new("require-reload", false), &groups)
            .await;
        if report.is_success() {
            return Ok(OperationResponse::success(Value::Null).with_server_groups(report.to_value()));
        }
        warn!(rollout = %report.id, %address, "rolling back domain change");
        self.inner.tree.write(|root| content::replace(root, &before));
        self.broadcast_content().await;
        Err(ManagementError::RolloutFailed {
            report: Box::new(report),
        })
    }

    async fn group_lifecycle(&self, server_operation: &str, request: &OperationRequest) -> Result<OperationResponse, ManagementError> {
        let address = &request.address;
        let group = address
            .value_of("server-group")
            .filter(|_| !address.has_wildcard())
            .ok_or_else(|| not_found(address))?;
        if !self.inner.tree.exists(address) {
            return Err(not_found(address));
        }
        let groups = BTreeSet::from([group.to_string()]);
        let plan = self.plan_for(request, &groups)?;
        let operation = GroupOperation::new(server_operation, request.param_bool("blocking", false));
        let report = self.rollout(&plan, &operation, &groups).await;
        for host in report.targets().map(|t| t.host.clone()).collect::<BTreeSet<_>>() {
            if let Err(err) = self.refresh_host(&host).await {
                debug!(%host, %err, "host mirror not refreshed");
            }
        }
        if report.is_success() {
            Ok(OperationResponse::success(Value::Null).with_server_groups(report.to_value()))
        } else {
            Err(ManagementError::RolloutFailed {
                report: Box::new(report),
            })
        }
    }

    async fn rollout(&self, plan: &RolloutPlan, operation: &GroupOperation, groups: &BTreeSet<String>) -> RolloutReport {
        let targets = self.targets(groups);
        self.inner
            .coordinator
            .submit(plan, operation, &targets, &self.inner.cancel.child_token())
            .await
    }

    /// Plan named or given inline by the `rollout` header, or the default
    fn plan_for(&self, request: &OperationRequest, groups: &BTreeSet<String>) -> Result<RolloutPlan, ManagementError> {
        let Some(header) = &request.headers.rollout else {
            return Ok(RolloutPlan::default_for(groups, self.inner.config.rollout.default_plan));
        };
        let plan = match header.get("id").and_then(Value::as_str) {
            Some(id) => {
                let content = self
                    .inner
                    .tree
                    .read(|root| {
                        root.navigate(&plan_address(id))
                            .and_then(|plan| plan.attribute("content").cloned())
                    })
                    .ok_or_else(|| RolloutError::UnknownPlan(id.to_string()))?;
                RolloutPlan::parse(&content)?
            }
            None => RolloutPlan::parse(header)?,
        };
        Ok(plan.covering(groups)?)
    }

    /// Server-groups in scope of `address` that have at least one server
    fn groups_with_servers(&self, address: &PathAddress) -> BTreeSet<String> {
        self.inner.tree.read(|root| {
            let scoped: BTreeSet<String> = match mgmt_rbac::TargetScope::resolve(root, address) {
                mgmt_rbac::TargetScope::ServerGroups(groups) => groups,
                _ => BTreeSet::new(),
            };
            let populated: BTreeSet<String> = server_configs(root)
                .filter_map(|(_, _, group)| group)
                .collect();
            scoped.intersection(&populated).cloned().collect()
        })
    }

    /// (group, host) targets with the servers of each
    fn targets(&self, groups: &BTreeSet<String>) -> Vec<RolloutTarget> {
        self.inner.tree.read(|root| {
            let mut by_target: BTreeMap<(String, String), Vec<String>> = BTreeMap::new();
            for (host, server, group) in server_configs(root) {
                if let Some(group) = group.filter(|g| groups.contains(g)) {
                    by_target.entry((group, host)).or_default().push(server);
                }
            }
            by_target
                .into_iter()
                .map(|((group, host), servers)| RolloutTarget { group, host, servers })
                .collect()
        })
    }

    /// Validate stored rollout plans before they are added
    fn check_plan_content(&self, address: &PathAddress, resource: &Resource) -> Result<(), ManagementError> {
        let is_plan = address.len() == 2
            && address.value_of(ROLLOUT_PLANS_TYPE) == Some(ROLLOUT_PLANS_NAME)
            && address.resource_type() == ROLLOUT_PLAN_TYPE;
        if !is_plan {
            return Ok(());
        }
        let content = resource
            .attribute("content")
            .ok_or_else(|| ManagementError::InvalidRequest("rollout plan requires 'content'".into()))?;
        let plan = RolloutPlan::parse(content)?;
        self.inner.tree.read(|root| {
            plan.groups()
                .into_iter()
                .find(|group| root.child("server-group", group).is_none())
                .map_or(Ok(()), |group| Err(RolloutError::UnknownGroup(group).into()))
        })
    }

    /// Refuse to remove resources other configuration still points at
    fn check_unreferenced(&self, address: &PathAddress) -> Result<(), ManagementError> {
        let Some(target) = address.last().filter(|_| address.len() == 1) else {
            return Ok(());
        };
        let (key, name) = (target.key(), target.value());
        let users: Vec<String> = self.inner.tree.read(|root| match key {
            "profile" | "socket-binding-group" => root
                .children_of("server-group")
                .filter(|(_, group)| group.attribute_str(key) == Some(name))
                .map(|(group, _)| format!("server-group={group}"))
                .collect(),
            "server-group" => server_configs(root)
                .filter(|(_, _, group)| group.as_deref() == Some(name))
                .map(|(host, server, _)| format!("host={host}/server-config={server}"))
                .collect(),
            _ => Vec::new(),
        });
        if users.is_empty() {
            Ok(())
        } else {
            Err(ManagementError::InUse {
                address: address.to_string(),
                users,
            })
        }
    }

    /// Reload the primary: hosts lose their channels, the controller
    /// refuses operations until it settles, then sessions reconnect
    async fn reload(&self, admin_only: bool) {
        info!(admin_only, "domain controller reload requested");
        self.inner.state.send_replace(ControllerState::Reloading);
        let local = self.inner.router.local().clone();
        let reload_local = OperationRequest::new(
            PathAddress::root().child("host", local.name()),
            "reload",
        )
        .with_param("admin-only", admin_only);
        let response = local.execute(CallerContext::DomainToHost, reload_local).await;
        if !response.is_success() {
            warn!(failure = ?response.failure_description, "local host reload failed");
        }

        let this = self.clone();
        tokio::spawn(async move {
            this.inner.topology.begin_reload().await;
            tokio::time::sleep(this.inner.config.reload.settle()).await;
            let next = if admin_only {
                ControllerState::AdminOnly
            } else {
                ControllerState::Running
            };
            this.inner.state.send_replace(next);
            info!(state = %next, "domain controller reloaded");
            if !admin_only {
                this.inner.topology.reconnect_all().await;
            }
        });
    }
}

fn check(
    authorizer: &Authorizer<'_>,
    roles: &BTreeSet<Role>,
    request: &OperationRequest,
    effect: ActionEffect,
    attributes: &BTreeSet<String>,
) -> Result<(), ManagementError> {
    let access = attributes.iter().fold(
        AccessRequest::new(concrete_prefix(&request.address), effect),
        |access, name| access.with_attribute(name.as_str()),
    );
    match authorizer.decide(roles, &access) {
        Decision::Allow => Ok(()),
        Decision::Deny(reason) => Err(ManagementError::AuthorizationDenied {
            operation: request.operation.clone(),
            address: request.address.to_string(),
            reason,
        }),
    }
}

/// Address up to the first wildcard; wildcard matches are filtered one by one
fn concrete_prefix(address: &PathAddress) -> PathAddress {
    PathAddress::new(address.iter().take_while(|e| !e.is_wildcard()).cloned().collect())
}

fn host_of(address: &PathAddress) -> Option<&str> {
    address
        .first()
        .filter(|e| e.key() == "host" && !e.is_wildcard())
        .map(mgmt_model::PathElement::value)
}

fn reload_triggering(address: &PathAddress) -> bool {
    address
        .first()
        .is_some_and(|e| RELOAD_TRIGGERING_TYPES.contains(&e.key()))
}

fn plan_address(name: &str) -> PathAddress {
    PathAddress::root()
        .child(ROLLOUT_PLANS_TYPE, ROLLOUT_PLANS_NAME)
        .child(ROLLOUT_PLAN_TYPE, name)
}

/// (host, server, group) of every mirrored server-config
fn server_configs(root: &Resource) -> impl Iterator<Item = (String, String, Option<String>)> + '_ {
    root.children_of("host").flat_map(|(host, model)| {
        model.children_of("server-config").map(move |(server, config)| {
            (
                host.clone(),
                server.clone(),
                config.attribute_str("group").map(str::to_string),
            )
        })
    })
}

fn not_found(address: &PathAddress) -> ManagementError {
    ManagementError::Tree(TreeError::NotFound {
        address: address.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wildcard_prefix() {
        let address = PathAddress::resolve("/host=*/server=s1").unwrap();
        assert!(concrete_prefix(&address).is_empty());
        let address = PathAddress::resolve("/host=primary/server=*").unwrap();
        assert_eq!(concrete_prefix(&address).to_string(), "/host=primary");
    }

    #[test]
    fn host_targets() {
        assert_eq!(host_of(&PathAddress::resolve("/host=primary/server-config=a").unwrap()), Some("primary"));
        assert_eq!(host_of(&PathAddress::resolve("/host=*").unwrap()), None);
        assert_eq!(host_of(&PathAddress::resolve("/profile=default").unwrap()), None);
    }

    #[test]
    fn plan_addresses() {
        assert_eq!(
            plan_address("testPlan").to_string(),
            "/management-client-content=rollout-plans/rollout-plan=testPlan"
        );
        assert!(reload_triggering(&PathAddress::resolve("/profile=default/subsystem=logging").unwrap()));
        assert!(!reload_triggering(&plan_address("testPlan")));
    }

    #[test]
    fn server_configs_carry_groups() {
        let root = Resource::new().with_child(
            "host",
            "primary",
            Resource::new()
                .with_child("server-config", "a", Resource::new().with_attribute("group", "g"))
                .with_child("server-config", "b", Resource::new()),
        );
        let all: Vec<_> = server_configs(&root).collect();
        assert_eq!(
            all,
            vec![
                ("primary".to_string(), "a".to_string(), Some("g".to_string())),
                ("primary".to_string(), "b".to_string(), None),
            ]
        );
    }
}
