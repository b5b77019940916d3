//! Host controller
//!
//! Owns the authoritative `host=<name>` subtree plus a synced copy of the
//! domain content, and drives the host's servers through a
//! [`ServerLauncher`]. Only the domain controller talks to it.

use crate::content;
use crate::error::ManagementError;
use crate::extension::{OperationContext, OperationHandler};
use crate::handlers::{self, Handler, Registry, ServerAction};
use crate::launcher::ServerLauncher;
use crate::request::{OperationRequest, OperationResponse};
use crate::topology::HostEnvelope;
use futures::future::join_all;
use mgmt_model::{with_version_attributes, PathAddress, RenderFilter, Resource, ResourceTree, RuntimeState, TreeError};
use mgmt_ops::{CallerContext, OperationDescriptor};
use serde_json::{json, Map, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug)]
struct HostInner {
    name: String,
    tree: Arc<ResourceTree>,
    registry: Registry,
    launcher: Arc<dyn ServerLauncher>,
    settle: Duration,
}

/// Controller of one host
#[derive(Debug, Clone)]
pub struct HostController {
    inner: Arc<HostInner>,
}

impl HostController {
    /// Create controller for `name` from its bootstrap model
    ///
    /// # Errors
    /// `ManagementError::Registry` if the catalog cannot be built.
    pub fn new(
        name: impl Into<String>,
        model: Resource,
        launcher: Arc<dyn ServerLauncher>,
        settle: Duration,
    ) -> Result<Self, ManagementError> {
        let name = name.into();
        let host = with_version_attributes(model)
            .with_runtime_attribute("host-state", RuntimeState::Running.as_str())
            .with_runtime_attribute("running-mode", "normal")
            .with_child_type("server-config")
            .with_child_type("server");
        let root = with_version_attributes(Resource::new()).with_child("host", name.as_str(), host);
        let registry = Registry::new();
        handlers::register_host(&registry)?;
        Ok(Self {
            inner: Arc::new(HostInner {
                name,
                tree: Arc::new(ResourceTree::new(root)),
                registry,
                launcher,
                settle,
            }),
        })
    }

    #[inline]
    #[must_use]
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    #[inline]
    #[must_use]
    pub fn tree(&self) -> &Arc<ResourceTree> {
        &self.inner.tree
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

    fn host_address(&self) -> PathAddress {
        PathAddress::root().child("host", self.name())
    }

    /// Start every server configured with `auto-start`
    pub async fn boot(&self) {
        let auto: Vec<(String, String)> = self.inner.tree.read(|root| {
            root.child("host", self.name())
                .map(|host| {
                    host.children_of("server-config")
                        .filter(|(_, config)| {
                            config.attribute("auto-start").and_then(Value::as_bool).unwrap_or(false)
                        })
                        .filter_map(|(name, config)| {
                            config
                                .attribute_str("group")
                                .map(|group| (name.clone(), group.to_string()))
                        })
                        .collect()
                })
                .unwrap_or_default()
        });
        info!(host = %self.name(), servers = auto.len(), "host controller booting");
        for (server, group) in auto {
            if let Err(err) = self.start_server(&server, &group, true).await {
                warn!(host = %self.name(), %server, %err, "auto-start failed");
            }
        }
    }

    /// Serve requests arriving on `requests` until `token` fires
    pub fn serve(&self, mut requests: mpsc::Receiver<HostEnvelope>, token: CancellationToken) {
        let this = self.clone();
        tokio::spawn(async move {
            debug!(host = %this.name(), "serving domain channel");
            loop {
                tokio::select! {
                    () = token.cancelled() => break,
                    envelope = requests.recv() => {
                        let Some(HostEnvelope { request, reply }) = envelope else {
                            break;
                        };
                        let worker = this.clone();
                        tokio::spawn(async move {
                            let response = worker.execute(CallerContext::DomainToHost, request).await;
                            let _ = reply.send(response);
                        });
                    }
                }
            }
            debug!(host = %this.name(), "domain channel closed");
        });
    }

    /// Execute `request` for `caller`; failures become failed responses
    pub async fn execute(&self, caller: CallerContext, request: OperationRequest) -> OperationResponse {
        let operation = request.operation.clone();
        let address = request.address.to_string();
        match self.run(caller, request).await {
            Ok(result) => OperationResponse::success(result),
            Err(err) => {
                debug!(host = %self.name(), %operation, %address, %err, "host operation failed");
                OperationResponse::failed(&err)
            }
        }
    }

    async fn run(&self, caller: CallerContext, mut request: OperationRequest) -> Result<Value, ManagementError> {
        if caller == CallerContext::External {
            return Err(ManagementError::InvalidRequest(format!(
                "host controller '{}' only accepts requests from the domain controller",
                self.name()
            )));
        }
        let entry = self
            .inner
            .registry
            .resolve(request.address.resource_type(), &request.operation, caller)?;
        request.params = entry
            .descriptor
            .bind(&request.params)
            .map_err(ManagementError::InvalidRequest)?;

        let tree = &self.inner.tree;
        let address = &request.address;
        let mut visible = |_: &PathAddress, _: &Resource| RenderFilter::visible();
        match &entry.handler {
            Handler::ReadResource => tree.read(|root| {
                handlers::read_resource(root, address, handlers::render_options(&request), &mut visible)
            }),
            Handler::ReadChildrenNames => {
                let child_type = request.require_str("child-type")?;
                tree.read(|root| handlers::read_children_names(root, address, child_type, &mut visible))
            }
            Handler::ReadChildrenResources => {
                let child_type = request.require_str("child-type")?;
                tree.read(|root| {
                    handlers::read_children_resources(
                        root,
                        address,
                        child_type,
                        handlers::render_options(&request),
                        &mut visible,
                    )
                })
            }
            Handler::ReadAttribute => Ok(tree.read_attribute(address, request.require_str("name")?)?),
            Handler::WriteAttribute => {
                let value = request.param("value").cloned().unwrap_or(Value::Null);
                tree.write_attribute(address, request.require_str("name")?, value)?;
                Ok(Value::Null)
            }
            Handler::Add => {
                tree.add(address, handlers::add_attributes(&request))?;
                Ok(Value::Null)
            }
            Handler::Remove => {
                tree.remove(address)?;
                Ok(Value::Null)
            }
            Handler::ValidateAddress => {
                let result = match handlers::validation_candidate(request.param("value").unwrap_or(&Value::Null)) {
                    Ok(candidate) => tree.validate(&candidate),
                    Err(invalid) => invalid,
                };
                Ok(result.to_value())
            }
            Handler::ReadOperationNames => Ok(Value::from(
                self.inner.registry.introspectable_names(address.resource_type()),
            )),
            Handler::Server(action) => {
                let server = self.local_server(address)?;
                self.server_action(&server, *action, request.param_bool("blocking", false))
                    .await
            }
            Handler::Reload => {
                self.check_host(address)?;
                self.reload(request.param_bool("admin-only", false));
                Ok(Value::Null)
            }
            Handler::ReadHostModel => {
                self.check_host(address)?;
                let model = tree
                    .read(|root| root.child("host", self.name()).cloned())
                    .ok_or_else(|| not_found(address))?;
                serde_json::to_value(model).map_err(|e| ManagementError::Internal(e.to_string()))
            }
            Handler::ApplyServerGroupOperation => {
                self.check_host(address)?;
                self.apply_group_operation(
                    request.require_str("server-group")?,
                    request.require_str("server-operation")?,
                    request.param_bool("blocking", false),
                )
                .await
            }
            Handler::SyncDomainContent => {
                let synced = content::from_value(request.param("content").unwrap_or(&Value::Null))?;
                tree.write(|root| content::replace(root, &synced));
                info!(host = %self.name(), "domain content synchronized");
                Ok(Value::Null)
            }
            Handler::ReadContentDigest => {
                let digest = tree.read(|root| content::digest(&content::extract(root)))?;
                Ok(Value::String(digest))
            }
            Handler::ServerGroup(_) => Err(ManagementError::InvalidRequest(
                "server-group operations are coordinated by the domain controller".into(),
            )),
            Handler::Custom(handler) => {
                let context = OperationContext {
                    tree: Arc::clone(tree),
                    caller,
                    host: Some(self.name().to_string()),
                };
                handler.execute(&context, &request).await
            }
        }
    }

    fn check_host(&self, address: &PathAddress) -> Result<(), ManagementError> {
        match address.value_of("host") {
            Some(host) if host == self.name() => Ok(()),
            _ => Err(ManagementError::InvalidRequest(format!(
                "'{address}' is not managed by host '{}'",
                self.name()
            ))),
        }
    }

    fn local_server(&self, address: &PathAddress) -> Result<String, ManagementError> {
        self.check_host(address)?;
        address
            .value_of("server-config")
            .map(str::to_string)
            .ok_or_else(|| not_found(address))
    }

    fn server_config(&self, server: &str) -> Option<(String, Option<RuntimeState>)> {
        self.inner.tree.read(|root| {
            root.child("host", self.name())
                .and_then(|host| host.child("server-config", server))
                .map(|config| {
                    (
                        config.attribute_str("group").unwrap_or_default().to_string(),
                        config.runtime_state(),
                    )
                })
        })
    }

    async fn server_action(
        &self,
        server: &str,
        action: ServerAction,
        blocking: bool,
    ) -> Result<Value, ManagementError> {
        let (group, _) = self
            .server_config(server)
            .ok_or_else(|| not_found(&self.host_address().child("server-config", server)))?;
        match action {
            ServerAction::Start => self.start_server(server, &group, blocking).await,
            ServerAction::Stop => self.stop_server(server, blocking).await,
            ServerAction::Restart => {
                self.stop_server(server, true).await?;
                self.start_server(server, &group, blocking).await
            }
        }
    }

    async fn start_server(&self, server: &str, group: &str, blocking: bool) -> Result<Value, ManagementError> {
        if let Some((_, Some(state))) = self.server_config(server) {
            if state.is_live() {
                return Ok(json!(state.as_str()));
            }
        }
        self.set_server_state(server, group, RuntimeState::Starting);
        if blocking {
            self.launch(server.to_string(), group.to_string()).await?;
            return Ok(json!(RuntimeState::Running.as_str()));
        }
        let this = self.clone();
        let (server, group) = (server.to_string(), group.to_string());
        tokio::spawn(async move {
            if let Err(err) = this.launch(server.clone(), group).await {
                warn!(host = %this.name(), %server, %err, "server start failed");
            }
        });
        Ok(json!(RuntimeState::Starting.as_str()))
    }

    async fn launch(&self, server: String, group: String) -> Result<(), ManagementError> {
        match self.inner.launcher.start(self.name(), &server, &group).await {
            Ok(()) => {
                info!(host = %self.name(), %server, %group, "server started");
                self.set_server_state(&server, &group, RuntimeState::Running);
                Ok(())
            }
            Err(err) => {
                self.set_server_state(&server, &group, RuntimeState::Stopped);
                Err(err.into())
            }
        }
    }

    async fn stop_server(&self, server: &str, blocking: bool) -> Result<Value, ManagementError> {
        let Some((group, Some(state))) = self.server_config(server) else {
            return Ok(json!(RuntimeState::Stopped.as_str()));
        };
        if !state.is_live() {
            return Ok(json!(state.as_str()));
        }
        self.set_server_state(server, &group, RuntimeState::Stopping);
        if blocking {
            self.halt(server.to_string(), group).await?;
            return Ok(json!(RuntimeState::Stopped.as_str()));
        }
        let this = self.clone();
        let server = server.to_string();
        tokio::spawn(async move {
            if let Err(err) = this.halt(server.clone(), group).await {
                warn!(host = %this.name(), %server, %err, "server stop failed");
            }
        });
        Ok(json!(RuntimeState::Stopping.as_str()))
    }

    async fn halt(&self, server: String, group: String) -> Result<(), ManagementError> {
        let stopped = self.inner.launcher.stop(self.name(), &server).await;
        self.set_server_state(&server, &group, RuntimeState::Stopped);
        stopped?;
        info!(host = %self.name(), %server, "server stopped");
        Ok(())
    }

    async fn reload_server(&self, server: &str) -> Result<Value, ManagementError> {
        let Some((group, Some(state))) = self.server_config(server) else {
            return Ok(json!(RuntimeState::Stopped.as_str()));
        };
        if !state.is_live() {
            return Ok(json!(state.as_str()));
        }
        self.inner.launcher.reload(self.name(), server).await?;
        self.set_server_state(server, &group, RuntimeState::Running);
        Ok(json!(RuntimeState::Running.as_str()))
    }

    fn require_reload(&self, server: &str) -> Value {
        let Some((group, Some(state))) = self.server_config(server) else {
            return json!(RuntimeState::Stopped.as_str());
        };
        if state.is_live() {
            self.set_server_state(server, &group, RuntimeState::ReloadRequired);
            return json!(RuntimeState::ReloadRequired.as_str());
        }
        json!(state.as_str())
    }

    /// Record `state` on the server-config and its `server=<name>` runtime
    fn set_server_state(&self, server: &str, group: &str, state: RuntimeState) {
        let name = self.name().to_string();
        self.inner.tree.write(|root| {
            let Some(host) = root.child_mut("host", &name) else {
                return;
            };
            if let Some(config) = host.child_mut("server-config", server) {
                config.set_runtime_state(state);
            }
            if state.is_live() {
                let runtime = with_version_attributes(Resource::new())
                    .with_attribute("name", server)
                    .with_attribute("host", name.as_str())
                    .with_attribute("server-group", group)
                    .with_runtime_attribute("server-state", state.as_str())
                    .with_runtime_state(state);
                host.insert_child("server", server, runtime);
            } else {
                host.remove_child("server", server);
            }
        });
    }

    /// Apply `operation` to every server of `group` on this host
    async fn apply_group_operation(
        &self,
        group: &str,
        operation: &str,
        blocking: bool,
    ) -> Result<Value, ManagementError> {
        if !matches!(operation, "start" | "stop" | "restart" | "reload" | "require-reload") {
            return Err(ManagementError::InvalidRequest(format!(
                "unknown server operation '{operation}'"
            )));
        }
        let servers: Vec<String> = self.inner.tree.read(|root| {
            root.child("host", self.name())
                .map(|host| {
                    host.children_of("server-config")
                        .filter(|(_, config)| config.attribute_str("group") == Some(group))
                        .map(|(name, _)| name.clone())
                        .collect()
                })
                .unwrap_or_default()
        });
        debug!(host = %self.name(), %group, %operation, servers = servers.len(), "applying group operation");

        let results = join_all(servers.iter().map(|server| async move {
            let result = match operation {
                "start" => self.server_action(server, ServerAction::Start, blocking).await,
                "stop" => self.server_action(server, ServerAction::Stop, blocking).await,
                "restart" => self.server_action(server, ServerAction::Restart, blocking).await,
                "reload" => self.reload_server(server).await,
                _ => Ok(self.require_reload(server)),
            };
            (server.clone(), result)
        }))
        .await;

        let mut outcomes = Map::new();
        for (server, result) in results {
            let entry = match result {
                Ok(value) => json!({"outcome": "success", "result": value}),
                Err(err) => json!({"outcome": "failed", "failure-description": err.failure_description()}),
            };
            outcomes.insert(server, entry);
        }
        Ok(json!({ "servers": outcomes }))
    }

    /// Restart the host runtime; `host-state` reads `starting` until done
    fn reload(&self, admin_only: bool) {
        info!(host = %self.name(), admin_only, "host reload requested");
        self.set_host_state("starting", None);
        let this = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(this.inner.settle).await;
            if admin_only {
                let live: Vec<String> = this.inner.tree.read(|root| {
                    root.child("host", this.name())
                        .map(|host| host.child_names("server"))
                        .unwrap_or_default()
                });
                for server in live {
                    if let Err(err) = this.stop_server(&server, true).await {
                        warn!(host = %this.name(), %server, %err, "stop during admin-only reload failed");
                    }
                }
            }
            let mode = if admin_only { "admin-only" } else { "normal" };
            this.set_host_state(RuntimeState::Running.as_str(), Some(mode));
            info!(host = %this.name(), running_mode = mode, "host reload complete");
        });
    }

    fn set_host_state(&self, state: &str, mode: Option<&str>) {
        let name = self.name().to_string();
        self.inner.tree.write(|root| {
            if let Some(host) = root.child_mut("host", &name) {
                host.set_runtime_attribute("host-state", json!(state));
                if let Some(mode) = mode {
                    host.set_runtime_attribute("running-mode", json!(mode));
                }
            }
        });
    }
}

fn not_found(address: &PathAddress) -> ManagementError {
    ManagementError::Tree(TreeError::NotFound {
        address: address.to_string(),
    })
}
