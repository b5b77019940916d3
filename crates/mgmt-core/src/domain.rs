//! In-process domain assembly
//!
//! [`DomainBuilder`] turns a [`DomainBootstrap`] into a running domain: one
//! host controller per declared host, a topology session per secondary and
//! the domain controller on the primary.

use crate::bootstrap::DomainBootstrap;
use crate::config::ControllerConfig;
use crate::content;
use crate::controller::{DomainController, HostController, HostRouter};
use crate::error::ManagementError;
use crate::extension::{Extension, ExtensionRegistrar, OperationHandler};
use crate::launcher::{InMemoryLauncher, ServerLauncher};
use crate::request::{OperationRequest, OperationResponse};
use crate::topology::{DomainContent, InProcessConnector, SessionState, TopologyManager};
use mgmt_model::{PathAddress, Resource, ResourceTree};
use mgmt_ops::{CallerContext, OperationDescriptor};
use mgmt_rbac::Principal;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// How long boot waits for each secondary to reach `running`
const BOOT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

type Operations = Vec<(OperationDescriptor, Arc<dyn OperationHandler>)>;

/// Builder for an in-process domain
#[derive(Debug)]
pub struct DomainBuilder {
    bootstrap: DomainBootstrap,
    config: ControllerConfig,
    launcher: Arc<dyn ServerLauncher>,
    host_launchers: HashMap<String, Arc<dyn ServerLauncher>>,
    extensions: Vec<Arc<dyn Extension>>,
}

impl DomainBuilder {
    #[must_use]
    pub fn new(bootstrap: DomainBootstrap) -> Self {
        Self {
            bootstrap,
            config: ControllerConfig::default(),
            launcher: Arc::new(InMemoryLauncher::new()),
            host_launchers: HashMap::new(),
            extensions: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_config(mut self, config: ControllerConfig) -> Self {
        self.config = config;
        self
    }

    /// Launcher for every host without its own
    #[must_use]
    pub fn with_launcher(mut self, launcher: Arc<dyn ServerLauncher>) -> Self {
        self.launcher = launcher;
        self
    }

    #[must_use]
    pub fn with_host_launcher(mut self, host: impl Into<String>, launcher: Arc<dyn ServerLauncher>) -> Self {
        self.host_launchers.insert(host.into(), launcher);
        self
    }

    #[must_use]
    pub fn with_extension(mut self, extension: Arc<dyn Extension>) -> Self {
        self.extensions.push(extension);
        self
    }

    /// Build every controller, start auto-start servers and connect the
    /// secondaries
    ///
    /// # Errors
    /// - `ManagementError::Config` for an invalid bootstrap or configuration
    /// - whatever an extension reports from `initialize`
    pub async fn boot(self) -> Result<Domain, ManagementError> {
        self.config.validate()?;
        let primary = self.config.primary_host.clone();
        self.bootstrap.validate(&primary)?;

        let mut extension_operations: Operations = Vec::new();
        let mut extension_names = Vec::new();
        for extension in &self.extensions {
            let mut registrar = ExtensionRegistrar::new();
            extension.initialize(&mut registrar)?;
            extension_operations.extend(registrar.into_operations());
            extension_names.push(extension.name().to_string());
        }

        let mut hosts = BTreeMap::new();
        for name in self.bootstrap.hosts.keys() {
            let model = self
                .bootstrap
                .host_model(name)
                .ok_or_else(|| ManagementError::Config(format!("host '{name}' has no model")))?;
            let launcher = self
                .host_launchers
                .get(name)
                .map_or_else(|| Arc::clone(&self.launcher), Arc::clone);
            let host = HostController::new(name.as_str(), model, launcher, self.config.reload.settle())?;
            host.install(&extension_operations)?;
            hosts.insert(name.clone(), host);
        }
        let local = hosts
            .get(&primary)
            .cloned()
            .ok_or_else(|| ManagementError::Config(format!("primary host '{primary}' is not declared")))?;

        let mut model = self.bootstrap.domain_model();
        for name in &extension_names {
            model.insert_child("extension", name.as_str(), Resource::new().with_attribute("module", name.as_str()));
        }
        let tree = Arc::new(ResourceTree::new(model));

        let connector = Arc::new(InProcessConnector::new());
        for (name, host) in &hosts {
            if *name != primary {
                connector.register(host.clone());
            }
        }
        let cancel = CancellationToken::new();
        let topology = Arc::new(TopologyManager::new(
            Arc::clone(&connector) as Arc<dyn crate::topology::HostConnector>,
            Arc::clone(&tree) as Arc<dyn DomainContent>,
            self.config.reconnect.clone(),
            cancel.child_token(),
        ));
        let router = HostRouter::new(local.clone(), Arc::clone(&topology));
        let controller = DomainController::new(
            Arc::clone(&tree),
            router,
            Arc::clone(&topology),
            self.config.clone(),
            cancel.clone(),
        )?;
        controller.install(&extension_operations)?;

        sync_local(&tree, &local).await?;
        for host in hosts.values() {
            host.boot().await;
        }
        controller.refresh_host(&primary).await?;

        for name in self.bootstrap.secondary_hosts(&primary) {
            topology.add_host(name).await;
        }
        for name in topology.hosts() {
            if let Err(err) = topology
                .wait_for_state(&name, SessionState::Running, BOOT_CONNECT_TIMEOUT)
                .await
            {
                warn!(host = %name, %err, "secondary not running after boot");
            }
        }
        info!(%primary, hosts = hosts.len(), extensions = extension_names.len(), "domain booted");

        Ok(Domain {
            bootstrap: self.bootstrap,
            controller,
            hosts,
            connector,
            topology,
            cancel,
        })
    }
}

/// Push the domain content to the primary's own host controller
async fn sync_local(tree: &ResourceTree, local: &HostController) -> Result<(), ManagementError> {
    let payload = tree.read(|root| content::to_value(&content::extract(root)))?;
    let request = OperationRequest::new(PathAddress::root(), "sync-domain-content").with_param("content", payload);
    local
        .execute(CallerContext::DomainToHost, request)
        .await
        .into_result()
        .map(|_| ())
}

/// A booted in-process domain
#[derive(Debug)]
pub struct Domain {
    bootstrap: DomainBootstrap,
    controller: DomainController,
    hosts: BTreeMap<String, HostController>,
    connector: Arc<InProcessConnector>,
    topology: Arc<TopologyManager>,
    cancel: CancellationToken,
}

impl Domain {
    #[inline]
    #[must_use]
    pub fn controller(&self) -> &DomainController {
        &self.controller
    }

    #[must_use]
    pub fn host(&self, name: &str) -> Option<&HostController> {
        self.hosts.get(name)
    }

    #[inline]
    #[must_use]
    pub fn connector(&self) -> &Arc<InProcessConnector> {
        &self.connector
    }

    #[inline]
    #[must_use]
    pub fn topology(&self) -> &Arc<TopologyManager> {
        &self.topology
    }

    /// Principal of a bootstrap user
    #[must_use]
    pub fn principal(&self, user: &str) -> Option<Principal> {
        self.bootstrap.principal(user)
    }

    /// Execute `request` as bootstrap user `user`
    ///
    /// Unknown users run without groups, so only `include-all` mappings
    /// apply to them.
    pub async fn execute(&self, user: &str, request: OperationRequest) -> OperationResponse {
        let principal = self.principal(user).unwrap_or_else(|| Principal::user(user));
        self.controller.execute(&principal, request).await
    }

    /// Execute a JSON request as `user`
    pub async fn execute_json(&self, user: &str, request: &Value) -> OperationResponse {
        let principal = self.principal(user).unwrap_or_else(|| Principal::user(user));
        self.controller.execute_json(&principal, request).await
    }

    /// Stop sessions and host listeners
    pub async fn shutdown(&self) {
        self.topology.shutdown().await;
        self.cancel.cancel();
        info!("domain shut down");
    }
}
