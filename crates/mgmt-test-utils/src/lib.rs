//! Shared fixtures for management plane tests
//!
//! A two-host domain (`primary` and `secondary`) with two server-groups,
//! one principal per standard role plus scoped principals, and launchers
//! that fail or stall on demand.

#![allow(missing_docs)]

use async_trait::async_trait;
use dashmap::DashSet;
use mgmt_core::{
    ConstantHandler, ControllerConfig, Domain, DomainBootstrap, DomainBuilder, Extension,
    ExtensionRegistrar, InMemoryLauncher, LaunchError, ManagementError, OperationRequest,
    OperationResponse, ReconnectConfig, ServerLauncher,
};
use mgmt_model::PathAddress;
use mgmt_ops::{ActionEffect, OperationDescriptor, Visibility};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

pub const PRIMARY: &str = "primary";
pub const SECONDARY: &str = "secondary";
pub const MAIN_GROUP: &str = "main-server-group";
pub const OTHER_GROUP: &str = "other-server-group";

pub const TWO_HOST_DOMAIN: &str = r#"
[profiles.default]
subsystems = { logging = { level = "INFO" } }

[profiles.other]
subsystems = { logging = { level = "WARN" } }

[socket-binding-groups.standard-sockets]
default-interface = "public"

[socket-binding-groups.other-sockets]
default-interface = "public"

[server-groups.main-server-group]
profile = "default"
socket-binding-group = "standard-sockets"
deployments = ["app.war"]

[server-groups.other-server-group]
profile = "other"
socket-binding-group = "other-sockets"

[deployments."app.war"]
runtime-name = "app.war"

[hosts.primary.servers.main-one]
group = "main-server-group"
auto-start = true

[hosts.primary.servers.other-one]
group = "other-server-group"
auto-start = true

[hosts.secondary.servers.main-three]
group = "main-server-group"
auto-start = true

[hosts.secondary.servers.other-two]
group = "other-server-group"
auto-start = true
port-offset = 150

[authorization]
provider = "rbac"

[authorization.role-mappings.SuperUser]
include = ["user:admin"]

[authorization.role-mappings.Administrator]
include = ["user:administrator"]

[authorization.role-mappings.Maintainer]
include = ["user:maintainer"]

[authorization.role-mappings.Deployer]
include = ["user:deployer"]

[authorization.role-mappings.Operator]
include = ["user:operator"]

[authorization.role-mappings.Monitor]
include = ["user:monitor", "group:watchers"]

[authorization.role-mappings.Auditor]
include = ["user:auditor"]

[authorization.role-mappings.primary-maintainers]
include = ["user:primary-maintainer"]

[authorization.role-mappings.main-maintainers]
include = ["user:main-maintainer"]

[authorization.role-mappings.main-monitors]
include = ["user:main-monitor"]

[authorization.host-scoped-roles.primary-maintainers]
base-role = "Maintainer"
hosts = ["primary"]

[authorization.server-group-scoped-roles.main-maintainers]
base-role = "Maintainer"
server-groups = ["main-server-group"]

[authorization.server-group-scoped-roles.main-monitors]
base-role = "Monitor"
server-groups = ["main-server-group"]

[users.admin]
[users.administrator]
[users.maintainer]
[users.deployer]
[users.operator]
[users.monitor]
[users.auditor]
[users.primary-maintainer]
[users.main-maintainer]
[users.main-monitor]

[users.watcher]
groups = ["watchers"]
"#;

/// Bootstrap of the two-host domain
#[must_use]
pub fn two_host_bootstrap() -> DomainBootstrap {
    DomainBootstrap::from_toml(TWO_HOST_DOMAIN).expect("fixture bootstrap parses")
}

/// Configuration with timeouts small enough for tests
#[must_use]
pub fn test_config() -> ControllerConfig {
    let mut config = ControllerConfig::default()
        .with_primary_host(PRIMARY)
        .with_step_timeout(Duration::from_millis(500))
        .with_reconnect(ReconnectConfig {
            initial_backoff_ms: 10,
            max_backoff_ms: 50,
            multiplier: 2.0,
            jitter: 0.0,
            max_attempts: 0,
        });
    config.reload.settle_ms = 20;
    config
}

/// Builder for the two-host domain with test configuration
#[must_use]
pub fn two_host_builder() -> DomainBuilder {
    DomainBuilder::new(two_host_bootstrap()).with_config(test_config())
}

/// Boot the two-host domain with in-memory launchers
pub async fn boot_two_hosts() -> Domain {
    two_host_builder().boot().await.expect("two-host domain boots")
}

/// Execute `operation` on `address` as `user`
pub async fn exec(domain: &Domain, user: &str, address: &str, operation: &str) -> OperationResponse {
    domain.execute(user, request(address, operation)).await
}

/// Request for `operation` on `address`
#[must_use]
pub fn request(address: &str, operation: &str) -> OperationRequest {
    OperationRequest::new(
        PathAddress::resolve(address).expect("fixture address parses"),
        operation,
    )
}

/// Result of a response that must have succeeded
#[track_caller]
#[must_use]
pub fn success(response: &OperationResponse) -> Value {
    assert!(
        response.is_success(),
        "expected success, got {}",
        response.to_json()
    );
    response.result_or_null()
}

/// Failure description of a response that must have failed
#[track_caller]
#[must_use]
pub fn failure(response: &OperationResponse) -> String {
    assert!(
        !response.is_success(),
        "expected failure, got {}",
        response.to_json()
    );
    response.failure_description.clone().unwrap_or_default()
}

/// Poll `check` every 10ms until it holds or `timeout` elapses
pub async fn eventually<F, Fut>(timeout: Duration, mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if check().await {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Launcher refusing to start the named servers
#[derive(Debug, Default)]
pub struct FailingLauncher {
    inner: InMemoryLauncher,
    failing: DashSet<String>,
}

impl FailingLauncher {
    #[must_use]
    pub fn new<I, S>(servers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            inner: InMemoryLauncher::new(),
            failing: servers.into_iter().map(Into::into).collect(),
        }
    }

    /// Start failing `server` from now on
    pub fn fail(&self, server: &str) {
        self.failing.insert(server.to_string());
    }
}

#[async_trait]
impl ServerLauncher for FailingLauncher {
    async fn start(&self, host: &str, server: &str, group: &str) -> Result<(), LaunchError> {
        if self.failing.contains(server) {
            return Err(LaunchError::new(host, server, "launch refused"));
        }
        self.inner.start(host, server, group).await
    }

    async fn stop(&self, host: &str, server: &str) -> Result<(), LaunchError> {
        self.inner.stop(host, server).await
    }
}

/// Launcher whose starts take `delay` once armed
#[derive(Debug)]
pub struct SlowLauncher {
    inner: InMemoryLauncher,
    delay: Duration,
    armed: std::sync::atomic::AtomicBool,
}

impl SlowLauncher {
    /// Starts are immediate until [`SlowLauncher::arm`] is called
    #[must_use]
    pub fn new(delay: Duration) -> Self {
        Self {
            inner: InMemoryLauncher::new(),
            delay,
            armed: std::sync::atomic::AtomicBool::new(false),
        }
    }

    pub fn arm(&self) {
        self.armed.store(true, std::sync::atomic::Ordering::SeqCst);
    }
}

#[async_trait]
impl ServerLauncher for SlowLauncher {
    async fn start(&self, host: &str, server: &str, group: &str) -> Result<(), LaunchError> {
        if self.armed.load(std::sync::atomic::Ordering::SeqCst) {
            tokio::time::sleep(self.delay).await;
        }
        self.inner.start(host, server, group).await
    }

    async fn stop(&self, host: &str, server: &str) -> Result<(), LaunchError> {
        self.inner.stop(host, server).await
    }
}

/// Root operations of every visibility, each returning its own name
#[derive(Debug, Default)]
pub struct VisibilityProbe;

impl VisibilityProbe {
    pub const OPERATIONS: [(&'static str, Visibility); 5] = [
        ("public-probe", Visibility::Public),
        ("hidden-probe", Visibility::Hidden),
        ("private-probe", Visibility::Private),
        ("domain-hidden-probe", Visibility::DomainHidden),
        ("domain-private-probe", Visibility::DomainPrivate),
    ];
}

impl Extension for VisibilityProbe {
    fn name(&self) -> &str {
        "visibility-probe"
    }

    fn initialize(&self, registrar: &mut ExtensionRegistrar) -> Result<(), ManagementError> {
        for (name, visibility) in Self::OPERATIONS {
            registrar.register_operation(
                OperationDescriptor::new(name, mgmt_model::ROOT_TYPE, ActionEffect::ReadConfig)
                    .with_visibility(visibility),
                Arc::new(ConstantHandler(json!(name))),
            );
        }
        Ok(())
    }
}
