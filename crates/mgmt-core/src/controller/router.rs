//! Routing of domain-to-host calls
//!
//! The primary's own host controller is called in process; every other host
//! is reached through its topology session.

use super::host::HostController;
use crate::error::ManagementError;
use crate::request::{OperationRequest, OperationResponse};
use crate::rollout::{GroupOperation, ServerOutcome, TargetDispatcher};
use crate::topology::TopologyManager;
use async_trait::async_trait;
use mgmt_model::{PathAddress, Resource};
use mgmt_ops::CallerContext;
use serde_json::Value;
use std::sync::Arc;

#[derive(Debug, Clone)]
pub struct HostRouter {
    local: HostController,
    topology: Arc<TopologyManager>,
}

impl HostRouter {
    #[must_use]
    pub fn new(local: HostController, topology: Arc<TopologyManager>) -> Self {
        Self { local, topology }
    }

    #[inline]
    #[must_use]
    pub fn local(&self) -> &HostController {
        &self.local
    }

    /// Local host first, then remote hosts sorted
    #[must_use]
    pub fn hosts(&self) -> Vec<String> {
        std::iter::once(self.local.name().to_string())
            .chain(self.topology.hosts())
            .collect()
    }

    /// Check whether `host` is part of the topology
    #[must_use]
    pub fn knows(&self, host: &str) -> bool {
        host == self.local.name() || self.topology.state(host).is_ok()
    }

    /// Send `request` to `host` as the domain controller
    ///
    /// # Errors
    /// `ManagementError::Topology` if the host cannot be reached.
    pub async fn call(&self, host: &str, request: OperationRequest) -> Result<OperationResponse, ManagementError> {
        if host == self.local.name() {
            return Ok(self.local.execute(CallerContext::DomainToHost, request).await);
        }
        Ok(self.topology.dispatch(host, request).await?)
    }

    /// Like [`HostRouter::call`] but unwraps the result
    ///
    /// # Errors
    /// `ManagementError::Remote` carrying the host's failure description.
    pub async fn invoke(&self, host: &str, request: OperationRequest) -> Result<Value, ManagementError> {
        self.call(host, request).await?.into_result()
    }

    /// Current model of `host`, runtime included
    ///
    /// # Errors
    /// Failure to reach the host or to decode its answer.
    pub async fn host_model(&self, host: &str) -> Result<Resource, ManagementError> {
        let value = self
            .invoke(
                host,
                OperationRequest::new(PathAddress::root().child("host", host), "read-host-model"),
            )
            .await?;
        serde_json::from_value(value).map_err(|e| {
            ManagementError::Internal(format!("host '{host}' returned an unreadable model: {e}"))
        })
    }
}

#[async_trait]
impl TargetDispatcher for HostRouter {
    async fn dispatch_group(
        &self,
        host: &str,
        group: &str,
        operation: &GroupOperation,
    ) -> Result<Vec<ServerOutcome>, ManagementError> {
        let request = OperationRequest::new(
            PathAddress::root().child("host", host),
            "apply-server-group-operation",
        )
        .with_param("server-group", group)
        .with_param("server-operation", operation.server_operation.as_str())
        .with_param("blocking", operation.blocking);
        let result = self.invoke(host, request).await?;
        let outcomes = result
            .get("servers")
            .and_then(Value::as_object)
            .map(|servers| {
                servers
                    .iter()
                    .map(|(server, outcome)| ServerOutcome {
                        server: server.clone(),
                        failure: (outcome.get("outcome").and_then(Value::as_str) != Some("success"))
                            .then(|| {
                                outcome
                                    .get("failure-description")
                                    .and_then(Value::as_str)
                                    .unwrap_or("server operation failed")
                                    .to_string()
                            }),
                    })
                    .collect()
            })
            .unwrap_or_default();
        Ok(outcomes)
    }
}
