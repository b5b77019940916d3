//! Channels between the primary and host controllers

use super::TopologyError;
use crate::controller::HostController;
use crate::request::{OperationRequest, OperationResponse};
use async_trait::async_trait;
use dashmap::DashMap;
use std::fmt::Debug;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::debug;

const CHANNEL_CAPACITY: usize = 64;

/// One request travelling to a host controller
#[derive(Debug)]
pub struct HostEnvelope {
    pub request: OperationRequest,
    pub reply: oneshot::Sender<OperationResponse>,
}

/// Sending half of a host connection
#[derive(Debug, Clone)]
pub struct HostChannel {
    host: String,
    sender: mpsc::Sender<HostEnvelope>,
}

impl HostChannel {
    #[must_use]
    pub fn new(host: impl Into<String>, sender: mpsc::Sender<HostEnvelope>) -> Self {
        Self {
            host: host.into(),
            sender,
        }
    }

    #[inline]
    #[must_use]
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Send `request` and wait for the host's response
    ///
    /// # Errors
    /// `TopologyError::ChannelClosed` if the host side went away.
    pub async fn call(&self, request: OperationRequest) -> Result<OperationResponse, TopologyError> {
        let (reply, response) = oneshot::channel();
        self.sender
            .send(HostEnvelope { request, reply })
            .await
            .map_err(|_| self.closed())?;
        response.await.map_err(|_| self.closed())
    }

    #[inline]
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }

    fn closed(&self) -> TopologyError {
        TopologyError::ChannelClosed {
            host: self.host.clone(),
        }
    }
}

/// Opens channels to host controllers
#[async_trait]
pub trait HostConnector: Send + Sync + Debug {
    /// Open a fresh channel to `host`
    async fn connect(&self, host: &str) -> Result<HostChannel, TopologyError>;
}

/// Connector for host controllers living in the same process
///
/// Hosts can be made unreachable and their open channels cut to exercise
/// reconnection.
#[derive(Debug, Default)]
pub struct InProcessConnector {
    hosts: DashMap<String, HostController>,
    unavailable: DashMap<String, ()>,
    connections: DashMap<String, CancellationToken>,
    opened: AtomicUsize,
}

impl InProcessConnector {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `controller` reachable under its host name
    pub fn register(&self, controller: HostController) {
        self.hosts.insert(controller.name().to_string(), controller);
    }

    /// Toggle whether new connections to `host` succeed
    pub fn set_available(&self, host: &str, available: bool) {
        if available {
            self.unavailable.remove(host);
        } else {
            self.unavailable.insert(host.to_string(), ());
        }
    }

    /// Cut the open channel to `host`, if any
    pub fn disconnect(&self, host: &str) {
        if let Some((_, token)) = self.connections.remove(host) {
            debug!(host, "cutting host channel");
            token.cancel();
        }
    }

    /// Number of channels opened so far
    #[must_use]
    pub fn connections_opened(&self) -> usize {
        self.opened.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl HostConnector for InProcessConnector {
    async fn connect(&self, host: &str) -> Result<HostChannel, TopologyError> {
        if self.unavailable.contains_key(host) {
            return Err(TopologyError::Unreachable {
                host: host.to_string(),
                reason: "connection refused".to_string(),
            });
        }
        let controller = self
            .hosts
            .get(host)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| TopologyError::UnknownHost(host.to_string()))?;

        let (sender, receiver) = mpsc::channel(CHANNEL_CAPACITY);
        let token = CancellationToken::new();
        if let Some(previous) = self.connections.insert(host.to_string(), token.clone()) {
            previous.cancel();
        }
        controller.serve(receiver, token);
        self.opened.fetch_add(1, Ordering::Relaxed);
        Ok(HostChannel::new(host, sender))
    }
}
