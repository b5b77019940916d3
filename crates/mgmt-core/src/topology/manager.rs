//! Session registry for secondary hosts

use super::connector::HostConnector;
use super::session::{Session, SessionCommand};
use super::state::SessionState;
use super::{DomainContent, TopologyError};
use crate::config::ReconnectConfig;
use crate::request::{OperationRequest, OperationResponse};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

const COMMAND_CAPACITY: usize = 256;

#[derive(Debug, Clone)]
struct SessionHandle {
    commands: mpsc::Sender<SessionCommand>,
    state: watch::Receiver<SessionState>,
}

/// Owns one session task per secondary host
#[derive(Debug)]
pub struct TopologyManager {
    sessions: DashMap<String, SessionHandle>,
    connector: Arc<dyn HostConnector>,
    content: Arc<dyn DomainContent>,
    reconnect: ReconnectConfig,
    cancel: CancellationToken,
}

impl TopologyManager {
    #[must_use]
    pub fn new(
        connector: Arc<dyn HostConnector>,
        content: Arc<dyn DomainContent>,
        reconnect: ReconnectConfig,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            sessions: DashMap::new(),
            connector,
            content,
            reconnect,
            cancel,
        }
    }

    /// Start a session for `host` and begin connecting; no-op if present
    pub async fn add_host(&self, host: &str) {
        let handle = {
            let Entry::Vacant(slot) = self.sessions.entry(host.to_string()) else {
                return;
            };
            let (commands, inbox) = mpsc::channel(COMMAND_CAPACITY);
            let (published, state) = watch::channel(SessionState::Disconnected);
            let session = Session::new(
                host.to_string(),
                published,
                Arc::clone(&self.connector),
                Arc::clone(&self.content),
                self.reconnect.clone(),
                commands.downgrade(),
            );
            tokio::spawn(session.run(inbox, self.cancel.child_token()));
            slot.insert(SessionHandle { commands, state }).clone()
        };
        info!(host, "host session added");
        let (ack, done) = oneshot::channel();
        if handle.commands.send(SessionCommand::Reconnect { ack }).await.is_ok() {
            let _ = done.await;
        }
    }

    /// Hosts with a session, sorted
    #[must_use]
    pub fn hosts(&self) -> Vec<String> {
        let mut hosts: Vec<String> = self.sessions.iter().map(|e| e.key().clone()).collect();
        hosts.sort();
        hosts
    }

    /// Current state of `host`'s session
    ///
    /// # Errors
    /// `TopologyError::UnknownHost` if no session exists.
    pub fn state(&self, host: &str) -> Result<SessionState, TopologyError> {
        Ok(*self.handle(host)?.state.borrow())
    }

    /// States of every session
    #[must_use]
    pub fn states(&self) -> BTreeMap<String, SessionState> {
        self.sessions
            .iter()
            .map(|e| (e.key().clone(), *e.value().state.borrow()))
            .collect()
    }

    /// Forward `request` to `host`
    ///
    /// # Errors
    /// - `TopologyError::UnknownHost` if no session exists
    /// - `TopologyError::Unreachable` unless the session is running
    /// - `TopologyError::ChannelClosed` if the channel drops mid-call
    pub async fn dispatch(
        &self,
        host: &str,
        request: OperationRequest,
    ) -> Result<OperationResponse, TopologyError> {
        let handle = self.handle(host)?;
        let (reply, response) = oneshot::channel();
        handle
            .commands
            .send(SessionCommand::Dispatch { request, reply })
            .await
            .map_err(|_| stopped(host))?;
        response.await.map_err(|_| stopped(host))?
    }

    /// Ask `host`'s session to reconnect; no-op while running or connecting
    ///
    /// # Errors
    /// `TopologyError::UnknownHost` if no session exists.
    pub async fn reconnect(&self, host: &str) -> Result<(), TopologyError> {
        let handle = self.handle(host)?;
        let (ack, done) = oneshot::channel();
        handle
            .commands
            .send(SessionCommand::Reconnect { ack })
            .await
            .map_err(|_| stopped(host))?;
        done.await.map_err(|_| stopped(host))
    }

    /// Drop every channel ahead of a primary reload
    pub async fn begin_reload(&self) {
        info!(sessions = self.sessions.len(), "dropping host channels for reload");
        for (host, handle) in self.handles() {
            let (ack, done) = oneshot::channel();
            if handle
                .commands
                .send(SessionCommand::BeginReload { ack })
                .await
                .is_err()
                || done.await.is_err()
            {
                warn!(host, "session stopped before reload");
            }
        }
    }

    /// Reconnect every disconnected session
    pub async fn reconnect_all(&self) {
        for (host, _) in self.handles() {
            if let Err(err) = self.reconnect(&host).await {
                warn!(host, %err, "reconnect request failed");
            }
        }
    }

    /// Wait until `host`'s session reaches `state`
    ///
    /// # Errors
    /// - `TopologyError::UnknownHost` if no session exists
    /// - `TopologyError::Timeout` if `timeout` elapses first
    pub async fn wait_for_state(
        &self,
        host: &str,
        state: SessionState,
        timeout: Duration,
    ) -> Result<(), TopologyError> {
        let mut receiver = self.handle(host)?.state;
        let reached = tokio::time::timeout(timeout, receiver.wait_for(|current| *current == state)).await;
        match reached {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(_)) => Err(stopped(host)),
            Err(_) => Err(TopologyError::Timeout {
                host: host.to_string(),
                state,
            }),
        }
    }

    /// Stop every session task
    pub async fn shutdown(&self) {
        for (_, handle) in self.handles() {
            let _ = handle.commands.send(SessionCommand::Shutdown).await;
        }
        self.cancel.cancel();
    }

    fn handle(&self, host: &str) -> Result<SessionHandle, TopologyError> {
        self.sessions
            .get(host)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| TopologyError::UnknownHost(host.to_string()))
    }

    fn handles(&self) -> Vec<(String, SessionHandle)> {
        let mut handles: Vec<_> = self
            .sessions
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect();
        handles.sort_by(|a, b| a.0.cmp(&b.0));
        handles
    }
}

fn stopped(host: &str) -> TopologyError {
    TopologyError::Unreachable {
        host: host.to_string(),
        reason: "session stopped".to_string(),
    }
}
