//! Per-host session task
//!
//! A session exclusively owns the channel to one secondary host controller
//! and the state machine around it. Everything else talks to it through
//! [`SessionCommand`] messages; the current state is published on a watch
//! channel.

use super::connector::{HostChannel, HostConnector};
use super::state::{validate_transition, SessionState};
use super::{DomainContent, TopologyError};
use crate::config::ReconnectConfig;
use crate::request::{OperationRequest, OperationResponse};
use mgmt_model::{PathAddress, Resource};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Messages accepted by a session task
#[derive(Debug)]
pub(crate) enum SessionCommand {
    /// Forward a request to the host
    Dispatch {
        request: OperationRequest,
        reply: oneshot::Sender<Result<OperationResponse, TopologyError>>,
    },
    /// Primary is reloading: drop the channel
    BeginReload { ack: oneshot::Sender<()> },
    /// A call observed the channel closing
    ChannelDropped { generation: u64 },
    /// Connect now unless already connected or connecting
    Reconnect { ack: oneshot::Sender<()> },
    Shutdown,
}

pub(crate) struct Session {
    host: String,
    state: SessionState,
    published: watch::Sender<SessionState>,
    channel: Option<HostChannel>,
    /// Bumped for every channel so stale drop notices are ignored
    generation: u64,
    failed_attempts: u32,
    retry_at: Option<Instant>,
    connector: Arc<dyn HostConnector>,
    content: Arc<dyn DomainContent>,
    reconnect: ReconnectConfig,
    commands: mpsc::WeakSender<SessionCommand>,
}

impl Session {
    pub(crate) fn new(
        host: String,
        published: watch::Sender<SessionState>,
        connector: Arc<dyn HostConnector>,
        content: Arc<dyn DomainContent>,
        reconnect: ReconnectConfig,
        commands: mpsc::WeakSender<SessionCommand>,
    ) -> Self {
        Self {
            host,
            state: SessionState::Disconnected,
            published,
            channel: None,
            generation: 0,
            failed_attempts: 0,
            retry_at: None,
            connector,
            content,
            reconnect,
            commands,
        }
    }

    pub(crate) async fn run(
        mut self,
        mut inbox: mpsc::Receiver<SessionCommand>,
        cancel: CancellationToken,
    ) {
        loop {
            let retry_at = self.retry_at;
            let retry = async move {
                match retry_at {
                    Some(at) => sleep_until(at).await,
                    None => std::future::pending::<()>().await,
                }
            };
            tokio::select! {
                () = cancel.cancelled() => break,
                command = inbox.recv() => match command {
                    None | Some(SessionCommand::Shutdown) => break,
                    Some(command) => self.handle(command).await,
                },
                () = retry => {
                    self.retry_at = None;
                    self.attempt().await;
                }
            }
        }
        self.channel = None;
        debug!(host = %self.host, "session stopped");
    }

    async fn handle(&mut self, command: SessionCommand) {
        match command {
            SessionCommand::Dispatch { request, reply } => self.dispatch(request, reply),
            SessionCommand::BeginReload { ack } => {
                if self.state.has_channel() {
                    self.transition(SessionState::Reloading);
                    self.drop_channel();
                    self.transition(SessionState::Disconnected);
                }
                self.retry_at = None;
                let _ = ack.send(());
            }
            SessionCommand::ChannelDropped { generation } => {
                if generation == self.generation && self.state.has_channel() {
                    warn!(host = %self.host, "host channel dropped");
                    self.drop_channel();
                    self.transition(SessionState::Disconnected);
                    self.schedule_retry();
                }
            }
            SessionCommand::Reconnect { ack } => {
                if self.state == SessionState::Disconnected {
                    self.failed_attempts = 0;
                    self.attempt().await;
                } else {
                    debug!(host = %self.host, state = %self.state, "reconnect ignored");
                }
                let _ = ack.send(());
            }
            SessionCommand::Shutdown => {}
        }
    }

    fn dispatch(
        &self,
        request: OperationRequest,
        reply: oneshot::Sender<Result<OperationResponse, TopologyError>>,
    ) {
        let channel = match (&self.channel, self.state) {
            (Some(channel), SessionState::Running) => channel.clone(),
            _ => {
                let _ = reply.send(Err(TopologyError::Unreachable {
                    host: self.host.clone(),
                    reason: format!("session is {}", self.state),
                }));
                return;
            }
        };
        let generation = self.generation;
        let commands = self.commands.clone();
        tokio::spawn(async move {
            let result = channel.call(request).await;
            if matches!(result, Err(TopologyError::ChannelClosed { .. })) {
                if let Some(commands) = commands.upgrade() {
                    let _ = commands
                        .send(SessionCommand::ChannelDropped { generation })
                        .await;
                }
            }
            let _ = reply.send(result);
        });
    }

    async fn attempt(&mut self) {
        if self.state != SessionState::Disconnected {
            return;
        }
        self.transition(SessionState::Reconnecting);
        info!(host = %self.host, attempt = self.failed_attempts + 1, "connecting to host controller");

        let channel = match self.connector.connect(&self.host).await {
            Ok(channel) => channel,
            Err(err) => {
                warn!(host = %self.host, %err, "connect failed");
                self.transition(SessionState::Disconnected);
                self.failed_attempts += 1;
                self.schedule_retry();
                return;
            }
        };
        self.generation += 1;
        self.channel = Some(channel.clone());
        self.transition(SessionState::Connected);

        match self.handshake(&channel).await {
            Ok(()) => {
                self.failed_attempts = 0;
                self.transition(SessionState::Running);
                info!(host = %self.host, "host controller registered");
            }
            Err(err) => {
                warn!(host = %self.host, %err, "handshake failed");
                self.drop_channel();
                self.transition(SessionState::Disconnected);
                self.failed_attempts += 1;
                self.schedule_retry();
            }
        }
    }

    /// Compare content digests, push content when they differ, then mirror
    /// the host's model
    async fn handshake(&self, channel: &HostChannel) -> Result<(), TopologyError> {
        let (content, digest) = self.content.domain_content()?;
        let remote = self
            .call(channel, OperationRequest::new(PathAddress::root(), "read-content-digest"))
            .await?;
        if remote.as_str() == Some(digest.as_str()) {
            debug!(host = %self.host, "domain content up to date");
        } else {
            info!(host = %self.host, "synchronizing domain content");
            self.call(
                channel,
                OperationRequest::new(PathAddress::root(), "sync-domain-content")
                    .with_param("content", content),
            )
            .await?;
        }

        let model = self
            .call(
                channel,
                OperationRequest::new(PathAddress::root().child("host", self.host.as_str()), "read-host-model"),
            )
            .await?;
        let model: Resource = serde_json::from_value(model).map_err(|e| self.handshake_error(e.to_string()))?;
        self.content.register_host(&self.host, model);
        Ok(())
    }

    async fn call(&self, channel: &HostChannel, request: OperationRequest) -> Result<Value, TopologyError> {
        let operation = request.operation.clone();
        let response = channel.call(request).await?;
        if response.is_success() {
            Ok(response.result_or_null())
        } else {
            Err(self.handshake_error(format!(
                "'{operation}' failed: {}",
                response.failure_description.unwrap_or_default()
            )))
        }
    }

    fn handshake_error(&self, reason: String) -> TopologyError {
        TopologyError::Handshake {
            host: self.host.clone(),
            reason,
        }
    }

    fn schedule_retry(&mut self) {
        if !self.reconnect.allows_attempt(self.failed_attempts) {
            warn!(host = %self.host, attempts = self.failed_attempts, "giving up on host controller");
            return;
        }
        let delay = self.reconnect.delay(self.failed_attempts.saturating_sub(1));
        debug!(host = %self.host, delay_ms = delay.as_millis(), "reconnect scheduled");
        self.retry_at = Some(Instant::now() + delay);
    }

    fn drop_channel(&mut self) {
        self.channel = None;
        self.generation += 1;
    }

    fn transition(&mut self, to: SessionState) {
        if let Err(err) = validate_transition(self.state, to) {
            warn!(host = %self.host, %err, "ignoring session transition");
            return;
        }
        debug!(host = %self.host, from = %self.state, %to, "session state");
        self.state = to;
        self.published.send_replace(to);
    }
}
