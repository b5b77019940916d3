//! Server process control
//!
//! Hosts start and stop their servers through a [`ServerLauncher`]. Real
//! process supervision lives outside this crate; [`InMemoryLauncher`] only
//! records which servers are up.

use async_trait::async_trait;
use dashmap::DashMap;
use std::fmt::Debug;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Launcher failure for one server
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("server '{server}' on host '{host}' failed: {reason}")]
pub struct LaunchError {
    pub host: String,
    pub server: String,
    pub reason: String,
}

impl LaunchError {
    #[must_use]
    pub fn new(host: &str, server: &str, reason: impl Into<String>) -> Self {
        Self {
            host: host.to_string(),
            server: server.to_string(),
            reason: reason.into(),
        }
    }
}

/// Starts and stops server processes
#[async_trait]
pub trait ServerLauncher: Send + Sync + Debug {
    /// Start `server` of `host` as a member of `group`
    async fn start(&self, host: &str, server: &str, group: &str) -> Result<(), LaunchError>;

    /// Stop `server` of `host`
    async fn stop(&self, host: &str, server: &str) -> Result<(), LaunchError>;

    /// Reload a running server in place
    async fn reload(&self, host: &str, server: &str) -> Result<(), LaunchError> {
        let _ = (host, server);
        Ok(())
    }
}

/// Launcher that succeeds immediately
#[derive(Debug, Default)]
pub struct InMemoryLauncher {
    running: DashMap<(String, String), String>,
    starts: AtomicUsize,
}

impl InMemoryLauncher {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Check whether a server is up
    #[must_use]
    pub fn is_running(&self, host: &str, server: &str) -> bool {
        self.running
            .contains_key(&(host.to_string(), server.to_string()))
    }

    /// Number of successful starts so far
    #[must_use]
    pub fn starts(&self) -> usize {
        self.starts.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl ServerLauncher for InMemoryLauncher {
    async fn start(&self, host: &str, server: &str, group: &str) -> Result<(), LaunchError> {
        self.running
            .insert((host.to_string(), server.to_string()), group.to_string());
        self.starts.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    async fn stop(&self, host: &str, server: &str) -> Result<(), LaunchError> {
        self.running.remove(&(host.to_string(), server.to_string()));
        Ok(())
    }
}
