//! Topology manager
//!
//! Tracks the primary's sessions with secondary host controllers and keeps
//! them alive across reloads.
//!
//! # Session lifecycle
//!
//! ```text
//! DISCONNECTED -> RECONNECTING -> CONNECTED -> RUNNING
//!      ^               |              |           |
//!      +---------------+--------------+-----------+  (drop / failed handshake)
//! RUNNING -> RELOADING -> DISCONNECTED               (primary reload)
//! ```
//!
//! Only the session task touches its channel; the rollout coordinator and
//! the controllers go through [`TopologyManager::dispatch`].

mod connector;
mod manager;
mod session;
mod state;

pub use connector::{HostChannel, HostConnector, HostEnvelope, InProcessConnector};
pub use manager::TopologyManager;
pub use state::{allowed_transitions, validate_transition, SessionState};

use mgmt_model::Resource;
use serde_json::Value;
use std::fmt::Debug;

/// Source of the content synchronized to hosts during a handshake
pub trait DomainContent: Send + Sync + Debug {
    /// Current content in wire form plus its digest
    ///
    /// # Errors
    /// `TopologyError::Content` if the content cannot be serialized.
    fn domain_content(&self) -> Result<(Value, String), TopologyError>;

    /// Record the model reported by `host`
    fn register_host(&self, host: &str, model: Resource);
}

/// Topology errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TopologyError {
    /// Host cannot be reached right now
    #[error("host '{host}' is unreachable: {reason}")]
    Unreachable { host: String, reason: String },

    /// Channel closed while a call was in flight
    #[error("channel to host '{host}' closed")]
    ChannelClosed { host: String },

    /// Session state machine violation
    #[error("illegal session transition {from} -> {to}")]
    IllegalTransition {
        from: SessionState,
        to: SessionState,
    },

    /// Host was never added to the topology
    #[error("unknown host '{0}'")]
    UnknownHost(String),

    /// Content synchronization failed
    #[error("handshake with host '{host}' failed: {reason}")]
    Handshake { host: String, reason: String },

    /// Domain content could not be produced
    #[error("domain content unavailable: {0}")]
    Content(String),

    /// Session did not reach the awaited state in time
    #[error("host '{host}' did not reach state {state} in time")]
    Timeout { host: String, state: SessionState },
}

impl TopologyError {
    /// Errors that mean "try again later"
    #[must_use]
    pub fn is_unreachable(&self) -> bool {
        matches!(
            self,
            Self::Unreachable { .. }
                | Self::ChannelClosed { .. }
                | Self::UnknownHost(_)
                | Self::Handshake { .. }
                | Self::Timeout { .. }
        )
    }
}
