//! Host session state machine

use super::TopologyError;
use serde::{Deserialize, Serialize};
use std::fmt::{self, Display, Formatter};

/// State of the primary's session with one secondary host controller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SessionState {
    /// Channel open, content not yet synchronized
    Connected,
    /// Primary reload in progress
    Reloading,
    /// No channel
    #[default]
    Disconnected,
    /// Connect attempt in flight
    Reconnecting,
    /// Synchronized and serving operations
    Running,
}

impl SessionState {
    /// Every state
    pub const ALL: [Self; 5] = [
        Self::Connected,
        Self::Reloading,
        Self::Disconnected,
        Self::Reconnecting,
        Self::Running,
    ];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Connected => "connected",
            Self::Reloading => "reloading",
            Self::Disconnected => "disconnected",
            Self::Reconnecting => "reconnecting",
            Self::Running => "running",
        }
    }

    /// Holds an open channel
    #[inline]
    #[must_use]
    pub fn has_channel(self) -> bool {
        matches!(self, Self::Connected | Self::Running)
    }
}

impl Display for SessionState {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// States reachable in one step from `from`
#[must_use]
pub fn allowed_transitions(from: SessionState) -> Vec<SessionState> {
    use SessionState::{Connected, Disconnected, Reconnecting, Reloading, Running};
    match from {
        Connected => vec![Running, Reloading, Disconnected],
        Running => vec![Reloading, Disconnected],
        Reloading => vec![Disconnected],
        Disconnected => vec![Reconnecting],
        Reconnecting => vec![Connected, Running, Disconnected],
    }
}

/// Validate a session state transition
///
/// # Errors
/// `TopologyError::IllegalTransition` if `to` is not reachable from `from`.
pub fn validate_transition(from: SessionState, to: SessionState) -> Result<(), TopologyError> {
    if allowed_transitions(from).contains(&to) {
        Ok(())
    } else {
        Err(TopologyError::IllegalTransition { from, to })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn reload_path() {
        use SessionState::*;
        for (from, to) in [
            (Running, Reloading),
            (Reloading, Disconnected),
            (Disconnected, Reconnecting),
            (Reconnecting, Connected),
            (Connected, Running),
        ] {
            assert!(validate_transition(from, to).is_ok(), "{from} -> {to}");
        }
        assert!(validate_transition(Running, Running).is_err());
        assert!(validate_transition(Disconnected, Running).is_err());
        assert!(validate_transition(Reloading, Reconnecting).is_err());
    }

    fn any_state() -> impl Strategy<Value = SessionState> {
        proptest::sample::select(SessionState::ALL.to_vec())
    }

    proptest! {
        #[test]
        fn prop_validate_agrees_with_allowed(from in any_state(), to in any_state()) {
            let allowed = allowed_transitions(from).contains(&to);
            prop_assert_eq!(validate_transition(from, to).is_ok(), allowed);
        }

        #[test]
        fn prop_no_self_loops(state in any_state()) {
            prop_assert!(!allowed_transitions(state).contains(&state));
        }

        #[test]
        fn prop_running_reachable_from_everywhere(start in any_state()) {
            let mut seen = vec![start];
            let mut frontier = vec![start];
            while let Some(state) = frontier.pop() {
                for next in allowed_transitions(state) {
                    if !seen.contains(&next) {
                        seen.push(next);
                        frontier.push(next);
                    }
                }
            }
            prop_assert!(seen.contains(&SessionState::Running));
        }
    }
}
