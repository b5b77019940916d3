//! Rollout reports

use super::plan::StepPolicy;
use chrono::{DateTime, Utc};
use serde_json::{json, Map, Value};
use std::fmt;
use ulid::Ulid;

/// Outcome of one target, ordered so the worst status wins
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum TargetStatus {
    #[default]
    Success,
    Failed,
    TimedOut,
}

impl TargetStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failed => "failed",
            Self::TimedOut => "timed-out",
        }
    }

    /// Worst status of `statuses`, `Success` when empty
    #[must_use]
    pub fn worst<I: IntoIterator<Item = Self>>(statuses: I) -> Self {
        statuses.into_iter().max().unwrap_or_default()
    }
}

impl fmt::Display for TargetStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of dispatching to one host for one group
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetReport {
    pub host: String,
    pub status: TargetStatus,
    /// Servers the operation reached
    pub servers: Vec<String>,
    pub failed_servers: Vec<String>,
    pub detail: Option<String>,
    /// Set when a failed rollout marks this successful target for rollback
    pub rolled_back: bool,
}

impl TargetReport {
    fn to_value(&self) -> Value {
        let mut out = Map::new();
        out.insert("outcome".into(), json!(self.status.as_str()));
        out.insert("servers".into(), json!(self.servers));
        if !self.failed_servers.is_empty() {
            out.insert("failed-servers".into(), json!(self.failed_servers));
        }
        if let Some(detail) = &self.detail {
            out.insert("failure-description".into(), json!(detail));
        }
        if self.rolled_back {
            out.insert("rolled-back".into(), Value::Bool(true));
        }
        Value::Object(out)
    }
}

/// Aggregated result of one group within a step
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupReport {
    pub group: String,
    pub status: TargetStatus,
    pub targets: Vec<TargetReport>,
}

/// Final state of one step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepStatus {
    Completed,
    Failed,
    /// Failed but the step policy let the plan continue
    Tolerated,
    Skipped,
    Cancelled,
}

impl StepStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Tolerated => "tolerated",
            Self::Skipped => "skipped",
            Self::Cancelled => "cancelled",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepReport {
    pub index: usize,
    pub policy: StepPolicy,
    pub status: StepStatus,
    pub groups: Vec<GroupReport>,
}

impl StepReport {
    /// Worst group status of the step
    #[must_use]
    pub fn aggregate(&self) -> TargetStatus {
        TargetStatus::worst(self.groups.iter().map(|g| g.status))
    }
}

/// Report of one rollout
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RolloutReport {
    pub id: Ulid,
    pub started_at: DateTime<Utc>,
    /// Server operation that was rolled out
    pub operation: String,
    pub steps: Vec<StepReport>,
    pub outcome: TargetStatus,
    pub cancelled: bool,
}

impl RolloutReport {
    #[must_use]
    pub fn new(operation: impl Into<String>) -> Self {
        Self {
            id: Ulid::new(),
            started_at: Utc::now(),
            operation: operation.into(),
            steps: Vec::new(),
            outcome: TargetStatus::Success,
            cancelled: false,
        }
    }

    #[inline]
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.outcome == TargetStatus::Success && !self.cancelled
    }

    /// Every target of every step
    pub fn targets(&self) -> impl Iterator<Item = &TargetReport> {
        self.steps
            .iter()
            .flat_map(|step| step.groups.iter())
            .flat_map(|group| group.targets.iter())
    }

    /// Mark successful targets as rolled back
    pub fn mark_rolled_back(&mut self) {
        for target in self
            .steps
            .iter_mut()
            .flat_map(|step| step.groups.iter_mut())
            .flat_map(|group| group.targets.iter_mut())
        {
            target.rolled_back = target.status == TargetStatus::Success;
        }
    }

    /// `server-groups` section of a response
    #[must_use]
    pub fn to_value(&self) -> Value {
        let steps: Vec<Value> = self
            .steps
            .iter()
            .map(|step| {
                let groups: Map<String, Value> = step
                    .groups
                    .iter()
                    .map(|group| {
                        let hosts: Map<String, Value> = group
                            .targets
                            .iter()
                            .map(|t| (t.host.clone(), t.to_value()))
                            .collect();
                        (
                            group.group.clone(),
                            json!({"outcome": group.status.as_str(), "host": hosts}),
                        )
                    })
                    .collect();
                json!({
                    "step": step.index,
                    "policy": step.policy.as_str(),
                    "status": step.status.as_str(),
                    "server-groups": groups,
                })
            })
            .collect();
        json!({
            "rollout-id": self.id.to_string(),
            "started-at": self.started_at.to_rfc3339(),
            "operation": self.operation,
            "outcome": self.outcome.as_str(),
            "cancelled": self.cancelled,
            "steps": steps,
        })
    }
}
