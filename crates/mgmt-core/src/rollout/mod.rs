//! Rollout coordinator
//!
//! Applies one server operation across server-groups following a
//! [`RolloutPlan`]: steps run in series, the groups of a step run
//! concurrently, and each target gets its own timeout.

mod coordinator;
mod plan;
mod report;

pub use coordinator::{
    GroupOperation, RolloutCoordinator, RolloutTarget, ServerOutcome, TargetDispatcher,
};
pub use plan::{GroupOptions, RolloutPlan, RolloutStep, StepPolicy};
pub use report::{GroupReport, RolloutReport, StepReport, StepStatus, TargetReport, TargetStatus};

/// Address of stored rollout plans
pub const ROLLOUT_PLANS_TYPE: &str = "management-client-content";
pub const ROLLOUT_PLANS_NAME: &str = "rollout-plans";
pub const ROLLOUT_PLAN_TYPE: &str = "rollout-plan";

/// Rollout plan errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RolloutError {
    /// Plan content is malformed
    #[error("invalid rollout plan: {0}")]
    InvalidPlan(String),

    /// Referenced plan is not stored
    #[error("rollout plan '{0}' does not exist")]
    UnknownPlan(String),

    /// An affected group is missing from the plan
    #[error("rollout plan does not cover server-group '{0}'")]
    UncoveredGroup(String),

    /// Plan references a group that does not exist
    #[error("rollout plan references unknown server-group '{0}'")]
    UnknownGroup(String),
}
