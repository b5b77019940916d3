//! Step-by-step plan execution

use super::plan::{GroupOptions, RolloutPlan, StepPolicy};
use super::report::{GroupReport, RolloutReport, StepReport, StepStatus, TargetReport, TargetStatus};
use crate::error::ManagementError;
use async_trait::async_trait;
use futures::future::join_all;
use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Server operation applied to every server of a group on one host
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupOperation {
    pub server_operation: String,
    pub blocking: bool,
}

impl GroupOperation {
    #[must_use]
    pub fn new(server_operation: impl Into<String>, blocking: bool) -> Self {
        Self {
            server_operation: server_operation.into(),
            blocking,
        }
    }
}

/// Per-server result reported by a host
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerOutcome {
    pub server: String,
    pub failure: Option<String>,
}

/// One (server-group, host) pair of a rollout
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RolloutTarget {
    pub group: String,
    pub host: String,
    pub servers: Vec<String>,
}

/// Sends group operations to hosts
#[async_trait]
pub trait TargetDispatcher: Send + Sync + Debug {
    /// Apply `operation` to the servers of `group` on `host`
    async fn dispatch_group(
        &self,
        host: &str,
        group: &str,
        operation: &GroupOperation,
    ) -> Result<Vec<ServerOutcome>, ManagementError>;
}

#[derive(Debug, Clone)]
pub struct RolloutCoordinator {
    dispatcher: Arc<dyn TargetDispatcher>,
    step_timeout: Duration,
    default_policy: StepPolicy,
}

impl RolloutCoordinator {
    #[must_use]
    pub fn new(
        dispatcher: Arc<dyn TargetDispatcher>,
        step_timeout: Duration,
        default_policy: StepPolicy,
    ) -> Self {
        Self {
            dispatcher,
            step_timeout,
            default_policy,
        }
    }

    /// Run `operation` over `targets` following `plan`
    ///
    /// Steps not yet started when `cancel` fires are reported as cancelled;
    /// a step already dispatched always runs to completion or timeout.
    pub async fn submit(
        &self,
        plan: &RolloutPlan,
        operation: &GroupOperation,
        targets: &[RolloutTarget],
        cancel: &CancellationToken,
    ) -> RolloutReport {
        let mut report = RolloutReport::new(operation.server_operation.as_str());
        info!(
            rollout = %report.id,
            operation = %operation.server_operation,
            steps = plan.steps.len(),
            "rollout started"
        );

        let mut halted = false;
        for (index, step) in plan.steps.iter().enumerate() {
            let policy = plan.policy_of(step, self.default_policy);
            if halted || cancel.is_cancelled() {
                let status = if halted {
                    StepStatus::Skipped
                } else {
                    report.cancelled = true;
                    StepStatus::Cancelled
                };
                debug!(rollout = %report.id, step = index, status = status.as_str(), "step not run");
                report.steps.push(StepReport {
                    index,
                    policy,
                    status,
                    groups: Vec::new(),
                });
                continue;
            }

            info!(rollout = %report.id, step = index, groups = ?step.groups.keys().collect::<Vec<_>>(), "rollout step started");
            let groups = join_all(
                step.groups
                    .iter()
                    .map(|(group, options)| self.run_group(group, *options, operation, targets)),
            )
            .await;
            let mut step_report = StepReport {
                index,
                policy,
                status: StepStatus::Completed,
                groups,
            };
            let aggregate = step_report.aggregate();
            report.outcome = report.outcome.max(aggregate);
            if aggregate != TargetStatus::Success {
                step_report.status = match policy {
                    StepPolicy::InSeriesStrict => {
                        halted = true;
                        StepStatus::Failed
                    }
                    StepPolicy::RollbackAcrossGroups => StepStatus::Tolerated,
                };
                warn!(
                    rollout = %report.id,
                    step = index,
                    outcome = %aggregate,
                    status = step_report.status.as_str(),
                    "rollout step failed"
                );
            } else {
                info!(rollout = %report.id, step = index, "rollout step completed");
            }
            report.steps.push(step_report);
        }

        if report.outcome != TargetStatus::Success {
            report.mark_rolled_back();
        }
        info!(rollout = %report.id, outcome = %report.outcome, cancelled = report.cancelled, "rollout finished");
        report
    }

    async fn run_group(
        &self,
        group: &str,
        options: GroupOptions,
        operation: &GroupOperation,
        targets: &[RolloutTarget],
    ) -> GroupReport {
        let reports = join_all(
            targets
                .iter()
                .filter(|target| target.group == group)
                .map(|target| self.run_target(target, operation)),
        )
        .await;

        let total: usize = reports.iter().map(|t| t.servers.len()).sum();
        let failed: usize = reports.iter().map(|t| t.failed_servers.len()).sum();
        let status = if reports.iter().any(|t| t.status == TargetStatus::TimedOut) {
            TargetStatus::TimedOut
        } else if options.tolerates(failed, total) {
            TargetStatus::Success
        } else {
            TargetStatus::Failed
        };
        GroupReport {
            group: group.to_string(),
            status,
            targets: reports,
        }
    }

    async fn run_target(&self, target: &RolloutTarget, operation: &GroupOperation) -> TargetReport {
        let dispatched = tokio::time::timeout(
            self.step_timeout,
            self.dispatcher
                .dispatch_group(&target.host, &target.group, operation),
        )
        .await;
        match dispatched {
            Ok(Ok(outcomes)) => {
                let failures: Vec<&ServerOutcome> =
                    outcomes.iter().filter(|o| o.failure.is_some()).collect();
                TargetReport {
                    host: target.host.clone(),
                    status: if failures.is_empty() {
                        TargetStatus::Success
                    } else {
                        TargetStatus::Failed
                    },
                    servers: outcomes.iter().map(|o| o.server.clone()).collect(),
                    failed_servers: failures.iter().map(|o| o.server.clone()).collect(),
                    detail: failures
                        .first()
                        .and_then(|o| o.failure.clone()),
                    rolled_back: false,
                }
            }
            Ok(Err(err)) => {
                warn!(host = %target.host, group = %target.group, %err, "group dispatch failed");
                TargetReport {
                    host: target.host.clone(),
                    status: TargetStatus::Failed,
                    servers: target.servers.clone(),
                    failed_servers: unreached(target),
                    detail: Some(err.failure_description()),
                    rolled_back: false,
                }
            }
            Err(_) => {
                warn!(host = %target.host, group = %target.group, timeout_ms = self.step_timeout.as_millis(), "group dispatch timed out");
                TargetReport {
                    host: target.host.clone(),
                    status: TargetStatus::TimedOut,
                    servers: target.servers.clone(),
                    failed_servers: unreached(target),
                    detail: Some(format!(
                        "no response from host '{}' within {}ms",
                        target.host,
                        self.step_timeout.as_millis()
                    )),
                    rolled_back: false,
                }
            }
        }
    }
}

/// Servers counted as failed when the host itself failed; a host with no
/// servers still counts once
fn unreached(target: &RolloutTarget) -> Vec<String> {
    if target.servers.is_empty() {
        vec![format!("host={}", target.host)]
    } else {
        target.servers.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rollout::plan::RolloutStep;
    use parking_lot::Mutex;
    use std::collections::{HashMap, HashSet};

    #[derive(Debug, Default)]
    struct MockDispatcher {
        failing_servers: HashSet<String>,
        unreachable_hosts: HashSet<String>,
        slow_hosts: HashSet<String>,
        servers: HashMap<(String, String), Vec<String>>,
        calls: Mutex<Vec<String>>,
    }

    impl MockDispatcher {
        fn with_group(mut self, host: &str, group: &str, servers: &[&str]) -> Self {
            self.servers.insert(
                (host.into(), group.into()),
                servers.iter().map(|s| (*s).to_string()).collect(),
            );
            self
        }

        fn targets(&self) -> Vec<RolloutTarget> {
            let mut targets: Vec<_> = self
                .servers
                .iter()
                .map(|((host, group), servers)| RolloutTarget {
                    group: group.clone(),
                    host: host.clone(),
                    servers: servers.clone(),
                })
                .collect();
            targets.sort_by(|a, b| (&a.group, &a.host).cmp(&(&b.group, &b.host)));
            targets
        }

        fn called_groups(&self) -> Vec<String> {
            let mut calls = self.calls.lock().clone();
            calls.sort();
            calls.dedup();
            calls
        }
    }

    #[async_trait]
    impl TargetDispatcher for MockDispatcher {
        async fn dispatch_group(
            &self,
            host: &str,
            group: &str,
            _operation: &GroupOperation,
        ) -> Result<Vec<ServerOutcome>, ManagementError> {
            self.calls.lock().push(group.to_string());
            if self.slow_hosts.contains(host) {
                tokio::time::sleep(Duration::from_secs(5)).await;
            }
            if self.unreachable_hosts.contains(host) {
                return Err(ManagementError::TargetUnreachable {
                    host: host.into(),
                    reason: "down".into(),
                });
            }
            Ok(self
                .servers
                .get(&(host.to_string(), group.to_string()))
                .cloned()
                .unwrap_or_default()
                .into_iter()
                .map(|server| ServerOutcome {
                    failure: self
                        .failing_servers
                        .contains(&server)
                        .then(|| "start failed".to_string()),
                    server,
                })
                .collect())
        }
    }

    fn coordinator(dispatcher: &Arc<MockDispatcher>) -> RolloutCoordinator {
        RolloutCoordinator::new(
            Arc::clone(dispatcher) as Arc<dyn TargetDispatcher>,
            Duration::from_millis(200),
            StepPolicy::InSeriesStrict,
        )
    }

    fn two_steps() -> RolloutPlan {
        RolloutPlan::new(vec![RolloutStep::single("a"), RolloutStep::single("b")])
    }

    fn op() -> GroupOperation {
        GroupOperation::new("require-reload", false)
    }

    #[tokio::test]
    async fn steps_run_in_order() {
        let dispatcher = Arc::new(
            MockDispatcher::default()
                .with_group("h1", "a", &["s1"])
                .with_group("h2", "b", &["s2"]),
        );
        let report = coordinator(&dispatcher)
            .submit(&two_steps(), &op(), &dispatcher.targets(), &CancellationToken::new())
            .await;
        assert!(report.is_success());
        assert_eq!(*dispatcher.calls.lock(), vec!["a".to_string(), "b".to_string()]);
        assert!(report.steps.iter().all(|s| s.status == StepStatus::Completed));
    }

    #[tokio::test]
    async fn strict_failure_skips_later_steps() {
        let mut dispatcher = MockDispatcher::default()
            .with_group("h1", "a", &["s1"])
            .with_group("h2", "b", &["s2"]);
        dispatcher.failing_servers.insert("s1".into());
        let dispatcher = Arc::new(dispatcher);
        let report = coordinator(&dispatcher)
            .submit(&two_steps(), &op(), &dispatcher.targets(), &CancellationToken::new())
            .await;
        assert_eq!(report.outcome, TargetStatus::Failed);
        assert_eq!(report.steps[0].status, StepStatus::Failed);
        assert_eq!(report.steps[1].status, StepStatus::Skipped);
        assert_eq!(dispatcher.called_groups(), vec!["a".to_string()]);
    }

    #[tokio::test]
    async fn rollback_policy_continues() {
        let mut dispatcher = MockDispatcher::default()
            .with_group("h1", "a", &["s1"])
            .with_group("h2", "b", &["s2"]);
        dispatcher.failing_servers.insert("s1".into());
        let dispatcher = Arc::new(dispatcher);
        let plan = two_steps().with_rollback_across_groups(true);
        let report = coordinator(&dispatcher)
            .submit(&plan, &op(), &dispatcher.targets(), &CancellationToken::new())
            .await;
        assert_eq!(report.steps[0].status, StepStatus::Tolerated);
        assert_eq!(report.steps[1].status, StepStatus::Completed);
        assert_eq!(report.outcome, TargetStatus::Failed);
        let b = &report.steps[1].groups[0].targets[0];
        assert!(b.rolled_back);
    }

    #[tokio::test]
    async fn tolerance_absorbs_failures() {
        let mut dispatcher = MockDispatcher::default().with_group("h1", "a", &["s1", "s2"]);
        dispatcher.failing_servers.insert("s1".into());
        let dispatcher = Arc::new(dispatcher);
        let plan = RolloutPlan::new(vec![RolloutStep::single("a").with_options(
            "a",
            GroupOptions {
                max_failed_servers: Some(1),
                max_failure_percentage: None,
            },
        )]);
        let report = coordinator(&dispatcher)
            .submit(&plan, &op(), &dispatcher.targets(), &CancellationToken::new())
            .await;
        assert!(report.is_success());
        assert_eq!(report.steps[0].groups[0].targets[0].failed_servers, vec!["s1".to_string()]);
    }

    #[tokio::test]
    async fn timeout_dominates() {
        let mut dispatcher = MockDispatcher::default()
            .with_group("h1", "a", &["s1"])
            .with_group("h2", "a", &["s2"])
            .with_group("h3", "a", &["s3"]);
        dispatcher.slow_hosts.insert("h1".into());
        dispatcher.unreachable_hosts.insert("h2".into());
        let dispatcher = Arc::new(dispatcher);
        let plan = RolloutPlan::new(vec![RolloutStep::single("a").with_options(
            "a",
            GroupOptions {
                max_failed_servers: Some(3),
                max_failure_percentage: None,
            },
        )]);
        let report = coordinator(&dispatcher)
            .submit(&plan, &op(), &dispatcher.targets(), &CancellationToken::new())
            .await;
        assert_eq!(report.outcome, TargetStatus::TimedOut);
        assert_eq!(report.steps[0].groups[0].status, TargetStatus::TimedOut);
    }

    #[tokio::test]
    async fn cancellation_stops_undispatched_steps() {
        let dispatcher = Arc::new(
            MockDispatcher::default()
                .with_group("h1", "a", &["s1"])
                .with_group("h2", "b", &["s2"]),
        );
        let cancel = CancellationToken::new();
        cancel.cancel();
        let report = coordinator(&dispatcher)
            .submit(&two_steps(), &op(), &dispatcher.targets(), &cancel)
            .await;
        assert!(report.cancelled);
        assert!(!report.is_success());
        assert!(report.steps.iter().all(|s| s.status == StepStatus::Cancelled));
        assert!(dispatcher.calls.lock().is_empty());
    }

    #[tokio::test]
    async fn groups_without_targets_succeed() {
        let dispatcher = Arc::new(MockDispatcher::default());
        let report = coordinator(&dispatcher)
            .submit(&two_steps(), &op(), &[], &CancellationToken::new())
            .await;
        assert!(report.is_success());
        assert!(dispatcher.calls.lock().is_empty());
    }
}
