//! Rollout plans
//!
//! Stored and inline plans share one JSON shape:
//!
//! ```json
//! {"rollout-plan": {
//!     "in-series": [
//!         {"server-group": {"main-server-group": {"max-failed-servers": 1}}},
//!         {"concurrent-groups": {"a": {}, "b": {"max-failure-percentage": 50}},
//!          "policy": "rollback-across-groups"}
//!     ],
//!     "rollback-across-groups": false
//! }}
//! ```

use super::RolloutError;
use crate::config::DefaultPlan;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::BTreeSet;

/// Failure policy of one step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StepPolicy {
    /// A failed step halts the plan
    #[default]
    InSeriesStrict,
    /// A failed step is tolerated and later steps still run
    RollbackAcrossGroups,
}

impl StepPolicy {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::InSeriesStrict => "in-series-strict",
            Self::RollbackAcrossGroups => "rollback-across-groups",
        }
    }

    fn parse(raw: &str) -> Option<Self> {
        match raw {
            "in-series-strict" => Some(Self::InSeriesStrict),
            "rollback-across-groups" => Some(Self::RollbackAcrossGroups),
            _ => None,
        }
    }
}

/// Failure tolerance of one server-group
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct GroupOptions {
    pub max_failed_servers: Option<u32>,
    pub max_failure_percentage: Option<u8>,
}

impl GroupOptions {
    /// Check whether `failed` of `total` servers is within tolerance
    #[must_use]
    pub fn tolerates(&self, failed: usize, total: usize) -> bool {
        if failed == 0 {
            return true;
        }
        let by_count = failed <= self.max_failed_servers.unwrap_or(0) as usize;
        let by_percentage = self
            .max_failure_percentage
            .is_some_and(|pct| failed * 100 <= usize::from(pct) * total);
        by_count || by_percentage
    }

    fn parse(group: &str, value: &Value) -> Result<Self, RolloutError> {
        let Value::Object(fields) = value else {
            if value.is_null() {
                return Ok(Self::default());
            }
            return Err(invalid(format!("options of server-group '{group}' must be an object")));
        };
        let max_failed_servers = match fields.get("max-failed-servers") {
            None | Some(Value::Null) => None,
            Some(v) => Some(
                v.as_u64()
                    .and_then(|n| u32::try_from(n).ok())
                    .ok_or_else(|| invalid(format!("'max-failed-servers' of '{group}' must be a count")))?,
            ),
        };
        let max_failure_percentage = match fields.get("max-failure-percentage") {
            None | Some(Value::Null) => None,
            Some(v) => Some(
                v.as_u64()
                    .filter(|n| *n <= 100)
                    .and_then(|n| u8::try_from(n).ok())
                    .ok_or_else(|| {
                        invalid(format!("'max-failure-percentage' of '{group}' must be within 0-100"))
                    })?,
            ),
        };
        Ok(Self {
            max_failed_servers,
            max_failure_percentage,
        })
    }

    fn to_value(self) -> Value {
        let mut out = Map::new();
        if let Some(n) = self.max_failed_servers {
            out.insert("max-failed-servers".into(), json!(n));
        }
        if let Some(pct) = self.max_failure_percentage {
            out.insert("max-failure-percentage".into(), json!(pct));
        }
        Value::Object(out)
    }
}

/// One in-series entry; its groups run concurrently
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RolloutStep {
    pub groups: IndexMap<String, GroupOptions>,
    /// Written as `concurrent-groups` rather than `server-group`
    pub concurrent: bool,
    pub policy: Option<StepPolicy>,
}

impl RolloutStep {
    /// Step running a single group
    #[must_use]
    pub fn single(group: impl Into<String>) -> Self {
        Self {
            groups: IndexMap::from([(group.into(), GroupOptions::default())]),
            concurrent: false,
            policy: None,
        }
    }

    /// Step running `groups` concurrently
    #[must_use]
    pub fn concurrent<I, S>(groups: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            groups: groups
                .into_iter()
                .map(|g| (g.into(), GroupOptions::default()))
                .collect(),
            concurrent: true,
            policy: None,
        }
    }

    #[inline]
    #[must_use]
    pub fn with_policy(mut self, policy: StepPolicy) -> Self {
        self.policy = Some(policy);
        self
    }

    #[inline]
    #[must_use]
    pub fn with_options(mut self, group: &str, options: GroupOptions) -> Self {
        if let Some(slot) = self.groups.get_mut(group) {
            *slot = options;
        }
        self
    }

    fn parse(index: usize, value: &Value) -> Result<Self, RolloutError> {
        let Value::Object(fields) = value else {
            return Err(invalid(format!("step {index} must be an object")));
        };
        let (groups, concurrent) = match (fields.get("server-group"), fields.get("concurrent-groups")) {
            (Some(groups), None) => (groups, false),
            (None, Some(groups)) => (groups, true),
            _ => {
                return Err(invalid(format!(
                    "step {index} needs exactly one of 'server-group' or 'concurrent-groups'"
                )))
            }
        };
        let Value::Object(groups) = groups else {
            return Err(invalid(format!("groups of step {index} must be an object")));
        };
        if groups.is_empty() {
            return Err(invalid(format!("step {index} names no server-group")));
        }
        let policy = match fields.get("policy") {
            None | Some(Value::Null) => None,
            Some(Value::String(raw)) => Some(
                StepPolicy::parse(raw)
                    .ok_or_else(|| invalid(format!("unknown policy '{raw}' in step {index}")))?,
            ),
            Some(_) => return Err(invalid(format!("policy of step {index} must be a string"))),
        };
        Ok(Self {
            groups: groups
                .iter()
                .map(|(name, options)| Ok((name.clone(), GroupOptions::parse(name, options)?)))
                .collect::<Result<_, RolloutError>>()?,
            concurrent,
            policy,
        })
    }

    fn to_value(&self) -> Value {
        let groups: Map<String, Value> = self
            .groups
            .iter()
            .map(|(name, options)| (name.clone(), options.to_value()))
            .collect();
        let key = if self.concurrent || self.groups.len() > 1 {
            "concurrent-groups"
        } else {
            "server-group"
        };
        let mut out = Map::new();
        out.insert(key.into(), Value::Object(groups));
        if let Some(policy) = self.policy {
            out.insert("policy".into(), Value::String(policy.as_str().into()));
        }
        Value::Object(out)
    }
}

/// Ordered rollout steps
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RolloutPlan {
    pub steps: Vec<RolloutStep>,
    /// Plan-wide default for steps without their own policy
    pub rollback_across_groups: bool,
}

impl RolloutPlan {
    #[must_use]
    pub fn new(steps: Vec<RolloutStep>) -> Self {
        Self {
            steps,
            rollback_across_groups: false,
        }
    }

    #[inline]
    #[must_use]
    pub fn with_rollback_across_groups(mut self, enabled: bool) -> Self {
        self.rollback_across_groups = enabled;
        self
    }

    /// Plan used when an operation names none
    #[must_use]
    pub fn default_for(groups: &BTreeSet<String>, shape: DefaultPlan) -> Self {
        if groups.is_empty() {
            return Self::default();
        }
        match shape {
            DefaultPlan::Concurrent => Self::new(vec![RolloutStep::concurrent(groups.iter().cloned())]),
            DefaultPlan::InSeries => Self::new(groups.iter().map(RolloutStep::single).collect()),
        }
    }

    /// Parse and validate the JSON form
    ///
    /// # Errors
    /// `RolloutError::InvalidPlan` naming the first problem.
    pub fn parse(value: &Value) -> Result<Self, RolloutError> {
        let plan = value
            .get("rollout-plan")
            .ok_or_else(|| invalid("missing 'rollout-plan'".to_string()))?;
        let steps = plan
            .get("in-series")
            .and_then(Value::as_array)
            .ok_or_else(|| invalid("'in-series' must be a list".to_string()))?;
        let rollback_across_groups = match plan.get("rollback-across-groups") {
            None | Some(Value::Null) => false,
            Some(Value::Bool(flag)) => *flag,
            Some(_) => return Err(invalid("'rollback-across-groups' must be a boolean".to_string())),
        };
        let parsed = Self {
            steps: steps
                .iter()
                .enumerate()
                .map(|(index, step)| RolloutStep::parse(index, step))
                .collect::<Result<_, _>>()?,
            rollback_across_groups,
        };
        parsed.validate()?;
        Ok(parsed)
    }

    /// JSON form
    #[must_use]
    pub fn to_value(&self) -> Value {
        let mut plan = Map::new();
        plan.insert(
            "in-series".into(),
            Value::Array(self.steps.iter().map(RolloutStep::to_value).collect()),
        );
        if self.rollback_across_groups {
            plan.insert("rollback-across-groups".into(), Value::Bool(true));
        }
        json!({ "rollout-plan": plan })
    }

    /// Check the plan is non-empty and names each group once
    ///
    /// # Errors
    /// `RolloutError::InvalidPlan` naming the problem.
    pub fn validate(&self) -> Result<(), RolloutError> {
        if self.steps.is_empty() {
            return Err(invalid("plan has no steps".to_string()));
        }
        let mut seen = BTreeSet::new();
        for (index, step) in self.steps.iter().enumerate() {
            if step.groups.is_empty() {
                return Err(invalid(format!("step {index} names no server-group")));
            }
            for group in step.groups.keys() {
                if !seen.insert(group.as_str()) {
                    return Err(invalid(format!("server-group '{group}' appears more than once")));
                }
            }
        }
        Ok(())
    }

    /// Every group named by the plan
    #[must_use]
    pub fn groups(&self) -> BTreeSet<String> {
        self.steps
            .iter()
            .flat_map(|step| step.groups.keys().cloned())
            .collect()
    }

    /// Restrict the plan to `affected` groups
    ///
    /// # Errors
    /// `RolloutError::UncoveredGroup` if an affected group is not in the plan.
    pub fn covering(&self, affected: &BTreeSet<String>) -> Result<Self, RolloutError> {
        let named = self.groups();
        if let Some(missing) = affected.iter().find(|g| !named.contains(*g)) {
            return Err(RolloutError::UncoveredGroup(missing.clone()));
        }
        let steps = self
            .steps
            .iter()
            .filter_map(|step| {
                let groups: IndexMap<_, _> = step
                    .groups
                    .iter()
                    .filter(|(name, _)| affected.contains(*name))
                    .map(|(name, options)| (name.clone(), *options))
                    .collect();
                (!groups.is_empty()).then(|| RolloutStep {
                    groups,
                    concurrent: step.concurrent,
                    policy: step.policy,
                })
            })
            .collect();
        Ok(Self {
            steps,
            rollback_across_groups: self.rollback_across_groups,
        })
    }

    /// Effective policy of `step`
    #[must_use]
    pub fn policy_of(&self, step: &RolloutStep, default: StepPolicy) -> StepPolicy {
        step.policy.unwrap_or(if self.rollback_across_groups {
            StepPolicy::RollbackAcrossGroups
        } else {
            default
        })
    }
}

fn invalid(reason: String) -> RolloutError {
    RolloutError::InvalidPlan(reason)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn set(items: &[&str]) -> BTreeSet<String> {
        items.iter().map(|s| (*s).to_string()).collect()
    }

    #[test]
    fn parses_stored_shape() {
        let content = json!({"rollout-plan": {"in-series": [
            {"server-group": {"main-server-group": {}}}
        ]}});
        let plan = RolloutPlan::parse(&content).unwrap();
        assert_eq!(plan.steps.len(), 1);
        assert_eq!(plan.groups(), set(&["main-server-group"]));
        assert_eq!(plan.to_value(), content);
    }

    #[test]
    fn parses_options_and_policies() {
        let plan = RolloutPlan::parse(&json!({"rollout-plan": {
            "in-series": [
                {"concurrent-groups": {"a": {"max-failed-servers": 1}, "b": {"max-failure-percentage": 50}},
                 "policy": "rollback-across-groups"},
                {"server-group": {"c": null}}
            ],
            "rollback-across-groups": false
        }}))
        .unwrap();
        assert_eq!(plan.steps[0].policy, Some(StepPolicy::RollbackAcrossGroups));
        assert_eq!(plan.steps[0].groups["a"].max_failed_servers, Some(1));
        assert_eq!(plan.steps[0].groups["b"].max_failure_percentage, Some(50));
        assert_eq!(plan.policy_of(&plan.steps[1], StepPolicy::InSeriesStrict), StepPolicy::InSeriesStrict);
    }

    #[test]
    fn rejects_malformed_plans() {
        for bad in [
            json!({}),
            json!({"rollout-plan": {"in-series": []}}),
            json!({"rollout-plan": {"in-series": [{"server-group": {}}]}}),
            json!({"rollout-plan": {"in-series": [{"server-group": {"a": {}}, "concurrent-groups": {"b": {}}}]}}),
            json!({"rollout-plan": {"in-series": [{"server-group": {"a": {}}}, {"server-group": {"a": {}}}]}}),
            json!({"rollout-plan": {"in-series": [{"server-group": {"a": {"max-failure-percentage": 101}}}]}}),
            json!({"rollout-plan": {"in-series": [{"server-group": {"a": {}}, "policy": "yolo"}]}}),
        ] {
            assert!(RolloutPlan::parse(&bad).is_err(), "{bad}");
        }
    }

    #[test]
    fn covering_drops_unaffected_groups() {
        let plan = RolloutPlan::new(vec![
            RolloutStep::single("a"),
            RolloutStep::concurrent(["b", "c"]),
        ]);
        let covered = plan.covering(&set(&["c"])).unwrap();
        assert_eq!(covered.steps.len(), 1);
        assert_eq!(covered.groups(), set(&["c"]));
        assert!(matches!(
            plan.covering(&set(&["d"])),
            Err(RolloutError::UncoveredGroup(g)) if g == "d"
        ));
    }

    #[test]
    fn default_plans() {
        let groups = set(&["a", "b"]);
        let concurrent = RolloutPlan::default_for(&groups, DefaultPlan::Concurrent);
        assert_eq!(concurrent.steps.len(), 1);
        let series = RolloutPlan::default_for(&groups, DefaultPlan::InSeries);
        assert_eq!(series.steps.len(), 2);
        assert!(RolloutPlan::default_for(&BTreeSet::new(), DefaultPlan::Concurrent)
            .steps
            .is_empty());
    }

    #[test]
    fn tolerance() {
        let strict = GroupOptions::default();
        assert!(strict.tolerates(0, 2));
        assert!(!strict.tolerates(1, 2));
        let count = GroupOptions {
            max_failed_servers: Some(1),
            max_failure_percentage: None,
        };
        assert!(count.tolerates(1, 4));
        assert!(!count.tolerates(2, 4));
        let pct = GroupOptions {
            max_failed_servers: None,
            max_failure_percentage: Some(50),
        };
        assert!(pct.tolerates(2, 4));
        assert!(!pct.tolerates(3, 4));
    }
}
