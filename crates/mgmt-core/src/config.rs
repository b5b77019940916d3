//! Controller configuration
//!
//! All keys are kebab-case, every section is optional:
//!
//! ```toml
//! primary-host = "primary"
//!
//! [rollout]
//! step-timeout-ms = 30000
//! default-policy = "in-series-strict"
//! default-plan = "concurrent"
//!
//! [reconnect]
//! initial-backoff-ms = 100
//! max-backoff-ms = 5000
//! multiplier = 2.0
//! jitter = 0.1
//! max-attempts = 0
//!
//! [reload]
//! settle-ms = 50
//! ```

use crate::error::ManagementError;
use crate::rollout::StepPolicy;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Controller configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct ControllerConfig {
    /// Host whose controller acts as the domain controller
    pub primary_host: String,
    pub rollout: RolloutConfig,
    pub reconnect: ReconnectConfig,
    pub reload: ReloadConfig,
}

impl ControllerConfig {
    /// Create default configuration
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Load from a TOML file
    ///
    /// # Errors
    /// `ManagementError::Config` if the file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self, ManagementError> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| ManagementError::Config(format!("{}: {e}", path.display())))?;
        Self::from_toml(&raw)
    }

    /// Parse TOML text
    ///
    /// # Errors
    /// `ManagementError::Config` for invalid TOML or values.
    pub fn from_toml(raw: &str) -> Result<Self, ManagementError> {
        let config: Self = toml::from_str(raw).map_err(|e| ManagementError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Check value ranges
    ///
    /// # Errors
    /// `ManagementError::Config` naming the offending key.
    pub fn validate(&self) -> Result<(), ManagementError> {
        if self.primary_host.is_empty() {
            return Err(ManagementError::Config("primary-host must not be empty".into()));
        }
        if self.rollout.step_timeout_ms == 0 {
            return Err(ManagementError::Config("rollout.step-timeout-ms must be positive".into()));
        }
        if self.reconnect.multiplier < 1.0 {
            return Err(ManagementError::Config("reconnect.multiplier must be at least 1.0".into()));
        }
        if !(0.0..=1.0).contains(&self.reconnect.jitter) {
            return Err(ManagementError::Config("reconnect.jitter must be within [0, 1]".into()));
        }
        if self.reconnect.initial_backoff_ms > self.reconnect.max_backoff_ms {
            return Err(ManagementError::Config(
                "reconnect.initial-backoff-ms exceeds reconnect.max-backoff-ms".into(),
            ));
        }
        Ok(())
    }

    #[inline]
    #[must_use]
    pub fn with_primary_host(mut self, host: impl Into<String>) -> Self {
        self.primary_host = host.into();
        self
    }

    #[inline]
    #[must_use]
    pub fn with_step_timeout(mut self, timeout: Duration) -> Self {
        self.rollout.step_timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    #[inline]
    #[must_use]
    pub fn with_default_policy(mut self, policy: StepPolicy) -> Self {
        self.rollout.default_policy = policy;
        self
    }

    #[inline]
    #[must_use]
    pub fn with_reconnect(mut self, reconnect: ReconnectConfig) -> Self {
        self.reconnect = reconnect;
        self
    }

    #[inline]
    #[must_use]
    pub fn with_reload_settle(mut self, settle: Duration) -> Self {
        self.reload.settle_ms = u64::try_from(settle.as_millis()).unwrap_or(u64::MAX);
        self
    }
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            primary_host: "primary".to_string(),
            rollout: RolloutConfig::default(),
            reconnect: ReconnectConfig::default(),
            reload: ReloadConfig::default(),
        }
    }
}

/// Shape of the plan used when an operation names none
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DefaultPlan {
    /// Every affected group in one concurrent step
    #[default]
    Concurrent,
    /// One step per affected group
    InSeries,
}

/// Rollout settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct RolloutConfig {
    pub step_timeout_ms: u64,
    pub default_policy: StepPolicy,
    pub default_plan: DefaultPlan,
}

impl RolloutConfig {
    #[inline]
    #[must_use]
    pub fn step_timeout(&self) -> Duration {
        Duration::from_millis(self.step_timeout_ms)
    }
}

impl Default for RolloutConfig {
    fn default() -> Self {
        Self {
            step_timeout_ms: 30_000,
            default_policy: StepPolicy::InSeriesStrict,
            default_plan: DefaultPlan::Concurrent,
        }
    }
}

/// Growth stops here; the cap is reached long before
const MAX_BACKOFF_EXPONENT: u32 = 64;

/// Reconnect backoff for host sessions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct ReconnectConfig {
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub multiplier: f64,
    /// Randomness factor applied as +/- fraction of the delay
    pub jitter: f64,
    /// Give up after this many failed attempts (0 = never)
    pub max_attempts: u32,
}

impl ReconnectConfig {
    /// Delay before reconnect attempt number `attempt` (0-based)
    #[must_use]
    pub fn delay(&self, attempt: u32) -> Duration {
        let max = Duration::from_millis(self.max_backoff_ms);
        let base = Duration::from_millis(self.initial_backoff_ms).as_secs_f64();
        let exponent = i32::try_from(attempt.min(MAX_BACKOFF_EXPONENT)).unwrap_or(0);
        let secs = base * self.multiplier.powi(exponent);
        // clamp before converting, from_secs_f64 panics on overflow
        let delay = if secs.is_finite() && secs < max.as_secs_f64() {
            Duration::from_secs_f64(secs.max(0.0))
        } else {
            max
        };
        apply_jitter(delay, self.jitter).min(max)
    }

    /// Check whether another attempt is allowed after `failed` failures
    #[inline]
    #[must_use]
    pub fn allows_attempt(&self, failed: u32) -> bool {
        self.max_attempts == 0 || failed < self.max_attempts
    }
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_backoff_ms: 100,
            max_backoff_ms: 5_000,
            multiplier: 2.0,
            jitter: 0.1,
            max_attempts: 0,
        }
    }
}

/// Spread `duration` by +/- `factor`
fn apply_jitter(duration: Duration, factor: f64) -> Duration {
    let factor = factor.clamp(0.0, 1.0);
    if factor == 0.0 || duration.is_zero() {
        return duration;
    }
    let base = duration.as_secs_f64();
    let jittered = rand::rng().random_range(base * (1.0 - factor)..=base * (1.0 + factor));
    Duration::from_secs_f64(jittered)
}

/// Reload timing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct ReloadConfig {
    /// Time a reloading controller stays unavailable
    pub settle_ms: u64,
}

impl ReloadConfig {
    #[inline]
    #[must_use]
    pub fn settle(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }
}

impl Default for ReloadConfig {
    fn default() -> Self {
        Self { settle_ms: 50 }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_partial_toml() {
        let config = ControllerConfig::from_toml(
            r#"
            primary-host = "dc"

            [rollout]
            step-timeout-ms = 500
            default-policy = "rollback-across-groups"

            [reconnect]
            jitter = 0.0
            "#,
        )
        .unwrap();
        assert_eq!(config.primary_host, "dc");
        assert_eq!(config.rollout.step_timeout(), Duration::from_millis(500));
        assert_eq!(config.rollout.default_policy, StepPolicy::RollbackAcrossGroups);
        assert_eq!(config.rollout.default_plan, DefaultPlan::Concurrent);
        assert_eq!(config.reconnect.initial_backoff_ms, 100);
        assert_eq!(config.reload.settle_ms, 50);
    }

    #[test]
    fn rejects_invalid_values() {
        assert!(ControllerConfig::from_toml("primary-host = \"\"").is_err());
        assert!(ControllerConfig::from_toml("[reconnect]\njitter = 2.0").is_err());
        assert!(ControllerConfig::from_toml("[rollout]\nstep-timeout-ms = 0").is_err());
    }

    #[test]
    fn backoff_grows_and_caps() {
        let reconnect = ReconnectConfig {
            initial_backoff_ms: 10,
            max_backoff_ms: 50,
            multiplier: 2.0,
            jitter: 0.0,
            max_attempts: 3,
        };
        assert_eq!(reconnect.delay(0), Duration::from_millis(10));
        assert_eq!(reconnect.delay(1), Duration::from_millis(20));
        assert_eq!(reconnect.delay(10), Duration::from_millis(50));
        assert!(reconnect.allows_attempt(2));
        assert!(!reconnect.allows_attempt(3));
    }

    #[test]
    fn jitter_stays_within_bounds() {
        let reconnect = ReconnectConfig {
            jitter: 0.5,
            ..ReconnectConfig::default()
        };
        for _ in 0..50 {
            let delay = reconnect.delay(0);
            assert!(delay >= Duration::from_millis(50) && delay <= Duration::from_millis(150));
        }
    }

    #[test]
    fn long_outages_stay_at_the_cap() {
        let reconnect = ReconnectConfig {
            jitter: 0.0,
            ..ReconnectConfig::default()
        };
        for attempt in [67, 68, 100, 1_000, u32::MAX] {
            assert_eq!(reconnect.delay(attempt), Duration::from_millis(5_000), "attempt {attempt}");
        }

        let steep = ReconnectConfig {
            multiplier: f64::MAX,
            jitter: 0.0,
            ..ReconnectConfig::default()
        };
        assert_eq!(steep.delay(3), Duration::from_millis(5_000));
    }

    #[test]
    fn jitter_never_exceeds_the_cap() {
        let reconnect = ReconnectConfig {
            jitter: 0.5,
            ..ReconnectConfig::default()
        };
        for attempt in [20, u32::MAX] {
            for _ in 0..50 {
                let delay = reconnect.delay(attempt);
                assert!(delay <= Duration::from_millis(5_000), "{delay:?}");
                assert!(delay >= Duration::from_millis(2_500), "{delay:?}");
            }
        }
    }
}
