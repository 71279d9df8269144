//! Engine configuration.
//!
//! Call sites normally build a `PollSpec` in code, but per-resource-type
//! timing and status vocabularies can also be kept in a TOML file:
//!
//! ```toml
//! [defaults]
//! timeout_secs = 900
//! poll_interval_ms = 10000
//!
//! [profiles.database]
//! pending = ["creating", "backing-up", "modifying"]
//! target = ["available"]
//! failed = ["failed", "incompatible-parameters"]
//!
//! [profiles.database.poll]
//! timeout_secs = 3600
//!
//! [profiles.database.retry]
//! exception = "InvalidDBInstanceState"
//! delay_ms = 30000
//!
//! [profiles.instance.supervisor]
//! grace_secs = 600
//! max_actions = 3
//! ```

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use itertools::Itertools;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::Error;
use crate::result::Result;

/// Environment variable overriding the default poll timeout.
pub const ENV_TIMEOUT_SECS: &str = "CONVERGE_POLL_TIMEOUT_SECS";

/// Environment variable overriding the default poll interval.
pub const ENV_POLL_INTERVAL_MS: &str = "CONVERGE_POLL_INTERVAL_MS";

/// Timing for one polling reconciliation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PollSettings {
    /// Hard wall-clock deadline for the whole wait.
    pub timeout_secs: u64,
    /// Delay before the first probe.
    pub initial_delay_ms: u64,
    /// Delay between probes. Zero selects exponential backoff.
    pub poll_interval_ms: u64,
    /// Floor for the delay between probes.
    pub min_poll_interval_ms: u64,
    /// Consecutive absent observations tolerated while absence is not a target.
    pub not_found_checks: u32,
    /// Consecutive target observations required before success.
    pub continuous_target_occurrence: u32,
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            timeout_secs: 600,
            initial_delay_ms: 5_000,
            poll_interval_ms: 5_000,
            min_poll_interval_ms: 1_000,
            not_found_checks: 20,
            continuous_target_occurrence: 1,
        }
    }
}

impl PollSettings {
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    #[must_use]
    pub const fn initial_delay(&self) -> Duration {
        Duration::from_millis(self.initial_delay_ms)
    }

    #[must_use]
    pub const fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    #[must_use]
    pub const fn min_poll_interval(&self) -> Duration {
        Duration::from_millis(self.min_poll_interval_ms)
    }

    /// Apply per-profile overrides on top of these settings.
    #[must_use]
    pub fn merged(&self, overrides: &PollOverrides) -> Self {
        Self {
            timeout_secs: overrides.timeout_secs.unwrap_or(self.timeout_secs),
            initial_delay_ms: overrides.initial_delay_ms.unwrap_or(self.initial_delay_ms),
            poll_interval_ms: overrides.poll_interval_ms.unwrap_or(self.poll_interval_ms),
            min_poll_interval_ms: overrides
                .min_poll_interval_ms
                .unwrap_or(self.min_poll_interval_ms),
            not_found_checks: overrides.not_found_checks.unwrap_or(self.not_found_checks),
            continuous_target_occurrence: overrides
                .continuous_target_occurrence
                .unwrap_or(self.continuous_target_occurrence),
        }
    }

    fn validate(&self, scope: &str) -> Result<()> {
        if self.timeout_secs == 0 {
            return Err(Error::config(format!("{scope}: timeout_secs must be > 0")));
        }
        if self.continuous_target_occurrence == 0 {
            return Err(Error::config(format!(
                "{scope}: continuous_target_occurrence must be > 0"
            )));
        }
        Ok(())
    }
}

/// Partial poll settings for a profile; unset fields fall back to `[defaults]`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollOverrides {
    pub timeout_secs: Option<u64>,
    pub initial_delay_ms: Option<u64>,
    pub poll_interval_ms: Option<u64>,
    pub min_poll_interval_ms: Option<u64>,
    pub not_found_checks: Option<u32>,
    pub continuous_target_occurrence: Option<u32>,
}

/// Retry policy for one named server-side conflict.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetrySettings {
    /// Exception name that marks the conflict as transient.
    pub exception: String,
    /// Fixed delay between attempts.
    pub delay_ms: u64,
    /// Optional attempt cap. Absent means retry until the caller gives up.
    #[serde(default)]
    pub max_attempts: Option<u32>,
}

impl RetrySettings {
    #[must_use]
    pub const fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }
}

/// Schedule for the stall-recovery supervisor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SupervisorSettings {
    /// Period between corrective actions while the resource is still pending.
    pub grace_secs: u64,
    /// Optional cap on corrective actions.
    #[serde(default)]
    pub max_actions: Option<u32>,
}

impl SupervisorSettings {
    #[must_use]
    pub const fn grace(&self) -> Duration {
        Duration::from_secs(self.grace_secs)
    }
}

/// Status vocabulary and timing for one resource type.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileConfig {
    /// Tokens meaning "still converging".
    #[serde(default)]
    pub pending: Vec<String>,
    /// Tokens meaning "done".
    pub target: Vec<String>,
    /// Tokens meaning "permanently failed".
    #[serde(default)]
    pub failed: Vec<String>,
    #[serde(default)]
    pub poll: PollOverrides,
    #[serde(default)]
    pub retry: Option<RetrySettings>,
    #[serde(default)]
    pub supervisor: Option<SupervisorSettings>,
}

impl ProfileConfig {
    fn validate(&self, name: &str) -> Result<()> {
        if self.target.is_empty() {
            return Err(Error::config(format!(
                "profile '{name}': target must name at least one state"
            )));
        }

        let sets = [
            ("pending", &self.pending),
            ("target", &self.target),
            ("failed", &self.failed),
        ];
        for ((left_name, left), (right_name, right)) in sets.iter().tuple_combinations() {
            let overlap = left.iter().filter(|s| right.contains(s)).join(", ");
            if !overlap.is_empty() {
                return Err(Error::config(format!(
                    "profile '{name}': {left_name} and {right_name} share states: {overlap}"
                )));
            }
        }

        if let Some(supervisor) = &self.supervisor {
            if supervisor.grace_secs == 0 {
                return Err(Error::config(format!(
                    "profile '{name}': supervisor grace_secs must be > 0"
                )));
            }
        }

        Ok(())
    }
}

/// Top-level configuration file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub defaults: PollSettings,
    #[serde(default)]
    pub profiles: BTreeMap<String, ProfileConfig>,
}

impl EngineConfig {
    /// Parse and validate a TOML document.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)
            .map_err(|e| Error::config(format!("failed to parse config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a file. `.json` files are parsed as JSON,
    /// everything else as TOML.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::config(format!("failed to read '{}': {e}", path.display()))
        })?;

        if path.extension().is_some_and(|e| e == "json") {
            let config: Self = serde_json::from_str(&content)
                .map_err(|e| Error::config(format!("failed to parse config: {e}")))?;
            config.validate()?;
            debug!(path = %path.display(), profiles = config.profiles.len(), "Loaded JSON config");
            Ok(config)
        } else {
            let config = Self::from_toml_str(&content)?;
            debug!(path = %path.display(), profiles = config.profiles.len(), "Loaded TOML config");
            Ok(config)
        }
    }

    /// Apply `CONVERGE_POLL_*` environment overrides to the defaults.
    #[must_use]
    pub fn with_env_overrides(self) -> Self {
        self.with_overrides_from(|key| std::env::var(key).ok())
    }

    /// Apply `CONVERGE_POLL_*` overrides read through `lookup`. Unparsable
    /// values and a zero timeout are ignored.
    #[must_use]
    pub fn with_overrides_from<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let read_u64 = |key: &str| lookup(key).and_then(|v| v.trim().parse::<u64>().ok());
        if let Some(secs) = read_u64(ENV_TIMEOUT_SECS).filter(|s| *s > 0) {
            self.defaults.timeout_secs = secs;
        }
        if let Some(ms) = read_u64(ENV_POLL_INTERVAL_MS) {
            self.defaults.poll_interval_ms = ms;
        }
        self
    }

    /// Look up a profile by name.
    pub fn profile(&self, name: &str) -> Result<&ProfileConfig> {
        self.profiles.get(name).ok_or_else(|| {
            Error::config(format!(
                "unknown profile '{name}' (known: {})",
                self.profiles.keys().join(", ")
            ))
        })
    }

    /// Effective poll settings for a profile.
    pub fn poll_settings(&self, name: &str) -> Result<PollSettings> {
        self.profile(name).map(|p| self.defaults.merged(&p.poll))
    }

    /// Validate defaults and every profile.
    pub fn validate(&self) -> Result<()> {
        self.defaults.validate("defaults")?;
        for (name, profile) in &self.profiles {
            profile.validate(name)?;
            self.defaults
                .merged(&profile.poll)
                .validate(&format!("profile '{name}'"))?;
        }
        Ok(())
    }
}
