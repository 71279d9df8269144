//! Immutable per-call-site polling configuration.

use std::time::Duration;

use converge_core::{Error, PollSettings, ProfileConfig, Result};
use itertools::Itertools;

use crate::state::{State, StateSet};

/// First delay used when `poll_interval` is zero.
const BACKOFF_START: Duration = Duration::from_millis(100);

/// Ceiling for the backoff cadence.
const BACKOFF_CEILING: Duration = Duration::from_secs(10);

/// What a reconciler waits for, and for how long.
///
/// Built once per call site through [`PollSpec::builder`] and never mutated.
/// `pending`, `target` and `failed` are pairwise disjoint and `timeout` is
/// non-zero.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollSpec {
    pending: StateSet,
    target: StateSet,
    failed: StateSet,
    timeout: Duration,
    initial_delay: Duration,
    poll_interval: Duration,
    min_poll_interval: Duration,
    not_found_checks: u32,
    continuous_target_occurrence: u32,
}

impl PollSpec {
    /// Start building a spec with default timing.
    #[must_use]
    pub fn builder() -> PollSpecBuilder {
        PollSpecBuilder::default()
    }

    /// Build a spec from a configured profile, merging its poll overrides
    /// onto `defaults`.
    pub fn from_profile(profile: &ProfileConfig, defaults: &PollSettings) -> Result<Self> {
        Self::builder()
            .settings(&defaults.merged(&profile.poll))
            .pending(profile.pending.iter().map(String::as_str))
            .target(profile.target.iter().map(String::as_str))
            .failed(profile.failed.iter().map(String::as_str))
            .build()
    }

    #[must_use]
    pub const fn pending(&self) -> &StateSet {
        &self.pending
    }

    #[must_use]
    pub const fn target(&self) -> &StateSet {
        &self.target
    }

    #[must_use]
    pub const fn failed(&self) -> &StateSet {
        &self.failed
    }

    #[must_use]
    pub const fn timeout(&self) -> Duration {
        self.timeout
    }

    #[must_use]
    pub const fn initial_delay(&self) -> Duration {
        self.initial_delay
    }

    #[must_use]
    pub const fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    #[must_use]
    pub const fn min_poll_interval(&self) -> Duration {
        self.min_poll_interval
    }

    #[must_use]
    pub const fn not_found_checks(&self) -> u32 {
        self.not_found_checks
    }

    #[must_use]
    pub const fn continuous_target_occurrence(&self) -> u32 {
        self.continuous_target_occurrence
    }

    /// Whether absence counts as convergence (delete confirmation).
    #[must_use]
    pub fn waits_for_absence(&self) -> bool {
        self.target.contains(&State::Absent)
    }

    /// Delay before the probe following the `completed`-th one.
    ///
    /// A fixed `poll_interval` is floored at `min_poll_interval`. A zero
    /// interval doubles from `max(min_poll_interval, 100ms)` up to 10s.
    #[must_use]
    pub fn delay_after(&self, completed: u32) -> Duration {
        if !self.poll_interval.is_zero() {
            return self.poll_interval.max(self.min_poll_interval);
        }

        let start = self.min_poll_interval.max(BACKOFF_START);
        let factor = 2_u32.saturating_pow(completed.saturating_sub(1));
        start
            .saturating_mul(factor)
            .min(BACKOFF_CEILING)
            .max(self.min_poll_interval)
    }

    fn validate(&self) -> Result<()> {
        if self.timeout.is_zero() {
            return Err(Error::invalid_spec("timeout must be greater than zero"));
        }
        if self.target.is_empty() {
            return Err(Error::invalid_spec("target states must not be empty"));
        }
        if self.continuous_target_occurrence == 0 {
            return Err(Error::invalid_spec(
                "continuous_target_occurrence must be at least 1",
            ));
        }

        let sets = [
            ("pending", &self.pending),
            ("target", &self.target),
            ("failed", &self.failed),
        ];
        for ((left_name, left), (right_name, right)) in sets.iter().tuple_combinations() {
            let overlap = left.intersection(right);
            if !overlap.is_empty() {
                return Err(Error::invalid_spec(format!(
                    "{left_name} and {right_name} states overlap: {}",
                    overlap.iter().join(", ")
                )));
            }
        }

        Ok(())
    }
}

/// Builder for [`PollSpec`].
#[derive(Debug, Clone)]
pub struct PollSpecBuilder {
    pending: StateSet,
    target: StateSet,
    failed: StateSet,
    timeout: Duration,
    initial_delay: Duration,
    poll_interval: Duration,
    min_poll_interval: Duration,
    not_found_checks: u32,
    continuous_target_occurrence: u32,
}

impl Default for PollSpecBuilder {
    fn default() -> Self {
        let defaults = PollSettings::default();
        Self {
            pending: StateSet::new(),
            target: StateSet::new(),
            failed: StateSet::new(),
            timeout: defaults.timeout(),
            initial_delay: defaults.initial_delay(),
            poll_interval: defaults.poll_interval(),
            min_poll_interval: defaults.min_poll_interval(),
            not_found_checks: defaults.not_found_checks,
            continuous_target_occurrence: defaults.continuous_target_occurrence,
        }
    }
}

impl PollSpecBuilder {
    /// States that mean "keep waiting".
    #[must_use]
    pub fn pending<S: Into<State>>(mut self, states: impl IntoIterator<Item = S>) -> Self {
        self.pending = states.into_iter().collect();
        self
    }

    /// States that mean "done".
    #[must_use]
    pub fn target<S: Into<State>>(mut self, states: impl IntoIterator<Item = S>) -> Self {
        self.target = states.into_iter().collect();
        self
    }

    /// States that mean "permanently failed".
    #[must_use]
    pub fn failed<S: Into<State>>(mut self, states: impl IntoIterator<Item = S>) -> Self {
        self.failed = states.into_iter().collect();
        self
    }

    /// Wait for the resource to disappear.
    #[must_use]
    pub fn target_absent(mut self) -> Self {
        self.target = self.target.with(State::Absent);
        self
    }

    /// Copy every timing field from configuration.
    #[must_use]
    pub const fn settings(mut self, settings: &PollSettings) -> Self {
        self.timeout = settings.timeout();
        self.initial_delay = settings.initial_delay();
        self.poll_interval = settings.poll_interval();
        self.min_poll_interval = settings.min_poll_interval();
        self.not_found_checks = settings.not_found_checks;
        self.continuous_target_occurrence = settings.continuous_target_occurrence;
        self
    }

    #[must_use]
    pub const fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    #[must_use]
    pub const fn initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    #[must_use]
    pub const fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    #[must_use]
    pub const fn min_poll_interval(mut self, interval: Duration) -> Self {
        self.min_poll_interval = interval;
        self
    }

    #[must_use]
    pub const fn not_found_checks(mut self, checks: u32) -> Self {
        self.not_found_checks = checks;
        self
    }

    #[must_use]
    pub const fn continuous_target_occurrence(mut self, occurrences: u32) -> Self {
        self.continuous_target_occurrence = occurrences;
        self
    }

    /// Validate and build the spec.
    pub fn build(self) -> Result<PollSpec> {
        let spec = PollSpec {
            pending: self.pending,
            target: self.target,
            failed: self.failed,
            timeout: self.timeout,
            initial_delay: self.initial_delay,
            poll_interval: self.poll_interval,
            min_poll_interval: self.min_poll_interval,
            not_found_checks: self.not_found_checks,
            continuous_target_occurrence: self.continuous_target_occurrence,
        };
        spec.validate()?;
        Ok(spec)
    }
}
