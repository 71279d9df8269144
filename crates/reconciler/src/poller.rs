//! The generic wait-for-state engine.
//!
//! A [`PollingReconciler`] probes one resource until it reaches a target
//! state, a recognized failure state, or the deadline. Transient probe
//! errors and unrecognized states are absorbed; exactly one
//! [`ReconciliationOutcome`] comes out of every run.

use std::time::Duration;

use converge_core::{Error, TransportError};
use tokio::time::{Instant, sleep, timeout};
use tracing::{debug, info, warn};

use crate::cancel::{CancelChannel, CancelSignal};
use crate::outcome::ReconciliationOutcome;
use crate::probe::{ProbeResult, StatusProbe};
use crate::spec::PollSpec;
use crate::state::State;

/// What the reconciler has learned so far.
struct Progress<T> {
    object: Option<T>,
    state: Option<State>,
    last_error: Option<TransportError>,
    polls: u32,
    not_found: u32,
    target_hits: u32,
}

impl<T> Progress<T> {
    const fn new() -> Self {
        Self {
            object: None,
            state: None,
            last_error: None,
            polls: 0,
            not_found: 0,
            target_hits: 0,
        }
    }

    fn record(&mut self, object: Option<T>, state: State) {
        if object.is_some() || state.is_absent() {
            self.object = object;
        }
        self.state = Some(state);
        self.last_error = None;
    }

    fn state_label(&self) -> String {
        self.state
            .as_ref()
            .map_or_else(|| "unknown".to_string(), ToString::to_string)
    }

    fn into_outcome(self, elapsed: Duration) -> ReconciliationOutcome<T> {
        ReconciliationOutcome::converged(self.object, self.state, self.polls, elapsed)
    }
}

/// Result of folding one probe into the progress.
enum Decision {
    Converged,
    Abort(Error),
    Continue,
}

/// Drives one resource from "request submitted" to a terminal state.
#[derive(Debug, Clone)]
pub struct PollingReconciler {
    resource: String,
    spec: PollSpec,
}

impl PollingReconciler {
    /// Create a reconciler for the named resource.
    pub fn new(resource: impl Into<String>, spec: PollSpec) -> Self {
        Self {
            resource: resource.into(),
            spec,
        }
    }

    #[must_use]
    pub fn resource(&self) -> &str {
        &self.resource
    }

    #[must_use]
    pub const fn spec(&self) -> &PollSpec {
        &self.spec
    }

    /// Poll until a terminal decision.
    ///
    /// When `cancel` is given, it is checked without blocking before every
    /// probe and interrupts the wait between probes. A `Failed` signal
    /// becomes the outcome's error; a `Closed` signal means a collaborator
    /// finished on our behalf and the latest object and state are returned.
    /// On every decision the reconciler reaches itself, it closes `cancel`.
    pub async fn run<P>(
        &self,
        probe: &P,
        cancel: Option<&CancelChannel>,
    ) -> ReconciliationOutcome<P::Object>
    where
        P: StatusProbe + ?Sized,
    {
        let start = Instant::now();
        let deadline = start + self.spec.timeout();
        let mut progress = Progress::new();

        info!(
            resource = %self.resource,
            pending = %self.spec.pending(),
            target = %self.spec.target(),
            timeout_ms = self.spec.timeout().as_millis(),
            "Waiting for resource to reach target state"
        );

        let initial_delay = self.spec.initial_delay().min(self.spec.timeout());
        if !initial_delay.is_zero() {
            Self::pause(initial_delay, cancel).await;
        }

        loop {
            if let Some(signal) = cancel.and_then(CancelChannel::try_recv) {
                return self.on_signal(signal, progress, start.elapsed());
            }

            let now = Instant::now();
            if now >= deadline {
                return self.finish(self.deadline_error(&progress), progress, start, cancel);
            }

            let result = match timeout(deadline - now, probe.probe()).await {
                Ok(result) => result,
                Err(_) => {
                    debug!(resource = %self.resource, "Probe still running at deadline");
                    return self.finish(self.deadline_error(&progress), progress, start, cancel);
                }
            };
            progress.polls = progress.polls.saturating_add(1);

            match self.fold(result, &mut progress) {
                Decision::Converged => {
                    info!(
                        resource = %self.resource,
                        state = %progress.state_label(),
                        polls = progress.polls,
                        elapsed_ms = start.elapsed().as_millis(),
                        "Resource reached target state"
                    );
                    if let Some(cancel) = cancel {
                        cancel.close();
                    }
                    return progress.into_outcome(start.elapsed());
                }
                Decision::Abort(error) => {
                    return self.finish(error, progress, start, cancel);
                }
                Decision::Continue => {}
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            let delay = self.spec.delay_after(progress.polls).min(remaining);
            if !delay.is_zero() {
                Self::pause(delay, cancel).await;
            }
        }
    }

    /// Fold one probe result into `progress`.
    fn fold<T>(&self, result: ProbeResult<T>, progress: &mut Progress<T>) -> Decision {
        match result {
            ProbeResult::Transient(error) => {
                warn!(
                    resource = %self.resource,
                    attempt = progress.polls,
                    error = %error,
                    "Transient probe error, will retry"
                );
                progress.last_error = Some(error);
                Decision::Continue
            }
            ProbeResult::Failed {
                object,
                state,
                reason,
            } => {
                let error = Error::permanent_failure(&self.resource, state.as_str(), reason);
                progress.record(object, state);
                Decision::Abort(error)
            }
            ProbeResult::Absent => {
                progress.record(None, State::Absent);
                if self.spec.target().contains(&State::Absent) {
                    return self.target_hit(progress);
                }
                progress.target_hits = 0;
                if self.spec.failed().contains(&State::Absent) {
                    return Decision::Abort(Error::permanent_failure(
                        &self.resource,
                        State::Absent.as_str(),
                        "resource not found",
                    ));
                }
                if self.spec.pending().contains(&State::Absent) {
                    debug!(resource = %self.resource, "Resource not found yet");
                    return Decision::Continue;
                }
                progress.not_found = progress.not_found.saturating_add(1);
                if progress.not_found > self.spec.not_found_checks() {
                    return Decision::Abort(Error::resource_gone(
                        &self.resource,
                        progress.not_found,
                    ));
                }
                debug!(
                    resource = %self.resource,
                    not_found = progress.not_found,
                    allowed = self.spec.not_found_checks(),
                    "Resource not found, tolerating"
                );
                Decision::Continue
            }
            ProbeResult::Observed { object, state } => {
                progress.not_found = 0;
                let is_target = self.spec.target().contains(&state);
                let is_failed = self.spec.failed().contains(&state);
                let is_pending = self.spec.pending().contains(&state);
                progress.record(Some(object), state);

                if is_target {
                    return self.target_hit(progress);
                }
                progress.target_hits = 0;

                if is_failed {
                    let state = progress.state.as_ref().map_or("", State::as_str);
                    return Decision::Abort(Error::permanent_failure(
                        &self.resource,
                        state,
                        "control plane reported a failure state",
                    ));
                }

                if is_pending {
                    debug!(
                        resource = %self.resource,
                        state = %progress.state_label(),
                        poll = progress.polls,
                        "Resource still pending"
                    );
                } else {
                    debug!(
                        resource = %self.resource,
                        state = %progress.state_label(),
                        "Unrecognized state, treating as pending"
                    );
                }
                Decision::Continue
            }
        }
    }

    fn target_hit<T>(&self, progress: &mut Progress<T>) -> Decision {
        progress.target_hits = progress.target_hits.saturating_add(1);
        if progress.target_hits >= self.spec.continuous_target_occurrence() {
            Decision::Converged
        } else {
            debug!(
                resource = %self.resource,
                hits = progress.target_hits,
                required = self.spec.continuous_target_occurrence(),
                "Target state observed, waiting for it to hold"
            );
            Decision::Continue
        }
    }

    /// Error for a run that ran out of time.
    fn deadline_error<T>(&self, progress: &Progress<T>) -> Error {
        match &progress.last_error {
            Some(error) => Error::probe_failed(&self.resource, progress.polls, error.clone()),
            None => Error::timeout(
                &self.resource,
                self.spec.timeout(),
                progress.state.as_ref().map(ToString::to_string),
            ),
        }
    }

    fn on_signal<T>(
        &self,
        signal: CancelSignal,
        progress: Progress<T>,
        elapsed: Duration,
    ) -> ReconciliationOutcome<T> {
        match signal {
            CancelSignal::Closed => {
                info!(resource = %self.resource, "Stopped by collaborator");
                progress.into_outcome(elapsed)
            }
            CancelSignal::Failed(error) => {
                warn!(resource = %self.resource, error = %error, "Aborted by collaborator");
                progress.into_outcome(elapsed).with_error(error)
            }
        }
    }

    fn finish<T>(
        &self,
        error: Error,
        progress: Progress<T>,
        start: Instant,
        cancel: Option<&CancelChannel>,
    ) -> ReconciliationOutcome<T> {
        warn!(
            resource = %self.resource,
            error = %error,
            polls = progress.polls,
            elapsed_ms = start.elapsed().as_millis(),
            "Reconciliation failed"
        );
        if let Some(cancel) = cancel {
            cancel.close();
        }
        progress.into_outcome(start.elapsed()).with_error(error)
    }

    /// Sleep, waking early if `cancel` closes.
    async fn pause(duration: Duration, cancel: Option<&CancelChannel>) {
        match cancel {
            Some(cancel) => {
                tokio::select! {
                    () = sleep(duration) => {}
                    _ = cancel.recv() => {}
                }
            }
            None => sleep(duration).await,
        }
    }
}
