//! Replays a scripted control plane through the reconciliation engine.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::time::Duration;

use anyhow::{Context, Result};
use converge_core::{EngineConfig, Error, RetrySettings, SupervisorSettings, TransportError};
use converge_reconciler::{
    PollSpec, Reconciliation, ReconciliationOutcome, RetrySpec, StatusVocabulary, VocabularyProbe,
    action_fn, mutate_with_retry,
};
use serde::Serialize;
use tracing::info;

use crate::cli::SimulateArgs;

/// Script token read back as a not-found error.
pub const ABSENT_TOKEN: &str = "absent";

/// Script token read back as a transport failure.
pub const UNREACHABLE_TOKEN: &str = "unreachable";

/// Exception name the simulated control plane uses for restart conflicts.
pub const RESTART_CONFLICT: &str = "ConcurrentModification";

/// What a read of the simulated resource returns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Snapshot {
    pub resource: String,
    pub status: String,
    /// Number of reads served before this one.
    pub generation: u32,
    pub restarts: u32,
}

/// An in-memory control plane stepping through a status script.
///
/// The script advances by one entry per read and repeats its last entry.
/// With a stall point, the script freezes there until a restart lands.
#[derive(Debug)]
pub struct ScriptedControlPlane {
    resource: String,
    script: Vec<String>,
    cursor: AtomicUsize,
    reads: AtomicU32,
    stall_after: Option<usize>,
    unstuck: AtomicBool,
    restarts: AtomicU32,
    conflicts_left: AtomicU32,
    reject_restart: bool,
}

impl ScriptedControlPlane {
    pub fn new(resource: impl Into<String>, script: Vec<String>) -> Self {
        Self {
            resource: resource.into(),
            script,
            cursor: AtomicUsize::new(0),
            reads: AtomicU32::new(0),
            stall_after: None,
            unstuck: AtomicBool::new(false),
            restarts: AtomicU32::new(0),
            conflicts_left: AtomicU32::new(0),
            reject_restart: false,
        }
    }

    /// Freeze at script entry `index` until restarted.
    #[must_use]
    pub const fn with_stall(mut self, index: usize) -> Self {
        self.stall_after = Some(index);
        self
    }

    /// Answer the next `count` restarts with a conflict.
    #[must_use]
    pub fn with_restart_conflicts(self, count: u32) -> Self {
        self.conflicts_left.store(count, Ordering::SeqCst);
        self
    }

    #[must_use]
    pub const fn rejecting_restarts(mut self) -> Self {
        self.reject_restart = true;
        self
    }

    fn stalled_at(&self) -> Option<usize> {
        self.stall_after
            .filter(|_| !self.unstuck.load(Ordering::SeqCst))
    }

    /// Read the resource.
    pub fn describe(&self) -> std::result::Result<(Snapshot, String), TransportError> {
        let generation = self.reads.fetch_add(1, Ordering::SeqCst);
        let index = match self.stalled_at() {
            Some(stall) => {
                let index = self.cursor.load(Ordering::SeqCst).min(stall);
                self.cursor.store(index.saturating_add(1), Ordering::SeqCst);
                index
            }
            None => self.cursor.fetch_add(1, Ordering::SeqCst),
        };

        let Some(status) = self.script.get(index).or_else(|| self.script.last()) else {
            return Err(TransportError::new("empty status script").with_status(500));
        };

        match status.as_str() {
            ABSENT_TOKEN => Err(TransportError::not_found(format!(
                "{} does not exist",
                self.resource
            ))),
            UNREACHABLE_TOKEN => {
                Err(TransportError::new("control plane unreachable").with_status(503))
            }
            _ => Ok((
                Snapshot {
                    resource: self.resource.clone(),
                    status: status.clone(),
                    generation,
                    restarts: self.restarts.load(Ordering::SeqCst),
                },
                status.clone(),
            )),
        }
    }

    /// Force-restart the resource, freeing a stalled script.
    pub fn restart(&self) -> std::result::Result<(), TransportError> {
        if self.reject_restart {
            return Err(TransportError::exception(
                "IncorrectInstanceState",
                format!("{} cannot be restarted", self.resource),
            )
            .with_status(400));
        }
        let conflict = self
            .conflicts_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if conflict {
            return Err(TransportError::exception(
                RESTART_CONFLICT,
                "another operation is in progress",
            )
            .with_status(409));
        }
        self.restarts.fetch_add(1, Ordering::SeqCst);
        self.unstuck.store(true, Ordering::SeqCst);
        Ok(())
    }

    pub fn restarts(&self) -> u32 {
        self.restarts.load(Ordering::SeqCst)
    }

    pub fn reads(&self) -> u32 {
        self.reads.load(Ordering::SeqCst)
    }
}

/// Resolved simulation inputs.
#[derive(Debug, Clone)]
pub struct Simulation {
    pub resource: String,
    pub spec: PollSpec,
    pub vocabulary: StatusVocabulary,
    pub supervisor: SupervisorSettings,
    pub retry: RetrySettings,
}

impl Simulation {
    /// Build from command-line flags, or from a configuration profile when
    /// one is named.
    pub fn from_args(args: &SimulateArgs) -> Result<Self> {
        let supervisor = SupervisorSettings {
            grace_secs: args.grace_secs,
            max_actions: None,
        };
        let retry = RetrySettings {
            exception: RESTART_CONFLICT.to_string(),
            delay_ms: 200,
            max_attempts: None,
        };

        match (&args.profile, &args.config) {
            (Some(name), Some(path)) => {
                let config = EngineConfig::from_file(path)
                    .with_context(|| format!("Failed to load config from {}", path.display()))?
                    .with_env_overrides();
                let profile = config.profile(name)?;
                Ok(Self {
                    resource: args.resource.clone(),
                    spec: PollSpec::from_profile(profile, &config.defaults)?,
                    vocabulary: StatusVocabulary::from_profile(profile),
                    supervisor: profile.supervisor.clone().unwrap_or(supervisor),
                    retry: profile.retry.clone().unwrap_or(retry),
                })
            }
            _ => {
                let spec = PollSpec::builder()
                    .pending(args.pending.iter().map(String::as_str))
                    .target(args.target.iter().map(String::as_str))
                    .failed(args.failed.iter().map(String::as_str))
                    .timeout(Duration::from_secs(args.timeout_secs))
                    .initial_delay(Duration::from_millis(args.initial_delay_ms))
                    .poll_interval(Duration::from_millis(args.interval_ms))
                    .min_poll_interval(Duration::from_millis(args.interval_ms.min(100)))
                    .build()?;
                Ok(Self {
                    resource: args.resource.clone(),
                    vocabulary: StatusVocabulary::for_spec(&spec),
                    spec,
                    supervisor,
                    retry,
                })
            }
        }
    }
}

/// JSON summary of one simulated reconciliation.
#[derive(Debug, Clone, Serialize)]
pub struct SimulationReport {
    pub resource: String,
    pub success: bool,
    pub final_state: String,
    pub polls: u32,
    pub elapsed_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<&'static str>,
    pub corrective_actions: u32,
    pub restarts: u32,
    pub reads: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub object: Option<Snapshot>,
}

const fn error_kind(error: &Error) -> &'static str {
    if error.is_timeout() {
        "timeout"
    } else if error.is_permanent() {
        "permanent"
    } else if error.is_corrective_action_failure() {
        "corrective_action"
    } else if error.is_transport() {
        "transport"
    } else {
        "other"
    }
}

impl SimulationReport {
    fn new(
        resource: &str,
        outcome: ReconciliationOutcome<Snapshot>,
        corrective_actions: u32,
        plane: &ScriptedControlPlane,
    ) -> Self {
        Self {
            resource: resource.to_string(),
            success: outcome.is_success(),
            final_state: outcome.state_str().to_string(),
            polls: outcome.polls,
            elapsed_ms: u64::try_from(outcome.elapsed.as_millis()).unwrap_or(u64::MAX),
            error: outcome.error.as_ref().map(ToString::to_string),
            error_kind: outcome.error.as_ref().map(error_kind),
            corrective_actions,
            restarts: plane.restarts(),
            reads: plane.reads(),
            object: outcome.object,
        }
    }
}

/// Run one simulated reconciliation against `plane`.
///
/// A corrective restart is attached when the plane has a stall point.
pub async fn run(simulation: Simulation, plane: Arc<ScriptedControlPlane>) -> Result<SimulationReport> {
    let Simulation {
        resource,
        spec,
        vocabulary,
        supervisor,
        retry,
    } = simulation;

    let probe = {
        let plane = plane.clone();
        VocabularyProbe::new(
            move || {
                let read = plane.describe();
                async move { read }
            },
            vocabulary,
        )
        .with_reason(|snapshot: &Snapshot| {
            Some(format!(
                "{} reported '{}' after {} reads",
                snapshot.resource, snapshot.status, snapshot.generation
            ))
        })
    };

    let reconciliation = Reconciliation::new(resource.clone(), probe, spec);
    let reconciliation = if plane.stall_after.is_some() {
        let retry = RetrySpec::from_settings(&retry);
        let restart_plane = plane.clone();
        let action = action_fn(move || {
            let plane = restart_plane.clone();
            let retry = retry.clone();
            async move { mutate_with_retry(&retry, || std::future::ready(plane.restart())).await }
        });
        reconciliation
            .with_corrective_action(action, supervisor)
            .context("Invalid supervisor settings")?
    } else {
        reconciliation
    };

    info!(resource = %resource, "Starting simulated reconciliation");
    let (outcome, report) = reconciliation.run_with_report().await;
    let actions = report.map_or(0, |r| r.actions_taken);

    Ok(SimulationReport::new(&resource, outcome, actions, &plane))
}

/// Entry point for `converge simulate`.
pub async fn execute(args: &SimulateArgs) -> Result<SimulationReport> {
    let simulation = Simulation::from_args(args)?;

    let mut plane = ScriptedControlPlane::new(&args.resource, args.states.clone())
        .with_restart_conflicts(args.restart_conflicts);
    if let Some(index) = args.stall_after {
        plane = plane.with_stall(index);
    }
    if args.reject_restart {
        plane = plane.rejecting_restarts();
    }

    run(simulation, Arc::new(plane)).await
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use std::io::Write;

    use clap::Parser;

    use super::*;
    use crate::cli::{Cli, Commands};

    fn args(extra: &[&str]) -> SimulateArgs {
        let argv = ["converge", "simulate"].into_iter().chain(extra.iter().copied());
        match Cli::try_parse_from(argv).unwrap().command {
            Commands::Simulate(args) => args,
            Commands::CheckConfig { .. } => unreachable!("parsed check-config"),
        }
    }

    fn script(states: &[&str]) -> Vec<String> {
        states.iter().map(ToString::to_string).collect()
    }

    #[test]
    fn test_plane_steps_and_repeats_last() {
        let plane = ScriptedControlPlane::new("db", script(&["provisioning", "available"]));
        assert_eq!(plane.describe().unwrap().1, "provisioning");
        assert_eq!(plane.describe().unwrap().1, "available");
        assert_eq!(plane.describe().unwrap().1, "available");
        assert_eq!(plane.reads(), 3);
    }

    #[test]
    fn test_plane_stalls_until_restart() {
        let plane = ScriptedControlPlane::new("vm", script(&["pending", "starting", "running"]))
            .with_stall(1);
        assert_eq!(plane.describe().unwrap().1, "pending");
        assert_eq!(plane.describe().unwrap().1, "starting");
        assert_eq!(plane.describe().unwrap().1, "starting");

        plane.restart().unwrap();
        assert_eq!(plane.describe().unwrap().1, "running");
        assert_eq!(plane.restarts(), 1);
    }

    #[test]
    fn test_plane_special_tokens() {
        let plane = ScriptedControlPlane::new("vm", script(&[UNREACHABLE_TOKEN, ABSENT_TOKEN]));
        assert_eq!(plane.describe().unwrap_err().status, Some(503));
        assert!(plane.describe().unwrap_err().is_not_found());
    }

    #[tokio::test(start_paused = true)]
    async fn test_simulate_converges() {
        let args = args(&["--states", "provisioning,Provisioning,AVAILABLE", "--interval-ms", "1000"]);

        let report = execute(&args).await.unwrap();

        assert!(report.success);
        assert_eq!(report.final_state, "available");
        assert_eq!(report.polls, 3);
        assert_eq!(report.elapsed_ms, 2000);
        assert!(report.error.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_simulate_failed_state_carries_reason() {
        let args = args(&["--states", "provisioning,failed"]);

        let report = execute(&args).await.unwrap();

        assert!(!report.success);
        assert_eq!(report.error_kind, Some("permanent"));
        assert!(report.error.unwrap().contains("after 1 reads"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_simulate_stall_recovered_through_conflicts() {
        let args = args(&[
            "--states",
            "provisioning,provisioning,available",
            "--stall-after",
            "1",
            "--grace-secs",
            "3",
            "--restart-conflicts",
            "2",
        ]);

        let report = execute(&args).await.unwrap();

        assert!(report.success);
        assert_eq!(report.corrective_actions, 1);
        assert_eq!(report.restarts, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_simulate_rejected_restart_aborts() {
        let args = args(&[
            "--states",
            "provisioning",
            "--stall-after",
            "0",
            "--reject-restart",
        ]);

        let report = execute(&args).await.unwrap();

        assert!(!report.success);
        assert_eq!(report.error_kind, Some("corrective_action"));
        assert_eq!(report.elapsed_ms, 2000);
    }

    #[tokio::test(start_paused = true)]
    async fn test_simulate_from_profile() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        write!(
            file,
            r#"
[defaults]
timeout_secs = 60
initial_delay_ms = 0
poll_interval_ms = 1000

[profiles.vm]
pending = ["PENDING"]
target = ["RUNNING"]
failed = ["ERROR"]
"#
        )
        .unwrap();
        let path = file.path().to_string_lossy().to_string();
        let args = args(&["--states", "pending,running", "--profile", "vm", "--config", path.as_str()]);

        let report = execute(&args).await.unwrap();

        assert!(report.success);
        assert_eq!(report.final_state, "RUNNING");
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_grace_with_stall_is_an_error() {
        let args = args(&["--states", "provisioning,available", "--stall-after", "0", "--grace-secs", "0"]);

        assert!(execute(&args).await.is_err());
    }

    #[test]
    fn test_unknown_profile_is_an_error() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "[profiles.db]\ntarget = [\"available\"]").unwrap();
        let path = file.path().to_string_lossy().to_string();

        let result = Simulation::from_args(&args(&[
            "--states", "x", "--profile", "vm", "--config", path.as_str(),
        ]));
        assert!(result.is_err());
    }
}
