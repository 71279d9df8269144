//! One reconciliation, optionally with a stall supervisor beside it.

use std::sync::Arc;

use converge_core::{Result, ResultExt, SupervisorSettings};
use tracing::{debug, warn};

use crate::cancel::CancelChannel;
use crate::outcome::ReconciliationOutcome;
use crate::poller::PollingReconciler;
use crate::probe::StatusProbe;
use crate::spec::PollSpec;
use crate::supervisor::{CorrectiveAction, CorrectiveActionSupervisor, SupervisorReport};

/// Builder tying a probe, a spec and an optional corrective action together.
///
/// ```ignore
/// let outcome = Reconciliation::new("vm-42", probe, spec)
///     .with_corrective_action(force_restart, SupervisorSettings { grace_secs: 600, max_actions: Some(3) })?
///     .run()
///     .await;
/// ```
pub struct Reconciliation<P> {
    resource: String,
    probe: P,
    spec: PollSpec,
    corrective: Option<(Arc<dyn CorrectiveAction>, CorrectiveActionSupervisor)>,
}

impl<P: StatusProbe> Reconciliation<P> {
    pub fn new(resource: impl Into<String>, probe: P, spec: PollSpec) -> Self {
        Self {
            resource: resource.into(),
            probe,
            spec,
            corrective: None,
        }
    }

    /// Run `action` once per grace period while the resource has not
    /// converged. Fails when `settings` has a zero grace period.
    pub fn with_corrective_action<A>(mut self, action: A, settings: SupervisorSettings) -> Result<Self>
    where
        A: CorrectiveAction + 'static,
    {
        let supervisor = CorrectiveActionSupervisor::from_settings(&self.resource, &settings)?;
        self.corrective = Some((Arc::new(action), supervisor));
        Ok(self)
    }

    /// Reconcile and return the outcome.
    pub async fn run(self) -> ReconciliationOutcome<P::Object> {
        self.run_with_report().await.0
    }

    /// Reconcile and also return the supervisor's report, if one ran.
    ///
    /// The supervisor task has always stopped by the time this returns. If
    /// the returned future is dropped early the channel is still closed, so
    /// the supervisor stops at its next wake-up.
    pub async fn run_with_report(
        self,
    ) -> (ReconciliationOutcome<P::Object>, Option<SupervisorReport>) {
        let Self {
            resource,
            probe,
            spec,
            corrective,
        } = self;
        let reconciler = PollingReconciler::new(resource.clone(), spec);

        let Some((action, supervisor)) = corrective else {
            return (reconciler.run(&probe, None).await, None);
        };

        let cancel = CancelChannel::new();
        let _guard = cancel.close_on_drop();
        let supervisor = supervisor.spawn(action, cancel.clone());

        let outcome = reconciler.run(&probe, Some(&cancel)).await;
        // Already closed on every path the reconciler decides itself.
        cancel.close();

        let report = supervisor
            .join()
            .await
            .inspect_error(|error| {
                warn!(resource = %resource, error = %error, "Supervisor task did not complete");
            })
            .ok();
        if let Some(report) = &report {
            debug!(
                resource = %resource,
                actions_taken = report.actions_taken,
                exit = ?report.exit,
                "Supervisor joined"
            );
        }

        (outcome, report)
    }
}
