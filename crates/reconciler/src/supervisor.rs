//! Stall recovery for resources that can hang mid-transition.
//!
//! A [`CorrectiveActionSupervisor`] runs beside a [`PollingReconciler`]
//! and shares its [`CancelChannel`]. Every grace period in which the channel
//! is still open it applies a compensating operation (forced restart and
//! the like). If the compensating operation itself fails, the error is
//! written to the channel and the paired reconciler aborts on its next
//! check.
//!
//! [`PollingReconciler`]: crate::poller::PollingReconciler

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use converge_core::{Error, Result, SupervisorSettings, TransportError};
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::cancel::CancelChannel;

/// A compensating write issued when a resource appears stuck.
///
/// Must be a bounded call; a supervisor blocked inside `apply` cannot
/// observe the channel closing.
#[async_trait]
pub trait CorrectiveAction: Send + Sync {
    async fn apply(&self) -> std::result::Result<(), TransportError>;
}

#[async_trait]
impl<A: CorrectiveAction + ?Sized> CorrectiveAction for Arc<A> {
    async fn apply(&self) -> std::result::Result<(), TransportError> {
        (**self).apply().await
    }
}

/// A corrective action backed by an async closure.
pub struct FnAction<F> {
    f: F,
}

/// Wrap an async closure as a [`CorrectiveAction`].
pub const fn action_fn<F, Fut>(f: F) -> FnAction<F>
where
    F: Fn() -> Fut + Send + Sync,
    Fut: Future<Output = std::result::Result<(), TransportError>> + Send,
{
    FnAction { f }
}

#[async_trait]
impl<F, Fut> CorrectiveAction for FnAction<F>
where
    F: Fn() -> Fut + Send + Sync,
    Fut: Future<Output = std::result::Result<(), TransportError>> + Send,
{
    async fn apply(&self) -> std::result::Result<(), TransportError> {
        (self.f)().await
    }
}

/// Why a supervisor stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SupervisorExit {
    /// The channel was closed by the reconciler or a collaborator.
    Cancelled,
    /// The corrective action failed and the error was sent on the channel.
    ActionFailed,
}

/// Summary returned when a supervisor task ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SupervisorReport {
    pub actions_taken: u32,
    pub exit: SupervisorExit,
}

/// Handle to a spawned supervisor task.
#[derive(Debug)]
pub struct SupervisorHandle {
    handle: JoinHandle<SupervisorReport>,
}

impl SupervisorHandle {
    /// Wait for the supervisor to stop.
    pub async fn join(self) -> Result<SupervisorReport> {
        self.handle
            .await
            .map_err(|e| Error::task_failed(format!("supervisor task: {e}")))
    }

    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

/// Watchdog that nudges a stalled resource once per grace period.
#[derive(Debug, Clone)]
pub struct CorrectiveActionSupervisor {
    resource: String,
    grace: Duration,
    max_actions: Option<u32>,
}

impl CorrectiveActionSupervisor {
    /// Fails with [`Error::InvalidSpec`] when `grace` is zero.
    pub fn new(resource: impl Into<String>, grace: Duration) -> Result<Self> {
        if grace.is_zero() {
            return Err(Error::invalid_spec(
                "supervisor grace period must be greater than zero",
            ));
        }
        Ok(Self {
            resource: resource.into(),
            grace,
            max_actions: None,
        })
    }

    pub fn from_settings(
        resource: impl Into<String>,
        settings: &SupervisorSettings,
    ) -> Result<Self> {
        let supervisor = Self::new(resource, settings.grace())?;
        Ok(Self {
            max_actions: settings.max_actions,
            ..supervisor
        })
    }

    /// Stop issuing corrective actions after `max`; the supervisor then
    /// waits passively for the channel to close.
    #[must_use]
    pub const fn with_max_actions(mut self, max: u32) -> Self {
        self.max_actions = Some(max);
        self
    }

    #[must_use]
    pub const fn grace(&self) -> Duration {
        self.grace
    }

    /// Run the supervisor on its own task.
    pub fn spawn<A>(self, action: A, cancel: CancelChannel) -> SupervisorHandle
    where
        A: CorrectiveAction + 'static,
    {
        let handle = tokio::spawn(async move { self.supervise(&action, &cancel).await });
        SupervisorHandle { handle }
    }

    /// Supervise until `cancel` closes or the corrective action fails.
    pub async fn supervise<A>(&self, action: &A, cancel: &CancelChannel) -> SupervisorReport
    where
        A: CorrectiveAction + ?Sized,
    {
        let mut actions_taken = 0_u32;
        debug!(
            resource = %self.resource,
            grace_ms = self.grace.as_millis(),
            "Supervisor started"
        );

        loop {
            if self.max_actions.is_some_and(|max| actions_taken >= max) {
                debug!(
                    resource = %self.resource,
                    actions_taken,
                    "Corrective action limit reached, waiting for reconciler"
                );
                cancel.recv().await;
                return self.report(actions_taken, SupervisorExit::Cancelled);
            }

            tokio::select! {
                biased;
                _ = cancel.recv() => {
                    return self.report(actions_taken, SupervisorExit::Cancelled);
                }
                () = sleep(self.grace) => {}
            }

            // The reconciler may have decided while the timer fired.
            if cancel.is_closed() {
                return self.report(actions_taken, SupervisorExit::Cancelled);
            }

            actions_taken = actions_taken.saturating_add(1);
            warn!(
                resource = %self.resource,
                attempt = actions_taken,
                "Resource still pending after grace period, applying corrective action"
            );

            if let Err(source) = action.apply().await {
                error!(
                    resource = %self.resource,
                    error = %source,
                    "Corrective action failed, aborting reconciliation"
                );
                if !cancel.fail(Error::corrective_action_failed(&self.resource, source)) {
                    debug!(resource = %self.resource, "Reconciler already finished");
                }
                return self.report(actions_taken, SupervisorExit::ActionFailed);
            }
        }
    }

    fn report(&self, actions_taken: u32, exit: SupervisorExit) -> SupervisorReport {
        info!(
            resource = %self.resource,
            actions_taken,
            exit = ?exit,
            "Supervisor stopped"
        );
        SupervisorReport {
            actions_taken,
            exit,
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    #![allow(clippy::panic)]

    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;
    use crate::cancel::CancelSignal;

    fn counting_action(calls: Arc<AtomicU32>) -> impl CorrectiveAction {
        action_fn(move || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Ok(()) }
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_closed_before_first_tick_takes_no_action() {
        let calls = Arc::new(AtomicU32::new(0));
        let cancel = CancelChannel::new();
        cancel.close();

        let report = CorrectiveActionSupervisor::new("vm-1", Duration::from_secs(60))
            .unwrap()
            .supervise(&counting_action(calls.clone()), &cancel)
            .await;

        assert_eq!(report.actions_taken, 0);
        assert_eq!(report.exit, SupervisorExit::Cancelled);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_acts_once_per_grace_period_until_closed() {
        let calls = Arc::new(AtomicU32::new(0));
        let cancel = CancelChannel::new();
        let handle = CorrectiveActionSupervisor::new("vm-2", Duration::from_secs(10))
            .unwrap()
            .spawn(counting_action(calls.clone()), cancel.clone());

        sleep(Duration::from_secs(25)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        cancel.close();
        let report = handle.join().await.unwrap();
        assert_eq!(report.actions_taken, 2);
        assert_eq!(report.exit, SupervisorExit::Cancelled);
    }

    #[tokio::test(start_paused = true)]
    async fn test_action_failure_is_sent_on_channel() {
        let cancel = CancelChannel::new();
        let action = action_fn(|| async { Err(TransportError::new("force stop rejected")) });

        let report = CorrectiveActionSupervisor::new("vm-3", Duration::from_secs(5))
            .unwrap()
            .supervise(&action, &cancel)
            .await;

        assert_eq!(report.exit, SupervisorExit::ActionFailed);
        assert_eq!(report.actions_taken, 1);
        match cancel.try_recv() {
            Some(CancelSignal::Failed(error)) => {
                assert!(error.is_corrective_action_failure());
                assert!(error.to_string().contains("force stop rejected"));
            }
            other => panic!("expected failed signal, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_max_actions_then_waits_for_close() {
        let calls = Arc::new(AtomicU32::new(0));
        let cancel = CancelChannel::new();
        let handle = CorrectiveActionSupervisor::new("vm-4", Duration::from_secs(1))
            .unwrap()
            .with_max_actions(2)
            .spawn(counting_action(calls.clone()), cancel.clone());

        sleep(Duration::from_secs(30)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(!handle.is_finished());

        cancel.close();
        let report = handle.join().await.unwrap();
        assert_eq!(report.actions_taken, 2);
    }

    #[test]
    fn test_from_settings() {
        let settings = SupervisorSettings {
            grace_secs: 600,
            max_actions: Some(3),
        };
        let supervisor = CorrectiveActionSupervisor::from_settings("vm-5", &settings).unwrap();
        assert_eq!(supervisor.grace(), Duration::from_secs(600));
        assert_eq!(supervisor.max_actions, Some(3));
    }

    #[test]
    fn test_zero_grace_rejected() {
        let error = CorrectiveActionSupervisor::new("vm-6", Duration::ZERO).unwrap_err();
        assert!(error.to_string().contains("grace period"));

        let settings = SupervisorSettings {
            grace_secs: 0,
            max_actions: None,
        };
        assert!(CorrectiveActionSupervisor::from_settings("vm-6", &settings).is_err());
    }
}
