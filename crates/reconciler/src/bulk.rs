//! Fan-out over independently provisioned siblings.
//!
//! Every unit gets its own reconciler on its own task. A failing unit does
//! not cancel its siblings; each one runs to its own terminal decision so
//! the remote side is never left mid-transition without an observer.

use std::sync::Arc;

use converge_core::{Error, Result};
use futures::StreamExt;
use futures::stream::FuturesUnordered;
use itertools::Itertools;
use tracing::{info, warn};

use crate::outcome::ReconciliationOutcome;
use crate::poller::PollingReconciler;
use crate::probe::StatusProbe;
use crate::spec::PollSpec;

/// One sibling: a probe bound to one resource and the spec to poll it with.
pub struct BulkUnit<T> {
    resource: String,
    probe: Arc<dyn StatusProbe<Object = T>>,
    spec: PollSpec,
}

impl<T: Clone + Send + Sync + 'static> BulkUnit<T> {
    pub fn new<P>(resource: impl Into<String>, probe: P, spec: PollSpec) -> Self
    where
        P: StatusProbe<Object = T> + 'static,
    {
        Self {
            resource: resource.into(),
            probe: Arc::new(probe),
            spec,
        }
    }

    #[must_use]
    pub fn resource(&self) -> &str {
        &self.resource
    }
}

/// Outcomes of a bulk run, in the order the units were given.
#[derive(Debug, Clone)]
pub struct BulkOutcome<T> {
    pub outcomes: Vec<ReconciliationOutcome<T>>,
    /// Unit indices in the order their reconciliations finished.
    pub completion_order: Vec<usize>,
}

impl<T> BulkOutcome<T> {
    /// Every unit converged.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.outcomes.iter().all(ReconciliationOutcome::is_success)
    }

    /// The first failure to finish, with its unit index.
    #[must_use]
    pub fn first_failure(&self) -> Option<(usize, &Error)> {
        self.completion_order.iter().find_map(|&index| {
            self.outcomes
                .get(index)
                .and_then(|outcome| outcome.error.as_ref())
                .map(|error| (index, error))
        })
    }

    /// All failures, in input order.
    pub fn failures(&self) -> impl Iterator<Item = (usize, &Error)> {
        self.outcomes
            .iter()
            .enumerate()
            .filter_map(|(index, outcome)| outcome.error.as_ref().map(|error| (index, error)))
    }

    /// The outcomes if every unit converged, otherwise the first failure.
    pub fn into_result(self) -> Result<Vec<ReconciliationOutcome<T>>> {
        let first = self.first_failure().map(|(_, error)| error.clone());
        match first {
            Some(error) => Err(error),
            None => Ok(self.outcomes),
        }
    }
}

/// Runs one reconciliation per unit concurrently.
#[derive(Debug, Clone, Copy, Default)]
pub struct BulkCoordinator;

impl BulkCoordinator {
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Reconcile every unit and wait for all of them.
    pub async fn run_all<T>(&self, units: Vec<BulkUnit<T>>) -> BulkOutcome<T>
    where
        T: Clone + Send + Sync + 'static,
    {
        let total = units.len();
        info!(units = total, "Starting bulk reconciliation");

        let mut outcomes: Vec<Option<ReconciliationOutcome<T>>> =
            std::iter::repeat_with(|| None).take(total).collect();
        let mut completion_order = Vec::with_capacity(total);

        let mut running: FuturesUnordered<_> = units
            .into_iter()
            .enumerate()
            .map(|(index, unit)| {
                let resource = unit.resource.clone();
                let handle = tokio::spawn(async move {
                    let reconciler = PollingReconciler::new(unit.resource, unit.spec);
                    reconciler.run(unit.probe.as_ref(), None).await
                });
                async move { (index, resource, handle.await) }
            })
            .collect();

        while let Some((index, resource, joined)) = running.next().await {
            let outcome = joined.unwrap_or_else(|e| {
                warn!(resource = %resource, error = %e, "Bulk unit task did not complete");
                ReconciliationOutcome::from_error(Error::task_failed(format!("{resource}: {e}")))
            });
            if let Some(error) = &outcome.error {
                warn!(resource = %resource, unit = index, error = %error, "Bulk unit failed");
            }
            completion_order.push(index);
            if let Some(slot) = outcomes.get_mut(index) {
                *slot = Some(outcome);
            }
        }

        let outcomes = outcomes
            .into_iter()
            .map(|outcome| {
                outcome.unwrap_or_else(|| {
                    ReconciliationOutcome::from_error(Error::task_failed("bulk unit never reported"))
                })
            })
            .collect_vec();

        let failed = outcomes.iter().filter(|o| !o.is_success()).count();
        info!(units = total, failed, "Bulk reconciliation finished");

        BulkOutcome {
            outcomes,
            completion_order,
        }
    }
}
