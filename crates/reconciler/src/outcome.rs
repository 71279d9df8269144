//! Terminal result of one reconciliation.

use std::time::Duration;

use converge_core::{Error, Result};

use crate::state::State;

/// Exactly one of these is produced per reconciler run.
#[derive(Debug, Clone)]
pub struct ReconciliationOutcome<T> {
    /// The last object a probe returned.
    pub object: Option<T>,
    /// The last state a probe returned.
    pub state: Option<State>,
    /// `None` on convergence.
    pub error: Option<Error>,
    /// Number of probes performed.
    pub polls: u32,
    /// Wall-clock time from entry to decision.
    pub elapsed: Duration,
}

impl<T> ReconciliationOutcome<T> {
    /// A converged outcome.
    pub const fn converged(
        object: Option<T>,
        state: Option<State>,
        polls: u32,
        elapsed: Duration,
    ) -> Self {
        Self {
            object,
            state,
            error: None,
            polls,
            elapsed,
        }
    }

    /// An outcome that carries only an error, for runs that never probed.
    pub const fn from_error(error: Error) -> Self {
        Self {
            object: None,
            state: None,
            error: Some(error),
            polls: 0,
            elapsed: Duration::ZERO,
        }
    }

    /// Attach an error to this outcome.
    #[must_use]
    pub fn with_error(mut self, error: Error) -> Self {
        self.error = Some(error);
        self
    }

    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.error.is_none()
    }

    /// Final state as a string, `"unknown"` if nothing was observed.
    #[must_use]
    pub fn state_str(&self) -> &str {
        self.state.as_ref().map_or("unknown", State::as_str)
    }

    /// `Ok(self)` on convergence, the terminal error otherwise.
    pub fn into_result(self) -> Result<Self> {
        match self.error {
            Some(error) => Err(error),
            None => Ok(self),
        }
    }
}
