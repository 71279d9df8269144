//! Error taxonomy for reconciliation outcomes.
//!
//! Transient conditions (failed probes, unrecognized states, named mutation
//! conflicts) are absorbed inside the engine. Only the terminal
//! classification below ever reaches a call site.

use std::time::Duration;

use thiserror::Error;

use crate::transport::{NamedException, TransportError};

/// Terminal error surfaced by the engine.
///
/// `Clone` so that a supervisor can hand a fatal error to its paired
/// reconciler through the shared cancellation channel.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    #[error(
        "timeout exceeded after {timeout:?} waiting for '{resource}' (last state: {})",
        .last_state.as_deref().unwrap_or("unknown")
    )]
    Timeout {
        resource: String,
        timeout: Duration,
        last_state: Option<String>,
    },

    #[error("probe of '{resource}' failed on final attempt {attempts}: {source}")]
    ProbeFailed {
        resource: String,
        attempts: u32,
        source: TransportError,
    },

    #[error("'{resource}' reached permanent failure state '{state}': {reason}")]
    PermanentFailure {
        resource: String,
        state: String,
        reason: String,
    },

    #[error("'{resource}' was not found after {checks} consecutive checks")]
    ResourceGone { resource: String, checks: u32 },

    #[error("corrective action on '{resource}' failed: {source}")]
    CorrectiveActionFailed {
        resource: String,
        source: TransportError,
    },

    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("invalid poll spec: {reason}")]
    InvalidSpec { reason: String },

    #[error("configuration error: {reason}")]
    Config { reason: String },

    #[error("reconciliation task failed: {reason}")]
    TaskFailed { reason: String },
}

impl Error {
    /// Create a timeout error.
    pub fn timeout(
        resource: impl Into<String>,
        timeout: Duration,
        last_state: Option<String>,
    ) -> Self {
        Self::Timeout {
            resource: resource.into(),
            timeout,
            last_state,
        }
    }

    /// Create a final-probe transport error.
    pub fn probe_failed(resource: impl Into<String>, attempts: u32, source: TransportError) -> Self {
        Self::ProbeFailed {
            resource: resource.into(),
            attempts,
            source,
        }
    }

    /// Create a permanent failure error.
    pub fn permanent_failure(
        resource: impl Into<String>,
        state: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::PermanentFailure {
            resource: resource.into(),
            state: state.into(),
            reason: reason.into(),
        }
    }

    /// Create a resource gone error.
    pub fn resource_gone(resource: impl Into<String>, checks: u32) -> Self {
        Self::ResourceGone {
            resource: resource.into(),
            checks,
        }
    }

    /// Create a corrective action failure.
    pub fn corrective_action_failed(resource: impl Into<String>, source: TransportError) -> Self {
        Self::CorrectiveActionFailed {
            resource: resource.into(),
            source,
        }
    }

    /// Create an invalid spec error.
    pub fn invalid_spec(reason: impl Into<String>) -> Self {
        Self::InvalidSpec {
            reason: reason.into(),
        }
    }

    /// Create a configuration error.
    pub fn config(reason: impl Into<String>) -> Self {
        Self::Config {
            reason: reason.into(),
        }
    }

    /// Create a task failure error.
    pub fn task_failed(reason: impl Into<String>) -> Self {
        Self::TaskFailed {
            reason: reason.into(),
        }
    }

    /// Deadline expired without a terminal state.
    #[must_use]
    pub const fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. } | Self::ProbeFailed { .. })
    }

    /// The control plane reported a recognized terminal failure.
    #[must_use]
    pub const fn is_permanent(&self) -> bool {
        matches!(
            self,
            Self::PermanentFailure { .. } | Self::ResourceGone { .. }
        )
    }

    #[must_use]
    pub const fn is_corrective_action_failure(&self) -> bool {
        matches!(self, Self::CorrectiveActionFailed { .. })
    }

    #[must_use]
    pub const fn is_transport(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::ProbeFailed { .. })
    }

    /// The underlying transport error, if any.
    #[must_use]
    pub const fn transport_error(&self) -> Option<&TransportError> {
        match self {
            Self::Transport(e)
            | Self::ProbeFailed { source: e, .. }
            | Self::CorrectiveActionFailed { source: e, .. } => Some(e),
            _ => None,
        }
    }
}

impl NamedException for Error {
    fn exception_name(&self) -> Option<&str> {
        match self {
            Self::Transport(e) => e.exception_name(),
            _ => None,
        }
    }
}
