//! Polling reconciliation for eventually-consistent control planes.
//!
//! A provisioning call submits a mutation and then has to wait until the
//! remote resource settles. This crate is that wait:
//!
//! - [`StatusProbe`] - one read-only status check, classified into a
//!   [`ProbeResult`]
//! - [`PollingReconciler`] - probes until a target state, a failure state or
//!   the deadline
//! - [`CorrectiveActionSupervisor`] - nudges a stalled resource once per
//!   grace period, sharing a write-once [`CancelChannel`] with the reconciler
//! - [`mutate_with_retry`] - re-issues a write that lost a race with a
//!   named server-side conflict
//! - [`BulkCoordinator`] - runs sibling reconciliations concurrently
//!
//! # Example
//!
//! ```ignore
//! use std::time::Duration;
//! use converge_reconciler::{PollSpec, PollingReconciler, ProbeResult, probe_fn};
//!
//! let spec = PollSpec::builder()
//!     .pending(["provisioning"])
//!     .target(["available"])
//!     .failed(["failed"])
//!     .timeout(Duration::from_secs(1800))
//!     .build()?;
//!
//! let probe = probe_fn(|| async {
//!     match client.describe("db-1").await {
//!         Ok(db) => ProbeResult::observed(db.clone(), db.status.as_str()),
//!         Err(e) if e.is_not_found() => ProbeResult::Absent,
//!         Err(e) => ProbeResult::transient(e),
//!     }
//! });
//!
//! let outcome = PollingReconciler::new("db-1", spec).run(&probe, None).await;
//! let db = outcome.into_result()?.object;
//! ```

#![forbid(unsafe_code)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

pub mod bulk;
pub mod cancel;
pub mod mutator;
pub mod outcome;
pub mod poller;
pub mod probe;
pub mod reconciliation;
pub mod spec;
pub mod state;
pub mod supervisor;
pub mod testing;
pub mod vocabulary;

// Re-export main types
pub use bulk::{BulkCoordinator, BulkOutcome, BulkUnit};
pub use cancel::{CancelChannel, CancelSignal, CloseOnDrop};
pub use converge_core::{Error, Result};
pub use mutator::{RetrySpec, mutate_with_deadline, mutate_with_retry};
pub use outcome::ReconciliationOutcome;
pub use poller::PollingReconciler;
pub use probe::{FnProbe, ProbeResult, StatusProbe, probe_fn};
pub use reconciliation::Reconciliation;
pub use spec::{PollSpec, PollSpecBuilder};
pub use state::{State, StateSet};
pub use supervisor::{
    CorrectiveAction, CorrectiveActionSupervisor, FnAction, SupervisorExit, SupervisorHandle,
    SupervisorReport, action_fn,
};
pub use vocabulary::{AbsencePolicy, StatusVocabulary, VocabularyProbe};
