//! End-to-end reconciliation scenarios on virtual time.

#![allow(clippy::unwrap_used)]
#![allow(clippy::panic)]

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use converge_core::{SupervisorSettings, TransportError};
use converge_reconciler::testing::ScriptedProbe;
use converge_reconciler::{
    BulkCoordinator, BulkUnit, CancelChannel, CorrectiveActionSupervisor, Error, PollSpec,
    PollingReconciler, ProbeResult, Reconciliation, State, action_fn, probe_fn,
};
use tokio::time::Instant;

fn spec(timeout: Duration, interval: Duration) -> PollSpec {
    match PollSpec::builder()
        .pending(["provisioning"])
        .target(["available"])
        .failed(["failed"])
        .timeout(timeout)
        .initial_delay(Duration::ZERO)
        .poll_interval(interval)
        .build()
    {
        Ok(spec) => spec,
        Err(e) => panic!("spec should be valid: {e}"),
    }
}

#[tokio::test(start_paused = true)]
async fn test_provisioning_sequence_converges_on_third_probe() {
    // GIVEN: A database that reports provisioning twice, then available
    let spec = PollSpec::builder()
        .pending(["provisioning"])
        .target(["available", "failed"])
        .timeout(Duration::from_secs(30))
        .initial_delay(Duration::ZERO)
        .poll_interval(Duration::from_secs(5))
        .build()
        .unwrap();
    let probe = ScriptedProbe::states(&"db-1", ["provisioning", "provisioning", "available"]);

    // WHEN: The reconciler runs
    let start = Instant::now();
    let outcome = PollingReconciler::new("db-1", spec).run(&probe, None).await;

    // THEN: It succeeds after exactly three probes, two intervals in
    assert!(outcome.is_success());
    assert_eq!(outcome.state_str(), "available");
    assert_eq!(outcome.object, Some("db-1"));
    assert_eq!(probe.calls(), 3);
    assert_eq!(start.elapsed(), Duration::from_secs(10));
}

#[tokio::test(start_paused = true)]
async fn test_delete_confirmation_succeeds_on_absence() {
    // GIVEN: A deleted resource that is gone on the first read
    let spec = PollSpec::builder()
        .pending(["deleting"])
        .target_absent()
        .timeout(Duration::from_secs(60))
        .initial_delay(Duration::ZERO)
        .build()
        .unwrap();
    let probe = ScriptedProbe::<()>::new([ProbeResult::Absent]);

    // WHEN: Waiting for deletion
    let outcome = PollingReconciler::new("bucket-7", spec).run(&probe, None).await;

    // THEN: Absence is success even though nothing was ever pending
    assert!(outcome.is_success());
    assert_eq!(outcome.state, Some(State::Absent));
    assert_eq!(outcome.polls, 1);
}

#[tokio::test(start_paused = true)]
async fn test_never_terminal_times_out_within_one_interval() {
    // GIVEN: A resource stuck in provisioning
    let timeout = Duration::from_secs(20);
    let interval = Duration::from_secs(3);
    let probe = ScriptedProbe::states(&(), ["provisioning"]);

    // WHEN: The reconciler runs to its deadline
    let start = Instant::now();
    let outcome = PollingReconciler::new("cluster-1", spec(timeout, interval))
        .run(&probe, None)
        .await;

    // THEN: A timeout, distinguishable from a permanent failure
    let error = outcome.error.clone().unwrap();
    assert!(matches!(error, Error::Timeout { .. }));
    assert!(!error.is_permanent());
    assert!(start.elapsed() <= timeout + interval);
    assert_eq!(outcome.state_str(), "provisioning");
}

#[tokio::test(start_paused = true)]
async fn test_failure_on_nth_probe_aborts_exactly_there() {
    // GIVEN: A probe that fails permanently on its fourth call
    let probe = ScriptedProbe::new([
        ProbeResult::observed((), "provisioning"),
        ProbeResult::transient(TransportError::new("connection reset")),
        ProbeResult::observed((), "provisioning"),
        ProbeResult::observed((), "failed"),
        ProbeResult::observed((), "available"),
    ]);

    // WHEN: The reconciler runs
    let outcome = PollingReconciler::new("db-2", spec(Duration::from_secs(300), Duration::from_secs(1)))
        .run(&probe, None)
        .await;

    // THEN: It stops at call four
    assert_eq!(probe.calls(), 4);
    assert!(outcome.error.unwrap().is_permanent());
}

#[tokio::test(start_paused = true)]
async fn test_supervisor_acts_then_stops_when_reconciler_converges() {
    // GIVEN: A reconciler reaching target at tick 6 and a 2s grace period
    let probe = ScriptedProbe::states(
        &(),
        ["provisioning", "provisioning", "provisioning", "provisioning", "provisioning", "available"],
    );
    let actions = Arc::new(AtomicU32::new(0));
    let cancel = CancelChannel::new();
    let supervisor = {
        let actions = actions.clone();
        CorrectiveActionSupervisor::new("vm-9", Duration::from_secs(2)).unwrap().spawn(
            action_fn(move || {
                actions.fetch_add(1, Ordering::SeqCst);
                async { Ok(()) }
            }),
            cancel.clone(),
        )
    };

    // WHEN: The reconciler runs with the shared channel
    let outcome = PollingReconciler::new("vm-9", spec(Duration::from_secs(60), Duration::from_secs(1)))
        .run(&probe, Some(&cancel))
        .await;

    // THEN: The action ran at least once and the supervisor task ended
    assert!(outcome.is_success());
    let report = supervisor.join().await.unwrap();
    assert!(report.actions_taken >= 1);
    assert_eq!(report.actions_taken, actions.load(Ordering::SeqCst));
}

#[tokio::test(start_paused = true)]
async fn test_builder_surfaces_corrective_action_failure() {
    // GIVEN: A stuck resource whose forced restart is rejected
    let probe = ScriptedProbe::states(&(), ["provisioning"]);
    let settings = SupervisorSettings {
        grace_secs: 45,
        max_actions: None,
    };

    // WHEN: Reconciling with the corrective action attached
    let outcome = Reconciliation::new("vm-10", probe, spec(Duration::from_secs(600), Duration::from_secs(10)))
        .with_corrective_action(
            action_fn(|| async { Err(TransportError::exception("IncorrectInstanceState", "busy")) }),
            settings,
        )
        .unwrap()
        .run()
        .await;

    // THEN: The wrapped error comes back, long before the deadline
    let error = outcome.error.unwrap();
    assert!(error.is_corrective_action_failure());
    assert!(error.to_string().contains("busy"));
    assert_eq!(outcome.elapsed, Duration::from_secs(45));
}

#[tokio::test(start_paused = true)]
async fn test_bulk_reports_failed_member_in_place() {
    // GIVEN: Four cluster members where member 2 fails
    let interval = Duration::from_secs(2);
    let units = (0..4)
        .map(|i| {
            let script = if i == 2 {
                vec!["provisioning", "failed"]
            } else {
                vec!["provisioning"; i + 1].into_iter().chain(["available"]).collect()
            };
            BulkUnit::new(
                format!("member-{i}"),
                ScriptedProbe::states(&i, script),
                spec(Duration::from_secs(120), interval),
            )
        })
        .collect();

    // WHEN: All members are reconciled together
    let bulk = BulkCoordinator::new().run_all(units).await;

    // THEN: Four outcomes in input order, only member 2 failed
    assert_eq!(bulk.outcomes.len(), 4);
    for (i, outcome) in bulk.outcomes.iter().enumerate() {
        assert_eq!(outcome.object, Some(i));
        assert_eq!(outcome.is_success(), i != 2, "member {i}");
    }
    let (index, error) = bulk.first_failure().unwrap();
    assert_eq!(index, 2);
    assert!(error.is_permanent());
    assert_eq!(bulk.completion_order.len(), 4);
}

#[tokio::test(start_paused = true)]
async fn test_transient_errors_are_absorbed() {
    // GIVEN: A flaky transport that recovers
    let calls = Arc::new(AtomicU32::new(0));
    let probe = {
        let calls = calls.clone();
        probe_fn(move || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 3 {
                    ProbeResult::transient(TransportError::new("503 service unavailable").with_status(503))
                } else {
                    ProbeResult::observed((), "available")
                }
            }
        })
    };

    // WHEN: Reconciling
    let outcome = PollingReconciler::new("lb-2", spec(Duration::from_secs(60), Duration::from_secs(1)))
        .run(&probe, None)
        .await;

    // THEN: None of the transient errors reach the caller
    assert!(outcome.is_success());
    assert_eq!(outcome.polls, 4);
}
