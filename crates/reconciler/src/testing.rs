//! Deterministic probes for tests and simulations.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;
use converge_core::TransportError;
use tokio::sync::Mutex;

use crate::probe::{ProbeResult, StatusProbe};

/// Replays a fixed sequence of probe results, repeating the last one once
/// the script runs out.
#[derive(Debug)]
pub struct ScriptedProbe<T> {
    script: Mutex<VecDeque<ProbeResult<T>>>,
    calls: AtomicU32,
}

impl<T> ScriptedProbe<T> {
    pub fn new(script: impl IntoIterator<Item = ProbeResult<T>>) -> Self {
        Self {
            script: Mutex::new(script.into_iter().collect()),
            calls: AtomicU32::new(0),
        }
    }

    /// Script of observed states, each paired with a clone of `object`.
    pub fn states<'a>(object: &T, states: impl IntoIterator<Item = &'a str>) -> Self
    where
        T: Clone,
    {
        Self::new(
            states
                .into_iter()
                .map(|state| ProbeResult::observed(object.clone(), state)),
        )
    }

    /// Number of probes served so far.
    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl<T: Clone + Send + Sync + 'static> StatusProbe for ScriptedProbe<T> {
    type Object = T;

    async fn probe(&self) -> ProbeResult<T> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut script = self.script.lock().await;
        if script.len() > 1 {
            if let Some(next) = script.pop_front() {
                return next;
            }
        }
        script
            .front()
            .cloned()
            .unwrap_or_else(|| ProbeResult::Transient(TransportError::new("empty probe script")))
    }
}
