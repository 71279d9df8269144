//! Status probes built from a raw query function and a status vocabulary.
//!
//! Most resource types expose one read call returning the provider object
//! and a status string. [`VocabularyProbe`] turns such a call into a
//! [`StatusProbe`]: the raw string is matched case-insensitively against the
//! registered tokens, a not-found transport error becomes the absent
//! sentinel, and every other transport error is transient.

use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::marker::PhantomData;

use async_trait::async_trait;
use converge_core::{ProfileConfig, TransportError};

use crate::probe::{ProbeResult, StatusProbe};
use crate::spec::PollSpec;
use crate::state::{State, StateSet};

/// What a not-found read means for this resource type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AbsencePolicy {
    /// Report [`State::Absent`] and let the spec decide.
    #[default]
    Sentinel,
    /// The resource disappearing is a permanent failure.
    Fatal,
}

/// Known status tokens for one resource type.
#[derive(Debug, Clone, Default)]
pub struct StatusVocabulary {
    known: BTreeMap<String, State>,
    failed: StateSet,
    absence: AbsencePolicy,
}

impl StatusVocabulary {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Vocabulary covering every token a spec mentions, with the spec's
    /// failed set as the failure tokens.
    #[must_use]
    pub fn for_spec(spec: &PollSpec) -> Self {
        let vocabulary = Self::new()
            .states(spec.pending().iter().cloned())
            .states(spec.target().iter().cloned());
        vocabulary.failed(spec.failed().iter().cloned())
    }

    /// Vocabulary from a configuration profile.
    #[must_use]
    pub fn from_profile(profile: &ProfileConfig) -> Self {
        Self::new()
            .states(profile.pending.iter().map(String::as_str))
            .states(profile.target.iter().map(String::as_str))
            .failed(profile.failed.iter().map(String::as_str))
    }

    /// Register tokens. Raw statuses matching one of them ignoring case map
    /// to the registered spelling.
    #[must_use]
    pub fn states<S: Into<State>>(mut self, states: impl IntoIterator<Item = S>) -> Self {
        for state in states.into_iter().map(Into::into) {
            if let State::Observed(token) = &state {
                self.known.insert(token.to_lowercase(), state.clone());
            }
        }
        self
    }

    /// Register tokens that mean the resource has permanently failed.
    #[must_use]
    pub fn failed<S: Into<State>>(mut self, states: impl IntoIterator<Item = S>) -> Self {
        let states: Vec<State> = states.into_iter().map(Into::into).collect();
        self = self.states(states.iter().cloned());
        for state in states {
            self.failed = std::mem::take(&mut self.failed).with(state);
        }
        self
    }

    /// Map an additional raw spelling onto a registered state.
    #[must_use]
    pub fn alias(mut self, raw: &str, state: impl Into<State>) -> Self {
        self.known.insert(raw.trim().to_lowercase(), state.into());
        self
    }

    #[must_use]
    pub const fn absence(mut self, policy: AbsencePolicy) -> Self {
        self.absence = policy;
        self
    }

    #[must_use]
    pub const fn absence_policy(&self) -> AbsencePolicy {
        self.absence
    }

    /// Classify a raw provider status. Unknown statuses pass through
    /// trimmed and otherwise unchanged.
    #[must_use]
    pub fn classify(&self, raw: &str) -> State {
        let raw = raw.trim();
        self.known
            .get(&raw.to_lowercase())
            .cloned()
            .unwrap_or_else(|| State::new(raw))
    }

    #[must_use]
    pub fn is_failed(&self, state: &State) -> bool {
        self.failed.contains(state)
    }
}

type ReasonFn<T> = Box<dyn Fn(&T) -> Option<String> + Send + Sync>;

/// A [`StatusProbe`] over a query returning `(object, raw_status)`.
pub struct VocabularyProbe<F, T> {
    query: F,
    vocabulary: StatusVocabulary,
    reason: Option<ReasonFn<T>>,
    _object: PhantomData<fn() -> T>,
}

impl<F, Fut, T> VocabularyProbe<F, T>
where
    F: Fn() -> Fut + Send + Sync,
    Fut: Future<Output = Result<(T, String), TransportError>> + Send,
    T: Clone + Send + Sync + 'static,
{
    pub const fn new(query: F, vocabulary: StatusVocabulary) -> Self {
        Self {
            query,
            vocabulary,
            reason: None,
            _object: PhantomData,
        }
    }

    /// Pull a provider-reported failure reason out of the object.
    #[must_use]
    pub fn with_reason<R>(mut self, reason: R) -> Self
    where
        R: Fn(&T) -> Option<String> + Send + Sync + 'static,
    {
        self.reason = Some(Box::new(reason));
        self
    }

    #[must_use]
    pub const fn vocabulary(&self) -> &StatusVocabulary {
        &self.vocabulary
    }

    fn failure_reason(&self, object: &T, state: &State) -> String {
        self.reason
            .as_ref()
            .and_then(|reason| reason(object))
            .unwrap_or_else(|| format!("resource entered state '{state}'"))
    }
}

impl<F, T> fmt::Debug for VocabularyProbe<F, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VocabularyProbe")
            .field("vocabulary", &self.vocabulary)
            .field("reason", &self.reason.is_some())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl<F, Fut, T> StatusProbe for VocabularyProbe<F, T>
where
    F: Fn() -> Fut + Send + Sync,
    Fut: Future<Output = Result<(T, String), TransportError>> + Send,
    T: Clone + Send + Sync + 'static,
{
    type Object = T;

    async fn probe(&self) -> ProbeResult<T> {
        match (self.query)().await {
            Ok((object, raw)) => {
                let state = self.vocabulary.classify(&raw);
                if self.vocabulary.is_failed(&state) {
                    let reason = self.failure_reason(&object, &state);
                    ProbeResult::failed(Some(object), state, reason)
                } else {
                    ProbeResult::observed(object, state)
                }
            }
            Err(error) if error.is_not_found() => match self.vocabulary.absence {
                AbsencePolicy::Sentinel => ProbeResult::Absent,
                AbsencePolicy::Fatal => ProbeResult::failed(None, State::Absent, error.message),
            },
            Err(error) => ProbeResult::Transient(error),
        }
    }
}
