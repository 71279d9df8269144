//! The status probe contract.
//!
//! A probe is one read-only status check of a remote resource. Probes must
//! be idempotent and side-effect-free; the reconciler may call them any
//! number of times, strictly sequentially.

use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;
use converge_core::TransportError;

use crate::state::State;

static ABSENT: State = State::Absent;

/// The classified result of a single probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeResult<T> {
    /// The control plane answered with a status.
    Observed { object: T, state: State },
    /// The resource does not exist.
    Absent,
    /// The probe could not reach the control plane, or got an ambiguous
    /// answer. Retried until the deadline.
    Transient(TransportError),
    /// The probe itself classified the resource as permanently failed.
    /// Aborts the reconciliation immediately.
    Failed {
        object: Option<T>,
        state: State,
        reason: String,
    },
}

impl<T> ProbeResult<T> {
    /// An observed status.
    pub fn observed(object: T, state: impl Into<State>) -> Self {
        Self::Observed {
            object,
            state: state.into(),
        }
    }

    /// A transient probe error.
    pub fn transient(error: impl Into<TransportError>) -> Self {
        Self::Transient(error.into())
    }

    /// A permanent failure with a provider-reported reason.
    pub fn failed(object: Option<T>, state: impl Into<State>, reason: impl Into<String>) -> Self {
        Self::Failed {
            object,
            state: state.into(),
            reason: reason.into(),
        }
    }

    /// The state carried by this result, if any.
    #[must_use]
    pub fn state(&self) -> Option<&State> {
        match self {
            Self::Observed { state, .. } | Self::Failed { state, .. } => Some(state),
            Self::Absent => Some(&ABSENT),
            Self::Transient(_) => None,
        }
    }

    /// The object carried by this result, if any.
    #[must_use]
    pub const fn object(&self) -> Option<&T> {
        match self {
            Self::Observed { object, .. } => Some(object),
            Self::Failed { object, .. } => object.as_ref(),
            Self::Absent | Self::Transient(_) => None,
        }
    }

    #[must_use]
    pub const fn is_error(&self) -> bool {
        matches!(self, Self::Transient(_) | Self::Failed { .. })
    }
}

/// Queries and classifies the current state of one remote resource.
#[async_trait]
pub trait StatusProbe: Send + Sync {
    /// The provider object returned alongside the status.
    type Object: Clone + Send + Sync + 'static;

    /// Perform one status check.
    async fn probe(&self) -> ProbeResult<Self::Object>;
}

#[async_trait]
impl<P: StatusProbe + ?Sized> StatusProbe for Arc<P> {
    type Object = P::Object;

    async fn probe(&self) -> ProbeResult<Self::Object> {
        (**self).probe().await
    }
}

#[async_trait]
impl<P: StatusProbe + ?Sized> StatusProbe for Box<P> {
    type Object = P::Object;

    async fn probe(&self) -> ProbeResult<Self::Object> {
        (**self).probe().await
    }
}

/// A probe backed by an async closure.
pub struct FnProbe<F, T> {
    f: F,
    _object: PhantomData<fn() -> T>,
}

/// Wrap an async closure as a [`StatusProbe`].
pub const fn probe_fn<F, Fut, T>(f: F) -> FnProbe<F, T>
where
    F: Fn() -> Fut + Send + Sync,
    Fut: Future<Output = ProbeResult<T>> + Send,
    T: Clone + Send + Sync + 'static,
{
    FnProbe {
        f,
        _object: PhantomData,
    }
}

#[async_trait]
impl<F, Fut, T> StatusProbe for FnProbe<F, T>
where
    F: Fn() -> Fut + Send + Sync,
    Fut: Future<Output = ProbeResult<T>> + Send,
    T: Clone + Send + Sync + 'static,
{
    type Object = T;

    async fn probe(&self) -> ProbeResult<T> {
        (self.f)().await
    }
}
