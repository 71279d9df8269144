//! Core types, errors, and configuration for converge.
//!
//! Everything in here is shared by the reconciliation engine and the
//! `converge` binary: the single [`Error`] taxonomy surfaced to call sites,
//! the [`TransportError`] model for the external control-plane transport,
//! and the TOML-backed [`config::EngineConfig`].

#![forbid(unsafe_code)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

pub mod config;
pub mod error;
pub mod result;
pub mod transport;

pub use config::{EngineConfig, PollSettings, ProfileConfig, RetrySettings, SupervisorSettings};
pub use error::Error;
pub use result::{Result, ResultExt};
pub use transport::{NamedException, TransportError};
