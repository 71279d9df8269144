#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

//! # converge
//!
//! Waits for resources on eventually-consistent control planes to settle.
//!
//! This library re-exports the workspace crates for convenience and hosts
//! the command-line surface of the `converge` binary.

// Re-export all crates
pub use converge_core;
pub use converge_reconciler;

pub mod cli;
pub mod simulate;
