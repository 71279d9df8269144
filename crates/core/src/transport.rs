//! Failure model for the external control-plane transport.
//!
//! The engine never talks to a provider itself. Call sites hand it probes
//! and mutating closures that fail with a [`TransportError`] (or any error
//! type implementing [`NamedException`]).

use std::fmt;

use serde::{Deserialize, Serialize};

/// Exception names a provider uses for "resource does not exist".
const NOT_FOUND_EXCEPTIONS: [&str; 3] = ["NotFound", "ResourceNotFound", "ObjectNotFound"];

/// An error reported by the request/response transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransportError {
    /// Named server-side exception, e.g. `ConcurrentModification`.
    pub exception: Option<String>,
    /// HTTP-equivalent status code, if the transport has one.
    pub status: Option<u16>,
    /// Human readable message.
    pub message: String,
}

impl TransportError {
    /// Create an unclassified transport error.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            exception: None,
            status: None,
            message: message.into(),
        }
    }

    /// Create a 404-equivalent error.
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(message).with_status(404)
    }

    /// Create an error carrying a named server-side exception.
    pub fn exception(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(message).with_exception(name)
    }

    /// Attach a named exception.
    #[must_use]
    pub fn with_exception(mut self, name: impl Into<String>) -> Self {
        self.exception = Some(name.into());
        self
    }

    /// Attach a status code.
    #[must_use]
    pub const fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    /// Whether the transport reported that the resource no longer exists.
    pub fn is_not_found(&self) -> bool {
        self.status == Some(404)
            || self
                .exception
                .as_deref()
                .is_some_and(|name| NOT_FOUND_EXCEPTIONS.contains(&name))
    }
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.status, self.exception.as_deref()) {
            (Some(status), Some(name)) => write!(f, "[{status} {name}] {}", self.message),
            (Some(status), None) => write!(f, "[{status}] {}", self.message),
            (None, Some(name)) => write!(f, "[{name}] {}", self.message),
            (None, None) => write!(f, "{}", self.message),
        }
    }
}

impl std::error::Error for TransportError {}

/// Errors that can be classified by a named server-side exception.
///
/// `mutate_with_retry` compares the name against the configured transient
/// exception; errors without a name are never retried.
pub trait NamedException {
    /// The exception identifier, if the error carries one.
    fn exception_name(&self) -> Option<&str>;
}

impl NamedException for TransportError {
    fn exception_name(&self) -> Option<&str> {
        self.exception.as_deref()
    }
}
