// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Classified errors raised by remote-tier backends.

use std::error::Error as StdError;
use std::fmt;
use std::sync::Arc;

/// Classification of a remote-tier failure.
///
/// The classification decides how the rest of the system reacts: transient faults,
/// timeouts and unknown errors indicate an unhealthy remote tier and count against a
/// circuit breaker, while permanent and authentication errors indicate a bug or a
/// misconfiguration and do not.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
#[non_exhaustive]
pub enum BackendErrorKind {
    /// A retryable network or connection fault.
    Transient,
    /// The operation did not complete in time.
    Timeout,
    /// The request was malformed or violated the protocol.
    Permanent,
    /// The backend rejected the credentials.
    Authentication,
    /// The failure could not be classified.
    Unknown,
}

impl BackendErrorKind {
    /// Returns `true` if this kind is treated as a remote-tier health failure by default.
    #[must_use]
    pub fn counts_as_failure(self) -> bool {
        matches!(self, Self::Transient | Self::Timeout | Self::Unknown)
    }

    /// Returns `true` if retrying the operation may succeed.
    #[must_use]
    pub fn is_retryable(self) -> bool {
        matches!(self, Self::Transient | Self::Timeout)
    }

    /// Returns a stable, lowercase name for logs.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Transient => "transient",
            Self::Timeout => "timeout",
            Self::Permanent => "permanent",
            Self::Authentication => "authentication",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for BackendErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An error from a remote-tier operation.
///
/// Cloning is cheap; the underlying cause is reference counted so the same error can be
/// handed to every caller that shared a coalesced operation.
///
/// # Examples
///
/// ```
/// use strata_tier::{BackendError, BackendErrorKind};
///
/// let error = BackendError::transient("connection reset");
/// assert_eq!(error.kind(), BackendErrorKind::Transient);
/// assert!(error.kind().counts_as_failure());
/// ```
#[derive(Debug, Clone, thiserror::Error)]
#[error("{kind} backend error: {message}")]
pub struct BackendError {
    kind: BackendErrorKind,
    message: String,
    #[source]
    source: Option<Arc<dyn StdError + Send + Sync>>,
}

impl BackendError {
    /// Creates an error of the given kind.
    pub fn new(kind: BackendErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            source: None,
        }
    }

    /// Creates an error of the given kind caused by another error.
    pub fn with_source(kind: BackendErrorKind, message: impl Into<String>, source: impl StdError + Send + Sync + 'static) -> Self {
        Self {
            kind,
            message: message.into(),
            source: Some(Arc::new(source)),
        }
    }

    /// Creates a [`BackendErrorKind::Transient`] error.
    pub fn transient(message: impl Into<String>) -> Self {
        Self::new(BackendErrorKind::Transient, message)
    }

    /// Creates a [`BackendErrorKind::Timeout`] error.
    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(BackendErrorKind::Timeout, message)
    }

    /// Creates a [`BackendErrorKind::Permanent`] error.
    pub fn permanent(message: impl Into<String>) -> Self {
        Self::new(BackendErrorKind::Permanent, message)
    }

    /// Creates a [`BackendErrorKind::Authentication`] error.
    pub fn authentication(message: impl Into<String>) -> Self {
        Self::new(BackendErrorKind::Authentication, message)
    }

    /// Creates a [`BackendErrorKind::Unknown`] error.
    pub fn unknown(message: impl Into<String>) -> Self {
        Self::new(BackendErrorKind::Unknown, message)
    }

    /// Returns the classification of this error.
    #[must_use]
    pub fn kind(&self) -> BackendErrorKind {
        self.kind
    }

    /// Returns the human-readable message.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    static_assertions::assert_impl_all!(BackendError: Send, Sync, Clone);

    #[test]
    fn default_failure_classification() {
        assert!(BackendErrorKind::Transient.counts_as_failure());
        assert!(BackendErrorKind::Timeout.counts_as_failure());
        assert!(BackendErrorKind::Unknown.counts_as_failure());
        assert!(!BackendErrorKind::Permanent.counts_as_failure());
        assert!(!BackendErrorKind::Authentication.counts_as_failure());
    }

    #[test]
    fn display_contains_kind_and_message() {
        let error = BackendError::permanent("bad command");
        let display = error.to_string();
        assert!(display.contains("permanent"), "got: {display}");
        assert!(display.contains("bad command"), "got: {display}");
    }

    #[test]
    fn source_is_preserved() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset by peer");
        let error = BackendError::with_source(BackendErrorKind::Transient, "read failed", io);

        let source = error.source().expect("source should be set");
        assert!(source.to_string().contains("reset by peer"));
        assert_eq!(error.message(), "read failed");
    }

    #[test]
    fn retryable_kinds() {
        assert!(BackendErrorKind::Transient.is_retryable());
        assert!(BackendErrorKind::Timeout.is_retryable());
        assert!(!BackendErrorKind::Authentication.is_retryable());
    }
}
