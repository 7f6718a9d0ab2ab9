// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Error types for cache operations.

use std::error::Error as StdError;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use strata_tier::{BackendError, BackendErrorKind};

use crate::config::ConfigError;
use crate::serializer::SerializationError;

/// A boxed error returned by a producer function.
pub type BoxError = Box<dyn StdError + Send + Sync + 'static>;

/// A specialized [`Result`](std::result::Result) for cache operations.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Errors surfaced by the cache.
///
/// The error is cheap to clone so that a single failure can be handed to every caller
/// that was waiting on the same in-flight computation.
#[derive(Debug, Clone, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// The circuit breaker protecting the remote tier rejected the call.
    #[error("circuit breaker for '{resource}' is open")]
    CircuitOpen {
        /// The protected resource.
        resource: String,
    },

    /// Admission control rejected the call.
    ///
    /// Overload rejections never count against the circuit breaker.
    #[error("'{resource}' is overloaded: {reason}")]
    Overloaded {
        /// The protected resource.
        resource: String,
        /// Why the call was not admitted.
        reason: OverloadReason,
    },

    /// A remote-tier call did not finish within its timeout budget.
    #[error("remote tier call exceeded its {budget:?} budget")]
    Timeout {
        /// The budget that was exceeded.
        budget: Duration,
    },

    /// The remote tier reported a failure.
    #[error(transparent)]
    Backend(#[from] BackendError),

    /// A value could not be encoded or decoded.
    #[error(transparent)]
    Serialization(#[from] SerializationError),

    /// The producer function failed.
    #[error("producer failed: {0}")]
    Producer(#[source] Arc<dyn StdError + Send + Sync>),

    /// The cache was configured with invalid settings.
    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl Error {
    /// Wraps an error returned by a producer function.
    pub fn producer(error: impl Into<BoxError>) -> Self {
        Self::Producer(Arc::from(error.into()))
    }

    /// Returns a flat classification of this error.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::CircuitOpen { .. } => ErrorKind::CircuitOpen,
            Self::Overloaded { .. } => ErrorKind::Overloaded,
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::Backend(error) => ErrorKind::Backend(error.kind()),
            Self::Serialization(_) => ErrorKind::Serialization,
            Self::Producer(_) => ErrorKind::Producer,
            Self::Config(_) => ErrorKind::Config,
        }
    }

    /// Returns `true` if the error came from the remote tier or the controls gating it.
    ///
    /// These are the failures the safe-mode policy can absorb by calling the producer
    /// directly.
    #[must_use]
    pub fn is_remote(&self) -> bool {
        matches!(
            self,
            Self::CircuitOpen { .. } | Self::Overloaded { .. } | Self::Timeout { .. } | Self::Backend(_)
        )
    }

    /// Returns the backend classification a circuit breaker should see for this error.
    ///
    /// Timeouts are reported as [`BackendErrorKind::Timeout`]. Errors that never reached
    /// the remote tier return `None`.
    #[must_use]
    pub fn backend_kind(&self) -> Option<BackendErrorKind> {
        match self {
            Self::Backend(error) => Some(error.kind()),
            Self::Timeout { .. } => Some(BackendErrorKind::Timeout),
            _ => None,
        }
    }
}

/// Flat, copyable classification of an [`Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum ErrorKind {
    /// See [`Error::CircuitOpen`].
    CircuitOpen,
    /// See [`Error::Overloaded`].
    Overloaded,
    /// See [`Error::Timeout`].
    Timeout,
    /// See [`Error::Backend`].
    Backend(BackendErrorKind),
    /// See [`Error::Serialization`].
    Serialization,
    /// See [`Error::Producer`].
    Producer,
    /// See [`Error::Config`].
    Config,
}

impl ErrorKind {
    /// Returns a stable name for logs.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::CircuitOpen => "circuit_open",
            Self::Overloaded => "overloaded",
            Self::Timeout => "timeout",
            Self::Backend(kind) => kind.as_str(),
            Self::Serialization => "serialization",
            Self::Producer => "producer",
            Self::Config => "config",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why admission control rejected a call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum OverloadReason {
    /// The controller admits no calls at all.
    NoCapacity,
    /// Every permit was taken and the wait queue was full.
    QueueFull,
    /// No permit became free within the admission timeout.
    WaitTimeout,
}

impl fmt::Display for OverloadReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::NoCapacity => "no capacity configured",
            Self::QueueFull => "wait queue is full",
            Self::WaitTimeout => "timed out waiting for a permit",
        })
    }
}
