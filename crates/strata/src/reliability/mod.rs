// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Protection for calls to the remote tier.
//!
//! Each primitive is independent and can be shared between caches through a
//! [`ResourceRegistry`](crate::ResourceRegistry).

mod adaptive_timeout;
mod backpressure;
mod circuit_breaker;

pub use adaptive_timeout::AdaptiveTimeout;
pub use backpressure::{BackpressureController, BackpressurePermit};
pub use circuit_breaker::{CircuitBreaker, CircuitPermit, CircuitState};
