// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
#![cfg_attr(docsrs, feature(doc_cfg))]

//! Remote-tier abstractions for the `strata` multi-tier cache.
//!
//! This crate defines the [`Backend`] trait that every shared, remote store must satisfy,
//! along with the classified [`BackendError`] it reports, the [`LockLease`] returned by
//! its distributed lock, and the [`Clock`] used to measure expiry everywhere in the cache.
//!
//! # Overview
//!
//! The backend abstraction separates the wire-level client from the caching logic.
//! Implement [`Backend`] for your store, then hand it to `strata` to get an in-process
//! tier, stale-while-revalidate, circuit breaking, load shedding, adaptive timeouts and
//! stampede prevention on top.
//!
//! [`MemoryBackend`] is a complete in-process implementation, useful for tests and for
//! sharing one store between several caches inside one process.
//!
//! # Error Classification
//!
//! Every failure carries a [`BackendErrorKind`]. Transient faults, timeouts and unknown
//! errors say the store is unhealthy; permanent and authentication errors say the caller
//! is misconfigured. Consumers use the distinction to decide what counts against a
//! circuit breaker.
//!
//! # Testing
//!
//! Enable the `test-util` feature for [`testing::MockBackend`], which records every
//! operation and injects classified failures or latency on demand.

pub mod backend;
pub mod clock;
mod error;
mod memory;
#[cfg(any(feature = "test-util", test))]
pub mod testing;

#[doc(inline)]
pub use backend::{Backend, BackendHealth, LockLease, NoBackend};
#[doc(inline)]
pub use clock::{Clock, ClockControl};
#[doc(inline)]
pub use error::{BackendError, BackendErrorKind};
#[doc(inline)]
pub use memory::MemoryBackend;
