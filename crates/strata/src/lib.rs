// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
#![cfg_attr(docsrs, feature(doc_cfg))]

//! Two-tier function-result caching with stampede prevention.
//!
//! `strata` puts a bounded in-process tier (L1) in front of a shared remote tier (L2) and
//! wraps both around an expensive producer function:
//!
//! - [`L1Cache`] keeps recently used values in memory with per-entry TTLs, LRU eviction
//!   under a byte budget, and stale-while-revalidate refresh tracking.
//! - [`CircuitBreaker`], [`BackpressureController`] and [`AdaptiveTimeout`] gate every
//!   remote-tier call so that a slow or failing store cannot take the application down.
//! - [`Orchestrator`] runs the get-or-compute protocol: L1, then L2, then a per-key
//!   distributed lock with a second check, and only then the producer. Concurrent misses
//!   for one key run the producer once.
//! - [`CachedFunction`] wraps an async function so each call is keyed by its arguments.
//! - [`BlockingOrchestrator`] offers the same operations to synchronous callers.
//!
//! The remote tier is any [`tier::Backend`]. Values cross the tiers as bytes through a
//! [`Serializer`]; [`JsonSerializer`] is the default.
//!
//! # Examples
//!
//! ```
//! # tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(async {
//! use std::time::Duration;
//!
//! use strata::tier::MemoryBackend;
//! use strata::{EntryOptions, Orchestrator, RequestContext};
//!
//! let cache = Orchestrator::<Vec<String>>::builder("user-roles")
//!     .backend(MemoryBackend::new())
//!     .default_ttl(Duration::from_secs(60))
//!     .build()?;
//!
//! let ctx = RequestContext::new().with_tenant("contoso");
//! let options = EntryOptions::new().with_namespace("roles");
//! let roles = cache
//!     .get_or_compute(&ctx, "roles:42", &options, || async {
//!         Ok::<_, std::io::Error>(vec!["admin".to_owned()])
//!     })
//!     .await?;
//! assert_eq!(roles, ["admin"]);
//!
//! let health = cache.get_health().await;
//! assert_eq!(health.status, strata::HealthStatus::Healthy);
//! # Ok::<(), strata::Error>(())
//! # }).unwrap();
//! ```
//!
//! # Failure Handling
//!
//! Remote-tier failures on the miss path are absorbed by default: the producer is called
//! directly and its result returned uncached ([`FailurePolicy::SafeMode`]). Choose
//! [`FailurePolicy::Propagate`] to surface them instead. Background refresh failures are
//! always absorbed and logged.
//!
//! # Logging
//!
//! Every tier interaction emits a `tracing` event named `cache.event` carrying
//! `cache.name`, `cache.operation`, `cache.activity`, `cache.duration_ns` and
//! `correlation_id` fields. Circuit breaker transitions and load-shedding rejections are
//! logged separately.

mod blocking;
mod config;
mod context;
mod error;
mod flight;
mod function;
mod health;
mod jitter;
mod key;
pub mod l1;
mod orchestrator;
mod registry;
pub mod reliability;
mod serializer;
mod stats;
mod telemetry;
#[cfg(test)]
mod testing;

#[doc(inline)]
pub use blocking::BlockingOrchestrator;
#[doc(inline)]
pub use config::{
    AdaptiveTimeoutConfig, BackpressureConfig, CircuitBreakerConfig, ConfigError, FailurePolicy, L1Config, OrchestratorConfig,
};
#[doc(inline)]
pub use context::RequestContext;
#[doc(inline)]
pub use error::{BoxError, Error, ErrorKind, OverloadReason, Result};
#[doc(inline)]
pub use function::CachedFunction;
#[doc(inline)]
pub use health::{HealthReport, HealthStatus};
#[doc(inline)]
pub use jitter::Jitter;
#[doc(inline)]
pub use key::{DefaultKeyGenerator, KeyGenerator, KeyOptions};
#[doc(inline)]
pub use l1::{CacheEntry, L1Cache, L1Stats, SwrHit};
#[doc(inline)]
pub use orchestrator::{EntryOptions, Orchestrator, OrchestratorBuilder};
#[doc(inline)]
pub use registry::ResourceRegistry;
#[doc(inline)]
pub use reliability::{AdaptiveTimeout, BackpressureController, BackpressurePermit, CircuitBreaker, CircuitPermit, CircuitState};
#[doc(inline)]
pub use serializer::{FnSerializer, JsonSerializer, SerializationError, SerializationMetadata, SerializedValue, Serializer};
#[doc(inline)]
pub use stats::CacheStats;
/// The remote-tier contract, re-exported from `strata_tier`.
pub use strata_tier as tier;
