// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::fmt;
use std::io;

use strata_tier::{Backend, NoBackend};
use tokio::runtime::{Builder, Runtime};

use crate::context::RequestContext;
use crate::error::{BoxError, Result};
use crate::health::HealthReport;
use crate::orchestrator::{EntryOptions, Orchestrator};
use crate::serializer::{JsonSerializer, Serializer};

/// Synchronous access to an [`Orchestrator`].
///
/// Owns a small Tokio runtime that drives remote-tier calls and background refreshes.
/// The state machines are the ones of the wrapped orchestrator, so async and blocking
/// callers can share one cache through [`orchestrator`](Self::orchestrator).
///
/// Methods block the calling thread and must not be called from within an async context.
///
/// # Examples
///
/// ```
/// use strata::{BlockingOrchestrator, EntryOptions, Orchestrator, RequestContext};
///
/// let cache = BlockingOrchestrator::new(Orchestrator::<u32>::builder("sync").build().unwrap()).unwrap();
/// let ctx = RequestContext::new();
/// let value = cache.get_or_compute(&ctx, "answer", &EntryOptions::new(), || Ok::<_, std::io::Error>(42)).unwrap();
/// assert_eq!(value, 42);
/// ```
pub struct BlockingOrchestrator<V, B = NoBackend, S = JsonSerializer> {
    runtime: Runtime,
    orchestrator: Orchestrator<V, B, S>,
}

impl<V, B, S> fmt::Debug for BlockingOrchestrator<V, B, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlockingOrchestrator")
            .field("orchestrator", &self.orchestrator)
            .finish_non_exhaustive()
    }
}

impl<V, B, S> BlockingOrchestrator<V, B, S>
where
    V: Clone + Send + Sync + 'static,
    B: Backend,
    S: Serializer<V>,
{
    /// Wraps `orchestrator`, starting a one-worker runtime for it.
    ///
    /// # Errors
    ///
    /// Returns an error if the runtime cannot be started.
    pub fn new(orchestrator: Orchestrator<V, B, S>) -> io::Result<Self> {
        let runtime = Builder::new_multi_thread()
            .worker_threads(1)
            .thread_name("strata-blocking")
            .enable_all()
            .build()?;
        Ok(Self { runtime, orchestrator })
    }

    /// Blocking form of [`Orchestrator::get_or_compute`].
    ///
    /// The producer runs on the runtime's blocking pool.
    ///
    /// # Errors
    ///
    /// See [`Orchestrator::get_or_compute`].
    pub fn get_or_compute<F, E>(&self, ctx: &RequestContext, key: &str, options: &EntryOptions, producer: F) -> Result<V>
    where
        F: FnOnce() -> std::result::Result<V, E> + Send + 'static,
        E: Into<BoxError> + Send + 'static,
    {
        let producer = move || async move {
            match tokio::task::spawn_blocking(producer).await {
                Ok(result) => result.map_err(Into::into),
                Err(join) => Err(BoxError::from(join)),
            }
        };
        self.runtime
            .block_on(self.orchestrator.get_or_compute(ctx, key, options, producer))
    }

    /// Blocking form of [`Orchestrator::invalidate`].
    ///
    /// # Errors
    ///
    /// See [`Orchestrator::invalidate`].
    pub fn invalidate(&self, ctx: &RequestContext, key: &str) -> Result<bool> {
        self.runtime.block_on(self.orchestrator.invalidate(ctx, key))
    }

    /// See [`Orchestrator::invalidate_namespace`].
    pub fn invalidate_namespace(&self, namespace: &str) -> usize {
        self.orchestrator.invalidate_namespace(namespace)
    }

    /// See [`Orchestrator::invalidate_all`].
    pub fn invalidate_all(&self) -> usize {
        self.orchestrator.invalidate_all()
    }

    /// Blocking form of [`Orchestrator::get_health`].
    pub fn get_health(&self) -> HealthReport {
        self.runtime.block_on(self.orchestrator.get_health())
    }

    /// The wrapped async orchestrator.
    #[must_use]
    pub fn orchestrator(&self) -> &Orchestrator<V, B, S> {
        &self.orchestrator
    }
}
