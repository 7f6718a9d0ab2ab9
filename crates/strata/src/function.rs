// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::fmt;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use strata_tier::{Backend, NoBackend};

use crate::context::RequestContext;
use crate::error::{BoxError, Result};
use crate::health::HealthReport;
use crate::key::{DefaultKeyGenerator, KeyGenerator, KeyOptions};
use crate::orchestrator::{EntryOptions, Orchestrator};
use crate::serializer::{JsonSerializer, Serializer};

/// An async function whose results are cached.
///
/// Each call derives a key from the function's identity and its arguments, then goes
/// through [`Orchestrator::get_or_compute`] with the function as the producer.
///
/// # Examples
///
/// ```
/// # tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(async {
/// use strata::{CachedFunction, Orchestrator, RequestContext};
///
/// let cache = Orchestrator::<String>::builder("greetings").build().unwrap();
/// let greet = CachedFunction::new("greet", cache, |name: String| async move {
///     Ok::<_, std::io::Error>(format!("hello {name}"))
/// });
///
/// let ctx = RequestContext::new();
/// assert_eq!(greet.call(&ctx, "ada".to_owned()).await.unwrap(), "hello ada");
/// assert_eq!(greet.call(&ctx, "ada".to_owned()).await.unwrap(), "hello ada");
/// assert_eq!(greet.orchestrator().stats().misses, 1);
/// # });
/// ```
pub struct CachedFunction<A, V, F, B = NoBackend, S = JsonSerializer, K = DefaultKeyGenerator> {
    identity: String,
    orchestrator: Orchestrator<V, B, S>,
    func: Arc<F>,
    keys: K,
    ttl: Option<Duration>,
    namespace: Option<String>,
    _args: PhantomData<fn(A)>,
}

impl<A, V, F, B, S, K: fmt::Debug> fmt::Debug for CachedFunction<A, V, F, B, S, K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CachedFunction")
            .field("identity", &self.identity)
            .field("orchestrator", &self.orchestrator)
            .field("keys", &self.keys)
            .field("ttl", &self.ttl)
            .field("namespace", &self.namespace)
            .finish_non_exhaustive()
    }
}

impl<A, V, F, B, S> CachedFunction<A, V, F, B, S> {
    /// Wraps `func` under `identity`, which must be unique among functions sharing a cache.
    pub fn new(identity: impl Into<String>, orchestrator: Orchestrator<V, B, S>, func: F) -> Self {
        Self {
            identity: identity.into(),
            orchestrator,
            func: Arc::new(func),
            keys: DefaultKeyGenerator::new(),
            ttl: None,
            namespace: None,
            _args: PhantomData,
        }
    }
}

impl<A, V, F, B, S, K> CachedFunction<A, V, F, B, S, K> {
    /// Replaces the key generator.
    pub fn with_key_generator<K2: KeyGenerator<A>>(self, keys: K2) -> CachedFunction<A, V, F, B, S, K2> {
        CachedFunction {
            identity: self.identity,
            orchestrator: self.orchestrator,
            func: self.func,
            keys,
            ttl: self.ttl,
            namespace: self.namespace,
            _args: PhantomData,
        }
    }

    /// Overrides the cache's default TTL for this function.
    #[must_use]
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    /// Tags every entry of this function with `namespace`.
    #[must_use]
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    /// The identity mixed into every generated key.
    #[must_use]
    pub fn identity(&self) -> &str {
        &self.identity
    }

    /// The orchestrator holding the cached results.
    #[must_use]
    pub fn orchestrator(&self) -> &Orchestrator<V, B, S> {
        &self.orchestrator
    }
}

impl<A, V, F, B, S, K> CachedFunction<A, V, F, B, S, K>
where
    A: Send + 'static,
    V: Clone + Send + Sync + 'static,
    B: Backend,
    S: Serializer<V>,
    K: KeyGenerator<A>,
{
    /// The cache key a call with `args` uses.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Serialization`](crate::Error::Serialization) if the arguments cannot
    /// be encoded.
    pub fn key_for(&self, ctx: &RequestContext, args: &A) -> Result<String> {
        let options = KeyOptions {
            namespace: self.namespace.clone(),
            tenant: ctx.tenant_id().map(str::to_owned),
        };
        Ok(self.keys.generate_key(&self.identity, args, &options)?)
    }

    /// Returns the cached result for `args`, calling the function on a miss.
    ///
    /// # Errors
    ///
    /// See [`Orchestrator::get_or_compute`].
    pub async fn call<Fut, E>(&self, ctx: &RequestContext, args: A) -> Result<V>
    where
        F: Fn(A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<V, E>> + Send + 'static,
        E: Into<BoxError> + Send + 'static,
    {
        let key = self.key_for(ctx, &args)?;
        let options = self.entry_options();
        let func = Arc::clone(&self.func);
        self.orchestrator
            .get_or_compute(ctx, &key, &options, move || func(args))
            .await
    }

    /// Removes the cached result for `args` from both tiers.
    ///
    /// # Errors
    ///
    /// See [`Orchestrator::invalidate`].
    pub async fn invalidate(&self, ctx: &RequestContext, args: &A) -> Result<bool> {
        let key = self.key_for(ctx, args)?;
        self.orchestrator.invalidate(ctx, &key).await
    }

    /// Reports the health of the underlying cache.
    pub async fn get_health(&self) -> HealthReport {
        self.orchestrator.get_health().await
    }

    fn entry_options(&self) -> EntryOptions {
        let mut options = EntryOptions::new();
        if let Some(ttl) = self.ttl {
            options = options.with_ttl(ttl);
        }
        if let Some(namespace) = &self.namespace {
            options = options.with_namespace(namespace.clone());
        }
        options
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[tokio::test]
    async fn tenants_get_separate_entries() {
        let calls = Arc::new(AtomicUsize::new(0));
        let cache = Orchestrator::<usize>::builder("tenants").build().unwrap();
        let count = CachedFunction::new("count", cache, {
            let calls = Arc::clone(&calls);
            move |_: u32| {
                let calls = Arc::clone(&calls);
                async move { Ok::<_, std::io::Error>(calls.fetch_add(1, Ordering::SeqCst)) }
            }
        });

        let a = RequestContext::new().with_tenant("a");
        let b = RequestContext::new().with_tenant("b");
        assert_eq!(count.call(&a, 1).await.unwrap(), 0);
        assert_eq!(count.call(&b, 1).await.unwrap(), 1);
        assert_eq!(count.call(&a, 1).await.unwrap(), 0);
        assert_ne!(count.key_for(&a, &1).unwrap(), count.key_for(&b, &1).unwrap());
    }

    #[tokio::test]
    async fn tenant_and_namespace_with_same_name_stay_apart() {
        let cache = Orchestrator::<String>::builder("scopes").build().unwrap();
        let whoami = |label: &'static str| {
            move |_: u32| async move { Ok::<_, std::io::Error>(label.to_owned()) }
        };
        let shared = CachedFunction::new("whoami", cache.clone(), whoami("shared")).with_namespace("t1");
        let tenant = CachedFunction::new("whoami", cache.clone(), whoami("tenant"));

        let anonymous = RequestContext::new();
        let t1 = RequestContext::new().with_tenant("t1");
        assert_eq!(shared.call(&anonymous, 1).await.unwrap(), "shared");
        assert_eq!(tenant.call(&t1, 1).await.unwrap(), "tenant");
        assert_ne!(shared.key_for(&anonymous, &1).unwrap(), tenant.key_for(&t1, &1).unwrap());
        assert_eq!(cache.stats().misses, 2);
    }

    #[tokio::test]
    async fn namespace_is_applied_to_entries() {
        let cache = Orchestrator::<u32>::builder("ns").build().unwrap();
        let double = CachedFunction::new("double", cache.clone(), |x: u32| async move { Ok::<_, std::io::Error>(x * 2) })
            .with_namespace("math");

        let ctx = RequestContext::new();
        double.call(&ctx, 2).await.unwrap();
        double.call(&ctx, 3).await.unwrap();
        assert_eq!(cache.invalidate_namespace("math"), 2);
    }

    #[tokio::test]
    async fn invalidate_forces_recompute() {
        let cache = Orchestrator::<u32>::builder("inv").build().unwrap();
        let id = CachedFunction::new("id", cache.clone(), |x: u32| async move { Ok::<_, std::io::Error>(x) });

        let ctx = RequestContext::new();
        id.call(&ctx, 7).await.unwrap();
        assert!(id.invalidate(&ctx, &7).await.unwrap());
        assert!(!id.invalidate(&ctx, &7).await.unwrap());
        id.call(&ctx, 7).await.unwrap();
        assert_eq!(cache.stats().misses, 2);
    }
}
