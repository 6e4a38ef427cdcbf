//! The invocation state machine behind every handle
//!
//! A lifecycle moves through `idle` → `resolved` → `acquired` and finally
//! `disposed`. Each call runs a retry loop:
//!
//! ```text
//!   should_retry? ──no──▶ combined error
//!        │yes
//!      delay
//!        │
//!   disposed? ──yes──▶ EarlyDisposal
//!        │
//!   resolve (cached) ─▶ acquire (cached) ─▶ invoke in child context
//!        │                    │                   │
//!        └────── error: clear cache; transient → loop, fatal → return
//! ```
//!
//! Resolution and acquisition are single-flight: concurrent calls on one
//! handle wait on a gate and share the cached implementation. Invocations
//! themselves run outside the gate and may overlap. The cached
//! implementation is reference counted, so clearing the cache never
//! releases an implementation that an in-flight call still holds; the
//! release happens when the last holder lets go.

mod retry;

pub use retry::{backoff_delay, BackoffController, BackoffPolicy, RetryController, RetryPolicy};

use crate::context::Context;
use crate::element::AtomImpl;
use crate::error::{AtomError, AtomResult};
use crate::registry::Registration;
use crate::trace::TraceEvent;
use crate::types::{LifecycleId, Name};
use parking_lot::Mutex;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

/// Counters describing the work a lifecycle has done
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LifecycleStats {
    /// Resolver lookups performed
    pub resolutions: u64,
    /// Implementations obtained from elements
    pub acquisitions: u64,
    /// Calls dispatched to an implementation
    pub invocations: u64,
    /// Transient failures that led to another attempt
    pub retries: u64,
    /// Implementations released
    pub releases: u64,
}

#[derive(Debug, Default)]
struct Counters {
    resolutions: AtomicU64,
    acquisitions: AtomicU64,
    invocations: AtomicU64,
    retries: AtomicU64,
    releases: AtomicU64,
}

impl Counters {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> LifecycleStats {
        LifecycleStats {
            resolutions: self.resolutions.load(Ordering::Relaxed),
            acquisitions: self.acquisitions.load(Ordering::Relaxed),
            invocations: self.invocations.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
            releases: self.releases.load(Ordering::Relaxed),
        }
    }
}

/// An implementation held by a lifecycle
///
/// Dropping the last reference releases the implementation.
struct Acquired {
    atom: AtomImpl,
    resolved: Name,
    lifecycle: LifecycleId,
    counters: Arc<Counters>,
}

impl Drop for Acquired {
    fn drop(&mut self) {
        match self.atom.release() {
            Ok(true) => {
                Counters::bump(&self.counters.releases);
                tracing::debug!(lifecycle = %self.lifecycle, resolved = %self.resolved, "Released implementation");
            }
            Ok(false) => {}
            Err(error) => {
                Counters::bump(&self.counters.releases);
                tracing::warn!(
                    lifecycle = %self.lifecycle,
                    resolved = %self.resolved,
                    %error,
                    "Failed to release implementation"
                );
            }
        }
    }
}

#[derive(Default)]
struct Cache {
    registration: Option<Registration>,
    atom: Option<Arc<Acquired>>,
}

/// Resolve/acquire/invoke/dispose state machine for one handle
pub(crate) struct Lifecycle {
    id: LifecycleId,
    pattern: Name,
    context: Context,
    disposed: AtomicBool,
    gate: tokio::sync::Mutex<()>,
    cache: Mutex<Cache>,
    counters: Arc<Counters>,
}

impl Lifecycle {
    pub(crate) fn new(context: Context, pattern: Name) -> Self {
        Self {
            id: LifecycleId::new(),
            pattern,
            context,
            disposed: AtomicBool::new(false),
            gate: tokio::sync::Mutex::new(()),
            cache: Mutex::new(Cache::default()),
            counters: Arc::new(Counters::default()),
        }
    }

    pub(crate) fn id(&self) -> LifecycleId {
        self.id
    }

    pub(crate) fn pattern(&self) -> &Name {
        &self.pattern
    }

    pub(crate) fn context(&self) -> &Context {
        &self.context
    }

    pub(crate) fn stats(&self) -> LifecycleStats {
        self.counters.snapshot()
    }

    pub(crate) fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    /// Whether an implementation is currently cached
    pub(crate) fn is_acquired(&self) -> bool {
        self.cache.lock().atom.is_some()
    }

    /// Mark the lifecycle disposed and drop its cache
    ///
    /// Idempotent. An implementation still in use by an in-flight call is
    /// released when that call finishes.
    pub(crate) fn dispose(&self) {
        let taken = {
            let mut cache = self.cache.lock();
            if self.disposed.swap(true, Ordering::SeqCst) {
                return;
            }
            std::mem::take(&mut *cache)
        };
        tracing::debug!(lifecycle = %self.id, pattern = %self.pattern, "Disposed handle");
        drop(taken);
    }

    /// Drop every cached entry
    fn invalidate(&self) {
        let taken = std::mem::take(&mut *self.cache.lock());
        drop(taken);
    }

    fn early_disposal(&self) -> AtomError {
        AtomError::EarlyDisposal {
            pattern: self.pattern.clone(),
        }
    }

    /// Run one call to completion, retrying transient failures
    pub(crate) async fn run(&self, arg: Value) -> AtomResult<Value> {
        let mut retry = self.context.domain().retry_policy().controller(&self.pattern);
        loop {
            if !retry.should_retry() {
                let error = retry.combined_error();
                tracing::debug!(lifecycle = %self.id, %error, "Giving up");
                return Err(error);
            }
            retry.delay().await;

            if self.is_disposed() {
                return Err(self.early_disposal());
            }

            match self.attempt(arg.clone()).await {
                Ok(value) => return Ok(value),
                Err(error) => {
                    self.invalidate();
                    if !error.is_transient() {
                        tracing::debug!(lifecycle = %self.id, %error, "Call failed");
                        return Err(error);
                    }
                    Counters::bump(&self.counters.retries);
                    tracing::debug!(lifecycle = %self.id, pattern = %self.pattern, %error, "Transient failure, retrying");
                    retry.transient_error(error);
                }
            }
        }
    }

    async fn attempt(&self, arg: Value) -> AtomResult<Value> {
        let acquired = self.acquire().await?;
        let child = self
            .context
            .child(TraceEvent::domain_call(acquired.resolved.clone()));

        Counters::bump(&self.counters.invocations);
        let result = acquired.atom.invoke(child, arg).await;

        if self.is_disposed() {
            // The cache was emptied by dispose; ours may be the last reference.
            tracing::debug!(lifecycle = %self.id, "Handle released during call");
            drop(acquired);
        }
        result
    }

    /// Resolve and acquire, reusing whatever is cached
    async fn acquire(&self) -> AtomResult<Arc<Acquired>> {
        let _gate = self.gate.lock().await;

        let cached = self.cache.lock().atom.clone();
        if let Some(acquired) = cached {
            return Ok(acquired);
        }

        let cached = self.cache.lock().registration.clone();
        let registration = match cached {
            Some(registration) => registration,
            None => self.resolve().await?,
        };

        let atom = registration
            .element()
            .get_atom(&self.pattern, &self.context)
            .await?;
        Counters::bump(&self.counters.acquisitions);
        let acquired = Arc::new(Acquired {
            atom,
            resolved: registration.name().clone(),
            lifecycle: self.id,
            counters: self.counters.clone(),
        });

        {
            let mut cache = self.cache.lock();
            if !self.is_disposed() {
                cache.atom = Some(acquired.clone());
                return Ok(acquired);
            }
        }
        // Lost the race with dispose: release what we just obtained.
        drop(acquired);
        Err(self.early_disposal())
    }

    async fn resolve(&self) -> AtomResult<Registration> {
        Counters::bump(&self.counters.resolutions);
        let resolved = self.context.resolver().resolve(&self.pattern).await?;
        let registration = resolved.ok_or_else(|| AtomError::UnresolvedPattern {
            pattern: self.pattern.clone(),
        })?;

        let mut cache = self.cache.lock();
        if self.is_disposed() {
            return Err(self.early_disposal());
        }
        tracing::debug!(
            lifecycle = %self.id,
            pattern = %self.pattern,
            resolved = %registration.name(),
            "Resolved pattern"
        );
        cache.registration = Some(registration.clone());
        Ok(registration)
    }
}

impl Drop for Lifecycle {
    fn drop(&mut self) {
        self.dispose();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DomainConfig, RetryConfig};
    use crate::domain::Domain;
    use crate::element::Element;
    use futures_util::future::{BoxFuture, FutureExt};
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    fn name(value: Value) -> Name {
        Name::new(value).unwrap()
    }

    fn domain(retry: RetryConfig) -> Domain {
        Domain::builder(DomainConfig::named("test")).retry(retry).build()
    }

    /// Element counting acquisitions and releases
    #[derive(Default)]
    struct Tracked {
        acquired: Arc<AtomicUsize>,
        released: Arc<AtomicUsize>,
        acquire_delay: Option<Duration>,
    }

    impl Element for Tracked {
        fn get_atom<'a>(
            &'a self,
            pattern: &'a Name,
            _context: &'a Context,
        ) -> BoxFuture<'a, AtomResult<AtomImpl>> {
            let released = self.released.clone();
            async move {
                if let Some(delay) = self.acquire_delay {
                    tokio::time::sleep(delay).await;
                }
                self.acquired.fetch_add(1, Ordering::SeqCst);
                Ok(
                    AtomImpl::new(pattern.clone(), |_ctx, arg| async move { Ok(arg) }).with_release(
                        move || {
                            released.fetch_add(1, Ordering::SeqCst);
                            Ok(())
                        },
                    ),
                )
            }
            .boxed()
        }
    }

    #[tokio::test]
    async fn test_cache_reused_across_calls() {
        let domain = domain(RetryConfig::immediate());
        let pattern = name(json!({"svc": "echo"}));
        let element = Tracked::default();
        let acquired = element.acquired.clone();
        domain.bind(pattern.clone(), element);

        let lifecycle = Lifecycle::new(domain.root_context(), pattern);
        assert_eq!(lifecycle.run(json!(1)).await.unwrap(), json!(1));
        assert_eq!(lifecycle.run(json!(2)).await.unwrap(), json!(2));

        let stats = lifecycle.stats();
        assert_eq!(stats.resolutions, 1);
        assert_eq!(stats.acquisitions, 1);
        assert_eq!(stats.invocations, 2);
        assert_eq!(acquired.load(Ordering::SeqCst), 1);
        assert!(lifecycle.is_acquired());
    }

    #[tokio::test]
    async fn test_dispose_releases_and_is_idempotent() {
        let domain = domain(RetryConfig::immediate());
        let pattern = name(json!({"svc": "echo"}));
        let element = Tracked::default();
        let released = element.released.clone();
        domain.bind(pattern.clone(), element);

        let lifecycle = Lifecycle::new(domain.root_context(), pattern);
        lifecycle.run(Value::Null).await.unwrap();
        lifecycle.dispose();
        lifecycle.dispose();

        assert!(lifecycle.is_disposed());
        assert!(!lifecycle.is_acquired());
        assert_eq!(released.load(Ordering::SeqCst), 1);
        assert_eq!(lifecycle.stats().releases, 1);
        assert!(matches!(
            lifecycle.run(Value::Null).await,
            Err(AtomError::EarlyDisposal { .. })
        ));
    }

    #[tokio::test]
    async fn test_dispose_before_first_call_beats_unresolved() {
        let domain = domain(RetryConfig::immediate());
        let lifecycle = Lifecycle::new(domain.root_context(), name(json!({"svc": "missing"})));
        lifecycle.dispose();
        assert!(matches!(
            lifecycle.run(Value::Null).await,
            Err(AtomError::EarlyDisposal { .. })
        ));
        assert_eq!(lifecycle.stats().resolutions, 0);
    }

    #[tokio::test]
    async fn test_bounded_retries_aggregate_unresolved() {
        let domain = domain(RetryConfig::attempts(3));
        let lifecycle = Lifecycle::new(domain.root_context(), name(json!({"svc": "missing"})));
        match lifecycle.run(Value::Null).await {
            Err(AtomError::RetriesExhausted {
                attempts, errors, ..
            }) => {
                assert_eq!(attempts, 3);
                assert_eq!(errors.len(), 3);
                assert!(errors
                    .iter()
                    .all(|e| matches!(e, AtomError::UnresolvedPattern { .. })));
            }
            other => panic!("unexpected result: {other:?}"),
        }
        assert_eq!(lifecycle.stats().retries, 3);
    }

    #[tokio::test]
    async fn test_fatal_error_clears_cache() {
        let domain = domain(RetryConfig::immediate());
        let pattern = name(json!({"svc": "fragile"}));
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        domain.bind_fn(pattern.clone(), move |_ctx, _arg| {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            async move {
                if n == 0 {
                    Err(AtomError::fatal("boom"))
                } else {
                    Ok(json!("ok"))
                }
            }
        });

        let lifecycle = Lifecycle::new(domain.root_context(), pattern);
        let err = lifecycle.run(Value::Null).await.unwrap_err();
        assert_eq!(err.to_string(), "boom");
        assert!(!lifecycle.is_acquired());

        assert_eq!(lifecycle.run(Value::Null).await.unwrap(), json!("ok"));
        let stats = lifecycle.stats();
        assert_eq!(stats.resolutions, 2);
        assert_eq!(stats.acquisitions, 2);
        assert_eq!(stats.retries, 0);
    }

    #[tokio::test]
    async fn test_transient_application_error_is_retried() {
        let domain = domain(RetryConfig::immediate());
        let pattern = name(json!({"svc": "flaky"}));
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        domain.bind_fn(pattern.clone(), move |_ctx, _arg| {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(AtomError::transient("busy"))
                } else {
                    Ok(json!(n))
                }
            }
        });

        let lifecycle = Lifecycle::new(domain.root_context(), pattern);
        assert_eq!(lifecycle.run(Value::Null).await.unwrap(), json!(2));
        let stats = lifecycle.stats();
        assert_eq!(stats.retries, 2);
        assert_eq!(stats.resolutions, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_calls_acquire_once() {
        let domain = domain(RetryConfig::immediate());
        let pattern = name(json!({"svc": "slow"}));
        let element = Tracked {
            acquire_delay: Some(Duration::from_millis(20)),
            ..Tracked::default()
        };
        let acquired = element.acquired.clone();
        let released = element.released.clone();
        domain.bind(pattern.clone(), element);

        let lifecycle = Lifecycle::new(domain.root_context(), pattern);
        let (a, b, c) = tokio::join!(
            lifecycle.run(json!("a")),
            lifecycle.run(json!("b")),
            lifecycle.run(json!("c"))
        );
        assert_eq!((a.unwrap(), b.unwrap(), c.unwrap()), (json!("a"), json!("b"), json!("c")));
        assert_eq!(acquired.load(Ordering::SeqCst), 1);
        assert_eq!(released.load(Ordering::SeqCst), 0);
        assert_eq!(lifecycle.stats().invocations, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dispose_during_acquisition_releases_new_implementation() {
        let domain = domain(RetryConfig::immediate());
        let pattern = name(json!({"svc": "slow"}));
        let element = Tracked {
            acquire_delay: Some(Duration::from_millis(50)),
            ..Tracked::default()
        };
        let acquired = element.acquired.clone();
        let released = element.released.clone();
        domain.bind(pattern.clone(), element);

        let lifecycle = Lifecycle::new(domain.root_context(), pattern);
        let disposer = async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            lifecycle.dispose();
        };
        let (result, ()) = tokio::join!(lifecycle.run(Value::Null), disposer);

        assert!(matches!(result, Err(AtomError::EarlyDisposal { .. })));
        assert_eq!(acquired.load(Ordering::SeqCst), 1);
        assert_eq!(released.load(Ordering::SeqCst), 1);
        assert!(!lifecycle.is_acquired());
    }

    #[tokio::test(start_paused = true)]
    async fn test_dispose_during_call_defers_release_and_keeps_result() {
        let domain = domain(RetryConfig::immediate());
        let pattern = name(json!({"svc": "long"}));
        let released = Arc::new(AtomicUsize::new(0));
        let released_in_element = released.clone();
        let seen_during_call = Arc::new(AtomicUsize::new(usize::MAX));
        let seen = seen_during_call.clone();
        let released_probe = released.clone();

        struct Long {
            released: Arc<AtomicUsize>,
            seen: Arc<AtomicUsize>,
            probe: Arc<AtomicUsize>,
        }

        impl Element for Long {
            fn get_atom<'a>(
                &'a self,
                pattern: &'a Name,
                _context: &'a Context,
            ) -> BoxFuture<'a, AtomResult<AtomImpl>> {
                let released = self.released.clone();
                let seen = self.seen.clone();
                let probe = self.probe.clone();
                let atom = AtomImpl::new(pattern.clone(), move |_ctx, _arg| {
                    let seen = seen.clone();
                    let probe = probe.clone();
                    async move {
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        seen.store(probe.load(Ordering::SeqCst), Ordering::SeqCst);
                        Ok(json!("done"))
                    }
                })
                .with_release(move || {
                    released.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                });
                async move { Ok(atom) }.boxed()
            }
        }

        domain.bind(
            pattern.clone(),
            Long {
                released: released_in_element,
                seen,
                probe: released_probe,
            },
        );

        let lifecycle = Lifecycle::new(domain.root_context(), pattern);
        let disposer = async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            lifecycle.dispose();
        };
        let (result, ()) = tokio::join!(lifecycle.run(Value::Null), disposer);

        assert_eq!(result.unwrap(), json!("done"));
        // still held by the running call when its body finished
        assert_eq!(seen_during_call.load(Ordering::SeqCst), 0);
        assert_eq!(released.load(Ordering::SeqCst), 1);
    }

    /// Resolver that waits before delegating
    struct SlowResolver {
        inner: Arc<dyn crate::registry::Resolver>,
        delay: Duration,
    }

    impl crate::registry::Resolver for SlowResolver {
        fn resolve<'a>(
            &'a self,
            pattern: &'a Name,
        ) -> BoxFuture<'a, AtomResult<Option<Registration>>> {
            async move {
                tokio::time::sleep(self.delay).await;
                self.inner.resolve(pattern).await
            }
            .boxed()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_dispose_during_resolution_skips_acquisition() {
        let domain = domain(RetryConfig::immediate());
        let pattern = name(json!({"svc": "remote"}));
        let element = Tracked::default();
        let acquired = element.acquired.clone();
        domain.bind(pattern.clone(), element);

        let resolver: Arc<dyn crate::registry::Resolver> = Arc::new(SlowResolver {
            inner: domain.resolver(),
            delay: Duration::from_millis(50),
        });
        let context = domain.create_context(None, Some(resolver), None).unwrap();
        let lifecycle = Lifecycle::new(context, pattern);
        let disposer = async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            lifecycle.dispose();
        };
        let (result, ()) = tokio::join!(lifecycle.run(Value::Null), disposer);

        assert!(matches!(result, Err(AtomError::EarlyDisposal { .. })));
        let stats = lifecycle.stats();
        assert_eq!(stats.resolutions, 1);
        assert_eq!(stats.acquisitions, 0);
        assert_eq!(acquired.load(Ordering::SeqCst), 0);
        let cache = lifecycle.cache.lock();
        assert!(cache.registration.is_none());
        assert!(cache.atom.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_out_of_range_jitter_still_gives_up_cleanly() {
        for jitter_factor in [50.0, -3.0, f64::NAN, f64::INFINITY] {
            let domain = domain(RetryConfig {
                max_attempts: Some(3),
                initial_delay_ms: 1,
                max_delay_ms: 1,
                jitter_factor,
            });
            let lifecycle = Lifecycle::new(domain.root_context(), name(json!({"svc": "none"})));
            match lifecycle.run(Value::Null).await {
                Err(AtomError::RetriesExhausted { attempts, .. }) => assert_eq!(attempts, 3),
                other => panic!("unexpected result for jitter {jitter_factor}: {other:?}"),
            }
        }
    }
}
