//! Domains: isolation units owning bindings
//!
//! A domain owns exactly one [`Registry`], a default resolver over it, and
//! its boundary portals. Calls inside a domain go straight to its registry;
//! nothing reaches another domain's registry except through a portal.
//!
//! Domains are cheap to clone. Contexts hold a domain handle, but a domain
//! never holds contexts, so ownership stays acyclic.

mod portal;

pub use portal::{Egress, Ingress};

use crate::config::{DomainConfig, RetryConfig};
use crate::context::Context;
use crate::element::{typed_fn, Element, FnElement};
use crate::error::{AtomResult, DomainError};
use crate::lifecycle::{BackoffPolicy, RetryPolicy};
use crate::registry::{Registry, RegistryResolver, Resolver};
use crate::trace::TraceVector;
use crate::types::{DomainId, Name, TypedName};
use parking_lot::RwLock;
use serde_json::Value;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

struct DomainInner {
    id: DomainId,
    name: String,
    registry: Arc<RwLock<Registry>>,
    resolver: Arc<RegistryResolver>,
    retry: Arc<dyn RetryPolicy>,
    egress: Option<Arc<dyn Egress>>,
}

/// Isolation unit owning a registry of bindings
///
/// # Example
///
/// ```
/// use atrium::{Domain, Name};
/// use serde_json::json;
///
/// # tokio_test_block(async {
/// let domain = Domain::new("math");
/// domain.bind_fn(Name::new(json!({"svc": "math", "method": "add"})).unwrap(), |_ctx, arg| async move {
///     let sum = arg["a"].as_i64().unwrap_or(0) + arg["b"].as_i64().unwrap_or(0);
///     Ok(json!({ "sum": sum }))
/// });
///
/// let add = domain
///     .ingress()
///     .externalize(Name::new(json!({"svc": "math", "method": "add"})).unwrap());
/// let result = add.call(json!({"a": 1, "b": 2})).await.unwrap();
/// assert_eq!(result, json!({"sum": 3}));
/// # });
/// # fn tokio_test_block<F: std::future::Future>(f: F) -> F::Output {
/// #     tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(f)
/// # }
/// ```
#[derive(Clone)]
pub struct Domain {
    inner: Arc<DomainInner>,
}

impl Domain {
    /// Create a domain with default configuration
    pub fn new(name: impl Into<String>) -> Self {
        Self::builder(DomainConfig::named(name)).build()
    }

    /// Create a domain from configuration
    pub fn from_config(config: &DomainConfig) -> Self {
        Self::builder(config.clone()).build()
    }

    pub fn builder(config: DomainConfig) -> DomainBuilder {
        DomainBuilder::new(config)
    }

    pub fn id(&self) -> DomainId {
        self.inner.id
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Bind an element under `name`
    pub fn bind<E: Element + 'static>(&self, name: Name, element: E) {
        self.bind_shared(name, Arc::new(element));
    }

    /// Bind an element that is shared with other bindings
    pub fn bind_shared(&self, name: Name, element: Arc<dyn Element>) {
        tracing::debug!(
            domain = %self.inner.name,
            name = %name,
            element = element.type_name(),
            "Binding element"
        );
        self.inner.registry.write().register(name, element);
    }

    /// Bind a plain async function under `name`
    pub fn bind_fn<F, Fut>(&self, name: Name, f: F)
    where
        F: Fn(Context, Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = AtomResult<Value>> + Send + 'static,
    {
        self.bind(name, FnElement::new(f));
    }

    /// Bind a typed async function; arguments and results go through serde
    pub fn bind_typed<A, R, F, Fut>(&self, name: TypedName<A, R>, f: F)
    where
        A: serde::de::DeserializeOwned + Send + 'static,
        R: serde::Serialize + Send + 'static,
        F: Fn(Context, A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = AtomResult<R>> + Send + 'static,
    {
        self.bind(name.into_name(), FnElement::from(typed_fn(f)));
    }

    /// Number of bindings in this domain
    pub fn binding_count(&self) -> usize {
        self.inner.registry.read().len()
    }

    /// Names of all bindings, in registration order
    pub fn binding_names(&self) -> Vec<Name> {
        self.inner
            .registry
            .read()
            .iter()
            .map(|r| r.name().clone())
            .collect()
    }

    /// The default resolver over this domain's registry
    pub fn resolver(&self) -> Arc<dyn Resolver> {
        self.inner.resolver.clone()
    }

    /// A resolver over this domain's registry restricted by `filter`
    pub fn filtered_resolver<F>(&self, filter: F) -> Arc<dyn Resolver>
    where
        F: Fn(&crate::registry::Registration) -> bool + Send + Sync + 'static,
    {
        Arc::new(RegistryResolver::new(self.inner.registry.clone()).with_filter(filter))
    }

    /// Resolver used for calls entering through the ingress portal
    pub fn ingress_resolver(&self) -> Arc<dyn Resolver> {
        self.resolver()
    }

    pub fn retry_policy(&self) -> &Arc<dyn RetryPolicy> {
        &self.inner.retry
    }

    /// Build a context in this domain
    ///
    /// The resolver is `resolver` if given, else the parent's. The trace is
    /// `trace` if given, else the parent's, else empty. Fails when there is
    /// neither a parent nor an explicit resolver.
    pub fn create_context(
        &self,
        parent: Option<&Context>,
        resolver: Option<Arc<dyn Resolver>>,
        trace: Option<TraceVector>,
    ) -> Result<Context, DomainError> {
        let resolver = resolver
            .or_else(|| parent.map(|p| p.resolver().clone()))
            .ok_or(DomainError::MissingResolver)?;
        let trace = trace
            .or_else(|| parent.map(|p| p.trace().clone()))
            .unwrap_or_default();
        let span = match parent {
            Some(parent) => tracing::debug_span!(parent: parent.span(), "context", domain = %self.inner.name),
            None => self.root_span(),
        };
        Ok(Context::new(self.clone(), resolver, trace, span))
    }

    /// A root context over the domain's ingress resolver
    pub(crate) fn root_context(&self) -> Context {
        Context::new(
            self.clone(),
            self.ingress_resolver(),
            TraceVector::new(),
            self.root_span(),
        )
    }

    fn root_span(&self) -> tracing::Span {
        tracing::debug_span!("domain", name = %self.inner.name, id = %self.inner.id)
    }

    /// The portal for callers outside this domain's call graph
    pub fn ingress(&self) -> Ingress {
        Ingress::new(self.clone())
    }

    /// The outbound portal, when one is installed
    pub fn egress(&self) -> Option<&Arc<dyn Egress>> {
        self.inner.egress.as_ref()
    }
}

impl fmt::Debug for Domain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Domain")
            .field("id", &self.inner.id)
            .field("name", &self.inner.name)
            .field("bindings", &self.binding_count())
            .finish()
    }
}

/// Builder for domains with a custom retry policy or egress portal
pub struct DomainBuilder {
    config: DomainConfig,
    retry: Option<Arc<dyn RetryPolicy>>,
    egress: Option<Arc<dyn Egress>>,
}

impl DomainBuilder {
    fn new(config: DomainConfig) -> Self {
        Self {
            config,
            retry: None,
            egress: None,
        }
    }

    /// Use backoff with the given settings
    pub fn retry(mut self, retry: RetryConfig) -> Self {
        self.config.retry = retry;
        self.retry = None;
        self
    }

    /// Replace the retry policy entirely
    pub fn retry_policy(mut self, policy: Arc<dyn RetryPolicy>) -> Self {
        self.retry = Some(policy);
        self
    }

    pub fn egress(mut self, egress: Arc<dyn Egress>) -> Self {
        self.egress = Some(egress);
        self
    }

    pub fn build(self) -> Domain {
        let registry = Arc::new(RwLock::new(Registry::new()));
        let resolver = Arc::new(RegistryResolver::new(registry.clone()));
        let retry = self
            .retry
            .unwrap_or_else(|| Arc::new(BackoffPolicy::new(self.config.retry.clone())));
        let inner = DomainInner {
            id: DomainId::new(),
            name: self.config.name,
            registry,
            resolver,
            retry,
            egress: self.egress,
        };
        tracing::debug!(domain = %inner.name, id = %inner.id, "Created domain");
        Domain {
            inner: Arc::new(inner),
        }
    }
}
