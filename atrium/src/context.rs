//! Per-invocation execution context
//!
//! A [`Context`] is the environment a capability runs in: the resolver used
//! to look up further capabilities, the trace of calls that led here, a
//! logging span, and the owning domain. Contexts are immutable; every
//! invocation receives a fresh child context.

use crate::atom::{Atom, TypedAtom};
use crate::domain::Domain;
use crate::lifecycle::Lifecycle;
use crate::registry::Resolver;
use crate::trace::{TraceEvent, TraceVector};
use crate::types::{Name, TypedName};
use std::fmt;
use std::sync::Arc;
use tracing::Span;

/// Execution environment for one link in a call chain
#[derive(Clone)]
pub struct Context {
    domain: Domain,
    resolver: Arc<dyn Resolver>,
    trace: TraceVector,
    span: Span,
}

impl Context {
    pub(crate) fn new(
        domain: Domain,
        resolver: Arc<dyn Resolver>,
        trace: TraceVector,
        span: Span,
    ) -> Self {
        Self {
            domain,
            resolver,
            trace,
            span,
        }
    }

    /// Create a handle for the capability described by `pattern`
    ///
    /// Every call creates an independent handle with its own lifecycle,
    /// even for identical patterns.
    pub fn find(&self, pattern: Name) -> Atom {
        Atom::new(Lifecycle::new(self.clone(), pattern))
    }

    /// Create a typed handle
    pub fn find_typed<A, R>(&self, name: &TypedName<A, R>) -> TypedAtom<A, R> {
        TypedAtom::new(self.find(name.name().clone()))
    }

    /// Derive the context handed to an implementation
    ///
    /// The child's trace is this trace plus `event`, and its span nests
    /// under this span.
    pub(crate) fn child(&self, event: TraceEvent) -> Self {
        let span = match &event {
            TraceEvent::DomainCall { name } => {
                tracing::debug_span!(parent: &self.span, "call", name = %name, depth = self.trace.depth() + 1)
            }
            other => tracing::debug_span!(parent: &self.span, "hop", event = %other),
        };
        Self {
            domain: self.domain.clone(),
            resolver: self.resolver.clone(),
            trace: self.trace.extend(event),
            span,
        }
    }

    pub fn domain(&self) -> &Domain {
        &self.domain
    }

    pub fn resolver(&self) -> &Arc<dyn Resolver> {
        &self.resolver
    }

    /// The calls that led to this context, outermost first
    pub fn trace(&self) -> &TraceVector {
        &self.trace
    }

    /// Logging sink for this context
    pub fn span(&self) -> &Span {
        &self.span
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("domain", &self.domain.name())
            .field("trace", &self.trace)
            .finish()
    }
}
