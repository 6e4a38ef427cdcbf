//! Boundary portals
//!
//! Ingress lets callers outside a domain's call graph obtain handles into
//! it. Egress names the outbound direction; its transport, marshaling and
//! security model live outside this crate.

use super::Domain;
use crate::atom::{Atom, TypedAtom};
use crate::context::Context;
use crate::error::AtomResult;
use crate::types::{Name, TypedName};
use futures_util::future::BoxFuture;
use serde_json::Value;

/// Entry point into a domain
#[derive(Debug, Clone)]
pub struct Ingress {
    domain: Domain,
}

impl Ingress {
    pub(crate) fn new(domain: Domain) -> Self {
        Self { domain }
    }

    pub fn domain(&self) -> &Domain {
        &self.domain
    }

    /// Create a handle rooted in a fresh context
    ///
    /// Behaves like [`Context::find`] on a context with no parent, an empty
    /// trace, and the domain's ingress resolver.
    pub fn externalize(&self, pattern: Name) -> Atom {
        tracing::debug!(domain = %self.domain.name(), pattern = %pattern, "Externalizing handle");
        self.domain.root_context().find(pattern)
    }

    /// Typed counterpart of [`externalize`](Self::externalize)
    pub fn externalize_typed<A, R>(&self, name: &TypedName<A, R>) -> TypedAtom<A, R> {
        TypedAtom::new(self.externalize(name.name().clone()))
    }
}

/// Outbound portal for calls that leave the domain
///
/// No implementation ships with the runtime. A domain may carry one,
/// installed through [`DomainBuilder::egress`](super::DomainBuilder::egress),
/// for elements that forward calls across a process or trust boundary.
pub trait Egress: Send + Sync {
    /// Name of the remote side, for diagnostics
    fn target(&self) -> &str;

    /// Forward a call for `pattern` made from `context`
    fn call<'a>(
        &'a self,
        pattern: &'a Name,
        context: &'a Context,
        arg: Value,
    ) -> BoxFuture<'a, AtomResult<Value>>;
}
