//! Binding storage and pattern resolution
//!
//! The [`Registry`] is a synchronous, append-only list of registrations. A
//! [`Resolver`] turns "resolve this pattern" into a matching registration;
//! [`RegistryResolver`] is the default resolver over a registry.
//!
//! Resolution is deterministic: among several matching registrations the
//! first one registered wins.

use crate::element::Element;
use crate::error::AtomResult;
use crate::types::Name;
use futures_util::future::{self, BoxFuture, FutureExt};
use parking_lot::RwLock;
use std::fmt;
use std::sync::Arc;

/// A name bound to an element
#[derive(Clone)]
pub struct Registration {
    name: Name,
    element: Arc<dyn Element>,
}

impl Registration {
    pub fn new(name: Name, element: Arc<dyn Element>) -> Self {
        Self { name, element }
    }

    /// The name this element was bound under
    pub fn name(&self) -> &Name {
        &self.name
    }

    pub fn element(&self) -> &Arc<dyn Element> {
        &self.element
    }
}

impl fmt::Debug for Registration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registration")
            .field("name", &self.name)
            .field("element", &self.element.type_name())
            .finish()
    }
}

/// In-memory store of registrations
///
/// Registration never deduplicates or checks uniqueness; several elements
/// may be bound under overlapping names.
#[derive(Debug, Default)]
pub struct Registry {
    registrations: Vec<Registration>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a registration
    pub fn register(&mut self, name: Name, element: Arc<dyn Element>) {
        self.registrations.push(Registration::new(name, element));
    }

    /// Every registration whose name satisfies `pattern`, in registration order
    pub fn matching(&self, pattern: &Name) -> Vec<&Registration> {
        self.registrations
            .iter()
            .filter(|r| r.name.satisfies(pattern))
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Registration> {
        self.registrations.iter()
    }

    pub fn len(&self) -> usize {
        self.registrations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.registrations.is_empty()
    }
}

/// Asynchronous pattern resolution
///
/// Resolvers may consult remote directories or wait on bindings, so
/// resolution is async even though the default implementation is not.
pub trait Resolver: Send + Sync {
    /// Find the registration that should serve `pattern`, if any
    fn resolve<'a>(&'a self, pattern: &'a Name) -> BoxFuture<'a, AtomResult<Option<Registration>>>;
}

/// Predicate applied to candidate registrations before picking the first
pub type RegistrationFilter = Arc<dyn Fn(&Registration) -> bool + Send + Sync>;

/// Default resolver: first matching registration in a shared registry
#[derive(Clone)]
pub struct RegistryResolver {
    registry: Arc<RwLock<Registry>>,
    filter: Option<RegistrationFilter>,
}

impl RegistryResolver {
    pub fn new(registry: Arc<RwLock<Registry>>) -> Self {
        Self {
            registry,
            filter: None,
        }
    }

    /// Restrict resolution to registrations accepted by `filter`
    pub fn with_filter<F>(mut self, filter: F) -> Self
    where
        F: Fn(&Registration) -> bool + Send + Sync + 'static,
    {
        self.filter = Some(Arc::new(filter));
        self
    }

    /// Resolve synchronously
    pub fn resolve_now(&self, pattern: &Name) -> Option<Registration> {
        let registry = self.registry.read();
        registry
            .matching(pattern)
            .into_iter()
            .find(|r| self.filter.as_ref().map_or(true, |filter| filter(r)))
            .cloned()
    }
}

impl Resolver for RegistryResolver {
    fn resolve<'a>(&'a self, pattern: &'a Name) -> BoxFuture<'a, AtomResult<Option<Registration>>> {
        future::ready(Ok(self.resolve_now(pattern))).boxed()
    }
}

impl fmt::Debug for RegistryResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegistryResolver")
            .field("registrations", &self.registry.read().len())
            .field("filtered", &self.filter.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::element::FnElement;
    use serde_json::{json, Value};

    fn name(value: Value) -> Name {
        Name::new(value).unwrap()
    }

    fn echo() -> Arc<dyn Element> {
        Arc::new(FnElement::new(|_ctx, arg| async move { Ok(arg) }))
    }

    fn populated() -> Arc<RwLock<Registry>> {
        let mut registry = Registry::new();
        registry.register(name(json!({"svc": "math", "method": "add", "v": 1})), echo());
        registry.register(name(json!({"svc": "math", "method": "mul"})), echo());
        registry.register(name(json!({"svc": "math", "method": "add", "v": 2})), echo());
        Arc::new(RwLock::new(registry))
    }

    #[test]
    fn test_register_does_not_deduplicate() {
        let mut registry = Registry::new();
        registry.register(name(json!({"svc": "a"})), echo());
        registry.register(name(json!({"svc": "a"})), echo());
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_matching_preserves_registration_order() {
        let registry = populated();
        let registry = registry.read();
        let found = registry.matching(&name(json!({"method": "add"})));
        let versions: Vec<_> = found.iter().map(|r| r.name().get("v").cloned()).collect();
        assert_eq!(versions, vec![Some(json!(1)), Some(json!(2))]);
        assert_eq!(registry.matching(&Name::empty()).len(), 3);
    }

    #[test]
    fn test_first_registered_wins() {
        let resolver = RegistryResolver::new(populated());
        let pattern = name(json!({"svc": "math", "method": "add"}));
        for _ in 0..3 {
            let found = resolver.resolve_now(&pattern).unwrap();
            assert_eq!(found.name().get("v"), Some(&json!(1)));
        }
    }

    #[test]
    fn test_filter_applies_before_first() {
        let resolver = RegistryResolver::new(populated())
            .with_filter(|r| r.name().get("v") == Some(&json!(2)));
        let found = resolver
            .resolve_now(&name(json!({"method": "add"})))
            .unwrap();
        assert_eq!(found.name().get("v"), Some(&json!(2)));
        assert!(resolver.resolve_now(&name(json!({"method": "mul"}))).is_none());
    }

    #[tokio::test]
    async fn test_async_resolve_not_found() {
        let resolver = RegistryResolver::new(populated());
        let found = resolver
            .resolve(&name(json!({"svc": "strings"})))
            .await
            .unwrap();
        assert!(found.is_none());
    }
}
