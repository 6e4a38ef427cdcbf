//! Core type definitions for the atrium runtime
//!
//! These are the names used to describe and match capabilities, plus the
//! identity types used throughout the runtime for logging and diagnostics.

use crate::error::DomainError;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering};
use uuid::Uuid;

/// A structural name describing a capability
///
/// Names are records of serializable values: primitives, nested records and
/// arrays of either. A name used for matching is called a *pattern*; a name
/// under which an implementation is bound is a *resolved name*. Key order is
/// irrelevant.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Name(Map<String, Value>);

impl Name {
    /// Create a name from a JSON value, which must be an object
    pub fn new(value: Value) -> Result<Self, DomainError> {
        match value {
            Value::Object(map) => Ok(Self(map)),
            other => Err(DomainError::InvalidName(other.to_string())),
        }
    }

    /// The empty name; as a pattern it matches every candidate
    pub fn empty() -> Self {
        Self::default()
    }

    /// Look up a single field
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Borrow the underlying record
    pub fn fields(&self) -> &Map<String, Value> {
        &self.0
    }

    /// Number of top-level fields
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Check whether this name satisfies `pattern`
    pub fn satisfies(&self, pattern: &Name) -> bool {
        crate::pattern::matches_record(&self.0, &pattern.0)
    }

    /// Convert into a plain JSON value
    pub fn to_value(&self) -> Value {
        Value::Object(self.0.clone())
    }
}

impl From<Map<String, Value>> for Name {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

impl TryFrom<Value> for Name {
    type Error = DomainError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl fmt::Display for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match serde_json::to_string(&self.0) {
            Ok(text) => f.write_str(&text),
            Err(_) => f.write_str("{..}"),
        }
    }
}

/// A name tagged with the argument and result types of the capability
///
/// The tags exist only at compile time. They let callers carry the shape of a
/// capability alongside its pattern, so typed handles do not need the types
/// restated at every call site.
pub struct TypedName<A, R> {
    name: Name,
    _types: PhantomData<fn(A) -> R>,
}

impl<A, R> TypedName<A, R> {
    /// Tag a name with argument type `A` and result type `R`
    pub fn new(name: Name) -> Self {
        Self {
            name,
            _types: PhantomData,
        }
    }

    /// The untyped name
    pub fn name(&self) -> &Name {
        &self.name
    }

    pub fn into_name(self) -> Name {
        self.name
    }
}

impl<A, R> Clone for TypedName<A, R> {
    fn clone(&self) -> Self {
        Self::new(self.name.clone())
    }
}

impl<A, R> fmt::Debug for TypedName<A, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypedName")
            .field("name", &self.name)
            .field("arg", &std::any::type_name::<A>())
            .field("result", &std::any::type_name::<R>())
            .finish()
    }
}

/// Domain identifier
///
/// Every domain gets a globally unique identifier, used to tell domains
/// apart in logs when several share a name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DomainId(pub Uuid);

impl DomainId {
    /// Create a new unique domain ID
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Get the underlying UUID
    pub fn uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for DomainId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for DomainId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "d:{}", &self.0.to_string()[..8])
    }
}

/// Lifecycle identifier
///
/// Monotonically increasing within the process; one per handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LifecycleId(pub u64);

static LIFECYCLE_COUNTER: AtomicU64 = AtomicU64::new(1);

impl LifecycleId {
    /// Create a new lifecycle ID
    pub fn new() -> Self {
        Self(LIFECYCLE_COUNTER.fetch_add(1, Ordering::SeqCst))
    }
}

impl Default for LifecycleId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for LifecycleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "lc:{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_name_rejects_non_records() {
        assert!(Name::new(json!({"svc": "math"})).is_ok());
        assert!(matches!(
            Name::new(json!([1, 2])),
            Err(DomainError::InvalidName(_))
        ));
        assert!(Name::new(json!("svc")).is_err());
        assert!(Name::new(Value::Null).is_err());
    }

    #[test]
    fn test_name_display_is_compact_json() {
        let name = Name::new(json!({"svc": "math"})).unwrap();
        assert_eq!(name.to_string(), r#"{"svc":"math"}"#);
    }

    #[test]
    fn test_name_key_order_irrelevant() {
        let a = Name::new(json!({"svc": "math", "method": "add"})).unwrap();
        let b = Name::new(json!({"method": "add", "svc": "math"})).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_typed_name_keeps_untyped_name() {
        let name = Name::new(json!({"svc": "math"})).unwrap();
        let typed: TypedName<u32, String> = TypedName::new(name.clone());
        assert_eq!(typed.clone().into_name(), name);
    }

    #[test]
    fn test_domain_id_uniqueness() {
        assert_ne!(DomainId::new(), DomainId::new());
    }

    #[test]
    fn test_lifecycle_id_ordering() {
        let l1 = LifecycleId::new();
        let l2 = LifecycleId::new();
        assert!(l1 < l2);
    }
}
