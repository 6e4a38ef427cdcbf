//! Caller-facing handles
//!
//! An [`Atom`] wraps exactly one lifecycle. Calling it drives the lifecycle;
//! releasing it (explicitly or by dropping it) disposes the lifecycle and
//! lets go of any cached implementation.

use crate::context::Context;
use crate::error::AtomResult;
use crate::lifecycle::{Lifecycle, LifecycleStats};
use crate::types::{LifecycleId, Name};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::fmt;
use std::marker::PhantomData;

/// Disposable, callable handle to a capability
///
/// Concurrent calls on one handle are allowed. They share a single
/// resolution and acquisition; the calls themselves run concurrently.
pub struct Atom {
    lifecycle: Lifecycle,
}

impl Atom {
    pub(crate) fn new(lifecycle: Lifecycle) -> Self {
        Self { lifecycle }
    }

    /// Call the capability with `arg`
    pub async fn call(&self, arg: Value) -> AtomResult<Value> {
        self.lifecycle.run(arg).await
    }

    /// The pattern this handle was created for
    pub fn pattern(&self) -> &Name {
        self.lifecycle.pattern()
    }

    pub fn id(&self) -> LifecycleId {
        self.lifecycle.id()
    }

    /// The context this handle resolves and acquires in
    pub fn context(&self) -> &Context {
        self.lifecycle.context()
    }

    /// Dispose the handle
    ///
    /// Idempotent. Later calls fail with `EarlyDisposal`; a call already
    /// past acquisition still completes and its implementation is released
    /// once it returns. Dropping the handle has the same effect.
    pub fn release(&self) {
        self.lifecycle.dispose();
    }

    pub fn is_released(&self) -> bool {
        self.lifecycle.is_disposed()
    }

    /// Whether an implementation is currently cached
    pub fn is_acquired(&self) -> bool {
        self.lifecycle.is_acquired()
    }

    pub fn stats(&self) -> LifecycleStats {
        self.lifecycle.stats()
    }
}

impl fmt::Debug for Atom {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Atom")
            .field("id", &self.id())
            .field("pattern", self.pattern())
            .field("released", &self.is_released())
            .finish()
    }
}

/// Handle with statically known argument and result types
pub struct TypedAtom<A, R> {
    atom: Atom,
    _types: PhantomData<fn(A) -> R>,
}

impl<A, R> TypedAtom<A, R> {
    pub(crate) fn new(atom: Atom) -> Self {
        Self {
            atom,
            _types: PhantomData,
        }
    }

    /// The untyped handle
    pub fn untyped(&self) -> &Atom {
        &self.atom
    }

    pub fn into_untyped(self) -> Atom {
        self.atom
    }

    pub fn release(&self) {
        self.atom.release();
    }
}

impl<A, R> TypedAtom<A, R>
where
    A: Serialize,
    R: DeserializeOwned,
{
    /// Call the capability; argument and result go through serde
    pub async fn call(&self, arg: &A) -> AtomResult<R> {
        let arg = serde_json::to_value(arg)?;
        let result = self.atom.call(arg).await?;
        Ok(serde_json::from_value(result)?)
    }
}

impl<A, R> fmt::Debug for TypedAtom<A, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("TypedAtom").field(&self.atom).finish()
    }
}
