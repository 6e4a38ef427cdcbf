//! Elements and the implementations they produce
//!
//! An [`Element`] is a capability factory bound under a name. When a
//! lifecycle needs to call it, the element produces an [`AtomImpl`]: an
//! async callable bound to the requesting context, plus a release function
//! for any scoped resources the implementation holds.

use crate::context::Context;
use crate::error::{AtomError, AtomResult, BoxError};
use crate::types::Name;
use futures_util::future::{self, BoxFuture, FutureExt};
use parking_lot::Mutex;
use serde_json::Value;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

/// Future returned by an implementation call
pub type AtomFuture = BoxFuture<'static, AtomResult<Value>>;

/// Shared async callable taking the child context and the argument
pub type AtomFn = Arc<dyn Fn(Context, Value) -> AtomFuture + Send + Sync>;

/// Release function for the resources held by an implementation
pub type ReleaseFn = Box<dyn FnOnce() -> Result<(), BoxError> + Send>;

/// Erase an async function into an [`AtomFn`]
pub fn atom_fn<F, Fut>(f: F) -> AtomFn
where
    F: Fn(Context, Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = AtomResult<Value>> + Send + 'static,
{
    Arc::new(move |ctx, arg| f(ctx, arg).boxed())
}

/// Trait for capability factories
///
/// Elements are stateless from the caller's view but may own internal
/// state (a connection pool, a cache). That state belongs to the element,
/// never to a single lifecycle.
///
/// # Example
///
/// ```ignore
/// use atrium::{AtomImpl, Context, Element, Name, AtomResult};
/// use futures_util::future::{BoxFuture, FutureExt};
///
/// struct Echo;
///
/// impl Element for Echo {
///     fn get_atom<'a>(
///         &'a self,
///         pattern: &'a Name,
///         _context: &'a Context,
///     ) -> BoxFuture<'a, AtomResult<AtomImpl>> {
///         let atom = AtomImpl::new(pattern.clone(), |_ctx, arg| async move { Ok(arg) });
///         async move { Ok(atom) }.boxed()
///     }
/// }
/// ```
pub trait Element: Send + Sync {
    /// Produce an implementation for `pattern` bound to `context`
    fn get_atom<'a>(
        &'a self,
        pattern: &'a Name,
        context: &'a Context,
    ) -> BoxFuture<'a, AtomResult<AtomImpl>>;

    /// Get a type name for debugging/logging
    fn type_name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }
}

/// A concrete, context-bound implementation
///
/// The release function runs at most once: on an explicit [`release`],
/// or when the implementation is dropped. Release failures are logged and
/// never surface to callers.
///
/// [`release`]: AtomImpl::release
pub struct AtomImpl {
    call: AtomFn,
    release: Mutex<Option<ReleaseFn>>,
    pattern: Name,
}

impl AtomImpl {
    /// Create an implementation with no scoped resources
    pub fn new<F, Fut>(pattern: Name, f: F) -> Self
    where
        F: Fn(Context, Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = AtomResult<Value>> + Send + 'static,
    {
        Self::from_fn(pattern, atom_fn(f))
    }

    /// Create an implementation from an already erased callable
    pub fn from_fn(pattern: Name, call: AtomFn) -> Self {
        Self {
            call,
            release: Mutex::new(None),
            pattern,
        }
    }

    /// Attach a release function
    pub fn with_release<F>(self, release: F) -> Self
    where
        F: FnOnce() -> Result<(), BoxError> + Send + 'static,
    {
        *self.release.lock() = Some(Box::new(release));
        self
    }

    /// The pattern this implementation was produced for
    pub fn pattern(&self) -> &Name {
        &self.pattern
    }

    /// Invoke the implementation
    pub fn invoke(&self, context: Context, arg: Value) -> AtomFuture {
        (self.call)(context, arg)
    }

    /// Run the release function if it has not run yet
    ///
    /// Returns `Ok(true)` when this call performed the release.
    pub fn release(&self) -> Result<bool, BoxError> {
        let release = self.release.lock().take();
        match release {
            Some(release) => release().map(|()| true),
            None => Ok(false),
        }
    }

    pub fn is_released(&self) -> bool {
        self.release.lock().is_none()
    }
}

impl Drop for AtomImpl {
    fn drop(&mut self) {
        if let Err(error) = self.release() {
            tracing::warn!(pattern = %self.pattern, %error, "Failed to release implementation");
        }
    }
}

impl fmt::Debug for AtomImpl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AtomImpl")
            .field("pattern", &self.pattern)
            .field("released", &self.is_released())
            .finish()
    }
}

/// Element wrapping a plain async function
///
/// `get_atom` ignores the pattern and hands out the function as-is with
/// a no-op release.
pub struct FnElement {
    call: AtomFn,
}

impl FnElement {
    pub fn new<F, Fut>(f: F) -> Self
    where
        F: Fn(Context, Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = AtomResult<Value>> + Send + 'static,
    {
        Self { call: atom_fn(f) }
    }
}

impl From<AtomFn> for FnElement {
    fn from(call: AtomFn) -> Self {
        Self { call }
    }
}

impl Element for FnElement {
    fn get_atom<'a>(
        &'a self,
        pattern: &'a Name,
        _context: &'a Context,
    ) -> BoxFuture<'a, AtomResult<AtomImpl>> {
        future::ready(Ok(AtomImpl::from_fn(pattern.clone(), self.call.clone()))).boxed()
    }

    fn type_name(&self) -> &'static str {
        "FnElement"
    }
}

/// Adapt a typed async function into an untyped one
///
/// The argument is deserialized from JSON and the result serialized back;
/// codec failures are fatal.
pub(crate) fn typed_fn<A, R, F, Fut>(f: F) -> AtomFn
where
    A: serde::de::DeserializeOwned + Send + 'static,
    R: serde::Serialize + Send + 'static,
    F: Fn(Context, A) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = AtomResult<R>> + Send + 'static,
{
    let f = Arc::new(f);
    atom_fn(move |ctx, arg| {
        let f = f.clone();
        async move {
            let arg: A = serde_json::from_value(arg).map_err(AtomError::Codec)?;
            let result = f(ctx, arg).await?;
            Ok(serde_json::to_value(result)?)
        }
    })
}
