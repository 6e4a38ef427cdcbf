//! Atrium - pattern-addressed resource resolution and invocation
//!
//! Callers describe the capability they want with a partial structural
//! pattern. The runtime resolves the pattern to a bound implementation,
//! acquires a disposable handle to it, invokes it, and releases it again,
//! retrying transient failures along the way.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                           Domain                             │
//! │  ┌──────────────┐   ┌──────────────────┐   ┌─────────────┐   │
//! │  │   Registry   │◀──│ RegistryResolver │   │   Ingress   │   │
//! │  │ (name, elem) │   └────────▲─────────┘   └──────┬──────┘   │
//! │  └──────────────┘            │                    │          │
//! │                        ┌─────┴─────┐   root ctx   │          │
//! │                        │  Context  │◀─────────────┘          │
//! │                        └─────┬─────┘                         │
//! │                         find │                               │
//! │                        ┌─────▼─────┐                         │
//! │                        │   Atom    │── call ──▶ Lifecycle     │
//! │                        └───────────┘   resolve → acquire →   │
//! │                                        invoke (child ctx)    │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Core Concepts
//!
//! ## Names and patterns
//!
//! A [`Name`] is a record of JSON values. Elements are bound under names;
//! handles are requested with patterns, and a pattern matches a name when
//! every key of the pattern matches (see [`pattern::matches`]).
//!
//! ## Domains and contexts
//!
//! A [`Domain`] owns the bindings. A [`Context`] is the environment one call
//! runs in: its resolver, its [`TraceVector`], and a logging span. Every
//! invocation receives a fresh child context whose trace has one more
//! domain-call event.
//!
//! ## Handles and lifecycles
//!
//! [`Context::find`] and [`Ingress::externalize`] return an [`Atom`]. Each
//! handle owns one lifecycle that caches the resolved element and acquired
//! implementation between calls, clears the cache on any failure, retries
//! transient failures under the domain's [`RetryPolicy`], and releases
//! everything when the handle is released or dropped.
//!
//! # Example
//!
//! ```rust
//! use atrium::{AtomError, Domain, Name};
//! use serde_json::json;
//!
//! # tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(async {
//! let domain = Domain::new("example");
//! let add = Name::new(json!({"svc": "math", "method": "add"})).unwrap();
//!
//! domain.bind_fn(add.clone(), |_ctx, arg| async move {
//!     let a = arg["a"].as_i64().ok_or_else(|| AtomError::fatal("missing a"))?;
//!     let b = arg["b"].as_i64().ok_or_else(|| AtomError::fatal("missing b"))?;
//!     Ok(json!({ "sum": a + b }))
//! });
//!
//! let handle = domain.ingress().externalize(add);
//! assert_eq!(handle.call(json!({"a": 1, "b": 2})).await.unwrap(), json!({"sum": 3}));
//! handle.release();
//! # });
//! ```

// Modules
pub mod atom;
pub mod config;
pub mod context;
pub mod domain;
pub mod element;
pub mod error;
pub mod lifecycle;
pub mod pattern;
pub mod registry;
pub mod trace;
pub mod types;

// Re-exports for convenience
pub use atom::{Atom, TypedAtom};
pub use config::{ConfigError, DomainConfig, RetryConfig};
pub use context::Context;
pub use domain::{Domain, DomainBuilder, Egress, Ingress};
pub use element::{AtomFn, AtomImpl, Element, FnElement};
pub use error::{AtomError, AtomResult, BoxError, DomainError, ErrorKind};
pub use lifecycle::{BackoffPolicy, LifecycleStats, RetryController, RetryPolicy};
pub use pattern::matches;
pub use registry::{Registration, Registry, RegistryResolver, Resolver};
pub use trace::{TraceEvent, TraceVector};
pub use types::{DomainId, LifecycleId, Name, TypedName};
