//! Call-path trace vectors
//!
//! Each context carries an immutable, append-only record of the calls that
//! led to it. Extending a vector produces a new one and leaves the parent
//! untouched, so sibling branches never observe each other's events.

use crate::types::Name;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// A single hop recorded in a trace vector
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum TraceEvent {
    /// A call entered the domain through an ingress portal
    IngressCall,
    /// A call was dispatched to the implementation bound under `name`
    DomainCall { name: Name },
    /// A call returned through an ingress portal
    IngressReturn,
    /// A call left the domain through an egress portal
    EgressCall,
    /// A call came back through an egress portal
    EgressReturn,
}

impl TraceEvent {
    pub fn domain_call(name: Name) -> Self {
        TraceEvent::DomainCall { name }
    }
}

impl fmt::Display for TraceEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TraceEvent::IngressCall => f.write_str("ingress-call"),
            TraceEvent::DomainCall { name } => write!(f, "domain-call {}", name),
            TraceEvent::IngressReturn => f.write_str("ingress-return"),
            TraceEvent::EgressCall => f.write_str("egress-call"),
            TraceEvent::EgressReturn => f.write_str("egress-return"),
        }
    }
}

/// Immutable ordered sequence of trace events
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TraceVector {
    events: Arc<[TraceEvent]>,
}

impl TraceVector {
    /// An empty trace
    pub fn new() -> Self {
        Self::default()
    }

    /// Return a new vector with `event` appended
    pub fn extend(&self, event: TraceEvent) -> Self {
        let mut events = Vec::with_capacity(self.events.len() + 1);
        events.extend_from_slice(&self.events);
        events.push(event);
        Self {
            events: events.into(),
        }
    }

    pub fn events(&self) -> &[TraceEvent] {
        &self.events
    }

    pub fn iter(&self) -> impl Iterator<Item = &TraceEvent> {
        self.events.iter()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn last(&self) -> Option<&TraceEvent> {
        self.events.last()
    }

    /// Count the domain-call hops in this trace
    pub fn depth(&self) -> usize {
        self.events
            .iter()
            .filter(|e| matches!(e, TraceEvent::DomainCall { .. }))
            .count()
    }
}

impl FromIterator<TraceEvent> for TraceVector {
    fn from_iter<I: IntoIterator<Item = TraceEvent>>(iter: I) -> Self {
        Self {
            events: iter.into_iter().collect(),
        }
    }
}

impl fmt::Display for TraceVector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, event) in self.events.iter().enumerate() {
            if i > 0 {
                f.write_str(" -> ")?;
            }
            write!(f, "{}", event)?;
        }
        Ok(())
    }
}
