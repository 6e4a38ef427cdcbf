//! Structural pattern matching over names
//!
//! A pattern matches a candidate when every key of the pattern is present in
//! the candidate with a matching value:
//! - records recurse with the same subset rule
//! - arrays must have equal length and match position by position
//! - numbers compare by value, so `1` and `1.0` are equal
//! - everything else compares by equality
//!
//! Keys present only in the candidate are ignored, so the empty pattern
//! matches everything. Matching is not symmetric.

use crate::types::Name;
use serde_json::{Map, Number, Value};

/// Check whether `candidate` satisfies `pattern`
pub fn matches(candidate: &Name, pattern: &Name) -> bool {
    matches_record(candidate.fields(), pattern.fields())
}

pub(crate) fn matches_record(candidate: &Map<String, Value>, pattern: &Map<String, Value>) -> bool {
    pattern.iter().all(|(key, expected)| {
        candidate
            .get(key)
            .is_some_and(|actual| matches_value(actual, expected))
    })
}

/// Match a single value position
///
/// This is the rule applied at every level below the top-level record.
pub fn matches_value(candidate: &Value, pattern: &Value) -> bool {
    match (pattern, candidate) {
        (Value::Object(expected), Value::Object(actual)) => matches_record(actual, expected),
        (Value::Object(_), _) => false,
        (Value::Array(expected), Value::Array(actual)) => {
            expected.len() == actual.len()
                && expected
                    .iter()
                    .zip(actual)
                    .all(|(e, a)| matches_value(a, e))
        }
        (Value::Array(_), _) => false,
        (Value::Number(expected), Value::Number(actual)) => numbers_equal(expected, actual),
        (scalar, actual) => scalar == actual,
    }
}

fn numbers_equal(a: &Number, b: &Number) -> bool {
    if let (Some(a), Some(b)) = (a.as_i64(), b.as_i64()) {
        return a == b;
    }
    if let (Some(a), Some(b)) = (a.as_u64(), b.as_u64()) {
        return a == b;
    }
    match (a.as_f64(), b.as_f64()) {
        (Some(a), Some(b)) => a == b,
        _ => false,
    }
}
