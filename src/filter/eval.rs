//! In-process evaluation of filters against flat records.
//!
//! Used by the in-memory adapter and by tests; storage adapters translate
//! filters into their own query language instead.

use std::cmp::Ordering;

use serde_json::{Map, Value};

use super::predicate::{Condition, Filter};

impl Filter {
    /// Whether `record` satisfies every condition. Missing fields read as `null`.
    pub fn matches(&self, record: &Map<String, Value>) -> bool {
        self.iter().all(|(field, condition)| {
            condition.matches(record.get(field).unwrap_or(&Value::Null))
        })
    }
}

impl Condition {
    pub fn matches(&self, value: &Value) -> bool {
        match self {
            Condition::Eq(expected) => values_equal(value, expected),
            Condition::Is(expected) => match expected {
                Value::Null => value.is_null(),
                _ => value == expected,
            },
            Condition::In(candidates) => candidates.iter().any(|c| values_equal(value, c)),
            Condition::GreaterThan(bound) => compare(value, bound) == Some(Ordering::Greater),
            Condition::GreaterThanOrEqual(bound) => matches!(
                compare(value, bound),
                Some(Ordering::Greater | Ordering::Equal)
            ),
            Condition::LessThan(bound) => compare(value, bound) == Some(Ordering::Less),
            Condition::LessThanOrEqual(bound) => {
                matches!(compare(value, bound), Some(Ordering::Less | Ordering::Equal))
            }
            Condition::Between(low, high) => {
                matches!(compare(value, low), Some(Ordering::Greater | Ordering::Equal))
                    && matches!(compare(value, high), Some(Ordering::Less | Ordering::Equal))
            }
            Condition::Like(pattern) => match value {
                Value::String(s) => like(s, pattern),
                _ => false,
            },
            Condition::And(members) => members.iter().all(|m| m.matches(value)),
            Condition::Or(members) => members.iter().any(|m| m.matches(value)),
            Condition::Not(inner) => !inner.matches(value),
        }
    }
}

/// Equality that treats `1` and `1.0` as the same number.
pub fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => match (x.as_f64(), y.as_f64()) {
            (Some(x), Some(y)) => x == y,
            _ => x == y,
        },
        _ => a == b,
    }
}

/// Ordering between comparable scalars; `None` for mismatched kinds or nulls.
pub fn compare(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

fn like(text: &str, pattern: &str) -> bool {
    let text: Vec<char> = text.chars().collect();
    let pattern: Vec<char> = pattern.chars().collect();
    like_from(&text, &pattern)
}

fn like_from(text: &[char], pattern: &[char]) -> bool {
    match pattern.split_first() {
        None => text.is_empty(),
        Some((&'%', rest)) => (0..=text.len()).any(|skip| like_from(&text[skip..], rest)),
        Some((&'_', rest)) => !text.is_empty() && like_from(&text[1..], rest),
        Some((c, rest)) => text.first() == Some(c) && like_from(&text[1..], rest),
    }
}
