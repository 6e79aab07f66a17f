//! Condition evaluation.
//!
//! Conditions address the decision request as a JSON document with three
//! roots: `subject`, `resource` and `context`. A missing or null field
//! matches only `neq` and `not_in`.

use serde_json::Value;

use crate::observability::metrics;
use crate::policy::types::{Condition, Operator};

const ROOTS: [&str; 3] = ["subject", "resource", "context"];

/// Walk a dotted path into `document`. Null counts as absent.
pub fn resolve_field<'a>(document: &'a Value, path: &str) -> Option<&'a Value> {
    let mut segments = path.split('.');
    let root = segments.next()?;
    if !ROOTS.contains(&root) {
        return None;
    }

    let mut current = document.get(root)?;
    for segment in segments {
        current = match current {
            Value::Object(map) => map.get(segment)?,
            Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }

    if current.is_null() {
        None
    } else {
        Some(current)
    }
}

/// Evaluate one condition against the request document.
pub fn evaluate_condition(document: &Value, condition: &Condition) -> bool {
    let field = match resolve_field(document, &condition.field) {
        Some(v) => v,
        None => return matches!(condition.operator, Operator::Neq | Operator::NotIn),
    };
    let value = &condition.value;

    match &condition.operator {
        Operator::Eq => loose_eq(field, value),
        Operator::Neq => !loose_eq(field, value),
        Operator::In => value
            .as_array()
            .is_some_and(|items| items.iter().any(|item| strict_eq(item, field))),
        Operator::NotIn => value
            .as_array()
            .is_some_and(|items| !items.iter().any(|item| strict_eq(item, field))),
        Operator::Contains => field
            .as_array()
            .is_some_and(|items| items.iter().any(|item| strict_eq(item, value))),
        Operator::StartsWith => match (field.as_str(), value.as_str()) {
            (Some(f), Some(v)) => f.starts_with(v),
            _ => false,
        },
        Operator::EndsWith => match (field.as_str(), value.as_str()) {
            (Some(f), Some(v)) => f.ends_with(v),
            _ => false,
        },
        Operator::Gt => compare_numbers(field, value, |a, b| a > b),
        Operator::Lt => compare_numbers(field, value, |a, b| a < b),
        Operator::Gte => compare_numbers(field, value, |a, b| a >= b),
        Operator::Lte => compare_numbers(field, value, |a, b| a <= b),
        Operator::Unknown(name) => {
            tracing::warn!(
                field = %condition.field,
                operator = %name,
                "Unknown condition operator in rule set; condition evaluates false"
            );
            metrics::record_rule_anomaly("unknown_operator");
            false
        }
    }
}

/// Conjunctive match: every condition in the list must hold.
///
/// An empty list is vacuously true; callers decide whether an empty list is
/// meaningful for them.
pub fn all_conditions_match(document: &Value, conditions: &[Condition]) -> bool {
    conditions.iter().all(|c| evaluate_condition(document, c))
}

fn compare_numbers(field: &Value, value: &Value, cmp: impl Fn(f64, f64) -> bool) -> bool {
    match (field, value) {
        (Value::Number(a), Value::Number(b)) => match (a.as_f64(), b.as_f64()) {
            (Some(a), Some(b)) => cmp(a, b),
            _ => false,
        },
        _ => false,
    }
}

/// Same-type equality; numbers compare by value (`1 == 1.0`).
fn strict_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        _ => a == b,
    }
}

/// Loose equality: strings, numbers and booleans compare after numeric
/// coercion (`"1" == 1`, `true == 1`), other values compare structurally.
fn loose_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Null, Value::Null) => true,
        (Value::Null, _) | (_, Value::Null) => false,
        (Value::String(x), Value::String(y)) => x == y,
        (Value::Bool(x), Value::Bool(y)) => x == y,
        (Value::Number(_), Value::Number(_)) => strict_eq(a, b),
        (Value::Array(_), _) | (_, Value::Array(_)) | (Value::Object(_), _) | (_, Value::Object(_)) => {
            a == b
        }
        _ => match (as_number(a), as_number(b)) {
            (Some(x), Some(y)) => x == y,
            _ => false,
        },
    }
}

fn as_number(v: &Value) -> Option<f64> {
    match v {
        Value::Number(n) => n.as_f64(),
        Value::Bool(true) => Some(1.0),
        Value::Bool(false) => Some(0.0),
        Value::String(s) => {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                Some(0.0)
            } else {
                trimmed.parse::<f64>().ok()
            }
        }
        _ => None,
    }
}
