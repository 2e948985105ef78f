//! Comparison facets and loose-match semantics.
//!
//! Alongside its serialized JSON form, every attribute is projected into a
//! row of facets: cheap scalar columns a backend can test natively instead
//! of parsing JSON per row. The in-process evaluator answers the same
//! questions through [`loose_matches`], [`loose_compare`], and
//! [`contains_loose`], and the facets are derived from those functions, so
//! a query answered natively and one answered in process always agree.

use std::cmp::Ordering;

use crate::reference::Guid;
use crate::value::Value;

/// Per-attribute comparison projections stored alongside the serialized
/// value.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Facets {
    /// Value is truthy (see [`truthiness`]).
    pub truthy: bool,
    /// Value loosely equals 1 (`true`, `1`, `1.0`).
    pub eq_one: bool,
    /// Value loosely equals 0 (`false`, `0`, `0.0`).
    pub eq_zero: bool,
    /// Value loosely equals -1 (`-1`, `-1.0`).
    pub eq_neg_one: bool,
    /// Value is an empty string, array, or map.
    pub eq_empty: bool,
    /// String content, when the value is a string.
    pub string: Option<String>,
    /// Exact integer value, when the value is an integer.
    pub int_val: Option<i64>,
    /// Numeric value, when the value is an integer or a float. Booleans
    /// are deliberately excluded so ordered comparisons never match them.
    pub float_val: Option<f64>,
    /// Value is an integer, as opposed to a float.
    pub is_int: bool,
    /// Guids of every reference reachable inside the value, deduplicated,
    /// in depth-first order.
    pub refs: Vec<Guid>,
}

impl Facets {
    /// Derive the facet row for a value.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn of(value: &Value) -> Facets {
        Facets {
            truthy: truthiness(value),
            eq_one: loose_eq_small(value, 1),
            eq_zero: loose_eq_small(value, 0),
            eq_neg_one: loose_eq_small(value, -1),
            eq_empty: is_empty_value(value),
            string: value.as_str().map(str::to_string),
            int_val: value.as_int(),
            float_val: numeric(value),
            is_int: matches!(value, Value::Int(_)),
            refs: collect_refs(value),
        }
    }
}

/// Truthiness of a value.
///
/// False for null, `false`, zero of either numeric type, the empty string,
/// the empty array, and the empty map; true for everything else, including
/// every reference.
pub fn truthiness(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Int(n) => *n != 0,
        Value::Float(f) => *f != 0.0,
        Value::Str(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Map(m) => !m.is_empty(),
        Value::Ref(_) => true,
    }
}

/// Numeric view of a value. Integers and floats only; booleans do not
/// participate in ordered comparisons.
#[allow(clippy::cast_precision_loss)]
pub fn numeric(value: &Value) -> Option<f64> {
    match value {
        Value::Int(n) => Some(*n as f64),
        Value::Float(f) => Some(*f),
        _ => None,
    }
}

fn is_empty_value(value: &Value) -> bool {
    match value {
        Value::Str(s) => s.is_empty(),
        Value::Array(a) => a.is_empty(),
        Value::Map(m) => m.is_empty(),
        _ => false,
    }
}

/// Loose equality against the small integers -1, 0, and 1, which have
/// dedicated facet columns. Booleans participate here: `true` counts as 1
/// and `false` as 0.
#[allow(clippy::cast_precision_loss)]
fn loose_eq_small(value: &Value, n: i64) -> bool {
    match value {
        Value::Bool(true) => n == 1,
        Value::Bool(false) => n == 0,
        Value::Int(v) => *v == n,
        Value::Float(v) => *v == n as f64,
        _ => false,
    }
}

/// Collect every reference guid reachable inside a value, deduplicated,
/// in depth-first order.
pub fn collect_refs(value: &Value) -> Vec<Guid> {
    let mut out = Vec::new();
    walk_refs(value, &mut out);
    out
}

fn walk_refs(value: &Value, out: &mut Vec<Guid>) {
    match value {
        Value::Ref(r) => {
            if !out.contains(&r.guid) {
                out.push(r.guid);
            }
        }
        Value::Array(items) => {
            for item in items {
                walk_refs(item, out);
            }
        }
        Value::Map(entries) => {
            for entry in entries.values() {
                walk_refs(entry, out);
            }
        }
        _ => {}
    }
}

/// Loose equality between a stored value and a query argument.
///
/// The argument's type picks the rule:
///
/// - null: the stored value is null.
/// - bool `b`: the stored value's [`truthiness`] equals `b`.
/// - 1, 0, or -1 (integer or float): the matching small-equality facet,
///   so `true` matches 1 and `false` matches 0.
/// - any other number: the stored value is numeric and equal. Two
///   integers compare exactly; mixed integer and float compare as f64.
/// - string: the stored value is the identical string. No cross-type
///   coercion.
/// - array, map, or reference: deep structural equality, with numeric
///   leaves still comparing loosely.
#[allow(clippy::cast_precision_loss)]
pub fn loose_matches(stored: &Value, arg: &Value) -> bool {
    match arg {
        Value::Null => stored.is_null(),
        Value::Bool(b) => truthiness(stored) == *b,
        Value::Int(n) => match *n {
            1 | 0 | -1 => loose_eq_small(stored, *n),
            _ => match stored {
                Value::Int(m) => m == n,
                Value::Float(f) => *f == *n as f64,
                _ => false,
            },
        },
        Value::Float(f) => {
            if *f == 1.0 || *f == 0.0 || *f == -1.0 {
                loose_eq_small(stored, *f as i64)
            } else {
                numeric(stored).map_or(false, |v| v == *f)
            }
        }
        Value::Str(s) => stored.as_str() == Some(s.as_str()),
        Value::Array(_) | Value::Map(_) | Value::Ref(_) => deep_loose_eq(stored, arg),
    }
}

#[allow(clippy::cast_precision_loss)]
fn deep_loose_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Array(x), Value::Array(y)) => {
            x.len() == y.len() && x.iter().zip(y.iter()).all(|(av, bv)| deep_loose_eq(av, bv))
        }
        (Value::Map(x), Value::Map(y)) => {
            x.len() == y.len()
                && x.iter()
                    .zip(y.iter())
                    .all(|((ak, av), (bk, bv))| ak == bk && deep_loose_eq(av, bv))
        }
        (Value::Int(x), Value::Float(y)) | (Value::Float(y), Value::Int(x)) => *x as f64 == *y,
        _ => a == b,
    }
}

/// Ordered comparison between a stored value and a query argument.
///
/// Defined only when both sides are numeric; `None` otherwise, so booleans
/// and strings never satisfy an ordered clause. Two integers compare
/// exactly; mixed integer and float compare as f64.
#[allow(clippy::cast_precision_loss)]
pub fn loose_compare(stored: &Value, arg: &Value) -> Option<Ordering> {
    if let (Value::Int(a), Value::Int(b)) = (stored, arg) {
        return Some(a.cmp(b));
    }
    let a = numeric(stored)?;
    let b = numeric(arg)?;
    a.partial_cmp(&b)
}

/// Array containment: the stored value is an array with at least one
/// element that loosely matches the argument.
pub fn contains_loose(stored: &Value, arg: &Value) -> bool {
    stored
        .as_array()
        .map_or(false, |items| items.iter().any(|item| loose_matches(item, arg)))
}
