//! Row filters and value ordering.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::table::Row;

/// Predicate over a row.
///
/// A missing column reads as NULL.
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    /// Matches every row
    All,
    Eq(String, Value),
    Ne(String, Value),
    Gt(String, Value),
    Gte(String, Value),
    Lt(String, Value),
    Lte(String, Value),
    In(String, Vec<Value>),
    NotIn(String, Vec<Value>),
    /// SQL-style pattern with `%` and `_` wildcards, case-insensitive
    Like(String, String),
    /// Substring for strings, membership for arrays
    Contains(String, Value),
    IsNull(String),
    IsNotNull(String),
    And(Vec<Filter>),
    Or(Vec<Filter>),
    Not(Box<Filter>),
}

impl Filter {
    /// Equality shorthand.
    pub fn eq(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::Eq(column.into(), value.into())
    }

    /// Conjunction that collapses trivial cases.
    pub fn and(filters: Vec<Filter>) -> Self {
        let mut filters: Vec<Filter> = filters
            .into_iter()
            .filter(|f| !matches!(f, Filter::All))
            .collect();
        match filters.len() {
            0 => Filter::All,
            1 => filters.remove(0),
            _ => Filter::And(filters),
        }
    }

    /// Evaluates the filter against a row.
    pub fn matches(&self, row: &Row) -> bool {
        let get = |column: &str| row.get(column).unwrap_or(&Value::Null);
        match self {
            Filter::All => true,
            Filter::Eq(c, v) => values_equal(get(c), v),
            Filter::Ne(c, v) => !values_equal(get(c), v),
            Filter::Gt(c, v) => ordered(get(c), v, |o| o == Ordering::Greater),
            Filter::Gte(c, v) => ordered(get(c), v, |o| o != Ordering::Less),
            Filter::Lt(c, v) => ordered(get(c), v, |o| o == Ordering::Less),
            Filter::Lte(c, v) => ordered(get(c), v, |o| o != Ordering::Greater),
            Filter::In(c, vs) => vs.iter().any(|v| values_equal(get(c), v)),
            Filter::NotIn(c, vs) => !vs.iter().any(|v| values_equal(get(c), v)),
            Filter::Like(c, pattern) => get(c)
                .as_str()
                .is_some_and(|s| like_match(&s.to_lowercase(), &pattern.to_lowercase())),
            Filter::Contains(c, v) => match get(c) {
                Value::String(s) => v.as_str().is_some_and(|needle| s.contains(needle)),
                Value::Array(items) => items.iter().any(|item| values_equal(item, v)),
                _ => false,
            },
            Filter::IsNull(c) => get(c).is_null(),
            Filter::IsNotNull(c) => !get(c).is_null(),
            Filter::And(fs) => fs.iter().all(|f| f.matches(row)),
            Filter::Or(fs) => fs.iter().any(|f| f.matches(row)),
            Filter::Not(f) => !f.matches(row),
        }
    }
}

/// Comparisons against NULL never match, as in SQL.
fn ordered(left: &Value, right: &Value, check: impl Fn(Ordering) -> bool) -> bool {
    if left.is_null() || right.is_null() {
        return false;
    }
    check(compare_values(left, right))
}

/// Equality that treats `1` and `1.0` as the same number.
pub fn values_equal(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Number(a), Value::Number(b)) => match (a.as_i64(), b.as_i64()) {
            (Some(x), Some(y)) => x == y,
            _ => a.as_f64() == b.as_f64(),
        },
        _ => left == right,
    }
}

fn type_rank(value: &Value) -> u8 {
    match value {
        Value::Null => 0,
        Value::Bool(_) => 1,
        Value::Number(_) => 2,
        Value::String(_) => 3,
        Value::Array(_) => 4,
        Value::Object(_) => 5,
    }
}

/// Total order over JSON values: null < bool < number < string < array < object.
pub fn compare_values(left: &Value, right: &Value) -> Ordering {
    match (left, right) {
        (Value::Bool(a), Value::Bool(b)) => a.cmp(b),
        (Value::Number(a), Value::Number(b)) => match (a.as_i64(), b.as_i64()) {
            (Some(x), Some(y)) => x.cmp(&y),
            _ => a
                .as_f64()
                .unwrap_or(0.0)
                .partial_cmp(&b.as_f64().unwrap_or(0.0))
                .unwrap_or(Ordering::Equal),
        },
        (Value::String(a), Value::String(b)) => a.cmp(b),
        (Value::Array(a), Value::Array(b)) => a.len().cmp(&b.len()),
        _ => type_rank(left).cmp(&type_rank(right)),
    }
}

fn like_match(text: &str, pattern: &str) -> bool {
    let text: Vec<char> = text.chars().collect();
    let pattern: Vec<char> = pattern.chars().collect();
    let (mut t, mut p) = (0usize, 0usize);
    let mut backtrack: Option<(usize, usize)> = None;

    while t < text.len() {
        if p < pattern.len() && (pattern[p] == '_' || pattern[p] == text[t]) {
            t += 1;
            p += 1;
        } else if p < pattern.len() && pattern[p] == '%' {
            backtrack = Some((p, t));
            p += 1;
        } else if let Some((bp, bt)) = backtrack {
            p = bp + 1;
            t = bt + 1;
            backtrack = Some((bp, bt + 1));
        } else {
            return false;
        }
    }
    while p < pattern.len() && pattern[p] == '%' {
        p += 1;
    }
    p == pattern.len()
}

/// Sort direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    #[default]
    Asc,
    Desc,
}

/// Sorts rows by the given keys, stable for equal keys.
pub fn sort_rows(rows: &mut [Row], order: &[(String, Direction)]) {
    if order.is_empty() {
        return;
    }
    rows.sort_by(|a, b| {
        for (column, direction) in order {
            let left = a.get(column).unwrap_or(&Value::Null);
            let right = b.get(column).unwrap_or(&Value::Null);
            let ordering = compare_values(left, right);
            let ordering = match direction {
                Direction::Asc => ordering,
                Direction::Desc => ordering.reverse(),
            };
            if ordering != Ordering::Equal {
                return ordering;
            }
        }
        Ordering::Equal
    });
}
