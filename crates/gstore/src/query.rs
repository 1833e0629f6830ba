//! Declarative query expressions.
//!
//! A query is a JSON object whose keys are field names and whose values are
//! either literals (equality) or strings starting with a comparison operator:
//!
//! ```text
//! { "Name": "Marcus", "Born": "< 1500", "Died": ">= 100", "Tag": "!= x" }
//! ```
//!
//! All conditions must hold for a record to match. A `null` literal matches a
//! missing or `null` field.

use core::{cmp::Ordering, fmt};

use serde::Deserialize;
use serde_json::Value;

use crate::{Error, Record, Result};

/// Comparison operator of a single condition.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Op {
    Eq,
    Ne,
    Lt,
    Gt,
    Le,
    Ge,
    IsNull,
}

impl Op {
    /// SQL spelling of the operator.
    pub const fn as_sql(self) -> &'static str {
        match self {
            Self::Eq => "=",
            Self::Ne => "<>",
            Self::Lt => "<",
            Self::Gt => ">",
            Self::Le => "<=",
            Self::Ge => ">=",
            Self::IsNull => "IS NULL",
        }
    }

    /// Splits a leading operator off `literal`, longest spelling first.
    fn parse_prefix(literal: &str) -> Option<(Self, &str)> {
        const PREFIXES: [(&str, Op); 5] = [
            ("<=", Op::Le),
            (">=", Op::Ge),
            ("!=", Op::Ne),
            ("<", Op::Lt),
            (">", Op::Gt),
        ];
        PREFIXES
            .iter()
            .find_map(|(prefix, op)| literal.strip_prefix(prefix).map(|rest| (*op, rest.trim())))
    }
}

impl fmt::Display for Op {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_sql())
    }
}

/// A single `field <op> value` condition.
#[derive(Clone, Debug, PartialEq)]
pub struct Condition {
    pub field: String,
    pub op: Op,
    /// The operand. For [`Op::IsNull`] this is `null`.
    pub value: Value,
}

impl Condition {
    pub fn parse(field: impl Into<String>, literal: Value) -> Self {
        let field = field.into();
        match literal {
            Value::Null => Self {
                field,
                op: Op::IsNull,
                value: Value::Null,
            },
            Value::String(s) => match Op::parse_prefix(&s) {
                Some((op, operand)) => Self {
                    field,
                    op,
                    value: Value::String(operand.to_owned()),
                },
                None => Self {
                    field,
                    op: Op::Eq,
                    value: Value::String(s),
                },
            },
            value => Self {
                field,
                op: Op::Eq,
                value,
            },
        }
    }

    pub fn matches(&self, record: &Record) -> bool {
        let actual = record.get(&self.field);
        if self.op == Op::IsNull {
            return matches!(actual, None | Some(Value::Null));
        }
        let Some(actual) = actual.filter(|v| !v.is_null()) else {
            return false;
        };
        let Some(ord) = compare_operand(actual, &self.value) else {
            return self.op == Op::Ne;
        };
        match self.op {
            Op::Eq => ord.is_eq(),
            Op::Ne => ord.is_ne(),
            Op::Lt => ord.is_lt(),
            Op::Gt => ord.is_gt(),
            Op::Le => ord.is_le(),
            Op::Ge => ord.is_ge(),
            Op::IsNull => false,
        }
    }
}

/// Integer view of a number or numeric string, kept exact beyond 2^53.
fn as_integer(value: &Value) -> Option<i128> {
    match value {
        Value::Number(n) => n.as_i64().map(i128::from).or_else(|| n.as_u64().map(i128::from)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn as_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Numeric comparison when both sides read as numbers, text otherwise.
/// Structured values only compare for equality.
fn compare_operand(actual: &Value, operand: &Value) -> Option<Ordering> {
    if let (Some(a), Some(b)) = (as_integer(actual), as_integer(operand)) {
        return Some(a.cmp(&b));
    }
    if let (Some(a), Some(b)) = (as_number(actual), as_number(operand)) {
        return a.partial_cmp(&b);
    }
    if let (Some(a), Some(b)) = (as_text(actual), as_text(operand)) {
        return Some(a.cmp(&b));
    }
    (actual == operand).then_some(Ordering::Equal)
}

/// A conjunction of conditions.
#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
#[serde(from = "Record")]
pub struct Query {
    conditions: Vec<Condition>,
}

impl Query {
    pub const fn new() -> Self {
        Self {
            conditions: Vec::new(),
        }
    }

    /// Adds one condition from a literal or operator-prefixed string.
    #[must_use]
    pub fn with(mut self, field: impl Into<String>, literal: impl Into<Value>) -> Self {
        self.conditions.push(Condition::parse(field, literal.into()));
        self
    }

    pub fn conditions(&self) -> &[Condition] {
        &self.conditions
    }

    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty()
    }

    pub fn matches(&self, record: &Record) -> bool {
        self.conditions.iter().all(|c| c.matches(record))
    }

    /// Appends every condition of `other`.
    pub fn and(&mut self, other: &Self) {
        self.conditions.extend(other.conditions.iter().cloned());
    }
}

impl From<Record> for Query {
    fn from(map: Record) -> Self {
        Self {
            conditions: map
                .into_iter()
                .map(|(field, literal)| Condition::parse(field, literal))
                .collect(),
        }
    }
}

impl TryFrom<Value> for Query {
    type Error = Error;

    fn try_from(value: Value) -> Result<Self> {
        match value {
            Value::Object(map) => Ok(map.into()),
            Value::Null => Ok(Self::new()),
            other => Err(Error::InvalidArgument(format!(
                "query must be an object, got {other}"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn rec(value: Value) -> Record {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn operator_prefixes_parse_longest_first() {
        let q = Query::try_from(json!({
            "A": "<= 5", "B": ">=5", "C": "!= x", "D": "< 1", "E": "> 1", "F": "plain", "G": null
        }))
        .unwrap();
        let ops: Vec<_> = q.conditions().iter().map(|c| (c.field.as_str(), c.op)).collect();
        assert_eq!(
            ops,
            [
                ("A", Op::Le),
                ("B", Op::Ge),
                ("C", Op::Ne),
                ("D", Op::Lt),
                ("E", Op::Gt),
                ("F", Op::Eq),
                ("G", Op::IsNull)
            ]
        );
        assert_eq!(q.conditions()[1].value, json!("5"));
    }

    #[test]
    fn numeric_comparison_against_string_operand() {
        let q = Query::new().with("Born", "< 1500");
        assert!(q.matches(&rec(json!({"Born": 121}))));
        assert!(!q.matches(&rec(json!({"Born": 1610}))));
        assert!(!q.matches(&rec(json!({}))));
    }

    #[test]
    fn text_comparison_when_not_numeric() {
        let q = Query::new().with("Locale", "> en");
        assert!(q.matches(&rec(json!({"Locale": "ru"}))));
        assert!(!q.matches(&rec(json!({"Locale": "de"}))));
    }

    #[test]
    fn literal_equality_and_null() {
        let q = Query::new().with("Id", 2).with("Gone", Value::Null);
        assert!(q.matches(&rec(json!({"Id": 2}))));
        assert!(q.matches(&rec(json!({"Id": "2", "Gone": null}))));
        assert!(!q.matches(&rec(json!({"Id": 2, "Gone": 1}))));
    }

    #[test]
    fn large_integers_compare_exactly() {
        let q = Query::new().with("Id", 9_007_199_254_740_993u64);
        assert!(!q.matches(&rec(json!({"Id": 9_007_199_254_740_992u64}))));
        assert!(q.matches(&rec(json!({"Id": 9_007_199_254_740_993u64}))));
        assert!(q.matches(&rec(json!({"Id": "9007199254740993"}))));

        let below = Query::new().with("Id", "< 18446744073709551615");
        assert!(below.matches(&rec(json!({"Id": u64::MAX - 1}))));
        assert!(!below.matches(&rec(json!({"Id": u64::MAX}))));
        assert!(Query::new().with("N", "> -1").matches(&rec(json!({"N": 0}))));
        assert!(Query::new().with("N", "< 2").matches(&rec(json!({"N": 1.5}))));
    }

    #[test]
    fn empty_query_matches_all() {
        assert!(Query::new().matches(&rec(json!({}))));
        assert!(Query::try_from(json!("x")).is_err());
    }
}
