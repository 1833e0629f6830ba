//! The operation program (JSQL) accumulated by a cursor.

use core::{cmp::Ordering, fmt};
use std::sync::Arc;

use serde::Deserialize;
use serde_json::Value;

use super::Cursor;
use crate::{Query, Record};

pub type MapFn = Arc<dyn Fn(Record) -> Record + Send + Sync>;
pub type FilterFn = Arc<dyn Fn(&Record) -> bool + Send + Sync>;
pub type CompareFn = Arc<dyn Fn(&Record, &Record) -> Ordering + Send + Sync>;
pub type TransformFn = Arc<dyn Fn(Value) -> Value + Send + Sync>;

/// One output field of a mapping projection: `to` is read from `from` and fed
/// through `transforms` left to right.
#[derive(Clone)]
pub struct FieldMapping {
    pub to: String,
    pub from: String,
    pub transforms: Vec<TransformFn>,
}

impl FieldMapping {
    pub fn new(to: impl Into<String>, from: impl Into<String>) -> Self {
        Self {
            to: to.into(),
            from: from.into(),
            transforms: Vec::new(),
        }
    }

    #[must_use]
    pub fn then(mut self, f: impl Fn(Value) -> Value + Send + Sync + 'static) -> Self {
        self.transforms.push(Arc::new(f));
        self
    }
}

impl fmt::Debug for FieldMapping {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FieldMapping")
            .field("to", &self.to)
            .field("from", &self.from)
            .field("transforms", &self.transforms.len())
            .finish()
    }
}

#[derive(Clone, Debug)]
pub enum Projection {
    /// Keep only the listed fields.
    Fields(Vec<String>),
    /// Build every output field from a source field and transform chain.
    Mapping(Vec<FieldMapping>),
}

impl From<Vec<String>> for Projection {
    fn from(fields: Vec<String>) -> Self {
        Self::Fields(fields)
    }
}

impl From<&[&str]> for Projection {
    fn from(fields: &[&str]) -> Self {
        Self::Fields(fields.iter().map(|&f| f.to_owned()).collect())
    }
}

impl<const N: usize> From<[&str; N]> for Projection {
    fn from(fields: [&str; N]) -> Self {
        Self::Fields(fields.iter().map(|&f| f.to_owned()).collect())
    }
}

impl From<Vec<FieldMapping>> for Projection {
    fn from(mapping: Vec<FieldMapping>) -> Self {
        Self::Mapping(mapping)
    }
}

/// Ordered field names for `order` and `desc`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(from = "OneOrMany")]
pub struct Fields(pub Vec<String>);

#[derive(Deserialize)]
#[serde(untagged)]
enum OneOrMany {
    One(String),
    Many(Vec<String>),
}

impl From<OneOrMany> for Fields {
    fn from(raw: OneOrMany) -> Self {
        match raw {
            OneOrMany::One(field) => Self(vec![field]),
            OneOrMany::Many(fields) => Self(fields),
        }
    }
}

impl From<&str> for Fields {
    fn from(field: &str) -> Self {
        Self(vec![field.to_owned()])
    }
}

impl From<String> for Fields {
    fn from(field: String) -> Self {
        Self(vec![field])
    }
}

impl From<Vec<String>> for Fields {
    fn from(fields: Vec<String>) -> Self {
        Self(fields)
    }
}

impl From<&[&str]> for Fields {
    fn from(fields: &[&str]) -> Self {
        Self(fields.iter().map(|&f| f.to_owned()).collect())
    }
}

impl<const N: usize> From<[&str; N]> for Fields {
    fn from(fields: [&str; N]) -> Self {
        Self(fields.iter().map(|&f| f.to_owned()).collect())
    }
}

/// A single queued operation.
pub enum Operation {
    Map(MapFn),
    Filter(FilterFn),
    Projection(Projection),
    Select(Query),
    Sort(CompareFn),
    Order(Vec<String>),
    Desc(Vec<String>),
    Distinct,
    One,
    Limit(usize),
    Union(Box<Cursor>),
    Intersection(Box<Cursor>),
    Difference(Box<Cursor>),
    Complement(Box<Cursor>),
    /// Filters in place like `select`, without deriving a new cursor.
    Find(Query),
}

impl Operation {
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Map(_) => "map",
            Self::Filter(_) => "filter",
            Self::Projection(_) => "projection",
            Self::Select(_) => "select",
            Self::Sort(_) => "sort",
            Self::Order(_) => "order",
            Self::Desc(_) => "desc",
            Self::Distinct => "distinct",
            Self::One => "one",
            Self::Limit(_) => "limit",
            Self::Union(_) => "union",
            Self::Intersection(_) => "intersection",
            Self::Difference(_) => "difference",
            Self::Complement(_) => "complement",
            Self::Find(_) => "find",
        }
    }
}

impl fmt::Debug for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Projection(p) => f.debug_tuple("Projection").field(p).finish(),
            Self::Select(q) => f.debug_tuple("Select").field(q).finish(),
            Self::Find(q) => f.debug_tuple("Find").field(q).finish(),
            Self::Order(k) => f.debug_tuple("Order").field(k).finish(),
            Self::Desc(k) => f.debug_tuple("Desc").field(k).finish(),
            Self::Limit(n) => f.debug_tuple("Limit").field(n).finish(),
            other => f.write_str(other.name()),
        }
    }
}

/// Wire form of the declarative subset of [`Operation`].
///
/// Function-carrying operations and set operations cannot be serialized, so
/// they have no wire form.
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(tag = "op", rename_all = "lowercase", deny_unknown_fields)]
pub enum JsqlOp {
    Select { query: Query },
    Find { query: Query },
    Order { fields: Fields },
    Desc { fields: Fields },
    Projection { fields: Vec<String> },
    Distinct,
    One,
    Limit { count: usize },
}

impl From<JsqlOp> for Operation {
    fn from(op: JsqlOp) -> Self {
        match op {
            JsqlOp::Select { query } => Self::Select(query),
            JsqlOp::Find { query } => Self::Find(query),
            JsqlOp::Order { fields } => Self::Order(fields.0),
            JsqlOp::Desc { fields } => Self::Desc(fields.0),
            JsqlOp::Projection { fields } => Self::Projection(Projection::Fields(fields)),
            JsqlOp::Distinct => Self::Distinct,
            JsqlOp::One => Self::One,
            JsqlOp::Limit { count } => Self::Limit(count),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn wire_ops_deserialize() {
        let ops: Vec<JsqlOp> = serde_json::from_value(json!([
            { "op": "select", "query": { "Born": "< 1500" } },
            { "op": "order", "fields": "Born" },
            { "op": "desc", "fields": ["Id", "Name"] },
            { "op": "limit", "count": 2 },
            { "op": "distinct" }
        ]))
        .unwrap();
        assert_eq!(ops.len(), 5);
        assert_eq!(
            ops[1],
            JsqlOp::Order {
                fields: Fields(vec!["Born".into()])
            }
        );
        let program: Vec<Operation> = ops.into_iter().map(Operation::from).collect();
        let names: Vec<_> = program.iter().map(Operation::name).collect();
        assert_eq!(names, ["select", "order", "desc", "limit", "distinct"]);
    }

    #[test]
    fn function_ops_have_no_wire_form() {
        let res = serde_json::from_value::<JsqlOp>(json!({ "op": "map", "fn": "x => x" }));
        assert!(res.is_err());
    }
}
