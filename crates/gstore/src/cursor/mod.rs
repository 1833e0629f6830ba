//! Lazy, chainable queries over records.
//!
//! A [`Cursor`] accumulates an operation program without doing any I/O. The
//! program only runs when [`Cursor::fetch`] is awaited, against whichever
//! source the cursor has:
//!
//! - a dataset it owns (leaf cursor), evaluated in memory over a fresh copy;
//! - parent cursors (derived cursor, e.g. the result of [`Cursor::select`]),
//!   fetched concurrently and concatenated in declaration order;
//! - a category of a relational provider, which compiles what it can into SQL.
//!
//! ```
//! use gstore::{Cursor, Query};
//! use serde_json::json;
//!
//! let people = vec![
//!     json!({ "Id": 1, "Name": "Marcus Aurelius", "Born": 121 }),
//!     json!({ "Id": 2, "Name": "Victor Glushkov", "Born": 1923 }),
//! ];
//! let cursor = Cursor::from_values(people)
//!     .unwrap()
//!     .select(Query::new().with("Born", "< 1500"))
//!     .order("Born");
//! assert_eq!(cursor.program().len(), 2);
//! ```

pub(crate) mod memory;
mod operation;

pub use operation::*;

use core::{fmt, mem};
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::{BoxFuture, try_join_all};
use serde_json::Value;

use crate::{CategoryDefinition, Error, Query, Record, Result};

/// Runs a program against a named category of some storage backend.
#[async_trait]
pub trait CategoryExecutor: Send + Sync {
    async fn execute(&self, category: &str, program: Vec<Operation>) -> Result<Vec<Record>>;
}

/// Where a cursor's records come from.
pub enum Source {
    Dataset(Arc<Vec<Record>>),
    Parents(Vec<Cursor>),
    Category {
        executor: Arc<dyn CategoryExecutor>,
        category: String,
    },
}

impl fmt::Debug for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Dataset(data) => f.debug_tuple("Dataset").field(&data.len()).finish(),
            Self::Parents(parents) => f.debug_tuple("Parents").field(parents).finish(),
            Self::Category { category, .. } => f.debug_struct("Category").field("category", category).finish(),
        }
    }
}

#[derive(Debug)]
pub struct Cursor {
    program: Vec<Operation>,
    source: Source,
    schema: Option<Arc<CategoryDefinition>>,
}

impl Default for Cursor {
    fn default() -> Self {
        Self::new()
    }
}

impl Cursor {
    /// A leaf cursor over an empty dataset.
    pub fn new() -> Self {
        Self::from_records(Vec::new())
    }

    pub fn from_records(records: Vec<Record>) -> Self {
        Self::with_source(Source::Dataset(Arc::new(records)))
    }

    /// Builds a leaf cursor from JSON objects.
    pub fn from_values(values: impl IntoIterator<Item = Value>) -> Result<Self> {
        let records = values
            .into_iter()
            .map(|value| match value {
                Value::Object(record) => Ok(record),
                other => Err(Error::InvalidArgument(format!("record must be an object, got {other}"))),
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self::from_records(records))
    }

    /// A derived cursor over the concatenated results of `parents`.
    pub fn from_parents(parents: Vec<Self>) -> Self {
        Self::with_source(Source::Parents(parents))
    }

    /// A cursor whose program runs against `category` of `executor`.
    pub fn for_category(executor: Arc<dyn CategoryExecutor>, category: impl Into<String>) -> Self {
        Self::with_source(Source::Category {
            executor,
            category: category.into(),
        })
    }

    const fn with_source(source: Source) -> Self {
        Self {
            program: Vec::new(),
            source,
            schema: None,
        }
    }

    pub const fn source(&self) -> &Source {
        &self.source
    }

    /// Operations queued since the last fetch.
    pub fn program(&self) -> &[Operation] {
        &self.program
    }

    pub(crate) fn into_program(self) -> Vec<Operation> {
        self.program
    }

    fn push(mut self, op: Operation) -> Self {
        self.program.push(op);
        self
    }

    /// Appends already-built operations, e.g. decoded from the wire.
    #[must_use]
    pub fn enroll(mut self, ops: impl IntoIterator<Item = Operation>) -> Self {
        self.program.extend(ops);
        self
    }

    /// Attaches field metadata.
    #[must_use]
    pub fn definition(mut self, schema: impl Into<Arc<CategoryDefinition>>) -> Self {
        self.schema = Some(schema.into());
        self
    }

    pub fn schema(&self) -> Option<&CategoryDefinition> {
        self.schema.as_deref()
    }

    #[must_use]
    pub fn map(self, f: impl Fn(Record) -> Record + Send + Sync + 'static) -> Self {
        self.push(Operation::Map(Arc::new(f)))
    }

    #[must_use]
    pub fn filter(self, f: impl Fn(&Record) -> bool + Send + Sync + 'static) -> Self {
        self.push(Operation::Filter(Arc::new(f)))
    }

    /// Keeps a field list, or rebuilds fields through [`FieldMapping`]s.
    #[must_use]
    pub fn projection(self, projection: impl Into<Projection>) -> Self {
        self.push(Operation::Projection(projection.into()))
    }

    #[must_use]
    pub fn sort(self, f: impl Fn(&Record, &Record) -> core::cmp::Ordering + Send + Sync + 'static) -> Self {
        self.push(Operation::Sort(Arc::new(f)))
    }

    /// Stable ascending sort, first key has the highest priority.
    #[must_use]
    pub fn order(self, fields: impl Into<Fields>) -> Self {
        self.push(Operation::Order(fields.into().0))
    }

    /// Stable descending sort, first key has the highest priority.
    #[must_use]
    pub fn desc(self, fields: impl Into<Fields>) -> Self {
        self.push(Operation::Desc(fields.into().0))
    }

    #[must_use]
    pub fn distinct(self) -> Self {
        self.push(Operation::Distinct)
    }

    #[must_use]
    pub fn one(self) -> Self {
        self.push(Operation::One)
    }

    /// Keeps the first `n` records of the result so far.
    #[must_use]
    pub fn limit(self, n: usize) -> Self {
        self.push(Operation::Limit(n))
    }

    #[must_use]
    pub fn union(self, other: Self) -> Self {
        self.push(Operation::Union(Box::new(other)))
    }

    #[must_use]
    pub fn intersection(self, other: Self) -> Self {
        self.push(Operation::Intersection(Box::new(other)))
    }

    #[must_use]
    pub fn difference(self, other: Self) -> Self {
        self.push(Operation::Difference(Box::new(other)))
    }

    /// Records of `other` that are not in this cursor's result.
    #[must_use]
    pub fn complement(self, other: Self) -> Self {
        self.push(Operation::Complement(Box::new(other)))
    }

    /// Filters by `query` in place.
    #[must_use]
    pub fn find(self, query: Query) -> Self {
        self.push(Operation::Find(query))
    }

    /// Returns a new derived cursor filtering this one's result by `query`.
    /// The attached schema carries over.
    #[must_use]
    pub fn select(self, query: Query) -> Self {
        let schema = self.schema.clone();
        Self {
            program: vec![Operation::Select(query)],
            source: Source::Parents(vec![self]),
            schema,
        }
    }

    /// A new leaf cursor sharing this cursor's dataset.
    pub fn copy(&self) -> Result<Self> {
        match &self.source {
            Source::Dataset(data) => Ok(Self {
                program: Vec::new(),
                source: Source::Dataset(Arc::clone(data)),
                schema: self.schema.clone(),
            }),
            _ => Err(Error::NotImplemented("copy of a cursor without its own dataset")),
        }
    }

    /// A new leaf cursor with an independent copy of every record.
    pub fn deep_clone(&self) -> Result<Self> {
        match &self.source {
            Source::Dataset(data) => Ok(Self {
                program: Vec::new(),
                source: Source::Dataset(Arc::new((**data).clone())),
                schema: self.schema.clone(),
            }),
            _ => Err(Error::NotImplemented("clone of a cursor without its own dataset")),
        }
    }

    /// Drops every record and queued operation of a leaf cursor.
    pub fn empty(mut self) -> Result<Self> {
        match &mut self.source {
            Source::Dataset(data) => {
                *data = Arc::new(Vec::new());
                self.program.clear();
                Ok(self)
            }
            _ => Err(Error::NotImplemented("empty on a cursor without its own dataset")),
        }
    }

    /// Number of records in a leaf cursor's dataset, ignoring the program.
    pub fn count(&self) -> Result<usize> {
        match &self.source {
            Source::Dataset(data) => Ok(data.len()),
            _ => Err(Error::NotImplemented("count of a cursor without its own dataset")),
        }
    }

    pub fn dataset(&self) -> Option<&[Record]> {
        match &self.source {
            Source::Dataset(data) => Some(data.as_slice()),
            _ => None,
        }
    }

    /// Mutable access to a leaf dataset; copies it first if shared by [`Self::copy`].
    pub fn dataset_mut(&mut self) -> Option<&mut Vec<Record>> {
        match &mut self.source {
            Source::Dataset(data) => Some(Arc::make_mut(data)),
            _ => None,
        }
    }

    /// Runs the queued program and returns the realized records.
    ///
    /// The program is moved out before it runs, so a second fetch without new
    /// operations returns the source unchanged. The stored dataset itself is
    /// never modified.
    pub fn fetch(&mut self) -> BoxFuture<'_, Result<Vec<Record>>> {
        Box::pin(async move {
            let program = mem::take(&mut self.program);
            match &mut self.source {
                Source::Dataset(data) => memory::evaluate(program, (**data).clone()).await,
                Source::Category { executor, category } => executor.execute(category, program).await,
                Source::Parents(parents) => {
                    // A lone category parent runs both programs in one query.
                    if let [parent] = parents.as_mut_slice() {
                        if let Source::Category { executor, category } = &parent.source {
                            let mut merged = mem::take(&mut parent.program);
                            merged.extend(program);
                            return executor.execute(category, merged).await;
                        }
                    }
                    let results = try_join_all(parents.iter_mut().map(Self::fetch)).await?;
                    memory::evaluate(program, results.into_iter().flatten().collect()).await
                }
            }
        })
    }
}
